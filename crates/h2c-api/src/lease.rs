//! In-memory Lease store
//!
//! Implements the coordination.k8s.io/v1 Lease contract far enough for
//! client-side leader election: optimistic concurrency via resourceVersion,
//! transition counting on holder change, and a process-global monotonic
//! version counter that also stamps list envelopes. Everything is lost at
//! process exit.
//!
//! The store mutex covers only map access and version bumps; it is never
//! held across I/O. Concurrent writers are serialised here, but the external
//! contract is optimistic: a stale resourceVersion gets a 409.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::project::synthetic_uid;

/// Lease spec, mirroring coordination.k8s.io/v1
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LeaseSpec {
    /// Identity of the current holder
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder_identity: Option<String>,
    /// Seconds a holder may go unrenewed before candidates take over
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_duration_seconds: Option<i64>,
    /// When the current holder acquired the lease
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acquire_time: Option<String>,
    /// Last renewal by the current holder
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renew_time: Option<String>,
    /// Number of holder changes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_transitions: Option<i64>,
}

/// Object metadata of a stored lease
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseMeta {
    /// Lease name
    pub name: String,
    /// Namespace the lease was created in
    pub namespace: String,
    /// UID assigned at creation
    pub uid: String,
    /// Monotonic version, as the stringified global counter
    pub resource_version: String,
    /// Creation time
    pub creation_timestamp: String,
    /// Labels from the request body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    /// Annotations from the request body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

/// A stored lease, serialised exactly as returned to clients.
///
/// Field order and skip rules are fixed so two GETs of an unchanged lease
/// produce byte-identical bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lease {
    /// Always "Lease"
    pub kind: &'static str,
    /// Always "coordination.k8s.io/v1"
    #[serde(rename = "apiVersion")]
    pub api_version: &'static str,
    /// Object metadata
    pub metadata: LeaseMeta,
    /// Lease spec
    pub spec: LeaseSpec,
}

/// Request body for lease create and update
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LeaseBody {
    /// Incoming metadata (name, resourceVersion, labels, annotations)
    pub metadata: LeaseBodyMeta,
    /// Incoming spec
    pub spec: LeaseSpec,
}

/// Metadata fields read from a request body
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LeaseBodyMeta {
    /// Lease name (required on create)
    pub name: Option<String>,
    /// Optimistic concurrency token
    pub resource_version: Option<String>,
    /// Labels to store
    pub labels: Option<BTreeMap<String, String>>,
    /// Annotations to store
    pub annotations: Option<BTreeMap<String, String>>,
}

/// In-memory lease map keyed by (namespace, name)
#[derive(Debug, Default)]
pub struct LeaseStore {
    leases: Mutex<HashMap<(String, String), Lease>>,
    version: AtomicU64,
}

impl LeaseStore {
    /// Empty store; the version counter starts above zero so "no version"
    /// never collides with a real one.
    pub fn new() -> Self {
        Self {
            leases: Mutex::new(HashMap::new()),
            version: AtomicU64::new(1),
        }
    }

    /// Current value of the global version counter
    pub fn current_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// CREATE: insert if absent, 409 on collision, 400 without a name
    pub fn create(&self, namespace: &str, body: LeaseBody, now: &str) -> Result<Lease, ApiError> {
        let name = body
            .metadata
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ApiError::BadRequest("metadata.name is required".to_string()))?;

        let mut leases = self.leases.lock().expect("lease lock");
        let key = (namespace.to_string(), name.clone());
        if leases.contains_key(&key) {
            return Err(ApiError::AlreadyExists(format!(
                "leases.coordination.k8s.io \"{}\" already exists",
                name
            )));
        }

        let rv = self.next_version();
        let mut spec = body.spec;
        if spec.lease_transitions.is_none() {
            spec.lease_transitions = Some(0);
        }

        let lease = Lease {
            kind: "Lease",
            api_version: "coordination.k8s.io/v1",
            metadata: LeaseMeta {
                name: name.clone(),
                namespace: namespace.to_string(),
                uid: synthetic_uid(&format!("lease/{}/{}/{}", namespace, name, rv)),
                resource_version: rv.to_string(),
                creation_timestamp: now.to_string(),
                labels: body.metadata.labels,
                annotations: body.metadata.annotations,
            },
            spec,
        };
        leases.insert(key, lease.clone());
        Ok(lease)
    }

    /// GET by (namespace, name)
    pub fn get(&self, namespace: &str, name: &str) -> Result<Lease, ApiError> {
        self.leases
            .lock()
            .expect("lease lock")
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ApiError::not_found("leases.coordination.k8s.io", name))
    }

    /// UPDATE: full-object replace under an optimistic resourceVersion guard.
    ///
    /// Bumps the version, increments leaseTransitions when the holder changed
    /// from a previous non-null holder, and defaults renewTime to now.
    pub fn update(
        &self,
        namespace: &str,
        name: &str,
        body: LeaseBody,
        now: &str,
    ) -> Result<Lease, ApiError> {
        let mut leases = self.leases.lock().expect("lease lock");
        let key = (namespace.to_string(), name.to_string());
        let stored = leases
            .get(&key)
            .ok_or_else(|| ApiError::not_found("leases.coordination.k8s.io", name))?;

        if let Some(rv) = &body.metadata.resource_version {
            if *rv != stored.metadata.resource_version {
                return Err(ApiError::Conflict(format!(
                    "Operation cannot be fulfilled on leases.coordination.k8s.io \"{}\": \
                     the object has been modified; please apply your changes to the latest \
                     version and try again",
                    name
                )));
            }
        }

        let previous_transitions = stored.spec.lease_transitions.unwrap_or(0);
        let holder_changed = body.spec.holder_identity != stored.spec.holder_identity;

        let mut spec = body.spec;
        spec.lease_transitions = if holder_changed && stored.spec.holder_identity.is_some() {
            Some(previous_transitions + 1)
        } else {
            Some(previous_transitions)
        };
        if spec.renew_time.is_none() {
            spec.renew_time = Some(now.to_string());
        }
        if spec.acquire_time.is_none() {
            spec.acquire_time = stored.spec.acquire_time.clone();
        }

        let updated = Lease {
            kind: "Lease",
            api_version: "coordination.k8s.io/v1",
            metadata: LeaseMeta {
                resource_version: self.next_version().to_string(),
                labels: body.metadata.labels,
                annotations: body.metadata.annotations,
                ..stored.metadata.clone()
            },
            spec,
        };
        leases.insert(key, updated.clone());
        Ok(updated)
    }

    /// DELETE: remove and return the lease, 404 if absent
    pub fn delete(&self, namespace: &str, name: &str) -> Result<Lease, ApiError> {
        self.leases
            .lock()
            .expect("lease lock")
            .remove(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| ApiError::not_found("leases.coordination.k8s.io", name))
    }

    /// LIST leases in a namespace, sorted by name
    pub fn list(&self, namespace: &str) -> Vec<Lease> {
        let mut leases: Vec<Lease> = self
            .leases
            .lock()
            .expect("lease lock")
            .values()
            .filter(|lease| lease.metadata.namespace == namespace)
            .cloned()
            .collect();
        leases.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        leases
    }

    /// LIST across all namespaces, sorted by (namespace, name)
    pub fn list_all(&self) -> Vec<Lease> {
        let mut leases: Vec<Lease> = self
            .leases
            .lock()
            .expect("lease lock")
            .values()
            .cloned()
            .collect();
        leases.sort_by(|a, b| {
            (&a.metadata.namespace, &a.metadata.name).cmp(&(&b.metadata.namespace, &b.metadata.name))
        });
        leases
    }
}
