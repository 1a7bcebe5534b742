//! Compose file snapshot
//!
//! Parses the compose document into a normalised view: an ordered service
//! list (compose file order is preserved and drives list-response ordering),
//! tolerant of the several shapes compose allows for ports, environment and
//! labels. The snapshot is immutable; [`SnapshotCache`] re-reads the file
//! behind a short staleness window so responses reflect the file within
//! seconds without a parse per request.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::error::ApiError;
use crate::FACADE_LABEL;

/// One port mapping of a compose service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    /// Container-side port
    pub target: u16,
    /// Host-side port, when published
    pub published: Option<u16>,
    /// Protocol, uppercased ("TCP" / "UDP")
    pub protocol: String,
}

/// Normalised view of one compose service
#[derive(Debug, Clone, Default)]
pub struct ComposeService {
    /// Container image
    pub image: Option<String>,
    /// Command override, normalised to exec form
    pub command: Vec<String>,
    /// Port mappings
    pub ports: Vec<PortSpec>,
    /// Environment entries
    pub environment: BTreeMap<String, String>,
    /// Compose labels
    pub labels: BTreeMap<String, String>,
    /// Volume declarations, kept raw
    pub volumes: Vec<String>,
    /// Names of services this one depends on
    pub depends_on: Vec<String>,
}

impl ComposeService {
    /// Whether this service is the facade itself (tagged at injection time)
    pub fn is_facade(&self) -> bool {
        self.labels.contains_key(FACADE_LABEL)
    }
}

/// Immutable snapshot of the compose document
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Compose project name; doubles as the project namespace
    pub project_name: String,
    /// Services in compose file order
    pub services: Vec<(String, ComposeService)>,
}

impl Snapshot {
    /// Parse a compose document.
    ///
    /// `fallback_name` is used when the document has no top-level `name:` key
    /// (the compose convention is the parent directory name).
    pub fn parse(input: &str, fallback_name: &str) -> Result<Self, String> {
        let doc: serde_yaml::Value =
            serde_yaml::from_str(input).map_err(|e| format!("invalid compose YAML: {}", e))?;

        let project_name = doc
            .get("name")
            .and_then(serde_yaml::Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| sanitize_project_name(fallback_name));

        let mut services = Vec::new();
        if let Some(mapping) = doc.get("services").and_then(serde_yaml::Value::as_mapping) {
            for (key, value) in mapping {
                let name = key
                    .as_str()
                    .ok_or_else(|| "service names must be strings".to_string())?
                    .to_string();
                let raw: RawService = serde_yaml::from_value(value.clone())
                    .map_err(|e| format!("invalid service \"{}\": {}", name, e))?;
                services.push((name, raw.normalise()?));
            }
        }

        Ok(Snapshot {
            project_name,
            services,
        })
    }

    /// Services visible to clients, in compose order; the facade's own
    /// service is suppressed.
    pub fn workload_services(&self) -> impl Iterator<Item = (&str, &ComposeService)> {
        self.services
            .iter()
            .filter(|(_, svc)| !svc.is_facade())
            .map(|(name, svc)| (name.as_str(), svc))
    }

    /// Look up a workload service by name
    pub fn workload(&self, name: &str) -> Option<&ComposeService> {
        self.workload_services()
            .find(|(n, _)| *n == name)
            .map(|(_, svc)| svc)
    }
}

/// Derive a project name from a directory name: lowercase, with anything
/// outside `[a-z0-9]` mapped to `-`.
pub fn sanitize_project_name(raw: &str) -> String {
    let name: String = raw
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    if name.is_empty() {
        "default".to_string()
    } else {
        name
    }
}

/// Project name for a compose file path: the parent directory's basename
pub fn project_name_fallback(compose_path: &Path) -> String {
    compose_path
        .canonicalize()
        .ok()
        .as_deref()
        .unwrap_or(compose_path)
        .parent()
        .and_then(Path::file_name)
        .and_then(|n| n.to_str())
        .map(sanitize_project_name)
        .unwrap_or_else(|| "default".to_string())
}

// ---------------------------------------------------------------------------
// Raw deserialization forms
// ---------------------------------------------------------------------------

/// Compose service as written: several fields accept more than one shape
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawService {
    image: Option<String>,
    command: Option<StringOrList>,
    ports: Vec<RawPort>,
    environment: Option<MapOrList>,
    labels: Option<MapOrList>,
    volumes: Vec<serde_yaml::Value>,
    depends_on: Option<RawDependsOn>,
}

impl RawService {
    fn normalise(self) -> Result<ComposeService, String> {
        let mut ports = Vec::new();
        for port in self.ports {
            ports.push(port.normalise()?);
        }

        let volumes = self
            .volumes
            .into_iter()
            .map(scalar_to_string)
            .collect::<Vec<_>>();

        Ok(ComposeService {
            image: self.image,
            command: self.command.map(StringOrList::into_vec).unwrap_or_default(),
            ports,
            environment: self.environment.map(MapOrList::into_map).unwrap_or_default(),
            labels: self.labels.map(MapOrList::into_map).unwrap_or_default(),
            volumes,
            depends_on: self.depends_on.map(RawDependsOn::into_vec).unwrap_or_default(),
        })
    }
}

/// `ports:` entry: `80`, `"8080:80"`, `"80/udp"` or the long form
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPort {
    Number(u16),
    Short(String),
    Long {
        target: u16,
        #[serde(default)]
        published: Option<NumberOrString>,
        #[serde(default)]
        protocol: Option<String>,
    },
}

impl RawPort {
    fn normalise(self) -> Result<PortSpec, String> {
        match self {
            RawPort::Number(target) => Ok(PortSpec {
                target,
                published: None,
                protocol: "TCP".to_string(),
            }),
            RawPort::Short(text) => parse_short_port(&text),
            RawPort::Long {
                target,
                published,
                protocol,
            } => {
                let published = match published {
                    Some(p) => Some(p.as_port()?),
                    None => None,
                };
                Ok(PortSpec {
                    target,
                    published,
                    protocol: protocol
                        .as_deref()
                        .unwrap_or("tcp")
                        .to_ascii_uppercase(),
                })
            }
        }
    }
}

/// Parse `"80"`, `"8080:80"`, `"127.0.0.1:8080:80"` or `"80/udp"`
fn parse_short_port(text: &str) -> Result<PortSpec, String> {
    let (ports, protocol) = match text.split_once('/') {
        Some((ports, proto)) => (ports, proto.to_ascii_uppercase()),
        None => (text, "TCP".to_string()),
    };

    let parts: Vec<&str> = ports.split(':').collect();
    let parse = |s: &str| {
        s.parse::<u16>()
            .map_err(|_| format!("invalid port \"{}\"", text))
    };

    match parts.as_slice() {
        [target] => Ok(PortSpec {
            target: parse(target)?,
            published: None,
            protocol,
        }),
        // "host:container" and "ip:host:container"; the container port is last
        [.., published, target] => Ok(PortSpec {
            target: parse(target)?,
            published: Some(parse(published)?),
            protocol,
        }),
        _ => Err(format!("invalid port \"{}\"", text)),
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u16),
    Text(String),
}

impl NumberOrString {
    fn as_port(&self) -> Result<u16, String> {
        match self {
            NumberOrString::Number(n) => Ok(*n),
            // ranges like "8080-8090" publish the first port here
            NumberOrString::Text(s) => s
                .split('-')
                .next()
                .unwrap_or(s)
                .parse::<u16>()
                .map_err(|_| format!("invalid published port \"{}\"", s)),
        }
    }
}

/// `command:` as a shell string or exec list
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringOrList {
    Text(String),
    List(Vec<String>),
}

impl StringOrList {
    fn into_vec(self) -> Vec<String> {
        match self {
            StringOrList::Text(s) => s.split_whitespace().map(str::to_string).collect(),
            StringOrList::List(list) => list,
        }
    }
}

/// `environment:`/`labels:` as a mapping or a `KEY=value` list
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MapOrList {
    Map(BTreeMap<String, serde_yaml::Value>),
    List(Vec<String>),
}

impl MapOrList {
    fn into_map(self) -> BTreeMap<String, String> {
        match self {
            MapOrList::Map(map) => map
                .into_iter()
                .map(|(k, v)| (k, scalar_to_string(v)))
                .collect(),
            MapOrList::List(entries) => entries
                .into_iter()
                .map(|entry| match entry.split_once('=') {
                    Some((k, v)) => (k.to_string(), v.to_string()),
                    None => (entry, String::new()),
                })
                .collect(),
        }
    }
}

/// `depends_on:` as a list of names or a mapping with conditions
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDependsOn {
    List(Vec<String>),
    Map(BTreeMap<String, serde_yaml::Value>),
}

impl RawDependsOn {
    fn into_vec(self) -> Vec<String> {
        match self {
            RawDependsOn::List(list) => list,
            RawDependsOn::Map(map) => map.into_keys().collect(),
        }
    }
}

fn scalar_to_string(value: serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Staleness window for the cached snapshot
const SNAPSHOT_TTL: Duration = Duration::from_secs(2);

/// Re-reads the compose file behind a short TTL.
///
/// Parse failures are not cached: every request retries the file and surfaces
/// the diagnostic as a 500 until the file is fixed.
pub struct SnapshotCache {
    path: PathBuf,
    ttl: Duration,
    cached: RwLock<Option<(Instant, Arc<Snapshot>)>>,
}

impl SnapshotCache {
    /// Cache for the compose file at `path`
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            ttl: SNAPSHOT_TTL,
            cached: RwLock::new(None),
        }
    }

    /// Cache with a custom staleness window (tests use zero)
    pub fn with_ttl(path: PathBuf, ttl: Duration) -> Self {
        Self {
            path,
            ttl,
            cached: RwLock::new(None),
        }
    }

    /// Current snapshot, re-reading the file when the cached one is stale
    pub async fn load(&self) -> Result<Arc<Snapshot>, ApiError> {
        if let Some((at, snapshot)) = self.cached.read().expect("cache lock").as_ref() {
            if at.elapsed() < self.ttl {
                return Ok(Arc::clone(snapshot));
            }
        }

        let text = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ApiError::Internal(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        let fallback = project_name_fallback(&self.path);
        let snapshot = Arc::new(
            Snapshot::parse(&text, &fallback).map_err(ApiError::Internal)?,
        );

        *self.cached.write().expect("cache lock") = Some((Instant::now(), Arc::clone(&snapshot)));
        Ok(snapshot)
    }
}
