//! Projection of compose services into Kubernetes resource shapes
//!
//! Pure builders from the snapshot to `serde_json::Value` records. Identities
//! are deterministic: UIDs and IPs derive from SHA-256 of
//! `"<project>/<service>"`, so a client library that caches by UID across
//! discovery calls sees stable objects. Ordering follows the compose file.

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::compose::{ComposeService, PortSpec};
use crate::NODE_NAME;

/// Deterministic digest for a service identity
fn service_digest(project: &str, service: &str) -> [u8; 32] {
    let digest = Sha256::digest(format!("{}/{}", project, service).as_bytes());
    digest.into()
}

/// Deterministic UID for an arbitrary seed, formatted like a UUID
pub fn synthetic_uid(seed: &str) -> String {
    let d = Sha256::digest(seed.as_bytes());
    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7],
        d[8], d[9], d[10], d[11], d[12], d[13], d[14], d[15],
    )
}

/// Pod name for a compose service: a single synthetic replica
pub fn pod_name(service: &str) -> String {
    format!("{}-0", service)
}

/// Deterministic pod UID
pub fn pod_uid(project: &str, service: &str) -> String {
    synthetic_uid(&format!("{}/{}", project, service))
}

/// Deterministic ClusterIP in the 10.96.0.0/16 service range
pub fn cluster_ip(project: &str, service: &str) -> String {
    let d = service_digest(project, service);
    format!("10.96.{}.{}", d[0], d[1] % 254 + 1)
}

/// Deterministic pod IP in the 10.244.0.0/16 pod range
pub fn pod_ip(project: &str, service: &str) -> String {
    let d = service_digest(project, service);
    format!("10.244.{}.{}", d[2], d[3] % 254 + 1)
}

/// Deterministic host IP for the synthetic node
pub fn host_ip(project: &str, service: &str) -> String {
    let d = service_digest(project, service);
    format!("172.28.{}.{}", d[4], d[5] % 254 + 1)
}

/// Labels for a projected resource: `app=<service>` plus compose labels
fn labels(service: &str, svc: &ComposeService) -> Value {
    let mut map = Map::new();
    map.insert("app".to_string(), Value::String(service.to_string()));
    for (k, v) in &svc.labels {
        map.insert(k.clone(), Value::String(v.clone()));
    }
    Value::Object(map)
}

fn image(svc: &ComposeService) -> &str {
    svc.image.as_deref().unwrap_or("unknown")
}

/// Namespace object with the standard metadata name label
pub fn make_namespace(name: &str, rv: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": name,
            "uid": synthetic_uid(&format!("namespace/{}", name)),
            "resourceVersion": rv,
            "labels": { "kubernetes.io/metadata.name": name },
        },
        "status": { "phase": "Active" },
    })
}

/// The single synthetic node all pods report as scheduled on
pub fn make_node(rv: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Node",
        "metadata": {
            "name": NODE_NAME,
            "uid": synthetic_uid(&format!("node/{}", NODE_NAME)),
            "resourceVersion": rv,
            "labels": { "kubernetes.io/hostname": NODE_NAME },
        },
        "status": {
            "conditions": [ { "type": "Ready", "status": "True" } ],
            "nodeInfo": { "kubeletVersion": crate::GIT_VERSION },
        },
    })
}

/// Pod projection: Running, one container, deterministic addresses
pub fn make_pod(
    project: &str,
    namespace: &str,
    service: &str,
    svc: &ComposeService,
    started_at: &str,
    rv: &str,
) -> Value {
    let name = pod_name(service);
    let container_ports: Vec<Value> = svc
        .ports
        .iter()
        .map(|p| json!({ "containerPort": p.target, "protocol": p.protocol }))
        .collect();

    let mut container = json!({
        "name": service,
        "image": image(svc),
        "ports": container_ports,
    });
    if !svc.command.is_empty() {
        container["command"] = json!(svc.command);
    }

    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "uid": pod_uid(project, service),
            "resourceVersion": rv,
            "creationTimestamp": started_at,
            "labels": labels(service, svc),
        },
        "spec": {
            "containers": [container],
            "nodeName": NODE_NAME,
        },
        "status": {
            "phase": "Running",
            "podIP": pod_ip(project, service),
            "hostIP": host_ip(project, service),
            "startTime": started_at,
            "conditions": [ { "type": "Ready", "status": "True" } ],
        },
    })
}

fn service_port(p: &PortSpec) -> Value {
    let mut port = json!({
        "port": p.target,
        "targetPort": p.target,
        "protocol": p.protocol,
    });
    if let Some(published) = p.published {
        port["nodePort"] = json!(published);
    }
    port
}

/// Service projection: ClusterIP with ports mirroring the compose mapping
pub fn make_service(
    project: &str,
    namespace: &str,
    service: &str,
    svc: &ComposeService,
    rv: &str,
) -> Value {
    let ports: Vec<Value> = svc.ports.iter().map(service_port).collect();
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": service,
            "namespace": namespace,
            "uid": synthetic_uid(&format!("{}/service/{}", project, service)),
            "resourceVersion": rv,
            "labels": labels(service, svc),
        },
        "spec": {
            "type": "ClusterIP",
            "clusterIP": cluster_ip(project, service),
            "selector": { "app": service },
            "ports": ports,
        },
    })
}

/// Endpoints projection: one ready subset addressing the pod
pub fn make_endpoints(
    project: &str,
    namespace: &str,
    service: &str,
    svc: &ComposeService,
    rv: &str,
) -> Value {
    let ports: Vec<Value> = svc
        .ports
        .iter()
        .map(|p| json!({ "port": p.target, "protocol": p.protocol }))
        .collect();

    json!({
        "apiVersion": "v1",
        "kind": "Endpoints",
        "metadata": {
            "name": service,
            "namespace": namespace,
            "uid": synthetic_uid(&format!("{}/endpoints/{}", project, service)),
            "resourceVersion": rv,
            "labels": labels(service, svc),
        },
        "subsets": [ {
            "addresses": [ {
                "ip": pod_ip(project, service),
                "nodeName": NODE_NAME,
                "targetRef": {
                    "kind": "Pod",
                    "name": pod_name(service),
                    "namespace": namespace,
                    "uid": pod_uid(project, service),
                },
            } ],
            "ports": ports,
        } ],
    })
}

/// Deployment projection: one replica, everything available
pub fn make_deployment(
    project: &str,
    namespace: &str,
    service: &str,
    svc: &ComposeService,
    rv: &str,
) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": service,
            "namespace": namespace,
            "uid": synthetic_uid(&format!("{}/deployment/{}", project, service)),
            "resourceVersion": rv,
            "labels": labels(service, svc),
            "annotations": {},
        },
        "spec": {
            "replicas": 1,
            "selector": { "matchLabels": { "app": service } },
            "strategy": { "type": "RollingUpdate" },
            "template": {
                "metadata": {
                    "labels": { "app": service },
                    "annotations": {},
                },
                "spec": {
                    "containers": [ { "name": service, "image": image(svc) } ],
                },
            },
        },
        "status": {
            "replicas": 1,
            "readyReplicas": 1,
            "availableReplicas": 1,
            "updatedReplicas": 1,
        },
    })
}
