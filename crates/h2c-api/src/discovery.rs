//! Static discovery payloads
//!
//! The six discovery endpoints plus /version. Client libraries perform
//! discovery before any real call, so these must always answer 200 with the
//! exact shapes clients expect; every payload is a pure function of nothing
//! and identical across runs.

use serde_json::{json, Value};

use crate::GIT_VERSION;

/// `GET /version`
pub fn version_info() -> Value {
    json!({
        "major": "1",
        "minor": "28",
        "gitVersion": GIT_VERSION,
        "platform": "linux/amd64",
    })
}

/// `GET /api`
pub fn api_versions() -> Value {
    json!({
        "kind": "APIVersions",
        "versions": ["v1"],
        "serverAddressByClientCIDRs": [
            { "clientCIDR": "0.0.0.0/0", "serverAddress": "h2c-api:6443" },
        ],
    })
}

/// `GET /api/v1`
pub fn core_v1_resources() -> Value {
    json!({
        "kind": "APIResourceList",
        "groupVersion": "v1",
        "resources": [
            {
                "name": "namespaces",
                "singularName": "namespace",
                "namespaced": false,
                "kind": "Namespace",
                "verbs": ["get", "list"],
                "shortNames": ["ns"],
            },
            {
                "name": "nodes",
                "singularName": "node",
                "namespaced": false,
                "kind": "Node",
                "verbs": ["get", "list"],
                "shortNames": ["no"],
            },
            {
                "name": "pods",
                "singularName": "pod",
                "namespaced": true,
                "kind": "Pod",
                "verbs": ["get", "list"],
                "shortNames": ["po"],
            },
            {
                "name": "pods/log",
                "singularName": "",
                "namespaced": true,
                "kind": "Pod",
                "verbs": ["get"],
            },
            {
                "name": "services",
                "singularName": "service",
                "namespaced": true,
                "kind": "Service",
                "verbs": ["get", "list"],
                "shortNames": ["svc"],
            },
            {
                "name": "endpoints",
                "singularName": "endpoints",
                "namespaced": true,
                "kind": "Endpoints",
                "verbs": ["get", "list"],
                "shortNames": ["ep"],
            },
            {
                "name": "configmaps",
                "singularName": "configmap",
                "namespaced": true,
                "kind": "ConfigMap",
                "verbs": ["get", "list"],
                "shortNames": ["cm"],
            },
            {
                "name": "secrets",
                "singularName": "secret",
                "namespaced": true,
                "kind": "Secret",
                "verbs": ["get", "list"],
            },
        ],
    })
}

/// `GET /apis`
pub fn api_groups() -> Value {
    json!({
        "kind": "APIGroupList",
        "apiVersion": "v1",
        "groups": [
            {
                "name": "apps",
                "versions": [ { "groupVersion": "apps/v1", "version": "v1" } ],
                "preferredVersion": { "groupVersion": "apps/v1", "version": "v1" },
            },
            {
                "name": "coordination.k8s.io",
                "versions": [
                    { "groupVersion": "coordination.k8s.io/v1", "version": "v1" },
                ],
                "preferredVersion": {
                    "groupVersion": "coordination.k8s.io/v1",
                    "version": "v1",
                },
            },
        ],
    })
}

/// `GET /apis/apps/v1`
pub fn apps_v1_resources() -> Value {
    json!({
        "kind": "APIResourceList",
        "groupVersion": "apps/v1",
        "resources": [
            {
                "name": "deployments",
                "singularName": "deployment",
                "namespaced": true,
                "kind": "Deployment",
                "verbs": ["get", "list", "patch"],
                "shortNames": ["deploy"],
            },
        ],
    })
}

/// `GET /apis/coordination.k8s.io/v1`
pub fn coordination_v1_resources() -> Value {
    json!({
        "kind": "APIResourceList",
        "groupVersion": "coordination.k8s.io/v1",
        "resources": [
            {
                "name": "leases",
                "singularName": "lease",
                "namespaced": true,
                "kind": "Lease",
                "verbs": ["create", "delete", "get", "list", "update"],
            },
        ],
    })
}
