//! URL grammar, verb dispatch and response shaping
//!
//! One router recognises the supported slice of the Kubernetes API surface:
//! the discovery endpoints, the core/v1 resources, apps/v1 deployments and
//! coordination.k8s.io/v1 leases. Short-name aliases resolve before
//! dispatch. Unknown paths become a 404 `Status`, unsupported verbs on known
//! resources a 501, and `?watch=true` a 501 on every resource route.
//!
//! Namespace scoping: workload resources exist only in the project
//! namespace. Lists scoped to any other namespace are empty (not an error);
//! gets are 404.

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::{wrappers::ReceiverStream, StreamExt as _};
use tracing::info;

use crate::compose::Snapshot;
use crate::discovery;
use crate::error::ApiError;
use crate::files;
use crate::lease::LeaseBody;
use crate::project;
use crate::runtime::BridgeError;
use crate::selector::Selector;
use crate::server::AppState;
use crate::NODE_NAME;

/// Core resources that live in the project namespace
const CORE_NAMESPACED: [&str; 5] = ["pods", "services", "endpoints", "configmaps", "secrets"];

/// Annotation the rollout-restart idiom writes into the pod template
const RESTARTED_AT: &str = "kubectl.kubernetes.io/restartedAt";

/// Build the full facade router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/version", any(version_handler))
        .route("/api", any(api_handler))
        .route("/api/v1", any(core_v1_handler))
        .route("/apis", any(apis_handler))
        .route("/apis/apps/v1", any(apps_v1_handler))
        .route("/apis/coordination.k8s.io/v1", any(coordination_v1_handler))
        .route("/api/v1/{resource}", any(core_collection))
        .route("/api/v1/{resource}/{name}", any(core_named))
        .route("/api/v1/namespaces/{ns}/{resource}", any(core_ns_collection))
        .route(
            "/api/v1/namespaces/{ns}/{resource}/{name}",
            any(core_ns_named),
        )
        .route(
            "/api/v1/namespaces/{ns}/{resource}/{name}/{subresource}",
            any(core_ns_subresource),
        )
        .route("/apis/apps/v1/{resource}", any(apps_collection))
        .route(
            "/apis/apps/v1/namespaces/{ns}/{resource}",
            any(apps_ns_collection),
        )
        .route(
            "/apis/apps/v1/namespaces/{ns}/{resource}/{name}",
            any(apps_ns_named),
        )
        .route(
            "/apis/coordination.k8s.io/v1/{resource}",
            any(lease_cluster_collection),
        )
        .route(
            "/apis/coordination.k8s.io/v1/namespaces/{ns}/{resource}",
            any(lease_collection),
        )
        .route(
            "/apis/coordination.k8s.io/v1/namespaces/{ns}/{resource}/{name}",
            any(lease_named),
        )
        .fallback(unknown_path)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request plumbing
// ---------------------------------------------------------------------------

/// Query parameters shared across list and log verbs
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
struct Params {
    #[serde(rename = "labelSelector")]
    label_selector: Option<String>,
    watch: Option<String>,
    #[serde(rename = "tailLines")]
    tail_lines: Option<String>,
    timestamps: Option<String>,
    follow: Option<String>,
}

impl Params {
    fn reject_watch(&self) -> Result<(), ApiError> {
        if truthy(&self.watch) {
            Err(ApiError::NotImplemented(
                "watch is not supported".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn selector(&self) -> Result<Selector, ApiError> {
        match &self.label_selector {
            Some(raw) => Selector::parse(raw),
            None => Ok(Selector::default()),
        }
    }
}

fn truthy(value: &Option<String>) -> bool {
    value
        .as_deref()
        .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Resolve kubectl-style short names to the canonical resource
fn canonical(resource: &str) -> &str {
    match resource {
        "po" => "pods",
        "svc" => "services",
        "ep" => "endpoints",
        "cm" => "configmaps",
        "no" => "nodes",
        "ns" => "namespaces",
        "deploy" => "deployments",
        other => other,
    }
}

fn require_get(method: &Method, what: &str) -> Result<(), ApiError> {
    if method == Method::GET {
        Ok(())
    } else {
        Err(ApiError::MethodNotAllowed(format!(
            "{} is not supported on {}",
            method, what
        )))
    }
}

fn unknown_resource(resource: &str) -> ApiError {
    ApiError::NotFound(format!(
        "the server could not find the requested resource \"{}\"",
        resource
    ))
}

fn bridge_error(err: BridgeError) -> ApiError {
    ApiError::NotImplemented(err.to_string())
}

/// Enumerable namespaces: the project namespace plus the system ones
fn namespace_names(project: &str) -> Vec<String> {
    let mut names = vec![project.to_string()];
    for system in ["default", "kube-system", "kube-public"] {
        if system != project {
            names.push(system.to_string());
        }
    }
    names
}

fn filter_items(items: Vec<Value>, selector: &Selector) -> Vec<Value> {
    if selector.is_empty() {
        return items;
    }
    items
        .into_iter()
        .filter(|item| {
            let labels = item.pointer("/metadata/labels").unwrap_or(&Value::Null);
            selector.matches(labels)
        })
        .collect()
}

fn list_response(kind: &str, api_version: &str, rv: &str, items: Vec<Value>) -> Response {
    Json(json!({
        "kind": kind,
        "apiVersion": api_version,
        "metadata": { "resourceVersion": rv },
        "items": items,
    }))
    .into_response()
}

async fn unknown_path(uri: Uri) -> ApiError {
    ApiError::NotFound(format!(
        "the server could not find the requested resource ({})",
        uri.path()
    ))
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

async fn version_handler(method: Method) -> Result<Response, ApiError> {
    require_get(&method, "/version")?;
    Ok(Json(discovery::version_info()).into_response())
}

async fn api_handler(method: Method) -> Result<Response, ApiError> {
    require_get(&method, "/api")?;
    Ok(Json(discovery::api_versions()).into_response())
}

async fn core_v1_handler(method: Method) -> Result<Response, ApiError> {
    require_get(&method, "/api/v1")?;
    Ok(Json(discovery::core_v1_resources()).into_response())
}

async fn apis_handler(method: Method) -> Result<Response, ApiError> {
    require_get(&method, "/apis")?;
    Ok(Json(discovery::api_groups()).into_response())
}

async fn apps_v1_handler(method: Method) -> Result<Response, ApiError> {
    require_get(&method, "/apis/apps/v1")?;
    Ok(Json(discovery::apps_v1_resources()).into_response())
}

async fn coordination_v1_handler(method: Method) -> Result<Response, ApiError> {
    require_get(&method, "/apis/coordination.k8s.io/v1")?;
    Ok(Json(discovery::coordination_v1_resources()).into_response())
}

// ---------------------------------------------------------------------------
// Core v1
// ---------------------------------------------------------------------------

async fn core_collection(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Query(params): Query<Params>,
    method: Method,
) -> Result<Response, ApiError> {
    params.reject_watch()?;
    let resource = canonical(&resource).to_string();
    let snap = state.snapshot.load().await?;
    let rv = state.leases.current_version().to_string();

    match resource.as_str() {
        "namespaces" => {
            require_get(&method, "namespaces")?;
            let items = namespace_names(&snap.project_name)
                .iter()
                .map(|name| project::make_namespace(name, &rv))
                .collect();
            Ok(list_response(
                "NamespaceList",
                "v1",
                &rv,
                filter_items(items, &params.selector()?),
            ))
        }
        "nodes" => {
            require_get(&method, "nodes")?;
            let items = vec![project::make_node(&rv)];
            Ok(list_response(
                "NodeList",
                "v1",
                &rv,
                filter_items(items, &params.selector()?),
            ))
        }
        r if CORE_NAMESPACED.contains(&r) => {
            require_get(&method, r)?;
            let project = snap.project_name.clone();
            core_namespaced_list(&state, &snap, &project, r, &params).await
        }
        other => Err(unknown_resource(other)),
    }
}

async fn core_named(
    State(state): State<AppState>,
    Path((resource, name)): Path<(String, String)>,
    Query(params): Query<Params>,
    method: Method,
) -> Result<Response, ApiError> {
    params.reject_watch()?;
    let resource = canonical(&resource).to_string();
    let snap = state.snapshot.load().await?;
    let rv = state.leases.current_version().to_string();

    match resource.as_str() {
        "namespaces" => {
            require_get(&method, "namespaces")?;
            if namespace_names(&snap.project_name).contains(&name) {
                Ok(Json(project::make_namespace(&name, &rv)).into_response())
            } else {
                Err(ApiError::not_found("namespaces", &name))
            }
        }
        "nodes" => {
            require_get(&method, "nodes")?;
            if name == NODE_NAME {
                Ok(Json(project::make_node(&rv)).into_response())
            } else {
                Err(ApiError::not_found("nodes", &name))
            }
        }
        r if CORE_NAMESPACED.contains(&r) => {
            // Namespaced resources have no cluster-scoped get
            Err(ApiError::not_found(r, &name))
        }
        other => Err(unknown_resource(other)),
    }
}

async fn core_ns_collection(
    State(state): State<AppState>,
    Path((ns, resource)): Path<(String, String)>,
    Query(params): Query<Params>,
    method: Method,
) -> Result<Response, ApiError> {
    params.reject_watch()?;
    let resource = canonical(&resource).to_string();
    if !CORE_NAMESPACED.contains(&resource.as_str()) {
        return Err(unknown_resource(&resource));
    }
    require_get(&method, &resource)?;
    let snap = state.snapshot.load().await?;
    core_namespaced_list(&state, &snap, &ns, &resource, &params).await
}

async fn core_namespaced_list(
    state: &AppState,
    snap: &Snapshot,
    ns: &str,
    resource: &str,
    params: &Params,
) -> Result<Response, ApiError> {
    let selector = params.selector()?;
    let rv = state.leases.current_version().to_string();
    let kind = match resource {
        "pods" => "PodList",
        "services" => "ServiceList",
        "endpoints" => "EndpointsList",
        "configmaps" => "ConfigMapList",
        _ => "SecretList",
    };

    // Foreign namespaces hold nothing, but listing them is not an error
    let items: Vec<Value> = if ns != snap.project_name {
        Vec::new()
    } else {
        let project = snap.project_name.as_str();
        match resource {
            "pods" => snap
                .workload_services()
                .map(|(name, svc)| {
                    project::make_pod(project, ns, name, svc, &state.started_at, &rv)
                })
                .collect(),
            "services" => snap
                .workload_services()
                .map(|(name, svc)| project::make_service(project, ns, name, svc, &rv))
                .collect(),
            "endpoints" => snap
                .workload_services()
                .map(|(name, svc)| project::make_endpoints(project, ns, name, svc, &rv))
                .collect(),
            "configmaps" => files::load_dir(&state.data_dir.join("configmaps"))?
                .iter()
                .map(|res| files::make_configmap(res, ns, &rv))
                .collect(),
            _ => files::load_dir(&state.data_dir.join("secrets"))?
                .iter()
                .map(|res| files::make_secret(res, ns, &rv))
                .collect(),
        }
    };

    Ok(list_response(
        kind,
        "v1",
        &rv,
        filter_items(items, &selector),
    ))
}

async fn core_ns_named(
    State(state): State<AppState>,
    Path((ns, resource, name)): Path<(String, String, String)>,
    Query(params): Query<Params>,
    method: Method,
) -> Result<Response, ApiError> {
    params.reject_watch()?;
    let resource = canonical(&resource).to_string();
    if !CORE_NAMESPACED.contains(&resource.as_str()) {
        return Err(unknown_resource(&resource));
    }
    require_get(&method, &resource)?;

    let snap = state.snapshot.load().await?;
    if ns != snap.project_name {
        return Err(ApiError::not_found(&resource, &name));
    }
    let project = snap.project_name.as_str();
    let rv = state.leases.current_version().to_string();

    let item = match resource.as_str() {
        "pods" => name
            .strip_suffix("-0")
            .and_then(|service| snap.workload(service).map(|svc| (service, svc)))
            .map(|(service, svc)| {
                project::make_pod(project, &ns, service, svc, &state.started_at, &rv)
            }),
        "services" => snap
            .workload(&name)
            .map(|svc| project::make_service(project, &ns, &name, svc, &rv)),
        "endpoints" => snap
            .workload(&name)
            .map(|svc| project::make_endpoints(project, &ns, &name, svc, &rv)),
        "configmaps" => files::load_dir(&state.data_dir.join("configmaps"))?
            .iter()
            .find(|res| res.name == name)
            .map(|res| files::make_configmap(res, &ns, &rv)),
        _ => files::load_dir(&state.data_dir.join("secrets"))?
            .iter()
            .find(|res| res.name == name)
            .map(|res| files::make_secret(res, &ns, &rv)),
    };

    item.map(|value| Json(value).into_response())
        .ok_or_else(|| ApiError::not_found(&resource, &name))
}

async fn core_ns_subresource(
    State(state): State<AppState>,
    Path((ns, resource, name, subresource)): Path<(String, String, String, String)>,
    Query(params): Query<Params>,
    method: Method,
) -> Result<Response, ApiError> {
    params.reject_watch()?;
    let resource = canonical(&resource).to_string();
    if resource != "pods" || subresource != "log" {
        return Err(unknown_resource(&format!("{}/{}", resource, subresource)));
    }
    require_get(&method, "pods/log")?;

    let snap = state.snapshot.load().await?;
    if ns != snap.project_name {
        return Err(ApiError::not_found("pods", &name));
    }
    let service = name
        .strip_suffix("-0")
        .filter(|service| snap.workload(service).is_some())
        .ok_or_else(|| ApiError::not_found("pods", &name))?;

    pod_log(&state, &snap, service, &name, &params).await
}

async fn pod_log(
    state: &AppState,
    snap: &Snapshot,
    service: &str,
    pod: &str,
    params: &Params,
) -> Result<Response, ApiError> {
    let runtime = &state.runtime;
    if !runtime.available() {
        return Err(ApiError::NotImplemented(
            "runtime socket not mounted".to_string(),
        ));
    }

    let tail = params.tail_lines.clone().unwrap_or_else(|| "100".to_string());
    let timestamps = truthy(&params.timestamps);

    let container = runtime
        .find_container(&snap.project_name, service)
        .await
        .map_err(bridge_error)?
        .ok_or_else(|| {
            ApiError::NotFound(format!("container for pod \"{}\" not found", pod))
        })?;

    if truthy(&params.follow) {
        let rx = runtime
            .follow_logs(&container, &tail, timestamps)
            .await
            .map_err(bridge_error)?;
        let stream = ReceiverStream::new(rx).map(|chunk| chunk.map(Bytes::from));
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from_stream(stream))
            .map_err(|e| ApiError::Internal(e.to_string()))
    } else {
        let bytes = runtime
            .logs(&container, &tail, timestamps)
            .await
            .map_err(bridge_error)?;
        Ok(([(header::CONTENT_TYPE, "text/plain")], bytes).into_response())
    }
}

// ---------------------------------------------------------------------------
// apps/v1
// ---------------------------------------------------------------------------

async fn apps_collection(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Query(params): Query<Params>,
    method: Method,
) -> Result<Response, ApiError> {
    params.reject_watch()?;
    if canonical(&resource) != "deployments" {
        return Err(unknown_resource(&resource));
    }
    require_get(&method, "deployments")?;
    let snap = state.snapshot.load().await?;
    let project = snap.project_name.clone();
    deployment_list(&state, &snap, &project, &params).await
}

async fn apps_ns_collection(
    State(state): State<AppState>,
    Path((ns, resource)): Path<(String, String)>,
    Query(params): Query<Params>,
    method: Method,
) -> Result<Response, ApiError> {
    params.reject_watch()?;
    if canonical(&resource) != "deployments" {
        return Err(unknown_resource(&resource));
    }
    require_get(&method, "deployments")?;
    let snap = state.snapshot.load().await?;
    deployment_list(&state, &snap, &ns, &params).await
}

async fn deployment_list(
    state: &AppState,
    snap: &Snapshot,
    ns: &str,
    params: &Params,
) -> Result<Response, ApiError> {
    let selector = params.selector()?;
    let rv = state.leases.current_version().to_string();
    let items: Vec<Value> = if ns != snap.project_name {
        Vec::new()
    } else {
        snap.workload_services()
            .map(|(name, svc)| {
                project::make_deployment(&snap.project_name, ns, name, svc, &rv)
            })
            .collect()
    };
    Ok(list_response(
        "DeploymentList",
        "apps/v1",
        &rv,
        filter_items(items, &selector),
    ))
}

async fn apps_ns_named(
    State(state): State<AppState>,
    Path((ns, resource, name)): Path<(String, String, String)>,
    Query(params): Query<Params>,
    method: Method,
    body: Bytes,
) -> Result<Response, ApiError> {
    params.reject_watch()?;
    if canonical(&resource) != "deployments" {
        return Err(unknown_resource(&resource));
    }

    let snap = state.snapshot.load().await?;
    if ns != snap.project_name {
        return Err(ApiError::not_found("deployments.apps", &name));
    }
    let rv = state.leases.current_version().to_string();

    if method == Method::GET {
        let svc = snap
            .workload(&name)
            .ok_or_else(|| ApiError::not_found("deployments.apps", &name))?;
        Ok(Json(project::make_deployment(&snap.project_name, &ns, &name, svc, &rv)).into_response())
    } else if method == Method::PATCH {
        patch_deployment(&state, &snap, &ns, &name, &body).await
    } else {
        Err(ApiError::MethodNotAllowed(format!(
            "{} is not supported on deployments",
            method
        )))
    }
}

/// Handle a Deployment PATCH.
///
/// A body that rewrites the pod template annotations is the rollout-restart
/// idiom and triggers a container restart through the bridge. Any other
/// patch body is acknowledged and echoed with no side effect.
async fn patch_deployment(
    state: &AppState,
    snap: &Snapshot,
    ns: &str,
    name: &str,
    body: &Bytes,
) -> Result<Response, ApiError> {
    let svc = snap
        .workload(name)
        .ok_or_else(|| ApiError::not_found("deployments.apps", name))?;
    let patch: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("unable to parse patch body: {}", e)))?;

    let rv = state.leases.current_version().to_string();
    let mut deployment = project::make_deployment(&snap.project_name, ns, name, svc, &rv);

    let annotations = patch
        .pointer("/spec/template/metadata/annotations")
        .and_then(Value::as_object)
        .filter(|map| !map.is_empty())
        .cloned();

    if let Some(annotations) = annotations {
        if !state.runtime.available() {
            return Err(ApiError::NotImplemented(
                "runtime socket not mounted; cannot restart".to_string(),
            ));
        }
        let container = state
            .runtime
            .find_container(&snap.project_name, name)
            .await
            .map_err(bridge_error)?
            .ok_or_else(|| {
                ApiError::NotFound(format!(
                    "container for deployment \"{}\" not found",
                    name
                ))
            })?;
        state.runtime.restart(&container).await.map_err(bridge_error)?;
        info!(deployment = name, container = %container, "restarted container for rollout");

        let restarted_at = annotations
            .get(RESTARTED_AT)
            .cloned()
            .unwrap_or_else(|| Value::String(now()));
        deployment["spec"]["template"]["metadata"]["annotations"] =
            Value::Object(annotations);
        deployment["metadata"]["annotations"][RESTARTED_AT] = restarted_at;
    }

    Ok(Json(deployment).into_response())
}

// ---------------------------------------------------------------------------
// coordination.k8s.io/v1
// ---------------------------------------------------------------------------

async fn lease_cluster_collection(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Query(params): Query<Params>,
    method: Method,
) -> Result<Response, ApiError> {
    params.reject_watch()?;
    if resource != "leases" {
        return Err(unknown_resource(&resource));
    }
    require_get(&method, "leases")?;

    let selector = params.selector()?;
    let rv = state.leases.current_version().to_string();
    let items = lease_items(state.leases.list_all());
    Ok(list_response(
        "LeaseList",
        "coordination.k8s.io/v1",
        &rv,
        filter_items(items, &selector),
    ))
}

async fn lease_collection(
    State(state): State<AppState>,
    Path((ns, resource)): Path<(String, String)>,
    Query(params): Query<Params>,
    method: Method,
    body: Bytes,
) -> Result<Response, ApiError> {
    params.reject_watch()?;
    if resource != "leases" {
        return Err(unknown_resource(&resource));
    }

    if method == Method::GET {
        let selector = params.selector()?;
        let rv = state.leases.current_version().to_string();
        let items = lease_items(state.leases.list(&ns));
        Ok(list_response(
            "LeaseList",
            "coordination.k8s.io/v1",
            &rv,
            filter_items(items, &selector),
        ))
    } else if method == Method::POST {
        let body = parse_lease_body(&body)?;
        let lease = state.leases.create(&ns, body, &now())?;
        Ok((StatusCode::CREATED, Json(lease)).into_response())
    } else {
        Err(ApiError::MethodNotAllowed(format!(
            "{} is not supported on leases",
            method
        )))
    }
}

async fn lease_named(
    State(state): State<AppState>,
    Path((ns, resource, name)): Path<(String, String, String)>,
    Query(params): Query<Params>,
    method: Method,
    body: Bytes,
) -> Result<Response, ApiError> {
    params.reject_watch()?;
    if resource != "leases" {
        return Err(unknown_resource(&resource));
    }

    if method == Method::GET {
        Ok(Json(state.leases.get(&ns, &name)?).into_response())
    } else if method == Method::PUT {
        let body = parse_lease_body(&body)?;
        let lease = state.leases.update(&ns, &name, body, &now())?;
        Ok(Json(lease).into_response())
    } else if method == Method::DELETE {
        Ok(Json(state.leases.delete(&ns, &name)?).into_response())
    } else {
        Err(ApiError::MethodNotAllowed(format!(
            "{} is not supported on leases",
            method
        )))
    }
}

fn parse_lease_body(body: &Bytes) -> Result<LeaseBody, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("unable to parse lease body: {}", e)))
}

fn lease_items(leases: Vec<crate::lease::Lease>) -> Vec<Value> {
    leases
        .into_iter()
        .map(|lease| serde_json::to_value(lease).unwrap_or(Value::Null))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    use axum::http::Request;
    use tower::ServiceExt;

    use crate::compose::SnapshotCache;
    use crate::lease::LeaseStore;
    use crate::runtime::RuntimeClient;

    const DEMO_COMPOSE: &str = r#"
name: demo
services:
  app:
    image: nginx
    ports:
      - "8080:80"
"#;

    fn test_router_with(compose: &str) -> (Router, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let compose_path = dir.path().join("compose.yml");
        std::fs::write(&compose_path, compose).unwrap();

        let state = AppState {
            snapshot: Arc::new(SnapshotCache::with_ttl(compose_path, Duration::ZERO)),
            data_dir: dir.path().to_path_buf(),
            leases: Arc::new(LeaseStore::new()),
            runtime: Arc::new(RuntimeClient::new(dir.path().join("absent.sock"))),
            started_at: "2024-01-01T00:00:00Z".to_string(),
        };
        (build_router(state), dir)
    }

    fn test_router() -> (Router, tempfile::TempDir) {
        test_router_with(DEMO_COMPOSE)
    }

    async fn send(
        router: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(value) => builder
                .header("content-type", "application/json")
                .body(Body::from(value.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    // ------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn discovery_endpoints_always_answer() {
        let (router, _dir) = test_router();
        for uri in [
            "/version",
            "/api",
            "/api/v1",
            "/apis",
            "/apis/apps/v1",
            "/apis/coordination.k8s.io/v1",
        ] {
            let (status, _) = send(&router, "GET", uri, None).await;
            assert_eq!(status, StatusCode::OK, "discovery {} must be 200", uri);
        }
    }

    #[tokio::test]
    async fn version_reports_facade_build() {
        let (router, _dir) = test_router();
        let (status, body) = send(&router, "GET", "/version", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["gitVersion"], "v1.28.0-h2c");
        assert_eq!(body["major"], "1");
        assert_eq!(body["minor"], "28");
    }

    #[tokio::test]
    async fn api_lists_v1_only() {
        let (router, _dir) = test_router();
        let (_, body) = send(&router, "GET", "/api", None).await;
        assert_eq!(body["kind"], "APIVersions");
        assert_eq!(body["versions"], json!(["v1"]));
    }

    #[tokio::test]
    async fn coordination_discovery_contains_lease_entry() {
        let (router, _dir) = test_router();
        let (_, body) = send(&router, "GET", "/apis/coordination.k8s.io/v1", None).await;
        let lease = &body["resources"][0];
        assert_eq!(lease["name"], "leases");
        assert_eq!(lease["namespaced"], true);
        assert_eq!(lease["kind"], "Lease");
        assert_eq!(
            lease["verbs"],
            json!(["create", "delete", "get", "list", "update"])
        );
    }

    // ------------------------------------------------------------------
    // Pods and namespace scoping
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn pod_list_projects_one_pod_per_service() {
        let (router, _dir) = test_router();
        let (status, body) = send(&router, "GET", "/api/v1/namespaces/demo/pods", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "PodList");
        let items = body["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["metadata"]["name"], "app-0");
        assert_eq!(items[0]["metadata"]["namespace"], "demo");
        assert_eq!(items[0]["metadata"]["labels"]["app"], "app");
        assert_eq!(items[0]["status"]["phase"], "Running");
    }

    #[tokio::test]
    async fn foreign_namespace_lists_are_empty_not_errors() {
        let (router, _dir) = test_router();
        let (status, body) = send(&router, "GET", "/api/v1/namespaces/other/pods", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "PodList");
        assert_eq!(body["items"], json!([]));
    }

    #[tokio::test]
    async fn foreign_namespace_gets_are_404() {
        let (router, _dir) = test_router();
        let (status, body) =
            send(&router, "GET", "/api/v1/namespaces/other/pods/app-0", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "Status");
        assert_eq!(body["reason"], "NotFound");
    }

    #[tokio::test]
    async fn pod_get_by_name() {
        let (router, _dir) = test_router();
        let (status, body) =
            send(&router, "GET", "/api/v1/namespaces/demo/pods/app-0", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["metadata"]["name"], "app-0");
        assert_eq!(body["spec"]["containers"][0]["image"], "nginx");

        let (status, _) = send(&router, "GET", "/api/v1/namespaces/demo/pods/app", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) =
            send(&router, "GET", "/api/v1/namespaces/demo/pods/ghost-0", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cluster_scope_pod_list_serves_project_pods() {
        let (router, _dir) = test_router();
        let (status, body) = send(&router, "GET", "/api/v1/pods", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn short_name_aliases_resolve() {
        let (router, _dir) = test_router();
        let (status, body) = send(&router, "GET", "/api/v1/namespaces/demo/po", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "PodList");

        let (status, body) = send(&router, "GET", "/api/v1/ns", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "NamespaceList");
    }

    #[tokio::test]
    async fn namespaces_include_system_and_project() {
        let (router, _dir) = test_router();
        let (_, body) = send(&router, "GET", "/api/v1/namespaces", None).await;
        let names: Vec<&str> = body["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["metadata"]["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["demo", "default", "kube-system", "kube-public"]);

        let (status, _) = send(&router, "GET", "/api/v1/namespaces/demo", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&router, "GET", "/api/v1/namespaces/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn single_synthetic_node() {
        let (router, _dir) = test_router();
        let (status, body) = send(&router, "GET", "/api/v1/nodes", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"][0]["metadata"]["name"], "h2c-node");

        let (status, _) = send(&router, "GET", "/api/v1/nodes/h2c-node", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn services_and_endpoints_mirror_ports() {
        let (router, _dir) = test_router();
        let (_, body) = send(&router, "GET", "/api/v1/namespaces/demo/services", None).await;
        let service = &body["items"][0];
        assert_eq!(service["spec"]["type"], "ClusterIP");
        assert_eq!(service["spec"]["ports"][0]["port"], 80);
        assert_eq!(service["spec"]["ports"][0]["nodePort"], 8080);
        assert!(service["spec"]["clusterIP"]
            .as_str()
            .unwrap()
            .starts_with("10.96."));

        let (_, body) = send(&router, "GET", "/api/v1/namespaces/demo/endpoints", None).await;
        let subset = &body["items"][0]["subsets"][0];
        assert_eq!(subset["ports"][0]["port"], 80);
        assert_eq!(subset["addresses"][0]["targetRef"]["name"], "app-0");
    }

    #[tokio::test]
    async fn facade_service_never_appears() {
        let compose = format!(
            r#"
name: demo
services:
  app:
    image: nginx
  h2c-api:
    image: h2c/h2c-api
    labels:
      {}: "true"
"#,
            crate::FACADE_LABEL
        );
        let (router, _dir) = test_router_with(&compose);

        for uri in [
            "/api/v1/namespaces/demo/pods",
            "/api/v1/namespaces/demo/services",
            "/apis/apps/v1/namespaces/demo/deployments",
        ] {
            let (_, body) = send(&router, "GET", uri, None).await;
            let names: Vec<&str> = body["items"]
                .as_array()
                .unwrap()
                .iter()
                .map(|item| item["metadata"]["name"].as_str().unwrap())
                .collect();
            assert!(
                !names.iter().any(|n| n.contains("h2c-api")),
                "facade leaked into {}: {:?}",
                uri,
                names
            );
        }

        let (status, _) =
            send(&router, "GET", "/api/v1/namespaces/demo/pods/h2c-api-0", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // ------------------------------------------------------------------
    // Label selectors
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn label_selector_filters_lists() {
        let compose = r#"
name: demo
services:
  web:
    image: nginx
    labels:
      tier: frontend
  db:
    image: postgres
    labels:
      tier: backend
"#;
        let (router, _dir) = test_router_with(compose);

        let (status, body) = send(
            &router,
            "GET",
            "/api/v1/namespaces/demo/pods?labelSelector=tier%3Dfrontend",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let items = body["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["metadata"]["name"], "web-0");

        let (_, body) = send(
            &router,
            "GET",
            "/api/v1/namespaces/demo/pods?labelSelector=tier!%3Dfrontend",
            None,
        )
        .await;
        assert_eq!(body["items"].as_array().unwrap().len(), 1);
        assert_eq!(body["items"][0]["metadata"]["name"], "db-0");
    }

    #[tokio::test]
    async fn malformed_selector_is_400() {
        let (router, _dir) = test_router();
        let (status, body) = send(
            &router,
            "GET",
            "/api/v1/namespaces/demo/pods?labelSelector=tier%20in%20(a)",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["reason"], "BadRequest");
    }

    // ------------------------------------------------------------------
    // ConfigMaps and Secrets
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn configmaps_and_secrets_from_disk() {
        let (router, dir) = test_router();
        let cm_dir = dir.path().join("configmaps");
        std::fs::create_dir(&cm_dir).unwrap();
        std::fs::write(cm_dir.join("app.properties"), "k=v\n").unwrap();
        let secret_dir = dir.path().join("secrets").join("creds");
        std::fs::create_dir_all(&secret_dir).unwrap();
        std::fs::write(secret_dir.join("password"), "hunter2").unwrap();

        let (status, body) =
            send(&router, "GET", "/api/v1/namespaces/demo/configmaps", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"][0]["metadata"]["name"], "app");
        assert_eq!(body["items"][0]["data"]["app.properties"], "k=v\n");

        let (status, body) =
            send(&router, "GET", "/api/v1/namespaces/demo/secrets/creds", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["type"], "Opaque");
        // "hunter2" base64-encoded
        assert_eq!(body["data"]["password"], "aHVudGVyMg==");
    }

    // ------------------------------------------------------------------
    // Lease lifecycle over HTTP
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn lease_lifecycle_roundtrip() {
        let (router, _dir) = test_router();
        let base = "/apis/coordination.k8s.io/v1/namespaces/demo/leases";

        // CREATE -> 201
        let (status, created) = send(
            &router,
            "POST",
            base,
            Some(json!({
                "metadata": { "name": "L" },
                "spec": { "holderIdentity": "A", "leaseDurationSeconds": 15 },
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let v1 = created["metadata"]["resourceVersion"]
            .as_str()
            .unwrap()
            .to_string();

        // UPDATE with the current version -> 200, version bumped, transition counted
        let (status, updated) = send(
            &router,
            "PUT",
            &format!("{}/L", base),
            Some(json!({
                "metadata": { "name": "L", "resourceVersion": v1 },
                "spec": { "holderIdentity": "B", "leaseDurationSeconds": 15 },
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let v2 = updated["metadata"]["resourceVersion"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(v2.parse::<u64>().unwrap() > v1.parse::<u64>().unwrap());
        assert_eq!(updated["spec"]["leaseTransitions"], 1);

        // UPDATE with the stale version -> 409
        let (status, conflict) = send(
            &router,
            "PUT",
            &format!("{}/L", base),
            Some(json!({
                "metadata": { "name": "L", "resourceVersion": v1 },
                "spec": { "holderIdentity": "C" },
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(conflict["reason"], "Conflict");

        // GET reflects the surviving holder
        let (status, current) = send(&router, "GET", &format!("{}/L", base), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(current["spec"]["holderIdentity"], "B");

        // DELETE -> 200, then GET -> 404
        let (status, _) = send(&router, "DELETE", &format!("{}/L", base), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, missing) = send(&router, "GET", &format!("{}/L", base), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(missing["reason"], "NotFound");
    }

    #[tokio::test]
    async fn lease_create_collision_is_409() {
        let (router, _dir) = test_router();
        let base = "/apis/coordination.k8s.io/v1/namespaces/demo/leases";
        let body = json!({ "metadata": { "name": "L" }, "spec": {} });

        let (status, _) = send(&router, "POST", base, Some(body.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, conflict) = send(&router, "POST", base, Some(body)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(conflict["reason"], "AlreadyExists");
    }

    #[tokio::test]
    async fn lease_create_without_name_is_400() {
        let (router, _dir) = test_router();
        let (status, body) = send(
            &router,
            "POST",
            "/apis/coordination.k8s.io/v1/namespaces/demo/leases",
            Some(json!({ "spec": {} })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["reason"], "BadRequest");
    }

    #[tokio::test]
    async fn lease_list_carries_global_resource_version() {
        let (router, _dir) = test_router();
        let base = "/apis/coordination.k8s.io/v1/namespaces/demo/leases";
        send(
            &router,
            "POST",
            base,
            Some(json!({ "metadata": { "name": "L" }, "spec": {} })),
        )
        .await;

        let (status, body) = send(&router, "GET", base, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "LeaseList");
        assert!(body["metadata"]["resourceVersion"].is_string());
        assert_eq!(body["items"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_lease_body_is_400() {
        let (router, _dir) = test_router();
        let request = Request::builder()
            .method("POST")
            .uri("/apis/coordination.k8s.io/v1/namespaces/demo/leases")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    // ------------------------------------------------------------------
    // Unsupported verbs, watch, unknown paths
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn unsupported_verb_is_501_method_not_allowed() {
        let (router, _dir) = test_router();
        let (status, body) =
            send(&router, "DELETE", "/api/v1/namespaces/demo/pods/app-0", None).await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(body["kind"], "Status");
        assert_eq!(body["reason"], "MethodNotAllowed");
    }

    #[tokio::test]
    async fn watch_is_501_everywhere() {
        let (router, _dir) = test_router();
        for uri in [
            "/api/v1/pods?watch=true",
            "/api/v1/namespaces/demo/pods?watch=true",
            "/apis/coordination.k8s.io/v1/namespaces/demo/leases?watch=true",
        ] {
            let (status, body) = send(&router, "GET", uri, None).await;
            assert_eq!(status, StatusCode::NOT_IMPLEMENTED, "watch on {}", uri);
            assert_eq!(body["kind"], "Status");
        }
    }

    #[tokio::test]
    async fn unknown_paths_are_404_status_objects() {
        let (router, _dir) = test_router();
        for uri in [
            "/api/v2",
            "/api/v1/widgets",
            "/apis/batch/v1/namespaces/demo/jobs",
            "/completely/unknown",
        ] {
            let (status, body) = send(&router, "GET", uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
            assert_eq!(body["kind"], "Status");
            assert_eq!(body["apiVersion"], "v1");
            assert_eq!(body["status"], "Failure");
            assert_eq!(body["reason"], "NotFound");
        }
    }

    #[tokio::test]
    async fn post_on_discovery_is_501() {
        let (router, _dir) = test_router();
        let (status, body) = send(&router, "POST", "/api", None).await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(body["reason"], "MethodNotAllowed");
    }

    // ------------------------------------------------------------------
    // Deployments and the runtime bridge
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn deployment_get_and_list() {
        let (router, _dir) = test_router();
        let (status, body) = send(
            &router,
            "GET",
            "/apis/apps/v1/namespaces/demo/deployments",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "DeploymentList");
        assert_eq!(body["items"][0]["spec"]["replicas"], 1);
        assert_eq!(body["items"][0]["status"]["readyReplicas"], 1);

        let (status, body) = send(
            &router,
            "GET",
            "/apis/apps/v1/namespaces/demo/deployments/app",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["metadata"]["name"], "app");
    }

    #[tokio::test]
    async fn plain_patch_is_echoed_without_side_effect() {
        let (router, _dir) = test_router();
        let (status, body) = send(
            &router,
            "PATCH",
            "/apis/apps/v1/namespaces/demo/deployments/app",
            Some(json!({ "metadata": { "labels": { "extra": "x" } } })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "Deployment");
        assert!(body["metadata"]["annotations"]
            .as_object()
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn rollout_restart_without_socket_degrades_to_501() {
        let (router, _dir) = test_router();
        let (status, body) = send(
            &router,
            "PATCH",
            "/apis/apps/v1/namespaces/demo/deployments/app",
            Some(json!({
                "spec": { "template": { "metadata": { "annotations": {
                    "kubectl.kubernetes.io/restartedAt": "2024-06-01T10:00:00Z",
                } } } },
            })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(body["kind"], "Status");
    }

    #[tokio::test]
    async fn pod_log_without_socket_degrades_to_501() {
        let (router, _dir) = test_router();
        let (status, body) = send(
            &router,
            "GET",
            "/api/v1/namespaces/demo/pods/app-0/log?tailLines=50",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(body["kind"], "Status");

        // But the pod itself must exist for log requests
        let (status, _) = send(
            &router,
            "GET",
            "/api/v1/namespaces/demo/pods/ghost-0/log",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // ------------------------------------------------------------------
    // Failure modes
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn broken_compose_surfaces_500_with_diagnostic() {
        let (router, dir) = test_router();
        std::fs::write(dir.path().join("compose.yml"), "services: {{{{").unwrap();

        let (status, body) = send(&router, "GET", "/api/v1/namespaces/demo/pods", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["kind"], "Status");
        assert_eq!(body["reason"], "InternalError");
        assert!(body["message"].as_str().unwrap().contains("compose"));

        // Discovery is static and keeps answering
        let (status, _) = send(&router, "GET", "/api/v1", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn list_resource_versions_are_stamped() {
        let (router, _dir) = test_router();
        let (_, body) = send(&router, "GET", "/api/v1/namespaces/demo/pods", None).await;
        let rv = body["metadata"]["resourceVersion"].as_str().unwrap();
        assert!(rv.parse::<u64>().unwrap() >= 1);
        assert_eq!(body["items"][0]["metadata"]["resourceVersion"], rv);
    }
}
