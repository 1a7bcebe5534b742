//! h2c-api - a facade Kubernetes API server backed by a compose file
//!
//! h2c-api answers enough of the Kubernetes HTTP API for off-the-shelf client
//! libraries (discovery, service-account bootstrap, leader election, pod and
//! service introspection, rolling restart) to work against a plain compose
//! stack. No real cluster is involved: pods, services, endpoints and
//! deployments are projected from the compose file, configmaps and secrets
//! from directories on disk, and leases live in process memory.
//!
//! # Modules
//!
//! - [`compose`] - compose file snapshot (services, ports, labels, project name)
//! - [`project`] - projection of compose services into Kubernetes resource shapes
//! - [`files`] - configmaps/ and secrets/ directory loader
//! - [`lease`] - in-memory Lease store with optimistic concurrency
//! - [`runtime`] - Docker-compatible runtime client for logs and restarts
//! - [`selector`] - label selector parsing and matching
//! - [`discovery`] - static discovery payloads
//! - [`router`] - URL grammar, verb dispatch and response shaping
//! - [`server`] - TLS probe and HTTP/HTTPS bind
//! - [`error`] - error taxonomy rendered as Kubernetes Status objects

pub mod compose;
pub mod config;
pub mod discovery;
pub mod error;
pub mod files;
pub mod lease;
pub mod project;
pub mod router;
pub mod runtime;
pub mod selector;
pub mod server;

pub use error::ApiError;

/// Result type alias using the API error type
pub type Result<T> = std::result::Result<T, ApiError>;

/// Name of the single synthetic node every pod is scheduled on
pub const NODE_NAME: &str = "h2c-node";

/// Compose label that marks the facade's own service.
///
/// The injection planner tags the h2c-api service with this label; the
/// projector filters on it so the facade never appears in its own listings.
pub const FACADE_LABEL: &str = "io.h2c.facade";

/// gitVersion reported by /version
pub const GIT_VERSION: &str = "v1.28.0-h2c";
