//! TLS probe and server bind
//!
//! When the service-account directory carries a `tls.crt`/`tls.key` pair
//! (written by the injection planner), the facade serves HTTPS; otherwise it
//! falls back to plain HTTP on the same port. No client certificates are
//! verified. Bind or certificate failures are fatal at startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use tracing::info;

use crate::compose::SnapshotCache;
use crate::config::Config;
use crate::lease::LeaseStore;
use crate::router::build_router;
use crate::runtime::RuntimeClient;

/// Errors that terminate the process at startup
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    /// tls.crt/tls.key were present but unusable
    #[error("failed to load TLS material: {0}")]
    Tls(std::io::Error),

    /// Bind or accept-loop failure
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared state for request handlers
#[derive(Clone)]
pub struct AppState {
    /// Compose snapshot cache
    pub snapshot: Arc<SnapshotCache>,
    /// Directory holding configmaps/ and secrets/
    pub data_dir: PathBuf,
    /// Lease store and global version counter
    pub leases: Arc<LeaseStore>,
    /// Container runtime bridge
    pub runtime: Arc<RuntimeClient>,
    /// Process start time (RFC3339), reported as pod startTime
    pub started_at: String,
}

impl AppState {
    /// Build the shared state from the server configuration
    pub fn new(config: &Config, started_at: String) -> Self {
        Self {
            snapshot: Arc::new(SnapshotCache::new(config.compose.clone())),
            data_dir: config.data_dir.clone(),
            leases: Arc::new(LeaseStore::new()),
            runtime: Arc::new(RuntimeClient::new(config.runtime_socket.clone())),
            started_at,
        }
    }
}

/// Serve the facade until the process is stopped
pub async fn serve(config: &Config, state: AppState) -> Result<(), ServeError> {
    let app = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    let cert = config.sa_dir.join("tls.crt");
    let key = config.sa_dir.join("tls.key");

    if cert.exists() && key.exists() {
        let tls = RustlsConfig::from_pem_file(&cert, &key)
            .await
            .map_err(ServeError::Tls)?;
        info!(%addr, "serving HTTPS");
        axum_server::bind_rustls(addr, tls)
            .serve(app.into_make_service())
            .await?;
    } else {
        info!(%addr, "serving HTTP (no TLS material found)");
        axum_server::bind(addr)
            .serve(app.into_make_service())
            .await?;
    }
    Ok(())
}
