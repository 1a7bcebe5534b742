//! Server configuration
//!
//! All settings come from the `H2C_*` environment variables (or the matching
//! flags), with defaults chosen for the containerised deployment the
//! injection planner emits.

use std::path::PathBuf;

use clap::Parser;

/// Facade Kubernetes API server for compose stacks
#[derive(Debug, Clone, Parser)]
#[command(name = "h2c-api", version, about, long_about = None)]
pub struct Config {
    /// Compose file that backs the cluster projection
    #[arg(long, env = "H2C_COMPOSE", default_value = "/data/compose.yml")]
    pub compose: PathBuf,

    /// Directory scanned for configmaps/ and secrets/ subdirectories
    #[arg(long, env = "H2C_DATA_DIR", default_value = "/data")]
    pub data_dir: PathBuf,

    /// Port to listen on
    #[arg(long, env = "H2C_PORT", default_value_t = 6443)]
    pub port: u16,

    /// Directory probed for tls.crt and tls.key
    #[arg(
        long,
        env = "H2C_SA_DIR",
        default_value = "/var/run/secrets/kubernetes.io/serviceaccount"
    )]
    pub sa_dir: PathBuf,

    /// Docker-compatible runtime socket used for pod logs and restarts
    #[arg(long, env = "H2C_RUNTIME_SOCKET", default_value = "/var/run/docker.sock")]
    pub runtime_socket: PathBuf,
}
