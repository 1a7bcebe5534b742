//! h2c-inject - host-side planner that injects the facade into a compose stack
//!
//! A one-shot tool: it issues the certificate bundle, synthesises the fake
//! Service Account, probes for a mountable container-runtime socket, and
//! rewrites the compose graph so every service can find and trust the
//! facade. The planner and the server cooperate only through the files this
//! tool writes; they share no code.

pub mod bundle;
pub mod compose;
pub mod error;
pub mod kubeconfig;
pub mod pki;
pub mod probe;

pub use error::{Error, Result};

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

/// Inject the h2c facade API server into a compose stack
#[derive(Parser, Debug)]
#[command(name = "h2c-inject", version, about, long_about = None)]
pub struct Cli {
    /// Compose file to inject into
    #[arg(default_value = "compose.yml", value_name = "COMPOSE_FILE")]
    pub compose: PathBuf,

    /// Publish the facade port on the host (default 6443) and emit a
    /// client kubeconfig
    #[arg(long, num_args = 0..=1, default_missing_value = "6443", value_name = "PORT")]
    pub expose_host_port: Option<u16>,

    /// Extra certificate SAN host; the first occurrence also names the
    /// kubeconfig server
    #[arg(long = "host", value_name = "HOST")]
    pub hosts: Vec<String>,
}

impl Cli {
    /// Run the planner
    pub async fn run(self) -> Result<()> {
        let compose = compose::ComposeFile::load(&self.compose)?;
        let project = compose.project_name();
        let services = compose.service_names();

        let sa_dir = bundle::bundle_dir(&self.compose);
        bundle::ensure_bundle(&sa_dir, &project, &self.hosts)?;

        let socket = probe::find_runtime_socket().await;

        let override_doc =
            compose::build_override(&compose, socket.as_deref(), self.expose_host_port);
        let override_path = compose::write_override(&compose, &override_doc)?;

        let kubeconfig_path = match self.expose_host_port {
            Some(port) => {
                let host = self.hosts.first().map(String::as_str).unwrap_or("localhost");
                Some(kubeconfig::write_kubeconfig(
                    compose.dir(),
                    &sa_dir,
                    host,
                    port,
                )?)
            }
            None => None,
        };

        info!(path = %override_path.display(), "override generated");
        info!(
            services = services.len(),
            sa_mount = %format!("./{}/ -> {}", bundle::SA_DIR_NAME, compose::SA_MOUNT),
            "services injected"
        );
        match &socket {
            Some(socket) => info!(socket = %socket.display(), "runtime socket mounted"),
            None => info!("runtime socket not found (logs/restart disabled)"),
        }
        match self.expose_host_port {
            Some(port) => info!(port, "facade port published on host"),
            None => info!("facade port not exposed on host"),
        }
        if let Some(path) = kubeconfig_path {
            info!(path = %path.display(), "kubeconfig written");
        }
        info!(namespace = %project, "done");

        Ok(())
    }
}
