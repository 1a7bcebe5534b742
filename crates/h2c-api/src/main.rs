//! h2c-api - facade Kubernetes API server for compose stacks

use chrono::{SecondsFormat, Utc};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use h2c_api::config::Config;
use h2c_api::files;
use h2c_api::server::{serve, AppState};

#[tokio::main]
async fn main() {
    // Install crypto provider
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("Failed to install crypto provider");

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::parse();

    if !config.compose.exists() {
        error!("compose file {} not found", config.compose.display());
        std::process::exit(1);
    }

    let started_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let state = AppState::new(&config, started_at);

    log_startup_summary(&config, &state).await;

    if let Err(e) = serve(&config, state).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

/// One-time startup summary of what the facade is projecting
async fn log_startup_summary(config: &Config, state: &AppState) {
    match state.snapshot.load().await {
        Ok(snapshot) => {
            let configmaps = files::load_dir(&config.data_dir.join("configmaps"))
                .map(|r| r.len())
                .unwrap_or(0);
            let secrets = files::load_dir(&config.data_dir.join("secrets"))
                .map(|r| r.len())
                .unwrap_or(0);
            info!(
                project = %snapshot.project_name,
                services = snapshot.services.len(),
                configmaps,
                secrets,
                runtime = if state.runtime.available() { "connected" } else { "unavailable" },
                "h2c-api starting"
            );
        }
        Err(e) => {
            // Served as a 500 on every request until the file is fixed
            error!("compose file is unreadable at startup: {}", e);
        }
    }
}
