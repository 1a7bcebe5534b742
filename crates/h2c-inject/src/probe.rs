//! Container runtime socket probing
//!
//! A socket path existing on the host does not mean it can be bind-mounted
//! into a container: Lima-based runtimes (Rancher Desktop, colima) expose a
//! socket node that fails at container creation with "operation not
//! supported". The only reliable test is to try, so each candidate is
//! verified by running a throwaway container with the socket mounted and
//! checking the node is visible inside.
//!
//! Any failure (missing runtime binary, timeout, non-zero exit) silently
//! disqualifies the candidate; with no candidate left the bridge features
//! are simply not wired into the emitted compose.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Candidate socket paths, most specific first
pub const SOCKET_CANDIDATES: [&str; 4] = [
    "/run/docker.sock",           // Lima VM (Rancher Desktop, colima)
    "/var/run/docker.sock",       // Linux / Docker Desktop
    "~/.rd/docker.sock",          // Rancher Desktop (macOS host)
    "~/.docker/run/docker.sock",  // Docker Desktop (macOS host)
];

/// Image used for the trial mount; anything with a POSIX `test` works
const PROBE_IMAGE: &str = "alpine:3";

/// Deadline per trial mount; covers an image pull on first run
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Find the first candidate socket that survives an actual trial mount
pub async fn find_runtime_socket() -> Option<PathBuf> {
    for raw in SOCKET_CANDIDATES {
        let candidate = expand_home(raw);
        if !candidate.exists() {
            continue;
        }
        if trial_mount(&candidate).await {
            return Some(candidate);
        }
        debug!(
            socket = %candidate.display(),
            "socket exists but cannot be mounted, skipping"
        );
    }
    None
}

/// Try to bind-mount the socket into a throwaway container
async fn trial_mount(socket: &Path) -> bool {
    for runtime in ["docker", "nerdctl"] {
        let result = timeout(
            PROBE_TIMEOUT,
            Command::new(runtime)
                .args([
                    "run",
                    "--rm",
                    "-v",
                    &format!("{}:/probe.sock", socket.display()),
                    PROBE_IMAGE,
                    "test",
                    "-S",
                    "/probe.sock",
                ])
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) if output.status.success() => return true,
            // Runtime missing, probe failed or timed out: try the next one
            _ => continue,
        }
    }
    false
}

fn expand_home(raw: &str) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => PathBuf::from(raw),
        },
        None => PathBuf::from(raw),
    }
}
