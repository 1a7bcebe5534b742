//! Service Account bundle synthesis
//!
//! Kubernetes client libraries read `{ca.crt, token, namespace}` from a
//! fixed in-container path to locate and authenticate to the API server.
//! The planner synthesises that trio next to the compose file, plus the
//! `tls.crt`/`tls.key` pair the facade terminates TLS with.
//!
//! Re-runs reuse an existing bundle as long as its certificate already
//! covers every requested SAN; anything less triggers a re-issue, so adding
//! a `--host` rotates the material exactly once.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::Result;
use crate::pki::{base_sans, leaf_sans, CertificateAuthority};

/// Bundle directory name, created next to the compose file
pub const SA_DIR_NAME: &str = "h2c-sa";

/// The fixed bearer token. There is no authentication; clients just need a
/// token file to read.
pub const TOKEN: &str = "h2c-api-dummy-token";

/// Outcome of [`ensure_bundle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleStatus {
    /// Fresh CA and leaf were issued
    Generated,
    /// An existing bundle already covered the requested SANs
    Reused,
}

/// SAN set for this invocation: the fixed base plus operator hosts
pub fn requested_sans(extra_hosts: &[String]) -> Vec<String> {
    let mut sans = base_sans();
    for host in extra_hosts {
        if !sans.contains(host) {
            sans.push(host.clone());
        }
    }
    sans
}

/// Ensure the SA bundle exists at `dir` and covers `extra_hosts`.
///
/// Always rewrites the `token` and `namespace` files (the namespace follows
/// the compose project). Certificates are only re-issued when the existing
/// leaf does not cover the requested SAN set.
pub fn ensure_bundle(dir: &Path, namespace: &str, extra_hosts: &[String]) -> Result<BundleStatus> {
    std::fs::create_dir_all(dir)?;

    let sans = requested_sans(extra_hosts);
    let status = if existing_cert_covers(dir, &sans) {
        BundleStatus::Reused
    } else {
        issue(dir, &sans)?;
        BundleStatus::Generated
    };

    std::fs::write(dir.join("token"), TOKEN)?;
    std::fs::write(dir.join("namespace"), namespace)?;

    match status {
        BundleStatus::Generated => info!(dir = %dir.display(), "certs: generated"),
        BundleStatus::Reused => info!(dir = %dir.display(), "certs: reusing existing"),
    }
    Ok(status)
}

/// Path of the bundle directory for a compose file
pub fn bundle_dir(compose_path: &Path) -> PathBuf {
    compose_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(SA_DIR_NAME)
}

fn existing_cert_covers(dir: &Path, sans: &[String]) -> bool {
    let Ok(cert_pem) = std::fs::read_to_string(dir.join("tls.crt")) else {
        return false;
    };
    if !dir.join("tls.key").exists() || !dir.join("ca.crt").exists() {
        return false;
    }
    match leaf_sans(&cert_pem) {
        Ok(existing) => {
            let requested: BTreeSet<&str> = sans.iter().map(String::as_str).collect();
            requested
                .iter()
                .all(|san| existing.contains(&san.to_string()))
        }
        // An unreadable certificate is replaced, not trusted
        Err(_) => false,
    }
}

fn issue(dir: &Path, sans: &[String]) -> Result<()> {
    let ca = CertificateAuthority::new()?;
    let (cert_pem, key_pem) = ca.issue_leaf(sans)?;

    std::fs::write(dir.join("ca.crt"), ca.ca_cert_pem())?;
    std::fs::write(dir.join("tls.crt"), cert_pem)?;
    std::fs::write(dir.join("tls.key"), key_pem)?;
    Ok(())
}
