//! Client kubeconfig emission
//!
//! When the facade's port is published on the host, the planner writes a
//! self-contained kubeconfig so host-side tooling (kubectl, client
//! libraries) can talk to the stack: the CA is embedded base64-inline and
//! the user carries the fixed bearer token.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Name used for the cluster, user and context entries
const CONTEXT_NAME: &str = "h2c";

/// Kubeconfig structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Kubeconfig {
    /// API version
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    /// Kind (always "Config")
    pub kind: String,
    /// Clusters
    pub clusters: Vec<KubeconfigCluster>,
    /// Users
    pub users: Vec<KubeconfigUser>,
    /// Contexts
    pub contexts: Vec<KubeconfigContext>,
    /// Current context
    #[serde(rename = "current-context")]
    pub current_context: String,
}

/// Cluster entry in kubeconfig
#[derive(Debug, Serialize, Deserialize)]
pub struct KubeconfigCluster {
    /// Cluster name
    pub name: String,
    /// Cluster config
    pub cluster: ClusterConfig,
}

/// Cluster configuration
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterConfig {
    /// API server URL
    pub server: String,
    /// CA certificate (base64 encoded)
    pub certificate_authority_data: String,
}

/// User entry in kubeconfig
#[derive(Debug, Serialize, Deserialize)]
pub struct KubeconfigUser {
    /// User name
    pub name: String,
    /// User config
    pub user: UserConfig,
}

/// User configuration: the fixed bearer token
#[derive(Debug, Serialize, Deserialize)]
pub struct UserConfig {
    /// Bearer token
    pub token: String,
}

/// Context entry in kubeconfig
#[derive(Debug, Serialize, Deserialize)]
pub struct KubeconfigContext {
    /// Context name
    pub name: String,
    /// Context config
    pub context: ContextConfig,
}

/// Context configuration
#[derive(Debug, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Cluster name (reference)
    pub cluster: String,
    /// User name (reference)
    pub user: String,
}

/// Build a kubeconfig pointing at the published facade port
pub fn build_kubeconfig(host: &str, port: u16, ca_pem: &[u8], token: &str) -> Kubeconfig {
    Kubeconfig {
        api_version: "v1".to_string(),
        kind: "Config".to_string(),
        clusters: vec![KubeconfigCluster {
            name: CONTEXT_NAME.to_string(),
            cluster: ClusterConfig {
                server: format!("https://{}:{}", host, port),
                certificate_authority_data: BASE64.encode(ca_pem),
            },
        }],
        users: vec![KubeconfigUser {
            name: CONTEXT_NAME.to_string(),
            user: UserConfig {
                token: token.to_string(),
            },
        }],
        contexts: vec![KubeconfigContext {
            name: CONTEXT_NAME.to_string(),
            context: ContextConfig {
                cluster: CONTEXT_NAME.to_string(),
                user: CONTEXT_NAME.to_string(),
            },
        }],
        current_context: CONTEXT_NAME.to_string(),
    }
}

/// Write `kubeconfig-<host>.conf` into `out_dir`, reading the CA and token
/// from the SA bundle.
pub fn write_kubeconfig(out_dir: &Path, sa_dir: &Path, host: &str, port: u16) -> Result<PathBuf> {
    let ca_pem = std::fs::read(sa_dir.join("ca.crt"))?;
    let token = std::fs::read_to_string(sa_dir.join("token"))?;

    let kubeconfig = build_kubeconfig(host, port, &ca_pem, token.trim());
    let body = serde_yaml::to_string(&kubeconfig)?;

    let path = out_dir.join(format!("kubeconfig-{}.conf", host));
    std::fs::write(
        &path,
        format!("# Generated by h2c-inject - do not edit\n{}", body),
    )?;
    Ok(path)
}
