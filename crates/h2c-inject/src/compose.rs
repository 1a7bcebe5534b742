//! Compose graph rewriting
//!
//! Two modes share the same building blocks:
//!
//! - **Standalone**: emit a `compose.override.yml` next to the user's file;
//!   the orchestrator merges it at `up` time.
//! - **Transform**: mutate a services mapping in place, for drivers that
//!   hold the compose graph in memory.
//!
//! Either way, every existing service gains the SA-bundle mount, the
//! cluster-locator environment variables and a dependency edge on the
//! facade, and one new service running the facade is added. The facade
//! service is tagged with a reserved label so the server can exclude itself
//! from its own listings.

use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use crate::bundle::SA_DIR_NAME;
use crate::error::{Error, Result};

/// Name of the injected facade service
pub const FACADE_SERVICE: &str = "h2c-api";

/// Image the facade service runs
pub const FACADE_IMAGE: &str = "ghcr.io/h2c-io/h2c-api:latest";

/// In-container mount point of the SA bundle
pub const SA_MOUNT: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Port the facade listens on inside the network
pub const FACADE_PORT: u16 = 6443;

/// Label marking the facade service; the server filters on it
pub const FACADE_LABEL: &str = "io.h2c.facade";

fn s(text: impl Into<String>) -> Value {
    Value::String(text.into())
}

/// A loaded compose file
#[derive(Debug, Clone)]
pub struct ComposeFile {
    /// Path the file was read from
    pub path: PathBuf,
    /// Parsed document
    pub doc: Value,
}

impl ComposeFile {
    /// Read and parse a compose file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::validation(format!("{} not found", path.display())));
        }
        let text = std::fs::read_to_string(path)?;
        let doc: Value = serde_yaml::from_str(&text)?;
        Ok(Self {
            path: path.to_path_buf(),
            doc,
        })
    }

    /// Directory holding the compose file
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// File name of the compose file itself
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("compose.yml")
            .to_string()
    }

    /// Project name: the explicit `name:` key, else the parent directory
    /// basename lowercased with non-alphanumerics mapped to `-`.
    ///
    /// Must agree with the server's derivation; the planner writes this into
    /// the bundle's `namespace` file.
    pub fn project_name(&self) -> String {
        if let Some(name) = self.doc.get("name").and_then(Value::as_str) {
            return name.to_string();
        }
        let raw = self
            .path
            .canonicalize()
            .ok()
            .as_deref()
            .unwrap_or(&self.path)
            .parent()
            .and_then(Path::file_name)
            .and_then(|n| n.to_str())
            .unwrap_or("default")
            .to_string();
        let name: String = raw
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        if name.is_empty() {
            "default".to_string()
        } else {
            name
        }
    }

    /// Names of the declared services, in file order
    pub fn service_names(&self) -> Vec<String> {
        self.doc
            .get("services")
            .and_then(Value::as_mapping)
            .map(|services| {
                services
                    .keys()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn has_sibling_dir(&self, name: &str) -> bool {
        self.dir().join(name).is_dir()
    }
}

/// Build the facade's own compose service entry
pub fn facade_service(
    compose: &ComposeFile,
    socket: Option<&Path>,
    host_port: Option<u16>,
) -> Value {
    let mut svc = Mapping::new();
    svc.insert(s("image"), s(FACADE_IMAGE));
    svc.insert(s("restart"), s("unless-stopped"));

    let mut labels = Mapping::new();
    labels.insert(s(FACADE_LABEL), s("true"));
    svc.insert(s("labels"), Value::Mapping(labels));

    if let Some(port) = host_port {
        svc.insert(
            s("ports"),
            Value::Sequence(vec![s(format!("{}:{}", port, FACADE_PORT))]),
        );
    }

    let mut volumes = vec![
        s(format!("./{}:{}:ro", SA_DIR_NAME, SA_MOUNT)),
        s(format!("./{}:/data/compose.yml:ro", compose.file_name())),
    ];
    for dir in ["configmaps", "secrets"] {
        if compose.has_sibling_dir(dir) {
            volumes.push(s(format!("./{}:/data/{}:ro", dir, dir)));
        }
    }
    if let Some(socket) = socket {
        volumes.push(s(format!("{}:/var/run/docker.sock", socket.display())));
    }
    svc.insert(s("volumes"), Value::Sequence(volumes));

    Value::Mapping(svc)
}

/// The override entry merged into every existing service
pub fn service_injection() -> Value {
    let mut svc = Mapping::new();
    svc.insert(
        s("volumes"),
        Value::Sequence(vec![s(format!("./{}:{}:ro", SA_DIR_NAME, SA_MOUNT))]),
    );

    let mut environment = Mapping::new();
    environment.insert(s("KUBERNETES_SERVICE_HOST"), s(FACADE_SERVICE));
    environment.insert(s("KUBERNETES_SERVICE_PORT"), s(FACADE_PORT.to_string()));
    svc.insert(s("environment"), Value::Mapping(environment));

    svc.insert(s("depends_on"), Value::Sequence(vec![s(FACADE_SERVICE)]));
    Value::Mapping(svc)
}

/// Build the full override document (standalone mode)
pub fn build_override(
    compose: &ComposeFile,
    socket: Option<&Path>,
    host_port: Option<u16>,
) -> Value {
    let mut services = Mapping::new();
    services.insert(
        s(FACADE_SERVICE),
        facade_service(compose, socket, host_port),
    );
    for name in compose.service_names() {
        services.insert(s(name), service_injection());
    }

    let mut doc = Mapping::new();
    doc.insert(s("services"), Value::Mapping(services));
    Value::Mapping(doc)
}

/// Write the override document next to the compose file
pub fn write_override(compose: &ComposeFile, override_doc: &Value) -> Result<PathBuf> {
    let path = compose.dir().join("compose.override.yml");
    let body = serde_yaml::to_string(override_doc)?;
    std::fs::write(&path, format!("# Generated by h2c-inject - do not edit\n{}", body))?;
    Ok(path)
}

/// Transform mode: rewrite a services mapping in place.
///
/// Existing services keep whatever volumes/environment/depends_on shape they
/// already use (list or map); the injected entries are merged, not replaced.
pub fn inject_into(
    services: &mut Mapping,
    compose: &ComposeFile,
    socket: Option<&Path>,
    host_port: Option<u16>,
) {
    let sa_volume = format!("./{}:{}:ro", SA_DIR_NAME, SA_MOUNT);

    for (_, svc) in services.iter_mut() {
        let Value::Mapping(svc) = svc else { continue };

        match svc.get_mut("volumes") {
            Some(Value::Sequence(volumes)) => volumes.push(s(&sa_volume)),
            _ => {
                svc.insert(s("volumes"), Value::Sequence(vec![s(&sa_volume)]));
            }
        }

        match svc.get_mut("environment") {
            Some(Value::Sequence(environment)) => {
                environment.push(s(format!("KUBERNETES_SERVICE_HOST={}", FACADE_SERVICE)));
                environment.push(s(format!("KUBERNETES_SERVICE_PORT={}", FACADE_PORT)));
            }
            Some(Value::Mapping(environment)) => {
                environment.insert(s("KUBERNETES_SERVICE_HOST"), s(FACADE_SERVICE));
                environment.insert(s("KUBERNETES_SERVICE_PORT"), s(FACADE_PORT.to_string()));
            }
            _ => {
                let mut environment = Mapping::new();
                environment.insert(s("KUBERNETES_SERVICE_HOST"), s(FACADE_SERVICE));
                environment.insert(s("KUBERNETES_SERVICE_PORT"), s(FACADE_PORT.to_string()));
                svc.insert(s("environment"), Value::Mapping(environment));
            }
        }

        match svc.get_mut("depends_on") {
            Some(Value::Sequence(deps)) => deps.push(s(FACADE_SERVICE)),
            Some(Value::Mapping(deps)) => {
                let mut condition = Mapping::new();
                condition.insert(s("condition"), s("service_started"));
                deps.insert(s(FACADE_SERVICE), Value::Mapping(condition));
            }
            _ => {
                svc.insert(
                    s("depends_on"),
                    Value::Sequence(vec![s(FACADE_SERVICE)]),
                );
            }
        }
    }

    services.insert(
        s(FACADE_SERVICE),
        facade_service(compose, socket, host_port),
    );
}
