//! ConfigMap and Secret loader
//!
//! Projects directories under the data dir as resources. Two layouts are
//! recognised: a top-level file becomes a resource with a single data entry
//! keyed on the file name, and a subdirectory becomes a resource with one
//! entry per contained file. Secrets always base64-encode their values;
//! configmaps split UTF-8 content into `data` and binary content into
//! `binaryData`.

use std::io;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Map, Value};

use crate::error::ApiError;

/// One loaded resource: a name and its keyed file contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileResource {
    /// Resource name (file stem or subdirectory name)
    pub name: String,
    /// Data entries in file-name order
    pub entries: Vec<(String, Vec<u8>)>,
}

/// Load all resources from a `configmaps/` or `secrets/` directory.
///
/// A missing directory is an empty result, not an error; any other
/// filesystem failure surfaces as a 500.
pub fn load_dir(dir: &Path) -> Result<Vec<FileResource>, ApiError> {
    match scan(dir) {
        Ok(resources) => Ok(resources),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(ApiError::Internal(format!(
            "failed to read {}: {}",
            dir.display(),
            e
        ))),
    }
}

fn scan(dir: &Path) -> io::Result<Vec<FileResource>> {
    let mut names: Vec<_> = std::fs::read_dir(dir)?
        .collect::<io::Result<Vec<_>>>()?
        .into_iter()
        .map(|entry| entry.path())
        .collect();
    names.sort();

    let mut resources = Vec::new();
    for path in names {
        if path.is_file() {
            let file_name = file_name(&path)?;
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(&file_name)
                .to_string();
            resources.push(FileResource {
                name: stem,
                entries: vec![(file_name, std::fs::read(&path)?)],
            });
        } else if path.is_dir() {
            let mut entries = Vec::new();
            let mut keys: Vec<_> = std::fs::read_dir(&path)?
                .collect::<io::Result<Vec<_>>>()?
                .into_iter()
                .map(|entry| entry.path())
                .collect();
            keys.sort();
            for key in keys {
                if key.is_file() {
                    entries.push((file_name(&key)?, std::fs::read(&key)?));
                }
            }
            if !entries.is_empty() {
                resources.push(FileResource {
                    name: file_name(&path)?,
                    entries,
                });
            }
        }
    }
    Ok(resources)
}

fn file_name(path: &Path) -> io::Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "non-UTF-8 file name"))
}

/// ConfigMap projection: UTF-8 entries in `data`, binary ones in `binaryData`
pub fn make_configmap(resource: &FileResource, namespace: &str, rv: &str) -> Value {
    let mut data = Map::new();
    let mut binary = Map::new();
    for (key, bytes) in &resource.entries {
        match std::str::from_utf8(bytes) {
            Ok(text) => {
                data.insert(key.clone(), Value::String(text.to_string()));
            }
            Err(_) => {
                binary.insert(key.clone(), Value::String(BASE64.encode(bytes)));
            }
        }
    }

    let mut configmap = json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": resource.name,
            "namespace": namespace,
            "resourceVersion": rv,
        },
        "data": data,
    });
    if !binary.is_empty() {
        configmap["binaryData"] = Value::Object(binary);
    }
    configmap
}

/// Secret projection: every value base64-encoded, type Opaque
pub fn make_secret(resource: &FileResource, namespace: &str, rv: &str) -> Value {
    let data: Map<String, Value> = resource
        .entries
        .iter()
        .map(|(key, bytes)| (key.clone(), Value::String(BASE64.encode(bytes))))
        .collect();

    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {
            "name": resource.name,
            "namespace": namespace,
            "resourceVersion": rv,
        },
        "type": "Opaque",
        "data": data,
    })
}
