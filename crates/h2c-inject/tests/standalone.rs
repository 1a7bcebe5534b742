//! End-to-end planner test: bundle issuance, compose override and
//! kubeconfig emission against a throwaway stack directory.
//!
//! The runtime socket probe is exercised separately (it shells out to a
//! container runtime); here the override is built as if no socket passed,
//! which is also the planner's behaviour on machines without one.

use std::path::Path;

use serde_yaml::Value;

use h2c_inject::bundle::{self, BundleStatus};
use h2c_inject::compose::{self, ComposeFile, FACADE_LABEL, FACADE_SERVICE, SA_MOUNT};
use h2c_inject::kubeconfig;
use h2c_inject::pki;

fn write_stack(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("compose.yml");
    std::fs::write(
        &path,
        "name: demo\nservices:\n  app:\n    image: x\n",
    )
    .unwrap();
    path
}

#[test]
fn injection_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let compose_path = write_stack(dir.path());
    let compose = ComposeFile::load(&compose_path).unwrap();

    // Bundle with an extra SAN host
    let sa_dir = bundle::bundle_dir(&compose_path);
    let hosts = vec!["kube.example".to_string()];
    let status = bundle::ensure_bundle(&sa_dir, &compose.project_name(), &hosts).unwrap();
    assert_eq!(status, BundleStatus::Generated);

    // (a) the leaf certificate's SAN list includes the user host and the
    // fixed in-cluster names
    let cert_pem = std::fs::read_to_string(sa_dir.join("tls.crt")).unwrap();
    let sans = pki::leaf_sans(&cert_pem).unwrap();
    for expected in ["kube.example", "localhost", "h2c-api"] {
        assert!(sans.contains(expected), "missing SAN {}", expected);
    }

    // (b) the override adds the facade publishing 16443:6443 and injects app
    let override_doc = compose::build_override(&compose, None, Some(16443));
    let path = compose::write_override(&compose, &override_doc).unwrap();
    let written: Value =
        serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let services = written.get("services").unwrap();

    let facade = services.get(FACADE_SERVICE).unwrap();
    assert_eq!(
        facade.get("ports").and_then(Value::as_sequence).unwrap()[0],
        Value::String("16443:6443".to_string())
    );
    assert_eq!(
        facade
            .get("labels")
            .and_then(|l| l.get(FACADE_LABEL))
            .and_then(Value::as_str),
        Some("true")
    );

    let app = services.get("app").unwrap();
    let volumes = app.get("volumes").and_then(Value::as_sequence).unwrap();
    assert!(volumes
        .iter()
        .any(|v| v.as_str().is_some_and(|v| v.ends_with(&format!("{}:ro", SA_MOUNT)))));
    assert_eq!(
        app.get("environment")
            .and_then(|e| e.get("KUBERNETES_SERVICE_HOST"))
            .and_then(Value::as_str),
        Some("h2c-api")
    );

    // (c) the kubeconfig names the user host, embeds the CA, carries the token
    let kc_path =
        kubeconfig::write_kubeconfig(compose.dir(), &sa_dir, "kube.example", 16443).unwrap();
    let kc: kubeconfig::Kubeconfig =
        serde_yaml::from_str(&std::fs::read_to_string(&kc_path).unwrap()).unwrap();
    assert_eq!(kc.clusters[0].cluster.server, "https://kube.example:16443");
    assert!(!kc.clusters[0].cluster.certificate_authority_data.is_empty());
    assert_eq!(kc.users[0].user.token, bundle::TOKEN);

    // Re-running with the same hosts reuses the bundle
    let status = bundle::ensure_bundle(&sa_dir, &compose.project_name(), &hosts).unwrap();
    assert_eq!(status, BundleStatus::Reused);
}

#[test]
fn bundle_namespace_follows_project() {
    let dir = tempfile::tempdir().unwrap();
    let compose_path = write_stack(dir.path());
    let compose = ComposeFile::load(&compose_path).unwrap();

    let sa_dir = bundle::bundle_dir(&compose_path);
    bundle::ensure_bundle(&sa_dir, &compose.project_name(), &[]).unwrap();

    assert_eq!(
        std::fs::read_to_string(sa_dir.join("namespace")).unwrap(),
        "demo"
    );
}
