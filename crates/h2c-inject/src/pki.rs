//! PKI operations for the facade's TLS identity
//!
//! The planner issues a self-signed CA and a leaf certificate for the
//! facade, with Subject Alternative Names covering the in-cluster DNS names
//! Kubernetes clients dial plus whatever extra hosts the operator asked for.
//! Certificates are long-lived: the bundle is a local development artifact,
//! not a production identity.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use thiserror::Error;
use x509_parser::prelude::*;

/// Common name of the issued CA
pub const CA_COMMON_NAME: &str = "h2c-ca";

/// Common name of the facade's leaf certificate
pub const LEAF_COMMON_NAME: &str = "h2c-api";

/// Validity period for both CA and leaf (10 years)
const VALIDITY_YEARS: i64 = 10;

/// SANs every leaf carries regardless of operator input
pub fn base_sans() -> Vec<String> {
    vec![
        "h2c-api".to_string(),
        "kubernetes".to_string(),
        "kubernetes.default".to_string(),
        "kubernetes.default.svc".to_string(),
        "localhost".to_string(),
        "127.0.0.1".to_string(),
    ]
}

/// PKI errors
#[derive(Debug, Error)]
pub enum PkiError {
    /// Certificate generation failed
    #[error("certificate generation failed: {0}")]
    CertificateGenerationFailed(String),

    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Certificate parsing error
    #[error("certificate parsing error: {0}")]
    ParseError(String),
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;

/// Parse PEM-encoded data and return the DER bytes
pub fn parse_pem(pem_data: &str) -> Result<Vec<u8>> {
    let pem_obj = ::pem::parse(pem_data.as_bytes())
        .map_err(|e| PkiError::ParseError(format!("failed to parse PEM: {}", e)))?;
    Ok(pem_obj.contents().to_vec())
}

fn compute_validity() -> (::time::OffsetDateTime, ::time::OffsetDateTime) {
    let now = ::time::OffsetDateTime::now_utc();
    (now, now + ::time::Duration::days(VALIDITY_YEARS * 365))
}

/// Certificate Authority that signs the facade's leaf certificate
pub struct CertificateAuthority {
    /// CA key pair serialized as PEM (KeyPair isn't Clone, so it is
    /// re-parsed whenever a certificate is signed)
    ca_key_pem: String,
    /// PEM-encoded CA certificate for distribution
    ca_cert_pem: String,
}

impl CertificateAuthority {
    /// Create a new self-signed CA
    pub fn new() -> Result<Self> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(CA_COMMON_NAME.to_string()),
        );
        params.distinguished_name = dn;

        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let (not_before, not_after) = compute_validity();
        params.not_before = not_before;
        params.not_after = not_after;

        let key_pair = KeyPair::generate().map_err(|e| {
            PkiError::KeyGenerationFailed(format!("failed to generate CA key: {}", e))
        })?;
        let ca_key_pem = key_pair.serialize_pem();

        let cert = params.self_signed(&key_pair).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to create CA cert: {}", e))
        })?;

        Ok(Self {
            ca_key_pem,
            ca_cert_pem: cert.pem(),
        })
    }

    /// Get the CA certificate in PEM format
    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    /// Issue the facade's leaf certificate with the given SANs.
    ///
    /// Returns `(cert_pem, key_pem)`. Hosts that parse as IP addresses
    /// become IP SANs; everything else becomes a DNS SAN.
    pub fn issue_leaf(&self, sans: &[String]) -> Result<(String, String)> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(LEAF_COMMON_NAME.to_string()),
        );
        params.distinguished_name = dn;

        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ServerAuth];

        let (not_before, not_after) = compute_validity();
        params.not_before = not_before;
        params.not_after = not_after;

        params.subject_alt_names = sans
            .iter()
            .map(|san| {
                if let Ok(ip) = san.parse::<IpAddr>() {
                    Ok(SanType::IpAddress(ip))
                } else {
                    Ia5String::try_from(san.to_string())
                        .map(SanType::DnsName)
                        .map_err(|e| {
                            PkiError::CertificateGenerationFailed(format!(
                                "invalid DNS name '{}': {}",
                                san, e
                            ))
                        })
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let leaf_key = KeyPair::generate().map_err(|e| {
            PkiError::KeyGenerationFailed(format!("failed to generate server key: {}", e))
        })?;
        let leaf_key_pem = leaf_key.serialize_pem();

        let ca_key = KeyPair::from_pem(&self.ca_key_pem)
            .map_err(|e| PkiError::ParseError(format!("failed to load CA key: {}", e)))?;
        let issuer = Issuer::from_ca_cert_pem(&self.ca_cert_pem, &ca_key)
            .map_err(|e| PkiError::ParseError(format!("failed to create issuer: {}", e)))?;

        let cert = params.signed_by(&leaf_key, &issuer).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to sign server cert: {}", e))
        })?;

        Ok((cert.pem(), leaf_key_pem))
    }
}

/// Read the SAN set back out of a PEM-encoded certificate.
///
/// Used for the reuse check: an existing bundle is kept when its SAN set is
/// a superset of what the current invocation needs.
pub fn leaf_sans(cert_pem: &str) -> Result<BTreeSet<String>> {
    let der = parse_pem(cert_pem)?;
    let (_, cert) = X509Certificate::from_der(&der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {}", e)))?;

    let mut sans = BTreeSet::new();
    for ext in cert.extensions() {
        if let ParsedExtension::SubjectAlternativeName(san) = ext.parsed_extension() {
            for name in &san.general_names {
                match name {
                    GeneralName::DNSName(dns) => {
                        sans.insert((*dns).to_string());
                    }
                    GeneralName::IPAddress(bytes) => match bytes.len() {
                        4 => {
                            let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
                            sans.insert(ip.to_string());
                        }
                        16 => {
                            let mut octets = [0u8; 16];
                            octets.copy_from_slice(bytes);
                            sans.insert(Ipv6Addr::from(octets).to_string());
                        }
                        _ => {}
                    },
                    _ => {}
                }
            }
        }
    }
    Ok(sans)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ca_can_be_created() {
        let ca = CertificateAuthority::new().expect("CA creation should succeed");
        assert!(ca.ca_cert_pem().contains("BEGIN CERTIFICATE"));
    }

    #[test]
    fn leaf_carries_base_and_extra_sans() {
        let ca = CertificateAuthority::new().expect("CA creation should succeed");
        let mut sans = base_sans();
        sans.push("kube.example".to_string());

        let (cert_pem, key_pem) = ca.issue_leaf(&sans).expect("leaf issuance should succeed");
        assert!(cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(key_pem.contains("PRIVATE KEY"));

        let parsed = leaf_sans(&cert_pem).expect("SAN read-back should succeed");
        for expected in [
            "h2c-api",
            "kubernetes",
            "kubernetes.default",
            "kubernetes.default.svc",
            "localhost",
            "127.0.0.1",
            "kube.example",
        ] {
            assert!(parsed.contains(expected), "missing SAN {}", expected);
        }
    }

    #[test]
    fn ip_hosts_become_ip_sans() {
        let ca = CertificateAuthority::new().expect("CA creation should succeed");
        let sans = vec!["10.1.2.3".to_string(), "h2c-api".to_string()];
        let (cert_pem, _) = ca.issue_leaf(&sans).expect("leaf issuance should succeed");

        let parsed = leaf_sans(&cert_pem).expect("SAN read-back should succeed");
        assert!(parsed.contains("10.1.2.3"));
        assert!(parsed.contains("h2c-api"));
    }

    #[test]
    fn leaf_is_not_a_ca() {
        let ca = CertificateAuthority::new().expect("CA creation should succeed");
        let (cert_pem, _) = ca
            .issue_leaf(&base_sans())
            .expect("leaf issuance should succeed");

        let der = parse_pem(&cert_pem).unwrap();
        let (_, cert) = X509Certificate::from_der(&der).unwrap();
        let is_ca = cert
            .basic_constraints()
            .ok()
            .flatten()
            .map(|bc| bc.value.ca)
            .unwrap_or(false);
        assert!(!is_ca);
    }

    #[test]
    fn leaf_is_signed_by_the_ca() {
        let ca = CertificateAuthority::new().expect("CA creation should succeed");
        let (cert_pem, _) = ca
            .issue_leaf(&base_sans())
            .expect("leaf issuance should succeed");

        let leaf_der = parse_pem(&cert_pem).unwrap();
        let (_, leaf) = X509Certificate::from_der(&leaf_der).unwrap();
        let ca_der = parse_pem(ca.ca_cert_pem()).unwrap();
        let (_, ca_cert) = X509Certificate::from_der(&ca_der).unwrap();

        assert!(leaf.verify_signature(Some(ca_cert.public_key())).is_ok());
        assert_eq!(leaf.issuer(), ca_cert.subject());
    }

    #[test]
    fn invalid_pem_is_rejected() {
        assert!(matches!(
            leaf_sans("not a certificate"),
            Err(PkiError::ParseError(_))
        ));
    }
}
