//! Certificate hierarchy for the local trust domain
//!
//! kinder owns a two-tier hierarchy:
//!
//! - A self-signed root CA, name-constrained to the local domain, loopback
//!   and TEST-NET-1. Exactly one root exists per data directory.
//! - One intermediate CA per dependent service, signed by the root, with a
//!   path length of zero so it can only issue leaves.
//!
//! # Security Model
//!
//! - The root private key is written 0600 and never leaves the data directory
//! - Intermediates are regenerated whenever their service container is created
//! - The root only signs intermediates, never leaves
//!
//! Generating a root is not idempotent: calling [`generate_root`] twice on
//! the same paths replaces both files with unrelated key material. Callers
//! decide whether to reuse existing material.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};

use rand::RngCore;
use rcgen::{
    BasicConstraints, CertificateParams, CidrSubnet, DistinguishedName, DnType, DnValue,
    GeneralSubtree, IsCa, Issuer, KeyPair, KeyUsagePurpose, NameConstraints, SerialNumber,
    PKCS_ECDSA_P256_SHA256,
};
use thiserror::Error;
use x509_parser::prelude::*;

use crate::files::{write_file, PUBLIC_FILE_MODE, SECRET_FILE_MODE};

/// Organization name stamped on every kinder CA
pub const ORGANIZATION: &str = "kinder";

/// Network alias of the certificate authority service, always permitted
pub const CA_SERVICE_ALIAS: &str = "stepca";

/// Validity of root and intermediate certificates (1 year)
pub const CA_VALIDITY_DAYS: i64 = 365;

/// Serial numbers are 128-bit random values
const SERIAL_BYTES: usize = 16;

/// PKI errors
#[derive(Debug, Error)]
pub enum PkiError {
    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Certificate generation failed
    #[error("certificate generation failed: {0}")]
    CertificateGenerationFailed(String),

    /// Certificate or key parsing error
    #[error("certificate parsing error: {0}")]
    ParseError(String),

    /// Root key is not the expected elliptic-curve type
    #[error("unsupported root key type: expected ECDSA P-256, got {0}")]
    UnsupportedKeyType(String),

    /// Root material could not be read
    #[error("failed to read {path}: {source}")]
    Read {
        /// File that could not be read
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Destination could not be written
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;

/// A generated CA: certificate and PKCS#8 private key, both PEM
#[derive(Debug, Clone)]
pub struct CaMaterial {
    /// PEM-encoded certificate
    pub cert_pem: String,
    /// PEM-encoded PKCS#8 private key
    pub key_pem: String,
}

/// Parse PEM-encoded data and return the DER bytes
pub fn parse_pem(pem_data: &str) -> Result<Vec<u8>> {
    let pem_obj = ::pem::parse(pem_data.as_bytes())
        .map_err(|e| PkiError::ParseError(format!("failed to parse PEM: {}", e)))?;
    Ok(pem_obj.contents().to_vec())
}

/// Permitted DNS domains for a root generated for `domain`
pub fn permitted_dns_domains(domain: &str) -> Vec<String> {
    vec![
        domain.to_string(),
        format!(".{}", domain),
        "localhost".to_string(),
        ".localhost".to_string(),
        CA_SERVICE_ALIAS.to_string(),
    ]
}

/// Permitted IP ranges for every root: loopback v4/v6 and TEST-NET-1
pub fn permitted_ip_ranges() -> Vec<(IpAddr, u8)> {
    vec![
        (IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 32),
        (IpAddr::V6(Ipv6Addr::LOCALHOST), 128),
        (IpAddr::V4(Ipv4Addr::new(192, 0, 2, 0)), 24),
    ]
}

/// Generate the self-signed root CA and write it to disk.
///
/// The certificate is written 0644 and the key 0600. Existing files are
/// overwritten.
pub fn generate_root(domain: &str, cert_path: &Path, key_path: &Path) -> Result<CaMaterial> {
    let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).map_err(|e| {
        PkiError::KeyGenerationFailed(format!("failed to generate root CA key: {}", e))
    })?;

    let mut params = CertificateParams::default();
    params.serial_number = Some(random_serial());
    params.distinguished_name =
        distinguished_name(&format!("{} Root CA ({})", ORGANIZATION, host_name()));
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

    let (not_before, not_after) = compute_validity(CA_VALIDITY_DAYS);
    params.not_before = not_before;
    params.not_after = not_after;

    let mut permitted: Vec<GeneralSubtree> = permitted_dns_domains(domain)
        .into_iter()
        .map(GeneralSubtree::DnsName)
        .collect();
    permitted.extend(
        permitted_ip_ranges()
            .into_iter()
            .map(|(addr, prefix)| GeneralSubtree::IpAddress(cidr_subnet(addr, prefix))),
    );
    params.name_constraints = Some(NameConstraints {
        permitted_subtrees: permitted,
        excluded_subtrees: Vec::new(),
    });

    let cert = params.self_signed(&key_pair).map_err(|e| {
        PkiError::CertificateGenerationFailed(format!("failed to create root CA cert: {}", e))
    })?;

    let material = CaMaterial {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    };
    write_material(&material, cert_path, key_path)?;
    Ok(material)
}

/// Generate an intermediate CA for `service`, signed by the root on disk.
///
/// Fails if the root material is unreadable, malformed, or the root key is
/// not ECDSA P-256.
pub fn generate_intermediate(
    root_cert_path: &Path,
    root_key_path: &Path,
    service: &str,
    cert_path: &Path,
    key_path: &Path,
) -> Result<CaMaterial> {
    let root_cert_pem = read_to_string(root_cert_path)?;
    let root_key_pem = read_to_string(root_key_path)?;

    // Reject garbage before handing it to the issuer
    let root_der = parse_pem(&root_cert_pem)?;
    X509Certificate::from_der(&root_der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse root certificate: {}", e)))?;

    let root_key = KeyPair::from_pem(&root_key_pem)
        .map_err(|e| PkiError::ParseError(format!("failed to parse root private key: {}", e)))?;
    if root_key.algorithm() != &PKCS_ECDSA_P256_SHA256 {
        return Err(PkiError::UnsupportedKeyType(format!(
            "{:?}",
            root_key.algorithm()
        )));
    }

    let issuer = Issuer::from_ca_cert_pem(&root_cert_pem, &root_key)
        .map_err(|e| PkiError::ParseError(format!("failed to load root CA: {}", e)))?;

    let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).map_err(|e| {
        PkiError::KeyGenerationFailed(format!("failed to generate intermediate key: {}", e))
    })?;

    let mut params = CertificateParams::default();
    params.serial_number = Some(random_serial());
    params.distinguished_name =
        distinguished_name(&format!("{} Intermediate CA ({})", ORGANIZATION, service));
    params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
    ];
    params.use_authority_key_identifier_extension = true;

    let (not_before, not_after) = compute_validity(CA_VALIDITY_DAYS);
    params.not_before = not_before;
    params.not_after = not_after;

    let cert = params.signed_by(&key_pair, &issuer).map_err(|e| {
        PkiError::CertificateGenerationFailed(format!(
            "failed to sign intermediate for {}: {}",
            service, e
        ))
    })?;

    let material = CaMaterial {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    };
    write_material(&material, cert_path, key_path)?;
    Ok(material)
}

/// Parsed view of a certificate, used by `status` and `ca show`
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    /// Subject common name
    pub common_name: String,
    /// Full subject, RFC 4514 style
    pub subject: String,
    /// Full issuer, RFC 4514 style
    pub issuer: String,
    /// Serial number as colon-separated hex
    pub serial: String,
    /// When the certificate becomes valid (Unix timestamp)
    pub not_before: i64,
    /// When the certificate expires (Unix timestamp)
    pub not_after: i64,
    /// Basic constraints CA flag
    pub is_ca: bool,
    /// Basic constraints path length, if constrained
    pub max_path_len: Option<u32>,
    /// Permitted DNS name constraints
    pub permitted_dns: Vec<String>,
    /// Permitted IP range constraints as CIDR strings
    pub permitted_ip_ranges: Vec<String>,
    /// Whether the name constraints extension is marked critical
    pub name_constraints_critical: bool,
    /// keyCertSign bit
    pub key_cert_sign: bool,
    /// cRLSign bit
    pub crl_sign: bool,
    /// digitalSignature bit
    pub digital_signature: bool,
}

impl CertificateInfo {
    /// Parse certificate info from a PEM-encoded certificate
    pub fn from_pem(pem_data: &str) -> Result<Self> {
        let der = parse_pem(pem_data)?;
        Self::from_der(&der)
    }

    /// Parse certificate info from a certificate file
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_pem(&read_to_string(path)?)
    }

    /// Parse certificate info from a DER-encoded certificate
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {}", e)))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or("")
            .to_string();

        let (is_ca, max_path_len) = match cert.basic_constraints() {
            Ok(Some(bc)) => (bc.value.ca, bc.value.path_len_constraint),
            _ => (false, None),
        };

        let (key_cert_sign, crl_sign, digital_signature) = match cert.key_usage() {
            Ok(Some(ku)) => (
                ku.value.key_cert_sign(),
                ku.value.crl_sign(),
                ku.value.digital_signature(),
            ),
            _ => (false, false, false),
        };

        let mut permitted_dns = Vec::new();
        let mut permitted_ip_ranges = Vec::new();
        let mut name_constraints_critical = false;
        for ext in cert.extensions() {
            if let ParsedExtension::NameConstraints(nc) = ext.parsed_extension() {
                name_constraints_critical = ext.critical;
                for subtree in nc.permitted_subtrees.iter().flatten() {
                    match &subtree.base {
                        GeneralName::DNSName(name) => permitted_dns.push(name.to_string()),
                        GeneralName::IPAddress(bytes) => {
                            if let Some(cidr) = format_ip_constraint(bytes) {
                                permitted_ip_ranges.push(cidr);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        Ok(Self {
            common_name,
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            serial: cert.raw_serial_as_string(),
            not_before: cert.validity().not_before.timestamp(),
            not_after: cert.validity().not_after.timestamp(),
            is_ca,
            max_path_len,
            permitted_dns,
            permitted_ip_ranges,
            name_constraints_critical,
            key_cert_sign,
            crl_sign,
            digital_signature,
        })
    }

    /// Whole days until expiry; negative once expired
    pub fn days_remaining(&self) -> i64 {
        let now = ::time::OffsetDateTime::now_utc().unix_timestamp();
        (self.not_after - now) / 86_400
    }

    /// Check if the certificate has expired
    pub fn is_expired(&self) -> bool {
        ::time::OffsetDateTime::now_utc().unix_timestamp() > self.not_after
    }

    /// Check if the certificate is not yet valid
    pub fn is_not_yet_valid(&self) -> bool {
        ::time::OffsetDateTime::now_utc().unix_timestamp() < self.not_before
    }
}

/// Verify that `cert_pem` carries a valid signature from `issuer_pem`
pub fn verify_signed_by(cert_pem: &str, issuer_pem: &str) -> Result<bool> {
    let cert_der = parse_pem(cert_pem)?;
    let issuer_der = parse_pem(issuer_pem)?;
    let (_, cert) = X509Certificate::from_der(&cert_der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {}", e)))?;
    let (_, issuer) = X509Certificate::from_der(&issuer_der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse issuer: {}", e)))?;
    Ok(cert.verify_signature(Some(issuer.public_key())).is_ok())
}

/// Compute certificate validity period from now
fn compute_validity(days: i64) -> (::time::OffsetDateTime, ::time::OffsetDateTime) {
    let now = ::time::OffsetDateTime::now_utc();
    (now, now + ::time::Duration::days(days))
}

fn random_serial() -> SerialNumber {
    let mut bytes = [0u8; SERIAL_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    SerialNumber::from_slice(&bytes)
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(common_name.to_string()));
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String(ORGANIZATION.to_string()),
    );
    dn
}

fn cidr_subnet(addr: IpAddr, prefix: u8) -> CidrSubnet {
    match addr {
        IpAddr::V4(v4) => {
            let mask = u32::MAX
                .checked_shl(32 - u32::from(prefix.min(32)))
                .unwrap_or(0);
            CidrSubnet::V4(v4.octets(), mask.to_be_bytes())
        }
        IpAddr::V6(v6) => {
            let mask = u128::MAX
                .checked_shl(128 - u32::from(prefix.min(128)))
                .unwrap_or(0);
            CidrSubnet::V6(v6.octets(), mask.to_be_bytes())
        }
    }
}

/// Format an `address || mask` name-constraint value as CIDR
fn format_ip_constraint(bytes: &[u8]) -> Option<String> {
    match bytes.len() {
        8 => {
            let addr = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
            let prefix: u32 = bytes[4..].iter().map(|b| b.count_ones()).sum();
            Some(format!("{}/{}", addr, prefix))
        }
        32 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&bytes[..16]);
            let prefix: u32 = bytes[16..].iter().map(|b| b.count_ones()).sum();
            Some(format!("{}/{}", Ipv6Addr::from(octets), prefix))
        }
        _ => None,
    }
}

fn host_name() -> String {
    fs::read_to_string("/proc/sys/kernel/hostname")
        .or_else(|_| fs::read_to_string("/etc/hostname"))
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "localhost".to_string())
}

fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| PkiError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn write_material(material: &CaMaterial, cert_path: &Path, key_path: &Path) -> Result<()> {
    write_file(cert_path, material.cert_pem.as_bytes(), PUBLIC_FILE_MODE)?;
    write_file(key_path, material.key_pem.as_bytes(), SECRET_FILE_MODE)?;
    Ok(())
}
