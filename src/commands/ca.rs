//! `ca generate`, `ca show` and `ca path`

use std::fmt::Write as _;

use tracing::info;

use crate::commands::environment::ca_validity;
use crate::config::KinderConfig;
use crate::pki::{self, CertificateInfo};
use crate::{Error, Result};

/// Generate the root CA; existing material is only replaced with `force`
pub fn generate(config: &KinderConfig, force: bool) -> Result<CertificateInfo> {
    let cert_path = config.ca_cert_path()?;
    let key_path = config.ca_key_path()?;

    if !force && (cert_path.exists() || key_path.exists()) {
        return Err(Error::configuration(format!(
            "CA already exists at {}; use --force to regenerate",
            cert_path.display()
        )));
    }

    let material = pki::generate_root(&config.domain, &cert_path, &key_path)?;
    info!("Generated root CA at {}", cert_path.display());
    Ok(CertificateInfo::from_pem(&material.cert_pem)?)
}

/// Parsed root CA, if one exists
pub fn load(config: &KinderConfig) -> Result<CertificateInfo> {
    let cert_path = config.ca_cert_path()?;
    if !cert_path.exists() {
        return Err(Error::configuration(format!(
            "no CA at {}; run `kinder ca generate`",
            cert_path.display()
        )));
    }
    Ok(CertificateInfo::from_file(&cert_path)?)
}

fn format_timestamp(ts: i64) -> String {
    let format = ::time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second] UTC");
    ::time::OffsetDateTime::from_unix_timestamp(ts)
        .ok()
        .and_then(|t| t.format(&format).ok())
        .unwrap_or_else(|| ts.to_string())
}

/// Details printed by `ca show`
pub fn render(info: &CertificateInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Subject:     {}", info.subject);
    let _ = writeln!(out, "Issuer:      {}", info.issuer);
    let _ = writeln!(out, "Serial:      {}", info.serial);
    let _ = writeln!(out, "Not Before:  {}", format_timestamp(info.not_before));
    let _ = writeln!(out, "Not After:   {}", format_timestamp(info.not_after));
    let _ = writeln!(out, "Status:      {}", ca_validity(info));
    if !info.permitted_dns.is_empty() || !info.permitted_ip_ranges.is_empty() {
        let _ = writeln!(out, "Permitted:");
        for name in info.permitted_dns.iter().chain(&info.permitted_ip_ranges) {
            let _ = writeln!(out, "   {}", name);
        }
    }
    out
}
