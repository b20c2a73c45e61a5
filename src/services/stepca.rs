//! Step CA: the ACME certificate authority
//!
//! The container runs from an intermediate CA minted from the kinder root
//! every time the descriptor is prepared. The root key is copied into the
//! service directory because step-ca expects the full hierarchy under its
//! home directory.

use serde_json::json;
use tracing::info;

use super::{file_in, ServiceAdapter, ServiceContext};
use crate::files::{
    copy_file, ensure_dir, write_file, PUBLIC_DIR_MODE, PUBLIC_FILE_MODE, SECRET_DIR_MODE,
    SECRET_FILE_MODE,
};
use crate::pki;
use crate::runtime::{Mount, PortMapping, ServiceDescriptor};
use crate::Result;

/// Default Step CA image
pub const DEFAULT_IMAGE: &str = env!("DEFAULT_STEPCA_IMAGE");

/// Network hostname of the CA
pub const HOSTNAME: &str = pki::CA_SERVICE_ALIAS;

/// Port the CA listens on
pub const PORT: u16 = 9000;

/// Name of the ACME provisioner, part of the directory URL
pub const ACME_PROVISIONER: &str = "acme";

const SERVICE: &str = "step-ca";
const HOME: &str = "/home/step";

/// ACME directory URL as seen from the container network
pub fn acme_directory_url() -> String {
    format!(
        "https://{}:{}/acme/{}/directory",
        HOSTNAME, PORT, ACME_PROVISIONER
    )
}

/// Render `config/ca.json`
pub fn ca_json(dns_names: &[String]) -> Result<String> {
    let config = json!({
        "root": format!("{}/root_ca.crt", HOME),
        "federatedRoots": null,
        "crt": format!("{}/certs/intermediate_ca.crt", HOME),
        "key": format!("{}/secrets/intermediate_ca_key", HOME),
        "address": format!(":{}", PORT),
        "dnsNames": dns_names,
        "logger": {"format": "text"},
        "db": {
            "type": "badger",
            "dataSource": format!("{}/db", HOME),
        },
        "authority": {
            "provisioners": [
                {"type": "ACME", "name": ACME_PROVISIONER}
            ]
        },
        "tls": {
            "cipherSuites": [
                "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305",
                "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256"
            ],
            "minVersion": 1.2,
            "maxVersion": 1.3,
            "renegotiation": false
        }
    });
    Ok(serde_json::to_string_pretty(&config)?)
}

/// Step CA adapter
#[derive(Debug, Clone)]
pub struct StepCa {
    /// Container image
    pub image: String,
}

impl Default for StepCa {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
        }
    }
}

impl ServiceAdapter for StepCa {
    fn name(&self) -> &'static str {
        SERVICE
    }

    fn prepare(&self, ctx: &ServiceContext) -> Result<ServiceDescriptor> {
        let dir = ctx.service_dir(SERVICE);
        ensure_dir(&dir, PUBLIC_DIR_MODE)?;

        copy_file(&ctx.ca_cert, &file_in(&dir, "root_ca.crt"), PUBLIC_FILE_MODE)?;
        copy_file(&ctx.ca_key, &file_in(&dir, "root_ca_key"), SECRET_FILE_MODE)?;

        let certs = dir.join("certs");
        let secrets = dir.join("secrets");
        ensure_dir(&certs, PUBLIC_DIR_MODE)?;
        ensure_dir(&secrets, SECRET_DIR_MODE)?;

        info!("Generating intermediate CA for {}", HOSTNAME);
        pki::generate_intermediate(
            &ctx.ca_cert,
            &ctx.ca_key,
            HOSTNAME,
            &certs.join("intermediate_ca.crt"),
            &secrets.join("intermediate_ca_key"),
        )?;

        // Intermediate key is unencrypted; step-ca still wants a password file
        write_file(&secrets.join("password"), b"", SECRET_FILE_MODE)?;

        let dns_names = vec![
            HOSTNAME.to_string(),
            "localhost".to_string(),
            "*.localhost".to_string(),
        ];
        write_file(
            &dir.join("config").join("ca.json"),
            ca_json(&dns_names)?.as_bytes(),
            PUBLIC_FILE_MODE,
        )?;

        let mut descriptor = ctx.base_descriptor(SERVICE, &self.image, HOSTNAME);
        descriptor.env = vec![
            ("DOCKER_STEPCA_INIT_NAME".to_string(), "kinder".to_string()),
            ("DOCKER_STEPCA_INIT_DNS_NAMES".to_string(), HOSTNAME.to_string()),
            (
                "DOCKER_STEPCA_INIT_PROVISIONER_NAME".to_string(),
                "kinder-admin".to_string(),
            ),
        ];
        descriptor.ports = vec![PortMapping::exposed(PORT)];
        descriptor.mounts = vec![Mount::bind(dir, HOME)];
        Ok(descriptor)
    }
}
