//! Service adapters for the containers kinder runs
//!
//! Each adapter writes its configuration files under the data directory and
//! returns the [`ServiceDescriptor`] the runtime creates the container from.
//! Adapters never talk to the runtime themselves.
//!
//! | Service | Hostname | Purpose |
//! |---------|----------|---------|
//! | [`StepCa`] | `stepca` | ACME certificate authority backed by an intermediate CA |
//! | [`Zot`] | `zot` | Local registry and pull-through cache |
//! | [`Gatus`] | `gatus` | Health dashboard |
//! | [`Traefik`] | `traefik` | Reverse proxy with ACME certificates from Step CA |

use std::path::{Path, PathBuf};

use crate::runtime::ServiceDescriptor;
use crate::Result;

pub mod gatus;
pub mod stepca;
pub mod traefik;
pub mod zot;

pub use gatus::Gatus;
pub use stepca::StepCa;
pub use traefik::Traefik;
pub use zot::Zot;

/// Path inside containers where the root CA is mounted for system trust
pub const CONTAINER_CA_PATH: &str = "/etc/ssl/certs/kinder-ca.crt";

/// Settings shared by every adapter
#[derive(Debug, Clone)]
pub struct ServiceContext {
    /// Prefix for container names
    pub app_name: String,
    /// Network every container joins
    pub network: String,
    /// Root of all generated files
    pub data_dir: PathBuf,
    /// Root CA certificate
    pub ca_cert: PathBuf,
    /// Root CA private key
    pub ca_key: PathBuf,
    /// Base domain routed by the proxy
    pub domain: String,
}

impl ServiceContext {
    /// Container name for a service: `<app>-<service>`
    pub fn container_name(&self, service: &str) -> String {
        format!("{}-{}", self.app_name, service)
    }

    /// Per-service directory under the data directory
    pub fn service_dir(&self, dir: &str) -> PathBuf {
        self.data_dir.join(dir)
    }

    /// Name of the kind control-plane container for the cluster named after the app
    pub fn control_plane_host(&self) -> String {
        format!("{}-control-plane", self.app_name)
    }

    /// Start a descriptor with the fields every service shares
    fn base_descriptor(&self, service: &str, image: &str, hostname: &str) -> ServiceDescriptor {
        ServiceDescriptor {
            name: self.container_name(service),
            image: image.to_string(),
            hostname: hostname.to_string(),
            network: Some(self.network.clone()),
            aliases: vec![hostname.to_string()],
            ..Default::default()
        }
    }
}

/// A containerized service kinder manages
pub trait ServiceAdapter: Send + Sync {
    /// Short service name, used in container names and step logs
    fn name(&self) -> &'static str;

    /// Write configuration files and build the container descriptor
    fn prepare(&self, ctx: &ServiceContext) -> Result<ServiceDescriptor>;
}

/// Location of a file relative to a directory, for mounts
fn file_in(dir: &Path, name: &str) -> PathBuf {
    dir.join(name)
}
