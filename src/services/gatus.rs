//! Gatus: health dashboard over the other services

use serde_json::json;

use super::{ServiceAdapter, ServiceContext, CONTAINER_CA_PATH};
use crate::files::{write_file, PUBLIC_FILE_MODE};
use crate::mirror::REGISTRY_PORT;
use crate::runtime::{Mount, PortMapping, ServiceDescriptor};
use crate::Result;

/// Default Gatus image
pub const DEFAULT_IMAGE: &str = env!("DEFAULT_GATUS_IMAGE");

/// Network hostname of the dashboard
pub const HOSTNAME: &str = "gatus";

/// Port the dashboard listens on
pub const PORT: u16 = 8080;

const SERVICE: &str = "gatus";

/// One monitored endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Display name
    pub name: String,
    /// URL checked
    pub url: String,
    /// Skip TLS verification
    pub insecure: bool,
}

impl Endpoint {
    fn new(name: &str, url: String) -> Self {
        Self {
            name: name.to_string(),
            url,
            insecure: false,
        }
    }
}

/// Endpoints monitored for an environment whose cluster node is `control_plane`
pub fn endpoints(control_plane: &str) -> Vec<Endpoint> {
    vec![
        Endpoint::new(
            "Step CA",
            format!(
                "https://{}:{}/health",
                super::stepca::HOSTNAME,
                super::stepca::PORT
            ),
        ),
        Endpoint::new(
            "Zot Registry",
            format!("http://{}:{}/v2/", super::zot::HOSTNAME, REGISTRY_PORT),
        ),
        Endpoint {
            insecure: true,
            ..Endpoint::new(
                "Kubernetes API",
                format!("https://{}:6443/livez", control_plane),
            )
        },
    ]
}

/// Render `config.yaml`
pub fn config_yaml(endpoints: &[Endpoint]) -> Result<String> {
    let endpoints: Vec<_> = endpoints
        .iter()
        .map(|e| {
            let mut entry = json!({
                "name": e.name,
                "url": e.url,
                "interval": "30s",
                "conditions": ["[STATUS] == 200"]
            });
            if e.insecure {
                entry["client"] = json!({"insecure": true});
            }
            entry
        })
        .collect();

    let config = json!({
        "endpoints": endpoints,
        "web": {"port": PORT}
    });
    Ok(serde_yaml::to_string(&config)?)
}

/// Gatus adapter
#[derive(Debug, Clone)]
pub struct Gatus {
    /// Container image
    pub image: String,
}

impl Default for Gatus {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
        }
    }
}

impl ServiceAdapter for Gatus {
    fn name(&self) -> &'static str {
        SERVICE
    }

    fn prepare(&self, ctx: &ServiceContext) -> Result<ServiceDescriptor> {
        let config_path = ctx.service_dir(SERVICE).join("config.yaml");
        let yaml = config_yaml(&endpoints(&ctx.control_plane_host()))?;
        write_file(&config_path, yaml.as_bytes(), PUBLIC_FILE_MODE)?;

        let mut descriptor = ctx.base_descriptor(SERVICE, &self.image, HOSTNAME);
        descriptor.ports = vec![PortMapping::exposed(PORT)];
        descriptor.mounts = vec![
            Mount::bind(config_path, "/config/config.yaml"),
            Mount::read_only(&ctx.ca_cert, CONTAINER_CA_PATH),
        ];
        Ok(descriptor)
    }
}
