//! Zot: local OCI registry and pull-through cache
//!
//! Every configured upstream is synced on demand into a storage prefix named
//! after the upstream registry, matching the mirror URLs containerd is given.

use std::time::Duration;

use serde_json::json;
use tracing::{debug, info};

use super::{ServiceAdapter, ServiceContext};
use crate::files::{ensure_dir, write_file, PUBLIC_DIR_MODE, PUBLIC_FILE_MODE};
use crate::mirror::{mirror_path, upstream_server, REGISTRY_PORT};
use crate::poll::wait_with_timeout;
use crate::runtime::{Mount, PortMapping, ServiceDescriptor};
use crate::{Error, Result};

/// Default Zot image
pub const DEFAULT_IMAGE: &str = env!("DEFAULT_ZOT_IMAGE");

/// Network hostname of the registry
pub const HOSTNAME: &str = "zot";

/// Registry API root as reached from the host
pub const READY_URL: &str = "http://localhost:5000/v2/";

/// How long to wait for the registry API to answer
pub const READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay between readiness checks
pub const READY_INTERVAL: Duration = Duration::from_millis(500);

/// Timeout of a single readiness request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

const SERVICE: &str = "zot";
const CONFIG_DIR: &str = "/etc/zot";
const STORAGE_DIR: &str = "/var/lib/registry";

/// Render the registry's `config.json`
pub fn config_json(mirrors: &[String]) -> Result<String> {
    let registries: Vec<_> = mirrors
        .iter()
        .map(|registry| {
            json!({
                "urls": [upstream_server(registry)],
                "onDemand": true,
                "tlsVerify": true,
                "maxRetries": 3,
                "retryDelay": "5m",
                "content": [
                    {"prefix": "**", "destination": mirror_path(registry)}
                ]
            })
        })
        .collect();

    let config = json!({
        "distSpecVersion": "1.1.0",
        "storage": {"rootDirectory": STORAGE_DIR},
        "http": {
            "address": "0.0.0.0",
            "port": REGISTRY_PORT.to_string(),
            "compat": ["docker2s2"]
        },
        "log": {"level": "info"},
        "extensions": {
            "search": {"enable": true},
            "ui": {"enable": true},
            "sync": {
                "enable": true,
                "registries": registries
            }
        }
    });
    Ok(serde_json::to_string_pretty(&config)?)
}

/// Zot adapter
#[derive(Debug, Clone)]
pub struct Zot {
    /// Container image
    pub image: String,
    /// Upstream registries to cache
    pub mirrors: Vec<String>,
}

impl Zot {
    /// Adapter with the default image
    pub fn new(mirrors: Vec<String>) -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            mirrors,
        }
    }
}

impl ServiceAdapter for Zot {
    fn name(&self) -> &'static str {
        SERVICE
    }

    fn prepare(&self, ctx: &ServiceContext) -> Result<ServiceDescriptor> {
        let dir = ctx.service_dir(SERVICE);
        let data = dir.join("data");
        ensure_dir(&data, PUBLIC_DIR_MODE)?;

        write_file(
            &dir.join("config.json"),
            config_json(&self.mirrors)?.as_bytes(),
            PUBLIC_FILE_MODE,
        )?;

        let mut descriptor = ctx.base_descriptor(SERVICE, &self.image, HOSTNAME);
        descriptor.command = vec!["serve".to_string(), format!("{}/config.json", CONFIG_DIR)];
        descriptor.ports =
            vec![PortMapping::published(REGISTRY_PORT, REGISTRY_PORT).on_host_ip("0.0.0.0")];
        descriptor.mounts = vec![Mount::bind(&dir, CONFIG_DIR), Mount::bind(data, STORAGE_DIR)];
        Ok(descriptor)
    }
}

/// Poll the registry API until it answers 200 OK or `timeout` passes
pub async fn wait_ready(url: &str, timeout: Duration) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| Error::registry(format!("failed to build HTTP client: {}", e)))?;

    info!("Waiting for registry at {}", url);
    wait_with_timeout(timeout, READY_INTERVAL, "registry to become ready", || {
        let client = client.clone();
        async move {
            match client.get(url).send().await {
                Ok(resp) if resp.status() == reqwest::StatusCode::OK => Ok(Some(())),
                Ok(resp) => {
                    debug!("Registry answered {}", resp.status());
                    Ok(None)
                }
                Err(e) => {
                    debug!("Registry not reachable yet: {}", e);
                    Ok(None)
                }
            }
        }
    })
    .await
}
