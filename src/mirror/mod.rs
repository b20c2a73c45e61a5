//! containerd registry host configuration (`certs.d/<registry>/hosts.toml`)
//!
//! The cluster's containerd reads one directory per registry. Each upstream
//! registry gets a descriptor routing pulls through the local pull-through
//! cache. The local registry itself gets a direct descriptor under both its
//! network name and `localhost:5000`.
//!
//! The mirror URL carries the *original* registry name as its path prefix.
//! The cache stores content under that prefix, so two upstreams never share
//! a storage path even when their names normalize to the same directory.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::files::{copy_file, ensure_dir, write_file, PUBLIC_DIR_MODE, PUBLIC_FILE_MODE};
use crate::Result;

/// Directory name of the generated tree under the data directory
pub const CERTS_DIR: &str = "certs.d";

/// Where the tree is mounted inside cluster nodes
pub const CONTAINERD_CERTS_PATH: &str = "/etc/containerd/certs.d";

/// Port the local registry listens on
pub const REGISTRY_PORT: u16 = 5000;

/// Canonical directory name containerd uses for a registry host
pub fn normalize_registry(registry: &str) -> &str {
    match registry {
        "registry-1.docker.io" => "docker.io",
        other => other,
    }
}

/// Canonical upstream server URL for a registry host
pub fn upstream_server(registry: &str) -> String {
    match registry {
        "docker.io" | "registry-1.docker.io" => "https://registry-1.docker.io".to_string(),
        other => format!("https://{}", other),
    }
}

/// Path prefix under which the cache stores content from `registry`
pub fn mirror_path(registry: &str) -> String {
    format!("/{}", registry)
}

/// One upstream registry routed through the local cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorDescriptor {
    /// Registry name as configured
    pub registry: String,
    /// Directory name under `certs.d`
    pub directory: String,
    /// Canonical upstream server
    pub upstream: String,
    /// Cache URL including the registry path prefix
    pub mirror_url: String,
}

impl MirrorDescriptor {
    /// Describe `registry` mirrored through `cache_url` (e.g. `http://zot:5000`)
    pub fn new(registry: &str, cache_url: &str) -> Self {
        Self {
            registry: registry.to_string(),
            directory: normalize_registry(registry).to_string(),
            upstream: upstream_server(registry),
            mirror_url: format!("{}{}", cache_url.trim_end_matches('/'), mirror_path(registry)),
        }
    }

    /// Render `hosts.toml`
    pub fn hosts_toml(&self) -> String {
        format!(
            "server = \"{}\"\n\n[host.\"{}\"]\n  capabilities = [\"pull\", \"resolve\"]\n",
            self.upstream, self.mirror_url
        )
    }
}

/// `hosts.toml` for direct access to the local registry over plain HTTP
pub fn direct_hosts_toml(registry_addr: &str) -> String {
    format!(
        "server = \"http://{addr}\"\n\n[host.\"http://{addr}\"]\n  capabilities = [\"pull\", \"resolve\", \"push\"]\n  skip_verify = true\n",
        addr = registry_addr
    )
}

/// Inputs for one regeneration of the tree
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Network hostname of the local registry
    pub registry_host: String,
    /// Upstream registries to mirror
    pub mirrors: Vec<String>,
    /// CA certificate copied next to each mirror descriptor, if any
    pub ca_cert: Option<PathBuf>,
}

impl MirrorConfig {
    /// `host:port` of the local registry on the container network
    pub fn registry_addr(&self) -> String {
        format!("{}:{}", self.registry_host, REGISTRY_PORT)
    }

    /// Base URL of the pull-through cache
    pub fn cache_url(&self) -> String {
        format!("http://{}", self.registry_addr())
    }

    /// Descriptors for every configured upstream
    pub fn descriptors(&self) -> Vec<MirrorDescriptor> {
        let cache_url = self.cache_url();
        self.mirrors
            .iter()
            .map(|r| MirrorDescriptor::new(r, &cache_url))
            .collect()
    }
}

/// Remove and regenerate `<data_dir>/certs.d`, returning its path.
///
/// Nothing from a previous run survives, so a registry dropped from the
/// configuration stops being mirrored.
pub fn write_certs_dir(data_dir: &Path, config: &MirrorConfig) -> Result<PathBuf> {
    let certs_dir = data_dir.join(CERTS_DIR);
    if certs_dir.exists() {
        debug!("Removing stale {}", certs_dir.display());
        fs::remove_dir_all(&certs_dir)?;
    }
    ensure_dir(&certs_dir, PUBLIC_DIR_MODE)?;

    let registry_addr = config.registry_addr();
    let direct = direct_hosts_toml(&registry_addr);
    let local_addr = format!("localhost:{}", REGISTRY_PORT);
    for host in [registry_addr.as_str(), local_addr.as_str()] {
        write_file(
            &certs_dir.join(host).join("hosts.toml"),
            direct.as_bytes(),
            PUBLIC_FILE_MODE,
        )?;
    }

    for descriptor in config.descriptors() {
        let dir = certs_dir.join(&descriptor.directory);
        write_file(
            &dir.join("hosts.toml"),
            descriptor.hosts_toml().as_bytes(),
            PUBLIC_FILE_MODE,
        )?;
        if let Some(ca) = &config.ca_cert {
            copy_file(ca, &dir.join("ca.crt"), PUBLIC_FILE_MODE)?;
        }
    }

    info!(
        "Wrote registry configuration for {} mirror(s) to {}",
        config.mirrors.len(),
        certs_dir.display()
    );
    Ok(certs_dir)
}
