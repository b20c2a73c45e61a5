//! Container lifecycle over a container runtime daemon
//!
//! Every service adapter goes through the same primitive: [`ensure_container`]
//! creates a container once and starts it as many times as needed. A container
//! whose name already exists is never re-created or reconciled against a
//! changed [`ServiceDescriptor`]; it is only started if stopped.
//!
//! The daemon itself sits behind the [`ContainerRuntime`] trait. The runtime
//! handle is built once by the caller and passed into every operation.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info, warn};

use crate::Result;

pub mod docker;
pub mod network;

pub use docker::DockerCli;
pub use network::{ensure_network, network_exists, remove_network, Cidr, NetworkConfig};

/// Grace period given to a container before it is killed on stop
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// A bind mount from the host into a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Host path
    pub source: PathBuf,
    /// Path inside the container
    pub target: String,
    /// Mount read-only
    pub read_only: bool,
}

impl Mount {
    /// Read-write bind mount
    pub fn bind(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }

    /// Read-only bind mount
    pub fn read_only(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            read_only: true,
            ..Self::bind(source, target)
        }
    }
}

/// A container port, optionally published on the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    /// TCP port inside the container
    pub container_port: u16,
    /// Host port to publish on; `None` only exposes the port on the network
    pub host_port: Option<u16>,
    /// Host address to bind; `None` lets the daemon pick
    pub host_ip: Option<String>,
}

impl PortMapping {
    /// Expose a port on the container network without publishing it
    pub fn exposed(container_port: u16) -> Self {
        Self {
            container_port,
            host_port: None,
            host_ip: None,
        }
    }

    /// Publish a container port on a host port
    pub fn published(container_port: u16, host_port: u16) -> Self {
        Self {
            container_port,
            host_port: Some(host_port),
            host_ip: None,
        }
    }

    /// Bind the published port to a specific host address
    pub fn on_host_ip(mut self, ip: impl Into<String>) -> Self {
        self.host_ip = Some(ip.into());
        self
    }
}

/// Container restart policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartPolicy {
    /// Never restart
    No,
    /// Restart unless explicitly stopped
    #[default]
    UnlessStopped,
}

impl RestartPolicy {
    /// Name understood by the daemon
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartPolicy::No => "no",
            RestartPolicy::UnlessStopped => "unless-stopped",
        }
    }
}

/// Declarative input to container creation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceDescriptor {
    /// Globally unique container name
    pub name: String,
    /// Image reference
    pub image: String,
    /// Container hostname
    pub hostname: String,
    /// Network to attach to
    pub network: Option<String>,
    /// DNS aliases on that network
    pub aliases: Vec<String>,
    /// Environment variables, in order
    pub env: Vec<(String, String)>,
    /// Bind mounts
    pub mounts: Vec<Mount>,
    /// Exposed and published ports
    pub ports: Vec<PortMapping>,
    /// Command arguments passed to the image entrypoint
    pub command: Vec<String>,
    /// Restart policy
    pub restart: RestartPolicy,
}

/// One row of the container listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    /// Container ID
    pub id: String,
    /// Names as reported by the daemon, possibly with a leading `/`
    pub names: Vec<String>,
    /// Daemon state (running, exited, created, ...)
    pub state: String,
}

/// Inspected container state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerDetails {
    /// Container ID
    pub id: String,
    /// Container name without leading `/`
    pub name: String,
    /// Whether the container is running
    pub running: bool,
    /// Daemon status string
    pub status: String,
    /// Attached networks and the container's address on each
    pub networks: BTreeMap<String, String>,
}

/// One row of the network listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSummary {
    /// Network ID
    pub id: String,
    /// Network name
    pub name: String,
    /// Driver
    pub driver: String,
}

/// Fully derived network creation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSpec {
    /// Network name
    pub name: String,
    /// Network driver
    pub driver: String,
    /// Subnet in CIDR form
    pub subnet: String,
    /// Gateway address
    pub gateway: String,
    /// Range containers are allocated from
    pub ip_range: String,
    /// Linux bridge interface name
    pub bridge_name: String,
    /// Enable IPv6
    pub enable_ipv6: bool,
}

/// Narrow interface to the container runtime daemon
///
/// This trait abstracts the daemon for testability.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List all containers, running or not
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>>;

    /// Inspect a container by name or ID
    async fn inspect_container(&self, name: &str) -> Result<ContainerDetails>;

    /// Pull an image, blocking until it is available locally
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Create (but do not start) a container, returning its ID
    async fn create_container(&self, descriptor: &ServiceDescriptor) -> Result<String>;

    /// Start a container by name or ID
    async fn start_container(&self, name: &str) -> Result<()>;

    /// Stop a container, killing it after `grace`
    async fn stop_container(&self, name: &str, grace: Duration) -> Result<()>;

    /// Remove a container
    async fn remove_container(&self, name: &str, force: bool) -> Result<()>;

    /// List networks
    async fn list_networks(&self) -> Result<Vec<NetworkSummary>>;

    /// Create a network, returning its ID
    async fn create_network(&self, spec: &NetworkSpec) -> Result<String>;

    /// Remove a network by name
    async fn remove_network(&self, name: &str) -> Result<()>;
}

/// True when a daemon-reported name refers to `name` (`/name` or `name`)
pub fn name_matches(reported: &str, name: &str) -> bool {
    reported == name || reported.strip_prefix('/') == Some(name)
}

/// Find a container by exact name
pub async fn find_container<R: ContainerRuntime + ?Sized>(
    runtime: &R,
    name: &str,
) -> Result<Option<ContainerSummary>> {
    let containers = runtime.list_containers().await?;
    Ok(containers
        .into_iter()
        .find(|c| c.names.iter().any(|n| name_matches(n, name))))
}

/// Check whether a container with this name exists
pub async fn container_exists<R: ContainerRuntime + ?Sized>(runtime: &R, name: &str) -> Result<bool> {
    Ok(find_container(runtime, name).await?.is_some())
}

/// Address of a container on `network`, if it is attached and running
pub async fn container_ip<R: ContainerRuntime + ?Sized>(
    runtime: &R,
    name: &str,
    network: &str,
) -> Result<Option<String>> {
    if find_container(runtime, name).await?.is_none() {
        return Ok(None);
    }
    let details = runtime.inspect_container(name).await?;
    Ok(details
        .networks
        .get(network)
        .filter(|ip| !ip.is_empty())
        .cloned())
}

/// Start the container named `name` if it exists and is stopped.
///
/// Returns its ID, or `None` when no such container exists.
pub async fn start_existing<R: ContainerRuntime + ?Sized>(
    runtime: &R,
    name: &str,
) -> Result<Option<String>> {
    let Some(existing) = find_container(runtime, name).await? else {
        return Ok(None);
    };
    let details = runtime.inspect_container(&existing.id).await?;
    if details.running {
        debug!("Container {} already running", name);
    } else {
        info!("Starting existing container {}", name);
        runtime.start_container(&existing.id).await?;
    }
    Ok(Some(existing.id))
}

/// Create and start a container, or start the existing one with that name.
///
/// Returns the container ID. An existing container keeps its original
/// configuration. The image is pulled before creation; a pull failure
/// aborts before any container object exists.
pub async fn ensure_container<R: ContainerRuntime + ?Sized>(
    runtime: &R,
    descriptor: &ServiceDescriptor,
) -> Result<String> {
    if let Some(id) = start_existing(runtime, &descriptor.name).await? {
        return Ok(id);
    }

    info!("Pulling image {}", descriptor.image);
    runtime.pull_image(&descriptor.image).await?;

    info!("Creating container {}", descriptor.name);
    let id = runtime.create_container(descriptor).await?;
    runtime.start_container(&id).await?;
    Ok(id)
}

/// Stop and remove a container.
///
/// A failed stop is logged and the container is force-removed anyway.
pub async fn remove_container<R: ContainerRuntime + ?Sized>(runtime: &R, name: &str) -> Result<()> {
    if let Err(e) = runtime.stop_container(name, STOP_GRACE_PERIOD).await {
        warn!("Failed to stop container {}: {}", name, e);
    }
    runtime.remove_container(name, true).await
}
