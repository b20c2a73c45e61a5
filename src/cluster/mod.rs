//! kind cluster provisioning
//!
//! The cluster joins the environment network and trusts the root CA through
//! two read-only mounts on every node: the CA certificate and the containerd
//! `certs.d` tree that routes image pulls through the local registry.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::mirror::CONTAINERD_CERTS_PATH;
use crate::runtime::ContainerRuntime;
use crate::services::CONTAINER_CA_PATH;
use crate::{Error, Result};

/// Default kind node image
pub const DEFAULT_NODE_IMAGE: &str = env!("DEFAULT_KIND_NODE_IMAGE");

/// How long `kind create cluster` waits for the control plane
pub const CREATE_WAIT: Duration = Duration::from_secs(300);

/// Network kind uses when not told otherwise
pub const DEFAULT_KIND_NETWORK: &str = "kind";

/// Environment variable steering kind onto another docker network
const NETWORK_ENV: &str = "KIND_EXPERIMENTAL_DOCKER_NETWORK";

/// containerd patch enabling per-registry `hosts.toml` configuration
pub const CONTAINERD_REGISTRY_PATCH: &str = "[plugins.\"io.containerd.grpc.v1.cri\".registry]\n  config_path = \"/etc/containerd/certs.d\"\n";

/// Inputs for cluster creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindClusterConfig {
    /// Cluster name
    pub name: String,
    /// Node image
    pub node_image: String,
    /// Docker network for the nodes
    pub network: String,
    /// Root CA mounted for system trust
    pub ca_cert: Option<PathBuf>,
    /// containerd `certs.d` tree
    pub certs_dir: Option<PathBuf>,
    /// Worker nodes besides the control plane
    pub workers: u32,
}

impl KindClusterConfig {
    /// Cluster with only a control-plane node
    pub fn new(name: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_image: DEFAULT_NODE_IMAGE.to_string(),
            network: network.into(),
            ca_cert: None,
            certs_dir: None,
            workers: 0,
        }
    }

    /// kubectl context name kind registers for this cluster
    pub fn context_name(&self) -> String {
        context_name(&self.name)
    }
}

/// kubectl context name for a kind cluster
pub fn context_name(cluster: &str) -> String {
    format!("kind-{}", cluster)
}

/// Render the kind `Cluster` config
pub fn kind_config_yaml(config: &KindClusterConfig) -> Result<String> {
    let mut mounts = Vec::new();
    if let Some(ca) = &config.ca_cert {
        mounts.push(json!({
            "hostPath": ca.display().to_string(),
            "containerPath": CONTAINER_CA_PATH,
            "readOnly": true
        }));
    }
    if let Some(certs) = &config.certs_dir {
        mounts.push(json!({
            "hostPath": certs.display().to_string(),
            "containerPath": CONTAINERD_CERTS_PATH,
            "readOnly": true
        }));
    }

    let node = |role: &str| {
        let mut node = json!({"role": role});
        if !mounts.is_empty() {
            node["extraMounts"] = json!(mounts);
        }
        node
    };

    let mut nodes = vec![node("control-plane")];
    nodes.extend((0..config.workers).map(|_| node("worker")));

    let mut cluster = json!({
        "kind": "Cluster",
        "apiVersion": "kind.x-k8s.io/v1alpha4",
        "name": config.name,
        "nodes": nodes
    });
    if config.certs_dir.is_some() {
        cluster["containerdConfigPatches"] = json!([CONTAINERD_REGISTRY_PATCH]);
    }
    Ok(serde_yaml::to_string(&cluster)?)
}

/// Narrow interface to the cluster provisioner
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterProvisioner: Send + Sync {
    /// Create a cluster and wait for its control plane
    async fn create(&self, config: &KindClusterConfig) -> Result<()>;

    /// Delete a cluster
    async fn delete(&self, name: &str) -> Result<()>;

    /// Names of existing clusters
    async fn list(&self) -> Result<Vec<String>>;

    /// Kubeconfig for a cluster
    async fn kubeconfig(&self, name: &str) -> Result<String>;
}

/// Check whether a cluster with this name exists
pub async fn cluster_exists<P: ClusterProvisioner + ?Sized>(provisioner: &P, name: &str) -> Result<bool> {
    Ok(provisioner.list().await?.iter().any(|c| c == name))
}

/// Create the cluster unless it already exists.
///
/// Returns `true` when a cluster was created.
pub async fn ensure_cluster<P: ClusterProvisioner + ?Sized>(
    provisioner: &P,
    config: &KindClusterConfig,
) -> Result<bool> {
    if cluster_exists(provisioner, &config.name).await? {
        info!("Kind cluster {} already exists", config.name);
        return Ok(false);
    }
    info!("Creating kind cluster: {}", config.name);
    provisioner.create(config).await?;
    Ok(true)
}

/// Delete the cluster if it exists
pub async fn delete_cluster<P: ClusterProvisioner + ?Sized>(provisioner: &P, name: &str) -> Result<()> {
    if !cluster_exists(provisioner, name).await? {
        debug!("Kind cluster {} does not exist", name);
        return Ok(());
    }
    info!("Deleting kind cluster: {}", name);
    provisioner.delete(name).await
}

/// Container names of the cluster's nodes
pub async fn cluster_nodes<R: ContainerRuntime + ?Sized>(runtime: &R, cluster: &str) -> Result<Vec<String>> {
    let control_plane = format!("{}-control-plane", cluster);
    let worker = format!("{}-worker", cluster);

    let mut nodes: Vec<String> = runtime
        .list_containers()
        .await?
        .into_iter()
        .flat_map(|c| c.names)
        .map(|n| n.trim_start_matches('/').to_string())
        .filter(|n| n.starts_with(&control_plane) || n.starts_with(&worker))
        .collect();
    nodes.sort();
    Ok(nodes)
}

/// [`ClusterProvisioner`] driving the `kind` binary
#[derive(Debug, Clone)]
pub struct KindCli {
    binary: String,
}

impl Default for KindCli {
    fn default() -> Self {
        Self {
            binary: "kind".to_string(),
        }
    }
}

impl KindCli {
    /// Use `kind` from `PATH`
    pub fn new() -> Self {
        Self::default()
    }

    /// `kind create cluster` reading its config from stdin.
    ///
    /// The network variable is set on the child only, never on this process.
    fn create_command(&self, config: &KindClusterConfig) -> Command {
        let wait = format!("{}s", CREATE_WAIT.as_secs());
        let mut cmd = Command::new(&self.binary);
        cmd.args([
            "create",
            "cluster",
            "--name",
            &config.name,
            "--image",
            &config.node_image,
            "--config",
            "-",
            "--wait",
            &wait,
        ]);
        if !config.network.is_empty() && config.network != DEFAULT_KIND_NETWORK {
            cmd.env(NETWORK_ENV, &config.network);
        }
        cmd.kill_on_drop(true);
        cmd
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await?;
        if !output.status.success() {
            return Err(Error::command_failed(format!(
                "kind {} failed: {}",
                args.iter().take(2).copied().collect::<Vec<_>>().join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl ClusterProvisioner for KindCli {
    async fn create(&self, config: &KindClusterConfig) -> Result<()> {
        let kind_config = kind_config_yaml(config)?;

        let mut child = self
            .create_command(config)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(kind_config.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(Error::command_failed(format!(
                "kind create cluster failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.run(&["delete", "cluster", "--name", name]).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let stdout = self.run(&["get", "clusters"]).await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with("No kind clusters"))
            .map(str::to_string)
            .collect())
    }

    async fn kubeconfig(&self, name: &str) -> Result<String> {
        self.run(&["get", "kubeconfig", "--name", name]).await
    }
}
