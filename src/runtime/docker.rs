//! [`ContainerRuntime`] backed by the `docker` CLI
//!
//! Each trait method maps to one `docker` invocation. Listings use Go
//! templates with tab-separated fields; inspection parses the JSON array
//! `docker inspect` prints.

use std::collections::BTreeMap;
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use super::{
    ContainerDetails, ContainerRuntime, ContainerSummary, NetworkSpec, NetworkSummary,
    ServiceDescriptor,
};
use crate::{Error, Result};

/// Go template for `docker ps`
const PS_FORMAT: &str = "{{.ID}}\t{{.Names}}\t{{.State}}";

/// Go template for `docker network ls`
const NETWORK_LS_FORMAT: &str = "{{.ID}}\t{{.Name}}\t{{.Driver}}";

/// Docker option naming the Linux bridge interface of a network
const BRIDGE_NAME_OPTION: &str = "com.docker.network.bridge.name";

/// Container runtime that shells out to the `docker` binary
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerCli {
    /// Use `docker` from `PATH`
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Use a specific docker-compatible binary
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run `docker <args>` and return its output, failing on non-zero exit
    async fn run(&self, args: &[String]) -> Result<Output> {
        debug!("Running {} {}", self.binary, args.join(" "));
        let output = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::runtime(format!("failed to run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            let subcommand = args.first().map(String::as_str).unwrap_or_default();
            return Err(Error::runtime(format!(
                "{} {} failed: {}",
                self.binary,
                subcommand,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output)
    }

    async fn run_stdout(&self, args: &[String]) -> Result<String> {
        let output = self.run(args).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn to_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Arguments for `docker create` from a descriptor
pub fn create_args(descriptor: &ServiceDescriptor) -> Vec<String> {
    let mut args = to_args(&["create", "--name", &descriptor.name]);

    if !descriptor.hostname.is_empty() {
        args.push("--hostname".to_string());
        args.push(descriptor.hostname.clone());
    }

    if let Some(network) = &descriptor.network {
        args.push("--network".to_string());
        args.push(network.clone());
        for alias in &descriptor.aliases {
            args.push("--network-alias".to_string());
            args.push(alias.clone());
        }
    }

    args.push("--restart".to_string());
    args.push(descriptor.restart.as_str().to_string());

    for (key, value) in &descriptor.env {
        args.push("--env".to_string());
        args.push(format!("{}={}", key, value));
    }

    for mount in &descriptor.mounts {
        let mut spec = format!("{}:{}", mount.source.display(), mount.target);
        if mount.read_only {
            spec.push_str(":ro");
        }
        args.push("--volume".to_string());
        args.push(spec);
    }

    for port in &descriptor.ports {
        match port.host_port {
            Some(host_port) => {
                let binding = match &port.host_ip {
                    Some(ip) => format!("{}:{}:{}", ip, host_port, port.container_port),
                    None => format!("{}:{}", host_port, port.container_port),
                };
                args.push("--publish".to_string());
                args.push(binding);
            }
            None => {
                args.push("--expose".to_string());
                args.push(port.container_port.to_string());
            }
        }
    }

    args.push(descriptor.image.clone());
    args.extend(descriptor.command.iter().cloned());
    args
}

/// Arguments for `docker network create` from a spec
pub fn network_create_args(spec: &NetworkSpec) -> Vec<String> {
    let mut args = to_args(&[
        "network",
        "create",
        "--driver",
        &spec.driver,
        "--subnet",
        &spec.subnet,
        "--gateway",
        &spec.gateway,
        "--ip-range",
        &spec.ip_range,
    ]);
    if !spec.bridge_name.is_empty() {
        args.push("--opt".to_string());
        args.push(format!("{}={}", BRIDGE_NAME_OPTION, spec.bridge_name));
    }
    if spec.enable_ipv6 {
        args.push("--ipv6".to_string());
    }
    args.push(spec.name.clone());
    args
}

/// Parse `docker ps` output produced with [`PS_FORMAT`]
pub fn parse_ps_output(stdout: &str) -> Vec<ContainerSummary> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let id = fields.next()?.trim();
            let names = fields.next()?.trim();
            let state = fields.next().unwrap_or_default().trim();
            if id.is_empty() {
                return None;
            }
            Some(ContainerSummary {
                id: id.to_string(),
                names: names
                    .split(',')
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
                    .collect(),
                state: state.to_string(),
            })
        })
        .collect()
}

/// Parse `docker network ls` output produced with [`NETWORK_LS_FORMAT`]
pub fn parse_network_ls_output(stdout: &str) -> Vec<NetworkSummary> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let id = fields.next()?.trim();
            let name = fields.next()?.trim();
            let driver = fields.next().unwrap_or_default().trim();
            if id.is_empty() || name.is_empty() {
                return None;
            }
            Some(NetworkSummary {
                id: id.to_string(),
                name: name.to_string(),
                driver: driver.to_string(),
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedContainer {
    id: String,
    #[serde(default)]
    name: String,
    state: InspectedState,
    #[serde(default)]
    network_settings: InspectedNetworkSettings,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedState {
    #[serde(default)]
    status: String,
    #[serde(default)]
    running: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedNetworkSettings {
    #[serde(default)]
    networks: Option<BTreeMap<String, InspectedEndpoint>>,
}

#[derive(Debug, Deserialize)]
struct InspectedEndpoint {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

/// Parse the JSON array printed by `docker inspect <container>`
pub fn parse_inspect_output(stdout: &str) -> Result<ContainerDetails> {
    let mut containers: Vec<InspectedContainer> = serde_json::from_str(stdout)?;
    if containers.is_empty() {
        return Err(Error::runtime("docker inspect returned no containers"));
    }
    let inspected = containers.swap_remove(0);

    let networks = inspected
        .network_settings
        .networks
        .unwrap_or_default()
        .into_iter()
        .map(|(name, endpoint)| (name, endpoint.ip_address))
        .collect();

    Ok(ContainerDetails {
        id: inspected.id,
        name: inspected.name.trim_start_matches('/').to_string(),
        running: inspected.state.running,
        status: inspected.state.status,
        networks,
    })
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let stdout = self
            .run_stdout(&to_args(&["ps", "--all", "--no-trunc", "--format", PS_FORMAT]))
            .await?;
        Ok(parse_ps_output(&stdout))
    }

    async fn inspect_container(&self, name: &str) -> Result<ContainerDetails> {
        let stdout = self
            .run_stdout(&to_args(&["container", "inspect", name]))
            .await?;
        parse_inspect_output(&stdout)
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        self.run(&to_args(&["pull", "--quiet", image])).await?;
        Ok(())
    }

    async fn create_container(&self, descriptor: &ServiceDescriptor) -> Result<String> {
        let id = self.run_stdout(&create_args(descriptor)).await?;
        if id.is_empty() {
            return Err(Error::runtime(format!(
                "docker create returned no ID for {}",
                descriptor.name
            )));
        }
        Ok(id)
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        self.run(&to_args(&["start", name])).await?;
        Ok(())
    }

    async fn stop_container(&self, name: &str, grace: Duration) -> Result<()> {
        let seconds = grace.as_secs().to_string();
        self.run(&to_args(&["stop", "--time", &seconds, name]))
            .await?;
        Ok(())
    }

    async fn remove_container(&self, name: &str, force: bool) -> Result<()> {
        let mut args = to_args(&["rm"]);
        if force {
            args.push("--force".to_string());
        }
        args.push(name.to_string());
        self.run(&args).await?;
        Ok(())
    }

    async fn list_networks(&self) -> Result<Vec<NetworkSummary>> {
        let stdout = self
            .run_stdout(&to_args(&[
                "network",
                "ls",
                "--no-trunc",
                "--format",
                NETWORK_LS_FORMAT,
            ]))
            .await?;
        Ok(parse_network_ls_output(&stdout))
    }

    async fn create_network(&self, spec: &NetworkSpec) -> Result<String> {
        self.run_stdout(&network_create_args(spec)).await
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        self.run(&to_args(&["network", "rm", name])).await?;
        Ok(())
    }
}
