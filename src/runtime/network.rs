//! Dedicated bridge network for the environment
//!
//! All containers and the kind nodes share one user-defined bridge network.
//! Containers are allocated from the first half of the subnet; the second
//! half stays free for load-balancer addresses handed out inside the cluster.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use tracing::{debug, info};

use super::{ContainerRuntime, NetworkSpec};
use crate::{Error, Result};

/// Default network driver
pub const DEFAULT_DRIVER: &str = "bridge";

/// A parsed CIDR block, normalized to its network address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    network: IpAddr,
    prefix: u8,
}

impl Cidr {
    /// Network address (host bits cleared)
    pub fn network(&self) -> IpAddr {
        self.network
    }

    /// Prefix length
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    fn bits(&self) -> u8 {
        match self.network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        }
    }

    /// First address after the network address
    pub fn gateway(&self) -> IpAddr {
        match self.network {
            IpAddr::V4(addr) => IpAddr::V4(Ipv4Addr::from(u32::from(addr).wrapping_add(1))),
            IpAddr::V6(addr) => IpAddr::V6(Ipv6Addr::from(u128::from(addr).wrapping_add(1))),
        }
    }

    /// Whether the block has room for two halves of at least two addresses
    pub fn can_split(&self) -> bool {
        self.prefix < self.bits() - 1
    }

    /// The first half of the block, or the whole block if it is too small to split
    pub fn first_half(&self) -> Cidr {
        if !self.can_split() {
            *self
        } else {
            Cidr {
                network: self.network,
                prefix: self.prefix + 1,
            }
        }
    }
}

/// Allocation range for `cidr`: its first half, or `cidr` exactly as given
/// when the block is too small to split
pub fn ip_range(cidr: &str) -> Result<String> {
    let parsed: Cidr = cidr.parse()?;
    if parsed.can_split() {
        Ok(parsed.first_half().to_string())
    } else {
        Ok(cidr.trim().to_string())
    }
}

impl FromStr for Cidr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::configuration(format!("invalid CIDR '{}'", s));

        let (addr, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;

        let network = match addr {
            IpAddr::V4(v4) => {
                if prefix > 32 {
                    return Err(invalid());
                }
                let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
                IpAddr::V4(Ipv4Addr::from(u32::from(v4) & mask))
            }
            IpAddr::V6(v6) => {
                if prefix > 128 {
                    return Err(invalid());
                }
                let mask = if prefix == 0 { 0 } else { u128::MAX << (128 - prefix) };
                IpAddr::V6(Ipv6Addr::from(u128::from(v6) & mask))
            }
        };

        Ok(Cidr { network, prefix })
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// User-facing network settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Network name
    pub name: String,
    /// Subnet in CIDR form
    pub cidr: String,
    /// Linux bridge name; empty means `<name>br0`
    pub bridge_name: String,
    /// Network driver
    pub driver: String,
    /// Enable IPv6
    pub enable_ipv6: bool,
}

impl NetworkConfig {
    /// Bridge network with IPv6 disabled
    pub fn new(
        name: impl Into<String>,
        cidr: impl Into<String>,
        bridge_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            cidr: cidr.into(),
            bridge_name: bridge_name.into(),
            driver: DEFAULT_DRIVER.to_string(),
            enable_ipv6: false,
        }
    }

    /// Derive gateway and allocation range into a creation request
    pub fn to_spec(&self) -> Result<NetworkSpec> {
        let cidr: Cidr = self.cidr.parse()?;
        let bridge_name = if self.bridge_name.is_empty() {
            format!("{}br0", self.name)
        } else {
            self.bridge_name.clone()
        };

        Ok(NetworkSpec {
            name: self.name.clone(),
            driver: self.driver.clone(),
            subnet: cidr.to_string(),
            gateway: cidr.gateway().to_string(),
            ip_range: ip_range(&self.cidr)?,
            bridge_name,
            enable_ipv6: self.enable_ipv6,
        })
    }
}

/// Check whether a network with this name exists
pub async fn network_exists<R: ContainerRuntime + ?Sized>(runtime: &R, name: &str) -> Result<bool> {
    let networks = runtime.list_networks().await?;
    Ok(networks.iter().any(|n| n.name == name))
}

/// Create the network unless one with the same name already exists.
///
/// Returns the network ID. An existing network is accepted as-is, even if
/// its subnet differs from `config`.
pub async fn ensure_network<R: ContainerRuntime + ?Sized>(
    runtime: &R,
    config: &NetworkConfig,
) -> Result<String> {
    let spec = config.to_spec()?;

    let networks = runtime.list_networks().await?;
    if let Some(existing) = networks.into_iter().find(|n| n.name == spec.name) {
        debug!("Network {} already exists", spec.name);
        return Ok(existing.id);
    }

    info!(
        "Creating network {} ({}, containers from {})",
        spec.name, spec.subnet, spec.ip_range
    );
    runtime.create_network(&spec).await
}

/// Remove a network by name
pub async fn remove_network<R: ContainerRuntime + ?Sized>(runtime: &R, name: &str) -> Result<()> {
    info!("Removing network {}", name);
    runtime.remove_network(name).await
}
