//! Layered configuration
//!
//! Values resolve in order of precedence: command-line flags, `KINDER_*`
//! environment variables, the YAML config file, built-in defaults. The file
//! lives at `$XDG_CONFIG_HOME/kinder/config.yaml` unless `--config` points
//! elsewhere; a missing default file is not an error.
//!
//! Environment keys are the dotted config keys upper-cased with `.` replaced
//! by `_`: `traefik.port` is `KINDER_TRAEFIK_PORT`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bundle::{IssuerOptions, TrustManagerOptions, MOZILLA_BUNDLE_URL};
use crate::cluster::{self, KindClusterConfig};
use crate::gitops::{self, ArgoCdConfig, GitCredentials, RepositoryConfig};
use crate::orchestrator::Plan;
use crate::runtime::{Cidr, NetworkConfig};
use crate::services::{gatus, stepca, traefik, zot, Gatus, StepCa, Traefik, Zot};
use crate::{Error, Result};

/// Default application name; prefixes containers and names the cluster
pub const DEFAULT_APP_NAME: &str = "kinder";

/// Default base domain; resolves to 192.0.2.1 through sslip.io
pub const DEFAULT_DOMAIN: &str = "c0000201.sslip.io";

/// Default environment subnet
pub const DEFAULT_NETWORK_CIDR: &str = "172.28.28.0/24";

/// Manifest applied after ArgoCD is bootstrapped
pub const DEFAULT_ARGOCD_MANIFEST_URL: &str =
    "https://raw.githubusercontent.com/mattwillsher/kinder-argo/refs/heads/main/root-app.yaml";

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "KINDER_";

/// Root CA certificate file name in the data directory
pub const CA_CERT_FILE: &str = "ca.crt";

/// Root CA key file name in the data directory
pub const CA_KEY_FILE: &str = "ca.key";

/// Registries mirrored through the local cache by default
pub fn default_registry_mirrors() -> Vec<String> {
    ["ghcr.io", "registry-1.docker.io", "quay.io", "registry.k8s.io"]
        .iter()
        .map(|r| r.to_string())
        .collect()
}

/// Container network settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NetworkSettings {
    /// Network name; defaults to the app name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Subnet in CIDR form
    pub cidr: String,
    /// Linux bridge name; defaults to `<network>br0`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge: Option<String>,
}

/// Reverse proxy settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TraefikSettings {
    /// Host port HTTPS is published on
    pub port: u16,
}

impl Default for TraefikSettings {
    fn default() -> Self {
        Self {
            port: traefik::DEFAULT_HTTPS_PORT,
        }
    }
}

/// Container images
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImageSettings {
    /// Step CA image
    pub stepca: String,
    /// Zot image
    pub zot: String,
    /// Gatus image
    pub gatus: String,
    /// Traefik image
    pub traefik: String,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            stepca: stepca::DEFAULT_IMAGE.to_string(),
            zot: zot::DEFAULT_IMAGE.to_string(),
            gatus: gatus::DEFAULT_IMAGE.to_string(),
            traefik: traefik::DEFAULT_IMAGE.to_string(),
        }
    }
}

/// kind cluster settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KindSettings {
    /// Node image
    pub node_image: String,
    /// Worker nodes besides the control plane
    pub workers: u32,
}

impl Default for KindSettings {
    fn default() -> Self {
        Self {
            node_image: cluster::DEFAULT_NODE_IMAGE.to_string(),
            workers: 0,
        }
    }
}

/// Trust artifact settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrustSettings {
    /// Append the public CA bundle after the root
    pub include_public_cas: bool,
    /// Where the public CA bundle is downloaded from
    pub public_ca_url: String,
    /// Restrict trust-manager distribution to one namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_namespace: Option<String>,
    /// Solve ACME challenges over DNS-01 with this provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns01_provider: Option<String>,
    /// Ship an example `Certificate` with the issuer
    pub include_example_cert: bool,
}

impl Default for TrustSettings {
    fn default() -> Self {
        Self {
            include_public_cas: true,
            public_ca_url: MOZILLA_BUNDLE_URL.to_string(),
            target_namespace: None,
            dns01_provider: None,
            include_example_cert: false,
        }
    }
}

/// ArgoCD settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ArgocdSettings {
    /// Bootstrap ArgoCD on start
    pub enabled: bool,
    /// ArgoCD release tag
    pub version: String,
    /// Install namespace
    pub namespace: String,
    /// Manifest applied after bootstrap; empty disables it
    #[serde(rename = "manifestURL")]
    pub manifest_url: String,
    /// GitOps repository for the initial Application
    #[serde(rename = "repoURL", skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    /// Directory inside the repository
    pub repo_path: String,
    /// Branch or revision
    pub repo_branch: String,
    /// Name of the initial Application
    pub app_name: String,
    /// Namespace the initial Application deploys into
    pub target_namespace: String,
    /// Username for HTTPS repository access
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_username: Option<String>,
    /// Password or token for HTTPS repository access
    #[serde(skip_serializing)]
    pub git_password: Option<String>,
    /// SSH private key for repository access
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_ssh_key_path: Option<PathBuf>,
    /// Sync the trust artifacts from the registry
    pub include_kinder_apps: bool,
    /// Rollout wait per deployment, in seconds
    pub wait_timeout_secs: u64,
}

impl Default for ArgocdSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            version: gitops::DEFAULT_VERSION.to_string(),
            namespace: gitops::DEFAULT_NAMESPACE.to_string(),
            manifest_url: DEFAULT_ARGOCD_MANIFEST_URL.to_string(),
            repo_url: None,
            repo_path: ".".to_string(),
            repo_branch: "main".to_string(),
            app_name: "root".to_string(),
            target_namespace: "default".to_string(),
            git_username: None,
            git_password: None,
            git_ssh_key_path: None,
            include_kinder_apps: false,
            wait_timeout_secs: gitops::DEFAULT_WAIT.as_secs(),
        }
    }
}

/// The whole configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KinderConfig {
    /// Prefix for container names and the cluster name
    pub app_name: String,
    /// Data directory; defaults to `$XDG_DATA_HOME/<app>`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Base domain routed by the proxy
    pub domain: String,
    /// Network
    pub network: NetworkSettings,
    /// Proxy
    pub traefik: TraefikSettings,
    /// Images
    pub images: ImageSettings,
    /// Registries mirrored through the cache
    pub registry_mirrors: Vec<String>,
    /// Root CA certificate path; defaults to `<data>/ca.crt`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_path: Option<PathBuf>,
    /// Root CA key path; defaults to `<data>/ca.key`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,
    /// Cluster
    pub kind: KindSettings,
    /// Trust artifacts
    pub trust: TrustSettings,
    /// ArgoCD
    pub argocd: ArgocdSettings,
}

impl Default for KinderConfig {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            data_dir: None,
            domain: DEFAULT_DOMAIN.to_string(),
            network: NetworkSettings {
                name: None,
                cidr: DEFAULT_NETWORK_CIDR.to_string(),
                bridge: None,
            },
            traefik: TraefikSettings::default(),
            images: ImageSettings::default(),
            registry_mirrors: default_registry_mirrors(),
            cert_path: None,
            key_path: None,
            kind: KindSettings::default(),
            trust: TrustSettings::default(),
            argocd: ArgocdSettings::default(),
        }
    }
}

/// `$XDG_CONFIG_HOME/kinder`
pub fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join(DEFAULT_APP_NAME))
        .ok_or_else(|| Error::configuration("cannot determine the user config directory"))
}

/// `$XDG_CONFIG_HOME/kinder/config.yaml`
pub fn default_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.yaml"))
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| Error::configuration(format!("invalid {}{}={:?}: {}", ENV_PREFIX, key, value, e)))
}

impl KinderConfig {
    /// Parse a YAML document over the defaults
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read the file layer.
    ///
    /// An explicit `path` must exist. Without one the default location is
    /// used if present. Returns the file actually read, if any.
    pub fn from_file(path: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let path = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(Error::configuration(format!(
                        "config file {} does not exist",
                        p.display()
                    )));
                }
                p.to_path_buf()
            }
            None => {
                let default = default_config_path()?;
                if !default.exists() {
                    debug!("No config file at {}, using defaults", default.display());
                    return Ok((Self::default(), None));
                }
                default
            }
        };

        let contents = std::fs::read_to_string(&path)?;
        let config = Self::from_yaml(&contents).map_err(|e| {
            Error::configuration(format!("failed to parse {}: {}", path.display(), e))
        })?;
        debug!("Loaded config from {}", path.display());
        Ok((config, Some(path)))
    }

    /// Defaults, then the file, then the process environment.
    ///
    /// Not validated: command-line flags still apply on top, so callers
    /// run [`KinderConfig::validate`] once every layer is in.
    pub fn load(path: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let (mut config, source) = Self::from_file(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok((config, source))
    }

    /// Apply `KINDER_*` overrides read through `lookup`
    pub fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) -> Result<()> {
        let get = |key: &str| lookup(&format!("{}{}", ENV_PREFIX, key)).filter(|v| !v.is_empty());

        if let Some(v) = get("APP_NAME") {
            self.app_name = v;
        }
        if let Some(v) = get("DATA_DIR") {
            self.data_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("DOMAIN") {
            self.domain = v;
        }
        if let Some(v) = get("NETWORK_NAME") {
            self.network.name = Some(v);
        }
        if let Some(v) = get("NETWORK_CIDR") {
            self.network.cidr = v;
        }
        if let Some(v) = get("NETWORK_BRIDGE") {
            self.network.bridge = Some(v);
        }
        if let Some(v) = get("TRAEFIK_PORT") {
            self.traefik.port = parse_env("TRAEFIK_PORT", &v)?;
        }
        if let Some(v) = get("IMAGES_STEPCA") {
            self.images.stepca = v;
        }
        if let Some(v) = get("IMAGES_ZOT") {
            self.images.zot = v;
        }
        if let Some(v) = get("IMAGES_GATUS") {
            self.images.gatus = v;
        }
        if let Some(v) = get("IMAGES_TRAEFIK") {
            self.images.traefik = v;
        }
        if let Some(v) = get("REGISTRY_MIRRORS") {
            self.registry_mirrors = v
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = get("CERT_PATH") {
            self.cert_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("KEY_PATH") {
            self.key_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("KIND_NODE_IMAGE") {
            self.kind.node_image = v;
        }
        if let Some(v) = get("ARGOCD_ENABLED") {
            self.argocd.enabled = parse_env("ARGOCD_ENABLED", &v)?;
        }
        if let Some(v) = get("ARGOCD_VERSION") {
            self.argocd.version = v;
        }
        if let Some(v) = lookup(&format!("{}ARGOCD_MANIFEST_URL", ENV_PREFIX)) {
            self.argocd.manifest_url = v;
        }
        if let Some(v) = get("ARGOCD_REPO_URL") {
            self.argocd.repo_url = Some(v);
        }
        if let Some(v) = get("ARGOCD_GIT_USERNAME") {
            self.argocd.git_username = Some(v);
        }
        if let Some(v) = get("ARGOCD_GIT_PASSWORD") {
            self.argocd.git_password = Some(v);
        }
        if let Some(v) = get("ARGOCD_GIT_SSH_KEY_PATH") {
            self.argocd.git_ssh_key_path = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Reject values that cannot produce a working environment
    pub fn validate(&self) -> Result<()> {
        if gitops::sanitize_name(&self.app_name)? != self.app_name {
            return Err(Error::configuration(format!(
                "appName {:?} must be a lowercase DNS label",
                self.app_name
            )));
        }
        gitops::validate_domain(&self.domain)?;
        self.trust_manager_options().validate()?;
        self.issuer_options().validate()?;
        self.network.cidr.parse::<Cidr>()?;
        if self.traefik.port == 0 {
            return Err(Error::configuration("traefik.port cannot be 0"));
        }
        match (&self.argocd.git_username, &self.argocd.git_password) {
            (Some(_), None) => {
                return Err(Error::configuration(
                    "argocd.gitPassword is required when argocd.gitUsername is set",
                ))
            }
            (None, Some(_)) => {
                return Err(Error::configuration(
                    "argocd.gitUsername is required when argocd.gitPassword is set",
                ))
            }
            _ => {}
        }
        Ok(())
    }

    /// `<app>-<service>`
    pub fn container_name(&self, service: &str) -> String {
        format!("{}-{}", self.app_name, service)
    }

    /// Network name, defaulting to the app name
    pub fn network_name(&self) -> String {
        self.network
            .name
            .clone()
            .unwrap_or_else(|| self.app_name.clone())
    }

    /// Bridge name, defaulting to `<network>br0`
    pub fn bridge_name(&self) -> String {
        self.network
            .bridge
            .clone()
            .unwrap_or_else(|| format!("{}br0", self.network_name()))
    }

    /// Resolved data directory
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        dirs::data_dir()
            .map(|d| d.join(&self.app_name))
            .ok_or_else(|| Error::configuration("cannot determine the user data directory"))
    }

    /// Root CA certificate path
    pub fn ca_cert_path(&self) -> Result<PathBuf> {
        match &self.cert_path {
            Some(p) => Ok(p.clone()),
            None => Ok(self.data_dir()?.join(CA_CERT_FILE)),
        }
    }

    /// Root CA key path
    pub fn ca_key_path(&self) -> Result<PathBuf> {
        match &self.key_path {
            Some(p) => Ok(p.clone()),
            None => Ok(self.data_dir()?.join(CA_KEY_FILE)),
        }
    }

    /// kubectl context of the environment's cluster
    pub fn kube_context(&self) -> String {
        cluster::context_name(&self.app_name)
    }

    fn git_credentials(&self) -> Result<GitCredentials> {
        let argocd = &self.argocd;
        if let (Some(username), Some(password)) = (&argocd.git_username, &argocd.git_password) {
            return Ok(GitCredentials::Http {
                username: username.clone(),
                password: password.clone(),
            });
        }
        if let Some(path) = &argocd.git_ssh_key_path {
            let private_key = std::fs::read_to_string(path).map_err(|e| {
                Error::configuration(format!("failed to read SSH key {}: {}", path.display(), e))
            })?;
            return Ok(GitCredentials::Ssh { private_key });
        }
        Ok(GitCredentials::None)
    }

    /// ArgoCD bootstrap settings, or `None` when disabled
    pub fn argocd_config(&self) -> Result<Option<ArgoCdConfig>> {
        let settings = &self.argocd;
        if !settings.enabled {
            return Ok(None);
        }

        let mut config = ArgoCdConfig::new(&self.domain, self.traefik.port);
        config.version = settings.version.clone();
        config.namespace = settings.namespace.clone();
        config.wait_timeout = Duration::from_secs(settings.wait_timeout_secs);
        config.include_kinder_apps = settings.include_kinder_apps;
        config.manifest_url = Some(settings.manifest_url.clone()).filter(|u| !u.is_empty());
        if let Some(url) = &settings.repo_url {
            config.repository = Some(RepositoryConfig {
                path: settings.repo_path.clone(),
                branch: settings.repo_branch.clone(),
                app_name: settings.app_name.clone(),
                target_namespace: settings.target_namespace.clone(),
                credentials: self.git_credentials()?,
                ..RepositoryConfig::new(url.clone())
            });
        }
        Ok(Some(config))
    }

    fn trust_manager_options(&self) -> TrustManagerOptions {
        TrustManagerOptions {
            target_namespace: self.trust.target_namespace.clone(),
        }
    }

    fn issuer_options(&self) -> IssuerOptions {
        IssuerOptions {
            domain: self.domain.clone(),
            https_port: self.traefik.port,
            dns01_provider: self.trust.dns01_provider.clone(),
            include_example_cert: self.trust.include_example_cert,
        }
    }

    /// Everything the orchestrator needs for this environment
    pub fn plan(&self) -> Result<Plan> {
        let network = self.network_name();
        Ok(Plan {
            app_name: self.app_name.clone(),
            data_dir: self.data_dir()?,
            domain: self.domain.clone(),
            ca_cert: self.ca_cert_path()?,
            ca_key: self.ca_key_path()?,
            network: NetworkConfig::new(&network, &self.network.cidr, self.bridge_name()),
            step_ca: StepCa {
                image: self.images.stepca.clone(),
            },
            zot: Zot {
                image: self.images.zot.clone(),
                mirrors: self.registry_mirrors.clone(),
            },
            gatus: Gatus {
                image: self.images.gatus.clone(),
            },
            traefik: Traefik {
                image: self.images.traefik.clone(),
                https_port: self.traefik.port,
            },
            cluster: KindClusterConfig {
                node_image: self.kind.node_image.clone(),
                workers: self.kind.workers,
                ..KindClusterConfig::new(&self.app_name, &network)
            },
            registry_timeout: zot::READY_TIMEOUT,
            include_public_cas: self.trust.include_public_cas,
            trust_manager: self.trust_manager_options(),
            issuer: self.issuer_options(),
            argocd: self.argocd_config()?,
        })
    }

    /// Effective configuration as YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
