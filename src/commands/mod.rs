//! CLI command implementations
//!
//! Each command takes the resolved [`KinderConfig`] and, where it touches the
//! outside world, the [`Backends`] built once by the binary. Rendering is
//! split from printing so the text can be tested.

pub mod ca;
pub mod components;
pub mod diagnostics;
pub mod environment;
pub mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use crate::bundle::{MozillaBundle, OciRegistry};
use crate::cluster::KindCli;
use crate::config::KinderConfig;
use crate::gitops::Kubectl;
use crate::orchestrator::{Backends, KUBECONFIG_FILE};
use crate::runtime::DockerCli;
use crate::Result;

/// Global flags that override every other configuration layer
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// `--app-name`
    pub app_name: Option<String>,
    /// `--data-dir`
    pub data_dir: Option<PathBuf>,
    /// `--domain`
    pub domain: Option<String>,
}

impl Overrides {
    /// Apply the flags that were given
    pub fn apply(&self, config: &mut KinderConfig) {
        if let Some(app_name) = &self.app_name {
            config.app_name = app_name.clone();
        }
        if let Some(data_dir) = &self.data_dir {
            config.data_dir = Some(data_dir.clone());
        }
        if let Some(domain) = &self.domain {
            config.domain = domain.clone();
        }
    }
}

/// Production collaborators: the `docker`, `kind` and `kubectl` binaries,
/// the local registry, and the configured public CA bundle.
///
/// kubectl reads the kubeconfig kinder writes into the data directory.
pub fn backends(config: &KinderConfig) -> Result<Backends> {
    let kubectl = Kubectl::new()
        .with_kubeconfig(config.data_dir()?.join(KUBECONFIG_FILE))
        .with_context(config.kube_context());
    Ok(Backends {
        runtime: Arc::new(DockerCli::new()),
        cluster: Arc::new(KindCli::new()),
        registry: Arc::new(OciRegistry::local()),
        public_cas: Arc::new(MozillaBundle::with_url(&config.trust.public_ca_url)),
        kubectl: Arc::new(kubectl),
    })
}
