//! Commands acting on one part of the environment: a single service, the
//! network, the kind cluster, the trust artifacts and ArgoCD

use std::fmt::Write as _;

use tracing::info;

use crate::bundle::{issuer, trust_manager, Artifact, TRUST_BUNDLE_IMAGE};
use crate::cluster;
use crate::config::KinderConfig;
use crate::gitops;
use crate::orchestrator::{Backends, Component, Orchestrator};
use crate::{Error, Result};

/// Artifacts a trust command works on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactSet {
    /// Combined PEM bundle and the trust-manager kustomization
    TrustBundle,
    /// cert-manager `ClusterIssuer`
    CertIssuer,
}

impl ArtifactSet {
    fn names(&self) -> &'static [&'static str] {
        match self {
            ArtifactSet::TrustBundle => &[TRUST_BUNDLE_IMAGE, trust_manager::IMAGE_NAME],
            ArtifactSet::CertIssuer => &[issuer::IMAGE_NAME],
        }
    }
}

fn orchestrator(config: &KinderConfig, backends: Backends) -> Result<Orchestrator> {
    Ok(Orchestrator::new(config.plan()?, backends))
}

/// ArgoCD commands run even when `argocd.enabled` is false in the config
fn with_argocd(config: &KinderConfig) -> KinderConfig {
    let mut config = config.clone();
    config.argocd.enabled = true;
    config
}

/// Start one service container
pub async fn start_service(config: &KinderConfig, backends: Backends, component: Component) -> Result<()> {
    let id = orchestrator(config, backends)?.start_component(component).await?;
    info!("{:?} running ({})", component, id);
    Ok(())
}

/// Stop and remove one service container
pub async fn stop_service(config: &KinderConfig, backends: Backends, component: Component) -> Result<()> {
    if orchestrator(config, backends)?.stop_component(component).await? {
        info!("{:?} stopped", component);
    } else {
        info!("{:?} was not running", component);
    }
    Ok(())
}

/// Create the container network
pub async fn create_network(config: &KinderConfig, backends: Backends) -> Result<()> {
    let id = orchestrator(config, backends)?.create_network().await?;
    info!("Network {} ready ({})", config.network_name(), id);
    Ok(())
}

/// Remove the container network
pub async fn remove_network(config: &KinderConfig, backends: Backends) -> Result<()> {
    if !orchestrator(config, backends)?.remove_network().await? {
        info!("Network {} does not exist", config.network_name());
    }
    Ok(())
}

/// Create the kind cluster
pub async fn start_kind(config: &KinderConfig, backends: Backends) -> Result<()> {
    orchestrator(config, backends)?.start_kind().await
}

/// Delete the kind cluster
pub async fn stop_kind(config: &KinderConfig, backends: Backends) -> Result<()> {
    orchestrator(config, backends)?.stop_kind().await
}

/// Whether the cluster exists, and its node containers
pub async fn kind_status(config: &KinderConfig, backends: Backends) -> Result<String> {
    let name = config.plan()?.cluster.name;
    let mut out = String::new();
    if !cluster::cluster_exists(backends.cluster.as_ref(), &name).await? {
        let _ = writeln!(out, "Cluster {}: not created", name);
        return Ok(out);
    }
    let _ = writeln!(out, "Cluster {}: running", name);
    for node in cluster::cluster_nodes(backends.runtime.as_ref(), &name).await? {
        let _ = writeln!(out, "  {}", node);
    }
    Ok(out)
}

/// Kubeconfig for the cluster
pub async fn kubeconfig(config: &KinderConfig, backends: Backends) -> Result<String> {
    orchestrator(config, backends)?.kubeconfig().await
}

/// Build the artifacts in `set` from the CA on disk
pub async fn artifacts(config: &KinderConfig, backends: Backends, set: ArtifactSet) -> Result<Vec<Artifact>> {
    let all = orchestrator(config, backends)?.trust_artifacts().await?;
    Ok(select(all, set))
}

fn select(all: Vec<Artifact>, set: ArtifactSet) -> Vec<Artifact> {
    all.into_iter()
        .filter(|a| set.names().contains(&a.name.as_str()))
        .collect()
}

/// Build and push the artifacts in `set`
pub async fn push(config: &KinderConfig, backends: Backends, set: ArtifactSet) -> Result<Vec<String>> {
    let orchestrator = orchestrator(config, backends)?;
    let artifacts = select(orchestrator.trust_artifacts().await?, set);
    orchestrator.push_artifacts(&artifacts).await
}

/// Every file of every artifact, as printed by the `show` commands
pub fn render_artifacts(artifacts: &[Artifact]) -> String {
    let mut out = String::new();
    for artifact in artifacts {
        for file in &artifact.files {
            let _ = writeln!(out, "---");
            let _ = writeln!(out, "# {}/{}", artifact.name, file.path);
            let contents = String::from_utf8_lossy(&file.contents);
            out.push_str(&contents);
            if !contents.ends_with('\n') {
                out.push('\n');
            }
        }
    }
    out
}

/// Install ArgoCD into the running cluster
pub async fn bootstrap_argocd(config: &KinderConfig, backends: Backends) -> Result<()> {
    orchestrator(&with_argocd(config), backends)?
        .bootstrap_argocd()
        .await?;
    info!("ArgoCD bootstrapped");
    Ok(())
}

/// Manifests ArgoCD bootstrap would apply, credentials masked
pub fn preview_argocd(config: &KinderConfig) -> Result<String> {
    let argocd = with_argocd(config)
        .argocd_config()?
        .ok_or_else(|| Error::configuration("argocd settings are incomplete"))?;
    gitops::preview(&argocd)
}

/// Initial admin password ArgoCD generated
pub async fn argocd_password(config: &KinderConfig, backends: Backends) -> Result<String> {
    gitops::admin_password(backends.kubectl.as_ref(), &config.argocd.namespace).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{trust_artifacts, IssuerOptions, TrustManagerOptions};

    const PEM: &str = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";

    fn all() -> Vec<Artifact> {
        let issuer = IssuerOptions {
            domain: "c0000201.sslip.io".to_string(),
            https_port: 8443,
            dns01_provider: None,
            include_example_cert: false,
        };
        trust_artifacts(PEM, &[], &TrustManagerOptions::default(), &issuer).unwrap()
    }

    #[test]
    fn sets_pick_their_artifacts() {
        let names = |set| -> Vec<String> { select(all(), set).into_iter().map(|a| a.name).collect() };
        assert_eq!(
            names(ArtifactSet::TrustBundle),
            vec!["trust-bundle", "trust-manager-bundle"]
        );
        assert_eq!(names(ArtifactSet::CertIssuer), vec!["cert-manager-issuer"]);
    }

    #[test]
    fn rendered_artifacts_name_each_file() {
        let out = render_artifacts(&select(all(), ArtifactSet::CertIssuer));
        assert!(out.starts_with("---\n# cert-manager-issuer/kustomization.yaml\n"));
        assert!(out.contains("---\n# cert-manager-issuer/clusterissuer.yaml\n"));
        assert!(out.contains("kind: ClusterIssuer"));
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn preview_works_with_argocd_disabled() {
        let mut config = KinderConfig::default();
        config.argocd.enabled = false;
        let out = preview_argocd(&config).unwrap();
        assert!(out.contains("kind: Namespace"));
    }
}
