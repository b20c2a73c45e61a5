//! `start`, `stop`, `restart`, `status` and `clean`

use std::fmt::Write as _;
use std::path::Path;

use tracing::info;

use crate::config::KinderConfig;
use crate::orchestrator::{Backends, EnvironmentStatus, Orchestrator};
use crate::pki::CertificateInfo;
use crate::Result;

/// Days before expiry at which the root CA is flagged
pub const EXPIRY_WARNING_DAYS: i64 = 30;

/// Options for `start` and `restart`
#[derive(Debug, Clone, Copy, Default)]
pub struct StartOptions {
    /// Skip the ArgoCD bootstrap
    pub no_argocd: bool,
    /// Do not append the public CA bundle to trust artifacts
    pub no_public_cas: bool,
}

impl StartOptions {
    fn apply(&self, config: &mut KinderConfig) {
        if self.no_argocd {
            config.argocd.enabled = false;
        }
        if self.no_public_cas {
            config.trust.include_public_cas = false;
        }
    }
}

fn orchestrator(config: &KinderConfig, backends: Backends) -> Result<Orchestrator> {
    Ok(Orchestrator::new(config.plan()?, backends))
}

/// Bring the environment up
pub async fn start(config: &KinderConfig, backends: Backends, options: StartOptions) -> Result<()> {
    let mut config = config.clone();
    options.apply(&mut config);

    let mut orchestrator = orchestrator(&config, backends)?;
    orchestrator.start().await?;

    println!();
    println!("{}", render_endpoints(&orchestrator.status().await?));
    Ok(())
}

/// Tear the environment down; the network survives with `keep_network`
pub async fn stop(config: &KinderConfig, backends: Backends, keep_network: bool) -> Result<()> {
    let mut orchestrator = orchestrator(config, backends)?;
    orchestrator.stop(!keep_network).await?;
    info!("Environment stopped");
    Ok(())
}

/// Stop (keeping the network) and start again
pub async fn restart(config: &KinderConfig, backends: Backends, options: StartOptions) -> Result<()> {
    let mut config = config.clone();
    options.apply(&mut config);

    let mut orchestrator = orchestrator(&config, backends)?;
    orchestrator.restart().await?;
    info!("Environment restarted");
    Ok(())
}

/// Print the environment snapshot
pub async fn status(config: &KinderConfig, backends: Backends) -> Result<()> {
    let orchestrator = orchestrator(config, backends)?;
    let snapshot = orchestrator.status().await?;
    let plan = orchestrator.plan();
    print!(
        "{}",
        render_status(&snapshot, &plan.ca_cert, &plan.network.name, &plan.cluster.name)
    );
    Ok(())
}

/// Remove the data directory once nothing is running
pub async fn clean(config: &KinderConfig, backends: Backends) -> Result<()> {
    let orchestrator = orchestrator(config, backends)?;
    orchestrator.clean().await?;
    info!("Removed {}", orchestrator.plan().data_dir.display());
    Ok(())
}

/// One-line validity summary for a CA certificate
pub fn ca_validity(ca: &CertificateInfo) -> String {
    if ca.is_not_yet_valid() {
        return "Not yet valid".to_string();
    }
    if ca.is_expired() {
        return "Expired".to_string();
    }
    let days = ca.days_remaining();
    if days < EXPIRY_WARNING_DAYS {
        format!("Expires in {} days", days)
    } else {
        format!("Valid ({} days remaining)", days)
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

/// Human-readable status report
pub fn render_status(
    status: &EnvironmentStatus,
    ca_path: &Path,
    network: &str,
    cluster: &str,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "kinder status");
    let _ = writeln!(out);

    let _ = writeln!(out, "CA Certificate");
    match &status.ca {
        Some(ca) => {
            let _ = writeln!(out, "   {}", ca_validity(ca));
            let _ = writeln!(out, "   Subject: {}", ca.common_name);
            let _ = writeln!(out, "   Path: {}", ca_path.display());
        }
        None => {
            let _ = writeln!(out, "   Not generated");
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Network");
    match &status.network_id {
        Some(id) => {
            let _ = writeln!(out, "   {} (ID: {})", network, short_id(id));
        }
        None => {
            let _ = writeln!(out, "   {} (not created)", network);
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Containers");
    for service in &status.services {
        let state = service.state.as_deref().unwrap_or("not created");
        let _ = writeln!(out, "   {:<8} {} ({})", service.service, service.container, state);
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Kind Cluster");
    let cluster_state = if status.cluster { "running" } else { "not created" };
    let _ = writeln!(out, "   {} ({})", cluster, cluster_state);
    for node in &status.nodes {
        let _ = writeln!(out, "   - {}", node);
    }
    let _ = writeln!(out);

    out.push_str(&render_endpoints(status));
    out
}

/// Endpoint list shown after start and in status
pub fn render_endpoints(status: &EnvironmentStatus) -> String {
    let mut out = String::from("Endpoints\n");
    for (name, url) in &status.endpoints {
        let _ = writeln!(out, "   {:<18} {}", name, url);
    }
    out
}
