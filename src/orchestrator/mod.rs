//! Environment bring-up and teardown
//!
//! Start walks a fixed dependency order and stops at the first failure:
//!
//! ```text
//! NotStarted -> NetworkReady -> CaReady -> RegistryReady -> TrustArtifactsPushed
//!            -> HealthDashReady -> ProxyReady -> ClusterReady -> GitOpsReady -> AllReady
//! ```
//!
//! Only the registry is gated on readiness; the dashboard and the proxy are
//! started and left to come up on their own. Stop is best effort: every step
//! runs and the failures are reported together.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::bundle::{
    self, Artifact, IssuerOptions, PublicCaSource, RegistryClient, TrustManagerOptions,
};
use crate::cluster::{self, ClusterProvisioner, KindClusterConfig};
use crate::error::TeardownError;
use crate::files::{write_file, SECRET_FILE_MODE};
use crate::gitops::{self, ArgoCdConfig, ManifestApplier};
use crate::mirror::{self, MirrorConfig, REGISTRY_PORT};
use crate::pki::{self, CertificateInfo};
use crate::runtime::{self, ContainerRuntime, NetworkConfig};
use crate::services::{zot, Gatus, ServiceAdapter, ServiceContext, StepCa, Traefik, Zot};
use crate::{Error, Result};

/// Kubeconfig file name in the data directory
pub const KUBECONFIG_FILE: &str = "kubeconfig";

/// Number of start steps, as shown in progress logs
pub const TOTAL_STEPS: usize = 9;

/// Where an environment is in its start sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    /// Nothing started yet, or torn down
    NotStarted,
    /// Network exists
    NetworkReady,
    /// Step CA running with a fresh intermediate
    CaReady,
    /// Registry answering its API
    RegistryReady,
    /// Trust artifacts pushed to the registry
    TrustArtifactsPushed,
    /// Health dashboard started
    HealthDashReady,
    /// Proxy started
    ProxyReady,
    /// Cluster exists
    ClusterReady,
    /// ArgoCD bootstrapped, or skipped
    GitOpsReady,
    /// Everything up
    AllReady,
    /// A step failed; nothing after it ran
    Aborted {
        /// Step that failed
        step: String,
        /// Rendered cause
        cause: String,
    },
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Aborted { step, cause } => write!(f, "aborted at {}: {}", step, cause),
            other => write!(f, "{:?}", other),
        }
    }
}

/// A service container that can be started and stopped on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    /// Certificate authority
    StepCa,
    /// Registry cache
    Zot,
    /// Health dashboard
    Gatus,
    /// Reverse proxy
    Traefik,
}

/// External collaborators, built once by the caller
#[derive(Clone)]
pub struct Backends {
    /// Container runtime daemon
    pub runtime: Arc<dyn ContainerRuntime>,
    /// Cluster provisioner
    pub cluster: Arc<dyn ClusterProvisioner>,
    /// Local registry
    pub registry: Arc<dyn RegistryClient>,
    /// Public CA bundle source
    pub public_cas: Arc<dyn PublicCaSource>,
    /// Manifest applier for the cluster
    pub kubectl: Arc<dyn ManifestApplier>,
}

/// Everything one environment is made of
#[derive(Debug, Clone)]
pub struct Plan {
    /// Prefix for container names
    pub app_name: String,
    /// Root of all generated files
    pub data_dir: PathBuf,
    /// Base domain routed by the proxy
    pub domain: String,
    /// Root CA certificate
    pub ca_cert: PathBuf,
    /// Root CA private key
    pub ca_key: PathBuf,
    /// Network every container joins
    pub network: NetworkConfig,
    /// Certificate authority adapter
    pub step_ca: StepCa,
    /// Registry adapter
    pub zot: Zot,
    /// Dashboard adapter
    pub gatus: Gatus,
    /// Proxy adapter
    pub traefik: Traefik,
    /// Cluster name, node image and size; trust mounts are filled in on start
    pub cluster: KindClusterConfig,
    /// Deadline for the registry to answer
    pub registry_timeout: Duration,
    /// Append the public CA bundle to the root in trust artifacts
    pub include_public_cas: bool,
    /// trust-manager artifact options
    pub trust_manager: TrustManagerOptions,
    /// cert-manager issuer artifact options
    pub issuer: IssuerOptions,
    /// ArgoCD bootstrap; `None` skips it
    pub argocd: Option<ArgoCdConfig>,
}

impl Plan {
    /// Settings handed to every service adapter
    pub fn service_context(&self) -> ServiceContext {
        ServiceContext {
            app_name: self.app_name.clone(),
            network: self.network.name.clone(),
            data_dir: self.data_dir.clone(),
            ca_cert: self.ca_cert.clone(),
            ca_key: self.ca_key.clone(),
            domain: self.domain.clone(),
        }
    }

    /// Inputs for the containerd `certs.d` tree
    pub fn mirror_config(&self) -> MirrorConfig {
        MirrorConfig {
            registry_host: zot::HOSTNAME.to_string(),
            mirrors: self.zot.mirrors.clone(),
            ca_cert: Some(self.ca_cert.clone()),
        }
    }

    /// Where the cluster's kubeconfig is written
    pub fn kubeconfig_path(&self) -> PathBuf {
        self.data_dir.join(KUBECONFIG_FILE)
    }

    /// Services in start order
    pub fn services(&self) -> [&dyn ServiceAdapter; 4] {
        [&self.step_ca, &self.zot, &self.gatus, &self.traefik]
    }

    /// Adapter for one component
    pub fn adapter(&self, component: Component) -> &dyn ServiceAdapter {
        match component {
            Component::StepCa => &self.step_ca,
            Component::Zot => &self.zot,
            Component::Gatus => &self.gatus,
            Component::Traefik => &self.traefik,
        }
    }
}

/// State of one managed container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    /// Service name
    pub service: &'static str,
    /// Container name
    pub container: String,
    /// Daemon-reported state; `None` when the container does not exist
    pub state: Option<String>,
}

/// Snapshot reported by `status`
#[derive(Debug, Clone)]
pub struct EnvironmentStatus {
    /// Root CA, if generated
    pub ca: Option<CertificateInfo>,
    /// Network ID, if the network exists
    pub network_id: Option<String>,
    /// Every managed container
    pub services: Vec<ServiceStatus>,
    /// Whether the cluster exists
    pub cluster: bool,
    /// Node containers of the cluster
    pub nodes: Vec<String>,
    /// URLs served once the proxy is up
    pub endpoints: Vec<(&'static str, String)>,
}

/// User-facing URLs for an environment
pub fn endpoints(domain: &str, https_port: u16) -> Vec<(&'static str, String)> {
    vec![
        ("Traefik Dashboard", format!("https://traefik.{}:{}", domain, https_port)),
        ("Step CA", format!("https://ca.{}:{}", domain, https_port)),
        ("Zot Registry", format!("https://registry.{}:{}", domain, https_port)),
        ("Gatus Dashboard", format!("https://gatus.{}:{}", domain, https_port)),
        ("Zot (direct)", format!("http://localhost:{}", REGISTRY_PORT)),
    ]
}

/// Drives one environment through start, stop and restart
pub struct Orchestrator {
    plan: Plan,
    backends: Backends,
    stage: Stage,
}

impl Orchestrator {
    /// Orchestrator for `plan` that has not started anything
    pub fn new(plan: Plan, backends: Backends) -> Self {
        Self {
            plan,
            backends,
            stage: Stage::NotStarted,
        }
    }

    /// Current stage
    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    /// The environment being managed
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Record a step outcome, moving to `next` or to `Aborted`
    fn advance<T>(&mut self, step: &str, next: Stage, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.stage = next;
                Ok(value)
            }
            Err(e) => {
                warn!("Step {} failed: {}", step, e);
                self.stage = Stage::Aborted {
                    step: step.to_string(),
                    cause: e.to_string(),
                };
                Err(e.in_step(step))
            }
        }
    }

    /// Bring the environment up, reusing whatever already exists
    pub async fn start(&mut self) -> Result<()> {
        self.stage = Stage::NotStarted;

        info!("[Step 1/{}] Ensuring root CA", TOTAL_STEPS);
        let result = self.ensure_root_ca();
        let root_pem = self.advance("ca", Stage::NotStarted, result)?;

        info!("[Step 2/{}] Ensuring network {}", TOTAL_STEPS, self.plan.network.name);
        let result = runtime::ensure_network(self.backends.runtime.as_ref(), &self.plan.network).await;
        self.advance("network", Stage::NetworkReady, result)?;

        info!("[Step 3/{}] Starting Step CA", TOTAL_STEPS);
        let result = self.start_service(&self.plan.step_ca).await;
        self.advance("step-ca", Stage::CaReady, result)?;

        info!("[Step 4/{}] Starting Zot registry", TOTAL_STEPS);
        let result = self.start_registry().await;
        self.advance("zot", Stage::RegistryReady, result)?;

        info!("[Step 5/{}] Pushing trust artifacts", TOTAL_STEPS);
        let result = self.push_trust_artifacts(&root_pem).await;
        self.advance("trust-artifacts", Stage::TrustArtifactsPushed, result)?;

        info!("[Step 6/{}] Starting Gatus", TOTAL_STEPS);
        let result = self.start_service(&self.plan.gatus).await;
        self.advance("gatus", Stage::HealthDashReady, result)?;

        info!("[Step 7/{}] Starting Traefik", TOTAL_STEPS);
        let result = self.start_service(&self.plan.traefik).await;
        self.advance("traefik", Stage::ProxyReady, result)?;

        info!("[Step 8/{}] Ensuring kind cluster {}", TOTAL_STEPS, self.plan.cluster.name);
        let result = self.start_cluster().await;
        self.advance("kind", Stage::ClusterReady, result)?;

        match self.plan.argocd.clone() {
            Some(mut argocd) => {
                info!("[Step 9/{}] Bootstrapping ArgoCD", TOTAL_STEPS);
                argocd.ca_pem.get_or_insert(root_pem);
                let result = gitops::install(self.backends.kubectl.as_ref(), &argocd).await;
                self.advance("argocd", Stage::GitOpsReady, result)?;
            }
            None => {
                info!("[Step 9/{}] ArgoCD disabled, skipping", TOTAL_STEPS);
                self.stage = Stage::GitOpsReady;
            }
        }

        self.stage = Stage::AllReady;
        info!("Environment {} is ready", self.plan.app_name);
        Ok(())
    }

    /// Reuse the root CA on disk or generate one, returning its certificate PEM
    fn ensure_root_ca(&self) -> Result<String> {
        let cert = &self.plan.ca_cert;
        let key = &self.plan.ca_key;
        match (cert.exists(), key.exists()) {
            (true, true) => {
                debug!("Reusing root CA at {}", cert.display());
                Ok(std::fs::read_to_string(cert)?)
            }
            (false, false) => {
                info!("Generating root CA for {}", self.plan.domain);
                Ok(pki::generate_root(&self.plan.domain, cert, key)?.cert_pem)
            }
            (true, false) => Err(Error::configuration(format!(
                "found {} but not its key {}",
                cert.display(),
                key.display()
            ))),
            (false, true) => Err(Error::configuration(format!(
                "found {} but not its certificate {}",
                key.display(),
                cert.display()
            ))),
        }
    }

    /// Start a service container, preparing its files only when it is new
    async fn start_service(&self, adapter: &dyn ServiceAdapter) -> Result<String> {
        let runtime = self.backends.runtime.as_ref();
        let ctx = self.plan.service_context();
        let name = ctx.container_name(adapter.name());

        if let Some(id) = runtime::start_existing(runtime, &name).await? {
            return Ok(id);
        }
        let descriptor = adapter.prepare(&ctx)?;
        runtime::ensure_container(runtime, &descriptor).await
    }

    async fn start_registry(&self) -> Result<()> {
        self.start_service(&self.plan.zot).await?;
        info!(
            "Waiting up to {:?} for the registry to answer",
            self.plan.registry_timeout
        );
        self.backends
            .registry
            .wait_ready(self.plan.registry_timeout)
            .await
    }

    async fn build_trust_artifacts(&self, root_pem: &str) -> Result<Vec<Artifact>> {
        let public = if self.plan.include_public_cas {
            self.backends.public_cas.fetch().await?
        } else {
            Vec::new()
        };
        bundle::trust_artifacts(
            root_pem,
            &public,
            &self.plan.trust_manager,
            &self.plan.issuer,
        )
    }

    async fn push_all(&self, artifacts: &[Artifact]) -> Result<Vec<String>> {
        let mut urls = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let url = self.backends.registry.push(artifact).await?;
            info!("Pushed {} ({})", artifact.name, url);
            urls.push(url);
        }
        Ok(urls)
    }

    async fn push_trust_artifacts(&self, root_pem: &str) -> Result<()> {
        let artifacts = self.build_trust_artifacts(root_pem).await?;
        self.push_all(&artifacts).await?;
        Ok(())
    }

    async fn start_cluster(&self) -> Result<()> {
        let certs_dir = mirror::write_certs_dir(&self.plan.data_dir, &self.plan.mirror_config())?;
        let config = KindClusterConfig {
            ca_cert: Some(self.plan.ca_cert.clone()),
            certs_dir: Some(certs_dir),
            ..self.plan.cluster.clone()
        };
        cluster::ensure_cluster(self.backends.cluster.as_ref(), &config).await?;

        let kubeconfig = self.backends.cluster.kubeconfig(&config.name).await?;
        let path = self.plan.kubeconfig_path();
        write_file(&path, kubeconfig.as_bytes(), SECRET_FILE_MODE)?;
        info!("Wrote kubeconfig to {}", path.display());
        Ok(())
    }

    /// Tear the environment down in reverse dependency order.
    ///
    /// Every step is attempted. Containers and networks that do not exist
    /// are skipped; failures are collected into one [`TeardownError`].
    pub async fn stop(&mut self, remove_network: bool) -> Result<()> {
        let runtime = self.backends.runtime.as_ref();
        let ctx = self.plan.service_context();
        let mut failures = TeardownError::new();

        info!("Deleting kind cluster {}", self.plan.cluster.name);
        if let Err(e) =
            cluster::delete_cluster(self.backends.cluster.as_ref(), &self.plan.cluster.name).await
        {
            failures.record("kind", e);
        }

        for adapter in self.plan.services().into_iter().rev() {
            let name = ctx.container_name(adapter.name());
            match runtime::container_exists(runtime, &name).await {
                Ok(true) => {
                    info!("Removing container {}", name);
                    if let Err(e) = runtime::remove_container(runtime, &name).await {
                        failures.record(adapter.name(), e);
                    }
                }
                Ok(false) => debug!("Container {} does not exist", name),
                Err(e) => failures.record(adapter.name(), e),
            }
        }

        if remove_network {
            let network = &self.plan.network.name;
            match runtime::network_exists(runtime, network).await {
                Ok(true) => {
                    if let Err(e) = runtime::remove_network(runtime, network).await {
                        failures.record("network", e);
                    }
                }
                Ok(false) => debug!("Network {} does not exist", network),
                Err(e) => failures.record("network", e),
            }
        }

        self.stage = Stage::NotStarted;
        if !failures.is_empty() {
            warn!("Teardown incomplete: {:?}", failures.failed_steps());
        }
        failures.into_result()
    }

    /// Stop everything except the network, then start again.
    ///
    /// A partial teardown is logged and does not block the start.
    pub async fn restart(&mut self) -> Result<()> {
        if let Err(e) = self.stop(false).await {
            warn!("Continuing restart after incomplete teardown: {}", e);
        }
        self.start().await
    }

    /// Read-only snapshot of the environment
    pub async fn status(&self) -> Result<EnvironmentStatus> {
        let runtime = self.backends.runtime.as_ref();
        let ctx = self.plan.service_context();

        let ca = if self.plan.ca_cert.exists() {
            Some(CertificateInfo::from_file(&self.plan.ca_cert)?)
        } else {
            None
        };

        let network_id = runtime
            .list_networks()
            .await?
            .into_iter()
            .find(|n| n.name == self.plan.network.name)
            .map(|n| n.id);

        let mut services = Vec::new();
        for adapter in self.plan.services() {
            let container = ctx.container_name(adapter.name());
            let state = runtime::find_container(runtime, &container)
                .await?
                .map(|c| c.state);
            services.push(ServiceStatus {
                service: adapter.name(),
                container,
                state,
            });
        }

        let cluster = cluster::cluster_exists(
            self.backends.cluster.as_ref(),
            &self.plan.cluster.name,
        )
        .await?;
        let nodes = if cluster {
            cluster::cluster_nodes(runtime, &self.plan.cluster.name).await?
        } else {
            Vec::new()
        };

        Ok(EnvironmentStatus {
            ca,
            network_id,
            services,
            cluster,
            nodes,
            endpoints: endpoints(&self.plan.domain, self.plan.traefik.https_port),
        })
    }

    /// Delete the data directory.
    ///
    /// Refuses while any managed container still exists.
    pub async fn clean(&self) -> Result<()> {
        let runtime = self.backends.runtime.as_ref();
        let ctx = self.plan.service_context();

        let mut remaining = Vec::new();
        for adapter in self.plan.services() {
            let name = ctx.container_name(adapter.name());
            if runtime::container_exists(runtime, &name).await? {
                remaining.push(name);
            }
        }
        if !remaining.is_empty() {
            return Err(Error::configuration(format!(
                "containers still exist ({}); run `kinder stop` first",
                remaining.join(", ")
            )));
        }

        if self.plan.data_dir.exists() {
            info!("Removing {}", self.plan.data_dir.display());
            std::fs::remove_dir_all(&self.plan.data_dir)?;
        } else {
            debug!("{} does not exist", self.plan.data_dir.display());
        }
        Ok(())
    }

    // =========================================================================
    // Single-component operations
    // =========================================================================

    fn existing_root_pem(&self) -> Result<String> {
        if !self.plan.ca_cert.exists() {
            return Err(Error::configuration(format!(
                "no CA at {}; run `kinder start` or `kinder ca generate` first",
                self.plan.ca_cert.display()
            )));
        }
        Ok(std::fs::read_to_string(&self.plan.ca_cert)?)
    }

    /// Start one service container along with the root CA and network it
    /// needs. The registry is waited on like during a full start.
    pub async fn start_component(&self, component: Component) -> Result<String> {
        self.ensure_root_ca()?;
        runtime::ensure_network(self.backends.runtime.as_ref(), &self.plan.network).await?;
        let adapter = self.plan.adapter(component);
        info!("Starting {}", adapter.name());
        let id = self.start_service(adapter).await?;
        if component == Component::Zot {
            self.backends
                .registry
                .wait_ready(self.plan.registry_timeout)
                .await?;
        }
        Ok(id)
    }

    /// Stop and remove one service container; returns whether it existed
    pub async fn stop_component(&self, component: Component) -> Result<bool> {
        let runtime = self.backends.runtime.as_ref();
        let name = self
            .plan
            .service_context()
            .container_name(self.plan.adapter(component).name());
        if !runtime::container_exists(runtime, &name).await? {
            debug!("Container {} does not exist", name);
            return Ok(false);
        }
        info!("Removing container {}", name);
        runtime::remove_container(runtime, &name).await?;
        Ok(true)
    }

    /// Create the network unless it exists, returning its ID
    pub async fn create_network(&self) -> Result<String> {
        runtime::ensure_network(self.backends.runtime.as_ref(), &self.plan.network).await
    }

    /// Remove the network; returns whether it existed
    pub async fn remove_network(&self) -> Result<bool> {
        let runtime = self.backends.runtime.as_ref();
        let network = &self.plan.network.name;
        if !runtime::network_exists(runtime, network).await? {
            debug!("Network {} does not exist", network);
            return Ok(false);
        }
        runtime::remove_network(runtime, network).await?;
        Ok(true)
    }

    /// Create the cluster against an existing root CA and write its kubeconfig
    pub async fn start_kind(&self) -> Result<()> {
        self.existing_root_pem()?;
        runtime::ensure_network(self.backends.runtime.as_ref(), &self.plan.network).await?;
        self.start_cluster().await
    }

    /// Delete the cluster if it exists
    pub async fn stop_kind(&self) -> Result<()> {
        cluster::delete_cluster(self.backends.cluster.as_ref(), &self.plan.cluster.name).await
    }

    /// Kubeconfig for the cluster, as reported by kind
    pub async fn kubeconfig(&self) -> Result<String> {
        let name = &self.plan.cluster.name;
        if !cluster::cluster_exists(self.backends.cluster.as_ref(), name).await? {
            return Err(Error::configuration(format!("kind cluster {} does not exist", name)));
        }
        self.backends.cluster.kubeconfig(name).await
    }

    /// Trust artifacts for the root CA on disk, without pushing them
    pub async fn trust_artifacts(&self) -> Result<Vec<Artifact>> {
        let root_pem = self.existing_root_pem()?;
        self.build_trust_artifacts(&root_pem).await
    }

    /// Push `artifacts` once the registry answers, returning manifest URLs
    pub async fn push_artifacts(&self, artifacts: &[Artifact]) -> Result<Vec<String>> {
        self.backends
            .registry
            .wait_ready(self.plan.registry_timeout)
            .await?;
        self.push_all(artifacts).await
    }

    /// Install ArgoCD into the running cluster, trusting the root CA
    pub async fn bootstrap_argocd(&self) -> Result<()> {
        let mut argocd = self
            .plan
            .argocd
            .clone()
            .ok_or_else(|| Error::configuration("argocd is disabled (argocd.enabled: false)"))?;
        if !cluster::cluster_exists(self.backends.cluster.as_ref(), &self.plan.cluster.name).await? {
            return Err(Error::configuration(format!(
                "kind cluster {} does not exist; run `kinder kind start` first",
                self.plan.cluster.name
            )));
        }
        if argocd.ca_pem.is_none() && self.plan.ca_cert.exists() {
            argocd.ca_pem = Some(std::fs::read_to_string(&self.plan.ca_cert)?);
        }
        gitops::install(self.backends.kubectl.as_ref(), &argocd).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::artifact::MockRegistryClient;
    use crate::bundle::MockPublicCaSource;
    use crate::cluster::MockClusterProvisioner;
    use crate::gitops::MockManifestApplier;
    use crate::runtime::{ContainerDetails, ContainerSummary, MockContainerRuntime, NetworkSummary};
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    fn plan(dir: &std::path::Path) -> Plan {
        let mirrors = vec!["ghcr.io".to_string(), "registry-1.docker.io".to_string()];
        Plan {
            app_name: "kinder".to_string(),
            data_dir: dir.to_path_buf(),
            domain: "c0000201.sslip.io".to_string(),
            ca_cert: dir.join("ca.crt"),
            ca_key: dir.join("ca.key"),
            network: NetworkConfig::new("kinder", "172.28.28.0/24", ""),
            step_ca: StepCa::default(),
            zot: Zot::new(mirrors),
            gatus: Gatus::default(),
            traefik: Traefik::default(),
            cluster: KindClusterConfig::new("kinder", "kinder"),
            registry_timeout: Duration::from_secs(30),
            include_public_cas: true,
            trust_manager: TrustManagerOptions::default(),
            issuer: IssuerOptions {
                domain: "c0000201.sslip.io".to_string(),
                https_port: 8443,
                dns01_provider: None,
                include_example_cert: false,
            },
            argocd: None,
        }
    }

    /// A runtime with nothing on it that logs every mutation
    fn empty_runtime(log: &Log) -> MockContainerRuntime {
        let mut runtime = MockContainerRuntime::new();
        runtime.expect_list_containers().returning(|| Ok(vec![]));
        runtime.expect_list_networks().returning(|| Ok(vec![]));
        let l = log.clone();
        runtime.expect_create_network().returning(move |spec| {
            l.lock().unwrap().push(format!("network:{}", spec.name));
            Ok("net1".to_string())
        });
        runtime.expect_pull_image().returning(|_| Ok(()));
        let l = log.clone();
        runtime.expect_create_container().returning(move |d| {
            l.lock().unwrap().push(format!("container:{}", d.name));
            Ok(d.name.clone())
        });
        runtime.expect_start_container().returning(|_| Ok(()));
        runtime
    }

    fn registry(log: &Log) -> MockRegistryClient {
        let mut registry = MockRegistryClient::new();
        let l = log.clone();
        registry.expect_wait_ready().returning(move |_| {
            l.lock().unwrap().push("registry-ready".to_string());
            Ok(())
        });
        let l = log.clone();
        registry.expect_push().returning(move |a| {
            l.lock().unwrap().push(format!("push:{}", a.name));
            Ok(format!("http://localhost:5000/v2/{}/manifests/latest", a.name))
        });
        registry
    }

    fn public_cas() -> MockPublicCaSource {
        let mut source = MockPublicCaSource::new();
        source
            .expect_fetch()
            .returning(|| Ok(b"-----BEGIN CERTIFICATE-----\nPUB\n-----END CERTIFICATE-----\n".to_vec()));
        source
    }

    fn kind(log: &Log) -> MockClusterProvisioner {
        let mut kind = MockClusterProvisioner::new();
        kind.expect_list().returning(|| Ok(vec![]));
        let l = log.clone();
        kind.expect_create().returning(move |c| {
            assert!(c.ca_cert.is_some());
            assert!(c.certs_dir.as_ref().unwrap().join("ghcr.io/hosts.toml").exists());
            l.lock().unwrap().push(format!("kind:{}", c.name));
            Ok(())
        });
        kind.expect_kubeconfig()
            .returning(|name| Ok(format!("apiVersion: v1\nkind: Config\ncurrent-context: kind-{}\n", name)));
        kind
    }

    fn backends(
        runtime: MockContainerRuntime,
        kind: MockClusterProvisioner,
        registry: MockRegistryClient,
        kubectl: MockManifestApplier,
    ) -> Backends {
        Backends {
            runtime: Arc::new(runtime),
            cluster: Arc::new(kind),
            registry: Arc::new(registry),
            public_cas: Arc::new(public_cas()),
            kubectl: Arc::new(kubectl),
        }
    }

    // ==========================================================================
    // Story Tests: Start Sequence
    // ==========================================================================

    /// Story: a fresh start walks the dependency order end to end
    #[tokio::test]
    async fn story_fresh_start_runs_in_dependency_order() {
        let dir = tempfile::tempdir().unwrap();
        let log: Log = Arc::default();
        let mut orchestrator = Orchestrator::new(
            plan(dir.path()),
            backends(empty_runtime(&log), kind(&log), registry(&log), MockManifestApplier::new()),
        );

        orchestrator.start().await.unwrap();

        assert_eq!(orchestrator.stage(), &Stage::AllReady);
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "network:kinder",
                "container:kinder-step-ca",
                "container:kinder-zot",
                "registry-ready",
                "push:trust-bundle",
                "push:trust-manager-bundle",
                "push:cert-manager-issuer",
                "container:kinder-gatus",
                "container:kinder-traefik",
                "kind:kinder",
            ]
        );
        assert!(dir.path().join("ca.crt").exists());
        assert!(dir.path().join("step-ca/certs/intermediate_ca.crt").exists());
        let kubeconfig = std::fs::read_to_string(dir.path().join("kubeconfig")).unwrap();
        assert!(kubeconfig.contains("current-context: kind-kinder"));
    }

    /// Story: a failed push aborts before anything after it is started
    #[tokio::test]
    async fn story_push_failure_aborts_start() {
        let dir = tempfile::tempdir().unwrap();
        let log: Log = Arc::default();

        let mut registry = MockRegistryClient::new();
        registry.expect_wait_ready().returning(|_| Ok(()));
        registry
            .expect_push()
            .times(1)
            .returning(|_| Err(Error::registry("manifest upload refused")));

        let mut kind = MockClusterProvisioner::new();
        kind.expect_create().never();

        let mut orchestrator = Orchestrator::new(
            plan(dir.path()),
            backends(empty_runtime(&log), kind, registry, MockManifestApplier::new()),
        );

        let err = orchestrator.start().await.unwrap_err();
        assert!(err.to_string().starts_with("trust-artifacts: registry error"));
        match orchestrator.stage() {
            Stage::Aborted { step, cause } => {
                assert_eq!(step, "trust-artifacts");
                assert!(cause.contains("manifest upload refused"));
            }
            other => panic!("unexpected stage {:?}", other),
        }

        let log = log.lock().unwrap();
        assert!(!log.iter().any(|e| e.contains("gatus") || e.contains("traefik")));
    }

    /// Story: the registry never answering leaves the environment at CaReady
    #[tokio::test]
    async fn story_registry_timeout_stops_before_push() {
        let dir = tempfile::tempdir().unwrap();
        let log: Log = Arc::default();

        let mut registry = MockRegistryClient::new();
        registry
            .expect_wait_ready()
            .returning(|t| Err(Error::timeout("registry", t)));
        registry.expect_push().never();

        let mut orchestrator = Orchestrator::new(
            plan(dir.path()),
            backends(
                empty_runtime(&log),
                MockClusterProvisioner::new(),
                registry,
                MockManifestApplier::new(),
            ),
        );

        assert!(orchestrator.start().await.is_err());
        assert!(matches!(orchestrator.stage(), Stage::Aborted { step, .. } if step == "zot"));
    }

    #[tokio::test]
    async fn existing_root_ca_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan(dir.path());
        let original = pki::generate_root(&plan.domain, &plan.ca_cert, &plan.ca_key).unwrap();

        let orchestrator = Orchestrator::new(
            plan,
            backends(
                MockContainerRuntime::new(),
                MockClusterProvisioner::new(),
                MockRegistryClient::new(),
                MockManifestApplier::new(),
            ),
        );
        assert_eq!(orchestrator.ensure_root_ca().unwrap(), original.cert_pem);
    }

    #[tokio::test]
    async fn orphaned_root_key_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan(dir.path());
        std::fs::write(&plan.ca_key, "key").unwrap();

        let orchestrator = Orchestrator::new(
            plan,
            backends(
                MockContainerRuntime::new(),
                MockClusterProvisioner::new(),
                MockRegistryClient::new(),
                MockManifestApplier::new(),
            ),
        );
        assert!(matches!(
            orchestrator.ensure_root_ca(),
            Err(Error::Configuration(_))
        ));
    }

    /// Story: enabled GitOps receives the root CA for the repo server
    #[tokio::test]
    async fn story_argocd_gets_root_ca() {
        let dir = tempfile::tempdir().unwrap();
        let log: Log = Arc::default();
        let mut plan = plan(dir.path());
        plan.argocd = Some(ArgoCdConfig::new(&plan.domain, 8443));

        let mut kubectl = MockManifestApplier::new();
        let l = log.clone();
        kubectl.expect_apply_manifest().returning(move |m| {
            if m.contains("kinder-ca-cert") {
                l.lock().unwrap().push("argocd-ca".to_string());
            }
            Ok(())
        });
        kubectl.expect_apply_url().returning(|_, _| Ok(()));
        kubectl.expect_patch().returning(|_, _, _, _| Ok(()));
        kubectl.expect_rollout_status().returning(|_, _, _| Ok(()));

        let mut orchestrator = Orchestrator::new(
            plan,
            backends(empty_runtime(&log), kind(&log), registry(&log), kubectl),
        );
        orchestrator.start().await.unwrap();

        assert_eq!(orchestrator.stage(), &Stage::AllReady);
        assert_eq!(log.lock().unwrap().last().map(String::as_str), Some("argocd-ca"));
    }

    // ==========================================================================
    // Story Tests: Teardown
    // ==========================================================================

    fn running(names: &[&str]) -> Vec<ContainerSummary> {
        names
            .iter()
            .map(|n| ContainerSummary {
                id: n.to_string(),
                names: vec![format!("/{}", n)],
                state: "running".to_string(),
            })
            .collect()
    }

    /// Story: teardown keeps going past failures and names each one
    #[tokio::test]
    async fn story_teardown_continues_and_reports_failures() {
        let dir = tempfile::tempdir().unwrap();
        let removed: Log = Arc::default();

        let mut runtime = MockContainerRuntime::new();
        runtime.expect_list_containers().returning(|| {
            Ok(running(&["kinder-traefik", "kinder-zot", "kinder-step-ca"]))
        });
        runtime.expect_stop_container().returning(|_, _| Ok(()));
        let r = removed.clone();
        runtime.expect_remove_container().returning(move |name, force| {
            assert!(force);
            r.lock().unwrap().push(name.to_string());
            if name == "kinder-zot" {
                Err(Error::runtime("device busy"))
            } else {
                Ok(())
            }
        });
        runtime.expect_list_networks().returning(|| {
            Ok(vec![NetworkSummary {
                id: "net1".to_string(),
                name: "kinder".to_string(),
                driver: "bridge".to_string(),
            }])
        });
        runtime.expect_remove_network().times(1).returning(|_| Ok(()));

        let mut kind = MockClusterProvisioner::new();
        kind.expect_list().returning(|| Ok(vec!["kinder".to_string()]));
        kind.expect_delete()
            .returning(|_| Err(Error::command_failed("kind delete cluster failed")));

        let mut orchestrator = Orchestrator::new(
            plan(dir.path()),
            backends(runtime, kind, MockRegistryClient::new(), MockManifestApplier::new()),
        );

        let err = orchestrator.stop(true).await.unwrap_err();
        match err {
            Error::Teardown(failures) => {
                assert_eq!(failures.failed_steps(), vec!["kind", "zot"]);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(
            *removed.lock().unwrap(),
            vec!["kinder-traefik", "kinder-zot", "kinder-step-ca"]
        );
        assert_eq!(orchestrator.stage(), &Stage::NotStarted);
    }

    /// Story: stopping an environment that is already gone succeeds
    #[tokio::test]
    async fn story_stop_of_missing_environment_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let mut runtime = MockContainerRuntime::new();
        runtime.expect_list_containers().returning(|| Ok(vec![]));
        runtime.expect_list_networks().returning(|| Ok(vec![]));
        runtime.expect_remove_container().never();
        runtime.expect_remove_network().never();

        let mut kind = MockClusterProvisioner::new();
        kind.expect_list().returning(|| Ok(vec![]));
        kind.expect_delete().never();

        let mut orchestrator = Orchestrator::new(
            plan(dir.path()),
            backends(runtime, kind, MockRegistryClient::new(), MockManifestApplier::new()),
        );
        orchestrator.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn restart_keeps_network() {
        let dir = tempfile::tempdir().unwrap();
        let log: Log = Arc::default();
        let mut runtime = empty_runtime(&log);
        runtime.expect_remove_network().never();

        let mut orchestrator = Orchestrator::new(
            plan(dir.path()),
            backends(runtime, kind(&log), registry(&log), MockManifestApplier::new()),
        );
        orchestrator.restart().await.unwrap();
        assert_eq!(orchestrator.stage(), &Stage::AllReady);
    }

    /// Story: a cluster that refuses to delete does not block the restart
    #[tokio::test]
    async fn story_restart_proceeds_past_failed_teardown() {
        let dir = tempfile::tempdir().unwrap();
        let log: Log = Arc::default();
        let mut runtime = empty_runtime(&log);
        runtime.expect_remove_network().never();

        let mut kind = MockClusterProvisioner::new();
        kind.expect_list().returning(|| Ok(vec!["kinder".to_string()]));
        kind.expect_delete()
            .times(1)
            .returning(|_| Err(Error::command_failed("kind delete cluster failed")));
        kind.expect_create().never();
        kind.expect_kubeconfig()
            .returning(|_| Ok("apiVersion: v1\nkind: Config\n".to_string()));

        let mut orchestrator = Orchestrator::new(
            plan(dir.path()),
            backends(runtime, kind, registry(&log), MockManifestApplier::new()),
        );
        orchestrator.restart().await.unwrap();

        assert_eq!(orchestrator.stage(), &Stage::AllReady);
        assert!(log.lock().unwrap().contains(&"push:trust-bundle".to_string()));
        assert!(dir.path().join("kubeconfig").exists());
    }

    // ==========================================================================
    // Status and clean
    // ==========================================================================

    #[tokio::test]
    async fn status_reports_each_component() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan(dir.path());
        pki::generate_root(&plan.domain, &plan.ca_cert, &plan.ca_key).unwrap();

        let mut runtime = MockContainerRuntime::new();
        runtime
            .expect_list_containers()
            .returning(|| Ok(running(&["kinder-zot"])));
        runtime.expect_list_networks().returning(|| {
            Ok(vec![NetworkSummary {
                id: "net1".to_string(),
                name: "kinder".to_string(),
                driver: "bridge".to_string(),
            }])
        });
        runtime
            .expect_inspect_container()
            .returning(|_| Ok(ContainerDetails::default()));
        let mut kind = MockClusterProvisioner::new();
        kind.expect_list().returning(|| Ok(vec![]));

        let orchestrator = Orchestrator::new(
            plan,
            backends(runtime, kind, MockRegistryClient::new(), MockManifestApplier::new()),
        );
        let status = orchestrator.status().await.unwrap();

        assert!(status.ca.unwrap().days_remaining() > 300);
        assert_eq!(status.network_id.as_deref(), Some("net1"));
        assert!(!status.cluster);
        assert!(status.nodes.is_empty());
        let states: Vec<_> = status
            .services
            .iter()
            .map(|s| (s.service, s.state.as_deref()))
            .collect();
        assert_eq!(
            states,
            vec![
                ("step-ca", None),
                ("zot", Some("running")),
                ("gatus", None),
                ("traefik", None)
            ]
        );
        assert_eq!(status.endpoints[1].1, "https://ca.c0000201.sslip.io:8443");
    }

    #[tokio::test]
    async fn status_lists_nodes_of_existing_cluster() {
        let dir = tempfile::tempdir().unwrap();

        let mut runtime = MockContainerRuntime::new();
        runtime.expect_list_containers().returning(|| {
            Ok(running(&[
                "kinder-worker",
                "kinder-control-plane",
                "kinder-zot",
                "other-control-plane",
            ]))
        });
        runtime.expect_list_networks().returning(|| Ok(vec![]));
        let mut kind = MockClusterProvisioner::new();
        kind.expect_list()
            .returning(|| Ok(vec!["kinder".to_string()]));

        let orchestrator = Orchestrator::new(
            plan(dir.path()),
            backends(runtime, kind, MockRegistryClient::new(), MockManifestApplier::new()),
        );
        let status = orchestrator.status().await.unwrap();

        assert!(status.ca.is_none());
        assert!(status.network_id.is_none());
        assert!(status.cluster);
        assert_eq!(status.nodes, vec!["kinder-control-plane", "kinder-worker"]);
    }

    #[tokio::test]
    async fn clean_refuses_while_containers_exist() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir_all(&data).unwrap();

        let mut runtime = MockContainerRuntime::new();
        runtime
            .expect_list_containers()
            .returning(|| Ok(running(&["kinder-gatus"])));

        let orchestrator = Orchestrator::new(
            plan(&data),
            backends(
                runtime,
                MockClusterProvisioner::new(),
                MockRegistryClient::new(),
                MockManifestApplier::new(),
            ),
        );
        let err = orchestrator.clean().await.unwrap_err();
        assert!(err.to_string().contains("kinder-gatus"));
        assert!(data.exists());
    }

    #[tokio::test]
    async fn clean_removes_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir_all(data.join("zot")).unwrap();

        let mut runtime = MockContainerRuntime::new();
        runtime.expect_list_containers().returning(|| Ok(vec![]));

        let orchestrator = Orchestrator::new(
            plan(&data),
            backends(
                runtime,
                MockClusterProvisioner::new(),
                MockRegistryClient::new(),
                MockManifestApplier::new(),
            ),
        );
        orchestrator.clean().await.unwrap();
        assert!(!data.exists());
    }

    // ==========================================================================
    // Story Tests: Single Components
    // ==========================================================================

    /// Story: starting only the registry still brings up its CA and network
    #[tokio::test]
    async fn story_registry_alone_gets_ca_and_network() {
        let dir = tempfile::tempdir().unwrap();
        let log: Log = Arc::default();
        let orchestrator = Orchestrator::new(
            plan(dir.path()),
            backends(
                empty_runtime(&log),
                MockClusterProvisioner::new(),
                registry(&log),
                MockManifestApplier::new(),
            ),
        );

        let id = orchestrator.start_component(Component::Zot).await.unwrap();

        assert_eq!(id, "kinder-zot");
        assert_eq!(
            *log.lock().unwrap(),
            vec!["network:kinder", "container:kinder-zot", "registry-ready"]
        );
        assert!(dir.path().join("ca.crt").exists());
    }

    #[tokio::test]
    async fn gatus_start_does_not_wait_for_registry() {
        let dir = tempfile::tempdir().unwrap();
        let log: Log = Arc::default();
        let mut registry = MockRegistryClient::new();
        registry.expect_wait_ready().never();
        let orchestrator = Orchestrator::new(
            plan(dir.path()),
            backends(empty_runtime(&log), MockClusterProvisioner::new(), registry, MockManifestApplier::new()),
        );

        orchestrator.start_component(Component::Gatus).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["network:kinder", "container:kinder-gatus"]);
    }

    #[tokio::test]
    async fn stopping_a_component_removes_only_that_container() {
        let dir = tempfile::tempdir().unwrap();
        let mut runtime = MockContainerRuntime::new();
        runtime
            .expect_list_containers()
            .returning(|| Ok(running(&["kinder-gatus", "kinder-zot"])));
        runtime
            .expect_stop_container()
            .withf(|name, _| name == "kinder-gatus")
            .times(1)
            .returning(|_, _| Ok(()));
        runtime
            .expect_remove_container()
            .withf(|name, force| name == "kinder-gatus" && *force)
            .times(1)
            .returning(|_, _| Ok(()));
        let log: Log = Arc::default();
        let orchestrator = Orchestrator::new(
            plan(dir.path()),
            backends(runtime, MockClusterProvisioner::new(), registry(&log), MockManifestApplier::new()),
        );

        assert!(orchestrator.stop_component(Component::Gatus).await.unwrap());
        assert!(!orchestrator.stop_component(Component::Traefik).await.unwrap());
    }

    #[tokio::test]
    async fn network_create_and_remove_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let log: Log = Arc::default();
        let mut runtime = empty_runtime(&log);
        runtime.expect_remove_network().never();
        let orchestrator = Orchestrator::new(
            plan(dir.path()),
            backends(runtime, MockClusterProvisioner::new(), registry(&log), MockManifestApplier::new()),
        );

        assert_eq!(orchestrator.create_network().await.unwrap(), "net1");
        assert!(!orchestrator.remove_network().await.unwrap());

        let mut runtime = MockContainerRuntime::new();
        runtime.expect_list_networks().returning(|| {
            Ok(vec![NetworkSummary {
                id: "net1".to_string(),
                name: "kinder".to_string(),
                driver: "bridge".to_string(),
            }])
        });
        runtime.expect_create_network().never();
        runtime
            .expect_remove_network()
            .withf(|name| name == "kinder")
            .times(1)
            .returning(|_| Ok(()));
        let orchestrator = Orchestrator::new(
            plan(dir.path()),
            backends(runtime, MockClusterProvisioner::new(), registry(&log), MockManifestApplier::new()),
        );

        assert_eq!(orchestrator.create_network().await.unwrap(), "net1");
        assert!(orchestrator.remove_network().await.unwrap());
    }

    /// Story: the cluster is only created against a CA that already exists
    #[tokio::test]
    async fn story_kind_start_needs_the_root_ca() {
        let dir = tempfile::tempdir().unwrap();
        let log: Log = Arc::default();
        let plan = plan(dir.path());

        let mut provisioner = MockClusterProvisioner::new();
        provisioner.expect_create().never();
        let orchestrator = Orchestrator::new(
            plan.clone(),
            backends(empty_runtime(&log), provisioner, registry(&log), MockManifestApplier::new()),
        );
        let err = orchestrator.start_kind().await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(log.lock().unwrap().is_empty());

        pki::generate_root(&plan.domain, &plan.ca_cert, &plan.ca_key).unwrap();
        let orchestrator = Orchestrator::new(
            plan,
            backends(empty_runtime(&log), kind(&log), registry(&log), MockManifestApplier::new()),
        );
        orchestrator.start_kind().await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["network:kinder", "kind:kinder"]);
        assert!(dir.path().join("kubeconfig").exists());
    }

    #[tokio::test]
    async fn kubeconfig_requires_the_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let log: Log = Arc::default();
        let orchestrator = Orchestrator::new(
            plan(dir.path()),
            backends(empty_runtime(&log), kind(&log), registry(&log), MockManifestApplier::new()),
        );
        assert!(matches!(
            orchestrator.kubeconfig().await,
            Err(Error::Configuration(_))
        ));

        let mut provisioner = MockClusterProvisioner::new();
        provisioner
            .expect_list()
            .returning(|| Ok(vec!["kinder".to_string()]));
        provisioner
            .expect_kubeconfig()
            .returning(|name| Ok(format!("current-context: kind-{}\n", name)));
        let orchestrator = Orchestrator::new(
            plan(dir.path()),
            backends(empty_runtime(&log), provisioner, registry(&log), MockManifestApplier::new()),
        );
        assert_eq!(
            orchestrator.kubeconfig().await.unwrap(),
            "current-context: kind-kinder\n"
        );
    }

    /// Story: artifacts are built from the CA on disk and pushed once the
    /// registry answers
    #[tokio::test]
    async fn story_artifacts_push_after_registry_ready() {
        let dir = tempfile::tempdir().unwrap();
        let log: Log = Arc::default();
        let plan = plan(dir.path());
        let orchestrator = Orchestrator::new(
            plan.clone(),
            backends(empty_runtime(&log), MockClusterProvisioner::new(), registry(&log), MockManifestApplier::new()),
        );
        assert!(matches!(
            orchestrator.trust_artifacts().await,
            Err(Error::Configuration(_))
        ));

        pki::generate_root(&plan.domain, &plan.ca_cert, &plan.ca_key).unwrap();
        let artifacts = orchestrator.trust_artifacts().await.unwrap();
        let names: Vec<_> = artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["trust-bundle", "trust-manager-bundle", "cert-manager-issuer"]
        );

        let urls = orchestrator.push_artifacts(&artifacts[2..]).await.unwrap();
        assert_eq!(
            urls,
            vec!["http://localhost:5000/v2/cert-manager-issuer/manifests/latest"]
        );
        assert_eq!(
            *log.lock().unwrap(),
            vec!["registry-ready", "push:cert-manager-issuer"]
        );
    }

    /// Story: ArgoCD bootstraps into an existing cluster and trusts the CA
    #[tokio::test]
    async fn story_argocd_bootstrap_trusts_root_ca() {
        let dir = tempfile::tempdir().unwrap();
        let log: Log = Arc::default();
        let mut plan = plan(dir.path());

        let orchestrator = Orchestrator::new(
            plan.clone(),
            backends(empty_runtime(&log), kind(&log), registry(&log), MockManifestApplier::new()),
        );
        assert!(matches!(
            orchestrator.bootstrap_argocd().await,
            Err(Error::Configuration(_))
        ));

        plan.argocd = Some(ArgoCdConfig::new(&plan.domain, 8443));
        pki::generate_root(&plan.domain, &plan.ca_cert, &plan.ca_key).unwrap();

        let mut provisioner = MockClusterProvisioner::new();
        provisioner
            .expect_list()
            .returning(|| Ok(vec!["kinder".to_string()]));
        let patched: Log = Arc::default();
        let mut kubectl = MockManifestApplier::new();
        kubectl.expect_apply_manifest().returning(|_| Ok(()));
        kubectl.expect_apply_url().returning(|_, _| Ok(()));
        kubectl.expect_rollout_status().returning(|_, _, _| Ok(()));
        let p = patched.clone();
        kubectl.expect_patch().returning(move |kind, name, _, _| {
            p.lock().unwrap().push(format!("{}/{}", kind, name));
            Ok(())
        });

        let orchestrator = Orchestrator::new(
            plan,
            backends(empty_runtime(&log), provisioner, registry(&log), kubectl),
        );
        orchestrator.bootstrap_argocd().await.unwrap();

        assert!(patched
            .lock()
            .unwrap()
            .contains(&"deployment/argocd-repo-server".to_string()));
    }
}
