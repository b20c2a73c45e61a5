//! Health checks behind `kinder diagnostics`
//!
//! Every check runs even when an earlier one fails; the [`Report`] lists
//! each outcome in order. Checks only read state, except the end-to-end
//! check which copies a small image into the registry and runs a pod from
//! it, deleting the pod afterwards.

use std::net::SocketAddr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde_json::json;
use tokio::net::UdpSocket;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::cluster;
use crate::mirror::REGISTRY_PORT;
use crate::orchestrator::{Backends, Plan};
use crate::pki::CertificateInfo;
use crate::poll::wait_with_timeout;
use crate::runtime;
use crate::{Error, Result};

/// Documentation address whose route shows the host can reach the proxy IP
pub const ROUTE_TARGET: &str = "192.0.2.1:1";

/// Deadline for the route check
pub const ROUTE_TIMEOUT: Duration = Duration::from_secs(3);

/// Per-request timeout for endpoint checks
pub const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(5);

/// Image copied into the registry by the end-to-end check
pub const SOURCE_IMAGE: &str = "docker://busybox:1.36";

/// Repository the end-to-end image is pushed to
pub const TEST_IMAGE: &str = "kinder-diag-test:latest";

/// Pod started from [`TEST_IMAGE`]
pub const TEST_POD: &str = "kinder-diag-test";

/// Namespace of [`TEST_POD`]
pub const TEST_NAMESPACE: &str = "default";

/// Interval between pod phase reads
pub const POD_INTERVAL: Duration = Duration::from_secs(2);

/// Deadline for [`TEST_POD`] to reach `Running`
pub const POD_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of one check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Check passed, with detail
    Passed(String),
    /// Check failed, with the reason
    Failed(String),
    /// Check could not run
    Skipped(String),
}

/// One named check and its outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    /// What was checked
    pub name: String,
    /// How it went
    pub outcome: Outcome,
}

impl Check {
    fn from_result(name: impl Into<String>, result: Result<String>) -> Self {
        Self {
            name: name.into(),
            outcome: match result {
                Ok(detail) => Outcome::Passed(detail),
                Err(e) => Outcome::Failed(e.to_string()),
            },
        }
    }
}

/// Every check, in the order it ran
#[derive(Debug, Clone, Default)]
pub struct Report {
    /// Outcomes
    pub checks: Vec<Check>,
}

impl Report {
    /// True when nothing failed; skipped checks do not count as failures
    pub fn passed(&self) -> bool {
        !self
            .checks
            .iter()
            .any(|c| matches!(c.outcome, Outcome::Failed(_)))
    }

    /// Names of the failed checks
    pub fn failures(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|c| matches!(c.outcome, Outcome::Failed(_)))
            .map(|c| c.name.as_str())
            .collect()
    }

    fn push(&mut self, check: Check) {
        match &check.outcome {
            Outcome::Passed(detail) => debug!("{}: {}", check.name, detail),
            Outcome::Failed(reason) => warn!("{}: {}", check.name, reason),
            Outcome::Skipped(reason) => debug!("{} skipped: {}", check.name, reason),
        }
        self.checks.push(check);
    }
}

/// HTTP GET returning the status code, without following redirects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EndpointClient: Send + Sync {
    /// Status code returned for `url`
    async fn status(&self, url: &str) -> Result<u16>;
}

/// [`EndpointClient`] over reqwest, trusting the root CA when given
pub struct HttpEndpoints {
    client: reqwest::Client,
}

impl HttpEndpoints {
    /// Client that verifies TLS against `ca_pem` in addition to the system roots
    pub fn new(ca_pem: Option<&[u8]>) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(ENDPOINT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none());
        if let Some(pem) = ca_pem {
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(pem)?);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl EndpointClient for HttpEndpoints {
    async fn status(&self, url: &str) -> Result<u16> {
        let response = self.client.get(url).send().await?;
        Ok(response.status().as_u16())
    }
}

/// Copies an image between registries
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ImageCopier: Send + Sync {
    /// Copy `source` to `destination`, both in transport form (`docker://...`)
    async fn copy(&self, source: &str, destination: &str) -> Result<()>;
}

/// [`ImageCopier`] driving the `skopeo` binary.
///
/// skopeo writes OCI manifests, which Zot requires.
#[derive(Debug, Clone)]
pub struct Skopeo {
    binary: String,
}

impl Default for Skopeo {
    fn default() -> Self {
        Self {
            binary: "skopeo".to_string(),
        }
    }
}

impl Skopeo {
    /// Use `skopeo` from `PATH`
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ImageCopier for Skopeo {
    async fn copy(&self, source: &str, destination: &str) -> Result<()> {
        debug!("{} copy {} {}", self.binary, source, destination);
        let output = Command::new(&self.binary)
            .args([
                "copy",
                "--insecure-policy",
                "--dest-tls-verify=false",
                source,
                destination,
            ])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::command_failed(format!("failed to run {}: {}", self.binary, e)))?;
        if !output.status.success() {
            return Err(Error::command_failed(format!(
                "{} copy failed: {}",
                self.binary,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// Collaborators used only by diagnostics
#[derive(Clone)]
pub struct Tools {
    /// HTTP client for endpoint checks
    pub endpoints: Arc<dyn EndpointClient>,
    /// Image copier for the end-to-end check
    pub images: Arc<dyn ImageCopier>,
    /// Address the route check connects a UDP socket to
    pub route_target: SocketAddr,
}

/// URLs checked through the proxy and directly, with a healthy path each
pub fn endpoint_urls(domain: &str, https_port: u16) -> Vec<(&'static str, String)> {
    vec![
        ("Zot Registry (direct)", format!("http://localhost:{}/v2/", REGISTRY_PORT)),
        ("Step CA", format!("https://ca.{}:{}/health", domain, https_port)),
        ("Zot Registry", format!("https://registry.{}:{}/v2/", domain, https_port)),
        ("Gatus Dashboard", format!("https://gatus.{}:{}/", domain, https_port)),
        (
            "Traefik Dashboard",
            format!("https://traefik.{}:{}/dashboard/", domain, https_port),
        ),
    ]
}

/// Connect a UDP socket to `target`; this needs a route, not a listener
pub async fn check_route(target: SocketAddr) -> Result<String> {
    let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind).await?;
    tokio::time::timeout(ROUTE_TIMEOUT, socket.connect(target))
        .await
        .map_err(|_| Error::timeout(format!("route to {}", target.ip()), ROUTE_TIMEOUT))?
        .map_err(|e| Error::configuration(format!("{} is not routable: {}", target.ip(), e)))?;
    Ok(format!("{} is routable", target.ip()))
}

fn check_ca(plan: &Plan) -> Result<String> {
    if !plan.ca_cert.exists() {
        return Err(Error::configuration(format!(
            "no CA at {}; run `kinder ca generate`",
            plan.ca_cert.display()
        )));
    }
    let ca = CertificateInfo::from_file(&plan.ca_cert)?;
    if ca.is_not_yet_valid() {
        return Err(Error::configuration("CA certificate is not yet valid"));
    }
    if ca.is_expired() {
        return Err(Error::configuration("CA certificate has expired"));
    }
    Ok(format!(
        "{} ({} days remaining)",
        plan.ca_cert.display(),
        ca.days_remaining()
    ))
}

async fn check_endpoint(client: &dyn EndpointClient, url: &str) -> Result<String> {
    let status = client
        .status(url)
        .await
        .map_err(|e| Error::command_failed(format!("unreachable ({})", e)))?;
    if status >= 400 {
        return Err(Error::command_failed(format!("HTTP {}", status)));
    }
    Ok(format!("HTTP {}", status))
}

fn test_pod_yaml() -> Result<String> {
    let image = format!("localhost:{}/{}", REGISTRY_PORT, TEST_IMAGE);
    Ok(serde_yaml::to_string(&json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": TEST_POD,
            "namespace": TEST_NAMESPACE,
            "labels": {"app": TEST_POD}
        },
        "spec": {
            "containers": [{
                "name": "test",
                "image": image,
                "command": ["sleep", "300"]
            }],
            "restartPolicy": "Never"
        }
    }))?)
}

/// Push an image through the registry and run a pod from it
async fn check_end_to_end(backends: &Backends, tools: &Tools, pod_timeout: Duration) -> Result<String> {
    let destination = format!("docker://localhost:{}/{}", REGISTRY_PORT, TEST_IMAGE);
    info!("Copying {} into the registry", SOURCE_IMAGE);
    tools.images.copy(SOURCE_IMAGE, &destination).await?;

    let kubectl = backends.kubectl.as_ref();
    kubectl.apply_manifest(&test_pod_yaml()?).await?;

    let result = wait_with_timeout(pod_timeout, POD_INTERVAL, "test pod to run", move || async move {
        match kubectl
            .get_field("pod", TEST_POD, TEST_NAMESPACE, "{.status.phase}")
            .await
        {
            Ok(phase) if phase == "Running" => Ok(Some(())),
            Ok(phase) if phase == "Failed" || phase == "Error" => {
                Err(format!("pod failed to start (phase {})", phase))
            }
            Ok(phase) => {
                debug!("Test pod phase: {:?}", phase);
                Ok(None)
            }
            Err(e) => {
                debug!("Test pod not readable yet: {}", e);
                Ok(None)
            }
        }
    })
    .await;

    if let Err(e) = kubectl.delete("pod", TEST_POD, TEST_NAMESPACE).await {
        warn!("Failed to delete {}: {}", TEST_POD, e);
    }
    result.map(|_| format!("pod ran from {}", TEST_IMAGE))
}

/// Run every check against the environment described by `plan`
pub async fn run(plan: &Plan, backends: &Backends, tools: &Tools) -> Report {
    run_with_pod_timeout(plan, backends, tools, POD_TIMEOUT).await
}

async fn run_with_pod_timeout(
    plan: &Plan,
    backends: &Backends,
    tools: &Tools,
    pod_timeout: Duration,
) -> Report {
    let runtime = backends.runtime.as_ref();
    let mut report = Report::default();

    report.push(Check::from_result(
        "Docker",
        runtime
            .list_networks()
            .await
            .map(|_| "daemon is running and accessible".to_string()),
    ));

    report.push(Check::from_result(
        format!("Route to {}", tools.route_target.ip()),
        check_route(tools.route_target).await,
    ));

    report.push(Check::from_result("CA certificate", check_ca(plan)));

    let network = &plan.network.name;
    report.push(Check::from_result(
        format!("Network {}", network),
        match runtime::network_exists(runtime, network).await {
            Ok(true) => Ok("exists".to_string()),
            Ok(false) => Err(Error::configuration(format!("network {} does not exist", network))),
            Err(e) => Err(e),
        },
    ));

    let ctx = plan.service_context();
    for adapter in plan.services() {
        let name = ctx.container_name(adapter.name());
        let result = match runtime::find_container(runtime, &name).await {
            Ok(Some(c)) if c.state == "running" => Ok(format!("{} is running", name)),
            Ok(Some(c)) => Err(Error::runtime(format!("{} is {}", name, c.state))),
            Ok(None) => Err(Error::runtime(format!("{} not found", name))),
            Err(e) => Err(e),
        };
        report.push(Check::from_result(format!("Container {}", adapter.name()), result));
    }

    for (name, url) in endpoint_urls(&plan.domain, plan.traefik.https_port) {
        report.push(Check::from_result(
            format!("Endpoint {}", name),
            check_endpoint(tools.endpoints.as_ref(), &url).await,
        ));
    }

    let e2e = "Registry to cluster";
    match cluster::cluster_exists(backends.cluster.as_ref(), &plan.cluster.name).await {
        Ok(true) => report.push(Check::from_result(
            e2e,
            check_end_to_end(backends, tools, pod_timeout).await,
        )),
        Ok(false) => report.push(Check {
            name: e2e.to_string(),
            outcome: Outcome::Skipped("kind cluster not running".to_string()),
        }),
        Err(e) => report.push(Check {
            name: e2e.to_string(),
            outcome: Outcome::Skipped(format!("cluster state unknown: {}", e)),
        }),
    }

    report
}
