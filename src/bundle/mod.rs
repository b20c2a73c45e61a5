//! Trust material packaged for the cluster
//!
//! Three artifacts are pushed to the local registry once it is ready:
//!
//! - `trust-bundle`: the root CA followed by the public CA bundle, as one PEM
//! - `trust-manager-bundle`: a kustomization distributing that PEM with trust-manager
//! - `cert-manager-issuer`: a ClusterIssuer using Step CA over ACME
//!
//! The root CA always comes first in a combined bundle.

use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::{Error, Result};

pub mod artifact;
pub mod issuer;
pub mod trust_manager;

pub use artifact::{Artifact, ArtifactFile, OciRegistry, RegistryClient};
pub use issuer::IssuerOptions;
pub use trust_manager::TrustManagerOptions;

/// Repository name of the combined PEM artifact
pub const TRUST_BUNDLE_IMAGE: &str = "trust-bundle";

/// File name of the combined PEM inside the artifact
pub const TRUST_BUNDLE_FILE: &str = "trust-bundle.pem";

/// Public CA bundle maintained by the curl project from Mozilla's store
pub const MOZILLA_BUNDLE_URL: &str = "https://curl.se/ca/cacert.pem";

/// Timeout for fetching the public CA bundle
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

const ROOT_HEADER: &str = "# Kinder Root CA Certificate\n";
const PUBLIC_HEADER: &str = "\n# Mozilla CA Certificate Bundle\n";

/// Concatenate PEM bundles, root first.
///
/// The first bundle gets the root CA header and every later one the public
/// bundle header. Empty bundles are skipped and every bundle ends in a newline.
pub fn combine_bundles(bundles: &[&[u8]]) -> Vec<u8> {
    let mut combined = Vec::new();
    for (i, bundle) in bundles.iter().enumerate() {
        if bundle.is_empty() {
            continue;
        }
        let header = if i == 0 { ROOT_HEADER } else { PUBLIC_HEADER };
        combined.extend_from_slice(header.as_bytes());
        combined.extend_from_slice(bundle);
        if !bundle.ends_with(b"\n") {
            combined.push(b'\n');
        }
    }
    combined
}

/// Short content hash of the combined bundle: first 8 bytes of SHA-256, hex
pub fn bundle_hash(root: &[u8], public: &[u8]) -> String {
    let digest = Sha256::digest(combine_bundles(&[root, public]));
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

pub(crate) fn to_yaml(value: &serde_json::Value) -> Result<String> {
    Ok(serde_yaml::to_string(value)?)
}

/// Source of the public CA bundle appended after the root
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PublicCaSource: Send + Sync {
    /// Fetch the bundle as PEM bytes
    async fn fetch(&self) -> Result<Vec<u8>>;
}

/// The Mozilla CA bundle downloaded over HTTPS
#[derive(Debug, Clone)]
pub struct MozillaBundle {
    url: String,
}

impl Default for MozillaBundle {
    fn default() -> Self {
        Self {
            url: MOZILLA_BUNDLE_URL.to_string(),
        }
    }
}

impl MozillaBundle {
    /// Fetch from a different URL
    pub fn with_url(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl PublicCaSource for MozillaBundle {
    async fn fetch(&self) -> Result<Vec<u8>> {
        info!("Downloading public CA bundle from {}", self.url);
        let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
        let response = client.get(&self.url).send().await?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(Error::registry(format!(
                "failed to download CA bundle from {}: HTTP {}",
                self.url,
                response.status().as_u16()
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// The combined PEM artifact
pub fn trust_bundle_artifact(combined: Vec<u8>) -> Artifact {
    Artifact::new(
        TRUST_BUNDLE_IMAGE,
        "Trust Bundle",
        "Combined CA certificate bundle with kinder root CA and Mozilla CAs",
    )
    .with_label("trust-manager.io/bundle", "true")
    .with_file(TRUST_BUNDLE_FILE, combined)
}

/// Every trust artifact for one root CA, in push order.
///
/// Options are validated before anything is built, so a bad value yields
/// no artifacts at all.
pub fn trust_artifacts(
    root_pem: &str,
    public_pem: &[u8],
    trust_manager: &TrustManagerOptions,
    issuer: &IssuerOptions,
) -> Result<Vec<Artifact>> {
    trust_manager.validate()?;
    issuer.validate()?;

    let combined = combine_bundles(&[root_pem.as_bytes(), public_pem]);
    let combined_text = String::from_utf8_lossy(&combined).to_string();
    let trust_manager = trust_manager::artifact(&combined_text, trust_manager)?;
    let issuer = issuer::artifact(root_pem, issuer)?;
    Ok(vec![trust_bundle_artifact(combined), trust_manager, issuer])
}
