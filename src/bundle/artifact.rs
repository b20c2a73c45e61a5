//! Single-layer OCI artifacts and the registry they are pushed to
//!
//! An [`Artifact`] is a handful of files packed into one gzipped tar layer,
//! plus an image config carrying descriptive labels. Pushes go to the local
//! registry over plain HTTP with anonymous auth and are not retried.

use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
#[cfg(test)]
use mockall::automock;
use oci_distribution::client::{ClientConfig, ClientProtocol, Config, ImageLayer};
use oci_distribution::manifest::{IMAGE_CONFIG_MEDIA_TYPE, IMAGE_LAYER_GZIP_MEDIA_TYPE};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client, Reference};
use serde_json::json;
use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::info;

use crate::services::zot;
use crate::{Error, Result};

/// Registry address artifacts are pushed to from the host
pub const LOCAL_REGISTRY: &str = "localhost:5000";

/// Tag every artifact is pushed with
pub const DEFAULT_TAG: &str = "latest";

/// Author recorded in image configs
pub const AUTHOR: &str = "kinder";

/// Source label value
pub const SOURCE_URL: &str = "https://codeberg.org/hipkoi/kinder";

/// Title label key
pub const LABEL_TITLE: &str = "org.opencontainers.image.title";
/// Description label key
pub const LABEL_DESCRIPTION: &str = "org.opencontainers.image.description";
/// Source label key
pub const LABEL_SOURCE: &str = "org.opencontainers.image.source";

/// A file inside the artifact layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFile {
    /// Path inside the layer
    pub path: String,
    /// File contents
    pub contents: Vec<u8>,
}

/// A named, labelled single-layer artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Repository name in the registry
    pub name: String,
    /// Tag
    pub tag: String,
    /// Files in layer order
    pub files: Vec<ArtifactFile>,
    /// Image config labels
    pub labels: BTreeMap<String, String>,
}

impl Artifact {
    /// Artifact tagged `latest` with the standard title/description/source labels
    pub fn new(name: impl Into<String>, title: &str, description: &str) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_TITLE.to_string(), title.to_string());
        labels.insert(LABEL_DESCRIPTION.to_string(), description.to_string());
        labels.insert(LABEL_SOURCE.to_string(), SOURCE_URL.to_string());
        Self {
            name: name.into(),
            tag: DEFAULT_TAG.to_string(),
            files: Vec::new(),
            labels,
        }
    }

    /// Add a file to the layer
    pub fn with_file(mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.files.push(ArtifactFile {
            path: path.into(),
            contents: contents.into(),
        });
        self
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// `<registry>/<name>:<tag>`
    pub fn reference(&self, registry: &str) -> String {
        format!("{}/{}:{}", registry, self.name, self.tag)
    }

    /// Uncompressed tar of the files
    pub fn tar(&self) -> Result<Vec<u8>> {
        let mut builder = tar::Builder::new(Vec::new());
        let mtime = OffsetDateTime::now_utc().unix_timestamp().max(0) as u64;
        for file in &self.files {
            let mut header = tar::Header::new_gnu();
            header.set_size(file.contents.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(mtime);
            header.set_cksum();
            builder.append_data(&mut header, &file.path, file.contents.as_slice())?;
        }
        Ok(builder.into_inner()?)
    }

    /// The gzipped layer and the digest of its uncompressed content
    pub fn layer(&self) -> Result<(Vec<u8>, String)> {
        let tar = self.tar()?;
        let diff_id = format!("sha256:{:x}", Sha256::digest(&tar));

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar)?;
        Ok((encoder.finish()?, diff_id))
    }

    /// OCI image config JSON for a layer with `diff_id`
    pub fn config_json(&self, diff_id: &str) -> Result<Vec<u8>> {
        let created = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|e| Error::registry(format!("failed to format timestamp: {}", e)))?;
        let config = json!({
            "created": created,
            "author": AUTHOR,
            "architecture": "amd64",
            "os": "linux",
            "config": {"Labels": self.labels},
            "rootfs": {"type": "layers", "diff_ids": [diff_id]}
        });
        Ok(serde_json::to_vec(&config)?)
    }
}

/// The local registry as seen by the orchestrator
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Block until the registry API answers or `timeout` passes
    async fn wait_ready(&self, timeout: Duration) -> Result<()>;

    /// Push an artifact, returning the manifest URL
    async fn push(&self, artifact: &Artifact) -> Result<String>;
}

/// [`RegistryClient`] for a plain-HTTP OCI registry
pub struct OciRegistry {
    host: String,
    ready_url: String,
    client: Client,
}

impl OciRegistry {
    /// Registry at `host` (e.g. `localhost:5000`) polled at `ready_url`
    pub fn new(host: impl Into<String>, ready_url: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ready_url: ready_url.into(),
            client: Client::new(ClientConfig {
                protocol: ClientProtocol::Http,
                ..Default::default()
            }),
        }
    }

    /// The local registry published on the host
    pub fn local() -> Self {
        Self::new(LOCAL_REGISTRY, zot::READY_URL)
    }
}

#[async_trait]
impl RegistryClient for OciRegistry {
    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        zot::wait_ready(&self.ready_url, timeout).await
    }

    async fn push(&self, artifact: &Artifact) -> Result<String> {
        let image_ref = artifact.reference(&self.host);
        let reference: Reference = image_ref
            .parse()
            .map_err(|e| Error::registry(format!("invalid reference {}: {}", image_ref, e)))?;

        let (layer, diff_id) = artifact.layer()?;
        let layers = [ImageLayer::new(
            layer,
            IMAGE_LAYER_GZIP_MEDIA_TYPE.to_string(),
            None,
        )];
        let config = Config::new(
            artifact.config_json(&diff_id)?,
            IMAGE_CONFIG_MEDIA_TYPE.to_string(),
            None,
        );

        info!("Pushing {}", image_ref);
        let response = self
            .client
            .push(&reference, &layers, config, &RegistryAuth::Anonymous, None)
            .await
            .map_err(|e| Error::registry(format!("failed to push {}: {}", image_ref, e)))?;
        Ok(response.manifest_url)
    }
}
