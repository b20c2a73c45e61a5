//! trust-manager kustomization distributing the root CA into the cluster
//!
//! A source ConfigMap holds the PEM; a `Bundle` fans it out to a target
//! ConfigMap key in every (or every selected) namespace.

use serde_json::{json, Value};

use super::artifact::Artifact;
use super::to_yaml;
use crate::gitops::sanitize_name;
use crate::{Error, Result};

/// Repository name of the artifact
pub const IMAGE_NAME: &str = "trust-manager-bundle";

/// Namespace trust-manager reads sources from
pub const NAMESPACE: &str = "cert-manager";

/// Name of the `Bundle`
pub const BUNDLE_NAME: &str = "kinder-ca-bundle";

/// Name of the source ConfigMap
pub const SOURCE_CONFIGMAP: &str = "kinder-ca-source";

/// Key the bundle is written to in target ConfigMaps
pub const TARGET_KEY: &str = "ca-certificates.crt";

fn labels() -> Value {
    json!({
        "app.kubernetes.io/name": "kinder-ca",
        "app.kubernetes.io/component": "trust-bundle",
        "app.kubernetes.io/managed-by": "kinder"
    })
}

/// Options for the generated manifests
#[derive(Debug, Clone, Default)]
pub struct TrustManagerOptions {
    /// Restrict distribution to one namespace
    pub target_namespace: Option<String>,
}

impl TrustManagerOptions {
    /// The target namespace must already be a valid namespace name
    pub fn validate(&self) -> Result<()> {
        if let Some(ns) = &self.target_namespace {
            if sanitize_name(ns)? != *ns {
                return Err(Error::validation(format!(
                    "trust.targetNamespace {:?} must be a lowercase DNS label",
                    ns
                )));
            }
        }
        Ok(())
    }
}

/// `configmap.yaml` holding `ca_pem` under `ca.crt`
pub fn configmap_yaml(ca_pem: &str) -> Result<String> {
    to_yaml(&json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": SOURCE_CONFIGMAP,
            "namespace": NAMESPACE,
            "labels": labels()
        },
        "data": {"ca.crt": ca_pem}
    }))
}

/// `bundle.yaml` fanning the source out to [`TARGET_KEY`]
pub fn bundle_yaml(options: &TrustManagerOptions) -> Result<String> {
    options.validate()?;

    let mut target = json!({"configMap": {"key": TARGET_KEY}});
    if let Some(ns) = &options.target_namespace {
        target["namespaceSelector"] = json!({
            "matchLabels": {"kubernetes.io/metadata.name": ns}
        });
    }
    to_yaml(&json!({
        "apiVersion": "trust.cert-manager.io/v1alpha1",
        "kind": "Bundle",
        "metadata": {"name": BUNDLE_NAME, "labels": labels()},
        "spec": {
            "sources": [{"configMap": {"name": SOURCE_CONFIGMAP, "key": "ca.crt"}}],
            "target": target
        }
    }))
}

/// `kustomization.yaml` listing `resources`
pub fn kustomization_yaml(resources: &[&str]) -> Result<String> {
    to_yaml(&json!({
        "apiVersion": "kustomize.config.k8s.io/v1beta1",
        "kind": "Kustomization",
        "resources": resources
    }))
}

/// The trust-manager artifact for `ca_pem`
pub fn artifact(ca_pem: &str, options: &TrustManagerOptions) -> Result<Artifact> {
    Ok(Artifact::new(
        IMAGE_NAME,
        "Trust Manager Bundle",
        "Kustomization bundle with trust-manager resources for kinder CA",
    )
    .with_label("argocd.argoproj.io/manifest-type", "kustomize")
    .with_file(
        "kustomization.yaml",
        kustomization_yaml(&["configmap.yaml", "bundle.yaml"])?,
    )
    .with_file("configmap.yaml", configmap_yaml(ca_pem)?)
    .with_file("bundle.yaml", bundle_yaml(options)?))
}
