//! Kubernetes manifests applied during ArgoCD bootstrap
//!
//! Every value interpolated here has been through [`super::validate`];
//! documents are built as JSON values and serialized, never spliced as text.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};

use super::validate::{repo_name, sanitize_name, validate_git_url, validate_yaml_value};
use super::{GitCredentials, RepositoryConfig};
use crate::bundle::{issuer, trust_manager, artifact::DEFAULT_TAG};
use crate::{Error, Result};

/// Secret holding the kinder root CA for the repo server
pub const CA_SECRET_NAME: &str = "kinder-ca-cert";

/// Where the repo server sees the root CA
pub const REPO_SERVER_CA_PATH: &str = "/etc/ssl/certs/kinder-ca.crt";

/// Deployment patched to trust the root CA
pub const REPO_SERVER: &str = "argocd-repo-server";

/// Deployments whose rollout is awaited after install
pub const DEPLOYMENTS: [&str; 3] = ["argocd-server", "argocd-repo-server", "argocd-redis"];

/// In-cluster API server
pub const IN_CLUSTER_SERVER: &str = "https://kubernetes.default.svc";

const FINALIZER: &str = "resources-finalizer.argocd.argoproj.io";

fn to_yaml(value: &Value) -> Result<String> {
    Ok(serde_yaml::to_string(value)?)
}

/// Upstream install manifest for `version`
pub fn install_url(version: &str) -> String {
    format!(
        "https://raw.githubusercontent.com/argoproj/argo-cd/{}/manifests/install.yaml",
        version
    )
}

/// The ArgoCD namespace
pub fn namespace_yaml(namespace: &str) -> Result<String> {
    to_yaml(&json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": namespace,
            "labels": {"app.kubernetes.io/name": "argocd"}
        }
    }))
}

/// ConfigMap patches that drop authentication for local use
pub fn auth_patches() -> Vec<(&'static str, String)> {
    vec![
        (
            "argocd-cmd-params-cm",
            json!({"data": {"server.insecure": "true"}}).to_string(),
        ),
        (
            "argocd-cm",
            json!({"data": {"users.anonymous.enabled": "true"}}).to_string(),
        ),
        (
            "argocd-rbac-cm",
            json!({"data": {"policy.default": "role:admin"}}).to_string(),
        ),
    ]
}

/// Secret carrying `ca_pem` as `ca.crt`
pub fn ca_secret_yaml(namespace: &str, ca_pem: &str) -> Result<String> {
    if !ca_pem.trim_start().starts_with("-----BEGIN CERTIFICATE-----") {
        return Err(Error::validation("CA certificate is not PEM encoded"));
    }
    to_yaml(&json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {"name": CA_SECRET_NAME, "namespace": namespace},
        "type": "Opaque",
        "stringData": {"ca.crt": ca_pem}
    }))
}

/// Deployment patch mounting the CA secret into the repo server
pub fn repo_server_ca_patch() -> String {
    json!({
        "spec": {"template": {"spec": {
            "volumes": [{"name": "kinder-ca", "secret": {"secretName": CA_SECRET_NAME}}],
            "containers": [{
                "name": REPO_SERVER,
                "env": [{"name": "SSL_CERT_FILE", "value": REPO_SERVER_CA_PATH}],
                "volumeMounts": [{
                    "name": "kinder-ca",
                    "mountPath": REPO_SERVER_CA_PATH,
                    "subPath": "ca.crt",
                    "readOnly": true
                }]
            }]
        }}}
    })
    .to_string()
}

/// Repository credential secret, or `None` when the repo is public
pub fn repo_secret_yaml(namespace: &str, repo: &RepositoryConfig) -> Result<Option<String>> {
    validate_git_url(&repo.url)?;

    let mut data = serde_json::Map::new();
    data.insert("type".into(), Value::String(STANDARD.encode("git")));
    data.insert("url".into(), Value::String(STANDARD.encode(&repo.url)));
    match &repo.credentials {
        GitCredentials::None => return Ok(None),
        GitCredentials::Http { username, password } => {
            if username.is_empty() || password.is_empty() {
                return Err(Error::validation(
                    "both username and password are required for HTTP credentials",
                ));
            }
            data.insert("username".into(), Value::String(STANDARD.encode(username)));
            data.insert("password".into(), Value::String(STANDARD.encode(password)));
        }
        GitCredentials::Ssh { private_key } => {
            if private_key.trim().is_empty() {
                return Err(Error::validation("SSH private key is empty"));
            }
            data.insert(
                "sshPrivateKey".into(),
                Value::String(STANDARD.encode(private_key)),
            );
        }
    }

    let name = sanitize_name(&format!("repo-{}", repo_name(&repo.url)))?;
    to_yaml(&json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": {"argocd.argoproj.io/secret-type": "repository"}
        },
        "data": data
    }))
    .map(Some)
}

fn automated_sync() -> Value {
    json!({"automated": {"prune": true, "selfHeal": true}})
}

/// The initial Application tracking the GitOps repository
pub fn application_yaml(namespace: &str, repo: &RepositoryConfig) -> Result<String> {
    validate_git_url(&repo.url)?;
    validate_yaml_value("repository path", &repo.path)?;
    validate_yaml_value("repository branch", &repo.branch)?;
    let name = sanitize_name(&repo.app_name)?;
    let target = sanitize_name(&repo.target_namespace)?;

    let mut sync = automated_sync();
    sync["syncOptions"] = json!(["CreateNamespace=true"]);

    to_yaml(&json!({
        "apiVersion": "argoproj.io/v1alpha1",
        "kind": "Application",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "finalizers": [FINALIZER]
        },
        "spec": {
            "project": "default",
            "source": {
                "repoURL": repo.url,
                "targetRevision": repo.branch,
                "path": repo.path
            },
            "destination": {"server": IN_CLUSTER_SERVER, "namespace": target},
            "syncPolicy": sync
        }
    }))
}

fn oci_application(name: &str, namespace: &str, registry: &str, image: &str) -> Result<String> {
    to_yaml(&json!({
        "apiVersion": "argoproj.io/v1alpha1",
        "kind": "Application",
        "metadata": {"name": name, "namespace": namespace},
        "spec": {
            "project": "default",
            "source": {
                "repoURL": format!("{}/{}", registry, image),
                "targetRevision": DEFAULT_TAG
            },
            "destination": {
                "server": IN_CLUSTER_SERVER,
                "namespace": trust_manager::NAMESPACE
            },
            "syncPolicy": automated_sync()
        }
    }))
}

/// Applications syncing the trust-manager and issuer artifacts from the registry
pub fn kinder_apps_yaml(namespace: &str, registry: &str) -> Result<String> {
    validate_yaml_value("registry URL", registry)?;
    Ok([
        oci_application("kinder-trust-bundle", namespace, registry, trust_manager::IMAGE_NAME)?,
        oci_application("kinder-cert-issuer", namespace, registry, issuer::IMAGE_NAME)?,
    ]
    .join("---\n"))
}
