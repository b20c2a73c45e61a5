//! cert-manager `ClusterIssuer` backed by Step CA's ACME endpoint

use std::sync::LazyLock;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use serde_json::{json, Value};

use super::artifact::Artifact;
use super::to_yaml;
use super::trust_manager::kustomization_yaml;
use crate::gitops::validate_domain;
use crate::{Error, Result};

/// Repository name of the artifact
pub const IMAGE_NAME: &str = "cert-manager-issuer";

/// Name of the `ClusterIssuer`
pub const ISSUER_NAME: &str = "kinder-ca";

/// ACME registration email
pub const ACME_EMAIL: &str = "admin@localhost";

/// Ingress class used for HTTP-01 challenges
pub const INGRESS_CLASS: &str = "traefik";

// cert-manager solver keys: cloudflare, route53, acmeDNS, azureDNS, ...
static PROVIDER_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9]{0,62}$").expect("static regex is valid"));

/// Inputs for the issuer manifests
#[derive(Debug, Clone)]
pub struct IssuerOptions {
    /// Base domain served by the proxy
    pub domain: String,
    /// Host port HTTPS is published on
    pub https_port: u16,
    /// Solve challenges over DNS-01 with this provider instead of HTTP-01
    pub dns01_provider: Option<String>,
    /// Also ship an example `Certificate`
    pub include_example_cert: bool,
}

impl IssuerOptions {
    /// ACME directory reached through the proxy
    pub fn acme_server(&self) -> String {
        format!(
            "https://ca.{}:{}/acme/acme/directory",
            self.domain, self.https_port
        )
    }

    /// Domain of the example certificate
    pub fn example_domain(&self) -> String {
        format!("example.{}", self.domain)
    }

    /// Non-empty DNS-01 provider, if one is set
    pub fn dns01(&self) -> Option<&str> {
        self.dns01_provider.as_deref().filter(|p| !p.is_empty())
    }

    /// Domain and provider must be usable as a hostname and a solver key
    pub fn validate(&self) -> Result<()> {
        validate_domain(&self.domain)?;
        if let Some(provider) = self.dns01() {
            if !PROVIDER_KEY.is_match(provider) {
                return Err(Error::validation(format!(
                    "trust.dns01Provider {:?} must be a cert-manager solver name",
                    provider
                )));
            }
        }
        Ok(())
    }
}

fn solver(options: &IssuerOptions) -> Value {
    match options.dns01() {
        Some(provider) => json!({"dns01": {provider: {}}}),
        None => json!({"http01": {"ingress": {"ingressClassName": INGRESS_CLASS}}}),
    }
}

/// `clusterissuer.yaml` trusting `ca_pem`
pub fn cluster_issuer_yaml(ca_pem: &str, options: &IssuerOptions) -> Result<String> {
    options.validate()?;
    to_yaml(&json!({
        "apiVersion": "cert-manager.io/v1",
        "kind": "ClusterIssuer",
        "metadata": {
            "name": ISSUER_NAME,
            "labels": {
                "app.kubernetes.io/name": "kinder-ca-issuer",
                "app.kubernetes.io/component": "certificate-issuer",
                "app.kubernetes.io/managed-by": "kinder"
            }
        },
        "spec": {
            "acme": {
                "server": options.acme_server(),
                "email": ACME_EMAIL,
                "privateKeySecretRef": {"name": format!("{}-account-key", ISSUER_NAME)},
                "caBundle": STANDARD.encode(ca_pem.as_bytes()),
                "solvers": [solver(options)]
            }
        }
    }))
}

/// `example-certificate.yaml` requesting a certificate from the issuer
pub fn example_certificate_yaml(options: &IssuerOptions) -> Result<String> {
    options.validate()?;
    let domain = options.example_domain();
    to_yaml(&json!({
        "apiVersion": "cert-manager.io/v1",
        "kind": "Certificate",
        "metadata": {
            "name": "example-cert",
            "namespace": "default",
            "labels": {
                "app.kubernetes.io/name": "example-certificate",
                "app.kubernetes.io/managed-by": "kinder"
            }
        },
        "spec": {
            "secretName": "example-cert-tls",
            "duration": "2160h",
            "renewBefore": "720h",
            "commonName": domain,
            "dnsNames": [domain],
            "issuerRef": {
                "name": ISSUER_NAME,
                "kind": "ClusterIssuer",
                "group": "cert-manager.io"
            }
        }
    }))
}

/// The issuer artifact for `ca_pem`
pub fn artifact(ca_pem: &str, options: &IssuerOptions) -> Result<Artifact> {
    let mut resources = vec!["clusterissuer.yaml"];
    if options.include_example_cert {
        resources.push("example-certificate.yaml");
    }

    let mut artifact = Artifact::new(
        IMAGE_NAME,
        "Cert-Manager Issuer",
        "ClusterIssuer configuration for Step CA ACME server",
    )
    .with_label("argocd.argoproj.io/manifest-type", "kustomize")
    .with_file("kustomization.yaml", kustomization_yaml(&resources)?)
    .with_file("clusterissuer.yaml", cluster_issuer_yaml(ca_pem, options)?);

    if options.include_example_cert {
        artifact = artifact.with_file("example-certificate.yaml", example_certificate_yaml(options)?);
    }
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEM: &str = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";

    fn options() -> IssuerOptions {
        IssuerOptions {
            domain: "c0000201.sslip.io".to_string(),
            https_port: 8443,
            dns01_provider: None,
            include_example_cert: false,
        }
    }

    #[test]
    fn issuer_points_at_proxied_acme_directory() {
        let yaml = cluster_issuer_yaml(PEM, &options()).unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        let acme = &value["spec"]["acme"];

        assert_eq!(value["metadata"]["name"].as_str(), Some("kinder-ca"));
        assert_eq!(
            acme["server"].as_str(),
            Some("https://ca.c0000201.sslip.io:8443/acme/acme/directory")
        );
        assert_eq!(acme["email"].as_str(), Some("admin@localhost"));
        assert_eq!(
            acme["privateKeySecretRef"]["name"].as_str(),
            Some("kinder-ca-account-key")
        );
        assert_eq!(
            acme["solvers"][0]["http01"]["ingress"]["ingressClassName"].as_str(),
            Some("traefik")
        );

        let ca = STANDARD.decode(acme["caBundle"].as_str().unwrap()).unwrap();
        assert_eq!(ca, PEM.as_bytes());
    }

    #[test]
    fn dns01_solver_replaces_http01() {
        let opts = IssuerOptions {
            dns01_provider: Some("cloudflare".to_string()),
            ..options()
        };
        let value: serde_yaml::Value =
            serde_yaml::from_str(&cluster_issuer_yaml(PEM, &opts).unwrap()).unwrap();
        let solver = &value["spec"]["acme"]["solvers"][0];
        assert!(solver["dns01"]["cloudflare"].is_mapping());
        assert!(solver.get("http01").is_none());
    }

    #[test]
    fn empty_dns01_provider_keeps_http01() {
        let opts = IssuerOptions {
            dns01_provider: Some(String::new()),
            ..options()
        };
        let value: serde_yaml::Value =
            serde_yaml::from_str(&cluster_issuer_yaml(PEM, &opts).unwrap()).unwrap();
        assert!(value["spec"]["acme"]["solvers"][0]["http01"].is_mapping());
    }

    // ==========================================================================
    // Story Tests: Manifest Injection
    // ==========================================================================

    /// Story: a domain carrying YAML or a port is refused before any manifest
    /// is rendered
    #[test]
    fn story_smuggled_domain_is_rejected() {
        for bad in ["evil.test\n---\nkind: Secret", "evil.test:9999", ""] {
            let opts = IssuerOptions {
                domain: bad.to_string(),
                include_example_cert: true,
                ..options()
            };
            assert!(
                matches!(artifact(PEM, &opts), Err(Error::Validation(_))),
                "{:?} should be rejected",
                bad
            );
            assert!(example_certificate_yaml(&opts).is_err());
        }
    }

    /// Story: the DNS-01 provider becomes a mapping key, so only plain
    /// solver names are accepted
    #[test]
    fn story_smuggled_dns01_provider_is_rejected() {
        for bad in ["x: {}\n---\nkind: Secret", "cloud flare", "9cloud", "a.b"] {
            let opts = IssuerOptions {
                dns01_provider: Some(bad.to_string()),
                ..options()
            };
            assert!(
                matches!(artifact(PEM, &opts), Err(Error::Validation(_))),
                "{:?} should be rejected",
                bad
            );
        }

        let camel = IssuerOptions {
            dns01_provider: Some("acmeDNS".to_string()),
            ..options()
        };
        artifact(PEM, &camel).unwrap();
    }

    #[test]
    fn example_certificate_is_optional() {
        let without = artifact(PEM, &options()).unwrap();
        assert_eq!(without.files.len(), 2);
        let kustomization: serde_yaml::Value =
            serde_yaml::from_slice(&without.files[0].contents).unwrap();
        assert_eq!(kustomization["resources"].as_sequence().unwrap().len(), 1);

        let opts = IssuerOptions {
            include_example_cert: true,
            ..options()
        };
        let with = artifact(PEM, &opts).unwrap();
        assert_eq!(with.files.len(), 3);
        let cert: serde_yaml::Value = serde_yaml::from_slice(&with.files[2].contents).unwrap();
        assert_eq!(
            cert["spec"]["dnsNames"][0].as_str(),
            Some("example.c0000201.sslip.io")
        );
        assert_eq!(cert["spec"]["issuerRef"]["name"].as_str(), Some("kinder-ca"));
    }
}
