//! Input validation for values interpolated into ArgoCD manifests

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::{Error, Result};

/// Maximum length of a Kubernetes object name used here (DNS label)
pub const MAX_NAME_LEN: usize = 63;

static K8S_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("static regex is valid")
});

static DNS_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("static regex is valid")
});

/// Maximum length of a DNS name
pub const MAX_DOMAIN_LEN: usize = 253;

/// Normalize `name` into a DNS-label Kubernetes name.
///
/// Lowercases, truncates to [`MAX_NAME_LEN`] and strips trailing dashes
/// before checking; anything still invalid is rejected, not repaired.
pub fn sanitize_name(name: &str) -> Result<String> {
    if name.is_empty() {
        return Err(Error::validation("name cannot be empty"));
    }
    let mut sanitized: String = name.to_lowercase().chars().take(MAX_NAME_LEN).collect();
    while sanitized.ends_with('-') {
        sanitized.pop();
    }
    if !K8S_NAME.is_match(&sanitized) {
        return Err(Error::validation(format!("invalid name: {:?}", sanitized)));
    }
    Ok(sanitized)
}

/// Accept a lowercase DNS name such as `c0000201.sslip.io`
pub fn validate_domain(domain: &str) -> Result<()> {
    if domain.is_empty() {
        return Err(Error::validation("domain cannot be empty"));
    }
    if domain.len() > MAX_DOMAIN_LEN
        || domain.split('.').any(|label| label.len() > MAX_NAME_LEN)
        || !DNS_NAME.is_match(domain)
    {
        return Err(Error::validation(format!("invalid domain: {:?}", domain)));
    }
    Ok(())
}

/// Accept only `http`/`https` URLs with a host
pub fn validate_url(value: &str) -> Result<()> {
    let parsed = Url::parse(value)
        .map_err(|e| Error::validation(format!("invalid URL {:?}: {}", value, e)))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(Error::validation(format!(
            "invalid URL {:?}: scheme must be http or https",
            value
        )));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(Error::validation(format!("invalid URL {:?}: missing host", value)));
    }
    validate_yaml_value("url", value)
}

/// Like [`validate_url`], also accepting scp-style `git@host:path`
pub fn validate_git_url(value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::validation("repository URL cannot be empty"));
    }
    if value.starts_with("git@") {
        return validate_yaml_value("repository URL", value);
    }
    validate_url(value)
}

/// Reject characters that would break out of a single YAML scalar
pub fn validate_yaml_value(field: &str, value: &str) -> Result<()> {
    if value.contains(['\n', '\r', '\0']) {
        return Err(Error::validation(format!(
            "{} must not contain line breaks or NUL characters",
            field
        )));
    }
    Ok(())
}

/// Short name for a repository, used in its credential secret name
pub fn repo_name(url: &str) -> String {
    fn normalize(path: &str) -> String {
        path.trim_end_matches(".git").replace('/', "-").to_lowercase()
    }

    if url.starts_with("git@") {
        if let Some((_, path)) = url.split_once(':') {
            return normalize(path);
        }
    }
    if let Ok(parsed) = Url::parse(url) {
        let path = parsed.path().trim_start_matches('/');
        if !path.trim_end_matches(".git").is_empty() {
            return normalize(path);
        }
    }
    "repo".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_normalized() {
        assert_eq!(sanitize_name("Root").unwrap(), "root");
        assert_eq!(sanitize_name("my-app--").unwrap(), "my-app");

        let long = "a".repeat(70);
        assert_eq!(sanitize_name(&long).unwrap().len(), 63);

        let dash_at_cut = format!("{}-b", "a".repeat(62));
        assert_eq!(sanitize_name(&dash_at_cut).unwrap(), "a".repeat(62));
    }

    // ==========================================================================
    // Story Tests: Manifest Injection
    // ==========================================================================

    /// Story: names that could smuggle YAML are rejected, not rewritten
    #[test]
    fn story_names_with_yaml_syntax_are_rejected() {
        for bad in ["", "-leading", "has space", "a:b", "x\nkind: Secret", "ns/evil", "ünïcode"] {
            assert!(
                matches!(sanitize_name(bad), Err(Error::Validation(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    /// Story: the base domain ends up in hostnames and ACME URLs, so it must
    /// be a plain DNS name
    #[test]
    fn story_domains_are_plain_dns_names() {
        validate_domain("c0000201.sslip.io").unwrap();
        validate_domain("localhost").unwrap();
        validate_domain("dev-1.example.test").unwrap();

        for bad in [
            "",
            "evil.test\n---\nkind: Secret",
            "example.test:8443",
            "Example.Test",
            "-lead.test",
            "double..dot",
            "trailing.",
            "has space.test",
        ] {
            assert!(
                matches!(validate_domain(bad), Err(Error::Validation(_))),
                "{:?} should be rejected",
                bad
            );
        }
        assert!(validate_domain(&format!("{}.test", "a".repeat(64))).is_err());
    }

    /// Story: URLs must be http(s) with a host and a single line
    #[test]
    fn story_urls_are_checked_before_use() {
        validate_url("https://github.com/org/gitops").unwrap();
        validate_url("http://registry.local:5000/path").unwrap();

        assert!(validate_url("ftp://example.com/x").is_err());
        assert!(validate_url("file:///etc/passwd").is_err());
        assert!(validate_url("not a url").is_err());
        assert!(validate_url("https://example.com/a\nkind: Secret").is_err());
    }

    #[test]
    fn git_urls_accept_scp_style() {
        validate_git_url("git@github.com:org/repo.git").unwrap();
        validate_git_url("https://github.com/org/repo").unwrap();
        assert!(validate_git_url("").is_err());
        assert!(validate_git_url("git@github.com:org/repo\nx: y").is_err());
        assert!(validate_git_url("ssh://git@github.com/org/repo").is_err());
    }

    #[test]
    fn yaml_values_reject_line_breaks_and_nul() {
        validate_yaml_value("branch", "feature/x").unwrap();
        assert!(validate_yaml_value("branch", "main\n").is_err());
        assert!(validate_yaml_value("branch", "main\r").is_err());
        assert!(validate_yaml_value("branch", "ma\0in").is_err());
    }

    #[test]
    fn repo_names_from_urls() {
        assert_eq!(repo_name("git@github.com:Org/Repo.git"), "org-repo");
        assert_eq!(repo_name("https://github.com/org/gitops"), "org-gitops");
        assert_eq!(repo_name("https://github.com/org/gitops.git"), "org-gitops");
        assert_eq!(repo_name("https://github.com/"), "repo");
        assert_eq!(repo_name("nonsense"), "repo");
    }
}
