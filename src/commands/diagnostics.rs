//! `diagnostics`

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::KinderConfig;
use crate::diagnostics::{self, HttpEndpoints, Outcome, Report, Skopeo, Tools, ROUTE_TARGET};
use crate::orchestrator::Backends;
use crate::{Error, Result};

/// Production tools; endpoints are checked trusting the root CA if it exists
pub fn tools(config: &KinderConfig) -> Result<Tools> {
    let ca_path = config.ca_cert_path()?;
    let ca_pem = if ca_path.exists() {
        Some(std::fs::read(&ca_path)?)
    } else {
        None
    };
    let route_target: SocketAddr = ROUTE_TARGET
        .parse()
        .map_err(|e| Error::configuration(format!("invalid route target {}: {}", ROUTE_TARGET, e)))?;
    Ok(Tools {
        endpoints: Arc::new(HttpEndpoints::new(ca_pem.as_deref())?),
        images: Arc::new(Skopeo::new()),
        route_target,
    })
}

/// Run every check and print the report; fails when any check failed
pub async fn run(config: &KinderConfig, backends: Backends, tools: Tools) -> Result<()> {
    let report = diagnostics::run(&config.plan()?, &backends, &tools).await;
    print!("{}", render(&report));
    if report.passed() {
        return Ok(());
    }
    Err(Error::runtime(format!(
        "{} diagnostic check(s) failed: {}",
        report.failures().len(),
        report.failures().join(", ")
    )))
}

/// One line per check
pub fn render(report: &Report) -> String {
    let mut out = String::new();
    for check in &report.checks {
        let (mark, detail) = match &check.outcome {
            Outcome::Passed(d) => ("ok  ", d),
            Outcome::Failed(d) => ("FAIL", d),
            Outcome::Skipped(d) => ("skip", d),
        };
        let _ = writeln!(out, "[{}] {:<28} {}", mark, check.name, detail);
    }
    let failed = report.failures().len();
    let _ = writeln!(
        out,
        "\n{} checks, {} failed",
        report.checks.len(),
        failed
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Check;

    #[test]
    fn report_lists_every_outcome() {
        let report = Report {
            checks: vec![
                Check {
                    name: "Docker".to_string(),
                    outcome: Outcome::Passed("2 networks".to_string()),
                },
                Check {
                    name: "Endpoint gatus".to_string(),
                    outcome: Outcome::Failed("HTTP 502".to_string()),
                },
                Check {
                    name: "Registry to cluster".to_string(),
                    outcome: Outcome::Skipped("no cluster".to_string()),
                },
            ],
        };

        let out = render(&report);
        assert!(out.contains("[ok  ] Docker"));
        assert!(out.contains("[FAIL] Endpoint gatus"));
        assert!(out.contains("HTTP 502"));
        assert!(out.contains("[skip] Registry to cluster"));
        assert!(out.ends_with("3 checks, 1 failed\n"));
    }

    #[test]
    fn tools_build_without_a_ca() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = KinderConfig::default();
        config.data_dir = Some(dir.path().to_path_buf());
        let tools = tools(&config).unwrap();
        assert_eq!(tools.route_target.port(), 1);
    }
}
