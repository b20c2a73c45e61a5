//! Traefik: TLS-terminating reverse proxy
//!
//! Certificates come from Step CA over ACME HTTP-01. Routes are static and
//! live in a watched dynamic config file:
//!
//! | Host | Backend |
//! |------|---------|
//! | `traefik.<domain>` | dashboard |
//! | `registry.<domain>` | zot |
//! | `gatus.<domain>` | gatus |
//! | `ca.<domain>` | step-ca |

use serde_json::{json, Map, Value};

use super::{stepca, ServiceAdapter, ServiceContext};
use crate::files::{copy_file, ensure_dir, write_file, PUBLIC_DIR_MODE, PUBLIC_FILE_MODE};
use crate::mirror::REGISTRY_PORT;
use crate::runtime::{Mount, PortMapping, ServiceDescriptor};
use crate::Result;

/// Default Traefik image
pub const DEFAULT_IMAGE: &str = env!("DEFAULT_TRAEFIK_IMAGE");

/// Network hostname of the proxy
pub const HOSTNAME: &str = "traefik";

/// Default host port for HTTPS
pub const DEFAULT_HTTPS_PORT: u16 = 8443;

/// Name of the ACME certificate resolver
pub const CERT_RESOLVER: &str = "stepca";

const SERVICE: &str = "traefik";
const CONFIG_DIR: &str = "/etc/traefik";

/// A host-routed backend
struct Route {
    subdomain: &'static str,
    router: &'static str,
    service: &'static str,
    backend: Option<String>,
    transport: Option<&'static str>,
}

fn routes() -> Vec<Route> {
    vec![
        Route {
            subdomain: "traefik",
            router: "traefik-router",
            service: "api@internal",
            backend: None,
            transport: None,
        },
        Route {
            subdomain: "registry",
            router: "zot-router",
            service: "zot-service",
            backend: Some(format!("http://{}:{}", super::zot::HOSTNAME, REGISTRY_PORT)),
            transport: None,
        },
        Route {
            subdomain: "gatus",
            router: "gatus-router",
            service: "gatus-service",
            backend: Some(format!(
                "http://{}:{}",
                super::gatus::HOSTNAME,
                super::gatus::PORT
            )),
            transport: None,
        },
        Route {
            subdomain: "ca",
            router: "stepca-router",
            service: "stepca-service",
            backend: Some(format!("https://{}:{}", stepca::HOSTNAME, stepca::PORT)),
            transport: Some("stepca-transport"),
        },
    ]
}

/// Render the static `traefik.yaml`
pub fn static_config_yaml() -> Result<String> {
    let config = json!({
        "api": {"dashboard": true},
        "entryPoints": {
            "web": {
                "address": ":80",
                "http": {
                    "redirections": {
                        "entryPoint": {"to": "websecure", "scheme": "https"}
                    }
                }
            },
            "websecure": {"address": ":443"}
        },
        "certificatesResolvers": {
            CERT_RESOLVER: {
                "acme": {
                    "email": "admin@localhost",
                    "storage": format!("{}/acme.json", CONFIG_DIR),
                    "caServer": stepca::acme_directory_url(),
                    "certificatesDuration": 2160,
                    "httpChallenge": {"entryPoint": "web"},
                    "caCertificates": [format!("{}/ca.crt", CONFIG_DIR)]
                }
            }
        },
        "providers": {
            "file": {
                "filename": format!("{}/dynamic.yaml", CONFIG_DIR),
                "watch": true
            }
        },
        "log": {"level": "INFO"}
    });
    Ok(serde_yaml::to_string(&config)?)
}

/// Render the dynamic `dynamic.yaml` routing `<sub>.<domain>` to each backend
pub fn dynamic_config_yaml(domain: &str) -> Result<String> {
    let mut routers = Map::new();
    let mut services = Map::new();
    let mut transports = Map::new();

    for route in routes() {
        routers.insert(
            route.router.to_string(),
            json!({
                "rule": format!("Host(`{}.{}`)", route.subdomain, domain),
                "service": route.service,
                "entryPoints": ["websecure"],
                "tls": {"certResolver": CERT_RESOLVER}
            }),
        );

        if let Some(url) = route.backend {
            let mut lb = json!({"servers": [{"url": url}]});
            if let Some(transport) = route.transport {
                lb["serversTransport"] = Value::from(transport);
                transports.insert(transport.to_string(), json!({}));
            }
            services.insert(route.service.to_string(), json!({"loadBalancer": lb}));
        }
    }

    let config = json!({
        "http": {
            "routers": routers,
            "services": services,
            "serversTransports": transports
        }
    });
    Ok(serde_yaml::to_string(&config)?)
}

/// Traefik adapter
#[derive(Debug, Clone)]
pub struct Traefik {
    /// Container image
    pub image: String,
    /// Host port HTTPS is published on
    pub https_port: u16,
}

impl Default for Traefik {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            https_port: DEFAULT_HTTPS_PORT,
        }
    }
}

impl ServiceAdapter for Traefik {
    fn name(&self) -> &'static str {
        SERVICE
    }

    fn prepare(&self, ctx: &ServiceContext) -> Result<ServiceDescriptor> {
        let dir = ctx.service_dir(SERVICE);
        ensure_dir(&dir, PUBLIC_DIR_MODE)?;

        copy_file(&ctx.ca_cert, &dir.join("ca.crt"), PUBLIC_FILE_MODE)?;
        write_file(
            &dir.join("traefik.yaml"),
            static_config_yaml()?.as_bytes(),
            PUBLIC_FILE_MODE,
        )?;
        write_file(
            &dir.join("dynamic.yaml"),
            dynamic_config_yaml(&ctx.domain)?.as_bytes(),
            PUBLIC_FILE_MODE,
        )?;

        let mut descriptor = ctx.base_descriptor(SERVICE, &self.image, HOSTNAME);
        descriptor.command = vec![format!("--configFile={}/traefik.yaml", CONFIG_DIR)];
        descriptor.ports = vec![
            PortMapping::published(80, 80),
            PortMapping::published(443, self.https_port),
        ];
        descriptor.env = vec![(
            "SSL_CERT_FILE".to_string(),
            format!("{}/ca.crt", CONFIG_DIR),
        )];
        descriptor.mounts = vec![Mount::bind(dir, CONFIG_DIR)];
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::context;

    #[test]
    fn static_config_uses_stepca_acme() {
        let yaml = static_config_yaml().unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();

        let acme = &value["certificatesResolvers"]["stepca"]["acme"];
        assert_eq!(
            acme["caServer"].as_str(),
            Some("https://stepca:9000/acme/acme/directory")
        );
        assert_eq!(acme["httpChallenge"]["entryPoint"].as_str(), Some("web"));
        assert_eq!(acme["certificatesDuration"].as_u64(), Some(2160));
        assert_eq!(
            value["entryPoints"]["web"]["http"]["redirections"]["entryPoint"]["to"].as_str(),
            Some("websecure")
        );
        assert_eq!(
            value["providers"]["file"]["filename"].as_str(),
            Some("/etc/traefik/dynamic.yaml")
        );
    }

    #[test]
    fn dynamic_config_routes_every_service() {
        let yaml = dynamic_config_yaml("c0000201.sslip.io").unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        let http = &value["http"];

        assert_eq!(
            http["routers"]["zot-router"]["rule"].as_str(),
            Some("Host(`registry.c0000201.sslip.io`)")
        );
        assert_eq!(
            http["routers"]["traefik-router"]["service"].as_str(),
            Some("api@internal")
        );
        assert_eq!(
            http["routers"]["stepca-router"]["tls"]["certResolver"].as_str(),
            Some("stepca")
        );
        assert_eq!(
            http["services"]["gatus-service"]["loadBalancer"]["servers"][0]["url"].as_str(),
            Some("http://gatus:8080")
        );
        assert_eq!(
            http["services"]["stepca-service"]["loadBalancer"]["serversTransport"].as_str(),
            Some("stepca-transport")
        );
        assert!(http["serversTransports"]["stepca-transport"].is_mapping());
        assert!(http["services"].get("api@internal").is_none());
    }

    #[test]
    fn prepare_publishes_http_and_https() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let traefik = Traefik {
            https_port: 9443,
            ..Default::default()
        };

        let descriptor = traefik.prepare(&ctx).unwrap();

        for file in ["ca.crt", "traefik.yaml", "dynamic.yaml"] {
            assert!(dir.path().join("traefik").join(file).exists());
        }
        assert_eq!(descriptor.ports[0], PortMapping::published(80, 80));
        assert_eq!(descriptor.ports[1], PortMapping::published(443, 9443));
        assert_eq!(
            descriptor.command,
            vec!["--configFile=/etc/traefik/traefik.yaml"]
        );
        assert_eq!(descriptor.env[0].0, "SSL_CERT_FILE");
    }
}
