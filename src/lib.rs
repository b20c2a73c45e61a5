//! kinder - local Kubernetes development environments with private trust
//!
//! kinder generates a name-constrained root CA and brings up a small set of
//! services that all trust it: a certificate authority, a pull-through
//! registry cache, a health dashboard, a reverse proxy and a kind cluster,
//! optionally bootstrapped with ArgoCD.
//!
//! # Architecture
//!
//! External tools sit behind narrow traits so everything above them can be
//! tested with mocks:
//! - [`runtime::ContainerRuntime`] - the `docker` CLI
//! - [`cluster::ClusterProvisioner`] - the `kind` CLI
//! - [`gitops::ManifestApplier`] - the `kubectl` CLI
//! - [`bundle::RegistryClient`] - the local OCI registry
//!
//! # Modules
//!
//! - [`pki`] - Root and intermediate CA generation and inspection
//! - [`runtime`] - Idempotent container and network lifecycle
//! - [`mirror`] - containerd `certs.d` registry mirror tree
//! - [`services`] - Step CA, Zot, Gatus and Traefik adapters
//! - [`cluster`] - kind cluster lifecycle
//! - [`bundle`] - Trust bundle and cert-manager artifacts pushed as OCI images
//! - [`gitops`] - ArgoCD bootstrap with manifest input validation
//! - [`orchestrator`] - Start/stop/restart state machine
//! - [`diagnostics`] - Health checks across the environment
//! - [`config`] - Layered configuration
//! - [`commands`] - CLI command implementations
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod bundle;
pub mod cluster;
pub mod commands;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod files;
pub mod gitops;
pub mod mirror;
pub mod orchestrator;
pub mod pki;
pub mod poll;
pub mod runtime;
pub mod services;

pub use error::{Error, Result};
