//! Build script for kinder
//!
//! Sets compile-time environment variables for pinned image and tool versions.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct Versions {
    images: HashMap<String, String>,
    kind: HashMap<String, String>,
    argocd: HashMap<String, String>,
}

fn main() {
    let manifest_dir =
        std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR should be set");
    let versions_path = Path::new(&manifest_dir).join("versions.toml");
    println!("cargo:rerun-if-changed={}", versions_path.display());

    let content = std::fs::read_to_string(&versions_path)
        .unwrap_or_else(|e| panic!("failed to read {}: {}", versions_path.display(), e));

    let versions: Versions = toml::from_str(&content).expect("versions.toml should be valid TOML");

    for (key, env) in [
        ("stepca", "DEFAULT_STEPCA_IMAGE"),
        ("zot", "DEFAULT_ZOT_IMAGE"),
        ("gatus", "DEFAULT_GATUS_IMAGE"),
        ("traefik", "DEFAULT_TRAEFIK_IMAGE"),
    ] {
        let image = versions
            .images
            .get(key)
            .unwrap_or_else(|| panic!("versions.toml is missing images.{}", key));
        println!("cargo:rustc-env={}={}", env, image);
    }

    println!(
        "cargo:rustc-env=DEFAULT_KIND_NODE_IMAGE={}",
        versions.kind["node-image"]
    );
    println!(
        "cargo:rustc-env=DEFAULT_ARGOCD_VERSION={}",
        versions.argocd["version"]
    );
}
