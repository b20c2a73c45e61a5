//! `config show`, `config path` and `config init`

use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::{self, KinderConfig};
use crate::files::{write_file, SECRET_FILE_MODE};
use crate::{Error, Result};

const INIT_HEADER: &str = "# kinder configuration\n# See 'kinder config show' for the effective configuration\n\n";

/// Effective configuration, prefixed with where it was read from
pub fn show(config: &KinderConfig, source: Option<&Path>) -> Result<String> {
    let origin = match source {
        Some(path) => format!("# Loaded from {}\n", path.display()),
        None => "# No config file; built-in defaults and environment\n".to_string(),
    };
    Ok(format!("{}{}", origin, config.to_yaml()?))
}

/// File that is read when `--config` is not given
pub fn path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(p) => Ok(p.to_path_buf()),
        None => config::default_config_path(),
    }
}

/// Write a config file holding every default.
///
/// An existing file is only replaced with `force`. The file may later hold
/// Git credentials, so it is readable by the owner only.
pub fn init(explicit: Option<&Path>, force: bool) -> Result<PathBuf> {
    let target = path(explicit)?;
    if target.exists() && !force {
        return Err(Error::configuration(format!(
            "config file already exists at {} (use --force to overwrite)",
            target.display()
        )));
    }
    let contents = format!("{}{}", INIT_HEADER, KinderConfig::default().to_yaml()?);
    write_file(&target, contents.as_bytes(), SECRET_FILE_MODE)?;
    info!("Created config file at {}", target.display());
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_names_the_source() {
        let config = KinderConfig::default();
        let text = show(&config, Some(Path::new("/etc/kinder.yaml"))).unwrap();
        assert!(text.starts_with("# Loaded from /etc/kinder.yaml\n"));
        assert!(text.contains("domain: c0000201.sslip.io"));

        let text = show(&config, None).unwrap();
        assert!(text.starts_with("# No config file"));
    }

    /// Story: init writes loadable defaults once and refuses to clobber them
    #[test]
    fn story_init_writes_defaults_once() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("kinder/config.yaml");

        assert_eq!(init(Some(&target), false).unwrap(), target);
        let (loaded, _) = KinderConfig::from_file(Some(&target)).unwrap();
        assert_eq!(loaded, KinderConfig::default());

        assert!(matches!(
            init(Some(&target), false),
            Err(Error::Configuration(_))
        ));
        init(Some(&target), true).unwrap();
    }

    #[test]
    fn explicit_path_wins() {
        assert_eq!(
            path(Some(Path::new("/tmp/x.yaml"))).unwrap(),
            PathBuf::from("/tmp/x.yaml")
        );
    }
}
