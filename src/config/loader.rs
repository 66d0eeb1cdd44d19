// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::model::ConfigFile;
use crate::config::validate::validate_config;

/// Load a configuration file from a given path and return the raw
/// `ConfigFile`.
///
/// This only performs TOML deserialization; use [`load_and_validate`] for
/// semantic checks.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading config file at {:?}", path))?;

    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("parsing TOML config from {:?}", path))?;

    Ok(config)
}

/// Load a configuration file from path and run basic validation.
///
/// This is the recommended entry point: it reads TOML, applies defaults, and
/// checks that every `[[watcher]]` section can actually be compiled into
/// runtime options.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let config = load_from_path(&path)?;
    validate_config(&config)?;
    Ok(config)
}

/// Default config path: `Remold.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Remold.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_and_validates_a_complete_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(
            tmp,
            r#"
            [[watcher]]
            dir = "content"
            include = ["**/*.md"]
            exclude = ["**/.git/**"]
            enc = "utf-8"
            use_hash = true
            "#
        )
        .unwrap();

        let cfg = load_and_validate(tmp.path()).unwrap();
        assert_eq!(cfg.watcher.len(), 1);
        assert!(cfg.watcher[0].use_hash);
        assert!(cfg.to_watcher_options().is_ok());
    }

    #[test]
    fn rejects_malformed_toml() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(tmp, "[[watcher]\ndir = src").unwrap();
        assert!(load_from_path(tmp.path()).is_err());
    }
}
