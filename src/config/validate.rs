// src/config/validate.rs

use std::collections::HashSet;

use anyhow::{anyhow, Context, Result};

use crate::config::model::ConfigFile;

/// Run basic semantic validation against a loaded configuration.
///
/// This checks:
/// - there is at least one `[[watcher]]` section
/// - every `dir` is non-empty and no two sections share one
/// - every encoding label is recognized
/// - every include/exclude pattern compiles
pub fn validate_config(cfg: &ConfigFile) -> Result<()> {
    ensure_has_watchers(cfg)?;
    validate_dirs(cfg)?;
    validate_sections(cfg)?;
    Ok(())
}

fn ensure_has_watchers(cfg: &ConfigFile) -> Result<()> {
    if cfg.watcher.is_empty() {
        return Err(anyhow!(
            "config must contain at least one [[watcher]] section"
        ));
    }
    Ok(())
}

fn validate_dirs(cfg: &ConfigFile) -> Result<()> {
    let mut seen: HashSet<&str> = HashSet::new();
    for (i, section) in cfg.watcher.iter().enumerate() {
        if section.dir.is_empty() {
            return Err(anyhow!("watcher #{} has an empty `dir`", i + 1));
        }
        if !seen.insert(section.dir.as_str()) {
            return Err(anyhow!(
                "duplicate watcher dir {:?}; merge the sections instead",
                section.dir
            ));
        }
    }
    Ok(())
}

fn validate_sections(cfg: &ConfigFile) -> Result<()> {
    for section in &cfg.watcher {
        section
            .to_options()
            .with_context(|| format!("in [[watcher]] for dir {:?}", section.dir))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> ConfigFile {
        toml::from_str(s).unwrap()
    }

    #[test]
    fn empty_config_is_rejected() {
        let cfg = parse("");
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn duplicate_dirs_are_rejected() {
        let cfg = parse(
            r#"
            [[watcher]]
            dir = "src"
            [[watcher]]
            dir = "src"
            "#,
        );
        let err = validate_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("duplicate watcher dir"));
    }

    #[test]
    fn bad_glob_is_rejected() {
        let cfg = parse(
            r#"
            [[watcher]]
            dir = "src"
            include = ["a{"]
            "#,
        );
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn valid_config_passes() {
        let cfg = parse(
            r#"
            [[watcher]]
            dir = "src"
            include = ["**/*.rs"]
            enc = "latin1"
            "#,
        );
        validate_config(&cfg).unwrap();
    }
}
