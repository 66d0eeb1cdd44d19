// src/config/model.rs

use std::time::Duration;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;

use crate::file::Encoding;
use crate::watch::WatcherOptions;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [[watcher]]
/// dir = "src"
/// include = ["**/*.md"]
/// exclude = ["**/drafts/**"]
///
/// [[watcher]]
/// dir = "assets"
/// read = false
/// debounce_ms = 50
/// use_hash = true
/// ```
///
/// Per-watcher fields all have defaults; only `dir` is required.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    /// All watched roots from `[[watcher]]`.
    #[serde(default)]
    pub watcher: Vec<WatcherSection>,
}

/// One `[[watcher]]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct WatcherSection {
    /// Root directory to crawl and watch.
    pub dir: String,

    /// Whether to keep watching after the initial crawl.
    #[serde(default = "default_watch")]
    pub watch: bool,

    /// Debounce window for raw filesystem notifications.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Whether to read file contents (transforms still see metadata when
    /// this is off).
    #[serde(default = "default_read")]
    pub read: bool,

    /// Encoding label, e.g. `"utf8"` or `"latin-1"`.
    #[serde(default = "default_enc")]
    pub enc: String,

    /// Glob patterns a file path must match to be ingested. Empty means
    /// everything is included.
    #[serde(default)]
    pub include: Vec<String>,

    /// Glob patterns that exclude paths, applied to files and directories.
    /// An excluded directory prunes its whole subtree.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Suppress change events when file contents are byte-identical.
    #[serde(default)]
    pub use_hash: bool,
}

fn default_watch() -> bool {
    true
}

fn default_debounce_ms() -> u64 {
    10
}

fn default_read() -> bool {
    true
}

fn default_enc() -> String {
    "utf8".to_string()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob =
            Glob::new(pattern).with_context(|| format!("invalid glob pattern {pattern:?}"))?;
        builder.add(glob);
    }
    builder.build().context("building glob set")
}

impl WatcherSection {
    /// Compile this section into runtime [`WatcherOptions`].
    ///
    /// Include patterns apply to files only; directories are checked against
    /// the exclude set alone, so an included file deep in the tree is still
    /// reachable.
    pub fn to_options(&self) -> Result<WatcherOptions> {
        let enc = Encoding::from_label(&self.enc)
            .with_context(|| format!("unsupported encoding label {:?}", self.enc))?;

        let include = build_globset(&self.include)?;
        let include_empty = self.include.is_empty();
        let exclude = build_globset(&self.exclude)?;

        let opts = WatcherOptions::new(&self.dir)
            .watch(self.watch)
            .debounce(Duration::from_millis(self.debounce_ms))
            .read(self.read)
            .enc(enc)
            .use_hash(self.use_hash)
            .with_filter(move |path, metadata| {
                if exclude.is_match(path) {
                    return false;
                }
                metadata.is_dir() || include_empty || include.is_match(path)
            });

        Ok(opts)
    }
}

impl ConfigFile {
    /// Compile every section into runtime watcher options, in file order.
    pub fn to_watcher_options(&self) -> Result<Vec<WatcherOptions>> {
        self.watcher.iter().map(WatcherSection::to_options).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_fields_are_omitted() {
        let cfg: ConfigFile = toml::from_str(
            r#"
            [[watcher]]
            dir = "src"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.watcher.len(), 1);
        let w = &cfg.watcher[0];
        assert_eq!(w.dir, "src");
        assert!(w.watch);
        assert_eq!(w.debounce_ms, 10);
        assert!(w.read);
        assert_eq!(w.enc, "utf8");
        assert!(w.include.is_empty());
        assert!(w.exclude.is_empty());
        assert!(!w.use_hash);
    }

    #[test]
    fn to_options_rejects_bad_encoding() {
        let section = WatcherSection {
            dir: "src".into(),
            watch: true,
            debounce_ms: 10,
            read: true,
            enc: "ebcdic".into(),
            include: vec![],
            exclude: vec![],
            use_hash: false,
        };
        assert!(section.to_options().is_err());
    }
}
