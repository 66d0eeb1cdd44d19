// src/watch/watcher.rs

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::file::Encoding;
use crate::watch::hash::{self, HashCache};
use crate::watch::PathFilter;

/// A root-relative path plus the metadata the watcher saw for it.
///
/// `metadata` is `None` only on removal events (there is nothing left to
/// stat). The `pre` hook receives this mutably and may rewrite `path` before
/// the engine ingests the file.
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub path: String,
    pub metadata: Option<Metadata>,
}

/// Debounced, re-stat'ed change event emitted by a [`DirWatcher`].
///
/// `Added` covers both creation and modification; consumers treat it as an
/// idempotent upsert.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Added { path: String, metadata: Metadata },
    Removed { path: String },
}

/// Filter over `{path, metadata}` applied to files and directories during
/// crawling and watching. Rejecting a directory prunes its whole subtree.
pub type WatchFilter = Arc<dyn Fn(&str, &Metadata) -> bool + Send + Sync>;

/// Hook invoked with each event's `{path, metadata}` before ingestion,
/// allowing path renaming.
pub type PreHook = Arc<dyn Fn(&mut FileMeta) + Send + Sync>;

/// Whether to read a physical file's bytes before transforming it.
#[derive(Clone, Default)]
pub enum ReadPolicy {
    #[default]
    Always,
    Never,
    Per(Arc<dyn Fn(&str, &Metadata) -> bool + Send + Sync>),
}

/// How to pick the encoding for a physical file.
///
/// The per-file closure sees the relative path, the metadata, and the bytes
/// (when they were read), so it can sniff content.
#[derive(Clone)]
pub enum EncPolicy {
    Fixed(Encoding),
    Per(Arc<dyn Fn(&str, Option<&Metadata>, Option<&[u8]>) -> Encoding + Send + Sync>),
}

impl Default for EncPolicy {
    fn default() -> Self {
        EncPolicy::Fixed(Encoding::Utf8)
    }
}

/// Configuration for one watched root directory.
#[derive(Clone)]
pub struct WatcherOptions {
    pub dir: PathBuf,
    pub filter: Option<WatchFilter>,
    pub read: ReadPolicy,
    pub enc: EncPolicy,
    pub pre: Option<PreHook>,
    pub watch: bool,
    pub debounce: Duration,
    pub use_hash: bool,
}

impl WatcherOptions {
    pub fn new(dir: impl Into<PathBuf>) -> WatcherOptions {
        WatcherOptions {
            dir: dir.into(),
            filter: None,
            read: ReadPolicy::Always,
            enc: EncPolicy::default(),
            pre: None,
            watch: true,
            debounce: Duration::from_millis(10),
            use_hash: false,
        }
    }

    pub fn with_filter(
        mut self,
        f: impl Fn(&str, &Metadata) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.filter = Some(Arc::new(f));
        self
    }

    /// Filter files by a [`PathFilter`]; directories always pass so the
    /// crawl can reach files beneath them.
    pub fn with_path_filter(self, filter: PathFilter) -> Self {
        self.with_filter(move |path, metadata| metadata.is_dir() || filter.matches(path))
    }

    pub fn read(mut self, read: bool) -> Self {
        self.read = if read { ReadPolicy::Always } else { ReadPolicy::Never };
        self
    }

    pub fn read_with(
        mut self,
        f: impl Fn(&str, &Metadata) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.read = ReadPolicy::Per(Arc::new(f));
        self
    }

    pub fn enc(mut self, enc: Encoding) -> Self {
        self.enc = EncPolicy::Fixed(enc);
        self
    }

    pub fn enc_with(
        mut self,
        f: impl Fn(&str, Option<&Metadata>, Option<&[u8]>) -> Encoding + Send + Sync + 'static,
    ) -> Self {
        self.enc = EncPolicy::Per(Arc::new(f));
        self
    }

    pub fn pre(mut self, f: impl Fn(&mut FileMeta) + Send + Sync + 'static) -> Self {
        self.pre = Some(Arc::new(f));
        self
    }

    pub fn watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn use_hash(mut self, use_hash: bool) -> Self {
        self.use_hash = use_hash;
        self
    }
}

impl fmt::Debug for WatcherOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherOptions")
            .field("dir", &self.dir)
            .field("watch", &self.watch)
            .field("debounce", &self.debounce)
            .field("use_hash", &self.use_hash)
            .finish_non_exhaustive()
    }
}

/// Crawler and live change detector for one root directory.
///
/// `init` must run to completion before any event is considered live; its
/// return value is the authoritative initial snapshot. After init, `spawn`
/// turns the watcher into a background task that debounces raw notify
/// events, re-stats each path, and emits [`WatchEvent`]s in notification
/// order.
pub struct DirWatcher {
    opts: Arc<WatcherOptions>,
    dir: PathBuf,
    stats: HashMap<String, Metadata>,
    dirs: HashSet<String>,
    hashes: HashCache,
    // kept alive for as long as the watcher task runs
    notify: Option<RecommendedWatcher>,
    raw_rx: Option<mpsc::UnboundedReceiver<PathBuf>>,
}

impl DirWatcher {
    pub fn new(opts: Arc<WatcherOptions>) -> DirWatcher {
        let dir = opts.dir.clone();
        DirWatcher {
            opts,
            dir,
            stats: HashMap::new(),
            dirs: HashSet::new(),
            hashes: HashCache::new(),
            notify: None,
            raw_rx: None,
        }
    }

    /// Recursively crawl the root, record file metadata, and (if watching is
    /// enabled) start the native change listener. Returns the initial
    /// snapshot of accepted files.
    pub async fn init(&mut self) -> Result<Vec<FileMeta>> {
        self.dir = self.dir.canonicalize().unwrap_or_else(|_| self.dir.clone());

        if self.opts.watch {
            let (raw_tx, raw_rx) = mpsc::unbounded_channel::<PathBuf>();
            let mut watcher = RecommendedWatcher::new(
                move |res: notify::Result<Event>| match res {
                    Ok(event) => {
                        for path in event.paths {
                            if let Err(err) = raw_tx.send(path) {
                                eprintln!("remold: failed to forward notify event: {err}");
                            }
                        }
                    }
                    Err(err) => {
                        eprintln!("remold: file watch error: {err}");
                    }
                },
                Config::default(),
            )?;
            watcher
                .watch(&self.dir, RecursiveMode::Recursive)
                .with_context(|| format!("watching directory {:?}", self.dir))?;
            self.notify = Some(watcher);
            self.raw_rx = Some(raw_rx);
            info!("file watcher started on {:?}", self.dir);
        }

        self.recurse(self.dir.clone()).await?;

        Ok(self
            .stats
            .iter()
            .map(|(path, metadata)| FileMeta {
                path: path.clone(),
                metadata: Some(metadata.clone()),
            })
            .collect())
    }

    /// Consume the watcher and run its debounce/emit loop as a background
    /// task, forwarding events tagged with `index` into `tx`.
    ///
    /// Returns `None` when this watcher was configured with `watch = false`.
    pub fn spawn(
        mut self,
        index: usize,
        tx: mpsc::Sender<(usize, WatchEvent)>,
    ) -> Option<JoinHandle<()>> {
        let mut raw_rx = self.raw_rx.take()?;

        Some(tokio::spawn(async move {
            // Pending debounce deadlines per absolute path; `seq` keeps
            // notification order among paths expiring in the same tick.
            let mut pending: HashMap<PathBuf, (Instant, u64)> = HashMap::new();
            let mut seq: u64 = 0;

            loop {
                let next_deadline = pending.values().map(|(at, _)| *at).min();

                tokio::select! {
                    raw = raw_rx.recv() => match raw {
                        Some(path) => {
                            seq += 1;
                            // Timer resets on every new notification for the path.
                            pending.insert(path, (Instant::now() + self.opts.debounce, seq));
                        }
                        None => break,
                    },
                    _ = async {
                        match next_deadline {
                            Some(at) => tokio::time::sleep_until(at).await,
                            None => std::future::pending::<()>().await,
                        }
                    } => {
                        let now = Instant::now();
                        let mut expired: Vec<(PathBuf, u64)> = pending
                            .iter()
                            .filter(|(_, (at, _))| *at <= now)
                            .map(|(p, (_, s))| (p.clone(), *s))
                            .collect();
                        expired.sort_by_key(|(_, s)| *s);

                        // Drain one at a time; each step does its own stat so
                        // rapid changes to one path resolve in order.
                        for (path, _) in expired {
                            pending.remove(&path);
                            if let Err(err) = self.process(&path, index, &tx).await {
                                debug!(error = %err, "watcher event loop stopping");
                                return;
                            }
                        }
                    }
                }
            }
            debug!("file watcher loop ended for {:?}", self.dir);
        }))
    }

    /// Re-stat a notified path and emit the appropriate events.
    async fn process(
        &mut self,
        full: &Path,
        index: usize,
        tx: &mpsc::Sender<(usize, WatchEvent)>,
    ) -> Result<()> {
        let Some(rel) = relative_str(&self.dir, full) else {
            warn!(
                "could not relativize path {:?} against root {:?}",
                full, self.dir
            );
            return Ok(());
        };

        match tokio::fs::metadata(full).await {
            Ok(metadata) => {
                if let Some(filter) = &self.opts.filter {
                    if !filter(&rel, &metadata) {
                        return Ok(());
                    }
                }
                if metadata.is_file() {
                    if self.opts.use_hash {
                        if let Ok(h) = hash::hash_file(full).await {
                            if !self.hashes.update(&rel, h) {
                                debug!(path = %rel, "content unchanged; suppressing event");
                                return Ok(());
                            }
                        }
                    }
                    self.stats.insert(rel.clone(), metadata.clone());
                    tx.send((index, WatchEvent::Added { path: rel, metadata }))
                        .await?;
                } else if metadata.is_dir() && !self.dirs.contains(&rel) {
                    // New directory: crawl it and report every file beneath it.
                    self.recurse(full.to_path_buf()).await?;
                    let prefix = format!("{rel}/");
                    let found: Vec<(String, Metadata)> = self
                        .stats
                        .iter()
                        .filter(|(p, _)| p.starts_with(&prefix))
                        .map(|(p, m)| (p.clone(), m.clone()))
                        .collect();
                    for (path, metadata) in found {
                        tx.send((index, WatchEvent::Added { path, metadata }))
                            .await?;
                    }
                }
            }
            Err(_) => {
                // Stat failed: the path is gone.
                if self.stats.remove(&rel).is_some() {
                    self.hashes.forget(&rel);
                    tx.send((index, WatchEvent::Removed { path: rel })).await?;
                } else if self.dirs.contains(&rel) {
                    let prefix = format!("{rel}/");
                    self.dirs.retain(|d| d != &rel && !d.starts_with(&prefix));
                    let removed: Vec<String> = self
                        .stats
                        .keys()
                        .filter(|p| p.starts_with(&prefix))
                        .cloned()
                        .collect();
                    for path in removed {
                        self.stats.remove(&path);
                        self.hashes.forget(&path);
                        tx.send((index, WatchEvent::Removed { path })).await?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Crawl one directory entry, pruning subtrees the filter rejects.
    fn recurse(&mut self, full: PathBuf) -> BoxFuture<'_, Result<()>> {
        async move {
            let rel = relative_str(&self.dir, &full).unwrap_or_default();
            let metadata = tokio::fs::metadata(&full)
                .await
                .with_context(|| format!("statting {full:?}"))?;

            if !rel.is_empty() {
                if let Some(filter) = &self.opts.filter {
                    if !filter(&rel, &metadata) {
                        return Ok(());
                    }
                }
            }

            if metadata.is_file() {
                self.stats.insert(rel, metadata);
            } else if metadata.is_dir() {
                self.dirs.insert(rel);
                let mut entries = tokio::fs::read_dir(&full)
                    .await
                    .with_context(|| format!("reading directory {full:?}"))?;
                while let Some(entry) = entries.next_entry().await? {
                    self.recurse(entry.path()).await?;
                }
            }

            Ok(())
        }
        .boxed()
    }
}

impl fmt::Debug for DirWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirWatcher")
            .field("dir", &self.dir)
            .field("tracked_files", &self.stats.len())
            .field("tracked_dirs", &self.dirs.len())
            .finish_non_exhaustive()
    }
}

/// Convert a path into a string relative to `root`, with forward slashes.
///
/// Returns `None` if the path is not under `root` and cannot be relativized.
fn relative_str(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let s = rel.to_string_lossy().replace('\\', "/");
    Some(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_snapshot_respects_filter_and_prunes_subtrees() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        tokio::fs::create_dir_all(root.join("keep")).await.unwrap();
        tokio::fs::create_dir_all(root.join("skip")).await.unwrap();
        tokio::fs::write(root.join("keep/a.md"), "a").await.unwrap();
        tokio::fs::write(root.join("keep/b.rs"), "b").await.unwrap();
        tokio::fs::write(root.join("skip/c.md"), "c").await.unwrap();

        let opts = WatcherOptions::new(root)
            .watch(false)
            .with_filter(|path, metadata| {
                if metadata.is_dir() {
                    path != "skip"
                } else {
                    path.ends_with(".md")
                }
            });

        let mut watcher = DirWatcher::new(Arc::new(opts));
        let snapshot = watcher.init().await.unwrap();

        let mut paths: Vec<String> = snapshot.into_iter().map(|m| m.path).collect();
        paths.sort();
        assert_eq!(paths, vec!["keep/a.md"]);
    }

    #[tokio::test]
    async fn spawn_returns_none_when_not_watching() {
        let dir = tempfile::tempdir().unwrap();
        let opts = WatcherOptions::new(dir.path()).watch(false);
        let mut watcher = DirWatcher::new(Arc::new(opts));
        watcher.init().await.unwrap();

        let (tx, _rx) = mpsc::channel(4);
        assert!(watcher.spawn(0, tx).is_none());
    }
}
