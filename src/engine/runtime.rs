// src/engine/runtime.rs

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::{bail, Result};
use futures_util::future::try_join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::context::{Ctx, ErrorReport, Generate, OnError, Resolver, Transform};
use crate::engine::state::{DepKey, Identity, Phase, State};
use crate::file::{File, FileData, FileEvent};
use crate::watch::{
    DirWatcher, EncPolicy, FileMeta, PathFilter, ReadPolicy, WatchEvent, WatcherOptions,
};

/// Everything needed to construct an [`Engine`].
pub struct EngineOptions {
    watchers: Vec<WatcherOptions>,
    transform: Arc<dyn Transform>,
    generators: Vec<Arc<dyn Generate>>,
    resolver: Option<Resolver>,
    on_error: Option<OnError>,
}

impl EngineOptions {
    pub fn new(transform: impl Transform + 'static) -> EngineOptions {
        EngineOptions {
            watchers: Vec::new(),
            transform: Arc::new(transform),
            generators: Vec::new(),
            resolver: None,
            on_error: None,
        }
    }

    /// Add a watched root directory.
    pub fn watcher(mut self, opts: WatcherOptions) -> Self {
        self.watchers.push(opts);
        self
    }

    /// Register a generator. Its identity is its registration index.
    pub fn generator(mut self, generator: impl Generate + 'static) -> Self {
        self.generators.push(Arc::new(generator));
        self
    }

    /// Install a `(base, path) -> path` resolver for relative references.
    pub fn resolver(
        mut self,
        f: impl Fn(&str, &str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.resolver = Some(Arc::new(f));
        self
    }

    /// Install the error callback for transform/generator failures.
    pub fn on_error(mut self, f: impl Fn(&ErrorReport) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }
}

/// The incremental transformation engine.
///
/// Owns the file store, the watchers, the transform and generators, the
/// discovered dependency graph, and the wave scheduler. Cheap to clone; all
/// clones share one engine.
///
/// Lifecycle: construct with [`Engine::new`], call [`Engine::exec`] exactly
/// once, then interact through `get` / `add` / the read-only accessors while
/// the steady-state loop reacts to filesystem changes in the background.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) state: Mutex<State>,
    pub(crate) watchers: Vec<Arc<WatcherOptions>>,
    pub(crate) transform: Arc<dyn Transform>,
    pub(crate) generators: Vec<Arc<dyn Generate>>,
    pub(crate) resolver: Option<Resolver>,
    pub(crate) on_error: Option<OnError>,
}

impl Engine {
    /// Validate the options and construct an engine. Fails fast on
    /// configuration errors, before any watching starts.
    pub fn new(options: EngineOptions) -> Result<Engine> {
        for opts in &options.watchers {
            if opts.dir.as_os_str().is_empty() {
                bail!("engine: watcher dir must be a non-empty path");
            }
        }

        Ok(Engine {
            inner: Arc::new(Inner {
                state: Mutex::new(State::new()),
                watchers: options.watchers.into_iter().map(Arc::new).collect(),
                transform: options.transform,
                generators: options.generators,
                resolver: options.resolver,
                on_error: options.on_error,
            }),
        })
    }

    /// Execute everything: crawl all roots, run the transform over every
    /// discovered file and every generator, and resolve once the first wave
    /// of processing (including all dependency suspensions) has settled.
    ///
    /// Resolves successfully even if individual transforms failed — those
    /// are reported through the error callback. Fails if called twice.
    pub async fn exec(&self) -> Result<()> {
        let inner = &self.inner;

        let gate = {
            let mut state = inner.state.lock();
            if state.phase != Phase::NotStarted {
                bail!("engine.exec: cannot call more than once");
            }
            state.phase = Phase::InitialWave;
            state.start_wave()
        };

        // Init all watchers in parallel; each returns its authoritative
        // initial snapshot before any live event is considered.
        let initted = try_join_all(inner.watchers.iter().map(|opts| {
            let opts = Arc::clone(opts);
            async move {
                let mut watcher = DirWatcher::new(opts);
                let snapshot = watcher.init().await?;
                Ok::<_, anyhow::Error>((watcher, snapshot))
            }
        }))
        .await?;

        let mut files: Vec<(usize, String, FileMeta)> = Vec::new();
        let mut watchers = Vec::new();
        for (index, (watcher, snapshot)) in initted.into_iter().enumerate() {
            for mut meta in snapshot {
                // The pre hook may rename meta.path; the on-disk location
                // stays the original crawl path.
                let source = meta.path.clone();
                if let Some(pre) = &inner.watchers[index].pre {
                    pre(&mut meta);
                }
                files.push((index, source, meta));
            }
            watchers.push(watcher);
        }

        // Note every file and generator as pending before scheduling any
        // work, so the suspension logic is correct from the first instant.
        {
            let mut state = inner.state.lock();
            for (_, _, meta) in &files {
                state.paths.insert(meta.path.clone());
                state.active.insert(Identity::Path(meta.path.clone()));
            }
            for index in 0..inner.generators.len() {
                state.active.insert(Identity::Generator(index));
            }
        }

        // Live events from every root funnel into one queue, drained by the
        // steady-state loop after the initial wave.
        let (event_tx, event_rx) = mpsc::channel::<(usize, WatchEvent)>(64);
        for (index, watcher) in watchers.into_iter().enumerate() {
            let _ = watcher.spawn(index, event_tx.clone());
        }
        drop(event_tx);

        info!(
            files = files.len(),
            generators = inner.generators.len(),
            "starting initial wave"
        );

        for (index, source, meta) in files {
            let inner = Arc::clone(inner);
            tokio::spawn(async move { inner.process_physical(index, source, meta).await });
        }
        for index in 0..inner.generators.len() {
            let inner = Arc::clone(inner);
            tokio::spawn(async move { inner.process_generator(index).await });
        }

        // An engine with nothing to do still completes its initial wave.
        inner.state.lock().check_wave();
        let _ = gate.await;

        inner.state.lock().phase = Phase::Steady;
        info!("initial wave complete; engine steady");

        let inner = Arc::clone(inner);
        tokio::spawn(async move { inner.steady_loop(event_rx).await });

        Ok(())
    }

    /// Retrieve a published file by path. Never blocks and records no
    /// dependency edge; transforms should use [`Ctx::get`] instead.
    pub async fn get(&self, path: &str) -> Option<Arc<File>> {
        self.inner.get_path(None, path).await
    }

    /// Retrieve several published files by path, in order.
    pub async fn get_many(&self, paths: &[&str]) -> Vec<Option<Arc<File>>> {
        let mut out = Vec::with_capacity(paths.len());
        for path in paths {
            out.push(self.get(path).await);
        }
        out
    }

    /// Retrieve all published files matching the filter, sorted by path.
    pub async fn get_matching(&self, filter: &PathFilter) -> Vec<Arc<File>> {
        self.inner.get_matching(None, filter).await
    }

    /// Add a virtual file. Fails if called before `exec`.
    pub fn add(&self, data: FileData) -> Result<()> {
        self.inner.add_with(None, data)
    }

    /// Resolve a path. Outside a transform there is no ambient identity, so
    /// this is the identity function; kept for interface parity with
    /// [`Ctx::resolve`].
    pub fn resolve(&self, path: &str) -> String {
        self.inner.resolve_with(None, path)
    }

    /// All known physical paths.
    pub fn paths(&self) -> BTreeSet<String> {
        self.inner.state.lock().paths.clone()
    }

    /// The published file at `path`, if any.
    pub fn file(&self, path: &str) -> Option<Arc<File>> {
        self.inner.state.lock().files.get(path).cloned()
    }

    /// Snapshot of the whole file store.
    pub fn files(&self) -> HashMap<String, Arc<File>> {
        self.inner.state.lock().files.clone()
    }
}

impl Inner {
    fn report(&self, report: ErrorReport) {
        if let Some(on_error) = &self.on_error {
            on_error(&report);
        } else {
            warn!(
                path = ?report.path,
                generator = ?report.generator,
                error = %report.error,
                "unhandled transform error (no on_error callback installed)"
            );
        }
    }

    /// Read a physical file per its watcher's policies and push it through
    /// the transform pipeline.
    ///
    /// `source` is the on-disk root-relative path from the crawl or watch
    /// event; `meta.path` may differ when the watcher's pre hook renamed the
    /// file. Disk I/O and the read/enc policies use `source`, the store is
    /// keyed by `meta.path`.
    pub(crate) async fn process_physical(self: &Arc<Self>, index: usize, source: String, meta: FileMeta) {
        let opts = &self.watchers[index];
        let FileMeta { path, metadata } = meta;
        let Some(metadata) = metadata else {
            return;
        };

        let read = match &opts.read {
            ReadPolicy::Always => true,
            ReadPolicy::Never => false,
            ReadPolicy::Per(f) => f(&source, &metadata),
        };

        let mut bytes = None;
        if read {
            match tokio::fs::read(opts.dir.join(&source)).await {
                Ok(b) => bytes = Some(b),
                Err(err) => {
                    warn!(path = %source, error = %err, "failed to read file contents");
                    self.report(ErrorReport {
                        path: Some(path.clone()),
                        generator: None,
                        event: Some(FileEvent::Read),
                        error: err.into(),
                    });
                }
            }
        }

        let enc = match &opts.enc {
            EncPolicy::Fixed(enc) => *enc,
            EncPolicy::Per(f) => f(&source, Some(&metadata), bytes.as_deref()),
        };

        let data = FileData {
            path: path.clone(),
            metadata: Some(metadata),
            bytes,
            text: None,
            enc,
        };

        {
            let mut state = self.state.lock();
            state.paths.insert(path.clone());
            state.orig.insert(path, data.clone());
        }

        self.process_file(data, FileEvent::Read).await;
    }

    /// Transform a file, publish it, and wake waiters / trigger dependents.
    pub(crate) async fn process_file(self: &Arc<Self>, data: FileData, event: FileEvent) {
        let mut file = File::from(data);
        let path = file.path().to_string();
        let identity = Identity::Path(path.clone());

        {
            let mut state = self.state.lock();
            state.active.insert(identity.clone());
            state.clear_edges(&identity);
        }

        let ctx = Ctx {
            inner: Arc::clone(self),
            identity: identity.clone(),
        };
        if let Err(error) = self.transform.transform(&ctx, &mut file, event).await {
            warn!(path = %path, ?event, error = %error, "transform failed");
            self.report(ErrorReport {
                path: Some(path.clone()),
                generator: None,
                event: Some(event),
                error,
            });
        }

        // Publication happens-before waking any waiter for this path and
        // before dependents are re-triggered.
        let steady = {
            let mut state = self.state.lock();
            state.files.insert(path.clone(), Arc::new(file));
            if state.phase == Phase::InitialWave {
                state.mark_found(&DepKey::Path(path.clone()));
                false
            } else {
                true
            }
        };
        if steady {
            self.process_dependents(&path);
        }

        let mut state = self.state.lock();
        state.active.remove(&identity);
        state.check_wave();
    }

    /// Run one generator, reporting failures through the error callback.
    pub(crate) async fn process_generator(self: &Arc<Self>, index: usize) {
        let identity = Identity::Generator(index);

        {
            let mut state = self.state.lock();
            state.active.insert(identity.clone());
            state.clear_edges(&identity);
        }

        let ctx = Ctx {
            inner: Arc::clone(self),
            identity: identity.clone(),
        };
        if let Err(error) = self.generators[index].generate(&ctx).await {
            warn!(generator = index, error = %error, "generator failed");
            self.report(ErrorReport {
                path: None,
                generator: Some(index),
                event: None,
                error,
            });
        }

        let mut state = self.state.lock();
        state.active.remove(&identity);
        state.check_wave();
    }

    /// Re-run everything that depends on `path`. One-level expansion:
    /// transitive propagation happens because each re-run publishes its own
    /// path and triggers the next level.
    pub(crate) fn process_dependents(self: &Arc<Self>, path: &str) {
        let mut rerun_files: Vec<FileData> = Vec::new();
        let mut rerun_generators: Vec<usize> = Vec::new();

        {
            let mut state = self.state.lock();
            for dependent in state.take_dependents(path) {
                match dependent {
                    Identity::Generator(index) => {
                        // Mark active before spawning so the wave stays open.
                        state.active.insert(Identity::Generator(index));
                        rerun_generators.push(index);
                    }
                    Identity::Path(dep_path) => {
                        if let Some(data) = state.orig.get(&dep_path).cloned() {
                            state.active.insert(Identity::Path(dep_path));
                            rerun_files.push(data);
                        }
                    }
                }
            }
            state.check_wave();
        }

        if !rerun_files.is_empty() || !rerun_generators.is_empty() {
            debug!(
                path = %path,
                files = rerun_files.len(),
                generators = rerun_generators.len(),
                "re-processing dependents"
            );
        }

        for data in rerun_files {
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                inner.process_file(data, FileEvent::Retransform).await
            });
        }
        for index in rerun_generators {
            let inner = Arc::clone(self);
            tokio::spawn(async move { inner.process_generator(index).await });
        }
    }

    /// Single-consumer steady-state loop: one watcher event, and the full
    /// wave it causes (including cascaded dependent re-runs), completes
    /// before the next event is drained.
    pub(crate) async fn steady_loop(
        self: Arc<Self>,
        mut events: mpsc::Receiver<(usize, WatchEvent)>,
    ) {
        while let Some((index, event)) = events.recv().await {
            debug!(?event, watcher = index, "processing watch event");
            let gate = self.state.lock().start_wave();

            match event {
                WatchEvent::Added { path, metadata } => {
                    let source = path.clone();
                    let mut meta = FileMeta {
                        path,
                        metadata: Some(metadata),
                    };
                    if let Some(pre) = &self.watchers[index].pre {
                        pre(&mut meta);
                    }
                    self.process_physical(index, source, meta).await;
                }
                WatchEvent::Removed { path } => {
                    let mut meta = FileMeta {
                        path,
                        metadata: None,
                    };
                    if let Some(pre) = &self.watchers[index].pre {
                        pre(&mut meta);
                    }
                    let path = meta.path;

                    let old = {
                        let mut state = self.state.lock();
                        state.paths.remove(&path);
                        state.orig.remove(&path);
                        state.files.remove(&path)
                    };

                    // The transform sees the stale snapshot once more so it
                    // can clean up derived state; the result is not
                    // re-published.
                    if let Some(old) = old {
                        let mut stale = (*old).clone();
                        let ctx = Ctx {
                            inner: Arc::clone(&self),
                            identity: Identity::Path(path.clone()),
                        };
                        if let Err(error) = self
                            .transform
                            .transform(&ctx, &mut stale, FileEvent::Deleted)
                            .await
                        {
                            warn!(path = %path, error = %error, "delete transform failed");
                            self.report(ErrorReport {
                                path: Some(path.clone()),
                                generator: None,
                                event: Some(FileEvent::Deleted),
                                error,
                            });
                        }
                    }

                    self.process_dependents(&path);
                }
            }

            let _ = gate.await;
        }
        debug!("steady-state event loop ended");
    }

    pub(crate) fn resolve_with(&self, identity: Option<&Identity>, path: &str) -> String {
        match (&self.resolver, identity) {
            (Some(resolver), Some(Identity::Path(base))) => resolver(base, path),
            _ => path.to_string(),
        }
    }

    /// Shared `get` for a concrete path. With an ambient identity this
    /// records an edge and may suspend during the initial wave; without one
    /// it is a plain store lookup.
    pub(crate) async fn get_path(
        self: &Arc<Self>,
        identity: Option<&Identity>,
        path: &str,
    ) -> Option<Arc<File>> {
        let resolved = self.resolve_with(identity, path);
        let key = DepKey::Path(resolved.clone());

        let waiter = {
            let mut state = self.state.lock();
            if let Some(id) = identity {
                state.deps.push((id.clone(), key.clone()));
            }
            if state.phase == Phase::InitialWave
                && identity.is_some()
                && !state.files.contains_key(&resolved)
            {
                let rx = state.await_key(key, identity.unwrap().clone());
                state.check_wave();
                Some(rx)
            } else {
                None
            }
        };

        if let Some(rx) = waiter {
            let _ = rx.await;
        }

        self.state.lock().files.get(&resolved).cloned()
    }

    /// Shared `get` for a filter key.
    pub(crate) async fn get_matching(
        self: &Arc<Self>,
        identity: Option<&Identity>,
        filter: &PathFilter,
    ) -> Vec<Arc<File>> {
        let key = DepKey::Filter(filter.clone());

        let waiter = {
            let mut state = self.state.lock();
            if let Some(id) = identity {
                state.deps.push((id.clone(), key.clone()));
            }
            if state.phase == Phase::InitialWave && identity.is_some() {
                let rx = state.await_key(key, identity.unwrap().clone());
                state.check_wave();
                Some(rx)
            } else {
                None
            }
        };

        if let Some(rx) = waiter {
            let _ = rx.await;
        }

        // Re-query after waking: the match set reflects whatever became
        // available while suspended.
        let matched: Vec<String> = {
            let state = self.state.lock();
            let mut matched: Vec<String> = state
                .files
                .keys()
                .filter(|p| filter.matches(p))
                .cloned()
                .collect();
            matched.sort();
            matched
        };

        let mut out = Vec::with_capacity(matched.len());
        for path in &matched {
            if let Some(file) = self.get_path(identity, path).await {
                out.push(file);
            }
        }
        out
    }

    /// Shared `add`: store the data for later re-triggering and run the
    /// process-file pipeline, without disk I/O.
    pub(crate) fn add_with(
        self: &Arc<Self>,
        identity: Option<&Identity>,
        mut data: FileData,
    ) -> Result<()> {
        {
            let state = self.state.lock();
            if state.phase == Phase::NotStarted {
                bail!("engine.add: cannot call before exec");
            }
        }

        data.path = self.resolve_with(identity, &data.path);
        if data.path.is_empty() {
            bail!("engine.add: file path must be a non-empty string");
        }
        let path = data.path.clone();

        {
            let mut state = self.state.lock();
            state.orig.insert(path.clone(), data.clone());
            // Active before spawning, so a wave in flight cannot close
            // between this call returning and the pipeline starting.
            state.active.insert(Identity::Path(path));
        }

        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.process_file(data, FileEvent::Added).await });
        Ok(())
    }
}
