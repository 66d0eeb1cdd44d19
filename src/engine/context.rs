// src/engine/context.rs

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::engine::runtime::Inner;
use crate::engine::state::Identity;
use crate::file::{File, FileData, FileEvent};
use crate::watch::PathFilter;

/// The user transform: runs once per (re)processed file.
///
/// The transform mutates the file in place; whatever state it leaves behind
/// is published, even when it returns an error (the error goes to the
/// engine's error callback, never to the scheduler).
#[async_trait]
pub trait Transform: Send + Sync {
    async fn transform(&self, ctx: &Ctx, file: &mut File, event: FileEvent) -> Result<()>;
}

/// A generator: an identity-keyed producer of purely virtual files,
/// typically emitting them through [`Ctx::add`]. Re-run whenever one of the
/// dependencies it requested changes.
#[async_trait]
pub trait Generate: Send + Sync {
    async fn generate(&self, ctx: &Ctx) -> Result<()>;
}

/// Path resolver: `(base, requested) -> resolved`, where `base` is the path
/// of the file currently being transformed. Enables relative references in
/// `get`/`add`. A resolver must return already-root-relative paths
/// unchanged, since results of filter queries are re-resolved through it.
pub type Resolver = Arc<dyn Fn(&str, &str) -> String + Send + Sync>;

/// Callback receiving every transform/generator failure. The engine never
/// propagates these; processing continues.
pub type OnError = Arc<dyn Fn(&ErrorReport) + Send + Sync>;

/// What failed and how, delivered to the [`OnError`] callback.
#[derive(Debug)]
pub struct ErrorReport {
    /// Path of the file whose transform failed, if any.
    pub path: Option<String>,
    /// Index of the generator that failed, if any.
    pub generator: Option<usize>,
    /// The event being processed when the transform failed.
    pub event: Option<FileEvent>,
    pub error: anyhow::Error,
}

/// Execution context handed to transforms and generators.
///
/// Carries the ambient identity of the running unit explicitly (rather than
/// through any task-local machinery), so dependency edges and relative path
/// resolution are attributed to the correct logical owner across suspension
/// points.
#[derive(Clone)]
pub struct Ctx {
    pub(crate) inner: Arc<Inner>,
    pub(crate) identity: Identity,
}

impl Ctx {
    /// Path of the file being transformed, or `None` inside a generator.
    pub fn path(&self) -> Option<&str> {
        match &self.identity {
            Identity::Path(path) => Some(path),
            Identity::Generator(_) => None,
        }
    }

    /// Retrieve a file by path, recording a dependency edge.
    ///
    /// During the initial wave this suspends until the path is published or
    /// the engine concludes it never will be (in which case it resolves to
    /// `None`). In the steady state a missing path resolves to `None`
    /// immediately.
    pub async fn get(&self, path: &str) -> Option<Arc<File>> {
        self.inner.get_path(Some(&self.identity), path).await
    }

    /// Retrieve several files by path, in order.
    pub async fn get_many(&self, paths: &[&str]) -> Vec<Option<Arc<File>>> {
        let mut out = Vec::with_capacity(paths.len());
        for path in paths {
            out.push(self.get(path).await);
        }
        out
    }

    /// Retrieve all published files whose path matches the filter, sorted by
    /// path, recording both the filter edge and a concrete edge per match.
    ///
    /// During the initial wave this always suspends at least until the
    /// deadlock check decides no further matches will appear; the match set
    /// is re-queried after waking, so it reflects everything published in
    /// the meantime.
    pub async fn get_matching(&self, filter: &PathFilter) -> Vec<Arc<File>> {
        self.inner.get_matching(Some(&self.identity), filter).await
    }

    /// Add a virtual file; its path is resolved relative to this context.
    pub fn add(&self, data: FileData) -> Result<()> {
        self.inner.add_with(Some(&self.identity), data)
    }

    /// Resolve a path against the ambient identity via the configured
    /// resolver; identity when no resolver is set or inside a generator.
    pub fn resolve(&self, path: &str) -> String {
        self.inner.resolve_with(Some(&self.identity), path)
    }
}

impl fmt::Debug for Ctx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ctx")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}
