// src/watch/filter.rs

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;

/// Predicate over root-relative paths (forward slashes, e.g. `"src/a.md"`).
///
/// Used both as a dependency key in `get_matching` and as a building block
/// for watcher filters. Cloning is cheap: clones share the underlying
/// predicate, and equality/hashing are by that shared identity, so concurrent
/// `get_matching` calls holding clones of the same filter share one waiter.
#[derive(Clone)]
pub struct PathFilter(Arc<FilterKind>);

enum FilterKind {
    Glob(GlobSet),
    Regex(Regex),
    Func(Box<dyn Fn(&str) -> bool + Send + Sync>),
}

impl PathFilter {
    /// Build a filter from glob patterns; matches if any pattern matches.
    pub fn glob<I, S>(patterns: I) -> Result<PathFilter>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = GlobSetBuilder::new();
        for pat in patterns {
            let pat = pat.as_ref();
            let glob =
                Glob::new(pat).with_context(|| format!("invalid glob pattern: {pat}"))?;
            builder.add(glob);
        }
        Ok(PathFilter(Arc::new(FilterKind::Glob(builder.build()?))))
    }

    /// Build a filter from a regular expression over the relative path.
    pub fn regex(pattern: &str) -> Result<PathFilter> {
        let re =
            Regex::new(pattern).with_context(|| format!("invalid path regex: {pattern}"))?;
        Ok(PathFilter(Arc::new(FilterKind::Regex(re))))
    }

    /// Build a filter from an arbitrary predicate.
    pub fn func(f: impl Fn(&str) -> bool + Send + Sync + 'static) -> PathFilter {
        PathFilter(Arc::new(FilterKind::Func(Box::new(f))))
    }

    /// Returns true if the given root-relative path matches.
    pub fn matches(&self, rel_path: &str) -> bool {
        match &*self.0 {
            FilterKind::Glob(set) => set.is_match(rel_path),
            FilterKind::Regex(re) => re.is_match(rel_path),
            FilterKind::Func(f) => f(rel_path),
        }
    }
}

impl PartialEq for PathFilter {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for PathFilter {}

impl Hash for PathFilter {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl fmt::Debug for PathFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &*self.0 {
            FilterKind::Glob(_) => "Glob",
            FilterKind::Regex(_) => "Regex",
            FilterKind::Func(_) => "Func",
        };
        f.debug_tuple("PathFilter").field(&kind).finish()
    }
}
