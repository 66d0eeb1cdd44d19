// src/watch/mod.rs

//! File watching and change detection.
//!
//! This module is responsible for:
//! - Crawling each configured root directory into an initial snapshot.
//! - Wiring up a cross-platform filesystem watcher (`notify`) and turning
//!   raw notifications into debounced, re-stat'ed add/remove events.
//! - Path predicates (`PathFilter`) used both for watcher filtering and as
//!   dependency keys in the engine.
//! - (Optionally) content hashing to suppress events for files whose bytes
//!   did not actually change.
//!
//! It does **not** know about transforms or dependencies; it only turns
//! filesystem changes into a reliable event feed for the engine.

pub mod filter;
pub mod hash;
pub mod watcher;

pub use filter::PathFilter;
pub use hash::{hash_file, HashCache};
pub use watcher::{
    DirWatcher, EncPolicy, FileMeta, PreHook, ReadPolicy, WatchEvent, WatchFilter,
    WatcherOptions,
};
