// src/lib.rs

//! remold: an incremental, dependency-tracking file transformation engine.
//!
//! remold crawls one or more watched directories, runs a user transform over
//! every file, and keeps the transformed output up to date as files change
//! on disk. While a transform runs it can request other files through its
//! [`Ctx`]; each request is recorded as a dependency edge, so when the
//! requested file later changes, the dependent is transformed again
//! automatically. Generators produce purely virtual files the same way.
//!
//! Typical shape:
//!
//! ```no_run
//! use remold::{Ctx, Engine, EngineOptions, File, FileEvent, Transform, WatcherOptions};
//!
//! struct Upcase;
//!
//! #[async_trait::async_trait]
//! impl Transform for Upcase {
//!     async fn transform(
//!         &self,
//!         _ctx: &Ctx,
//!         file: &mut File,
//!         _event: FileEvent,
//!     ) -> anyhow::Result<()> {
//!         if let Some(upper) = file.text().map(str::to_uppercase) {
//!             file.set_text(upper);
//!         }
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> anyhow::Result<()> {
//! let engine = Engine::new(
//!     EngineOptions::new(Upcase).watcher(WatcherOptions::new("content")),
//! )?;
//! engine.exec().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod errors;
pub mod file;
pub mod logging;
pub mod watch;

pub use engine::{
    Ctx, DepKey, Engine, EngineOptions, ErrorReport, Generate, Identity, OnError, Phase,
    Resolver, Transform,
};
pub use errors::{Error, Result};
pub use file::{Encoding, File, FileData, FileEvent};
pub use watch::{PathFilter, WatcherOptions};
