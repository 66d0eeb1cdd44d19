// src/engine/mod.rs

//! The transformation engine.
//!
//! This module is responsible for:
//! - Running the user transform over every watched file and re-running it
//!   when dependencies change.
//! - Tracking the dependency graph discovered from what each transform and
//!   generator requests while running.
//! - Scheduling work in waves, including the deadlock-breaking rules that
//!   let the initial wave settle even when requested files never appear.
//! - Exposing the public [`Engine`] handle and the [`Ctx`] handed to
//!   transforms and generators.

pub mod context;
pub mod runtime;
pub mod state;

pub use context::{Ctx, ErrorReport, Generate, OnError, Resolver, Transform};
pub use runtime::{Engine, EngineOptions};
pub use state::{DepKey, Identity, Phase};
