// src/config/mod.rs

//! Configuration loading and validation.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate watcher sections before anything starts (`validate.rs`).
//!
//! The config surface covers what can be expressed declaratively: watched
//! roots, glob filters, encodings, debounce, hashing. Transforms, generators,
//! and resolvers are code and are supplied through [`crate::EngineOptions`].

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{ConfigFile, WatcherSection};
pub use validate::validate_config;
