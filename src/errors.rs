// src/errors.rs

//! Crate-wide error aliases.
//!
//! Thin wrapper around `anyhow` for now; configuration and usage-sequence
//! errors are plain `anyhow::Error`s with descriptive messages, and this
//! module is the single place to grow structured error types later.

pub use anyhow::{Error, Result};
