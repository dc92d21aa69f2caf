//! Quarry Core: shared error type and configuration.
//!
//! This crate provides the foundational types used across all Quarry crates.
//! It has no internal Quarry dependencies.
//!
//! # Modules
//!
//! - [`error`]: Error types and Result alias
//! - [`config`]: Layered TOML/environment configuration

#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;

// Re-export key types at crate root for convenience
pub use config::QuarryConfig;
pub use error::{Error, Result};
