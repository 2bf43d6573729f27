//! Core types for the cafe-loader RPL loader
//!
//! This crate provides the error types, configuration, and logging
//! infrastructure shared by the memory and loader crates.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{Config, DebugConfig, LoaderConfig, LogLevel};
pub use error::{ConfigError, ErrorKind, FormatError, LoaderError, MemoryError, Result};
