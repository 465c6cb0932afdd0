//! Shared utilities for langlink.
//!
//! This crate provides the ambient pieces used across the langlink workspace:
//! - Logging setup with tracing
//! - Configuration and project path helpers

pub mod log;
pub mod path;

pub use log::{LogConfig, LogLevel};
