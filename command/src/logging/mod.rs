//! Relay logs
//!
//! The crates log through the `log` facade. This module provides the backend:
//! a small logger writing one line per record to the configured target,
//! without any buffering thread, so that a record is visible as soon as the
//! macro returns.

pub mod logs;

pub use crate::logging::logs::*;

#[derive(thiserror::Error, Debug)]
pub enum LogError {
    #[error("invalid log target {0}: {1}")]
    InvalidLogTarget(String, &'static str),
    #[error("invalid log level {0}")]
    InvalidLogLevel(String),
    #[error("could not open log file {0}: {1}")]
    OpenFile(String, std::io::Error),
}
