//! Tools shared by the relay crates: the readiness flags the reactor and the
//! relay legs exchange, the configuration file format and the logging
//! backend.

pub mod config;
pub mod logging;
pub mod ready;
