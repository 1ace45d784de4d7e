//! # Relay configuration
//!
//! The configuration is read from a TOML file into a [`FileConfig`], where
//! every field is optional, then validated into a [`Config`] that holds
//! the resolved values and their defaults.
//!
//! ```toml
//! listen_address = "127.0.0.1:8080"
//! target = "origin.example.com:80"
//! buffer_size = 16384
//! idle_timeout = 60
//! connect_timeout = 3
//! max_connections = 10000
//! user_agent = "relay"
//! log_level = "info"
//! log_target = "stdout"
//! ```
use std::{
    fmt,
    fs::File,
    io::Read,
    net::{SocketAddr, ToSocketAddrs},
    time::Duration,
};

use serde::Deserialize;

/// maximum number of passes a session does on its readiness before yielding
/// back to the event loop
pub const MAX_LOOP_ITERATIONS: usize = 100_000;

pub const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:8080";

/// size of each relay buffer, in bytes
pub const DEFAULT_BUFFER_SIZE: usize = 16_384;

/// smallest accepted buffer size, a request or response head must fit in it
pub const MIN_BUFFER_SIZE: usize = 64;

/// seconds of inactivity before a connection is shut down
pub const DEFAULT_IDLE_TIMEOUT: u64 = 60;

/// seconds to establish the origin connection
pub const DEFAULT_CONNECT_TIMEOUT: u64 = 3;

pub const DEFAULT_MAX_CONNECTIONS: usize = 10_000;

pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const DEFAULT_LOG_TARGET: &str = "stdout";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not open configuration file {path}: {error}")]
    FileOpen { path: String, error: std::io::Error },
    #[error("could not read configuration file {path}: {error}")]
    FileRead { path: String, error: std::io::Error },
    #[error("could not parse TOML configuration: {0}")]
    DeserializeToml(String),
    #[error("missing field {0}")]
    Missing(&'static str),
    #[error("invalid listen address {address}: {error}")]
    InvalidListenAddress {
        address: String,
        error: std::net::AddrParseError,
    },
    #[error("invalid target {0}, expected host:port")]
    InvalidTarget(String),
    #[error("could not resolve target {target}: {error}")]
    UnresolvableTarget {
        target: String,
        error: std::io::Error,
    },
    #[error("buffer size {0} is below the minimum of {min} bytes", min = MIN_BUFFER_SIZE)]
    BufferTooSmall(usize),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Configuration as written in the TOML file, every field is optional
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub listen_address: Option<String>,
    pub target: Option<String>,
    pub buffer_size: Option<usize>,
    pub idle_timeout: Option<u64>,
    pub connect_timeout: Option<u64>,
    pub max_connections: Option<usize>,
    pub user_agent: Option<String>,
    pub log_level: Option<String>,
    pub log_target: Option<String>,
}

impl FileConfig {
    pub fn load_from_path(path: &str) -> Result<FileConfig, ConfigError> {
        let data = read_file(path)?;
        Self::from_toml(&data)
    }

    pub fn from_toml(data: &str) -> Result<FileConfig, ConfigError> {
        toml::from_str(data).map_err(|e| ConfigError::DeserializeToml(e.to_string()))
    }

    /// Validate the file content and fill in the defaults
    pub fn into_config(self) -> Result<Config, ConfigError> {
        let listen_address = self
            .listen_address
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDRESS.to_owned());
        let listen_address = listen_address.parse::<SocketAddr>().map_err(|error| {
            ConfigError::InvalidListenAddress {
                address: listen_address.clone(),
                error,
            }
        })?;

        let target = self.target.ok_or(ConfigError::Missing("target"))?;
        let target = TargetAddress::parse(&target)?;

        let buffer_size = self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        if buffer_size < MIN_BUFFER_SIZE {
            return Err(ConfigError::BufferTooSmall(buffer_size));
        }

        let idle_timeout = self.idle_timeout.unwrap_or(DEFAULT_IDLE_TIMEOUT);
        if idle_timeout == 0 {
            return Err(ConfigError::Zero("idle_timeout"));
        }
        let connect_timeout = self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        if connect_timeout == 0 {
            return Err(ConfigError::Zero("connect_timeout"));
        }
        let max_connections = self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS);
        if max_connections == 0 {
            return Err(ConfigError::Zero("max_connections"));
        }

        Ok(Config {
            listen_address,
            target,
            buffer_size,
            idle_timeout: Duration::from_secs(idle_timeout),
            connect_timeout: Duration::from_secs(connect_timeout),
            max_connections,
            user_agent: self.user_agent,
            log_level: self
                .log_level
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_owned()),
            log_target: self
                .log_target
                .unwrap_or_else(|| DEFAULT_LOG_TARGET.to_owned()),
        })
    }
}

/// The origin every relayed request is forwarded to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAddress {
    pub host: String,
    pub port: u16,
}

impl TargetAddress {
    pub fn parse(target: &str) -> Result<Self, ConfigError> {
        let (host, port) = target
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::InvalidTarget(target.to_owned()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(ConfigError::InvalidTarget(target.to_owned()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidTarget(target.to_owned()))?;
        Ok(Self {
            host: host.to_owned(),
            port,
        })
    }

    /// Resolve to the first socket address, this may block on DNS
    pub fn resolve(&self) -> Result<SocketAddr, ConfigError> {
        let target = self.to_string();
        let mut addresses = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|error| ConfigError::UnresolvableTarget {
                target: target.clone(),
                error,
            })?;
        addresses
            .next()
            .ok_or_else(|| ConfigError::UnresolvableTarget {
                target,
                error: std::io::Error::new(std::io::ErrorKind::NotFound, "no address"),
            })
    }
}

impl fmt::Display for TargetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Validated configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub listen_address: SocketAddr,
    pub target: TargetAddress,
    pub buffer_size: usize,
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_connections: usize,
    pub user_agent: Option<String>,
    pub log_level: String,
    pub log_target: String,
}

impl Config {
    pub fn load_from_path(path: &str) -> Result<Config, ConfigError> {
        FileConfig::load_from_path(path)?.into_config()
    }
}

fn read_file(path: &str) -> Result<String, ConfigError> {
    let mut file = File::open(path).map_err(|error| ConfigError::FileOpen {
        path: path.to_owned(),
        error,
    })?;

    let mut data = String::new();
    file.read_to_string(&mut data)
        .map_err(|error| ConfigError::FileRead {
            path: path.to_owned(),
            error,
        })?;
    Ok(data)
}
