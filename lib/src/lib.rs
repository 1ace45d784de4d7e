//! # relay-lib, the relay engine of a non-blocking HTTP proxy
//!
//! One client request and its response are pumped between a client facing
//! connection and an origin facing connection. Each side of the exchange is
//! a *leg* with its own state machine ([`relay::ClientLeg`] and
//! [`relay::OriginLeg`]), and both legs coordinate through a shared
//! [`relay::RelayTask`] holding the request, the response, the two bounded
//! byte buffers and the two connection states.
//!
//! The legs never block: they do a bounded amount of buffer work on each
//! readiness event, then ask the reactor to arm or pause readiness on the
//! peer connection through an [`relay::IoControl`] handle.
//!
//! The [`server`] module holds a single threaded mio reactor driving the legs
//! for a proxy forwarding every request to one configured origin:
//!
//! ```no_run
//! use relay_command_lib::config::FileConfig;
//! use relay_lib::server::Server;
//!
//! let config = FileConfig::from_toml(r#"target = "127.0.0.1:9000""#)
//!     .expect("could not parse configuration")
//!     .into_config()
//!     .expect("invalid configuration");
//!
//! let mut server = Server::new(config).expect("could not create the relay");
//! server.run().expect("relay failure");
//! ```
#[macro_use]
extern crate log;

#[macro_use]
pub mod metrics;

pub mod buffer;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod socket;

use std::fmt;

pub use relay_command_lib::ready::Ready;

use crate::{
    protocol::http::{parser::ParseError, Version},
    relay::ConnState,
};

/// Faults of the relay state machine itself: an event arrived in a state
/// where it can not happen. They abort the whole exchange.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("illegal {leg} connection state {state:?} for event {event}")]
    IllegalState {
        leg: Leg,
        state: ConnState,
        event: &'static str,
    },
    #[error("no request on the relay task")]
    MissingRequest,
    #[error("no response on the relay task")]
    MissingResponse,
    #[error("the {0} connection has no I/O control bound on the task")]
    Unbound(Leg),
    #[error("the {0} connection is not attached to a relay task")]
    Detached(Leg),
    #[error("the relay task lock was poisoned")]
    Poisoned,
}

/// Faults of one connection. They shut that connection down, the
/// exchange is not retried.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("socket error")]
    Socket,
    #[error("connection closed before the end of the message")]
    UnexpectedEof,
    #[error("invalid chunked encoding: {0}")]
    InvalidChunk(String),
    #[error("invalid body framing: {0}")]
    Framing(String),
    #[error("could not parse message head: {0}")]
    Parse(#[from] ParseError),
    #[error("message head does not fit in {0} bytes")]
    HeadTooLarge(usize),
    #[error("chunked transfer encoding is not allowed for {0}")]
    ChunkedNotAllowed(Version),
    #[error("could not connect to the origin: {0}")]
    Connect(String),
    #[error("timeout")]
    Timeout,
}

/// One side of a relayed exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Leg {
    Client,
    Origin,
}

impl Leg {
    pub fn peer(self) -> Leg {
        match self {
            Leg::Client => Leg::Origin,
            Leg::Origin => Leg::Client,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Leg::Client => "client",
            Leg::Origin => "origin",
        }
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Leg::Client => "CLIENT",
            Leg::Origin => "ORIGIN",
        })
    }
}

/// Readiness of one socket: `event` is what mio reported, `interest` is what
/// the session wants to be woken up for
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    /// the current readiness
    pub event: Ready,
    /// the current interest
    pub interest: Ready,
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

impl Readiness {
    pub const fn new() -> Readiness {
        Readiness {
            event: Ready::EMPTY,
            interest: Ready::EMPTY,
        }
    }

    pub fn reset(&mut self) {
        self.event = Ready::EMPTY;
        self.interest = Ready::EMPTY;
    }

    /// filters the readiness we actually want
    pub fn filter_interest(&self) -> Ready {
        self.event & self.interest
    }
}

impl fmt::Debug for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Readiness {{ event: {:?}, interest: {:?} }}",
            self.event, self.interest
        )
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} & {} = {}", self.interest, self.event, self.filter_interest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_filter() {
        let mut readiness = Readiness::new();
        readiness.event = Ready::READABLE | Ready::WRITABLE;
        readiness.interest = Ready::WRITABLE | Ready::HUP;
        assert_eq!(readiness.filter_interest(), Ready::WRITABLE);

        readiness.reset();
        assert!(readiness.filter_interest().is_empty());
    }

    #[test]
    fn leg_peer() {
        assert_eq!(Leg::Client.peer(), Leg::Origin);
        assert_eq!(Leg::Origin.peer().peer(), Leg::Origin);
        assert_eq!(Leg::Origin.as_str(), "origin");
    }
}
