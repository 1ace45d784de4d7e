use std::{fmt, sync::Arc};

use crate::{
    protocol::http::{Request, Response},
    relay::ConnState,
    Leg, TransportError,
};

/// Arms or pauses the readiness notifications of one connection. This is
/// the only thing a leg may do to its peer's connection.
pub trait IoControl: Send + Sync {
    fn request_input(&self);
    fn suspend_input(&self);
    fn request_output(&self);
    fn suspend_output(&self);
}

pub type IoControlHandle = Arc<dyn IoControl>;

/// The connection a leg drives. Reads and writes go through the decoders
/// and encoders handed in the events, this only covers the control side.
pub trait Connection {
    fn io_control(&self) -> IoControlHandle;

    /// close once the pending output is flushed
    fn close(&mut self);

    /// abrupt close, pending output is dropped
    fn shutdown(&mut self);

    fn request_input(&self) {
        self.io_control().request_input()
    }

    fn suspend_input(&self) {
        self.io_control().suspend_input()
    }

    fn request_output(&self) {
        self.io_control().request_output()
    }

    fn suspend_output(&self) {
        self.io_control().suspend_output()
    }
}

pub trait OriginConnection: Connection {
    /// queue the request head, the body follows through `OutputReady` events
    fn submit_request(&mut self, request: &Request) -> Result<(), TransportError>;

    /// the current response has no body, the next bytes start a new response
    fn reset_input(&mut self);
}

pub trait ClientConnection: Connection {
    /// queue the response head, the body follows through `OutputReady` events
    fn submit_response(&mut self, response: &Response) -> Result<(), TransportError>;
}

/// State change produced by one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub leg: Leg,
    pub from: ConnState,
    pub to: ConnState,
}

impl Transition {
    pub fn new(leg: Leg, from: ConnState, to: ConnState) -> Self {
        Transition { leg, from, to }
    }

    pub fn unchanged(leg: Leg, state: ConnState) -> Self {
        Transition {
            leg,
            from: state,
            to: state,
        }
    }

    pub fn is_change(&self) -> bool {
        self.from != self.to
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.leg, self.from, self.to)
    }
}
