use std::fmt;

use crate::{Leg, RelayError};

/// Lifecycle of one leg of an exchange. The variants are declared in path
/// order: a leg only moves forward, except when a keep-alive exchange
/// resets the task back to `Idle`.
///
/// The origin leg never enters `RequestReceived` nor `ResponseSent`, the
/// client leg never enters `RequestSent` nor `ResponseReceived`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnState {
    Idle,
    Connected,
    RequestReceived,
    RequestSent,
    RequestBodyStream,
    RequestBodyDone,
    ResponseReceived,
    ResponseSent,
    ResponseBodyStream,
    ResponseBodyDone,
    Closing,
    Closed,
}

impl ConnState {
    pub const ALL: [ConnState; 12] = [
        ConnState::Idle,
        ConnState::Connected,
        ConnState::RequestReceived,
        ConnState::RequestSent,
        ConnState::RequestBodyStream,
        ConnState::RequestBodyDone,
        ConnState::ResponseReceived,
        ConnState::ResponseSent,
        ConnState::ResponseBodyStream,
        ConnState::ResponseBodyDone,
        ConnState::Closing,
        ConnState::Closed,
    ];

    pub fn is_one_of(self, states: &[ConnState]) -> bool {
        states.contains(&self)
    }

    /// the protocol logic fault raised when `event` is observed outside of
    /// `expected`
    pub fn expect_one_of(
        self,
        leg: Leg,
        expected: &[ConnState],
        event: &'static str,
    ) -> Result<(), RelayError> {
        if self.is_one_of(expected) {
            Ok(())
        } else {
            Err(RelayError::IllegalState {
                leg,
                state: self,
                event,
            })
        }
    }

    pub fn is_closing_or_closed(self) -> bool {
        matches!(self, ConnState::Closing | ConnState::Closed)
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnState::Idle => "IDLE",
            ConnState::Connected => "CONNECTED",
            ConnState::RequestReceived => "REQUEST_RECEIVED",
            ConnState::RequestSent => "REQUEST_SENT",
            ConnState::RequestBodyStream => "REQUEST_BODY_STREAM",
            ConnState::RequestBodyDone => "REQUEST_BODY_DONE",
            ConnState::ResponseReceived => "RESPONSE_RECEIVED",
            ConnState::ResponseSent => "RESPONSE_SENT",
            ConnState::ResponseBodyStream => "RESPONSE_BODY_STREAM",
            ConnState::ResponseBodyDone => "RESPONSE_BODY_DONE",
            ConnState::Closing => "CLOSING",
            ConnState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}
