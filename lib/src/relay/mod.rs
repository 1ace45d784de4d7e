//! The two legs of a relayed exchange and the task they share
//!
//! Every handler locks the [`SharedTask`], checks the state of its own leg,
//! moves a bounded amount of bytes between its connection and one of the
//! task buffers, updates its own state and arms or pauses the peer
//! connection through its [`IoControl`] handle. The legs never call each
//! other.

/// This macro is defined uniquely in this module to tag the logs of both
/// legs with the exchange they work on
macro_rules! log_context {
    ($leg:expr, $task:expr) => {
        format!(
            "RELAY-{}\t{}\tSession(client={}, origin={})\t >>>",
            $leg,
            $task.id(),
            $task.client_state(),
            $task.origin_state(),
        )
    };
}

pub mod client;
pub mod connection;
pub mod origin;
pub mod state;
pub mod strategy;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::relay::{
    client::{ClientEvent, ClientLeg},
    connection::{
        ClientConnection, Connection, IoControl, IoControlHandle, OriginConnection, Transition,
    },
    origin::{OriginEvent, OriginLeg},
    state::ConnState,
    strategy::{DefaultReuseStrategy, RelaySettings, ReuseStrategy},
    task::{ByteCounters, RelayTask, SharedTask},
};
