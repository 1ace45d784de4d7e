use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
    time::Instant,
};

use relay_command_lib::config::TargetAddress;
use rusty_ulid::Ulid;

use crate::{
    buffer::Buffer,
    protocol::http::{Request, Response},
    relay::{ConnState, IoControlHandle},
    Leg, RelayError,
};

/// Bytes moved through the relay buffers since the task was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteCounters {
    /// written in `client_to_origin` by the client leg
    pub client_in: u64,
    /// taken from `client_to_origin` by the origin leg
    pub origin_out: u64,
    /// written in `origin_to_client` by the origin leg
    pub origin_in: u64,
    /// taken from `origin_to_client` by the client leg
    pub client_out: u64,
}

/// State shared by the two legs of one exchange
///
/// Each `ConnState` is written by its own leg only. The one exception is
/// [`RelayTask::reset`], which starts a new exchange on a persistent client
/// connection once both legs are done with the current one.
pub struct RelayTask {
    id: Ulid,
    target: TargetAddress,
    request: Option<Request>,
    response: Option<Response>,
    client_to_origin: Buffer,
    origin_to_client: Buffer,
    client_control: Option<IoControlHandle>,
    origin_control: Option<IoControlHandle>,
    client_state: ConnState,
    origin_state: ConnState,
    response_complete: bool,
    aborted: Option<Leg>,
    counters: ByteCounters,
    exchanges: usize,
    started: Instant,
}

impl RelayTask {
    pub fn new(target: TargetAddress, buffer_size: usize) -> Self {
        RelayTask {
            id: Ulid::generate(),
            target,
            request: None,
            response: None,
            client_to_origin: Buffer::with_capacity(buffer_size),
            origin_to_client: Buffer::with_capacity(buffer_size),
            client_control: None,
            origin_control: None,
            client_state: ConnState::Idle,
            origin_state: ConnState::Idle,
            response_complete: false,
            aborted: None,
            counters: ByteCounters::default(),
            exchanges: 0,
            started: Instant::now(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn target(&self) -> &TargetAddress {
        &self.target
    }

    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    pub fn set_request(&mut self, request: Request) {
        self.request = Some(request);
    }

    pub fn take_request(&mut self) -> Option<Request> {
        self.request.take()
    }

    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub fn set_response(&mut self, response: Response) {
        self.response = Some(response);
    }

    pub fn clear_response(&mut self) {
        self.response = None;
        self.response_complete = false;
    }

    /// request body bytes, written by the client leg, read by the origin leg
    pub fn client_to_origin(&self) -> &Buffer {
        &self.client_to_origin
    }

    pub fn client_to_origin_mut(&mut self) -> &mut Buffer {
        &mut self.client_to_origin
    }

    /// response body bytes, written by the origin leg, read by the client leg
    pub fn origin_to_client(&self) -> &Buffer {
        &self.origin_to_client
    }

    pub fn origin_to_client_mut(&mut self) -> &mut Buffer {
        &mut self.origin_to_client
    }

    pub fn state(&self, leg: Leg) -> ConnState {
        match leg {
            Leg::Client => self.client_state,
            Leg::Origin => self.origin_state,
        }
    }

    pub fn client_state(&self) -> ConnState {
        self.client_state
    }

    pub fn origin_state(&self) -> ConnState {
        self.origin_state
    }

    pub(crate) fn set_state(&mut self, leg: Leg, state: ConnState) {
        let current = match leg {
            Leg::Client => &mut self.client_state,
            Leg::Origin => &mut self.origin_state,
        };
        if *current != state {
            trace!("RELAY-{}\t{}\t{} -> {}", leg, self.id, current, state);
            *current = state;
        }
    }

    /// Set once per connection, when it becomes ready
    pub fn bind_control(&mut self, leg: Leg, control: IoControlHandle) {
        match leg {
            Leg::Client => self.client_control = Some(control),
            Leg::Origin => self.origin_control = Some(control),
        }
    }

    pub fn control(&self, leg: Leg) -> Result<IoControlHandle, RelayError> {
        let control = match leg {
            Leg::Client => &self.client_control,
            Leg::Origin => &self.origin_control,
        };
        control.clone().ok_or(RelayError::Unbound(leg))
    }

    pub fn is_bound(&self, leg: Leg) -> bool {
        match leg {
            Leg::Client => self.client_control.is_some(),
            Leg::Origin => self.origin_control.is_some(),
        }
    }

    /// the origin received the whole response, body included
    pub fn response_complete(&self) -> bool {
        self.response_complete
    }

    pub fn set_response_complete(&mut self) {
        self.response_complete = true;
    }

    pub fn aborted(&self) -> Option<Leg> {
        self.aborted
    }

    /// Give up on the exchange because `leg` broke. The peer leg sees the
    /// flag on its next event, and is woken up so that event comes soon.
    pub fn abort(&mut self, leg: Leg) {
        if self.aborted.is_some() {
            return;
        }
        debug!("RELAY-{}\t{}\taborting the exchange", leg, self.id);
        self.aborted = Some(leg);
        if let Ok(peer) = self.control(leg.peer()) {
            peer.request_input();
            peer.request_output();
        }
    }

    pub fn counters(&self) -> ByteCounters {
        self.counters
    }

    pub fn counters_mut(&mut self) -> &mut ByteCounters {
        &mut self.counters
    }

    /// number of exchanges completed on this task
    pub fn exchanges(&self) -> usize {
        self.exchanges
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    /// Start a new exchange on the same connections (keep-alive)
    pub fn reset(&mut self) {
        trace!("RELAY\t{}\t============== reset", self.id);
        self.id = Ulid::generate();
        self.request = None;
        self.response = None;
        self.response_complete = false;
        self.client_to_origin.clear();
        self.origin_to_client.clear();
        self.client_state = ConnState::Idle;
        self.origin_state = ConnState::Idle;
        self.exchanges += 1;
        self.started = Instant::now();
    }

    pub fn is_finished(&self) -> bool {
        self.client_state == ConnState::Closed && self.origin_state == ConnState::Closed
    }
}

impl fmt::Debug for RelayTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayTask")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("client_state", &self.client_state)
            .field("origin_state", &self.origin_state)
            .field("client_to_origin", &self.client_to_origin)
            .field("origin_to_client", &self.origin_to_client)
            .field("response_complete", &self.response_complete)
            .field("aborted", &self.aborted)
            .finish()
    }
}

/// The task as both legs hold it. Every access goes through [`SharedTask::lock`].
#[derive(Clone)]
pub struct SharedTask(Arc<Mutex<RelayTask>>);

impl SharedTask {
    pub fn new(task: RelayTask) -> Self {
        SharedTask(Arc::new(Mutex::new(task)))
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, RelayTask>, RelayError> {
        self.0.lock().map_err(|_| RelayError::Poisoned)
    }
}

impl fmt::Debug for SharedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_lock() {
            Ok(task) => task.fmt(f),
            Err(_) => f.write_str("SharedTask(<locked>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        protocol::http::{Method, Version},
        relay::testing::MockControl,
    };

    fn target() -> TargetAddress {
        TargetAddress {
            host: "localhost".to_owned(),
            port: 9000,
        }
    }

    #[test]
    fn abort_wakes_the_peer_once() {
        let mut task = RelayTask::new(target(), 16);
        let client = MockControl::new();
        task.bind_control(Leg::Client, client.clone());

        task.abort(Leg::Origin);
        task.abort(Leg::Client);

        assert_eq!(task.aborted(), Some(Leg::Origin));
        assert_eq!(client.calls(), vec!["request_input", "request_output"]);
    }

    #[test]
    fn unbound_control() {
        let task = RelayTask::new(target(), 16);
        assert!(matches!(
            task.control(Leg::Origin),
            Err(RelayError::Unbound(Leg::Origin))
        ));
    }

    #[test]
    fn reset_starts_a_new_exchange() {
        let mut task = RelayTask::new(target(), 16);
        let id = task.id();
        task.set_request(Request::new(Method::Get, "/", Version::V11));
        task.client_to_origin_mut().extend_from_slice(b"left");
        task.set_state(Leg::Client, ConnState::ResponseBodyDone);
        task.set_state(Leg::Origin, ConnState::ResponseBodyDone);
        task.set_response_complete();
        task.counters_mut().client_in = 4;

        task.reset();

        assert_ne!(task.id(), id);
        assert!(task.request().is_none());
        assert!(task.client_to_origin().is_empty());
        assert!(!task.response_complete());
        assert_eq!(task.state(Leg::Client), ConnState::Idle);
        assert_eq!(task.state(Leg::Origin), ConnState::Idle);
        assert_eq!(task.exchanges(), 1);
        // counters cover the whole life of the task
        assert_eq!(task.counters().client_in, 4);
    }
}
