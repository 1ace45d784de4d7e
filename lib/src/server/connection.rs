//! What the legs see of a session socket
//!
//! A leg never touches the socket: it arms or pauses readiness through a
//! [`ReadinessControl`] and its [`SessionConnection`] records the head
//! submissions and close requests. The session applies the recorded
//! [`Action`]s once the leg handler returned.
use std::sync::{Arc, Mutex};

use crate::{
    protocol::http::{
        parser::{write_request_head, write_response_head},
        BodyLength, Request, Response,
    },
    relay::{ClientConnection, Connection, IoControl, IoControlHandle, OriginConnection},
    Readiness, Ready, TransportError,
};

/// Readiness of one socket, shared between the session and the legs
#[derive(Debug, Default)]
pub struct ReadinessControl {
    readiness: Mutex<Readiness>,
}

impl ReadinessControl {
    pub fn new(interest: Ready) -> Arc<ReadinessControl> {
        Arc::new(ReadinessControl {
            readiness: Mutex::new(Readiness {
                event: Ready::EMPTY,
                interest,
            }),
        })
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness
            .lock()
            .map(|readiness| *readiness)
            .unwrap_or_default()
    }

    pub fn update<F: FnOnce(&mut Readiness)>(&self, f: F) {
        if let Ok(mut readiness) = self.readiness.lock() {
            f(&mut readiness)
        }
    }

    pub fn insert_event(&self, event: Ready) {
        self.update(|readiness| readiness.event.insert(event))
    }

    pub fn remove_event(&self, event: Ready) {
        self.update(|readiness| readiness.event.remove(event))
    }
}

impl IoControl for ReadinessControl {
    fn request_input(&self) {
        self.update(|readiness| readiness.interest.insert(Ready::READABLE))
    }

    fn suspend_input(&self) {
        self.update(|readiness| readiness.interest.remove(Ready::READABLE))
    }

    fn request_output(&self) {
        self.update(|readiness| readiness.interest.insert(Ready::WRITABLE))
    }

    fn suspend_output(&self) {
        self.update(|readiness| readiness.interest.remove(Ready::WRITABLE))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// serialized message head, followed by a body framed as `body`
    Submit { head: Vec<u8>, body: BodyLength },
    ResetInput,
    Close,
    Shutdown,
}

/// The connection handed to a leg, backed by a session socket
pub struct SessionConnection {
    control: Arc<ReadinessControl>,
    /// a head must fit in the socket output buffer
    head_limit: usize,
    actions: Vec<Action>,
}

impl SessionConnection {
    pub fn new(control: Arc<ReadinessControl>, head_limit: usize) -> Self {
        SessionConnection {
            control,
            head_limit,
            actions: Vec::new(),
        }
    }

    pub fn take_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.actions)
    }

    fn submit(&mut self, head: Vec<u8>, body: BodyLength) -> Result<(), TransportError> {
        if head.len() > self.head_limit {
            return Err(TransportError::HeadTooLarge(self.head_limit));
        }
        self.actions.push(Action::Submit { head, body });
        Ok(())
    }
}

impl Connection for SessionConnection {
    fn io_control(&self) -> IoControlHandle {
        self.control.clone()
    }

    fn close(&mut self) {
        self.actions.push(Action::Close);
    }

    fn shutdown(&mut self) {
        self.actions.push(Action::Shutdown);
    }
}

impl OriginConnection for SessionConnection {
    fn submit_request(&mut self, request: &Request) -> Result<(), TransportError> {
        let mut head = Vec::new();
        write_request_head(request, &mut head);
        self.submit(head, request.body)
    }

    fn reset_input(&mut self) {
        self.actions.push(Action::ResetInput);
    }
}

impl ClientConnection for SessionConnection {
    fn submit_response(&mut self, response: &Response) -> Result<(), TransportError> {
        let mut head = Vec::new();
        write_response_head(response, &mut head);
        self.submit(head, response.body)
    }
}
