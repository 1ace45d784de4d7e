//! A client connection, its origin connection and the two legs relaying
//! between them
//!
//! The session owns the sockets and their raw buffers. Readiness events are
//! turned into leg events, and the actions the legs recorded on their
//! [`SessionConnection`] are applied to the sockets afterwards.
use std::{
    io::ErrorKind,
    sync::Arc,
    time::{Duration, Instant},
};

use mio::{net::TcpStream, Registry, Token};
use relay_command_lib::config::{Config, MAX_LOOP_ITERATIONS};

use crate::{
    buffer::Buffer,
    protocol::http::{
        codec::{BodyDecoder, BodyEncoder, BodyReader, BodyWriter},
        parser::{parse_request, parse_response},
    },
    relay::{
        ByteCounters, ClientEvent, ClientLeg, ConnState, IoControl, OriginEvent, OriginLeg,
        RelaySettings, RelayTask, SharedTask, Transition,
    },
    server::connection::{Action, ReadinessControl, SessionConnection},
    socket::{SocketHandler, SocketResult},
    Leg, Readiness, Ready, RelayError, TransportError,
};

/// This macro is defined uniquely in this module to help the tracking of
/// sessions in the logs
macro_rules! log_context {
    ($self:expr) => {
        format!(
            "RELAY\tSession(frontend={}, backend={})\t >>>",
            $self.frontend.token.0, $self.backend.token.0
        )
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionResult {
    Continue,
    Close,
}

/// One socket of the session
pub struct Endpoint {
    leg: Leg,
    socket: TcpStream,
    token: Token,
    control: Arc<ReadinessControl>,
    /// raw bytes read from the socket: message heads and framed body
    input: Buffer,
    /// raw bytes waiting to be written to the socket
    output: Buffer,
    decoder: Option<BodyDecoder>,
    encoder: Option<BodyEncoder>,
    /// close once the output is flushed
    closing: bool,
    closed: bool,
    last_activity: Instant,
}

impl Endpoint {
    fn new(leg: Leg, socket: TcpStream, token: Token, interest: Ready, buffer_size: usize) -> Self {
        Endpoint {
            leg,
            socket,
            token,
            control: ReadinessControl::new(interest),
            input: Buffer::with_capacity(buffer_size),
            output: Buffer::with_capacity(buffer_size),
            decoder: None,
            encoder: None,
            closing: false,
            closed: false,
            last_activity: Instant::now(),
        }
    }

    fn readiness(&self) -> Readiness {
        self.control.readiness()
    }

    fn has_pending_output(&self) -> bool {
        !self.output.is_empty()
            || self
                .encoder
                .as_ref()
                .map(BodyEncoder::has_pending)
                .unwrap_or(false)
    }

    fn fill_input(&mut self) -> SocketResult {
        let (size, result) = self.socket.socket_read(self.input.space());
        self.input.fill(size);
        if result == SocketResult::WouldBlock {
            self.control.remove_event(Ready::READABLE);
        }
        result
    }

    /// push the raw output to the socket
    fn flush(&mut self) -> Result<(), TransportError> {
        loop {
            if let Some(encoder) = self.encoder.as_mut() {
                encoder.write_pending(&mut self.output);
            }
            if self.output.is_empty() {
                return Ok(());
            }

            let (size, result) = self.socket.socket_write(self.output.used());
            self.output.consume(size);
            match result {
                SocketResult::Continue if size > 0 => {}
                SocketResult::Continue => return Ok(()),
                SocketResult::WouldBlock => {
                    self.control.remove_event(Ready::WRITABLE);
                    return Ok(());
                }
                SocketResult::Closed | SocketResult::Error => return Err(TransportError::Socket),
            }
        }
    }

    /// apply what the leg recorded, returns true if the socket was closed
    fn apply(&mut self, actions: Vec<Action>) -> bool {
        let was_closed = self.closed;
        for action in actions {
            match action {
                Action::Submit { head, body } => {
                    self.output.extend_from_slice(&head);
                    // the client leg always finishes the response through its encoder
                    self.encoder = if self.leg == Leg::Client || !body.is_none() {
                        Some(BodyEncoder::new(body))
                    } else {
                        None
                    };
                    self.control.request_output();
                }
                Action::ResetInput => self.decoder = None,
                Action::Close => {
                    self.closing = true;
                    self.control.suspend_input();
                    self.control.request_output();
                }
                Action::Shutdown => {
                    self.output.clear();
                    self.close_socket();
                }
            }
        }
        if self.closing && !self.closed && !self.has_pending_output() {
            self.close_socket();
        }
        !was_closed && self.closed
    }

    fn close_socket(&mut self) {
        if self.closed {
            return;
        }
        self.socket.socket_close();
        self.closed = true;
        self.closing = false;
        self.control.update(Readiness::reset);
    }

    /// drop the body state of the exchange that just ended
    fn end_exchange(&mut self) {
        self.decoder = None;
        if !self.has_pending_output() {
            self.encoder = None;
        }
    }

    fn progress(&self) -> EndpointProgress {
        EndpointProgress {
            readiness: self.readiness(),
            input: self.input.available_data(),
            output: self.output.available_data(),
            decoding: self.decoder.is_some(),
            encoding: self.encoder.is_some(),
            closing: self.closing,
            closed: self.closed,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct EndpointProgress {
    readiness: Readiness,
    input: usize,
    output: usize,
    decoding: bool,
    encoding: bool,
    closing: bool,
    closed: bool,
}

/// everything a pass of the readiness loop can change
#[derive(Debug, PartialEq, Eq)]
struct Progress {
    counters: ByteCounters,
    client: ConnState,
    origin: ConnState,
    exchanges: usize,
    aborted: Option<Leg>,
    frontend: EndpointProgress,
    backend: EndpointProgress,
}

pub struct Session {
    task: SharedTask,
    client: ClientLeg<SessionConnection>,
    origin: OriginLeg<SessionConnection>,
    frontend: Endpoint,
    backend: Endpoint,
    backend_connected: bool,
    /// exchanges completed on the task when the session last looked
    exchanges: usize,
    idle_timeout: Duration,
    connect_timeout: Duration,
    created: Instant,
}

impl Session {
    pub fn new(
        frontend_socket: TcpStream,
        frontend_token: Token,
        backend_socket: TcpStream,
        backend_token: Token,
        settings: Arc<RelaySettings>,
        config: &Config,
    ) -> Session {
        let buffer_size = config.buffer_size;
        let task = SharedTask::new(RelayTask::new(config.target.clone(), buffer_size));

        let frontend = Endpoint::new(
            Leg::Client,
            frontend_socket,
            frontend_token,
            Ready::READABLE | Ready::HUP | Ready::ERROR,
            buffer_size,
        );
        let backend = Endpoint::new(
            Leg::Origin,
            backend_socket,
            backend_token,
            Ready::READABLE | Ready::ERROR,
            buffer_size,
        );

        let client = ClientLeg::new(
            SessionConnection::new(frontend.control.clone(), buffer_size),
            settings.clone(),
        );
        let origin = OriginLeg::new(
            SessionConnection::new(backend.control.clone(), buffer_size),
            settings,
        );

        Session {
            task,
            client,
            origin,
            frontend,
            backend,
            backend_connected: false,
            exchanges: 0,
            idle_timeout: config.idle_timeout,
            connect_timeout: config.connect_timeout,
            created: Instant::now(),
        }
    }

    pub fn frontend_token(&self) -> Token {
        self.frontend.token
    }

    pub fn backend_token(&self) -> Token {
        self.backend.token
    }

    pub fn task(&self) -> &SharedTask {
        &self.task
    }

    /// attach the client leg to the task
    pub fn start(&mut self) -> SessionResult {
        match self.client_event(ClientEvent::Connected(self.task.clone())) {
            Ok(()) => SessionResult::Continue,
            Err(error) => self.relay_fault(error),
        }
    }

    pub fn update_readiness(&mut self, token: Token, events: Ready) {
        let endpoint = if token == self.frontend.token {
            &mut self.frontend
        } else if token == self.backend.token {
            &mut self.backend
        } else {
            return;
        };
        if endpoint.closed {
            return;
        }
        endpoint.control.insert_event(events);
        endpoint.last_activity = Instant::now();
    }

    pub fn ready(&mut self) -> SessionResult {
        if !self.backend_connected && !self.backend.closed {
            if let Err(error) = self.check_connection() {
                return self.relay_fault(error);
            }
        }
        if let Err(error) = self.housekeeping() {
            return self.relay_fault(error);
        }

        let mut counter = 0;
        while counter < MAX_LOOP_ITERATIONS {
            let frontend_interest = self.frontend.readiness().filter_interest();
            let backend_interest = if self.backend_connected {
                self.backend.readiness().filter_interest()
            } else {
                Ready::EMPTY
            };

            trace!(
                "{} frontend interest({:?}) and backend interest({:?})",
                log_context!(self),
                frontend_interest,
                backend_interest,
            );

            if frontend_interest.is_empty() && backend_interest.is_empty() {
                break;
            }

            let before = self.progress();
            if let Err(error) = self.ready_pass(frontend_interest, backend_interest) {
                return self.relay_fault(error);
            }
            if self.is_finished() {
                return SessionResult::Close;
            }
            if self.progress() == before {
                break;
            }

            // the exchange moved, none of its connections is idle
            let now = Instant::now();
            self.frontend.last_activity = now;
            self.backend.last_activity = now;
            counter += 1;
        }

        if counter >= MAX_LOOP_ITERATIONS {
            error!(
                "{}\tHandling session went through {} iterations, there's a probable infinite loop bug, closing the connection",
                log_context!(self),
                MAX_LOOP_ITERATIONS
            );
            incr!("infinite_loop.error");
            self.close();
            return SessionResult::Close;
        }

        if self.is_finished() {
            SessionResult::Close
        } else {
            SessionResult::Continue
        }
    }

    pub fn timeout(&mut self, now: Instant) -> SessionResult {
        match self
            .check_timeouts(now)
            .and_then(|()| self.housekeeping())
        {
            Ok(()) if self.is_finished() => SessionResult::Close,
            Ok(()) => SessionResult::Continue,
            Err(error) => self.relay_fault(error),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.frontend.closed && self.backend.closed
    }

    /// shut both connections down
    pub fn close(&mut self) {
        if !self.frontend.closed {
            self.frontend.close_socket();
            if let Ok(transition) = self.client.handle(ClientEvent::Closed) {
                trace!("{} {}", log_context!(self), transition);
            }
        }
        if !self.backend.closed {
            self.backend.close_socket();
            if let Ok(transition) = self.origin.handle(OriginEvent::Closed) {
                trace!("{} {}", log_context!(self), transition);
            }
        }
    }

    pub fn deregister(&mut self, registry: &Registry) {
        for endpoint in [&mut self.frontend, &mut self.backend] {
            if let Err(error) = registry.deregister(&mut endpoint.socket) {
                debug!("could not deregister {:?}: {}", endpoint.token, error);
            }
        }
    }

    fn ready_pass(&mut self, frontend: Ready, backend: Ready) -> Result<(), RelayError> {
        if frontend.is_readable() {
            self.client_readable()?;
        }
        if backend.is_writable() {
            self.origin_writable()?;
        }
        if backend.is_readable() {
            self.origin_readable()?;
        }
        if frontend.is_writable() {
            self.client_writable()?;
        }

        if frontend.is_error() && !self.frontend.closed {
            error!("{} frontend socket error, disconnecting", log_context!(self));
            self.frontend.control.remove_event(Ready::ERROR);
            self.client_event(ClientEvent::Exception(TransportError::Socket))?;
        }
        if backend.is_error() && !self.backend.closed {
            error!("{} backend socket error, disconnecting", log_context!(self));
            self.backend.control.remove_event(Ready::ERROR);
            self.origin_event(OriginEvent::Exception(TransportError::Socket))?;
        }
        if frontend.is_hup() && !self.frontend.closed {
            self.frontend.control.remove_event(Ready::HUP);
            self.client_hung_up()?;
        }

        self.housekeeping()
    }

    /// The client went away while the relay was not reading from it. Between
    /// exchanges, and while a request body streams, the read path sees the
    /// end of stream itself.
    fn client_hung_up(&mut self) -> Result<(), RelayError> {
        if self.frontend.closing || self.frontend.decoder.is_some() {
            return Ok(());
        }
        let state = self.task.lock()?.client_state();
        if state.is_one_of(&[ConnState::Idle, ConnState::Connected]) {
            return Ok(());
        }
        debug!(
            "{} client disconnected abruptly in state {:?}",
            log_context!(self),
            state
        );
        self.frontend.close_socket();
        self.client_event(ClientEvent::Closed)
    }

    fn client_readable(&mut self) -> Result<(), RelayError> {
        if self.frontend.closed || self.frontend.closing {
            return Ok(());
        }
        if self.frontend.decoder.is_some() {
            return self.client_input();
        }

        let state = self.task.lock()?.client_state();
        if !state.is_one_of(&[ConnState::Idle, ConnState::Connected]) {
            // one exchange at a time, the next request stays in the socket
            return Ok(());
        }

        let result = self.frontend.fill_input();
        if result == SocketResult::Error {
            return self.client_event(ClientEvent::Exception(TransportError::Socket));
        }

        match parse_request(self.frontend.input.used()) {
            Ok(Some((request, length))) => {
                self.frontend.input.consume(length);
                if request.has_body() {
                    self.frontend.decoder = Some(BodyDecoder::new(request.body));
                }
                self.client_event(ClientEvent::RequestReceived(request))?;
                // body bytes may already be in the input buffer
                self.client_input()
            }
            Ok(None) if result == SocketResult::Closed => {
                if self.frontend.input.is_empty() {
                    debug!("{} client closed the connection", log_context!(self));
                    self.frontend.close_socket();
                    self.client_event(ClientEvent::Closed)
                } else {
                    self.client_event(ClientEvent::Exception(TransportError::UnexpectedEof))
                }
            }
            Ok(None) if self.frontend.input.is_full() => {
                let capacity = self.frontend.input.capacity();
                self.client_event(ClientEvent::Exception(TransportError::HeadTooLarge(
                    capacity,
                )))
            }
            Ok(None) => Ok(()),
            Err(error) => self.client_event(ClientEvent::Exception(error.into())),
        }
    }

    fn client_input(&mut self) -> Result<(), RelayError> {
        let state = self.task.lock()?.client_state();
        if !state.is_one_of(&[ConnState::RequestReceived, ConnState::RequestBodyStream]) {
            return Ok(());
        }

        let Session {
            client, frontend, ..
        } = self;
        let decoder = match frontend.decoder.as_mut() {
            Some(decoder) => decoder,
            None => return Ok(()),
        };
        let mut reader = BodyReader::new(&mut frontend.socket, &mut frontend.input, decoder);
        let transition = client.handle(ClientEvent::InputReady(&mut reader));
        if reader.socket_result() == Some(SocketResult::WouldBlock) {
            frontend.control.remove_event(Ready::READABLE);
        }
        if frontend
            .decoder
            .as_ref()
            .map(BodyDecoder::is_done)
            .unwrap_or(false)
        {
            frontend.decoder = None;
        }
        self.after_client(transition?)
    }

    fn client_writable(&mut self) -> Result<(), RelayError> {
        if self.frontend.closed {
            return Ok(());
        }
        if let Err(error) = self.frontend.flush() {
            return self.client_event(ClientEvent::Exception(error));
        }
        if self.frontend.closing {
            if !self.frontend.has_pending_output() {
                self.frontend.close_socket();
                return self.client_event(ClientEvent::Closed);
            }
            return Ok(());
        }

        let (state, has_response) = {
            let task = self.task.lock()?;
            (task.client_state(), task.response().is_some())
        };
        match state {
            ConnState::ResponseSent | ConnState::ResponseBodyStream => self.client_output(),
            state if has_response && state < ConnState::ResponseSent => {
                if self.frontend.has_pending_output() {
                    // the end of the previous response goes first
                    return Ok(());
                }
                self.client_event(ClientEvent::ResponseReady)
            }
            _ => {
                if !self.frontend.has_pending_output() {
                    self.frontend.control.suspend_output();
                }
                Ok(())
            }
        }
    }

    fn client_output(&mut self) -> Result<(), RelayError> {
        let Session {
            client, frontend, ..
        } = self;
        let encoder = match frontend.encoder.as_mut() {
            Some(encoder) => encoder,
            None => return Ok(()),
        };
        let mut writer = BodyWriter::new(&mut frontend.socket, &mut frontend.output, encoder);
        let transition = client.handle(ClientEvent::OutputReady(&mut writer));
        if writer.socket_result() == Some(SocketResult::WouldBlock) {
            frontend.control.remove_event(Ready::WRITABLE);
        }
        self.after_client(transition?)
    }

    fn origin_writable(&mut self) -> Result<(), RelayError> {
        if self.backend.closed {
            return Ok(());
        }
        if let Err(error) = self.backend.flush() {
            return self.origin_event(OriginEvent::Exception(error));
        }
        if self.backend.closing {
            if !self.backend.has_pending_output() {
                self.backend.close_socket();
                return self.origin_event(OriginEvent::Closed);
            }
            return Ok(());
        }

        let (state, has_request) = {
            let task = self.task.lock()?;
            (task.origin_state(), task.request().is_some())
        };
        match state {
            ConnState::Idle | ConnState::Connected if has_request => {
                if self.backend.has_pending_output() {
                    return Ok(());
                }
                self.origin_event(OriginEvent::RequestReady)
            }
            ConnState::RequestSent | ConnState::RequestBodyStream
                if self.backend.encoder.is_some() =>
            {
                self.origin_output()
            }
            _ => {
                if !self.backend.has_pending_output() {
                    self.backend.control.suspend_output();
                }
                Ok(())
            }
        }
    }

    fn origin_output(&mut self) -> Result<(), RelayError> {
        let Session {
            origin, backend, ..
        } = self;
        let encoder = match backend.encoder.as_mut() {
            Some(encoder) => encoder,
            None => return Ok(()),
        };
        let mut writer = BodyWriter::new(&mut backend.socket, &mut backend.output, encoder);
        let transition = origin.handle(OriginEvent::OutputReady(&mut writer));
        if writer.socket_result() == Some(SocketResult::WouldBlock) {
            backend.control.remove_event(Ready::WRITABLE);
        }
        self.after_origin(transition?)
    }

    fn origin_readable(&mut self) -> Result<(), RelayError> {
        if self.backend.closed || self.backend.closing {
            return Ok(());
        }
        if self.backend.decoder.is_some() {
            return self.origin_input();
        }

        let state = self.task.lock()?.origin_state();
        if state == ConnState::RequestBodyStream {
            // the response head is read once the request body is sent
            return Ok(());
        }

        let result = self.backend.fill_input();
        if result == SocketResult::Error {
            return self.origin_event(OriginEvent::Exception(TransportError::Socket));
        }

        while !self.backend.closed {
            match parse_response(self.backend.input.used()) {
                Ok(Some((response, length))) => {
                    self.backend.input.consume(length);
                    if response.is_informational() {
                        self.origin_event(OriginEvent::ResponseReceived(response))?;
                        continue;
                    }
                    self.backend.decoder = Some(BodyDecoder::new(response.body));
                    self.origin_event(OriginEvent::ResponseReceived(response))?;
                    // body bytes may already be in the input buffer
                    return self.origin_input();
                }
                Ok(None) if result == SocketResult::Closed => {
                    if self.backend.input.is_empty() {
                        debug!("{} origin closed the connection", log_context!(self));
                        self.backend.close_socket();
                        return self.origin_event(OriginEvent::Closed);
                    }
                    return self
                        .origin_event(OriginEvent::Exception(TransportError::UnexpectedEof));
                }
                Ok(None) if self.backend.input.is_full() => {
                    let capacity = self.backend.input.capacity();
                    return self.origin_event(OriginEvent::Exception(
                        TransportError::HeadTooLarge(capacity),
                    ));
                }
                Ok(None) => return Ok(()),
                Err(error) => return self.origin_event(OriginEvent::Exception(error.into())),
            }
        }
        Ok(())
    }

    fn origin_input(&mut self) -> Result<(), RelayError> {
        let state = self.task.lock()?.origin_state();
        if !state.is_one_of(&[ConnState::ResponseReceived, ConnState::ResponseBodyStream]) {
            return Ok(());
        }

        let Session {
            origin, backend, ..
        } = self;
        let decoder = match backend.decoder.as_mut() {
            Some(decoder) => decoder,
            None => return Ok(()),
        };
        let mut reader = BodyReader::new(&mut backend.socket, &mut backend.input, decoder);
        let transition = origin.handle(OriginEvent::InputReady(&mut reader));
        if reader.socket_result() == Some(SocketResult::WouldBlock) {
            backend.control.remove_event(Ready::READABLE);
        }
        if backend
            .decoder
            .as_ref()
            .map(BodyDecoder::is_done)
            .unwrap_or(false)
        {
            // the next bytes start a new response
            backend.decoder = None;
        }
        self.after_origin(transition?)
    }

    fn check_connection(&mut self) -> Result<(), RelayError> {
        let event = self.backend.readiness().event;
        if event.is_empty() {
            return Ok(());
        }

        let failure = match self.backend.socket.take_error() {
            Ok(Some(error)) | Err(error) => Some(error.to_string()),
            Ok(None) if event.is_error() => Some("socket error".to_owned()),
            Ok(None) => match self.backend.socket.peer_addr() {
                Ok(_) => None,
                // still connecting
                Err(error) if error.kind() == ErrorKind::NotConnected => return Ok(()),
                Err(error) => Some(error.to_string()),
            },
        };

        match failure {
            None => {
                debug!("{} connected to the origin", log_context!(self));
                self.backend_connected = true;
                self.origin_event(OriginEvent::Connected(self.task.clone()))
            }
            Some(reason) => self.connect_failed(reason),
        }
    }

    fn connect_failed(&mut self, reason: String) -> Result<(), RelayError> {
        error!(
            "{} could not connect to the origin: {}",
            log_context!(self),
            TransportError::Connect(reason)
        );
        incr!("faults", Leg::Origin.as_str());
        self.backend.close_socket();
        self.task.lock()?.abort(Leg::Origin);
        Ok(())
    }

    fn check_timeouts(&mut self, now: Instant) -> Result<(), RelayError> {
        if !self.backend_connected && !self.backend.closed {
            if now.duration_since(self.created) >= self.connect_timeout {
                return self.connect_failed("connect timeout".to_owned());
            }
        } else if !self.backend.closed
            && now.duration_since(self.backend.last_activity) >= self.idle_timeout
        {
            self.origin_event(OriginEvent::Timeout)?;
        }

        if !self.frontend.closed
            && now.duration_since(self.frontend.last_activity) >= self.idle_timeout
        {
            self.client_event(ClientEvent::Timeout)?;
        }
        Ok(())
    }

    /// follow the task after the legs handled their events: a finished
    /// exchange drops its body state, an aborted one takes the remaining
    /// connections down
    fn housekeeping(&mut self) -> Result<(), RelayError> {
        let (exchanges, aborted) = {
            let task = self.task.lock()?;
            (task.exchanges(), task.aborted())
        };

        if exchanges != self.exchanges {
            self.exchanges = exchanges;
            incr!("exchanges");
            self.frontend.end_exchange();
            self.backend.end_exchange();
            if !self.frontend.input.is_empty() {
                self.frontend.control.insert_event(Ready::READABLE);
            }
        }

        if aborted.is_some() {
            // any event shows the abort to a leg, which then shuts its connection down
            if !self.frontend.closed {
                self.client_event(ClientEvent::ResponseReady)?;
            }
            if !self.backend.closed {
                if self.backend_connected {
                    self.origin_event(OriginEvent::RequestReady)?;
                } else {
                    self.backend.close_socket();
                }
            }
        }
        Ok(())
    }

    fn client_event(&mut self, event: ClientEvent) -> Result<(), RelayError> {
        let transition = self.client.handle(event)?;
        self.after_client(transition)
    }

    fn origin_event(&mut self, event: OriginEvent) -> Result<(), RelayError> {
        let transition = self.origin.handle(event)?;
        self.after_origin(transition)
    }

    fn after_client(&mut self, transition: Transition) -> Result<(), RelayError> {
        if transition.is_change() {
            trace!("{} {}", log_context!(self), transition);
        }
        let actions = self.client.connection_mut().take_actions();
        if self.frontend.apply(actions) {
            self.client.handle(ClientEvent::Closed)?;
        }
        Ok(())
    }

    fn after_origin(&mut self, transition: Transition) -> Result<(), RelayError> {
        if transition.is_change() {
            trace!("{} {}", log_context!(self), transition);
        }
        let actions = self.origin.connection_mut().take_actions();
        if self.backend.apply(actions) {
            self.origin.handle(OriginEvent::Closed)?;
        }
        Ok(())
    }

    fn relay_fault(&mut self, error: RelayError) -> SessionResult {
        error!("{} relay fault, closing the session: {}", log_context!(self), error);
        incr!("relay_errors");
        let leg = match error {
            RelayError::IllegalState { leg, .. }
            | RelayError::Unbound(leg)
            | RelayError::Detached(leg) => leg,
            _ => Leg::Client,
        };
        if let Ok(mut task) = self.task.lock() {
            task.abort(leg);
        }
        self.close();
        SessionResult::Close
    }

    fn progress(&self) -> Option<Progress> {
        let task = self.task.lock().ok()?;
        Some(Progress {
            counters: task.counters(),
            client: task.client_state(),
            origin: task.origin_state(),
            exchanges: task.exchanges(),
            aborted: task.aborted(),
            frontend: self.frontend.progress(),
            backend: self.backend.progress(),
        })
    }
}
