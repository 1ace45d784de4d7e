//! Client facing leg
//!
//! Streams the request body into the `client_to_origin` buffer, then
//! forwards the sanitized response head and drains `origin_to_client` back
//! to the client. It follows the same suspend and resume contract as the
//! origin leg, through the origin I/O control.
use std::{fmt, sync::Arc};

use crate::{
    protocol::http::{
        codec::{ContentDecoder, ContentEncoder},
        editor::{remove_hop_by_hop_headers, ExchangeContext},
        Request,
    },
    relay::{ClientConnection, ConnState, RelaySettings, RelayTask, SharedTask, Transition},
    Leg, RelayError, TransportError,
};

const LEG: Leg = Leg::Client;

/// Readiness and lifecycle events of the client connection
pub enum ClientEvent<'a> {
    /// the client connection was accepted
    Connected(SharedTask),
    /// a request head was parsed
    RequestReceived(Request),
    /// request body bytes can be read
    InputReady(&'a mut dyn ContentDecoder),
    /// the connection can take a response head
    ResponseReady,
    /// the connection can take response body bytes
    OutputReady(&'a mut dyn ContentEncoder),
    Closed,
    Exception(TransportError),
    Timeout,
}

impl ClientEvent<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Connected(_) => "connected",
            ClientEvent::RequestReceived(_) => "request received",
            ClientEvent::InputReady(_) => "input ready",
            ClientEvent::ResponseReady => "response ready",
            ClientEvent::OutputReady(_) => "output ready",
            ClientEvent::Closed => "closed",
            ClientEvent::Exception(_) => "exception",
            ClientEvent::Timeout => "timeout",
        }
    }
}

impl fmt::Debug for ClientEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientEvent({})", self.name())
    }
}

pub struct ClientLeg<C: ClientConnection> {
    connection: C,
    task: Option<SharedTask>,
    settings: Arc<RelaySettings>,
    /// the response head told the client the connection persists
    keep_alive: bool,
    shut_down: bool,
}

impl<C: ClientConnection> ClientLeg<C> {
    pub fn new(connection: C, settings: Arc<RelaySettings>) -> Self {
        ClientLeg {
            connection,
            task: None,
            settings,
            keep_alive: false,
            shut_down: false,
        }
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    pub fn task(&self) -> Option<&SharedTask> {
        self.task.as_ref()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn handle(&mut self, event: ClientEvent) -> Result<Transition, RelayError> {
        if let ClientEvent::Connected(task) = event {
            return self.connected(task);
        }
        if let ClientEvent::Closed = event {
            return Ok(self.closed());
        }

        let shared = self.task.clone().ok_or(RelayError::Detached(LEG))?;
        let mut task = shared.lock()?;

        let state = task.client_state();
        if self.shut_down {
            return Ok(Transition::unchanged(LEG, state));
        }
        if let Some(leg) = task.aborted() {
            debug!(
                "{} exchange aborted by the {} leg, dropping {:?}",
                log_context!(LEG, task),
                leg,
                event
            );
            self.shutdown(&task);
            return Ok(Transition::unchanged(LEG, state));
        }

        match event {
            ClientEvent::RequestReceived(request) => self.request_received(&mut task, request),
            ClientEvent::InputReady(decoder) => self.input_ready(&mut task, decoder),
            ClientEvent::ResponseReady => self.response_ready(&mut task),
            ClientEvent::OutputReady(encoder) => self.output_ready(&mut task, encoder),
            ClientEvent::Exception(error) => Ok(self.fault(&mut task, error)),
            ClientEvent::Timeout => Ok(self.fault(&mut task, TransportError::Timeout)),
            ClientEvent::Connected(_) | ClientEvent::Closed => Ok(Transition::unchanged(LEG, state)),
        }
    }

    fn connected(&mut self, shared: SharedTask) -> Result<Transition, RelayError> {
        let mut task = shared.lock()?;
        let from = task.client_state();
        from.expect_one_of(LEG, &[ConnState::Idle], "connected")?;
        debug!("{} client connection open", log_context!(LEG, task));

        task.bind_control(LEG, self.connection.io_control());
        task.set_state(LEG, ConnState::Connected);

        drop(task);
        self.task = Some(shared);
        Ok(Transition::new(LEG, from, ConnState::Connected))
    }

    fn request_received(
        &mut self,
        task: &mut RelayTask,
        request: Request,
    ) -> Result<Transition, RelayError> {
        let from = task.client_state();
        from.expect_one_of(
            LEG,
            &[ConnState::Idle, ConnState::Connected],
            "request received",
        )?;

        debug!("{} << {}", log_context!(LEG, task), request.request_line());
        incr!("requests");
        let has_body = request.has_body();
        task.set_request(request);
        task.clear_response();
        self.keep_alive = false;

        let to = if has_body {
            task.set_state(LEG, ConnState::RequestReceived);
            ConnState::RequestReceived
        } else {
            task.set_state(LEG, ConnState::RequestBodyDone);
            // one exchange at a time, the next request waits for the reset
            self.connection.suspend_input();
            ConnState::RequestBodyDone
        };

        // if the origin is not connected yet, it arms itself on connection
        if let Ok(origin) = task.control(Leg::Origin) {
            origin.request_output();
        }
        Ok(Transition::new(LEG, from, to))
    }

    fn input_ready(
        &mut self,
        task: &mut RelayTask,
        decoder: &mut dyn ContentDecoder,
    ) -> Result<Transition, RelayError> {
        let from = task.client_state();
        from.expect_one_of(
            LEG,
            &[ConnState::RequestReceived, ConnState::RequestBodyStream],
            "input ready",
        )?;

        let buffer = task.client_to_origin_mut();
        let read = match decoder.read(buffer) {
            Ok(read) => read,
            Err(error) => return Ok(self.fault(task, error)),
        };
        let full = buffer.is_full();
        let has_data = !buffer.is_empty();
        task.counters_mut().client_in += read as u64;
        if read > 0 {
            trace!("{} {} bytes read", log_context!(LEG, task), read);
        }

        if full {
            // wait for the origin leg to drain the buffer
            self.connection.suspend_input();
        }

        let completed = decoder.is_completed();
        if has_data || completed {
            if let Ok(origin) = task.control(Leg::Origin) {
                origin.request_output();
            }
        }

        if completed {
            debug!("{} request body received", log_context!(LEG, task));
            task.set_state(LEG, ConnState::RequestBodyDone);
            self.connection.suspend_input();
            // a response that arrived early can go now
            if task.response().is_some() {
                self.connection.request_output();
            }
            Ok(Transition::new(LEG, from, ConnState::RequestBodyDone))
        } else {
            task.set_state(LEG, ConnState::RequestBodyStream);
            Ok(Transition::new(LEG, from, ConnState::RequestBodyStream))
        }
    }

    fn response_ready(&mut self, task: &mut RelayTask) -> Result<Transition, RelayError> {
        let from = task.client_state();
        if task.response().is_none() {
            return Ok(Transition::unchanged(LEG, from));
        }
        if from >= ConnState::ResponseSent {
            // already forwarded
            return Ok(Transition::unchanged(LEG, from));
        }
        let request_streaming = from == ConnState::RequestBodyStream
            || (from == ConnState::RequestReceived
                && task.request().map(Request::has_body).unwrap_or(false));
        if request_streaming {
            self.connection.suspend_output();
            return Ok(Transition::unchanged(LEG, from));
        }
        from.expect_one_of(
            LEG,
            &[ConnState::RequestReceived, ConnState::RequestBodyDone],
            "response ready",
        )?;

        let request = task.request().ok_or(RelayError::MissingRequest)?;
        let stored = task.response().ok_or(RelayError::MissingResponse)?;
        let context = ExchangeContext {
            id: task.id(),
            target: task.target(),
            request: Some(request),
        };

        let mut response = stored.clone();
        remove_hop_by_hop_headers(&mut response.headers);
        response.keep_alive =
            request.keep_alive && self.settings.reuse_strategy.keep_alive(stored, &context);

        let submitted = self
            .settings
            .response_processor
            .process_response(&mut response, &context)
            .and_then(|()| self.connection.submit_response(&response));
        if let Err(error) = submitted {
            return Ok(self.fault(task, error));
        }

        debug!("{} >> {}", log_context!(LEG, task), response.status_line());
        self.keep_alive = response.keep_alive;

        if response.body.is_none() && task.response_complete() {
            task.set_state(LEG, ConnState::ResponseBodyDone);
            return Ok(self.finish(task, from));
        }
        task.set_state(LEG, ConnState::ResponseSent);
        self.connection.request_output();
        Ok(Transition::new(LEG, from, ConnState::ResponseSent))
    }

    fn output_ready(
        &mut self,
        task: &mut RelayTask,
        encoder: &mut dyn ContentEncoder,
    ) -> Result<Transition, RelayError> {
        let from = task.client_state();
        from.expect_one_of(
            LEG,
            &[ConnState::ResponseSent, ConnState::ResponseBodyStream],
            "output ready",
        )?;

        let buffer = task.origin_to_client_mut();
        let written = match encoder.write(buffer.used()) {
            Ok(written) => written,
            Err(error) => return Ok(self.fault(task, error)),
        };
        buffer.consume(written);
        let empty = buffer.is_empty();
        task.counters_mut().client_out += written as u64;
        if written > 0 {
            trace!("{} {} bytes written", log_context!(LEG, task), written);
            if !task.response_complete() {
                // there is room again in the buffer, the origin can read more
                if let Ok(origin) = task.control(Leg::Origin) {
                    origin.request_input();
                }
            }
        }

        if empty {
            if task.response_complete() {
                if let Err(error) = encoder.complete() {
                    return Ok(self.fault(task, error));
                }
            } else {
                // wait for the origin leg to refill the buffer
                self.connection.suspend_output();
            }
        }

        if encoder.is_completed() {
            debug!("{} response body sent", log_context!(LEG, task));
            task.set_state(LEG, ConnState::ResponseBodyDone);
            Ok(self.finish(task, from))
        } else {
            task.set_state(LEG, ConnState::ResponseBodyStream);
            Ok(Transition::new(LEG, from, ConnState::ResponseBodyStream))
        }
    }

    /// the response was fully forwarded: wait for the next request on the
    /// same connection, or close it
    fn finish(&mut self, task: &mut RelayTask, from: ConnState) -> Transition {
        let origin_reusable = task.response_complete()
            && !task.origin_state().is_closing_or_closed()
            && task.aborted().is_none();

        if self.keep_alive && origin_reusable {
            debug!("{} keep-alive, waiting for the next request", log_context!(LEG, task));
            task.reset();
            self.keep_alive = false;
            self.connection.suspend_output();
            self.connection.request_input();
            Transition::new(LEG, from, ConnState::Idle)
        } else {
            debug!("{} close connection", log_context!(LEG, task));
            task.set_state(LEG, ConnState::Closing);
            self.connection.close();
            Transition::new(LEG, from, ConnState::Closing)
        }
    }

    fn closed(&mut self) -> Transition {
        let shared = match &self.task {
            Some(shared) => shared,
            None => return Transition::unchanged(LEG, ConnState::Closed),
        };
        match shared.lock() {
            Ok(mut task) => {
                let from = task.client_state();
                debug!("{} connection closed", log_context!(LEG, task));
                task.set_state(LEG, ConnState::Closed);
                if !task.origin_state().is_closing_or_closed() {
                    // nobody is left to read what the origin sends
                    task.abort(LEG);
                }
                Transition::new(LEG, from, ConnState::Closed)
            }
            Err(_) => Transition::unchanged(LEG, ConnState::Closed),
        }
    }

    fn fault(&mut self, task: &mut RelayTask, error: TransportError) -> Transition {
        let state = task.client_state();
        match error {
            TransportError::Timeout => debug!("{} timeout", log_context!(LEG, task)),
            ref error => error!("{} transport error: {}", log_context!(LEG, task), error),
        }
        incr!("faults", LEG.as_str());
        self.shutdown(task);
        task.abort(LEG);
        Transition::unchanged(LEG, state)
    }

    fn shutdown(&mut self, task: &RelayTask) {
        if self.shut_down {
            return;
        }
        debug!("{} shutting down the connection", log_context!(LEG, task));
        self.shut_down = true;
        incr!("shutdowns", LEG.as_str());
        self.connection.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Barrier, thread};

    use quickcheck::{quickcheck, TestResult};
    use relay_command_lib::config::TargetAddress;

    use super::*;
    use crate::{
        protocol::http::{BodyLength, Method, Response, Version},
        relay::{
            testing::{
                MockClientConnection, MockControl, MockDecoder, MockEncoder, MockOriginConnection,
            },
            OriginEvent, OriginLeg,
        },
    };

    struct Fixture {
        task: SharedTask,
        origin: Arc<MockControl>,
        leg: ClientLeg<MockClientConnection>,
    }

    fn target() -> TargetAddress {
        TargetAddress {
            host: "origin.local".to_owned(),
            port: 80,
        }
    }

    fn fixture(buffer_size: usize) -> Fixture {
        let task = SharedTask::new(RelayTask::new(target(), buffer_size));
        let origin = MockControl::new();
        task.lock().unwrap().bind_control(Leg::Origin, origin.clone());

        let mut leg = ClientLeg::new(
            MockClientConnection::default(),
            Arc::new(RelaySettings::default()),
        );
        leg.handle(ClientEvent::Connected(task.clone()))
            .expect("connected");
        Fixture { task, origin, leg }
    }

    impl Fixture {
        fn state(&self) -> ConnState {
            self.task.lock().unwrap().client_state()
        }

        fn set_origin_state(&self, state: ConnState) {
            self.task.lock().unwrap().set_state(Leg::Origin, state);
        }

        fn receive(&mut self, method: Method, body: BodyLength) -> Transition {
            let mut request = Request::new(method, "/", Version::V11);
            request.body = body;
            self.leg
                .handle(ClientEvent::RequestReceived(request))
                .expect("request received")
        }

        /// what the origin leg does when the response head arrives
        fn origin_responds(&self, response: Response, complete: bool) {
            let mut task = self.task.lock().unwrap();
            task.set_response(response);
            if complete {
                task.set_response_complete();
                task.set_state(Leg::Origin, ConnState::ResponseBodyDone);
            } else {
                task.set_state(Leg::Origin, ConnState::ResponseBodyStream);
            }
        }
    }

    fn ok(body: BodyLength) -> Response {
        let mut response = Response::new(200, "OK", Version::V11);
        response.body = body;
        response.headers.append("Keep-Alive", "timeout=5");
        response
    }

    #[test]
    fn request_without_body_is_done_at_once() {
        let mut f = fixture(16);
        let transition = f.receive(Method::Get, BodyLength::None);

        assert_eq!(
            transition,
            Transition::new(LEG, ConnState::Connected, ConnState::RequestBodyDone)
        );
        assert_eq!(f.origin.calls(), vec!["request_output"]);
        assert_eq!(f.leg.connection().control.calls(), vec!["suspend_input"]);
    }

    #[test]
    fn request_before_origin_connects() {
        let task = SharedTask::new(RelayTask::new(target(), 16));
        let mut leg = ClientLeg::new(
            MockClientConnection::default(),
            Arc::new(RelaySettings::default()),
        );
        leg.handle(ClientEvent::Connected(task.clone())).unwrap();
        let transition = leg
            .handle(ClientEvent::RequestReceived(Request::new(
                Method::Get,
                "/",
                Version::V11,
            )))
            .unwrap();
        assert_eq!(transition.to, ConnState::RequestBodyDone);
        assert!(task.lock().unwrap().request().is_some());
    }

    #[test]
    fn events_outside_their_states_are_faults() {
        let cases: Vec<(&str, Vec<ConnState>)> = vec![
            ("request received", vec![ConnState::Idle, ConnState::Connected]),
            ("input ready", vec![ConnState::RequestReceived, ConnState::RequestBodyStream]),
            ("output ready", vec![ConnState::ResponseSent, ConnState::ResponseBodyStream]),
        ];

        for (name, legal) in cases {
            for state in ConnState::ALL {
                if legal.contains(&state) {
                    continue;
                }
                let mut f = fixture(16);
                f.task.lock().unwrap().set_state(LEG, state);
                f.origin.clear();

                let mut decoder = MockDecoder::new(b"data", 16);
                let mut encoder = MockEncoder::new(16);
                let event = match name {
                    "request received" => ClientEvent::RequestReceived(Request::new(
                        Method::Get,
                        "/",
                        Version::V11,
                    )),
                    "input ready" => ClientEvent::InputReady(&mut decoder),
                    _ => ClientEvent::OutputReady(&mut encoder),
                };

                assert_eq!(
                    f.leg.handle(event),
                    Err(RelayError::IllegalState {
                        leg: LEG,
                        state,
                        event: name
                    }),
                    "{name} in {state}"
                );
                assert_eq!(f.state(), state);
                assert!(f.task.lock().unwrap().client_to_origin().is_empty());
                assert!(f.origin.calls().is_empty());
                assert_eq!(decoder.position, 0);
            }
        }
    }

    #[test]
    fn response_ready_in_an_illegal_state_is_a_fault() {
        let mut f = fixture(16);
        f.origin_responds(ok(BodyLength::Length(3)), false);
        // still waiting for a request
        assert_eq!(
            f.leg.handle(ClientEvent::ResponseReady),
            Err(RelayError::IllegalState {
                leg: LEG,
                state: ConnState::Connected,
                event: "response ready"
            })
        );
        assert!(f.leg.connection().submitted.is_empty());
    }

    #[test]
    fn request_body_is_streamed_with_backpressure() {
        let mut f = fixture(8);
        f.receive(Method::Post, BodyLength::Length(12));
        assert_eq!(f.state(), ConnState::RequestReceived);

        let mut decoder = MockDecoder::new(b"0123456789ab", 12);
        let transition = f.leg.handle(ClientEvent::InputReady(&mut decoder)).unwrap();
        assert_eq!(transition.to, ConnState::RequestBodyStream);
        assert!(f.task.lock().unwrap().client_to_origin().is_full());
        assert_eq!(
            f.leg.connection().control.calls().last(),
            Some(&"suspend_input")
        );

        // a full buffer takes nothing more
        f.leg.handle(ClientEvent::InputReady(&mut decoder)).unwrap();
        assert_eq!(decoder.position, 8);

        f.task.lock().unwrap().client_to_origin_mut().consume(8);
        let transition = f.leg.handle(ClientEvent::InputReady(&mut decoder)).unwrap();
        assert_eq!(transition.to, ConnState::RequestBodyDone);
        assert_eq!(f.task.lock().unwrap().counters().client_in, 12);
        assert!(f.origin.count("request_output") >= 2);
    }

    #[test]
    fn response_waits_for_the_request_body() {
        let mut f = fixture(16);
        f.receive(Method::Post, BodyLength::Length(4));
        f.origin_responds(ok(BodyLength::Length(3)), false);

        let transition = f.leg.handle(ClientEvent::ResponseReady).unwrap();
        assert!(!transition.is_change());
        assert!(f.leg.connection().submitted.is_empty());

        let mut decoder = MockDecoder::new(b"body", 16);
        f.leg.handle(ClientEvent::InputReady(&mut decoder)).unwrap();
        let transition = f.leg.handle(ClientEvent::ResponseReady).unwrap();
        assert_eq!(transition.to, ConnState::ResponseSent);
    }

    #[test]
    fn response_ready_without_response_is_a_no_op() {
        let mut f = fixture(16);
        f.receive(Method::Get, BodyLength::None);
        assert!(!f.leg.handle(ClientEvent::ResponseReady).unwrap().is_change());
        assert!(f.leg.connection().submitted.is_empty());
    }

    #[test]
    fn response_head_is_sanitized() {
        let mut f = fixture(16);
        f.receive(Method::Get, BodyLength::None);
        f.origin_responds(ok(BodyLength::Length(3)), false);

        let transition = f.leg.handle(ClientEvent::ResponseReady).unwrap();
        assert_eq!(transition.to, ConnState::ResponseSent);

        let submitted = &f.leg.connection().submitted[0];
        assert!(!submitted.headers.contains("keep-alive"));
        assert_eq!(submitted.headers.get("content-length"), Some("3"));
        assert_eq!(submitted.headers.get("connection"), Some("keep-alive"));
        // the stored response is left untouched
        assert!(f.task.lock().unwrap().response().unwrap().headers.contains("keep-alive"));

        // a second notification does not send the head again
        assert!(!f.leg.handle(ClientEvent::ResponseReady).unwrap().is_change());
        assert_eq!(f.leg.connection().submitted.len(), 1);
    }

    #[test]
    fn keep_alive_exchange_resets_the_task() {
        let mut f = fixture(16);
        f.receive(Method::Get, BodyLength::None);
        f.origin_responds(ok(BodyLength::Length(5)), false);
        f.leg.handle(ClientEvent::ResponseReady).unwrap();

        f.task
            .lock()
            .unwrap()
            .origin_to_client_mut()
            .extend_from_slice(b"hel");
        let mut encoder = MockEncoder::new(16);
        let transition = f.leg.handle(ClientEvent::OutputReady(&mut encoder)).unwrap();
        assert_eq!(transition.to, ConnState::ResponseBodyStream);
        assert_eq!(f.origin.calls().last(), Some(&"request_input"));
        assert_eq!(
            f.leg.connection().control.calls().last(),
            Some(&"suspend_output")
        );

        {
            let mut task = f.task.lock().unwrap();
            task.origin_to_client_mut().extend_from_slice(b"lo");
            task.set_response_complete();
            task.set_state(Leg::Origin, ConnState::ResponseBodyDone);
        }
        let transition = f.leg.handle(ClientEvent::OutputReady(&mut encoder)).unwrap();
        assert_eq!(
            transition,
            Transition::new(LEG, ConnState::ResponseBodyStream, ConnState::Idle)
        );
        assert!(encoder.completed);
        assert_eq!(encoder.written, b"hello");

        let task = f.task.lock().unwrap();
        assert_eq!(task.exchanges(), 1);
        assert!(task.request().is_none());
        assert_eq!(task.origin_state(), ConnState::Idle);
        drop(task);
        assert_eq!(
            f.leg.connection().control.calls().last(),
            Some(&"request_input")
        );

        // the next request on the same connection
        let transition = f.receive(Method::Get, BodyLength::None);
        assert_eq!(transition.from, ConnState::Idle);
    }

    #[test]
    fn no_body_response_finishes_at_once() {
        let mut f = fixture(16);
        f.receive(Method::Head, BodyLength::None);
        f.origin_responds(ok(BodyLength::Length(20)), true);

        let transition = f.leg.handle(ClientEvent::ResponseReady).unwrap();
        assert_eq!(transition.to, ConnState::Idle);
        assert_eq!(f.leg.connection().submitted[0].headers.get("content-length"), Some("20"));
    }

    #[test]
    fn connection_close_request_closes_after_the_response() {
        let mut f = fixture(16);
        let mut request = Request::new(Method::Get, "/", Version::V11);
        request.keep_alive = false;
        f.leg.handle(ClientEvent::RequestReceived(request)).unwrap();
        f.origin_responds(ok(BodyLength::Length(0)), true);

        let transition = f.leg.handle(ClientEvent::ResponseReady).unwrap();
        assert_eq!(transition.to, ConnState::Closing);
        assert_eq!(f.leg.connection().closes, 1);
        assert_eq!(
            f.leg.connection().submitted[0].headers.get("connection"),
            Some("close")
        );
    }

    #[test]
    fn closing_origin_is_not_reused() {
        let mut f = fixture(16);
        f.receive(Method::Get, BodyLength::None);
        f.origin_responds(ok(BodyLength::Length(0)), true);
        f.set_origin_state(ConnState::Closing);

        let transition = f.leg.handle(ClientEvent::ResponseReady).unwrap();
        assert_eq!(transition.to, ConnState::Closing);
    }

    #[test]
    fn client_closing_aborts_a_live_origin() {
        let mut f = fixture(16);
        f.receive(Method::Get, BodyLength::None);
        f.set_origin_state(ConnState::RequestSent);
        f.origin.clear();

        let transition = f.leg.handle(ClientEvent::Closed).unwrap();
        assert_eq!(transition.to, ConnState::Closed);
        assert_eq!(f.task.lock().unwrap().aborted(), Some(Leg::Client));
        assert_eq!(f.origin.calls(), vec!["request_input", "request_output"]);
    }

    #[test]
    fn client_detects_broken_origin() {
        let mut f = fixture(16);
        f.receive(Method::Get, BodyLength::None);
        f.origin_responds(ok(BodyLength::Length(100)), false);
        f.leg.handle(ClientEvent::ResponseReady).unwrap();
        f.task.lock().unwrap().abort(Leg::Origin);

        assert!(!f.leg.is_shut_down());
        let mut encoder = MockEncoder::new(16);
        let transition = f.leg.handle(ClientEvent::OutputReady(&mut encoder)).unwrap();
        assert!(!transition.is_change());
        assert_eq!(f.leg.connection().shutdowns, 1);
        assert!(f.leg.is_shut_down());
        assert!(encoder.written.is_empty());

        f.leg.handle(ClientEvent::Timeout).unwrap();
        assert_eq!(f.leg.connection().shutdowns, 1);
    }

    #[test]
    fn decoder_error_shuts_down() {
        let mut f = fixture(16);
        f.receive(Method::Post, BodyLength::Chunked);
        let mut decoder = MockDecoder::new(b"", 1);
        decoder.fail = true;

        f.leg.handle(ClientEvent::InputReady(&mut decoder)).unwrap();
        assert_eq!(f.leg.connection().shutdowns, 1);
        assert_eq!(f.task.lock().unwrap().aborted(), Some(Leg::Client));
    }

    /// drive both legs from two threads on the same task until the request
    /// body went through
    fn relay_request_body(body: Vec<u8>, buffer_size: usize, read_step: usize, write_step: usize) -> Vec<u8> {
        let task = SharedTask::new(RelayTask::new(target(), buffer_size));
        let settings = Arc::new(RelaySettings::default());

        let mut client = ClientLeg::new(MockClientConnection::default(), settings.clone());
        let mut origin = OriginLeg::new(MockOriginConnection::default(), settings);
        client.handle(ClientEvent::Connected(task.clone())).unwrap();
        origin.handle(OriginEvent::Connected(task.clone())).unwrap();

        let mut request = Request::new(Method::Post, "/", Version::V11);
        request.body = BodyLength::Length(body.len() as u64);
        client.handle(ClientEvent::RequestReceived(request)).unwrap();
        origin.handle(OriginEvent::RequestReady).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let client_barrier = barrier.clone();
        let client_thread = thread::spawn(move || {
            let mut decoder = MockDecoder::new(&body, read_step);
            client_barrier.wait();
            loop {
                let transition = client.handle(ClientEvent::InputReady(&mut decoder)).unwrap();
                if transition.to == ConnState::RequestBodyDone {
                    break;
                }
                thread::yield_now();
            }
        });

        let mut encoder = MockEncoder::new(write_step);
        barrier.wait();
        loop {
            let transition = origin.handle(OriginEvent::OutputReady(&mut encoder)).unwrap();
            if transition.to == ConnState::RequestBodyDone {
                break;
            }
            thread::yield_now();
        }
        client_thread.join().expect("client thread panicked");

        let task = task.lock().unwrap();
        let counters = task.counters();
        assert_eq!(counters.client_in, counters.origin_out);
        assert!(task.client_to_origin().is_empty());
        assert!(encoder.completed);
        encoder.written
    }

    #[test]
    fn request_body_is_conserved_across_threads() {
        let body: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(relay_request_body(body.clone(), 64, 7, 13), body);
        assert_eq!(relay_request_body(body.clone(), 16, 100, 1), body);
    }

    quickcheck! {
        fn request_body_conservation(body: Vec<u8>, buffer: u8, read: u8, write: u8) -> TestResult {
            if body.is_empty() {
                return TestResult::discard();
            }
            let buffer = buffer as usize % 32 + 1;
            let read = read as usize % 16 + 1;
            let write = write as usize % 16 + 1;
            TestResult::from_bool(relay_request_body(body.clone(), buffer, read, write) == body)
        }
    }
}
