//! Origin facing leg
//!
//! Forwards the sanitized request and its body to the origin, then streams
//! the response body into the `origin_to_client` buffer.
use std::{fmt, sync::Arc};

use crate::{
    protocol::http::{
        body_expected, can_have_body,
        codec::{ContentDecoder, ContentEncoder},
        editor::{remove_hop_by_hop_headers, ExchangeContext},
        Method, Request, Response,
    },
    relay::{ConnState, OriginConnection, RelaySettings, RelayTask, SharedTask, Transition},
    Leg, RelayError, TransportError,
};

const LEG: Leg = Leg::Origin;

/// Readiness and lifecycle events of the origin connection
pub enum OriginEvent<'a> {
    /// the connection to the origin is established
    Connected(SharedTask),
    /// the connection can take a request head
    RequestReady,
    /// the connection can take request body bytes
    OutputReady(&'a mut dyn ContentEncoder),
    /// a response head was parsed
    ResponseReceived(Response),
    /// response body bytes can be read
    InputReady(&'a mut dyn ContentDecoder),
    Closed,
    Exception(TransportError),
    Timeout,
}

impl OriginEvent<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            OriginEvent::Connected(_) => "connected",
            OriginEvent::RequestReady => "request ready",
            OriginEvent::OutputReady(_) => "output ready",
            OriginEvent::ResponseReceived(_) => "response received",
            OriginEvent::InputReady(_) => "input ready",
            OriginEvent::Closed => "closed",
            OriginEvent::Exception(_) => "exception",
            OriginEvent::Timeout => "timeout",
        }
    }
}

impl fmt::Debug for OriginEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OriginEvent({})", self.name())
    }
}

pub struct OriginLeg<C: OriginConnection> {
    connection: C,
    task: Option<SharedTask>,
    settings: Arc<RelaySettings>,
    shut_down: bool,
}

impl<C: OriginConnection> OriginLeg<C> {
    pub fn new(connection: C, settings: Arc<RelaySettings>) -> Self {
        OriginLeg {
            connection,
            task: None,
            settings,
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

    /// the connection was shut down, only `Closed` is still processed
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn handle(&mut self, event: OriginEvent) -> Result<Transition, RelayError> {
        if let OriginEvent::Connected(task) = event {
            return self.connected(task);
        }
        if let OriginEvent::Closed = event {
            return Ok(self.closed());
        }

        let shared = self.task.clone().ok_or(RelayError::Detached(LEG))?;
        let mut task = shared.lock()?;

        let state = task.origin_state();
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
            OriginEvent::RequestReady => self.request_ready(&mut task),
            OriginEvent::OutputReady(encoder) => self.output_ready(&mut task, encoder),
            OriginEvent::ResponseReceived(response) => self.response_received(&mut task, response),
            OriginEvent::InputReady(decoder) => self.input_ready(&mut task, decoder),
            OriginEvent::Exception(error) => Ok(self.fault(&mut task, error)),
            OriginEvent::Timeout => Ok(self.fault(&mut task, TransportError::Timeout)),
            OriginEvent::Connected(_) | OriginEvent::Closed => Ok(Transition::unchanged(LEG, state)),
        }
    }

    fn connected(&mut self, shared: SharedTask) -> Result<Transition, RelayError> {
        let mut task = shared.lock()?;
        let from = task.origin_state();
        from.expect_one_of(LEG, &[ConnState::Idle], "connected")?;
        debug!("{} connection to the origin open", log_context!(LEG, task));

        task.bind_control(LEG, self.connection.io_control());
        task.set_state(LEG, ConnState::Connected);
        if task.request().is_some() {
            self.connection.request_output();
        }
        if task.aborted().is_some() {
            // the client went away while we were connecting
            self.shutdown(&task);
        }

        drop(task);
        self.task = Some(shared);
        Ok(Transition::new(LEG, from, ConnState::Connected))
    }

    fn request_ready(&mut self, task: &mut RelayTask) -> Result<Transition, RelayError> {
        let from = task.origin_state();
        if from.is_one_of(&[ConnState::RequestSent, ConnState::RequestBodyDone]) {
            // already dispatched, waiting for the response
            return Ok(Transition::unchanged(LEG, from));
        }
        from.expect_one_of(LEG, &[ConnState::Idle, ConnState::Connected], "request ready")?;

        let mut request = task.take_request().ok_or(RelayError::MissingRequest)?;
        let submitted = self.submit(task, &mut request);
        task.set_request(request);

        match submitted {
            Ok(()) => {
                task.set_state(LEG, ConnState::RequestSent);
                if let Some(request) = task.request() {
                    debug!("{} >> {}", log_context!(LEG, task), request.request_line());
                }
                Ok(Transition::new(LEG, from, ConnState::RequestSent))
            }
            Err(error) => Ok(self.fault(task, error)),
        }
    }

    fn submit(&mut self, task: &RelayTask, request: &mut Request) -> Result<(), TransportError> {
        remove_hop_by_hop_headers(&mut request.headers);
        request.params = request.params.defaulted(&self.settings.params);

        let context = ExchangeContext {
            id: task.id(),
            target: task.target(),
            request: None,
        };
        self.settings
            .request_processor
            .process_request(request, &context)?;
        self.connection.submit_request(request)
    }

    fn output_ready(
        &mut self,
        task: &mut RelayTask,
        encoder: &mut dyn ContentEncoder,
    ) -> Result<Transition, RelayError> {
        let from = task.origin_state();
        from.expect_one_of(
            LEG,
            &[ConnState::RequestSent, ConnState::RequestBodyStream],
            "output ready",
        )?;

        let buffer = task.client_to_origin_mut();
        let written = match encoder.write(buffer.used()) {
            Ok(written) => written,
            Err(error) => return Ok(self.fault(task, error)),
        };
        buffer.consume(written);
        let empty = buffer.is_empty();
        task.counters_mut().origin_out += written as u64;
        if written > 0 {
            trace!("{} {} bytes written", log_context!(LEG, task), written);
            count!("bytes.client_to_origin", written as i64, LEG.as_str());
        }

        if empty {
            if task.client_state() == ConnState::RequestBodyDone {
                if let Err(error) = encoder.complete() {
                    return Ok(self.fault(task, error));
                }
            } else {
                // wait for the client leg to refill the buffer
                self.connection.suspend_output();
            }
        }

        if encoder.is_completed() {
            debug!("{} request body sent", log_context!(LEG, task));
            task.set_state(LEG, ConnState::RequestBodyDone);
            Ok(Transition::new(LEG, from, ConnState::RequestBodyDone))
        } else {
            task.set_state(LEG, ConnState::RequestBodyStream);
            // there is room again in the buffer, the client can read more
            task.control(Leg::Client)?.request_input();
            Ok(Transition::new(LEG, from, ConnState::RequestBodyStream))
        }
    }

    fn response_received(
        &mut self,
        task: &mut RelayTask,
        response: Response,
    ) -> Result<Transition, RelayError> {
        let from = task.origin_state();
        from.expect_one_of(
            LEG,
            &[ConnState::RequestSent, ConnState::RequestBodyDone],
            "response received",
        )?;

        debug!("{} << {}", log_context!(LEG, task), response.status_line());
        if response.is_informational() {
            return Ok(Transition::unchanged(LEG, from));
        }

        incr!(response.status_class());
        time!("response_time", task.elapsed().as_millis());

        let has_body = match task.request() {
            Some(request) => can_have_body(request, &response),
            None => body_expected(&Method::Get, response.status),
        };
        task.set_response(response);
        task.set_state(LEG, ConnState::ResponseReceived);
        let mut to = ConnState::ResponseReceived;

        if !has_body {
            self.connection.reset_input();
            task.set_response_complete();
            if !self.keep_alive(task) {
                debug!("{} close connection", log_context!(LEG, task));
                task.set_state(LEG, ConnState::Closing);
                self.connection.close();
                to = ConnState::Closing;
            }
        }

        // the client can forward the response head
        task.control(Leg::Client)?.request_output();
        Ok(Transition::new(LEG, from, to))
    }

    fn input_ready(
        &mut self,
        task: &mut RelayTask,
        decoder: &mut dyn ContentDecoder,
    ) -> Result<Transition, RelayError> {
        let from = task.origin_state();
        from.expect_one_of(
            LEG,
            &[ConnState::ResponseReceived, ConnState::ResponseBodyStream],
            "input ready",
        )?;

        let buffer = task.origin_to_client_mut();
        let read = match decoder.read(buffer) {
            Ok(read) => read,
            Err(error) => return Ok(self.fault(task, error)),
        };
        let full = buffer.is_full();
        let has_data = !buffer.is_empty();
        task.counters_mut().origin_in += read as u64;
        if read > 0 {
            trace!("{} {} bytes read", log_context!(LEG, task), read);
            count!("bytes.origin_to_client", read as i64, LEG.as_str());
        }

        if full {
            // wait for the client leg to drain the buffer
            self.connection.suspend_input();
        }
        let client = task.control(Leg::Client)?;
        if has_data {
            client.request_output();
        }

        if decoder.is_completed() {
            debug!("{} response body received", log_context!(LEG, task));
            task.set_state(LEG, ConnState::ResponseBodyDone);
            task.set_response_complete();
            // the client completes its side even when nothing is left to send
            client.request_output();

            if !self.keep_alive(task) {
                debug!("{} close connection", log_context!(LEG, task));
                task.set_state(LEG, ConnState::Closing);
                self.connection.close();
                return Ok(Transition::new(LEG, from, ConnState::Closing));
            }
            Ok(Transition::new(LEG, from, ConnState::ResponseBodyDone))
        } else {
            task.set_state(LEG, ConnState::ResponseBodyStream);
            Ok(Transition::new(LEG, from, ConnState::ResponseBodyStream))
        }
    }

    fn closed(&mut self) -> Transition {
        let shared = match &self.task {
            Some(shared) => shared,
            None => return Transition::unchanged(LEG, ConnState::Closed),
        };
        match shared.lock() {
            Ok(mut task) => {
                let from = task.origin_state();
                debug!("{} connection closed", log_context!(LEG, task));
                task.set_state(LEG, ConnState::Closed);
                if !task.response_complete() {
                    task.abort(LEG);
                }
                Transition::new(LEG, from, ConnState::Closed)
            }
            Err(_) => Transition::unchanged(LEG, ConnState::Closed),
        }
    }

    fn keep_alive(&self, task: &RelayTask) -> bool {
        match task.response() {
            Some(response) => {
                let context = ExchangeContext {
                    id: task.id(),
                    target: task.target(),
                    request: task.request(),
                };
                self.settings.reuse_strategy.keep_alive(response, &context)
            }
            None => false,
        }
    }

    /// transport faults end this connection and the exchange, no retry
    fn fault(&mut self, task: &mut RelayTask, error: TransportError) -> Transition {
        let state = task.origin_state();
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
