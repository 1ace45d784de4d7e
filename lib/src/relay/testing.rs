//! Recording connections and codecs for the leg tests
use std::{
    cmp,
    sync::{Arc, Mutex},
};

use crate::{
    buffer::Buffer,
    protocol::http::{
        codec::{ContentDecoder, ContentEncoder},
        Request, Response,
    },
    relay::{ClientConnection, Connection, IoControl, IoControlHandle, OriginConnection},
    TransportError,
};

#[derive(Default)]
pub struct MockControl {
    calls: Mutex<Vec<&'static str>>,
}

impl MockControl {
    pub fn new() -> Arc<MockControl> {
        Arc::new(MockControl::default())
    }

    fn record(&self, call: &'static str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| **c == call).count()
    }

    pub fn clear(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }
}

impl IoControl for MockControl {
    fn request_input(&self) {
        self.record("request_input")
    }

    fn suspend_input(&self) {
        self.record("suspend_input")
    }

    fn request_output(&self) {
        self.record("request_output")
    }

    fn suspend_output(&self) {
        self.record("suspend_output")
    }
}

#[derive(Default)]
pub struct MockOriginConnection {
    pub control: Arc<MockControl>,
    pub submitted: Vec<Request>,
    pub input_resets: usize,
    pub closes: usize,
    pub shutdowns: usize,
    pub fail_submit: bool,
}

impl Connection for MockOriginConnection {
    fn io_control(&self) -> IoControlHandle {
        self.control.clone()
    }

    fn close(&mut self) {
        self.closes += 1;
    }

    fn shutdown(&mut self) {
        self.shutdowns += 1;
    }
}

impl OriginConnection for MockOriginConnection {
    fn submit_request(&mut self, request: &Request) -> Result<(), TransportError> {
        if self.fail_submit {
            return Err(TransportError::Socket);
        }
        self.submitted.push(request.clone());
        Ok(())
    }

    fn reset_input(&mut self) {
        self.input_resets += 1;
    }
}

#[derive(Default)]
pub struct MockClientConnection {
    pub control: Arc<MockControl>,
    pub submitted: Vec<Response>,
    pub closes: usize,
    pub shutdowns: usize,
}

impl Connection for MockClientConnection {
    fn io_control(&self) -> IoControlHandle {
        self.control.clone()
    }

    fn close(&mut self) {
        self.closes += 1;
    }

    fn shutdown(&mut self) {
        self.shutdowns += 1;
    }
}

impl ClientConnection for MockClientConnection {
    fn submit_response(&mut self, response: &Response) -> Result<(), TransportError> {
        self.submitted.push(response.clone());
        Ok(())
    }
}

/// serves `data` at most `step` bytes per read
pub struct MockDecoder {
    pub data: Vec<u8>,
    pub position: usize,
    pub step: usize,
    pub fail: bool,
}

impl MockDecoder {
    pub fn new(data: &[u8], step: usize) -> Self {
        MockDecoder {
            data: data.to_vec(),
            position: 0,
            step,
            fail: false,
        }
    }
}

impl ContentDecoder for MockDecoder {
    fn read(&mut self, dst: &mut Buffer) -> Result<usize, TransportError> {
        if self.fail {
            return Err(TransportError::UnexpectedEof);
        }
        let count = cmp::min(self.step, self.data.len() - self.position);
        let count = dst.extend_from_slice(&self.data[self.position..self.position + count]);
        self.position += count;
        Ok(count)
    }

    fn is_completed(&self) -> bool {
        self.position == self.data.len()
    }
}

/// accepts at most `step` bytes per write
pub struct MockEncoder {
    pub written: Vec<u8>,
    pub step: usize,
    pub completed: bool,
}

impl MockEncoder {
    pub fn new(step: usize) -> Self {
        MockEncoder {
            written: Vec::new(),
            step,
            completed: false,
        }
    }
}

impl ContentEncoder for MockEncoder {
    fn write(&mut self, src: &[u8]) -> Result<usize, TransportError> {
        let count = cmp::min(self.step, src.len());
        self.written.extend_from_slice(&src[..count]);
        Ok(count)
    }

    fn complete(&mut self) -> Result<(), TransportError> {
        self.completed = true;
        Ok(())
    }

    fn is_completed(&self) -> bool {
        self.completed
    }
}
