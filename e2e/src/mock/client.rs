use std::{
    io::{ErrorKind, Read, Write},
    net::{SocketAddr, TcpStream},
    time::Duration,
};

use crate::{
    http_utils::{head_length, header_value},
    BUFFER_SIZE,
};

/// A response as the client received it
#[derive(Debug, Clone)]
pub struct ReceivedResponse {
    pub head: String,
    pub body: Vec<u8>,
}

impl ReceivedResponse {
    pub fn status(&self) -> Option<u16> {
        self.head.split(' ').nth(1)?.parse().ok()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.head, name)
    }
}

/// Blocking HTTP client talking to the relay
pub struct Client {
    pub name: String,
    pub address: SocketAddr,
    pub stream: Option<TcpStream>,
    /// bytes received past the last response
    pending: Vec<u8>,
}

impl Client {
    pub fn new<S: Into<String>>(name: S, address: SocketAddr) -> Self {
        Client {
            name: name.into(),
            address,
            stream: None,
            pending: Vec::new(),
        }
    }

    pub fn connect(&mut self) {
        let stream = TcpStream::connect(self.address).expect("could not connect to the relay");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("could not set the read timeout");
        self.stream = Some(stream);
    }

    pub fn send(&mut self, data: &[u8]) {
        self.try_send(data).expect("could not send the request");
    }

    /// send without asserting, the relay may already have dropped us
    pub fn try_send(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self.stream.as_mut() {
            Some(stream) => stream.write_all(data),
            None => Err(ErrorKind::NotConnected.into()),
        }
    }

    /// read until `pending` holds `length` bytes, false on end of stream
    fn fill_to(&mut self, length: usize) -> bool {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return false,
        };
        let mut buf = [0u8; BUFFER_SIZE];
        while self.pending.len() < length {
            match stream.read(&mut buf) {
                Ok(0) => return false,
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error) => {
                    println!("{}: read error: {error}", self.name);
                    return false;
                }
            }
        }
        true
    }

    /// Read one Content-Length framed response. Set `head_only` for the
    /// answer to a HEAD request.
    pub fn receive(&mut self, head_only: bool) -> Option<ReceivedResponse> {
        let head_length = loop {
            if let Some(length) = head_length(&self.pending) {
                break length;
            }
            let wanted = self.pending.len() + 1;
            if !self.fill_to(wanted) {
                return None;
            }
        };
        let head = String::from_utf8_lossy(&self.pending[..head_length]).into_owned();
        let body_length = if head_only {
            0
        } else {
            header_value(&head, "Content-Length")
                .and_then(|length| length.parse::<usize>().ok())
                .unwrap_or(0)
        };
        if !self.fill_to(head_length + body_length) {
            return None;
        }
        let body = self.pending[head_length..head_length + body_length].to_vec();
        self.pending.drain(..head_length + body_length);
        Some(ReceivedResponse { head, body })
    }

    /// true once the relay closed the connection without sending anything,
    /// a read timeout is not a close
    pub fn is_closed_by_peer(&mut self) -> bool {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return true,
        };
        let mut buf = [0u8; BUFFER_SIZE];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => return self.pending.is_empty(),
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error) => {
                    return matches!(
                        error.kind(),
                        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
                    ) && self.pending.is_empty()
                }
            }
        }
    }
}
