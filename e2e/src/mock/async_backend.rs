use std::{
    io::{ErrorKind, Read, Write},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream},
    thread,
    time::Duration,
};

use futures::channel::mpsc;

use crate::{
    http_utils::{head_length, header_value, http_ok_head, http_ok_response},
    mock::aggregator::{Aggregator, RecordingAggregator, SimpleAggregator},
    BUFFER_SIZE,
};

/// A request fully received by a mock origin
#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub head: String,
    pub body: Vec<u8>,
}

impl ReceivedRequest {
    pub fn method(&self) -> &str {
        self.head.split(' ').next().unwrap_or_default()
    }
}

/// One accepted connection of a mock origin, in non blocking mode
pub struct MockConnection {
    pub stream: TcpStream,
    /// received bytes not consumed by a request yet
    pub pending: Vec<u8>,
    pub closed: bool,
}

impl MockConnection {
    fn new(stream: TcpStream) -> Self {
        MockConnection {
            stream,
            pending: Vec::new(),
            closed: false,
        }
    }

    /// read everything available, an end of stream marks the connection closed
    pub fn fill(&mut self) {
        let mut buf = [0u8; BUFFER_SIZE];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    self.closed = true;
                    break;
                }
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(error) if error.kind() == ErrorKind::WouldBlock => break,
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error) => {
                    println!("mock origin read error: {error}");
                    self.closed = true;
                    break;
                }
            }
        }
    }

    /// take the next complete request out of the pending bytes, only
    /// Content-Length framing is understood
    pub fn next_request(&mut self) -> Option<ReceivedRequest> {
        let head_length = head_length(&self.pending)?;
        let head = String::from_utf8_lossy(&self.pending[..head_length]).into_owned();
        let body_length = header_value(&head, "Content-Length")
            .and_then(|length| length.parse::<usize>().ok())
            .unwrap_or(0);
        if self.pending.len() < head_length + body_length {
            return None;
        }
        let body = self.pending[head_length..head_length + body_length].to_vec();
        self.pending.drain(..head_length + body_length);
        Some(ReceivedRequest { head, body })
    }

    pub fn respond(&mut self, response: &[u8]) -> bool {
        let mut written = 0;
        while written < response.len() {
            match self.stream.write(&response[written..]) {
                Ok(n) => written += n,
                Err(error)
                    if error.kind() == ErrorKind::WouldBlock
                        || error.kind() == ErrorKind::Interrupted =>
                {
                    thread::sleep(Duration::from_millis(1))
                }
                Err(error) => {
                    println!("mock origin write error: {error}");
                    self.closed = true;
                    return false;
                }
            }
        }
        true
    }

    pub fn close(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
        self.closed = true;
    }
}

/// Handle to a detached thread where a mock origin runs
/// (a thin wrapper around a TcpListener)
pub struct BackendHandle<T> {
    pub name: String,
    pub address: SocketAddr,
    /// Allows to stop the backend within the thread
    pub stop_tx: mpsc::Sender<()>,
    /// Receives data from the backend on the thread
    pub aggregator_rx: mpsc::Receiver<T>,
}

pub type RequestHandler<A> = Box<dyn Fn(&mut MockConnection, &str, A) -> A + Send + Sync>;

impl<A: Aggregator + Send + Sync + 'static> BackendHandle<A> {
    /// bind on a free local port and serve every connection with `handler`
    pub fn spawn_detached_backend<S: Into<String>>(name: S, handler: RequestHandler<A>) -> Self {
        let name = name.into();
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let (mut aggregator_tx, aggregator_rx) = mpsc::channel::<A>(1);

        let listener = TcpListener::bind("127.0.0.1:0").expect("could not bind mock origin");
        let address = listener
            .local_addr()
            .expect("could not get the mock origin address");
        listener
            .set_nonblocking(true)
            .expect("could not set nonblocking on listener");

        let thread_name = name.to_owned();
        // The backend runs on this detached thread:
        // - accepts tcp connections
        // - calls handler on each live connections
        // - monitors stop_rx to stop itself
        thread::spawn(move || {
            let mut aggregator = A::new();
            let mut clients: Vec<MockConnection> = Vec::new();
            loop {
                match listener.accept() {
                    Ok((stream, _)) => {
                        println!("{thread_name}: new connection");
                        stream
                            .set_nonblocking(true)
                            .expect("could not set nonblocking on client");
                        aggregator.add_connection();
                        clients.push(MockConnection::new(stream));
                    }
                    Err(error) if error.kind() == ErrorKind::WouldBlock => {}
                    Err(error) => println!("{thread_name}: accept error: {error:?}"),
                }
                for client in clients.iter_mut() {
                    aggregator = handler(client, &thread_name, aggregator);
                }
                clients.retain(|client| !client.closed);

                match stop_rx.try_next() {
                    Ok(Some(_)) => break,
                    _ => thread::sleep(Duration::from_millis(1)),
                }
            }
            aggregator_tx
                .try_send(aggregator)
                .expect("could not send aggregator");
        });

        Self {
            name,
            address,
            stop_tx,
            aggregator_rx,
        }
    }

    pub fn stop_and_get_aggregator(&mut self) -> Option<A> {
        self.stop_tx.try_send(()).expect("could not stop backend");
        loop {
            match self.aggregator_rx.try_next() {
                Ok(Some(aggregator)) => return Some(aggregator),
                Ok(None) => return None,
                Err(_) => thread::sleep(Duration::from_millis(1)),
            }
        }
    }
}

impl BackendHandle<SimpleAggregator> {
    /// This creates a callback answering every request with an HTTP OK
    /// response carrying the given content, HEAD requests get the head only
    pub fn http_handler<S: Into<String>>(content: S) -> RequestHandler<SimpleAggregator> {
        let content = content.into();
        Box::new(move |client, _name, mut aggregator| {
            client.fill();
            while let Some(request) = client.next_request() {
                aggregator.add_request();
                let response = if request.method() == "HEAD" {
                    http_ok_head(&content)
                } else {
                    http_ok_response(&content)
                };
                if client.respond(response.as_bytes()) {
                    aggregator.add_response();
                }
            }
            aggregator
        })
    }

    /// This creates a callback answering one request with a head announcing
    /// 100 bytes and the start of the body only, then dropping the connection
    pub fn partial_body_handler<S: Into<String>>(partial: S) -> RequestHandler<SimpleAggregator> {
        let partial = partial.into();
        Box::new(move |client, name, mut aggregator| {
            client.fill();
            if client.next_request().is_some() {
                aggregator.add_request();
                let response = format!("HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n{partial}");
                client.respond(response.as_bytes());
                println!("{name}: dropping the connection mid body");
                client.close();
            }
            aggregator
        })
    }

    /// This creates a callback reading requests and never answering them
    pub fn silent_handler() -> RequestHandler<SimpleAggregator> {
        Box::new(move |client, name, mut aggregator| {
            client.fill();
            while client.next_request().is_some() {
                aggregator.add_request();
            }
            if client.closed {
                println!("{name}: connection closed by the relay");
                aggregator.closed_by_relay += 1;
            }
            aggregator
        })
    }

    /// This creates a callback reading one request then dropping the
    /// connection without answering
    pub fn drop_handler() -> RequestHandler<SimpleAggregator> {
        Box::new(move |client, name, mut aggregator| {
            client.fill();
            if client.next_request().is_some() {
                println!("{name}: dropping the connection");
                aggregator.add_request();
                client.close();
            }
            aggregator
        })
    }
}

impl BackendHandle<RecordingAggregator> {
    /// This creates a callback recording every request and answering with
    /// the size of the received body
    pub fn recording_handler() -> RequestHandler<RecordingAggregator> {
        Box::new(move |client, _name, mut aggregator| {
            client.fill();
            while let Some(request) = client.next_request() {
                aggregator.add_request();
                let response = http_ok_response(request.body.len().to_string());
                aggregator.heads.push(request.head);
                aggregator.bodies.push(request.body);
                if client.respond(response.as_bytes()) {
                    aggregator.add_response();
                }
            }
            aggregator
        })
    }
}
