/// Accumulates what a mock origin observed, handed back when it stops
pub trait Aggregator {
    fn new() -> Self;
    fn add_connection(&mut self);
    fn add_request(&mut self);
    fn add_response(&mut self);
}

#[derive(Debug, Clone, Default)]
pub struct SimpleAggregator {
    pub connections: usize,
    pub requests_received: usize,
    pub responses_sent: usize,
    /// connections the relay closed first
    pub closed_by_relay: usize,
}

impl Aggregator for SimpleAggregator {
    fn new() -> Self {
        Self::default()
    }
    fn add_connection(&mut self) {
        self.connections += 1;
    }
    fn add_request(&mut self) {
        self.requests_received += 1;
    }
    fn add_response(&mut self) {
        self.responses_sent += 1;
    }
}

/// Also keeps the heads and bodies of every request
#[derive(Debug, Clone, Default)]
pub struct RecordingAggregator {
    pub connections: usize,
    pub requests_received: usize,
    pub responses_sent: usize,
    pub heads: Vec<String>,
    pub bodies: Vec<Vec<u8>>,
}

impl Aggregator for RecordingAggregator {
    fn new() -> Self {
        Self::default()
    }
    fn add_connection(&mut self) {
        self.connections += 1;
    }
    fn add_request(&mut self) {
        self.requests_received += 1;
    }
    fn add_response(&mut self) {
        self.responses_sent += 1;
    }
}
