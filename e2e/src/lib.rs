//! End to end tests: a real relay on its own thread, fed by blocking
//! clients and forwarding to mock origins
pub mod http_utils;
pub mod mock;
pub mod relay;

#[cfg(test)]
mod tests;

/// read size of the mock origins and clients
pub const BUFFER_SIZE: usize = 4096;
