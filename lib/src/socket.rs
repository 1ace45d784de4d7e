use std::{
    io::{ErrorKind, Read, Write},
    net::Shutdown,
};

use mio::net::TcpStream;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SocketResult {
    Continue,
    Closed,
    WouldBlock,
    Error,
}

/// Non blocking reads and writes, each call does a bounded amount of work:
/// it stops when the slice is exhausted, when the socket would block or
/// when it fails
pub trait SocketHandler {
    fn socket_read(&mut self, buf: &mut [u8]) -> (usize, SocketResult);
    fn socket_write(&mut self, buf: &[u8]) -> (usize, SocketResult);
    fn socket_close(&mut self);
}

impl SocketHandler for TcpStream {
    fn socket_read(&mut self, buf: &mut [u8]) -> (usize, SocketResult) {
        let mut size = 0usize;
        loop {
            if size == buf.len() {
                return (size, SocketResult::Continue);
            }
            match self.read(&mut buf[size..]) {
                Ok(0) => return (size, SocketResult::Closed),
                Ok(sz) => size += sz,
                Err(e) => match e.kind() {
                    ErrorKind::WouldBlock => return (size, SocketResult::WouldBlock),
                    ErrorKind::Interrupted => continue,
                    ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe => {
                        debug!("SOCKET\tsocket_read peer went away: {:?}", e.kind());
                        return (size, SocketResult::Error);
                    }
                    _ => {
                        error!("SOCKET\tsocket_read error={:?}", e);
                        return (size, SocketResult::Error);
                    }
                },
            }
        }
    }

    fn socket_write(&mut self, buf: &[u8]) -> (usize, SocketResult) {
        let mut size = 0usize;
        loop {
            if size == buf.len() {
                return (size, SocketResult::Continue);
            }
            match self.write(&buf[size..]) {
                Ok(0) => return (size, SocketResult::Continue),
                Ok(sz) => size += sz,
                Err(e) => match e.kind() {
                    ErrorKind::WouldBlock => return (size, SocketResult::WouldBlock),
                    ErrorKind::Interrupted => continue,
                    ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe => {
                        debug!("SOCKET\tsocket_write peer went away: {:?}", e.kind());
                        return (size, SocketResult::Closed);
                    }
                    _ => {
                        error!("SOCKET\tsocket_write error={:?}", e);
                        return (size, SocketResult::Error);
                    }
                },
            }
        }
    }

    fn socket_close(&mut self) {
        if let Err(e) = self.shutdown(Shutdown::Both) {
            if e.kind() != ErrorKind::NotConnected {
                debug!("SOCKET\tcould not shut down socket: {:?}", e);
            }
        }
    }
}
