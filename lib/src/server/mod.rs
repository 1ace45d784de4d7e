//! Single threaded mio reactor relaying every accepted client to the
//! configured origin
//!
//! Each accepted client gets a [`Session`] holding the client socket, a
//! non-blocking connection to the origin and the relay legs. Both sockets
//! of a session are registered in the same poll, with tokens derived from
//! the session slab key.
pub mod connection;
pub mod session;

use std::{
    io::ErrorKind,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use mio::{
    net::{TcpListener, TcpStream},
    Events, Interest, Poll, Token, Waker,
};
use relay_command_lib::config::{Config, ConfigError};
use slab::Slab;

use crate::{
    metrics::with_local_drain,
    relay::RelaySettings,
    server::session::{Session, SessionResult},
    Leg, Ready,
};

const LISTENER: Token = Token(usize::MAX);
const WAKER: Token = Token(usize::MAX - 1);

/// resolution of the idle and connect timeouts
const POLL_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("could not create the event loop: {0}")]
    Poll(std::io::Error),
    #[error("could not listen on {address}: {error}")]
    Bind {
        address: SocketAddr,
        error: std::io::Error,
    },
    #[error("could not register socket: {0}")]
    Register(std::io::Error),
    #[error("could not get the listener address: {0}")]
    LocalAddress(std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

fn frontend_token(key: usize) -> Token {
    Token(key * 2)
}

fn backend_token(key: usize) -> Token {
    Token(key * 2 + 1)
}

fn session_key(token: Token) -> usize {
    token.0 / 2
}

/// Stops a running [`Server`] from another thread
#[derive(Clone)]
pub struct StopHandle {
    stop: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Err(error) = self.waker.wake() {
            error!("could not wake the event loop up: {}", error);
        }
    }
}

pub struct Server {
    poll: Poll,
    listener: TcpListener,
    sessions: Slab<Session>,
    config: Config,
    origin_address: SocketAddr,
    settings: Arc<RelaySettings>,
    stop: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl Server {
    pub fn new(config: Config) -> Result<Server, ServerError> {
        let origin_address = config.target.resolve()?;

        let poll = Poll::new().map_err(ServerError::Poll)?;
        let mut listener =
            TcpListener::bind(config.listen_address).map_err(|error| ServerError::Bind {
                address: config.listen_address,
                error,
            })?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .map_err(ServerError::Register)?;
        let waker = Waker::new(poll.registry(), WAKER).map_err(ServerError::Register)?;

        Ok(Server {
            poll,
            listener,
            sessions: Slab::with_capacity(config.max_connections),
            settings: Arc::new(RelaySettings::from_config(&config)),
            config,
            origin_address,
            stop: Arc::new(AtomicBool::new(false)),
            waker: Arc::new(waker),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::LocalAddress)
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop: self.stop.clone(),
            waker: self.waker.clone(),
        }
    }

    /// run the event loop until [`StopHandle::stop`] is called
    pub fn run(&mut self) -> Result<(), ServerError> {
        let mut events = Events::with_capacity(1024);
        info!(
            "relay listening on {}, forwarding to {} ({})",
            self.local_addr()?,
            self.config.target,
            self.origin_address
        );

        while !self.stop.load(Ordering::SeqCst) {
            if let Err(error) = self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if error.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(ServerError::Poll(error));
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept(),
                    WAKER => {}
                    token => self.ready(token, Ready::from(event)),
                }
            }
            self.check_timeouts();
        }

        info!("relay stopping, closing {} sessions", self.sessions.len());
        let keys: Vec<usize> = self.sessions.iter().map(|(key, _)| key).collect();
        for key in keys {
            self.close_session(key);
        }
        with_local_drain(|drain| info!("metrics summary:\n{}", drain));
        Ok(())
    }

    fn accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((socket, address)) => {
                    if self.sessions.len() >= self.config.max_connections {
                        warn!(
                            "max_connections ({}) reached, refusing {}",
                            self.config.max_connections, address
                        );
                        incr!("accept.refused");
                        continue;
                    }
                    self.create_session(socket, address);
                }
                Err(error) if error.kind() == ErrorKind::WouldBlock => break,
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error) => {
                    error!("could not accept a connection: {}", error);
                    break;
                }
            }
        }
    }

    fn create_session(&mut self, mut frontend: TcpStream, address: SocketAddr) {
        let mut backend = match TcpStream::connect(self.origin_address) {
            Ok(socket) => socket,
            Err(error) => {
                error!(
                    "could not connect to the origin {} for {}: {}",
                    self.origin_address, address, error
                );
                incr!("faults", Leg::Origin.as_str());
                return;
            }
        };

        let entry = self.sessions.vacant_entry();
        let key = entry.key();
        let registry = self.poll.registry();
        let registered = registry
            .register(
                &mut frontend,
                frontend_token(key),
                Interest::READABLE | Interest::WRITABLE,
            )
            .and_then(|()| {
                registry.register(
                    &mut backend,
                    backend_token(key),
                    Interest::READABLE | Interest::WRITABLE,
                )
            });
        if let Err(error) = registered {
            error!("could not register the sockets of {}: {}", address, error);
            return;
        }

        let mut session = Session::new(
            frontend,
            frontend_token(key),
            backend,
            backend_token(key),
            self.settings.clone(),
            &self.config,
        );
        debug!("accepted {} in session {}", address, key);
        incr!("accepted");
        gauge_add!("tasks.active", 1);

        let result = session.start();
        entry.insert(session);
        if result == SessionResult::Close {
            self.close_session(key);
        }
    }

    fn ready(&mut self, token: Token, events: Ready) {
        let key = session_key(token);
        let result = match self.sessions.get_mut(key) {
            Some(session) => {
                session.update_readiness(token, events);
                session.ready()
            }
            None => return,
        };
        if result == SessionResult::Close {
            self.close_session(key);
        }
    }

    fn check_timeouts(&mut self) {
        let now = Instant::now();
        let expired: Vec<usize> = self
            .sessions
            .iter_mut()
            .filter_map(|(key, session)| (session.timeout(now) == SessionResult::Close).then_some(key))
            .collect();
        for key in expired {
            self.close_session(key);
        }
    }

    fn close_session(&mut self, key: usize) {
        if !self.sessions.contains(key) {
            return;
        }
        let mut session = self.sessions.remove(key);
        session.close();
        session.deregister(self.poll.registry());
        gauge_add!("tasks.active", -1);
        debug!("session {} closed", key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_map_back_to_their_session() {
        for key in [0, 1, 7, 1024] {
            assert_eq!(session_key(frontend_token(key)), key);
            assert_eq!(session_key(backend_token(key)), key);
            assert_ne!(frontend_token(key), backend_token(key));
            assert_ne!(frontend_token(key), LISTENER);
            assert_ne!(backend_token(key), WAKER);
        }
    }
}
