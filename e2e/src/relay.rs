use std::{
    net::SocketAddr,
    sync::mpsc,
    thread::{self, JoinHandle},
    time::Duration,
};

use relay_command_lib::config::{
    Config, TargetAddress, DEFAULT_LOG_LEVEL, DEFAULT_LOG_TARGET, DEFAULT_MAX_CONNECTIONS,
};
use relay_lib::{
    metrics::with_local_drain,
    server::{Server, StopHandle},
};

/// What the relay thread recorded, read once its event loop stopped
#[derive(Debug, Default, Clone)]
pub struct RelayMetrics {
    pub names: Vec<String>,
    pub requests: i64,
    pub faults: i64,
    pub shutdowns: i64,
}

impl RelayMetrics {
    /// the metrics live in thread locals, this runs on the relay thread
    fn collect() -> Self {
        with_local_drain(|drain| RelayMetrics {
            names: drain.list_all_metric_names(),
            requests: drain.count("requests"),
            faults: drain.count("faults"),
            shutdowns: drain.count("shutdowns"),
        })
    }
}

/// A relay running its event loop on a dedicated thread
pub struct RelayHandle {
    pub address: SocketAddr,
    stop: StopHandle,
    thread: Option<JoinHandle<RelayMetrics>>,
}

impl RelayHandle {
    pub fn config(origin: SocketAddr, buffer_size: usize) -> Config {
        Config {
            listen_address: "127.0.0.1:0".parse().expect("valid listen address"),
            target: TargetAddress {
                host: origin.ip().to_string(),
                port: origin.port(),
            },
            buffer_size,
            idle_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(3),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            user_agent: Some("relay-e2e".to_owned()),
            log_level: DEFAULT_LOG_LEVEL.to_owned(),
            log_target: DEFAULT_LOG_TARGET.to_owned(),
        }
    }

    /// the server is built on its own thread, it only sends back its
    /// address and a way to stop it
    pub fn start(config: Config) -> Self {
        let (tx, rx) = mpsc::channel();
        let thread = thread::spawn(move || {
            let mut server = Server::new(config).expect("could not create the relay");
            let address = server.local_addr().expect("relay without address");
            tx.send((address, server.stop_handle()))
                .expect("could not hand over the relay address");
            if let Err(error) = server.run() {
                println!("relay stopped with an error: {error}");
            }
            RelayMetrics::collect()
        });
        let (address, stop) = rx.recv().expect("relay thread did not start");
        RelayHandle {
            address,
            stop,
            thread: Some(thread),
        }
    }

    /// stop the event loop and hand back what it recorded
    pub fn stop(&mut self) -> RelayMetrics {
        self.stop.stop();
        match self.thread.take() {
            Some(thread) => thread.join().expect("relay thread panicked"),
            None => RelayMetrics::default(),
        }
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        self.stop.stop();
    }
}
