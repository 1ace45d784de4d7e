
use relay_command_lib::logging::setup_default_logging;

use crate::{
    mock::{
        aggregator::Aggregator,
        async_backend::{BackendHandle, RequestHandler},
        client::Client,
    },
    relay::RelayHandle,
};

/// Start a mock origin served by `handler` and a relay forwarding to it,
/// then connect a client to the relay
pub fn setup_test<A: Aggregator + Send + Sync + 'static>(
    name: &str,
    handler: RequestHandler<A>,
    buffer_size: usize,
) -> (RelayHandle, BackendHandle<A>, Client) {
    setup_default_logging("info", "E2E");

    let backend = BackendHandle::spawn_detached_backend(format!("{name}-ORIGIN"), handler);
    let relay = RelayHandle::start(RelayHandle::config(backend.address, buffer_size));
    let mut client = Client::new(format!("{name}-CLIENT"), relay.address);
    client.connect();
    (relay, backend, client)
}
