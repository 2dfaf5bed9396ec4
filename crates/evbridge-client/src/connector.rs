use evbridge_transport::TcpConnector;
use tracing::{debug, warn};

use crate::client::{Client, ErrorHandler};
use crate::config::ClientConfig;
use crate::error::{BridgeError, Result};
use crate::state::{ConnectionState, StateCell};

/// Connect to a bridge with default settings.
pub fn connect(host: &str, port: u16) -> Result<Client> {
    connect_with_config(
        ClientConfig::default().with_host(host).with_port(port),
        None,
    )
}

/// Connect with explicit configuration.
///
/// `error_handler` receives asynchronous errors; `None` logs them.
pub fn connect_with_config(
    config: ClientConfig,
    error_handler: Option<ErrorHandler>,
) -> Result<Client> {
    let state = StateCell::new();
    state.set(ConnectionState::Connecting);
    debug!(addr = %config.addr(), timeout = ?config.connect_timeout, "connecting");

    let stream = match TcpConnector::connect(&config.host, config.port, config.connect_timeout) {
        Ok(stream) => stream,
        Err(err) => {
            state.set(ConnectionState::NotConnected);
            warn!(addr = %config.addr(), error = %err, "connect failed");
            return Err(BridgeError::Connection(err));
        }
    };

    Client::from_parts(stream, config, state, error_handler)
}
