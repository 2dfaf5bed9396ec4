use std::fmt;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use evbridge_frame::{FrameError, FrameReader, FrameWriter};
use evbridge_transport::BusStream;
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use crate::config::ClientConfig;
use crate::envelope::Envelope;
use crate::error::{BridgeError, Result};
use crate::keepalive::Keepalive;
use crate::receiver::ReceiveLoop;
use crate::registry::{HandlerId, HandlerRegistry};
use crate::state::{lock, ConnectionState, StateCell};

/// Callback for errors that arise outside any caller's stack: `err`
/// envelopes, unroutable or malformed frames, and the read failure that ends
/// the receive loop.
pub type ErrorHandler = Arc<dyn Fn(&BridgeError) + Send + Sync>;

/// Prefix of generated reply addresses.
pub const REPLY_ADDRESS_PREFIX: &str = "evbridge.reply";

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// State shared between the caller-facing client and its background threads.
pub(crate) struct Shared {
    pub(crate) config: ClientConfig,
    pub(crate) state: StateCell,
    pub(crate) registry: HandlerRegistry,
    pub(crate) last_pong: Mutex<Option<Instant>>,
    /// Held across a registry change and the `register`/`unregister` it
    /// triggers, so the bus sees notifications in registry order.
    notify: Mutex<()>,
    writer: Mutex<FrameWriter<BusStream>>,
    control: BusStream,
    on_error: ErrorHandler,
}

impl Shared {
    /// Serialize and send one envelope. The writer lock keeps frames from
    /// different threads from interleaving.
    pub(crate) fn write_envelope(&self, envelope: &Envelope) -> Result<()> {
        let state = self.state.get();
        if state != ConnectionState::Connected {
            return Err(BridgeError::NotConnected(state));
        }

        let payload = envelope.to_bytes()?;
        lock(&self.writer).send(&payload)?;
        trace!(
            kind = %envelope.kind,
            address = %envelope.address,
            len = payload.len(),
            "envelope sent"
        );
        Ok(())
    }

    pub(crate) fn report(&self, err: BridgeError) {
        if catch_unwind(AssertUnwindSafe(|| (self.on_error)(&err))).is_err() {
            error!(error = %err, "error handler panicked");
        }
    }

    pub(crate) fn last_pong(&self) -> Option<Instant> {
        *lock(&self.last_pong)
    }
}

/// Default error handler: log through `tracing`.
pub fn log_error(err: &BridgeError) {
    match err {
        BridgeError::Server(failure) => error!(
            address = ?failure.address,
            failure_code = ?failure.failure_code,
            message = %failure.message,
            "bus reported an error"
        ),
        BridgeError::Io(FrameError::ConnectionClosed) => info!("bus connection closed"),
        other => warn!(error = %other, "bridge error"),
    }
}

fn default_error_handler() -> ErrorHandler {
    Arc::new(log_error)
}

/// A connection to an event-bus TCP bridge.
///
/// Created by [`connect`](crate::connect) or
/// [`connect_with_config`](crate::connect_with_config). Inbound messages are
/// delivered only after [`Client::start`]. Dropping the client closes it.
pub struct Client {
    shared: Arc<Shared>,
    reader: Mutex<Option<FrameReader<BusStream>>>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
    keepalive: Mutex<Option<Keepalive>>,
    client_id: u64,
    reply_seq: AtomicU64,
}

impl Client {
    /// Wrap an already connected stream.
    ///
    /// The stream is split into a reader for the receive loop, a writer for
    /// outbound envelopes, and a control handle used to shut the socket down.
    pub fn from_stream(
        stream: BusStream,
        config: ClientConfig,
        error_handler: Option<ErrorHandler>,
    ) -> Result<Self> {
        let state = StateCell::new();
        state.set(ConnectionState::Connecting);
        Self::from_parts(stream, config, state, error_handler)
    }

    pub(crate) fn from_parts(
        stream: BusStream,
        config: ClientConfig,
        state: StateCell,
        error_handler: Option<ErrorHandler>,
    ) -> Result<Self> {
        let split = || -> Result<_> {
            let frame_config = config.frame_config();
            let control = stream.try_clone()?;
            let reader = FrameReader::with_config_bus(stream.try_clone()?, frame_config.clone())?;
            let writer = FrameWriter::with_config_bus(stream, frame_config)?;
            Ok((control, reader, writer))
        };
        let (control, reader, writer) = match split() {
            Ok(parts) => parts,
            Err(err) => {
                state.set(ConnectionState::NotConnected);
                return Err(err);
            }
        };

        state.set(ConnectionState::Connected);
        let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
        info!(
            client = client_id,
            peer = ?control.peer_addr().ok(),
            "connected to event bus bridge"
        );

        let shared = Arc::new(Shared {
            config,
            state,
            registry: HandlerRegistry::new(),
            last_pong: Mutex::new(None),
            notify: Mutex::new(()),
            writer: Mutex::new(writer),
            control,
            on_error: error_handler.unwrap_or_else(default_error_handler),
        });

        Ok(Self {
            shared,
            reader: Mutex::new(Some(reader)),
            receive_task: Mutex::new(None),
            keepalive: Mutex::new(None),
            client_id,
            reply_seq: AtomicU64::new(1),
        })
    }

    /// Launch the receive loop (and the keepalive, if configured).
    ///
    /// Calling `start` again while the loop exists is a no-op.
    pub fn start(&self) -> Result<()> {
        self.ensure_connected()?;
        let Some(reader) = lock(&self.reader).take() else {
            debug!("receive loop already started");
            return Ok(());
        };

        let receive = ReceiveLoop::new(reader, Arc::clone(&self.shared));
        let handle = thread::Builder::new()
            .name("evbridge-recv".to_string())
            .spawn(move || receive.run())
            .map_err(|err| BridgeError::Io(FrameError::Io(err)))?;
        *lock(&self.receive_task) = Some(handle);

        if let Some(interval) = self.shared.config.ping_interval {
            let keepalive = Keepalive::spawn(Arc::clone(&self.shared), interval)
                .map_err(|err| BridgeError::Io(FrameError::Io(err)))?;
            *lock(&self.keepalive) = Some(keepalive);
        }
        Ok(())
    }

    /// Point-to-point send. `reply_address`, when given, lets the receiver
    /// answer to an address this client has registered.
    pub fn send(
        &self,
        address: &str,
        reply_address: Option<&str>,
        headers: Value,
        body: Value,
    ) -> Result<()> {
        let envelope = Envelope::send(address, reply_address.map(str::to_string), headers, body);
        self.shared.write_envelope(&envelope)
    }

    /// Send and route the first answer to `handler`.
    ///
    /// The reply address is generated, handled locally, and never registered
    /// with the bus. The answer is either a `message` or a failure `err`
    /// envelope; its `type` field tells them apart. Without an answer within
    /// [`ClientConfig::reply_timeout`] the handler is dropped and the error
    /// handler receives [`BridgeError::ReplyTimeout`]. Returns the reply
    /// address.
    pub fn send_with_reply<F>(
        &self,
        address: &str,
        headers: Value,
        body: Value,
        handler: F,
    ) -> Result<String>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.ensure_connected()?;
        let reply_address = format!(
            "{REPLY_ADDRESS_PREFIX}.{}.{}.{}",
            std::process::id(),
            self.client_id,
            self.reply_seq.fetch_add(1, Ordering::Relaxed)
        );
        let registry = &self.shared.registry;
        let registration = match self.shared.config.reply_timeout {
            Some(timeout) => {
                registry.add_once_until(&reply_address, Instant::now() + timeout, handler)
            }
            None => registry.add_once(&reply_address, handler),
        };
        if let Err(err) = self.send(address, Some(&reply_address), headers, body) {
            self.shared
                .registry
                .remove_handler(&reply_address, registration.id);
            return Err(err);
        }
        Ok(reply_address)
    }

    /// Broadcast to every subscriber of `address`.
    pub fn publish(&self, address: &str, headers: Value, body: Value) -> Result<()> {
        self.shared
            .write_envelope(&Envelope::publish(address, headers, body))
    }

    /// Add a handler for `address`.
    ///
    /// The bus is told about the address only when this is its first local
    /// handler.
    pub fn register<F>(&self, address: &str, handler: F) -> Result<HandlerId>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.ensure_connected()?;
        let _notify = lock(&self.shared.notify);
        let registration = self.shared.registry.add(address, handler);
        if registration.first_for_address {
            debug!(address, "registering address with bus");
            if let Err(err) = self.shared.write_envelope(&Envelope::register(address)) {
                self.shared.registry.remove_handler(address, registration.id);
                return Err(err);
            }
        }
        Ok(registration.id)
    }

    /// Remove every handler for `address`.
    ///
    /// Sends `unregister` when handlers were removed. Returns whether any
    /// handler was registered.
    pub fn unregister(&self, address: &str) -> Result<bool> {
        self.ensure_connected()?;
        let _notify = lock(&self.shared.notify);
        let removal = self.shared.registry.remove(address);
        if !removal.removed_something() {
            return Ok(false);
        }
        debug!(address, removed = removal.removed, "unregistering address");
        self.shared
            .write_envelope(&Envelope::unregister(address))?;
        Ok(true)
    }

    /// Remove one handler. Sends `unregister` when it was the last one for
    /// the address. Returns whether the handler was registered.
    pub fn unregister_handler(&self, address: &str, id: HandlerId) -> Result<bool> {
        self.ensure_connected()?;
        let _notify = lock(&self.shared.notify);
        match self.shared.registry.remove_handler(address, id) {
            None => Ok(false),
            Some(0) => {
                debug!(address, handler = %id, "last handler removed, unregistering address");
                self.shared
                    .write_envelope(&Envelope::unregister(address))?;
                Ok(true)
            }
            Some(_) => Ok(true),
        }
    }

    /// Send a keepalive `ping`.
    pub fn ping(&self) -> Result<()> {
        self.shared.write_envelope(&Envelope::ping())
    }

    /// When the last `pong` arrived, if any.
    pub fn last_pong(&self) -> Option<Instant> {
        self.shared.last_pong()
    }

    /// Stop the receive loop and close the connection.
    ///
    /// Idempotent. Returns once the receive loop has exited, unless called
    /// from a handler running on the receive loop itself.
    pub fn close(&self) {
        let prev = self.shared.state.begin_close();
        if prev == ConnectionState::Connected {
            debug!(client = self.client_id, "closing");
        }

        // Shut down first: it fails any write parked on the writer lock,
        // which the keepalive thread may be waiting behind.
        if let Err(err) = self.shared.control.shutdown() {
            debug!(error = %err, "transport shutdown failed");
        }

        if let Some(keepalive) = lock(&self.keepalive).take() {
            keepalive.stop();
        }

        if let Some(handle) = lock(&self.receive_task).take() {
            if handle.thread().id() == thread::current().id() {
                debug!("close called from receive loop, not joining");
            } else if handle.join().is_err() {
                warn!("receive loop panicked");
            }
        }

        if self.shared.state.set(ConnectionState::Closed) != ConnectionState::Closed {
            info!(client = self.client_id, "connection closed");
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.shared.registry
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.shared.control.local_addr()?)
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.shared.control.peer_addr()?)
    }

    fn ensure_connected(&self) -> Result<()> {
        match self.shared.state.get() {
            ConnectionState::Connected => Ok(()),
            state => Err(BridgeError::NotConnected(state)),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.client_id)
            .field("addr", &self.shared.config.addr())
            .field("state", &self.state())
            .field("registry", &self.shared.registry)
            .finish()
    }
}
