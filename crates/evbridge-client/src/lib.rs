//! Client for an event-bus TCP bridge.
//!
//! Every message is a JSON envelope carried in a length-prefixed frame. A
//! [`Client`] sends `send`/`publish` envelopes, keeps the bus informed of the
//! addresses it has handlers for, and runs a background receive loop that
//! routes inbound `message` envelopes to those handlers.

mod client;
mod config;
mod connector;
mod envelope;
mod error;
mod keepalive;
mod receiver;
mod registry;
mod state;

pub use client::{log_error, Client, ErrorHandler, REPLY_ADDRESS_PREFIX};
pub use config::{
    ClientConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_REPLY_TIMEOUT,
    DEFAULT_TIMEOUT,
};
pub use connector::{connect, connect_with_config};
pub use envelope::{Envelope, EnvelopeType, InboundEnvelope};
pub use error::{BridgeError, ProtocolError, Result, ServerError};
pub use registry::{Handler, HandlerId, HandlerRegistry, Registration, Removal};
pub use state::{ConnectionState, StateCell};
