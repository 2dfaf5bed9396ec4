//! Client for an event-bus TCP bridge.
//!
//! evbridge speaks the bridge's wire protocol: JSON envelopes in 4-byte
//! big-endian length-prefixed frames over one TCP connection.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP connect/listen and the stream type
//! - [`frame`]: length-prefixed framing (blocking, plus a tokio codec behind `async`)
//! - [`client`]: envelopes, handler registry, receive loop, and the [`Client`] facade
//!
//! # Example
//!
//! ```no_run
//! use serde_json::json;
//!
//! let client = evbridge::connect("127.0.0.1", 7000)?;
//! client.register("svc.updates", |message| println!("{message}"))?;
//! client.start()?;
//! client.send("svc.echo", None, json!({}), json!({"x": 1}))?;
//! client.close();
//! # Ok::<(), evbridge::BridgeError>(())
//! ```

/// Re-export transport types.
pub mod transport {
    pub use evbridge_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use evbridge_frame::*;
}

/// Re-export client types.
pub mod client {
    pub use evbridge_client::*;
}

pub use evbridge_client::{
    connect, connect_with_config, BridgeError, Client, ClientConfig, ConnectionState,
    ErrorHandler, HandlerId, Result,
};
