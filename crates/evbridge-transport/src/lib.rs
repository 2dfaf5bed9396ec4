//! TCP transport for the event bus bridge protocol.
//!
//! This is the lowest layer of evbridge. It opens the single TCP connection
//! a client talks over and hands out [`BusStream`] handles onto it. Framing
//! and message semantics live in the layers above.

pub mod error;
pub mod stream;
pub mod tcp;

pub use error::{Result, TransportError};
pub use stream::BusStream;
pub use tcp::{BridgeListener, TcpConnector};
