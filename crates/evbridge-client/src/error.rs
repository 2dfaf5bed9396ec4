use evbridge_frame::FrameError;
use evbridge_transport::TransportError;

use crate::envelope::EnvelopeType;
use crate::state::ConnectionState;

/// A frame or envelope the client could not make sense of.
///
/// Protocol errors are confined to a single frame: the receive loop reports
/// them and keeps reading.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The length prefix exceeded the configured maximum frame size.
    #[error("oversized frame ({size} bytes, max {max})")]
    OversizedFrame { size: usize, max: usize },

    /// The payload is not JSON, or its `type` is missing or unknown.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}

/// An `err` envelope sent by the bus.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ServerError {
    /// Address the failure relates to, when the bus names one.
    pub address: Option<String>,
    /// `failureCode` field, when present.
    pub failure_code: Option<i64>,
    /// Human readable failure text.
    pub message: String,
}

/// Errors surfaced by the bridge client.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Opening the connection failed.
    #[error("connection error: {0}")]
    Connection(#[from] TransportError),

    /// A frame or envelope violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Reading or writing the transport failed.
    #[error("I/O error: {0}")]
    Io(#[source] FrameError),

    /// The bus reported a failure.
    #[error("server error: {0}")]
    Server(#[from] ServerError),

    /// The operation needs a connected client.
    #[error("not connected (state {0})")]
    NotConnected(ConnectionState),

    /// No reply arrived at `address` before the reply timeout.
    #[error("no reply at {address} within the reply timeout")]
    ReplyTimeout { address: String },

    /// The bus sent an envelope type a client never expects to receive.
    #[error("unexpected envelope type '{0}'")]
    UnexpectedEnvelope(EnvelopeType),

    /// Outbound envelope serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<FrameError> for BridgeError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::PayloadTooLarge { size, max } => {
                BridgeError::Protocol(ProtocolError::OversizedFrame { size, max })
            }
            other => BridgeError::Io(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
