//! Length-prefixed framing for the event bus bridge protocol.
//!
//! Every envelope travels as one frame:
//! - A 4-byte big-endian payload length
//! - The payload (UTF-8 JSON)
//!
//! Lengths are checked against a ceiling before anything is allocated.
//! Callers always get complete frames.

pub mod codec;
pub mod error;
pub mod reader;
#[cfg(feature = "async")]
pub mod tokio_codec;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
#[cfg(feature = "async")]
pub use tokio_codec::BridgeCodec;
pub use writer::FrameWriter;
