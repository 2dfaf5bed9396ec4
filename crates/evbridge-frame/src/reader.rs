use std::io::{ErrorKind, Read};

use bytes::{Buf, BytesMut};
use evbridge_transport::{BusStream, TransportError};
use tracing::{trace, warn};

use crate::codec::{decode_frame, peek_length, Frame, FrameConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete frames.
/// Bytes already received survive a read timeout, so `read_frame` can simply
/// be called again.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
    /// Payload bytes of a rejected oversized frame still to be skipped.
    discard: usize,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
            discard: 0,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached between
    /// frames and `Err(FrameError::ShortRead)` when it is reached inside one.
    ///
    /// An oversized frame yields `Err(FrameError::PayloadTooLarge)` once; its
    /// payload is then skipped as it arrives and the following frame is
    /// returned by the next call.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            self.drain_discard();

            if self.discard == 0 {
                match decode_frame(&mut self.buf, self.config.max_frame_size) {
                    Ok(Some(frame)) => {
                        trace!(size = frame.len(), "frame received");
                        return Ok(frame);
                    }
                    Ok(None) => {}
                    Err(FrameError::PayloadTooLarge { size, max }) => {
                        warn!(size, max, "skipping oversized frame");
                        self.buf.advance(HEADER_SIZE);
                        self.discard = size;
                        self.drain_discard();
                        return Err(FrameError::PayloadTooLarge { size, max });
                    }
                    Err(err) => return Err(err),
                }
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(self.eof_error());
            }

            let skip = self.discard.min(read);
            self.discard -= skip;
            self.buf.extend_from_slice(&chunk[skip..read]);
        }
    }

    fn drain_discard(&mut self) {
        if self.discard == 0 {
            return;
        }
        let n = self.discard.min(self.buf.len());
        self.buf.advance(n);
        self.discard -= n;
    }

    fn eof_error(&self) -> FrameError {
        if self.discard > 0 {
            return FrameError::ShortRead {
                expected: self.discard,
                received: 0,
            };
        }
        match peek_length(&self.buf) {
            _ if self.buf.is_empty() => FrameError::ConnectionClosed,
            Some(len) => FrameError::ShortRead {
                expected: len,
                received: self.buf.len() - HEADER_SIZE,
            },
            None => FrameError::ShortRead {
                expected: HEADER_SIZE,
                received: self.buf.len(),
            },
        }
    }

    /// Number of bytes received but not yet returned as a frame.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum frame size for subsequent frame decoding.
    pub fn set_max_frame_size(&mut self, max_frame_size: usize) {
        self.config.max_frame_size = max_frame_size;
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<BusStream> {
    /// Create a frame reader for `BusStream` and apply read timeout from config.
    pub fn with_config_bus(inner: BusStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: TransportError) -> FrameError {
    match err {
        TransportError::Io(io) | TransportError::Accept(io) => FrameError::Io(io),
        TransportError::Bind { source, .. } | TransportError::Connect { source, .. } => {
            FrameError::Io(source)
        }
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
