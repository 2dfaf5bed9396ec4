//! `tokio_util::codec` adapter for the bridge wire format.
//!
//! Same framing as [`crate::FrameReader`]/[`crate::FrameWriter`], for callers
//! that drive the connection from a tokio runtime with `Framed`.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_frame, encode_frame, peek_length, DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE};
use crate::error::FrameError;

/// Length-prefixed frame codec: items are frame payloads.
///
/// An oversized length prefix is reported once and its payload skipped,
/// as the blocking reader does.
#[derive(Debug, Clone)]
pub struct BridgeCodec {
    max_frame_size: usize,
    discard: usize,
}

impl BridgeCodec {
    /// Codec with the default 16 MiB ceiling.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Codec with an explicit ceiling.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            discard: 0,
        }
    }

    /// Configured maximum payload size.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for BridgeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for BridgeCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.discard > 0 {
            let n = self.discard.min(src.len());
            src.advance(n);
            self.discard -= n;
            if self.discard > 0 {
                return Ok(None);
            }
        }

        match decode_frame(src, self.max_frame_size) {
            Ok(frame) => Ok(frame.map(|frame| frame.payload)),
            Err(FrameError::PayloadTooLarge { size, max }) => {
                src.advance(HEADER_SIZE);
                self.discard = size;
                Err(FrameError::PayloadTooLarge { size, max })
            }
            Err(err) => Err(err),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if self.discard > 0 {
            return Err(FrameError::ShortRead {
                expected: self.discard,
                received: 0,
            });
        }
        if src.is_empty() {
            return Ok(None);
        }
        Err(match peek_length(src) {
            Some(len) => FrameError::ShortRead {
                expected: len,
                received: src.len() - HEADER_SIZE,
            },
            None => FrameError::ShortRead {
                expected: HEADER_SIZE,
                received: src.len(),
            },
        })
    }
}

impl Encoder<Bytes> for BridgeCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > self.max_frame_size {
            return Err(FrameError::PayloadTooLarge {
                size: item.len(),
                max: self.max_frame_size,
            });
        }
        encode_frame(&item, dst)
    }
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;

    #[tokio::test]
    async fn framed_roundtrip_over_duplex() {
        let (client, server) = tokio::io::duplex(64);
        let mut sink = FramedWrite::new(client, BridgeCodec::new());
        let mut stream = FramedRead::new(server, BridgeCodec::new());

        let writer = tokio::spawn(async move {
            sink.send(Bytes::from_static(br#"{"type":"ping"}"#))
                .await
                .unwrap();
            sink.send(Bytes::from(vec![b'x'; 1000])).await.unwrap();
        });

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.as_ref(), br#"{"type":"ping"}"#);
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.len(), 1000);

        writer.await.unwrap();
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn decoder_skips_oversized_payload() {
        let mut codec = BridgeCodec::with_max_frame_size(8);
        let mut src = BytesMut::new();
        src.put_u32(12);
        src.put_slice(b"0123456789ab");
        encode_frame(b"next", &mut src).unwrap();

        let err = codec.decode(&mut src).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 12, max: 8 }));

        let payload = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(payload.as_ref(), b"next");
        assert!(src.is_empty());
    }

    #[test]
    fn encoder_rejects_oversized_payload() {
        let mut codec = BridgeCodec::with_max_frame_size(2);
        let mut dst = BytesMut::new();
        let err = codec
            .encode(Bytes::from_static(b"abc"), &mut dst)
            .unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
        assert!(dst.is_empty());
    }

    #[tokio::test]
    async fn truncated_stream_reports_short_read() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut stream = FramedRead::new(server, BridgeCodec::new());

        client.write_all(&[0, 0, 0, 10, b'a', b'b']).await.unwrap();
        drop(client);

        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            FrameError::ShortRead {
                expected: 10,
                received: 2
            }
        ));
    }
}
