use std::sync::Arc;
use std::time::Instant;

use evbridge_frame::{FrameError, FrameReader};
use evbridge_transport::BusStream;
use tracing::{debug, trace, warn};

use crate::client::Shared;
use crate::envelope::{EnvelopeType, InboundEnvelope};
use crate::error::{BridgeError, ProtocolError};
use crate::state::{lock, ConnectionState};

/// Background loop that reads frames and routes envelopes.
///
/// The loop re-checks the connection state at least once per receive
/// timeout and exits as soon as the client leaves `Connected`.
pub(crate) struct ReceiveLoop {
    reader: FrameReader<BusStream>,
    shared: Arc<Shared>,
}

impl ReceiveLoop {
    pub(crate) fn new(reader: FrameReader<BusStream>, shared: Arc<Shared>) -> Self {
        Self { reader, shared }
    }

    pub(crate) fn run(mut self) {
        debug!("receive loop started");
        loop {
            let state = self.shared.state.get();
            if state != ConnectionState::Connected {
                debug!(%state, "receive loop stopping");
                break;
            }
            self.expire_replies();

            match self.reader.read_frame() {
                Ok(frame) => self.handle_frame(&frame.payload),
                Err(err) if err.is_timeout() => continue,
                Err(FrameError::PayloadTooLarge { size, max }) => {
                    self.shared
                        .report(ProtocolError::OversizedFrame { size, max }.into());
                }
                Err(err) => {
                    self.read_failed(err);
                    break;
                }
            }
        }
    }

    fn handle_frame(&self, payload: &[u8]) {
        let inbound = match InboundEnvelope::parse(payload) {
            Ok(inbound) => inbound,
            Err(err) => {
                debug!(error = %err, len = payload.len(), "dropping malformed envelope");
                self.shared.report(err.into());
                return;
            }
        };

        let envelope = &inbound.envelope;
        trace!(kind = %envelope.kind, address = %envelope.address, "envelope received");
        match envelope.kind {
            EnvelopeType::Message if envelope.address.is_empty() => {
                self.shared.report(
                    ProtocolError::MalformedEnvelope("message without address".to_string()).into(),
                );
            }
            EnvelopeType::Message => {
                let text = inbound.to_pretty_string();
                self.shared.registry.dispatch(&envelope.address, &text);
            }
            EnvelopeType::Err => {
                // Failed replies go to the handlers waiting on that address.
                let delivered = if envelope.address.is_empty() {
                    0
                } else {
                    let text = inbound.to_pretty_string();
                    self.shared.registry.dispatch(&envelope.address, &text)
                };
                if delivered == 0 {
                    self.shared.report(envelope.server_error().into());
                }
            }
            EnvelopeType::Pong => {
                *lock(&self.shared.last_pong) = Some(Instant::now());
            }
            other => {
                debug!(kind = %other, "unexpected envelope type from bus");
                self.shared.report(BridgeError::UnexpectedEnvelope(other));
            }
        }
    }

    fn expire_replies(&self) {
        for address in self.shared.registry.expire(Instant::now()) {
            debug!(%address, "reply handler expired");
            self.shared.report(BridgeError::ReplyTimeout { address });
        }
    }

    fn read_failed(&self, err: FrameError) {
        match self
            .shared
            .state
            .transition(ConnectionState::Connected, ConnectionState::Closed)
        {
            Ok(()) => {
                if matches!(err, FrameError::ConnectionClosed) {
                    debug!("bus closed the connection");
                } else {
                    warn!(error = %err, "receive failed, connection closed");
                }
                self.shared.report(err.into());
            }
            Err(state) => debug!(%state, error = %err, "read ended during close"),
        }
    }
}
