use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProtocolError, ServerError};

/// The `type` field of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeType {
    /// Point-to-point send (outbound).
    Send,
    /// Broadcast to every subscriber of an address (outbound).
    Publish,
    /// Subscribe this connection to an address (outbound).
    Register,
    /// Cancel a subscription (outbound).
    Unregister,
    /// Inbound delivery for a registered address.
    Message,
    /// Inbound failure report.
    Err,
    /// Keepalive request (outbound).
    Ping,
    /// Keepalive answer (inbound).
    Pong,
}

impl EnvelopeType {
    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeType::Send => "send",
            EnvelopeType::Publish => "publish",
            EnvelopeType::Register => "register",
            EnvelopeType::Unregister => "unregister",
            EnvelopeType::Message => "message",
            EnvelopeType::Err => "err",
            EnvelopeType::Ping => "ping",
            EnvelopeType::Pong => "pong",
        }
    }
}

impl fmt::Display for EnvelopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One JSON message on the bridge.
///
/// Empty addresses and absent optional fields are omitted on the wire;
/// `headers` and `body` are always written, as `null` when unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeType,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,

    #[serde(
        rename = "replyAddress",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub reply_address: Option<String>,

    #[serde(default)]
    pub headers: Value,

    #[serde(default)]
    pub body: Value,

    #[serde(
        rename = "failureCode",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub failure_code: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Envelope {
    fn bare(kind: EnvelopeType, address: impl Into<String>) -> Self {
        Self {
            kind,
            address: address.into(),
            reply_address: None,
            headers: Value::Null,
            body: Value::Null,
            failure_code: None,
            message: None,
        }
    }

    pub fn send(
        address: impl Into<String>,
        reply_address: Option<String>,
        headers: Value,
        body: Value,
    ) -> Self {
        Self {
            reply_address,
            headers,
            body,
            ..Self::bare(EnvelopeType::Send, address)
        }
    }

    pub fn publish(address: impl Into<String>, headers: Value, body: Value) -> Self {
        Self {
            headers,
            body,
            ..Self::bare(EnvelopeType::Publish, address)
        }
    }

    pub fn register(address: impl Into<String>) -> Self {
        Self::bare(EnvelopeType::Register, address)
    }

    pub fn unregister(address: impl Into<String>) -> Self {
        Self::bare(EnvelopeType::Unregister, address)
    }

    pub fn ping() -> Self {
        Self::bare(EnvelopeType::Ping, "")
    }

    /// Inbound delivery, as the bus would send it.
    pub fn message(address: impl Into<String>, headers: Value, body: Value) -> Self {
        Self {
            headers,
            body,
            ..Self::bare(EnvelopeType::Message, address)
        }
    }

    /// Inbound failure report, as the bus would send it.
    pub fn err(failure_code: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            failure_code,
            message: Some(message.into()),
            ..Self::bare(EnvelopeType::Err, "")
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == EnvelopeType::Err
    }

    /// Serialize to the compact JSON carried in a frame payload.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(malformed)
    }

    /// Failure details of an `err` envelope.
    ///
    /// The text comes from `message`, falling back to a string `body` and
    /// then to the body's JSON text.
    pub fn server_error(&self) -> ServerError {
        let message = match (&self.message, &self.body) {
            (Some(message), _) => message.clone(),
            (None, Value::String(text)) => text.clone(),
            (None, Value::Null) => "unspecified bus failure".to_string(),
            (None, body) => body.to_string(),
        };
        ServerError {
            address: (!self.address.is_empty()).then(|| self.address.clone()),
            failure_code: self.failure_code,
            message,
        }
    }
}

/// A received envelope along with the full JSON object it was parsed from.
///
/// Handlers see the whole object, including fields the typed envelope does
/// not model.
#[derive(Debug, Clone)]
pub struct InboundEnvelope {
    pub envelope: Envelope,
    raw: Value,
}

impl InboundEnvelope {
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let raw: Value = serde_json::from_slice(bytes).map_err(malformed)?;
        let envelope = Envelope::deserialize(&raw).map_err(malformed)?;
        Ok(Self { envelope, raw })
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// The received object as indented JSON text.
    pub fn to_pretty_string(&self) -> String {
        serde_json::to_string_pretty(&self.raw).unwrap_or_else(|_| self.raw.to_string())
    }
}

fn malformed(err: serde_json::Error) -> ProtocolError {
    ProtocolError::MalformedEnvelope(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn to_value(envelope: &Envelope) -> Value {
        serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap()
    }

    #[test]
    fn send_carries_every_field() {
        let envelope = Envelope::send(
            "svc.echo",
            Some("reply.1".to_string()),
            json!({"h": "v"}),
            json!({"x": 1}),
        );
        assert_eq!(
            to_value(&envelope),
            json!({
                "type": "send",
                "address": "svc.echo",
                "replyAddress": "reply.1",
                "headers": {"h": "v"},
                "body": {"x": 1}
            })
        );
    }

    #[test]
    fn send_without_reply_omits_reply_address() {
        let envelope = Envelope::send("svc.echo", None, json!({}), json!("hi"));
        let value = to_value(&envelope);
        assert!(value.get("replyAddress").is_none());
        assert_eq!(value["type"], "send");
        assert_eq!(value["body"], "hi");
    }

    #[test]
    fn publish_has_no_reply_address() {
        let value = to_value(&Envelope::publish("news", json!({}), json!([1, 2])));
        assert_eq!(value["type"], "publish");
        assert_eq!(value["address"], "news");
        assert!(value.get("replyAddress").is_none());
    }

    #[test]
    fn register_writes_null_headers_and_body() {
        let value = to_value(&Envelope::register("svc.in"));
        assert_eq!(
            value,
            json!({"type": "register", "address": "svc.in", "headers": null, "body": null})
        );
        assert_eq!(to_value(&Envelope::unregister("svc.in"))["type"], "unregister");
    }

    #[test]
    fn ping_omits_address() {
        let value = to_value(&Envelope::ping());
        assert_eq!(value["type"], "ping");
        assert!(value.get("address").is_none());
    }

    #[test]
    fn parses_message_with_defaults() {
        let envelope =
            Envelope::from_bytes(br#"{"type":"message","address":"svc.in"}"#).unwrap();
        assert_eq!(envelope.kind, EnvelopeType::Message);
        assert_eq!(envelope.address, "svc.in");
        assert_eq!(envelope.headers, Value::Null);
        assert_eq!(envelope.body, Value::Null);
        assert!(!envelope.is_error());
    }

    #[test]
    fn parses_err_without_address() {
        let envelope =
            Envelope::from_bytes(br#"{"type":"err","failureCode":-1,"message":"access_denied"}"#)
                .unwrap();
        assert!(envelope.is_error());
        assert_eq!(envelope.address, "");

        let failure = envelope.server_error();
        assert_eq!(failure.address, None);
        assert_eq!(failure.failure_code, Some(-1));
        assert_eq!(failure.message, "access_denied");
    }

    #[test]
    fn server_error_falls_back_to_body() {
        let envelope = Envelope::from_bytes(br#"{"type":"err","body":"boom"}"#).unwrap();
        assert_eq!(envelope.server_error().message, "boom");

        let envelope =
            Envelope::from_bytes(br#"{"type":"err","address":"a","body":{"code":3}}"#).unwrap();
        let failure = envelope.server_error();
        assert_eq!(failure.address.as_deref(), Some("a"));
        assert_eq!(failure.message, r#"{"code":3}"#);
    }

    #[test]
    fn missing_type_is_malformed() {
        let err = Envelope::from_bytes(br#"{"address":"a"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedEnvelope(_)));
    }

    #[test]
    fn unknown_type_is_malformed() {
        let err = Envelope::from_bytes(br#"{"type":"shout","address":"a"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedEnvelope(_)));
    }

    #[test]
    fn invalid_json_is_malformed() {
        assert!(matches!(
            InboundEnvelope::parse(b"{not json"),
            Err(ProtocolError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            InboundEnvelope::parse(b"[1,2,3]"),
            Err(ProtocolError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn inbound_keeps_unmodelled_fields() {
        let inbound = InboundEnvelope::parse(
            br#"{"type":"message","address":"svc.in","body":{"n":7},"send":true}"#,
        )
        .unwrap();
        assert_eq!(inbound.envelope.body, json!({"n": 7}));
        assert_eq!(inbound.raw()["send"], json!(true));

        let text = inbound.to_pretty_string();
        assert!(text.contains('\n'));
        let reparsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(&reparsed, inbound.raw());
    }

    #[test]
    fn type_names_round_trip_through_display() {
        for kind in [
            EnvelopeType::Send,
            EnvelopeType::Publish,
            EnvelopeType::Register,
            EnvelopeType::Unregister,
            EnvelopeType::Message,
            EnvelopeType::Err,
            EnvelopeType::Ping,
            EnvelopeType::Pong,
        ] {
            let encoded = serde_json::to_value(kind).unwrap();
            assert_eq!(encoded, Value::String(kind.to_string()));
        }
    }
}
