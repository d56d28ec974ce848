//! Envelope codec for the duplex protocol.
//!
//! One JSON object per message:
//!
//! ```text
//! {"kind":"call","operation":"authenticate","correlationId":"evt-42","payload":"{\"token\":\"12345\"}"}
//! ```
//!
//! The payload is itself a JSON document carried as a string. This layer never
//! looks inside it; [`decode_payload`] and [`encode_payload`] are the separate,
//! nested step.

use crate::error::{ParseError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Direction of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    Call,
    Response,
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::Call => "call",
            EnvelopeKind::Response => "response",
        }
    }
}

impl FromStr for EnvelopeKind {
    type Err = ParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "call" => Ok(EnvelopeKind::Call),
            "response" => Ok(EnvelopeKind::Response),
            other => Err(ParseError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The unit of wire exchange.
///
/// Field order is the serialization order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub operation: String,
    #[serde(rename = "correlationId")]
    pub correlation_id: String,
    pub payload: String,
}

/// Wire shape before the kind is validated.
#[derive(Deserialize)]
struct RawEnvelope {
    kind: String,
    operation: String,
    #[serde(rename = "correlationId")]
    correlation_id: String,
    payload: String,
}

impl Envelope {
    /// Create a call envelope.
    pub fn call(
        operation: impl Into<String>,
        correlation_id: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            kind: EnvelopeKind::Call,
            operation: operation.into(),
            correlation_id: correlation_id.into(),
            payload: payload.into(),
        }
    }

    /// Create a response envelope.
    pub fn response(
        operation: impl Into<String>,
        correlation_id: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            kind: EnvelopeKind::Response,
            operation: operation.into(),
            correlation_id: correlation_id.into(),
            payload: payload.into(),
        }
    }

    /// Build the response to this call, keeping operation and correlation id.
    pub fn reply(&self, payload: impl Into<String>) -> Self {
        Self::response(self.operation.clone(), self.correlation_id.clone(), payload)
    }
}

/// Serialize an envelope to its wire form.
pub fn serialize(envelope: &Envelope) -> Result<String> {
    Ok(serde_json::to_string(envelope)?)
}

/// Parse a raw wire message.
///
/// Rejects malformed JSON, missing or mistyped fields, and any `kind` other
/// than `call` or `response`.
pub fn parse(raw: &[u8]) -> std::result::Result<Envelope, ParseError> {
    let raw: RawEnvelope = serde_json::from_slice(raw).map_err(ParseError::Envelope)?;
    let kind: EnvelopeKind = raw.kind.parse()?;

    Ok(Envelope {
        kind,
        operation: raw.operation,
        correlation_id: raw.correlation_id,
        payload: raw.payload,
    })
}

/// Encode a typed value as an envelope payload.
pub fn encode_payload<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Decode an envelope payload into a JSON value.
pub fn decode_payload(payload: &str) -> std::result::Result<Value, ParseError> {
    serde_json::from_str(payload).map_err(ParseError::Payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_serialization_is_exact() {
        let envelope = Envelope::call("authenticate", "evt-42", r#"{"token":"12345"}"#);
        let raw = serialize(&envelope).unwrap();
        assert_eq!(
            raw,
            r#"{"kind":"call","operation":"authenticate","correlationId":"evt-42","payload":"{\"token\":\"12345\"}"}"#
        );
    }

    #[test]
    fn test_parse_response() {
        let raw = r#"{"kind":"response","operation":"authenticate","correlationId":"evt-42","payload":"{\"code\":200,\"message\":\"Token is valid!\"}"}"#;
        let envelope = parse(raw.as_bytes()).unwrap();

        assert_eq!(envelope.kind, EnvelopeKind::Response);
        assert_eq!(envelope.operation, "authenticate");
        assert_eq!(envelope.correlation_id, "evt-42");
        assert_eq!(
            decode_payload(&envelope.payload).unwrap(),
            json!({"code": 200, "message": "Token is valid!"})
        );
    }

    #[test]
    fn test_parse_rejects_unknown_kind() {
        let raw = r#"{"kind":"event","operation":"x","correlationId":"evt-1","payload":"{}"}"#;
        match parse(raw.as_bytes()) {
            Err(ParseError::UnknownKind(kind)) => assert_eq!(kind, "event"),
            other => panic!("Expected UnknownKind, got: {:?}", other),
        }
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("call".parse::<EnvelopeKind>().unwrap(), EnvelopeKind::Call);
        assert_eq!(
            "response".parse::<EnvelopeKind>().unwrap(),
            EnvelopeKind::Response
        );
        assert!(matches!(
            "Call".parse::<EnvelopeKind>(),
            Err(ParseError::UnknownKind(kind)) if kind == "Call"
        ));
    }

    #[test]
    fn test_parse_rejects_malformed_json() {
        assert!(matches!(
            parse(b"not valid json"),
            Err(ParseError::Envelope(_))
        ));
    }

    #[test]
    fn test_parse_rejects_missing_field() {
        let raw = r#"{"kind":"call","operation":"x","payload":"{}"}"#;
        assert!(matches!(parse(raw.as_bytes()), Err(ParseError::Envelope(_))));
    }

    #[test]
    fn test_parse_rejects_non_string_payload() {
        let raw = r#"{"kind":"call","operation":"x","correlationId":"evt-1","payload":{"a":1}}"#;
        assert!(matches!(parse(raw.as_bytes()), Err(ParseError::Envelope(_))));
    }

    #[test]
    fn test_reply_keeps_routing_fields() {
        let call = Envelope::call("productCreated", "evt-9", "{}");
        let reply = call.reply(r#"{"message":"ok"}"#);

        assert_eq!(reply.kind, EnvelopeKind::Response);
        assert_eq!(reply.operation, "productCreated");
        assert_eq!(reply.correlation_id, "evt-9");
    }

    #[test]
    fn test_decode_payload_rejects_garbage() {
        assert!(matches!(
            decode_payload("{not json"),
            Err(ParseError::Payload(_))
        ));
    }
}
