//! Packet codec.
//!
//! Every packet is one text unit whose first character selects the class:
//!
//! | prefix | class        | body                                          |
//! |--------|--------------|-----------------------------------------------|
//! | `0`    | session-open | `{"connectionId", "pingInterval", "pingTimeout"}` |
//! | `1`    | close        | optional `{"code", "message"}`                |
//! | `2`    | ping         | none                                          |
//! | `3`    | pong         | none                                          |
//! | `4`    | message      | `[digits]` correlation id, then `[event, payload?, meta?]` |
//!
//! Decoding never panics; anything malformed comes back as a [`DecodeError`].

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::frame::WsFrame;
use super::types::{CorrelationId, WsEventError};
use super::value::Value;

const OPEN: u8 = b'0';
const CLOSE: u8 = b'1';
const PING: u8 = b'2';
const PONG: u8 = b'3';
const MESSAGE: u8 = b'4';

/// Metadata key the server uses to stamp the originating connection on relayed events.
pub const SENDER_KEY: &str = "sender";

/// Event about to be sent. Immutable once built; the engine assigns the correlation id.
#[derive(Clone, Debug, PartialEq)]
pub struct OutgoingEnvelope {
    event: String,
    payload: Value,
    correlation_id: Option<CorrelationId>,
    metadata: Option<BTreeMap<String, String>>,
}

impl OutgoingEnvelope {
    pub fn new(event: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            event: event.into(),
            payload: payload.into(),
            correlation_id: None,
            metadata: None,
        }
    }

    /// Attach string metadata to the envelope.
    ///
    /// [`SENDER_KEY`] is reserved for the server's sender stamp and is dropped here; a receiving
    /// peer would otherwise read it as `sender_connection_id` instead of metadata.
    pub fn with_metadata(mut self, mut metadata: BTreeMap<String, String>) -> Self {
        metadata.remove(SENDER_KEY);
        self.metadata = Some(metadata);
        self
    }

    pub(crate) fn with_correlation_id(mut self, id: Option<CorrelationId>) -> Self {
        self.correlation_id = id;
        self
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.correlation_id
    }

    pub fn metadata(&self) -> Option<&BTreeMap<String, String>> {
        self.metadata.as_ref()
    }
}

/// Event decoded from one inbound unit.
#[derive(Clone, Debug, PartialEq)]
pub struct IncomingEnvelope {
    pub event: String,
    pub payload: Value,
    pub correlation_id: Option<CorrelationId>,
    pub sender_connection_id: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl IncomingEnvelope {
    pub fn new(event: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            event: event.into(),
            payload: payload.into(),
            correlation_id: None,
            sender_connection_id: None,
            metadata: BTreeMap::new(),
        }
    }
}

/// Body of the session-open packet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    #[serde(rename = "connectionId", alias = "sid")]
    pub connection_id: String,
    #[serde(rename = "pingInterval", default, skip_serializing_if = "Option::is_none")]
    pub ping_interval_ms: Option<u64>,
    #[serde(rename = "pingTimeout", default, skip_serializing_if = "Option::is_none")]
    pub ping_timeout_ms: Option<u64>,
}

impl Handshake {
    pub fn new(connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            ping_interval_ms: None,
            ping_timeout_ms: None,
        }
    }

    pub fn with_keep_alive(mut self, interval: Duration, timeout: Duration) -> Self {
        self.ping_interval_ms = Some(interval.as_millis().min(u64::MAX as u128) as u64);
        self.ping_timeout_ms = Some(timeout.as_millis().min(u64::MAX as u128) as u64);
        self
    }

    pub fn ping_interval(&self) -> Option<Duration> {
        self.ping_interval_ms.map(Duration::from_millis)
    }

    pub fn ping_timeout(&self) -> Option<Duration> {
        self.ping_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CloseBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code: Option<i64>,
    message: String,
}

/// Decoded packet.
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    Open(Handshake),
    /// Close requested by the peer, optionally carrying a server error.
    Close(Option<WsEventError>),
    Ping,
    Pong,
    Message(IncomingEnvelope),
}

/// Malformed inbound unit. Never fatal to the connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodeError {
    pub reason: String,
}

impl DecodeError {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl std::error::Error for DecodeError {}

impl From<DecodeError> for WsEventError {
    fn from(err: DecodeError) -> Self {
        WsEventError::DecodingFailed(err.reason)
    }
}

/// Encode a message packet. Deterministic for identical input.
pub fn encode(envelope: &OutgoingEnvelope) -> Result<WsFrame, WsEventError> {
    if !envelope.payload.is_encodable() {
        return Err(WsEventError::EncodingFailed(format!(
            "payload of `{}` contains a non-finite number",
            envelope.event
        )));
    }

    let mut parts = vec![Value::String(envelope.event.clone()), envelope.payload.clone()];
    if let Some(meta) = envelope.metadata.as_ref().filter(|m| !m.is_empty()) {
        parts.push(
            meta.iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        );
    }

    let body = sonic_rs::to_string(&parts)
        .map_err(|err| WsEventError::EncodingFailed(err.to_string()))?;

    let mut out = String::with_capacity(body.len() + 21);
    out.push(MESSAGE as char);
    if let Some(id) = envelope.correlation_id {
        out.push_str(&id.to_string());
    }
    out.push_str(&body);
    Ok(WsFrame::text(out))
}

/// Encode an inbound-style message; used by servers and test doubles.
pub fn encode_incoming(envelope: &IncomingEnvelope) -> Result<WsFrame, WsEventError> {
    let mut metadata = envelope.metadata.clone();
    if let Some(sender) = envelope.sender_connection_id.as_ref() {
        metadata.insert(SENDER_KEY.to_string(), sender.clone());
    }
    let outgoing = OutgoingEnvelope::new(envelope.event.clone(), envelope.payload.clone())
        .with_metadata(metadata)
        .with_correlation_id(envelope.correlation_id);
    encode(&outgoing)
}

pub fn encode_handshake(handshake: &Handshake) -> Result<WsFrame, WsEventError> {
    let body = sonic_rs::to_string(handshake)
        .map_err(|err| WsEventError::EncodingFailed(err.to_string()))?;
    Ok(WsFrame::text(format!("{}{body}", OPEN as char)))
}

/// Close packet, optionally carrying a server error (`code`, `message`).
pub fn encode_close(error: Option<(Option<i64>, &str)>) -> WsFrame {
    let Some((code, message)) = error else {
        return WsFrame::text_static("1");
    };
    let body = CloseBody {
        code,
        message: message.to_string(),
    };
    match sonic_rs::to_string(&body) {
        Ok(json) => WsFrame::text(format!("{}{json}", CLOSE as char)),
        Err(_) => WsFrame::text_static("1"),
    }
}

pub fn encode_ping() -> WsFrame {
    WsFrame::text_static("2")
}

pub fn encode_pong() -> WsFrame {
    WsFrame::text_static("3")
}

/// Decode one raw transport unit.
pub fn decode(frame: &WsFrame) -> Result<Packet, DecodeError> {
    let text = match frame {
        WsFrame::Text(_) | WsFrame::Binary(_) => frame
            .as_text()
            .ok_or_else(|| DecodeError::new("frame is not valid UTF-8"))?,
        other => {
            return Err(DecodeError::new(format!(
                "unexpected control frame {other:?}"
            )));
        }
    };
    decode_str(text)
}

pub fn decode_str(text: &str) -> Result<Packet, DecodeError> {
    let Some(&class) = text.as_bytes().first() else {
        return Err(DecodeError::new("empty packet"));
    };
    // Class bytes are ASCII, so slicing at 1 stays on a char boundary.
    let body = &text[1..];

    match class {
        OPEN => sonic_rs::from_str::<Handshake>(body)
            .map(Packet::Open)
            .map_err(|err| DecodeError::new(format!("invalid handshake: {err}"))),
        CLOSE if body.is_empty() => Ok(Packet::Close(None)),
        CLOSE => sonic_rs::from_str::<CloseBody>(body)
            .map(|b| {
                Packet::Close(Some(WsEventError::ServerError {
                    code: b.code,
                    message: b.message,
                }))
            })
            .map_err(|err| DecodeError::new(format!("invalid close body: {err}"))),
        PING if body.is_empty() => Ok(Packet::Ping),
        PONG if body.is_empty() => Ok(Packet::Pong),
        PING | PONG => Err(DecodeError::new("keep-alive packet with a body")),
        MESSAGE => decode_message(body).map(Packet::Message),
        other => Err(DecodeError::new(format!(
            "unknown packet class {:?}",
            other as char
        ))),
    }
}

fn decode_message(body: &str) -> Result<IncomingEnvelope, DecodeError> {
    let digits = body.bytes().take_while(u8::is_ascii_digit).count();
    let correlation_id = if digits == 0 {
        None
    } else {
        Some(
            body[..digits]
                .parse::<CorrelationId>()
                .map_err(|err| DecodeError::new(format!("invalid correlation id: {err}")))?,
        )
    };

    let parts = match Value::from_json(&body[digits..]) {
        Ok(Value::Array(parts)) => parts,
        Ok(_) => return Err(DecodeError::new("message body is not an array")),
        Err(err) => return Err(DecodeError::new(format!("invalid message body: {err}"))),
    };
    let mut parts = parts.into_iter();

    let event = match parts.next() {
        Some(Value::String(event)) => event,
        Some(_) => return Err(DecodeError::new("event name is not a string")),
        None => return Err(DecodeError::new("message without event name")),
    };
    let payload = parts.next().unwrap_or(Value::Null);

    let mut sender_connection_id = None;
    let mut metadata = BTreeMap::new();
    match parts.next() {
        None | Some(Value::Null) => {}
        Some(Value::Object(meta)) => {
            for (key, value) in meta {
                let Value::String(value) = value else {
                    return Err(DecodeError::new(format!(
                        "metadata `{key}` is not a string"
                    )));
                };
                if key == SENDER_KEY {
                    sender_connection_id = Some(value);
                } else {
                    metadata.insert(key, value);
                }
            }
        }
        Some(_) => return Err(DecodeError::new("metadata is not an object")),
    }

    Ok(IncomingEnvelope {
        event,
        payload,
        correlation_id,
        sender_connection_id,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn sample_payload() -> Value {
        [
            ("text", Value::from("hi ✓")),
            ("count", Value::Int(i64::MAX)),
            ("ratio", Value::Float(-0.125)),
            ("ok", Value::Bool(true)),
            ("none", Value::Null),
            (
                "list",
                Value::Array(vec![Value::Int(-7), Value::from("x"), Value::Float(2.5)]),
            ),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn message_round_trip_keeps_event_payload_and_id() {
        let envelope = OutgoingEnvelope::new("chat:message", sample_payload())
            .with_correlation_id(Some(42));
        let frame = encode(&envelope).unwrap();

        let Packet::Message(decoded) = decode(&frame).unwrap() else {
            panic!("expected message packet");
        };
        assert_eq!(decoded.event, "chat:message");
        assert_eq!(decoded.payload, sample_payload());
        assert_eq!(decoded.correlation_id, Some(42));
    }

    #[test]
    fn encoding_is_deterministic_and_uses_the_message_prefix() {
        let envelope = OutgoingEnvelope::new("e", sample_payload()).with_correlation_id(Some(7));
        let a = encode(&envelope).unwrap();
        let b = encode(&envelope).unwrap();
        assert_eq!(a, b);
        assert!(a.as_text().unwrap().starts_with("47[\"e\","));
    }

    #[test]
    fn metadata_and_sender_travel_in_the_meta_slot() {
        let mut incoming = IncomingEnvelope::new("joined", Value::from("lobby"));
        incoming.sender_connection_id = Some("abc".to_string());
        incoming
            .metadata
            .insert("trace".to_string(), "t-1".to_string());

        let frame = encode_incoming(&incoming).unwrap();
        assert_eq!(decode(&frame).unwrap(), Packet::Message(incoming));
    }

    #[test]
    fn negative_zero_payload_keeps_its_sign() {
        let payload = Value::Array(vec![Value::Float(-0.0), Value::Float(0.0)]);
        let frame = encode(&OutgoingEnvelope::new("zero", payload)).unwrap();

        let Packet::Message(decoded) = decode(&frame).unwrap() else {
            panic!("expected message packet");
        };
        let bits: Vec<_> = decoded
            .payload
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_f64().map(f64::to_bits))
            .collect();
        assert_eq!(bits, vec![Some((-0.0f64).to_bits()), Some(0.0f64.to_bits())]);
    }

    #[test]
    fn reserved_sender_key_is_not_sent_as_metadata() {
        let envelope = OutgoingEnvelope::new("note", 1i64).with_metadata(BTreeMap::from([
            (SENDER_KEY.to_string(), "spoofed".to_string()),
            ("trace".to_string(), "t-1".to_string()),
        ]));
        assert_eq!(
            envelope.metadata(),
            Some(&BTreeMap::from([("trace".to_string(), "t-1".to_string())]))
        );

        let Packet::Message(decoded) = decode(&encode(&envelope).unwrap()).unwrap() else {
            panic!("expected message packet");
        };
        assert_eq!(decoded.sender_connection_id, None);
        assert_eq!(decoded.metadata.get("trace").map(String::as_str), Some("t-1"));
    }

    #[test]
    fn message_without_payload_decodes_to_null() {
        let Packet::Message(env) = decode_str("4[\"tick\"]").unwrap() else {
            panic!("expected message");
        };
        assert_eq!(env.payload, Value::Null);
        assert_eq!(env.correlation_id, None);
    }

    #[test]
    fn control_packets_decode() {
        assert_eq!(decode_str("2").unwrap(), Packet::Ping);
        assert_eq!(decode_str("3").unwrap(), Packet::Pong);
        assert_eq!(decode_str("1").unwrap(), Packet::Close(None));
        assert_eq!(
            decode(&encode_close(Some((Some(4001), "kicked")))).unwrap(),
            Packet::Close(Some(WsEventError::ServerError {
                code: Some(4001),
                message: "kicked".to_string()
            }))
        );
    }

    #[test]
    fn handshake_accepts_sid_alias_and_optional_timings() {
        let Packet::Open(hs) =
            decode_str(r#"0{"sid":"s-1","pingInterval":25000,"pingTimeout":20000}"#).unwrap()
        else {
            panic!("expected open");
        };
        assert_eq!(hs.connection_id, "s-1");
        assert_eq!(hs.ping_interval(), Some(Duration::from_secs(25)));

        let hs = Handshake::new("c-9");
        assert_eq!(decode(&encode_handshake(&hs).unwrap()).unwrap(), Packet::Open(hs));
    }

    #[test]
    fn non_finite_payload_fails_encoding() {
        let err = encode(&OutgoingEnvelope::new("x", Value::Float(f64::INFINITY))).unwrap_err();
        assert!(matches!(err, WsEventError::EncodingFailed(_)));
    }

    #[test]
    fn malformed_input_is_an_error_not_a_panic() {
        let cases: &[&[u8]] = &[
            b"",
            b"9",
            b"4",
            b"4[",
            b"4[]",
            b"4[1,2]",
            b"4{\"a\":1}",
            b"499999999999999999999999[\"x\"]",
            b"4[\"x\",1,[1]]",
            b"4[\"x\",1,{\"k\":1}]",
            b"0not json",
            b"2extra",
            b"1{",
            &[0xff, 0x00, 0x34],
            "4[\"é".as_bytes(),
        ];
        for raw in cases {
            let frame = WsFrame::Binary(Bytes::copy_from_slice(raw));
            assert!(decode(&frame).is_err(), "expected error for {raw:?}");
        }
        assert!(decode(&WsFrame::Ping(Bytes::new())).is_err());
    }
}
