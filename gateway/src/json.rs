//! JSON payload encoding, one of the two encodings `TransportCodec` supports.

use crate::model::{Opcode, OutgoingEnvelope, PayloadEnvelope};
use serde::Serialize;
use serde_json::Value;

/// Decode a complete JSON text payload into a [`PayloadEnvelope`].
///
/// Fails only on malformed JSON or a missing `op` field; an opcode outside
/// the closed set still decodes successfully with `op: None` so the caller
/// can report `UnknownOpcode` rather than aborting the session.
pub fn decode(text: &str) -> Result<PayloadEnvelope, serde_json::Error> {
    let mut value: Value = serde_json::from_str(text)?;
    let object = value
        .as_object_mut()
        .ok_or_else(|| serde::de::Error::custom("payload envelope is not a JSON object"))?;

    let raw_op = object
        .get("op")
        .and_then(Value::as_u64)
        .ok_or_else(|| serde::de::Error::custom("payload envelope missing `op`"))?;
    let raw_op = u8::try_from(raw_op)
        .map_err(|_| serde::de::Error::custom("payload envelope `op` out of range"))?;
    let op = Opcode::from_u8(raw_op);

    let sequence = object.get("s").and_then(Value::as_u64);
    let event_type = object
        .get("t")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned);
    let data = object.remove("d").unwrap_or(Value::Null);

    Ok(PayloadEnvelope {
        op,
        raw_op,
        data,
        sequence,
        event_type,
    })
}

/// Encode an outbound opcode/data pair as a JSON text frame body.
///
/// `sequence` is only meaningful for heartbeats, which echo the last known
/// sequence number in `d`; every other send sets `s`/`t` to `null` by virtue
/// of [`OutgoingEnvelope`] never populating them.
pub fn encode<T: Serialize>(op: Opcode, data: T) -> Result<String, serde_json::Error> {
    serde_json::to_string(&OutgoingEnvelope::new(op, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Opcode;

    #[test]
    fn decode_dispatch_envelope() {
        let text = r#"{"op":0,"d":{"foo":1},"s":42,"t":"READY"}"#;
        let envelope = decode(text).unwrap();
        assert_eq!(envelope.op, Some(Opcode::Dispatch));
        assert_eq!(envelope.sequence, Some(42));
        assert_eq!(envelope.event_type.as_deref(), Some("READY"));
    }

    #[test]
    fn decode_non_dispatch_has_no_sequence_or_event() {
        let text = r#"{"op":11,"d":null}"#;
        let envelope = decode(text).unwrap();
        assert_eq!(envelope.op, Some(Opcode::HeartbeatAck));
        assert!(envelope.sequence.is_none());
        assert!(envelope.event_type.is_none());
    }

    #[test]
    fn decode_unknown_opcode_is_not_fatal() {
        let text = r#"{"op":99,"d":null}"#;
        let envelope = decode(text).unwrap();
        assert!(envelope.op.is_none());
        assert_eq!(envelope.raw_op, 99);
    }

    #[test]
    fn encode_heartbeat_includes_sequence_in_data() {
        let body = encode(Opcode::Heartbeat, Some(7u64)).unwrap();
        assert_eq!(body, r#"{"op":1,"d":7}"#);
    }

    #[test]
    fn encode_roundtrips_through_decode() {
        #[derive(serde::Serialize)]
        struct Data {
            token: &'static str,
        }
        let body = encode(Opcode::Identify, Data { token: "abc" }).unwrap();
        let envelope = decode(&body).unwrap();
        assert_eq!(envelope.op, Some(Opcode::Identify));
        assert_eq!(envelope.data["token"], "abc");
    }
}
