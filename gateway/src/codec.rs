//! C1: `TransportCodec` — framing, streaming decompression, and payload
//! envelope encode/decode, combined into the single surface
//! [`GatewaySession`](crate::shard::GatewaySession) drives per frame.

use crate::compression::{Compression, CompressionError, TransportCompression};
use crate::model::{Opcode, PayloadEnvelope};
use crate::{etf, json};
use serde::Serialize;
use std::{
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
};
use tokio_tungstenite::tungstenite::Message;

/// Which payload encoding a session was opened with. Fixed for the lifetime
/// of the session; chosen at URL construction.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum PayloadEncoding {
    /// JSON, carried over text frames.
    #[default]
    Json,
    /// ETF (Erlang External Term Format), carried over binary frames.
    Etf,
}

impl PayloadEncoding {
    /// The `encoding` query-string value to append to the gateway URL.
    pub const fn query_value(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Etf => "etf",
        }
    }
}

/// A framing, decompression, or payload-decode failure.
#[derive(Debug)]
pub struct CodecError {
    kind: CodecErrorType,
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl CodecError {
    /// Return the type of error that occurred.
    pub const fn kind(&self) -> &CodecErrorType {
        &self.kind
    }
}

impl Display for CodecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            CodecErrorType::BadFrame => f.write_str("received a malformed websocket frame"),
            CodecErrorType::Decompress => f.write_str("transport decompression failed"),
            CodecErrorType::Decode => f.write_str("failed to decode the payload envelope"),
        }
    }
}

impl Error for CodecError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn Error + 'static))
    }
}

/// Type of [`CodecError`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum CodecErrorType {
    /// A partial compressed tail or otherwise malformed frame was received.
    BadFrame,
    /// The decompression stream is corrupt, or a size cap was exceeded.
    Decompress,
    /// The decompressed bytes did not decode to a valid payload envelope.
    Decode,
}

impl From<CompressionError> for CodecError {
    fn from(source: CompressionError) -> Self {
        Self {
            kind: CodecErrorType::Decompress,
            source: Some(Box::new(source)),
        }
    }
}

/// Translates between WebSocket frames and [`PayloadEnvelope`]s for a single
/// session: applies streaming decompression (if configured) and then the
/// configured payload encoding.
#[derive(Debug)]
pub struct TransportCodec {
    encoding: PayloadEncoding,
    compression: Compression,
    lifetime_decompressed: u64,
}

impl TransportCodec {
    /// Build a codec for a freshly opened session. `shard_id` labels the
    /// transport decompressor's metrics and trace spans.
    pub fn new(
        encoding: PayloadEncoding,
        compression_kind: TransportCompression,
        shard_id: Option<u32>,
    ) -> Result<Self, CodecError> {
        Ok(Self {
            encoding,
            compression: Compression::new(compression_kind, shard_id)?,
            lifetime_decompressed: 0,
        })
    }

    /// Decode one incoming WebSocket message into a payload envelope.
    ///
    /// Control frames (ping/pong/close) and empty frames are passed through
    /// as `Ok(None)` without touching the decompressor, matching the
    /// "non-buffer frames pass through" contract. A partial compressed tail
    /// also yields `Ok(None)`; the bytes are retained internally for the
    /// next call.
    pub fn decode(&mut self, message: &Message) -> Result<Option<PayloadEnvelope>, CodecError> {
        let raw: &[u8] = match message {
            Message::Binary(bytes) => bytes,
            Message::Text(text) => {
                return self.decode_text(text).map(Some);
            }
            Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => {
                return Ok(None)
            }
        };

        let owned;
        let message: &[u8] = if matches!(self.compression, Compression::None) {
            raw
        } else {
            self.compression.extend(raw);
            match self.compression.message(&mut self.lifetime_decompressed)? {
                Some(message) => {
                    owned = message.to_vec();
                    &owned
                }
                None => return Ok(None),
            }
        };

        let envelope = match self.encoding {
            PayloadEncoding::Json => {
                let text = std::str::from_utf8(message).map_err(|source| CodecError {
                    kind: CodecErrorType::BadFrame,
                    source: Some(Box::new(source)),
                })?;
                json::decode(text).map_err(|source| CodecError {
                    kind: CodecErrorType::Decode,
                    source: Some(Box::new(source)),
                })?
            }
            PayloadEncoding::Etf => etf::decode(message).map_err(|source| CodecError {
                kind: CodecErrorType::Decode,
                source: Some(Box::new(source)),
            })?,
        };

        self.compression.clear();
        Ok(Some(envelope))
    }

    fn decode_text(&mut self, text: &str) -> Result<PayloadEnvelope, CodecError> {
        json::decode(text).map_err(|source| CodecError {
            kind: CodecErrorType::Decode,
            source: Some(Box::new(source)),
        })
    }

    /// Encode an outbound opcode/data pair into the WebSocket message to
    /// send, using whichever payload encoding this codec was constructed
    /// with. Outbound frames are never compressed.
    pub fn encode<T: Serialize>(&self, op: Opcode, data: T) -> Result<Message, CodecError> {
        encode_payload(self.encoding, op, data)
    }

    /// Discard decompressor state and start fresh. Called on a
    /// non-resuming reconnect; a resume keeps decoder state since the
    /// server-side stream also continues.
    pub fn reset(&mut self) -> Result<(), CodecError> {
        self.lifetime_decompressed = 0;
        Ok(self.compression.reset()?)
    }
}

/// Encode an outbound opcode/data pair without needing a live
/// [`TransportCodec`]: outbound frames never touch the decompressor, so
/// this only needs to know which payload encoding applies. Used by
/// [`GatewaySession::send`](crate::shard::GatewaySession::send), which has
/// no access to the processor task's codec instance.
pub(crate) fn encode_payload<T: Serialize>(
    encoding: PayloadEncoding,
    op: Opcode,
    data: T,
) -> Result<Message, CodecError> {
    match encoding {
        PayloadEncoding::Json => {
            let text = json::encode(op, data).map_err(|source| CodecError {
                kind: CodecErrorType::Decode,
                source: Some(Box::new(source)),
            })?;
            Ok(Message::Text(text))
        }
        PayloadEncoding::Etf => {
            let value = serde_json::to_value(data).map_err(|source| CodecError {
                kind: CodecErrorType::Decode,
                source: Some(Box::new(source)),
            })?;
            let bytes = etf::encode(op, &value).map_err(|source| CodecError {
                kind: CodecErrorType::Decode,
                source: Some(Box::new(source)),
            })?;
            Ok(Message::Binary(bytes))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_control_frames_pass_through_as_none() {
        let mut codec = TransportCodec::new(PayloadEncoding::Json, TransportCompression::None, None)
            .unwrap();
        let result = codec.decode(&Message::Ping(Vec::new())).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn decode_text_without_compression() {
        let mut codec = TransportCodec::new(PayloadEncoding::Json, TransportCompression::None, None)
            .unwrap();
        let message = Message::Text(r#"{"op":10,"d":{"heartbeat_interval":41250}}"#.into());
        let envelope = codec.decode(&message).unwrap().unwrap();
        assert_eq!(envelope.op, Some(Opcode::Hello));
    }
}
