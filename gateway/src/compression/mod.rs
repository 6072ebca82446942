//! Transport-level decompression, the second half of [`TransportCodec`]'s
//! job alongside payload decoding.
//!
//! Two streaming compressions are supported, both single-direction
//! (server→client only — outbound frames are never compressed): `zlib-stream`
//! ([`zlib`]) and `zstd-stream` ([`zstd`]). Both hold a persistent decoder
//! context for the lifetime of a session and are fed every binary frame as
//! it arrives.

mod zlib;
mod zstd;

pub use self::zlib::ZlibInflater;
pub use self::zstd::ZstdInflater;

use std::{
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// Per-message cap: a single decompressed message larger than this aborts
/// the session with resource exhaustion.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;
/// Lifetime cap across an entire session's decompressed output.
pub const MAX_LIFETIME_SIZE: u64 = 100 * 1024 * 1024;

/// Which transport compression, if any, a session was opened with.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TransportCompression {
    /// No transport compression; frames are passed through unmodified.
    #[default]
    None,
    /// A continuous zlib stream, messages delimited by the 4-byte sync tail.
    ZlibStream,
    /// A continuous zstd stream.
    ZstdStream,
}

impl TransportCompression {
    /// The `compress` query-string value to append to the gateway URL, or
    /// `None` when no transport compression is requested.
    pub const fn query_value(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::ZlibStream => Some("zlib-stream"),
            Self::ZstdStream => Some("zstd-stream"),
        }
    }
}

/// A transport decompression failure.
#[derive(Debug)]
pub struct CompressionError {
    kind: CompressionErrorType,
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl CompressionError {
    pub(crate) fn decompress(source: impl Error + Send + Sync + 'static) -> Self {
        Self {
            kind: CompressionErrorType::Decompress,
            source: Some(Box::new(source)),
        }
    }

    fn exhausted() -> Self {
        Self {
            kind: CompressionErrorType::ResourceExhausted,
            source: None,
        }
    }

    /// Return the type of error that occurred.
    pub const fn kind(&self) -> &CompressionErrorType {
        &self.kind
    }
}

impl Display for CompressionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            CompressionErrorType::Decompress => f.write_str("decompression stream is corrupt"),
            CompressionErrorType::ResourceExhausted => {
                f.write_str("decompressed output exceeded the configured size cap")
            }
        }
    }
}

impl Error for CompressionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn Error + 'static))
    }
}

/// Type of [`CompressionError`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum CompressionErrorType {
    /// The decompression stream state is corrupt and cannot continue.
    Decompress,
    /// A single message, or the session's cumulative output, exceeded the
    /// configured cap.
    ResourceExhausted,
}

/// Session-scoped decompression state, dispatching to the configured
/// transport compression (or none).
#[derive(Debug)]
pub enum Compression {
    /// No transport compression; frames pass through unchanged.
    None,
    /// `zlib-stream`.
    Zlib(Box<ZlibInflater>),
    /// `zstd-stream`.
    Zstd(Box<ZstdInflater>),
}

impl Compression {
    /// Build the decompression state matching `kind`. `shard_id` labels the
    /// metrics and trace spans the active inflater emits; pass `None` for
    /// an unsharded session.
    pub fn new(kind: TransportCompression, shard_id: Option<u32>) -> Result<Self, CompressionError> {
        Ok(match kind {
            TransportCompression::None => Self::None,
            TransportCompression::ZlibStream => Self::Zlib(Box::new(ZlibInflater::new(shard_id))),
            TransportCompression::ZstdStream => Self::Zstd(Box::new(
                ZstdInflater::new(shard_id).map_err(CompressionError::decompress)?,
            )),
        })
    }

    /// Feed a binary WebSocket frame's bytes into the active decoder. A
    /// no-op when no compression is configured — callers should treat the
    /// frame bytes as the message directly in that case.
    pub fn extend(&mut self, bytes: &[u8]) {
        match self {
            Self::None => {}
            Self::Zlib(inflater) => inflater.extend(bytes),
            Self::Zstd(inflater) => inflater.extend(bytes),
        }
    }

    /// Attempt to produce a complete decompressed message from the bytes
    /// accumulated so far, enforcing the per-message and lifetime size
    /// caps.
    pub fn message(&mut self, lifetime_total: &mut u64) -> Result<Option<&[u8]>, CompressionError> {
        let message = match self {
            Self::None => return Ok(None),
            Self::Zlib(inflater) => inflater.msg().map_err(CompressionError::decompress)?,
            Self::Zstd(inflater) => inflater.msg().map_err(CompressionError::decompress)?,
        };

        let Some(message) = message else {
            return Ok(None);
        };

        if message.len() > MAX_MESSAGE_SIZE {
            return Err(CompressionError::exhausted());
        }

        *lifetime_total += message.len() as u64;
        if *lifetime_total > MAX_LIFETIME_SIZE {
            return Err(CompressionError::exhausted());
        }

        Ok(Some(message))
    }

    /// Clear buffers after a message has been fully consumed by the caller.
    pub fn clear(&mut self) {
        match self {
            Self::None => {}
            Self::Zlib(inflater) => inflater.clear(),
            Self::Zstd(inflater) => inflater.clear(),
        }
    }

    /// Discard decoder state and start fresh, used when a new session is
    /// established (a resume keeps the old decoder; a fresh IDENTIFY does
    /// not).
    pub fn reset(&mut self) -> Result<(), CompressionError> {
        match self {
            Self::None => {}
            Self::Zlib(inflater) => inflater.reset(),
            Self::Zstd(inflater) => inflater.reset().map_err(CompressionError::decompress)?,
        }
        Ok(())
    }
}
