//! `zstd-stream` transport decompression: the newer continuous-zstd-stream
//! alternative to [`zlib`](super::zlib).
//!
//! Discord's zstd transport has no documented in-band message delimiter
//! analogous to zlib-stream's 4-byte sync tail; a message is considered
//! complete once a decompress pass fully drains the zstd decoder's internal
//! frame state (`Operation::run` reporting zero bytes still needed). Per
//! spec this path should be validated against the server's actual framing
//! before shipping — see the open question recorded in DESIGN.md.

use std::io;
use zstd::stream::raw::{Decoder as RawDecoder, Operation};
use zstd::zstd_safe::{InBuffer, OutBuffer};

const CHUNK_SIZE: usize = 32 * 1024;

/// Per-session persistent zstd-stream decoder.
pub struct ZstdInflater {
    decoder: RawDecoder<'static>,
    pending: Vec<u8>,
    buffer: Vec<u8>,
    shard_id: Option<u32>,
}

impl ZstdInflater {
    /// Create a fresh decoder with an empty stream context. `shard_id` is
    /// used only to label metrics; pass `None` when a pool runs a single,
    /// unsharded session.
    pub fn new(shard_id: Option<u32>) -> io::Result<Self> {
        Ok(Self {
            decoder: RawDecoder::new()?,
            pending: Vec::new(),
            buffer: Vec::new(),
            shard_id,
        })
    }

    #[cfg(feature = "metrics")]
    fn report_buffer_metrics(&self) {
        let Some(shard_id) = self.shard_id else {
            return;
        };
        metrics::gauge!(format!("stormgate.inflater.capacity.{shard_id}"), self.buffer.capacity() as f64);
    }

    /// Feed a binary frame's bytes into the stream context.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Attempt to drain the accumulated input. Returns the decompressed
    /// message once the decoder reports the frame is fully consumed;
    /// returns `None` if more input is still required.
    pub fn msg(&mut self) -> io::Result<Option<&[u8]>> {
        if self.pending.is_empty() {
            return Ok(None);
        }

        let mut input = InBuffer::around(&self.pending);
        let mut scratch = vec![0u8; CHUNK_SIZE];
        let mut hint = 1;

        while hint != 0 && input.pos < input.src.len() {
            let mut output = OutBuffer::around(&mut scratch);
            hint = self.decoder.run(&mut input, &mut output)?;
            self.buffer.extend_from_slice(output.as_slice());
        }

        let consumed = input.pos;
        self.pending.drain(..consumed);

        if hint == 0 {
            tracing::trace!(bytes_out = self.buffer.len(), shard_id = ?self.shard_id, "inflated message");

            #[cfg(feature = "metrics")]
            self.report_buffer_metrics();

            Ok(Some(&self.buffer))
        } else {
            Ok(None)
        }
    }

    /// Reset internal buffers after a message has been consumed.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.buffer.clear();
    }

    /// Discard the decoder and start a fresh stream context, used when a
    /// new session is established.
    pub fn reset(&mut self) -> io::Result<()> {
        self.decoder = RawDecoder::new()?;
        self.pending.clear();
        self.buffer.clear();
        Ok(())
    }
}

impl std::fmt::Debug for ZstdInflater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZstdInflater")
            .field("pending_len", &self.pending.len())
            .field("buffer_len", &self.buffer.len())
            .field("shard_id", &self.shard_id)
            .finish()
    }
}
