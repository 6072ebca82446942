//! `zlib-stream` transport decompression: a single continuous zlib stream
//! for the lifetime of a session, with messages delimited by a 4-byte sync
//! tail.
//!
//! Grounded on the shard processor's inflater: a persistent
//! [`flate2::Decompress`] context fed every incoming binary frame, emitting
//! a complete message only once the sync tail has been observed.

use flate2::{Decompress, FlushDecompress, Status};
use std::time::{Duration, Instant};

/// The 4-byte marker Discord appends to the end of every complete
/// `zlib-stream` message.
const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xff, 0xff];
const INTERNAL_BUFFER_SIZE: usize = 32 * 1024;
const SHRINK_AFTER: Duration = Duration::from_secs(60);

/// Per-session persistent zlib-stream decoder.
#[derive(Debug)]
pub struct ZlibInflater {
    decompress: Decompress,
    compressed: Vec<u8>,
    buffer: Vec<u8>,
    last_resize: Instant,
    shard_id: Option<u32>,
}

impl ZlibInflater {
    /// Create a fresh decoder with an empty stream context. `shard_id` is
    /// used only to label metrics and trace spans; pass `None` when a pool
    /// runs a single, unsharded session.
    pub fn new(shard_id: Option<u32>) -> Self {
        Self {
            decompress: Decompress::new(true),
            compressed: Vec::new(),
            buffer: Vec::new(),
            last_resize: Instant::now(),
            shard_id,
        }
    }

    #[cfg(feature = "metrics")]
    fn report_buffer_metrics(&self) {
        let Some(shard_id) = self.shard_id else {
            return;
        };
        metrics::gauge!(format!("stormgate.inflater.capacity.{shard_id}"), self.buffer.capacity() as f64);
        metrics::gauge!(format!("stormgate.inflater.total_in.{shard_id}"), self.decompress.total_in() as f64);
        metrics::gauge!(format!("stormgate.inflater.total_out.{shard_id}"), self.decompress.total_out() as f64);
    }

    /// Feed a binary frame's bytes into the stream context.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.compressed.extend_from_slice(bytes);
    }

    /// If the compressed buffer currently ends with the sync tail, inflate
    /// everything accumulated so far and return the decompressed message.
    /// Otherwise this is a partial frame: the bytes are retained for the
    /// next call and `Ok(None)` is returned.
    #[tracing::instrument(level = "trace")]
    pub fn msg(&mut self) -> Result<Option<&[u8]>, flate2::DecompressError> {
        let length = self.compressed.len();

        if length < 4 || self.compressed[length - 4..] != ZLIB_SUFFIX {
            return Ok(None);
        }

        // `total_in` is cumulative for the lifetime of `self.decompress`, so
        // capture where this message starts to know how much of
        // `self.compressed` each loop iteration has already consumed.
        let start_in = self.decompress.total_in();

        loop {
            let consumed = (self.decompress.total_in() - start_in) as usize;
            let before_len = self.buffer.len();
            self.buffer.reserve(INTERNAL_BUFFER_SIZE);

            let status = self.decompress.decompress_vec(
                &self.compressed[consumed..],
                &mut self.buffer,
                FlushDecompress::Sync,
            )?;
            let produced = self.buffer.len() - before_len;

            if status == Status::StreamEnd || produced < INTERNAL_BUFFER_SIZE {
                break;
            }
        }

        tracing::trace!(
            bytes_in = self.decompress.total_in(),
            bytes_out = self.buffer.len(),
            shard_id = ?self.shard_id,
            "inflated message",
        );

        #[cfg(feature = "metrics")]
        self.report_buffer_metrics();

        self.compressed.clear();

        Ok(Some(&self.buffer))
    }

    /// Reset internal buffers after a message has been consumed, shrinking
    /// their capacity if they have grown and stayed idle for over a minute.
    pub fn clear(&mut self) {
        if self.last_resize.elapsed() > SHRINK_AFTER {
            self.compressed.shrink_to(INTERNAL_BUFFER_SIZE);
            self.buffer.shrink_to(INTERNAL_BUFFER_SIZE);
            self.last_resize = Instant::now();
            tracing::trace!(
                compressed_capacity = self.compressed.capacity(),
                buffer_capacity = self.buffer.capacity(),
                "shrank inflater buffers",
            );
        }

        self.compressed.clear();
        self.buffer.clear();
    }

    /// Discard the decoder and start a fresh stream context, used when a
    /// new session is established.
    pub fn reset(&mut self) {
        *self = Self::new(self.shard_id);
    }
}

impl Default for ZlibInflater {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::ZlibInflater;
    use flate2::{write::ZlibEncoder, Compression};
    use std::io::Write;

    fn compress_stream(messages: &[&[u8]]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
        let mut out = Vec::new();
        for message in messages {
            encoder.write_all(message).unwrap();
            encoder.flush().unwrap();
            out = encoder.get_ref().clone();
        }
        out
    }

    #[test]
    fn round_trip_single_message() {
        let stream = compress_stream(&[b"{\"op\":10}"]);
        let mut inflater = ZlibInflater::new(Some(0));
        inflater.extend(&stream);
        let msg = inflater.msg().unwrap();
        assert!(msg.is_some());
        assert_eq!(msg.unwrap(), b"{\"op\":10}");
    }

    #[test]
    fn partial_frame_yields_none() {
        let stream = compress_stream(&[b"{\"op\":10}"]);
        let mut inflater = ZlibInflater::new(Some(0));
        inflater.extend(&stream[..stream.len() - 2]);
        assert!(inflater.msg().unwrap().is_none());
    }
}
