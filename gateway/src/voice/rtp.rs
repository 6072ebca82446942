//! RTP framing for voice packets: the 12-byte header `VoiceCipher` treats as
//! associated authenticated data.
//!
//! Grounded on the RTP-header handling in songbird's UDP receive task,
//! adapted to the fixed `[version_flags, payload_type]` pair this protocol
//! always uses rather than songbird's general-purpose parser.

/// Fixed RTP version/flags byte used by every outbound voice packet.
pub const VERSION_FLAGS: u8 = 0x80;
/// Fixed RTP payload-type byte used by every outbound voice packet.
pub const PAYLOAD_TYPE: u8 = 0x78;
/// Size in bytes of the RTP header, also the AEAD associated data length.
pub const HEADER_LEN: usize = 12;

/// A parsed RTP voice frame: header fields plus an opaque payload.
///
/// `encrypt`/`decrypt` on [`VoiceCipher`](super::cipher::VoiceCipher) treat
/// the header's 12 bytes as associated data and never alter them.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RtpFrame {
    /// RTP version and flags byte, fixed at [`VERSION_FLAGS`].
    pub version_flags: u8,
    /// RTP payload type byte, fixed at [`PAYLOAD_TYPE`].
    pub payload_type: u8,
    /// Per-stream sequence number.
    pub sequence: u16,
    /// Sample-rate-scaled timestamp.
    pub timestamp: u32,
    /// Synchronization source identifier.
    pub ssrc: u32,
    /// Opaque voice payload (plaintext before encryption, ciphertext+tag
    /// after).
    pub payload: Vec<u8>,
}

impl RtpFrame {
    /// Build a frame with the protocol's fixed header bytes.
    pub fn new(sequence: u16, timestamp: u32, ssrc: u32, payload: Vec<u8>) -> Self {
        Self {
            version_flags: VERSION_FLAGS,
            payload_type: PAYLOAD_TYPE,
            sequence,
            timestamp,
            ssrc,
            payload,
        }
    }

    /// Serialize the 12-byte header in wire order: version_flags,
    /// payload_type, sequence (BE), timestamp (BE), ssrc (BE).
    pub fn header_bytes(&self) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[0] = self.version_flags;
        header[1] = self.payload_type;
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        header
    }

    /// Parse a 12-byte RTP header plus trailing payload from a complete
    /// wire frame.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        let header = &bytes[..HEADER_LEN];
        Some(Self {
            version_flags: header[0],
            payload_type: header[1],
            sequence: u16::from_be_bytes([header[2], header[3]]),
            timestamp: u32::from_be_bytes([header[4], header[5], header[6], header[7]]),
            ssrc: u32::from_be_bytes([header[8], header[9], header[10], header[11]]),
            payload: bytes[HEADER_LEN..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_bytes_are_big_endian() {
        let frame = RtpFrame::new(7, 960, 12345, b"hello".to_vec());
        let header = frame.header_bytes();
        assert_eq!(header[0], VERSION_FLAGS);
        assert_eq!(header[1], PAYLOAD_TYPE);
        assert_eq!(u16::from_be_bytes([header[2], header[3]]), 7);
        assert_eq!(
            u32::from_be_bytes([header[4], header[5], header[6], header[7]]),
            960
        );
        assert_eq!(
            u32::from_be_bytes([header[8], header[9], header[10], header[11]]),
            12345
        );
    }

    #[test]
    fn parse_round_trips_header() {
        let frame = RtpFrame::new(1, 2, 3, b"payload".to_vec());
        let mut wire = frame.header_bytes().to_vec();
        wire.extend_from_slice(&frame.payload);
        let parsed = RtpFrame::parse(&wire).unwrap();
        assert_eq!(parsed, frame);
    }
}
