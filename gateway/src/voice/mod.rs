//! C6: authenticated encryption of RTP voice payloads.
//!
//! Pairs [`cipher::VoiceCipher`] (the AEAD transform) with [`rtp::RtpFrame`]
//! (the packet layout it operates on). Audio encoding/decoding and UDP
//! transport are out of scope; this module is a pure transformation over
//! already-framed RTP bytes.

mod cipher;
mod rtp;

pub use cipher::{CipherMode, VoiceCipher, VoiceCipherError, VoiceCipherErrorType};
pub use rtp::RtpFrame;
