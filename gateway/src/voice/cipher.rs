//! C6: `VoiceCipher` — AEAD encrypt/decrypt of RTP voice payloads with
//! nonce discipline.
//!
//! A pure transformation: this type owns no I/O and is driven entirely by
//! its caller. Grounded on the AEAD usage idiom in the `chacha20poly1305`
//! crate (`aead::{Aead, KeyInit, Payload}`) also attested elsewhere in the
//! corpus; `aes-gcm` shares the same `aead` trait surface as a sibling
//! RustCrypto crate.

use super::rtp::{RtpFrame, HEADER_LEN};
use aead::{Aead, KeyInit, Payload};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::XChaCha20Poly1305;
use std::{
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
};

const KEY_LEN: usize = 32;
const TAG_LEN: usize = 16;
const COUNTER_LEN: usize = 4;
const AES_NONCE_LEN: usize = 12;
const XCHACHA_NONCE_LEN: usize = 24;

/// Which AEAD voice-encryption mode a [`VoiceCipher`] was initialized with.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CipherMode {
    /// AES-256-GCM with a 12-byte nonce.
    AeadAes256GcmRtpSize,
    /// XChaCha20-Poly1305 with a 24-byte extended nonce.
    AeadXChaCha20Poly1305RtpSize,
}

impl CipherMode {
    const fn nonce_len(self) -> usize {
        match self {
            Self::AeadAes256GcmRtpSize => AES_NONCE_LEN,
            Self::AeadXChaCha20Poly1305RtpSize => XCHACHA_NONCE_LEN,
        }
    }

    /// Parse a mode name as negotiated over the voice gateway's
    /// `SESSION_DESCRIPTION` payload. Discord has deprecated several modes
    /// over time (the non-`_rtpsize` and plain `xsalsa20_poly1305*` family);
    /// anything other than the two names below is rejected with
    /// `UnsupportedMode` rather than silently accepted.
    pub fn parse(name: &str) -> Result<Self, VoiceCipherError> {
        match name {
            "aead_aes256_gcm_rtpsize" => Ok(Self::AeadAes256GcmRtpSize),
            "aead_xchacha20_poly1305_rtpsize" => Ok(Self::AeadXChaCha20Poly1305RtpSize),
            _ => Err(VoiceCipherError::new(VoiceCipherErrorType::UnsupportedMode)),
        }
    }
}

/// A voice-cryptography failure.
#[derive(Debug)]
pub struct VoiceCipherError {
    kind: VoiceCipherErrorType,
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl VoiceCipherError {
    fn new(kind: VoiceCipherErrorType) -> Self {
        Self { kind, source: None }
    }

    /// Return the type of error that occurred.
    pub const fn kind(&self) -> &VoiceCipherErrorType {
        &self.kind
    }
}

impl Display for VoiceCipherError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            VoiceCipherErrorType::UnsupportedMode => {
                f.write_str("voice encryption mode is deprecated or unrecognized")
            }
            VoiceCipherErrorType::BadKey => f.write_str("secret key is not 32 bytes"),
            VoiceCipherErrorType::AuthFail => {
                f.write_str("AEAD authentication tag did not verify")
            }
            VoiceCipherErrorType::NotInitialized => {
                f.write_str("voice cipher was used after destroy()")
            }
            VoiceCipherErrorType::Malformed => f.write_str("packet too short to contain a tag and nonce counter"),
        }
    }
}

impl Error for VoiceCipherError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn Error + 'static))
    }
}

/// Type of [`VoiceCipherError`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum VoiceCipherErrorType {
    /// `initialize` was called with a mode other than the two supported
    /// variants.
    UnsupportedMode,
    /// The supplied key was not exactly 32 bytes.
    BadKey,
    /// `decrypt` failed to verify the AEAD tag.
    AuthFail,
    /// An operation was attempted after `destroy()`.
    NotInitialized,
    /// The packet was too short to contain a tag and trailing nonce
    /// counter.
    Malformed,
}

enum CipherImpl {
    Aes256Gcm(Box<Aes256Gcm>),
    XChaCha20Poly1305(Box<XChaCha20Poly1305>),
}

/// Authenticated encryption/decryption of RTP voice payloads.
///
/// `encrypt`/`decrypt` are never called concurrently on the same instance;
/// callers serialize access (see the concurrency model). The nonce counter
/// is monotonic per instance and is never reused for the same key.
pub struct VoiceCipher {
    mode: CipherMode,
    cipher: Option<CipherImpl>,
    counter: u32,
}

impl VoiceCipher {
    /// Initialize a cipher for `mode` with a 32-byte `secret_key`.
    pub fn initialize(mode: CipherMode, secret_key: &[u8]) -> Result<Self, VoiceCipherError> {
        if secret_key.len() != KEY_LEN {
            return Err(VoiceCipherError::new(VoiceCipherErrorType::BadKey));
        }

        let cipher = match mode {
            CipherMode::AeadAes256GcmRtpSize => CipherImpl::Aes256Gcm(Box::new(
                Aes256Gcm::new_from_slice(secret_key)
                    .map_err(|_| VoiceCipherError::new(VoiceCipherErrorType::BadKey))?,
            )),
            CipherMode::AeadXChaCha20Poly1305RtpSize => CipherImpl::XChaCha20Poly1305(Box::new(
                XChaCha20Poly1305::new_from_slice(secret_key)
                    .map_err(|_| VoiceCipherError::new(VoiceCipherErrorType::BadKey))?,
            )),
        };

        Ok(Self {
            mode,
            cipher: Some(cipher),
            counter: 0,
        })
    }

    /// Initialize a cipher from a mode name as negotiated over the voice
    /// gateway, rejecting deprecated or unrecognized names with
    /// `UnsupportedMode` instead of [`initialize`](Self::initialize)'s
    /// pre-validated `CipherMode`.
    pub fn negotiate(mode_name: &str, secret_key: &[u8]) -> Result<Self, VoiceCipherError> {
        Self::initialize(CipherMode::parse(mode_name)?, secret_key)
    }

    /// Encrypt `packet`, returning the wire blob: `[12-byte header]
    /// [ciphertext][16-byte tag][4-byte nonce counter BE]`.
    pub fn encrypt(&mut self, packet: &RtpFrame) -> Result<Vec<u8>, VoiceCipherError> {
        let Some(cipher) = &self.cipher else {
            return Err(VoiceCipherError::new(VoiceCipherErrorType::NotInitialized));
        };

        let header = packet.header_bytes();
        let nonce = self.build_nonce();

        let sealed = match cipher {
            CipherImpl::Aes256Gcm(cipher) => cipher.encrypt(
                aes_gcm::Nonce::from_slice(&nonce[..AES_NONCE_LEN]),
                Payload {
                    msg: &packet.payload,
                    aad: &header,
                },
            ),
            CipherImpl::XChaCha20Poly1305(cipher) => cipher.encrypt(
                chacha20poly1305::XNonce::from_slice(&nonce[..XCHACHA_NONCE_LEN]),
                Payload {
                    msg: &packet.payload,
                    aad: &header,
                },
            ),
        }
        .map_err(|_| VoiceCipherError::new(VoiceCipherErrorType::AuthFail))?;

        let mut out = Vec::with_capacity(HEADER_LEN + sealed.len() + COUNTER_LEN);
        out.extend_from_slice(&header);
        out.extend_from_slice(&sealed);
        out.extend_from_slice(&self.counter.to_be_bytes());

        self.advance_counter();

        Ok(out)
    }

    /// Decrypt a wire blob produced by [`encrypt`](Self::encrypt), returning
    /// the plaintext payload.
    pub fn decrypt(&mut self, frame: &[u8]) -> Result<Vec<u8>, VoiceCipherError> {
        let Some(cipher) = &self.cipher else {
            return Err(VoiceCipherError::new(VoiceCipherErrorType::NotInitialized));
        };

        if frame.len() < HEADER_LEN + TAG_LEN + COUNTER_LEN {
            return Err(VoiceCipherError::new(VoiceCipherErrorType::Malformed));
        }

        let header = &frame[..HEADER_LEN];
        let counter_offset = frame.len() - COUNTER_LEN;
        let ciphertext = &frame[HEADER_LEN..counter_offset];
        let counter = u32::from_be_bytes(frame[counter_offset..].try_into().unwrap());

        let nonce = Self::nonce_for_counter(self.mode, counter);

        let plaintext = match cipher {
            CipherImpl::Aes256Gcm(cipher) => cipher.decrypt(
                aes_gcm::Nonce::from_slice(&nonce[..AES_NONCE_LEN]),
                Payload {
                    msg: ciphertext,
                    aad: header,
                },
            ),
            CipherImpl::XChaCha20Poly1305(cipher) => cipher.decrypt(
                chacha20poly1305::XNonce::from_slice(&nonce[..XCHACHA_NONCE_LEN]),
                Payload {
                    msg: ciphertext,
                    aad: header,
                },
            ),
        }
        .map_err(|_| VoiceCipherError::new(VoiceCipherErrorType::AuthFail))?;

        Ok(plaintext)
    }

    /// Reset the nonce counter to zero, used when starting a new voice
    /// session with the same key material.
    pub fn reset_nonce(&mut self) {
        self.counter = 0;
    }

    /// Drop the cipher context. Subsequent `encrypt`/`decrypt` calls fail
    /// with `NotInitialized`.
    pub fn destroy(&mut self) {
        self.cipher = None;
    }

    fn build_nonce(&self) -> [u8; XCHACHA_NONCE_LEN] {
        Self::nonce_for_counter(self.mode, self.counter)
    }

    fn nonce_for_counter(mode: CipherMode, counter: u32) -> [u8; XCHACHA_NONCE_LEN] {
        let mut nonce = [0u8; XCHACHA_NONCE_LEN];
        let len = mode.nonce_len();
        nonce[len - COUNTER_LEN..len].copy_from_slice(&counter.to_be_bytes());
        nonce
    }

    fn advance_counter(&mut self) {
        self.counter = if self.counter == u32::MAX {
            0
        } else {
            self.counter + 1
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> [u8; KEY_LEN] {
        let mut key = [0u8; KEY_LEN];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = i as u8;
        }
        key
    }

    #[test]
    fn round_trip_xchacha() {
        let mut cipher =
            VoiceCipher::initialize(CipherMode::AeadXChaCha20Poly1305RtpSize, &key()).unwrap();
        let frame = RtpFrame::new(7, 960, 12345, b"hello".to_vec());
        let blob = cipher.encrypt(&frame).unwrap();

        let mut decryptor =
            VoiceCipher::initialize(CipherMode::AeadXChaCha20Poly1305RtpSize, &key()).unwrap();
        let plaintext = decryptor.decrypt(&blob).unwrap();
        assert_eq!(plaintext, b"hello");
    }

    #[test]
    fn tamper_with_ciphertext_fails_auth() {
        let mut cipher =
            VoiceCipher::initialize(CipherMode::AeadXChaCha20Poly1305RtpSize, &key()).unwrap();
        let frame = RtpFrame::new(7, 960, 12345, b"hello".to_vec());
        let mut blob = cipher.encrypt(&frame).unwrap();
        let last = blob.len() - 5;
        blob[last] ^= 0x01;

        let mut decryptor =
            VoiceCipher::initialize(CipherMode::AeadXChaCha20Poly1305RtpSize, &key()).unwrap();
        assert!(decryptor.decrypt(&blob).is_err());
    }

    #[test]
    fn wrong_nonce_counter_fails_auth() {
        let mut cipher =
            VoiceCipher::initialize(CipherMode::AeadXChaCha20Poly1305RtpSize, &key()).unwrap();
        let frame = RtpFrame::new(7, 960, 12345, b"hello".to_vec());
        let mut blob = cipher.encrypt(&frame).unwrap();
        let len = blob.len();
        blob[len - 4..].copy_from_slice(&1u32.to_be_bytes());

        let mut decryptor =
            VoiceCipher::initialize(CipherMode::AeadXChaCha20Poly1305RtpSize, &key()).unwrap();
        assert!(decryptor.decrypt(&blob).is_err());
    }

    #[test]
    fn bad_key_length_rejected() {
        let err = VoiceCipher::initialize(CipherMode::AeadAes256GcmRtpSize, &[0u8; 16])
            .unwrap_err();
        assert!(matches!(err.kind(), VoiceCipherErrorType::BadKey));
    }

    #[test]
    fn destroy_fails_subsequent_operations() {
        let mut cipher =
            VoiceCipher::initialize(CipherMode::AeadAes256GcmRtpSize, &key()).unwrap();
        cipher.destroy();
        let frame = RtpFrame::new(1, 2, 3, b"x".to_vec());
        assert!(matches!(
            cipher.encrypt(&frame).unwrap_err().kind(),
            VoiceCipherErrorType::NotInitialized
        ));
    }

    #[test]
    fn counter_wraps_at_u32_max() {
        let mut cipher =
            VoiceCipher::initialize(CipherMode::AeadAes256GcmRtpSize, &key()).unwrap();
        cipher.counter = u32::MAX;
        cipher.advance_counter();
        assert_eq!(cipher.counter, 0);
    }

    #[test]
    fn deprecated_mode_name_rejected() {
        let err = VoiceCipher::negotiate("xsalsa20_poly1305_lite", &key()).unwrap_err();
        assert!(matches!(err.kind(), VoiceCipherErrorType::UnsupportedMode));
    }

    #[test]
    fn negotiate_accepts_supported_mode_name() {
        let mut cipher = VoiceCipher::negotiate("aead_aes256_gcm_rtpsize", &key()).unwrap();
        let frame = RtpFrame::new(7, 960, 12345, b"hello".to_vec());
        let blob = cipher.encrypt(&frame).unwrap();

        let mut decryptor =
            VoiceCipher::negotiate("aead_aes256_gcm_rtpsize", &key()).unwrap();
        assert_eq!(decryptor.decrypt(&blob).unwrap(), b"hello");
    }
}
