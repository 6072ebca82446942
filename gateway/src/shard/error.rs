//! Error types surfaced by [`GatewaySession`](super::GatewaySession), one
//! struct per failing operation in the teacher's `kind`+`source` style.

use std::{
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// Opening a connection failed.
#[derive(Debug)]
pub struct ConnectError {
    pub(crate) kind: ConnectErrorType,
    pub(crate) source: Option<Box<dyn Error + Send + Sync>>,
}

impl ConnectError {
    /// Return the type of error that occurred.
    pub const fn kind(&self) -> &ConnectErrorType {
        &self.kind
    }
}

impl Display for ConnectError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ConnectErrorType::Establishing => f.write_str("failed to establish the websocket connection"),
            ConnectErrorType::ParsingUrl { url } => write!(f, "gateway url `{url}` is not a valid websocket url"),
            ConnectErrorType::Timeout => f.write_str("the connection attempt exceeded its deadline"),
        }
    }
}

impl Error for ConnectError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_deref().map(|source| source as &(dyn Error + 'static))
    }
}

/// Type of [`ConnectError`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum ConnectErrorType {
    /// The TLS/TCP/WebSocket handshake failed.
    Establishing,
    /// The constructed gateway URL failed to parse.
    ParsingUrl {
        /// The URL that failed to parse.
        url: String,
    },
    /// No Hello arrived within the configured deadline.
    Timeout,
}

/// Receiving and processing a single gateway message failed.
#[derive(Debug)]
pub struct ProcessError {
    pub(crate) kind: ProcessErrorType,
    pub(crate) source: Option<Box<dyn Error + Send + Sync>>,
}

impl ProcessError {
    /// Return the type of error that occurred.
    pub const fn kind(&self) -> &ProcessErrorType {
        &self.kind
    }
}

impl Display for ProcessError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ProcessErrorType::Codec => f.write_str("failed to decode an incoming payload"),
            ProcessErrorType::UnknownOpcode { opcode } => {
                write!(f, "received opcode {opcode} outside the documented closed set")
            }
            ProcessErrorType::UnexpectedOpcode { opcode, phase } => {
                write!(f, "received opcode {opcode:?} while in phase {phase:?}")
            }
        }
    }
}

impl Error for ProcessError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_deref().map(|source| source as &(dyn Error + 'static))
    }
}

/// Type of [`ProcessError`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum ProcessErrorType {
    /// The payload envelope failed to decode.
    Codec,
    /// The inbound opcode fell outside the documented closed set. Not
    /// fatal: the envelope is discarded and the session continues.
    UnknownOpcode {
        /// The unrecognized raw opcode.
        opcode: u8,
    },
    /// The inbound opcode was recognized but not valid in the current
    /// phase. Logged and ignored unless the phase is terminal.
    UnexpectedOpcode {
        /// The unexpected opcode.
        opcode: crate::model::Opcode,
        /// The phase it arrived in.
        phase: crate::shard::stage::Phase,
    },
}

/// Sending a payload failed.
#[derive(Debug)]
pub struct ShardSendError {
    pub(crate) kind: ShardSendErrorType,
    pub(crate) source: Option<Box<dyn Error + Send + Sync>>,
}

impl ShardSendError {
    /// Return the type of error that occurred.
    pub const fn kind(&self) -> &ShardSendErrorType {
        &self.kind
    }
}

impl Display for ShardSendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ShardSendErrorType::NotConnected => {
                f.write_str("session is not in a phase that accepts sends")
            }
            ShardSendErrorType::Serializing => f.write_str("failed to serialize the outbound payload"),
            ShardSendErrorType::Sending => f.write_str("failed to write to the websocket"),
        }
    }
}

impl Error for ShardSendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_deref().map(|source| source as &(dyn Error + 'static))
    }
}

/// Type of [`ShardSendError`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum ShardSendErrorType {
    /// `send` was called while the phase did not accept sends.
    NotConnected,
    /// The outbound payload could not be encoded.
    Serializing,
    /// The websocket write failed.
    Sending,
}

/// A close code classified as non-recoverable was received; the session is
/// now [`Phase::Dead`](super::stage::Phase::Dead) and will not
/// automatically reconnect.
#[derive(Debug)]
pub struct FatalCloseError {
    pub(crate) code: u16,
    pub(crate) reason: String,
}

impl FatalCloseError {
    /// The close code that was received.
    pub const fn code(&self) -> u16 {
        self.code
    }

    /// The close reason text, if any was sent.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl Display for FatalCloseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "gateway closed with non-recoverable code {}: {}",
            self.code, self.reason
        )
    }
}

impl Error for FatalCloseError {}
