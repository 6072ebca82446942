//! Wire-level types shared by every component: the opcode set, the payload
//! envelope, close-code classification, and the intents bitfield.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// A gateway opcode, the small integer in every payload envelope's `op`
/// field.
///
/// The full set is closed; an opcode not in this list is reported as
/// [`UnknownOpcode`](crate::error::ProcessErrorType::UnknownOpcode) and the
/// envelope is discarded rather than treated as fatal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Opcode {
    /// An event was dispatched.
    Dispatch,
    /// Fired periodically by the client to keep the connection alive.
    Heartbeat,
    /// Starts a new session during the initial handshake.
    Identify,
    /// Update the client's presence.
    PresenceUpdate,
    /// Used to join/leave or move between voice channels.
    VoiceStateUpdate,
    /// Resume a previous session that was disconnected.
    Resume,
    /// You should attempt to reconnect and resume immediately.
    Reconnect,
    /// Request information about offline guild members in a large guild.
    RequestGuildMembers,
    /// The session has been invalidated; reconnect and identify/resume
    /// accordingly.
    InvalidSession,
    /// Sent immediately after connecting, contains heartbeat and server
    /// debug information.
    Hello,
    /// Sent in response to receiving a heartbeat to acknowledge it was
    /// received.
    HeartbeatAck,
    /// Request to join a soundboard sound in a voice channel.
    RequestSoundboard,
}

impl Opcode {
    /// Convert to the integer used on the wire, or `None` if this variant
    /// has no wire representation (there are none today, but the mapping is
    /// kept fallible for forward compatibility).
    pub const fn to_u8(self) -> u8 {
        match self {
            Self::Dispatch => 0,
            Self::Heartbeat => 1,
            Self::Identify => 2,
            Self::PresenceUpdate => 3,
            Self::VoiceStateUpdate => 4,
            Self::Resume => 6,
            Self::Reconnect => 7,
            Self::RequestGuildMembers => 8,
            Self::InvalidSession => 9,
            Self::Hello => 10,
            Self::HeartbeatAck => 11,
            Self::RequestSoundboard => 31,
        }
    }

    /// Parse a wire opcode, returning `None` for anything outside the
    /// closed set.
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Dispatch,
            1 => Self::Heartbeat,
            2 => Self::Identify,
            3 => Self::PresenceUpdate,
            4 => Self::VoiceStateUpdate,
            6 => Self::Resume,
            7 => Self::Reconnect,
            8 => Self::RequestGuildMembers,
            9 => Self::InvalidSession,
            10 => Self::Hello,
            11 => Self::HeartbeatAck,
            31 => Self::RequestSoundboard,
            _ => return None,
        })
    }

    /// Whether this opcode is one the client is permitted to send.
    pub const fn is_sendable(self) -> bool {
        matches!(
            self,
            Self::Heartbeat
                | Self::Identify
                | Self::PresenceUpdate
                | Self::VoiceStateUpdate
                | Self::Resume
                | Self::RequestGuildMembers
                | Self::RequestSoundboard
        )
    }
}

/// The decoded four-field payload envelope common to every gateway frame.
///
/// `sequence` and `event_type` are populated iff `opcode == Opcode::Dispatch`
/// — this invariant is upheld by both codecs ([`json`](crate::json) and
/// [`etf`](crate::etf)) at decode time.
#[derive(Clone, Debug)]
pub struct PayloadEnvelope {
    /// The opcode, or `None` if the wire value fell outside the closed set.
    pub op: Option<Opcode>,
    /// The raw wire opcode, retained even when `op` is `None` so callers can
    /// report it.
    pub raw_op: u8,
    /// Opaque event data; left undecoded at this layer.
    pub data: serde_json::Value,
    /// Present only on Dispatch; the monotonic-per-session sequence number.
    pub sequence: Option<u64>,
    /// Present only on Dispatch; the event name, e.g. `"READY"`.
    pub event_type: Option<String>,
}

/// A payload envelope ready to be encoded for sending. Unlike
/// [`PayloadEnvelope`], outbound envelopes never carry a sequence number or
/// event name except for heartbeats, which set `d` to the last known
/// sequence.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct OutgoingEnvelope<T> {
    pub op: u8,
    pub d: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl<T> OutgoingEnvelope<T> {
    pub(crate) fn new(op: Opcode, data: T) -> Self {
        Self {
            op: op.to_u8(),
            d: data,
            s: None,
            t: None,
        }
    }
}

bitflags! {
    /// Bitfield declared at IDENTIFY selecting which categories of dispatch
    /// events the session wants to receive.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct Intents: u32 {
        /// GUILDS intent.
        const GUILDS = 1 << 0;
        /// GUILD_MEMBERS intent, privileged.
        const GUILD_MEMBERS = 1 << 1;
        /// GUILD_MODERATION intent.
        const GUILD_MODERATION = 1 << 2;
        /// GUILD_EMOJIS_AND_STICKERS intent.
        const GUILD_EMOJIS_AND_STICKERS = 1 << 3;
        /// GUILD_INTEGRATIONS intent.
        const GUILD_INTEGRATIONS = 1 << 4;
        /// GUILD_WEBHOOKS intent.
        const GUILD_WEBHOOKS = 1 << 5;
        /// GUILD_INVITES intent.
        const GUILD_INVITES = 1 << 6;
        /// GUILD_VOICE_STATES intent.
        const GUILD_VOICE_STATES = 1 << 7;
        /// GUILD_PRESENCES intent, privileged.
        const GUILD_PRESENCES = 1 << 8;
        /// GUILD_MESSAGES intent.
        const GUILD_MESSAGES = 1 << 9;
        /// GUILD_MESSAGE_REACTIONS intent.
        const GUILD_MESSAGE_REACTIONS = 1 << 10;
        /// GUILD_MESSAGE_TYPING intent.
        const GUILD_MESSAGE_TYPING = 1 << 11;
        /// DIRECT_MESSAGES intent.
        const DIRECT_MESSAGES = 1 << 12;
        /// DIRECT_MESSAGE_REACTIONS intent.
        const DIRECT_MESSAGE_REACTIONS = 1 << 13;
        /// DIRECT_MESSAGE_TYPING intent.
        const DIRECT_MESSAGE_TYPING = 1 << 14;
        /// MESSAGE_CONTENT intent, privileged.
        const MESSAGE_CONTENT = 1 << 15;
        /// GUILD_SCHEDULED_EVENTS intent.
        const GUILD_SCHEDULED_EVENTS = 1 << 16;
        /// AUTO_MODERATION_CONFIGURATION intent.
        const AUTO_MODERATION_CONFIGURATION = 1 << 20;
        /// AUTO_MODERATION_EXECUTION intent.
        const AUTO_MODERATION_EXECUTION = 1 << 21;
        /// GUILD_MESSAGE_POLLS intent.
        const GUILD_MESSAGE_POLLS = 1 << 24;
        /// DIRECT_MESSAGE_POLLS intent.
        const DIRECT_MESSAGE_POLLS = 1 << 25;
    }
}

/// How a WebSocket close code should be handled by [`GatewaySession`].
///
/// [`GatewaySession`]: crate::shard::GatewaySession
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CloseCodeClass {
    /// Reconnect without attempting to resume.
    CleanReconnect,
    /// Reconnect and attempt to resume the previous session.
    ResumableReconnect,
    /// Do not retry; surface a fatal error and transition to `Dead`.
    NonRecoverable,
    /// A close code outside the documented set; treated as resumable to
    /// fail safe.
    Unknown,
}

/// Classify a WebSocket close code per the gateway's documented behavior.
///
/// Grounded on the closed set enumerated for the protocol: clean codes
/// (1000, 1001) reconnect fresh, the resumable-transient set reconnects with
/// resume, and the non-recoverable set surfaces a fatal error with no retry.
pub const fn classify_close_code(code: u16) -> CloseCodeClass {
    match code {
        1000 | 1001 => CloseCodeClass::CleanReconnect,
        4000 | 4001 | 4002 | 4003 | 4005 | 4007 | 4008 | 4009 => {
            CloseCodeClass::ResumableReconnect
        }
        4004 | 4010 | 4011 | 4012 | 4013 | 4014 => CloseCodeClass::NonRecoverable,
        _ => CloseCodeClass::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_roundtrip() {
        for raw in 0u8..=31 {
            if let Some(op) = Opcode::from_u8(raw) {
                assert_eq!(op.to_u8(), raw);
            }
        }
        assert!(Opcode::from_u8(5).is_none());
        assert!(Opcode::from_u8(12).is_none());
    }

    #[test]
    fn close_code_classification() {
        assert_eq!(classify_close_code(1000), CloseCodeClass::CleanReconnect);
        assert_eq!(classify_close_code(1001), CloseCodeClass::CleanReconnect);
        assert_eq!(
            classify_close_code(4000),
            CloseCodeClass::ResumableReconnect
        );
        assert_eq!(
            classify_close_code(4009),
            CloseCodeClass::ResumableReconnect
        );
        assert_eq!(classify_close_code(4004), CloseCodeClass::NonRecoverable);
        assert_eq!(classify_close_code(4014), CloseCodeClass::NonRecoverable);
        assert_eq!(classify_close_code(9999), CloseCodeClass::Unknown);
    }

    #[test]
    fn non_recoverable_codes_never_reconnect() {
        const NON_RECOVERABLE: [u16; 6] = [4004, 4010, 4011, 4012, 4013, 4014];
        for code in NON_RECOVERABLE {
            assert_eq!(classify_close_code(code), CloseCodeClass::NonRecoverable);
        }
    }
}
