//! Bodies for every opcode a session is permitted to send (§4.4.2,
//! §4.7).

use serde::Serialize;

/// `d` payload for op=2 Identify.
#[derive(Debug, Serialize)]
pub struct Identify {
    pub token: String,
    pub properties: IdentifyProperties,
    /// Payload-level zlib compression; distinct from transport compression
    /// and always disabled.
    pub compress: bool,
    pub large_threshold: u8,
    pub intents: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<[u32; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<serde_json::Value>,
}

/// `properties` field of [`Identify`].
#[derive(Debug, Serialize)]
pub struct IdentifyProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl IdentifyProperties {
    /// Build properties identifying this library.
    pub fn new() -> Self {
        Self {
            os: std::env::consts::OS.to_owned(),
            browser: "stormgate".to_owned(),
            device: "stormgate".to_owned(),
        }
    }
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self::new()
    }
}

/// `d` payload for op=6 Resume.
#[derive(Debug, Serialize)]
pub struct Resume {
    pub token: String,
    pub session_id: String,
    pub seq: u64,
}

/// `d` payload for op=3 PresenceUpdate.
#[derive(Debug, Serialize)]
pub struct PresenceUpdate {
    pub since: Option<u64>,
    pub activities: Vec<serde_json::Value>,
    pub status: String,
    pub afk: bool,
}

/// `d` payload for op=4 VoiceStateUpdate.
#[derive(Debug, Serialize)]
pub struct VoiceStateUpdate {
    pub guild_id: String,
    pub channel_id: Option<String>,
    pub self_mute: bool,
    pub self_deaf: bool,
}

/// `d` payload for op=8 RequestGuildMembers.
#[derive(Debug, Serialize)]
pub struct RequestGuildMembers {
    pub guild_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_ids: Option<Vec<String>>,
    pub presences: bool,
}

/// `d` payload for op=31 RequestSoundboard.
#[derive(Debug, Serialize)]
pub struct RequestSoundboard {
    pub guild_ids: Vec<String>,
}

/// `d` payload for op=1 Heartbeat: the last known sequence, or `None` if
/// the session has not yet observed one.
pub type Heartbeat = Option<u64>;
