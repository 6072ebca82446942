//! Ports the gateway consumes but does not implement.
//!
//! The REST client that resolves a gateway URL, shard count, and session
//! start limits is explicitly out of scope for this crate family — callers
//! supply an implementation of [`GatewayDiscovery`] backed by whatever HTTP
//! client they already depend on.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;

/// Discord's per-process allotment of gateway session starts.
///
/// Mirrors the `session_start_limit` object returned by `GET
/// /gateway/bot`. `remaining` is decremented locally by
/// [`StartLimitGate`](crate::StartLimitGate) on every IDENTIFY attempt and
/// refreshed from a fresh [`GatewayDiscovery`] call once it reaches zero.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StartLimit {
    /// Total session starts allowed per `reset_after_ms` window.
    pub total: u64,
    /// Session starts remaining in the current window.
    pub remaining: u64,
    /// Milliseconds until `remaining` resets to `total`.
    pub reset_after_ms: u64,
    /// Maximum number of concurrent IDENTIFY handshakes, at most 16.
    pub max_concurrency: u32,
}

/// Connection information resolved via `GET /gateway/bot`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GatewayBotInfo {
    /// The base gateway URL, e.g. `wss://gateway.discord.gg`.
    pub url: String,
    /// The recommended number of shards for this bot.
    pub shards: u32,
    /// The current session start budget.
    pub session_start_limit: StartLimit,
}

/// External collaborator that resolves gateway connection parameters.
///
/// Implementations typically wrap a REST client. The gateway core never
/// constructs HTTP requests itself; it calls through this port whenever it
/// needs a gateway URL, a shard-count recommendation, or a refreshed
/// [`StartLimit`].
pub trait GatewayDiscovery: Debug + Send + Sync {
    /// Fetch current gateway connection information, including a freshly
    /// reported [`StartLimit`].
    fn get_gateway_bot(&self) -> Pin<Box<dyn Future<Output = GatewayBotInfo> + Send + '_>>;
}
