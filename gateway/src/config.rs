//! C8: the top-level, user-facing `Config` aggregating every knob named in
//! the external-interfaces contract, translated into a [`ShardConfig`]
//! template and a [`PoolConfig`] via [`Config::shard_template`] and
//! [`Config::pool_config`].
//!
//! Grounded on the teacher's top-level `Config`/`ConfigBuilder`
//! (`gateway/src/config.rs`): one consuming builder whose `build()` is
//! itself cheap, fanning out into the per-shard and per-pool pieces the
//! rest of the crate actually drives.

use crate::codec::PayloadEncoding;
use crate::compression::TransportCompression;
use crate::model::Intents;
use crate::pool::{HandoffStrategy, PoolConfig};
use crate::shard::ShardConfig;
#[cfg(feature = "voice")]
use crate::voice::CipherMode;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::time::Duration;

/// Top-level configuration for a bot process.
///
/// Built via [`Config::builder`]; every field has a default matching §6 of
/// the external-interfaces contract. A built `Config` is consumed by
/// [`ShardPool::connect`](crate::pool::ShardPool::connect) through
/// [`Config::shard_template`] and [`Config::pool_config`].
#[derive(Clone)]
pub struct Config {
    api_version: u8,
    token: String,
    intents: Intents,
    encoding: PayloadEncoding,
    transport_compression: TransportCompression,
    large_threshold: u16,
    presence: Option<serde_json::Value>,
    shard_count: Option<u32>,
    spawn_delay: Duration,
    connect_timeout: Duration,
    max_reconnect_attempts: Option<u32>,
    backoff_schedule: Vec<Duration>,
    zombie_threshold: u32,
    ready_cap: Duration,
    handoff_strategy: HandoffStrategy,
    #[cfg(feature = "voice")]
    voice_encryption_mode: CipherMode,
}

impl Config {
    /// Start building a configuration for the given bot token.
    pub fn builder(token: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder::new(token)
    }

    /// The per-shard [`ShardConfig`] template to hand to
    /// [`ShardPool::connect`](crate::pool::ShardPool::connect). Does not
    /// include a [`StartLimitGate`](stormgate_gateway_queue::StartLimitGate);
    /// the pool attaches one shared gate to every shard itself.
    pub fn shard_template(&self) -> impl Fn(u32, u32) -> ShardConfig + Send + Sync + 'static {
        let api_version = self.api_version;
        let token = self.token.clone();
        let intents = self.intents;
        let encoding = self.encoding;
        let compression = self.transport_compression;
        let large_threshold = self.large_threshold;
        let presence = self.presence.clone();
        let connect_timeout = self.connect_timeout;
        let max_reconnect_attempts = self.max_reconnect_attempts;
        let backoff_schedule = self.backoff_schedule.clone();
        let zombie_threshold = self.zombie_threshold;

        move |shard_id, num_shards| {
            let mut builder = ShardConfig::builder(token.clone())
                .api_version(api_version)
                .intents(intents)
                .encoding(encoding)
                .compression(compression)
                .large_threshold(large_threshold)
                .shard(shard_id, num_shards)
                .connect_timeout(connect_timeout)
                .backoff_schedule(backoff_schedule.clone())
                .zombie_threshold(zombie_threshold);

            if let Some(presence) = presence.clone() {
                builder = builder.presence(presence);
            }
            if let Some(max) = max_reconnect_attempts {
                builder = builder.max_reconnect_attempts(max);
            }

            builder.build()
        }
    }

    /// The pool-wide scheduling knobs to hand to
    /// [`ShardPool::connect`](crate::pool::ShardPool::connect).
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            num_shards: self.shard_count,
            spawn_stagger: self.spawn_delay,
            ready_cap: self.ready_cap,
            handoff_strategy: self.handoff_strategy,
        }
    }

    /// Which AEAD mode voice connections should negotiate.
    #[cfg(feature = "voice")]
    pub const fn voice_encryption_mode(&self) -> CipherMode {
        self.voice_encryption_mode
    }
}

impl Debug for Config {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let mut builder = f.debug_struct("Config");
        builder
            .field("api_version", &self.api_version)
            .field("token", &"<redacted>")
            .field("intents", &self.intents)
            .field("encoding", &self.encoding)
            .field("transport_compression", &self.transport_compression)
            .field("large_threshold", &self.large_threshold)
            .field("shard_count", &self.shard_count)
            .field("spawn_delay", &self.spawn_delay)
            .field("connect_timeout", &self.connect_timeout)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("zombie_threshold", &self.zombie_threshold)
            .field("ready_cap", &self.ready_cap)
            .field("handoff_strategy", &self.handoff_strategy);
        #[cfg(feature = "voice")]
        builder.field("voice_encryption_mode", &self.voice_encryption_mode);
        builder.finish()
    }
}

/// Builder for [`Config`].
pub struct ConfigBuilder(Config);

impl ConfigBuilder {
    /// Start a builder with every default from §6 applied.
    pub fn new(token: impl Into<String>) -> Self {
        Self(Config {
            api_version: 10,
            token: token.into(),
            intents: Intents::empty(),
            encoding: PayloadEncoding::Json,
            transport_compression: TransportCompression::ZlibStream,
            large_threshold: 250,
            presence: None,
            shard_count: None,
            spawn_delay: crate::pool::DEFAULT_SPAWN_STAGGER,
            connect_timeout: Duration::from_secs(30),
            max_reconnect_attempts: None,
            backoff_schedule: vec![Duration::from_secs(1), Duration::from_secs(5), Duration::from_secs(10)],
            zombie_threshold: crate::heartbeat::ZOMBIE_THRESHOLD,
            ready_cap: crate::pool::DEFAULT_READY_CAP,
            handoff_strategy: HandoffStrategy::Graceful,
            #[cfg(feature = "voice")]
            voice_encryption_mode: CipherMode::AeadXChaCha20Poly1305RtpSize,
        })
    }

    /// Set the gateway API version.
    pub const fn api_version(mut self, version: u8) -> Self {
        self.0.api_version = version;
        self
    }

    /// Set the subscribed intents.
    pub const fn intents(mut self, intents: Intents) -> Self {
        self.0.intents = intents;
        self
    }

    /// Set the payload encoding (JSON or ETF).
    pub const fn encoding(mut self, encoding: PayloadEncoding) -> Self {
        self.0.encoding = encoding;
        self
    }

    /// Set the transport compression.
    pub const fn transport_compression(mut self, compression: TransportCompression) -> Self {
        self.0.transport_compression = compression;
        self
    }

    /// Set the large-guild member-list threshold, clamped into `[50, 250]`
    /// by [`ShardConfig`].
    pub const fn large_threshold(mut self, threshold: u16) -> Self {
        self.0.large_threshold = threshold;
        self
    }

    /// Set the initial presence sent with every shard's IDENTIFY.
    pub fn presence(mut self, presence: serde_json::Value) -> Self {
        self.0.presence = Some(presence);
        self
    }

    /// Fix the shard count rather than deferring to
    /// [`GatewayDiscovery::get_gateway_bot`](stormgate_gateway_queue::GatewayDiscovery::get_gateway_bot)'s
    /// recommendation.
    pub const fn shard_count(mut self, count: u32) -> Self {
        self.0.shard_count = Some(count);
        self
    }

    /// Set the delay between spawning successive identify buckets.
    pub const fn spawn_delay(mut self, delay: Duration) -> Self {
        self.0.spawn_delay = delay;
        self
    }

    /// Set the connection-open deadline.
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.0.connect_timeout = timeout;
        self
    }

    /// Cap the number of consecutive reconnect attempts per shard before it
    /// gives up. Unset (the default) retries forever.
    pub const fn max_reconnect_attempts(mut self, max: u32) -> Self {
        self.0.max_reconnect_attempts = Some(max);
        self
    }

    /// Set the reconnect backoff schedule. The last entry is reused with
    /// full jitter for every attempt beyond the schedule's length.
    pub fn backoff_schedule(mut self, schedule: Vec<Duration>) -> Self {
        self.0.backoff_schedule = schedule;
        self
    }

    /// Set how many consecutive missed heartbeat acks constitute a zombied
    /// connection.
    pub const fn zombie_threshold(mut self, threshold: u32) -> Self {
        self.0.zombie_threshold = threshold;
        self
    }

    /// Set how long a shard may take to reach `Ready` before it is reported
    /// unhealthy.
    pub const fn ready_cap(mut self, cap: Duration) -> Self {
        self.0.ready_cap = cap;
        self
    }

    /// Set how `ShardPool::shutdown` tears its shards down.
    pub const fn handoff_strategy(mut self, strategy: HandoffStrategy) -> Self {
        self.0.handoff_strategy = strategy;
        self
    }

    /// Set which AEAD mode voice connections should negotiate.
    #[cfg(feature = "voice")]
    pub const fn voice_encryption_mode(mut self, mode: CipherMode) -> Self {
        self.0.voice_encryption_mode = mode;
        self
    }

    /// Finish building.
    pub fn build(self) -> Config {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_external_interface_contract() {
        let config = Config::builder("token").build();
        assert_eq!(config.api_version, 10);
        assert_eq!(config.encoding, PayloadEncoding::Json);
        assert_eq!(config.transport_compression, TransportCompression::ZlibStream);
        assert_eq!(config.large_threshold, 250);
        assert_eq!(config.zombie_threshold, crate::heartbeat::ZOMBIE_THRESHOLD);
        assert_eq!(config.max_reconnect_attempts, None);
        assert_eq!(config.handoff_strategy, HandoffStrategy::Graceful);
    }

    #[test]
    fn shard_template_threads_per_shard_fields_through() {
        let config = Config::builder("token").shard_count(4).max_reconnect_attempts(3).build();
        let template = config.shard_template();
        let shard_config = template(2, 4);
        assert_eq!(shard_config.shard, Some([2, 4]));
        assert_eq!(shard_config.max_reconnect_attempts, Some(3));
    }

    #[test]
    fn pool_config_carries_shard_count_and_handoff_strategy() {
        let config = Config::builder("token")
            .shard_count(8)
            .handoff_strategy(HandoffStrategy::Immediate)
            .build();
        let pool_config = config.pool_config();
        assert_eq!(pool_config.num_shards, Some(8));
        assert_eq!(pool_config.handoff_strategy, HandoffStrategy::Immediate);
    }
}
