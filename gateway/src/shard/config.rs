//! Per-shard configuration and its builder.

use crate::codec::PayloadEncoding;
use crate::compression::TransportCompression;
use crate::model::Intents;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::time::Duration;
use stormgate_gateway_queue::{LocalQueue, Queue, StartLimitGate};

/// Configuration for one [`GatewaySession`](super::GatewaySession).
///
/// Built via [`ShardConfig::builder`]; every field has a default matching
/// §6 of the core specification.
#[derive(Clone)]
pub struct ShardConfig {
    pub(crate) api_version: u8,
    pub(crate) token: Arc<str>,
    pub(crate) intents: Intents,
    pub(crate) encoding: PayloadEncoding,
    pub(crate) compression: TransportCompression,
    pub(crate) large_threshold: u16,
    pub(crate) presence: Option<serde_json::Value>,
    pub(crate) shard: Option<[u32; 2]>,
    pub(crate) connect_timeout: Duration,
    pub(crate) hello_timeout: Duration,
    pub(crate) backoff_schedule: Arc<[Duration]>,
    pub(crate) max_reconnect_attempts: Option<u32>,
    pub(crate) zombie_threshold: u32,
    pub(crate) start_limit_gate: Option<Arc<StartLimitGate>>,
    pub(crate) queue: Arc<dyn Queue>,
}

impl ShardConfig {
    /// Start building a configuration for the given bot token.
    pub fn builder(token: impl Into<String>) -> ShardConfigBuilder {
        ShardConfigBuilder::new(token)
    }

    /// Attach a shared session-start budget gate, as [`ShardPool`] does when
    /// it hands out one per-shard config from a template.
    ///
    /// [`ShardPool`]: crate::pool::ShardPool
    pub fn with_start_limit_gate(mut self, gate: Arc<StartLimitGate>) -> Self {
        self.start_limit_gate = Some(gate);
        self
    }

    /// Attach a shared identify queue, as [`ShardPool`] does when it hands
    /// out one per-shard config from a template so that shards sharing a
    /// `max_concurrency` bucket identify one at a time.
    ///
    /// [`ShardPool`]: crate::pool::ShardPool
    pub fn with_queue(mut self, queue: Arc<dyn Queue>) -> Self {
        self.queue = queue;
        self
    }
}

impl Debug for ShardConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ShardConfig")
            .field("api_version", &self.api_version)
            .field("token", &"<redacted>")
            .field("intents", &self.intents)
            .field("encoding", &self.encoding)
            .field("compression", &self.compression)
            .field("large_threshold", &self.large_threshold)
            .field("shard", &self.shard)
            .field("connect_timeout", &self.connect_timeout)
            .field("hello_timeout", &self.hello_timeout)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("zombie_threshold", &self.zombie_threshold)
            .finish()
    }
}

/// Builder for [`ShardConfig`].
pub struct ShardConfigBuilder(ShardConfig);

impl ShardConfigBuilder {
    /// Start a builder with every default from §6 applied.
    pub fn new(token: impl Into<String>) -> Self {
        Self(ShardConfig {
            api_version: 10,
            token: Arc::from(token.into()),
            intents: Intents::empty(),
            encoding: PayloadEncoding::Json,
            compression: TransportCompression::ZlibStream,
            large_threshold: 250,
            presence: None,
            shard: None,
            connect_timeout: Duration::from_secs(30),
            hello_timeout: Duration::from_secs(20),
            backoff_schedule: Arc::from(
                [1000u64, 5000, 10000]
                    .map(Duration::from_millis)
                    .to_vec(),
            ),
            max_reconnect_attempts: None,
            zombie_threshold: crate::heartbeat::ZOMBIE_THRESHOLD,
            start_limit_gate: None,
            queue: Arc::new(LocalQueue::new()),
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
    pub const fn compression(mut self, compression: TransportCompression) -> Self {
        self.0.compression = compression;
        self
    }

    /// Set the large-guild member-list threshold, clamped into `[50, 250]`.
    pub fn large_threshold(mut self, threshold: u16) -> Self {
        self.0.large_threshold = threshold.clamp(50, 250);
        self
    }

    /// Set the initial presence sent with IDENTIFY.
    pub fn presence(mut self, presence: serde_json::Value) -> Self {
        self.0.presence = Some(presence);
        self
    }

    /// Set `[shard_id, num_shards]` for this session.
    pub const fn shard(mut self, shard_id: u32, num_shards: u32) -> Self {
        self.0.shard = Some([shard_id, num_shards]);
        self
    }

    /// Set the connection-open deadline.
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.0.connect_timeout = timeout;
        self
    }

    /// Set the Hello-arrival deadline.
    pub const fn hello_timeout(mut self, timeout: Duration) -> Self {
        self.0.hello_timeout = timeout;
        self
    }

    /// Set the reconnect backoff schedule. The last entry is reused with
    /// full jitter for every attempt beyond the schedule's length.
    pub fn backoff_schedule(mut self, schedule: Vec<Duration>) -> Self {
        self.0.backoff_schedule = Arc::from(schedule);
        self
    }

    /// Cap the number of consecutive reconnect attempts before the session
    /// gives up and transitions to [`Phase::Dead`](crate::shard::Phase::Dead).
    /// `None` (the default) retries forever.
    pub const fn max_reconnect_attempts(mut self, max: u32) -> Self {
        self.0.max_reconnect_attempts = Some(max);
        self
    }

    /// Set how many consecutive missed heartbeat acks constitute a zombied
    /// connection.
    pub const fn zombie_threshold(mut self, threshold: u32) -> Self {
        self.0.zombie_threshold = threshold;
        self
    }

    /// Share a session-start budget gate across every shard in a pool. A
    /// fresh IDENTIFY acquires a slot from it before sending; RESUME does
    /// not consume budget.
    pub fn start_limit_gate(mut self, gate: Arc<StartLimitGate>) -> Self {
        self.0.start_limit_gate = Some(gate);
        self
    }

    /// Set the queue used to serialize this shard's IDENTIFY attempts with
    /// others sharing its `max_concurrency` bucket. Defaults to a private
    /// single-shard [`LocalQueue`]; [`ShardPool`](crate::pool::ShardPool)
    /// overrides this per shard with a pool-wide [`BucketedQueue`].
    ///
    /// [`BucketedQueue`]: stormgate_gateway_queue::BucketedQueue
    pub fn queue(mut self, queue: Arc<dyn Queue>) -> Self {
        self.0.queue = queue;
        self
    }

    /// Finish building.
    pub fn build(self) -> ShardConfig {
        self.0
    }
}
