//! C5: `ShardPool` — spawns and supervises every shard for a bot process:
//! bucketed, staggered IDENTIFYs within Discord's `max_concurrency`, a
//! Ready-by deadline per shard, guild-routed command dispatch, and
//! aggregated statistics.
//!
//! Grounded on the teacher's `cluster/impl.rs` (`Cluster`): a map of shard
//! id to shard handle behind an `Arc`, a `start` helper per shard, and
//! `info`/`command`/`down` aggregate operations. The per-bucket serialization
//! itself is the teacher's `LargeBotQueue` (one waiter per `max_concurrency`
//! bucket) generalized into [`BucketedQueue`](stormgate_gateway_queue::BucketedQueue),
//! driven by this pool's `spawn_stagger` instead of a fixed 6 seconds: spawning
//! shards in bucket order with a sleep between buckets only staggers the
//! *first* shard of each bucket, so the actual mutual exclusion within a
//! bucket happens inside each shard's own `drive_session`, not here.

use crate::model::{Opcode, PayloadEnvelope};
use crate::routing::shard_id_for_guild;
use crate::shard::{GatewaySession, Phase, ShardConfig, ShardSendError, ShardSendErrorType, SessionInfo};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use stormgate_gateway_queue::{BucketedQueue, GatewayDiscovery, StartLimitGate};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use tokio::time::sleep;

/// Default minimum gap between two IDENTIFYs in the same `max_concurrency`
/// bucket.
pub const DEFAULT_SPAWN_STAGGER: Duration = Duration::from_millis(5000);
/// Default deadline for a newly spawned shard to reach [`Phase::Ready`].
pub const DEFAULT_READY_CAP: Duration = Duration::from_secs(30);
/// How long [`ShardPool::shutdown`] waits after issuing close frames under
/// [`HandoffStrategy::Graceful`] before the caller's future resolves.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(500);

/// How [`ShardPool::shutdown`] tears down its shards.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum HandoffStrategy {
    /// Send a clean close frame to every shard and give the sockets a
    /// moment to flush it before returning.
    #[default]
    Graceful,
    /// Abort every shard's task immediately without waiting.
    Immediate,
}

/// Pool-wide scheduling knobs, independent of any one shard's
/// [`ShardConfig`].
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Total number of shards to run. `None` defers to the recommended
    /// count from [`GatewayDiscovery::get_gateway_bot`].
    pub num_shards: Option<u32>,
    /// Minimum gap between two IDENTIFYs in the same `max_concurrency`
    /// bucket, enforced by a [`BucketedQueue`].
    pub spawn_stagger: Duration,
    /// How long a shard may take to reach [`Phase::Ready`] before it is
    /// reported unhealthy in [`ShardPool::stats`].
    pub ready_cap: Duration,
    /// How [`ShardPool::shutdown`] tears its shards down.
    pub handoff_strategy: HandoffStrategy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_shards: None,
            spawn_stagger: DEFAULT_SPAWN_STAGGER,
            ready_cap: DEFAULT_READY_CAP,
            handoff_strategy: HandoffStrategy::default(),
        }
    }
}

/// Aggregated statistics across every shard in a pool.
#[derive(Clone, Debug)]
pub struct PoolStats {
    /// Total shards managed.
    pub total: usize,
    /// Shards currently in [`Phase::Ready`].
    pub ready: usize,
    /// Shards that have not reached Ready within the configured cap.
    pub unhealthy: Vec<u32>,
    /// Mean heartbeat round-trip latency across shards that have acked at
    /// least one heartbeat, or `None` if none have yet.
    pub mean_latency: Option<Duration>,
    /// How long the longest-running shard has been spawned, or `None` if
    /// the pool manages no shards.
    pub oldest_shard_uptime: Option<Duration>,
    /// Number of distinct guilds seen across every shard's dispatches, via
    /// `GUILD_CREATE`/`GUILD_DELETE`. Not a live membership cache: guilds
    /// that become unavailable without a `GUILD_DELETE` are not removed.
    pub guild_count: usize,
}

/// Spawns and supervises every [`GatewaySession`] for one bot process.
#[derive(Debug)]
pub struct ShardPool {
    sessions: RwLock<HashMap<u32, Arc<GatewaySession>>>,
    spawned_at: RwLock<HashMap<u32, Instant>>,
    guild_ids: Arc<Mutex<HashSet<u64>>>,
    num_shards: u32,
    ready_cap: Duration,
    handoff_strategy: HandoffStrategy,
    events_tx: UnboundedSender<(u32, PayloadEnvelope)>,
}

impl ShardPool {
    /// Resolve gateway connection parameters via `discovery`, then spawn
    /// every shard in bucketed, staggered order so that at most
    /// `max_concurrency` IDENTIFYs are in flight at once.
    ///
    /// Returns the pool handle plus a merged stream of every shard's
    /// dispatch envelopes, each tagged with its originating shard id.
    pub async fn connect(
        discovery: Arc<dyn GatewayDiscovery>,
        config_template: impl Fn(u32, u32) -> ShardConfig + Send + Sync + 'static,
        pool_config: PoolConfig,
    ) -> (Self, UnboundedReceiver<(u32, PayloadEnvelope)>) {
        let info = discovery.get_gateway_bot().await;
        let num_shards = pool_config.num_shards.unwrap_or(info.shards).max(1);
        let max_concurrency = info.session_start_limit.max_concurrency.max(1);

        let gate = Arc::new(StartLimitGate::new(Arc::clone(&discovery)).await);
        let queue = Arc::new(BucketedQueue::new(max_concurrency, pool_config.spawn_stagger));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let pool = Self {
            sessions: RwLock::new(HashMap::with_capacity(num_shards as usize)),
            spawned_at: RwLock::new(HashMap::with_capacity(num_shards as usize)),
            guild_ids: Arc::new(Mutex::new(HashSet::new())),
            num_shards,
            ready_cap: pool_config.ready_cap,
            handoff_strategy: pool_config.handoff_strategy,
            events_tx,
        };

        tracing::info!(num_shards, max_concurrency, url = %info.url, "starting shard pool");

        // Every shard is spawned up front; `BucketedQueue` is what actually
        // serializes IDENTIFYs within a bucket (see the module docs above).
        for shard_id in 0..num_shards {
            let config = config_template(shard_id, num_shards)
                .with_start_limit_gate(Arc::clone(&gate))
                .with_queue(Arc::clone(&queue));
            let session = Arc::new(GatewaySession::new(config));
            let mut events = session.open(info.url.clone());

            let forward = pool.events_tx.clone();
            let guild_ids = Arc::clone(&pool.guild_ids);
            tokio::spawn(async move {
                while let Some(envelope) = events.recv().await {
                    track_guild(&guild_ids, &envelope);
                    if forward.send((shard_id, envelope)).is_err() {
                        break;
                    }
                }
            });

            let watchdog_session = Arc::clone(&session);
            let ready_cap = pool.ready_cap;
            tokio::spawn(async move {
                sleep(ready_cap).await;
                if !matches!(watchdog_session.phase(), Phase::Ready | Phase::Dead) {
                    tracing::warn!(shard_id, ?ready_cap, "shard missed its ready deadline, closing");
                    watchdog_session.close();
                }
            });

            pool.sessions.write().await.insert(shard_id, session);
            pool.spawned_at.write().await.insert(shard_id, Instant::now());
        }

        (pool, events_rx)
    }

    /// Number of shards this pool manages.
    pub const fn num_shards(&self) -> u32 {
        self.num_shards
    }

    /// Send a command to the shard that owns `guild_id`'s events, per
    /// [`shard_id_for_guild`].
    pub async fn send_for_guild<T: Serialize>(
        &self,
        guild_id: u64,
        op: Opcode,
        data: T,
    ) -> Result<(), ShardSendError> {
        let shard_id = shard_id_for_guild(guild_id, self.num_shards);
        self.send(shard_id, op, data).await
    }

    /// Send a command to a specific shard by id.
    pub async fn send<T: Serialize>(&self, shard_id: u32, op: Opcode, data: T) -> Result<(), ShardSendError> {
        let sessions = self.sessions.read().await;
        match sessions.get(&shard_id) {
            Some(session) => session.send(op, data),
            None => Err(ShardSendError {
                kind: ShardSendErrorType::NotConnected,
                source: None,
            }),
        }
    }

    /// Snapshot every shard's [`SessionInfo`], keyed by shard id.
    pub async fn info(&self) -> HashMap<u32, SessionInfo> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|(id, session)| (*id, session.info()))
            .collect()
    }

    /// Aggregate health and traffic across every shard: how many are Ready
    /// versus how many have neither reached Ready nor gone Dead within
    /// `ready_cap` of being spawned (`unhealthy` reports shards stuck
    /// outside `Ready`/`Dead` right now, not a historical failure log),
    /// mean heartbeat latency, the longest-running shard's uptime, and the
    /// number of distinct guilds observed so far.
    pub async fn stats(&self) -> PoolStats {
        let sessions = self.sessions.read().await;
        let total = sessions.len();
        let mut ready = 0;
        let mut unhealthy = Vec::new();
        let mut latencies = Vec::new();

        for (id, session) in sessions.iter() {
            match session.phase() {
                Phase::Ready => ready += 1,
                Phase::Dead => {}
                _ => unhealthy.push(*id),
            }
            if let Some(average) = session.latency().average() {
                latencies.push(average);
            }
        }

        let mean_latency = if latencies.is_empty() {
            None
        } else {
            Some(latencies.iter().sum::<Duration>() / u32::try_from(latencies.len()).unwrap_or(1))
        };

        let oldest_shard_uptime = self
            .spawned_at
            .read()
            .await
            .values()
            .min()
            .map(|spawned_at| spawned_at.elapsed());

        let guild_count = self.guild_ids.lock().unwrap().len();

        #[cfg(feature = "metrics")]
        {
            metrics::gauge!("ShardPool-Total", total as f64);
            metrics::gauge!("ShardPool-Ready", ready as f64);
            metrics::gauge!("ShardPool-Unhealthy", unhealthy.len() as f64);
            metrics::gauge!("ShardPool-GuildCount", guild_count as f64);
        }

        PoolStats {
            total,
            ready,
            unhealthy,
            mean_latency,
            oldest_shard_uptime,
            guild_count,
        }
    }

    /// Close every shard, ending their background tasks. Sessions are not
    /// resumable afterward. Under [`HandoffStrategy::Graceful`] (the
    /// default), waits [`DEFAULT_GRACE_PERIOD`] after issuing close frames
    /// so the sockets have a chance to flush them before returning.
    pub async fn shutdown(&self) {
        tracing::info!(strategy = ?self.handoff_strategy, "shutting down shard pool");

        for session in self.sessions.read().await.values() {
            session.close();
        }

        if self.handoff_strategy == HandoffStrategy::Graceful {
            sleep(DEFAULT_GRACE_PERIOD).await;
        }
    }
}

/// Maintain the pool's guild id set from a passing dispatch, if it names one.
fn track_guild(guild_ids: &Mutex<HashSet<u64>>, envelope: &PayloadEnvelope) {
    let guild_id = envelope
        .data
        .get("id")
        .and_then(serde_json::Value::as_str)
        .and_then(|id| id.parse::<u64>().ok());

    let Some(guild_id) = guild_id else {
        return;
    };

    match envelope.event_type.as_deref() {
        Some("GUILD_CREATE") => {
            guild_ids.lock().unwrap().insert(guild_id);
        }
        Some("GUILD_DELETE") => {
            guild_ids.lock().unwrap().remove(&guild_id);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatch(event_type: &str, id: &str) -> PayloadEnvelope {
        PayloadEnvelope {
            op: Some(Opcode::Dispatch),
            raw_op: 0,
            data: serde_json::json!({ "id": id }),
            sequence: Some(1),
            event_type: Some(event_type.to_owned()),
        }
    }

    #[test]
    fn guild_create_then_delete_round_trips_through_the_set() {
        let guild_ids = Mutex::new(HashSet::new());

        track_guild(&guild_ids, &dispatch("GUILD_CREATE", "613425648685547541"));
        assert_eq!(guild_ids.lock().unwrap().len(), 1);

        track_guild(&guild_ids, &dispatch("GUILD_DELETE", "613425648685547541"));
        assert!(guild_ids.lock().unwrap().is_empty());
    }

    #[test]
    fn unrelated_dispatch_is_ignored() {
        let guild_ids = Mutex::new(HashSet::new());
        track_guild(&guild_ids, &dispatch("MESSAGE_CREATE", "613425648685547541"));
        assert!(guild_ids.lock().unwrap().is_empty());
    }
}
