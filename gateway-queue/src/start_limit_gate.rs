use crate::discovery::GatewayDiscovery;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::Mutex,
    time::{self, Instant},
};

#[derive(Debug)]
struct Inner {
    discovery: Arc<dyn GatewayDiscovery>,
    last_check: Instant,
    next_reset: Duration,
    total: u64,
    current: u64,
}

/// Process-scoped gate on Discord's daily/5-second session-start budget.
///
/// Corresponds to `SessionLedger::acquire_start_slot` in the gateway core:
/// every IDENTIFY attempt across every shard of a [`ShardPool`] must pass
/// through a single gate instance, since the budget is shared across shards
/// of the same pool, not per-shard.
///
/// [`ShardPool`]: https://docs.rs/stormgate-gateway/latest/stormgate_gateway/struct.ShardPool.html
#[derive(Debug)]
pub struct StartLimitGate(Mutex<Inner>);

impl StartLimitGate {
    /// Create a new gate, immediately resolving the current budget via
    /// `discovery`.
    pub async fn new(discovery: Arc<dyn GatewayDiscovery>) -> Self {
        let info = discovery.get_gateway_bot().await;
        let limit = info.session_start_limit;

        Self(Mutex::new(Inner {
            discovery,
            last_check: Instant::now(),
            next_reset: Duration::from_millis(limit.reset_after_ms),
            total: limit.total,
            current: limit.total.saturating_sub(limit.remaining),
        }))
    }

    /// Acquire one session-start slot, blocking until the budget has
    /// capacity if it is currently exhausted.
    pub async fn acquire(&self) {
        let mut lock = self.0.lock().await;

        if lock.current < lock.total {
            lock.current += 1;
            return;
        }

        let wait_until = lock.last_check + lock.next_reset;
        time::sleep_until(wait_until).await;

        let info = lock.discovery.get_gateway_bot().await;
        let limit = info.session_start_limit;

        lock.last_check = Instant::now();
        lock.next_reset = Duration::from_millis(limit.reset_after_ms);
        lock.total = limit.total;
        lock.current = limit.total.saturating_sub(limit.remaining) + 1;

        tracing::info!(
            remaining = limit.total.saturating_sub(lock.current),
            total = limit.total,
            "refreshed session start budget",
        );
    }

    /// Return the currently known [`StartLimit`] snapshot without refreshing
    /// it.
    ///
    /// [`StartLimit`]: crate::StartLimit
    pub async fn snapshot(&self) -> (u64, u64) {
        let lock = self.0.lock().await;
        (lock.current, lock.total)
    }
}

#[cfg(test)]
mod tests {
    use super::{GatewayDiscovery, StartLimitGate};
    use crate::discovery::{GatewayBotInfo, StartLimit};
    use std::{future::Future, pin::Pin, sync::Arc};

    #[derive(Debug)]
    struct FixedDiscovery(StartLimit);

    impl GatewayDiscovery for FixedDiscovery {
        fn get_gateway_bot(&self) -> Pin<Box<dyn Future<Output = GatewayBotInfo> + Send + '_>> {
            let limit = self.0;
            Box::pin(async move {
                GatewayBotInfo {
                    url: "wss://gateway.discord.gg".into(),
                    shards: 1,
                    session_start_limit: limit,
                }
            })
        }
    }

    #[tokio::test]
    async fn acquire_decrements_until_exhausted() {
        let discovery = Arc::new(FixedDiscovery(StartLimit {
            total: 2,
            remaining: 2,
            reset_after_ms: 50,
            max_concurrency: 1,
        }));
        let gate = StartLimitGate::new(discovery).await;

        gate.acquire().await;
        let (current, total) = gate.snapshot().await;
        assert_eq!(current, 1);
        assert_eq!(total, 2);

        gate.acquire().await;
        let (current, _) = gate.snapshot().await;
        assert_eq!(current, 2);
    }
}
