//! Multi-bucket [`Queue`] for large-bot sharding.
//!
//! Grounded on the teacher's `LargeBotQueue`: one independent waiter per
//! `max_concurrency` bucket, generalized from a fixed 6-second cadence tied
//! to `twilight_http::Client` to a caller-supplied stagger duration so
//! `ShardPool` can drive it from its own `spawn_stagger` config.

use crate::Queue;
use std::{fmt::Debug, future::Future, pin::Pin, time::Duration};
use tokio::{
    sync::{
        mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
        oneshot::{self, Sender},
    },
    time::sleep,
};

/// A [`Queue`] with one independent waiter per `max_concurrency` bucket.
///
/// Requests whose shard id falls in the same bucket (`shard_id %
/// bucket_count`) are released one at a time, `stagger` apart; requests in
/// different buckets are released independently of each other. This is what
/// actually enforces "at most one IDENTIFY in flight per bucket" — spawning
/// shards in bucket order with a sleep between buckets is not enough, since
/// two shards placed in the same bucket (when `num_shards > max_concurrency`)
/// would otherwise identify back to back.
#[derive(Debug)]
pub struct BucketedQueue {
    buckets: Vec<UnboundedSender<Sender<()>>>,
}

impl BucketedQueue {
    /// Build a queue with `bucket_count` independent buckets (clamped to at
    /// least 1), each releasing one queued request every `stagger`.
    pub fn new(bucket_count: u32, stagger: Duration) -> Self {
        let buckets = (0..bucket_count.max(1))
            .map(|_| {
                let (tx, rx) = unbounded_channel();
                tokio::spawn(waiter(rx, stagger));
                tx
            })
            .collect();

        Self { buckets }
    }
}

async fn waiter(mut rx: UnboundedReceiver<Sender<()>>, stagger: Duration) {
    while let Some(req) = rx.recv().await {
        if let Err(source) = req.send(()) {
            tracing::warn!("skipping, send failed: {source:?}");
        }
        sleep(stagger).await;
    }
}

impl Queue for BucketedQueue {
    /// Request to be able to identify with the gateway. Resolves once this
    /// shard's bucket grants it the next turn.
    fn request(&'_ self, [id, total]: [u64; 2]) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        #[allow(clippy::cast_possible_truncation)]
        let bucket = (id % self.buckets.len() as u64) as usize;
        let (tx, rx) = oneshot::channel();

        Box::pin(async move {
            if let Err(source) = self.buckets[bucket].send(tx) {
                tracing::warn!("skipping, send failed: {source:?}");
                return;
            }

            tracing::info!(shard_id = id, shard_total = total, bucket, "waiting for identify allowance");

            let _ = rx.await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;
    use std::time::Instant;

    assert_impl_all!(BucketedQueue: Debug, Queue, Send, Sync);

    #[tokio::test]
    async fn requests_in_the_same_bucket_serialize() {
        let queue = BucketedQueue::new(1, Duration::from_millis(30));
        let start = Instant::now();
        queue.request([0, 2]).await;
        queue.request([1, 2]).await;
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn requests_in_different_buckets_do_not_wait_on_each_other() {
        let queue = BucketedQueue::new(2, Duration::from_secs(5));
        let result = tokio::time::timeout(Duration::from_millis(200), async {
            queue.request([0, 2]).await;
            queue.request([1, 2]).await;
        })
        .await;
        assert!(result.is_ok());
    }
}
