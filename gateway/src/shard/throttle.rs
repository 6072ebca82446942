//! Outbound send pacing.
//!
//! Discord ratelimits non-heartbeat gateway sends to roughly 120 per 60
//! seconds; the spacing used here (520ms, not the 500ms a naive
//! `60_000/120` would suggest) leaves enough headroom that a heartbeat
//! due at the same instant as a queued command is never starved behind it.

use std::time::Duration;
use tokio::time::{sleep_until, Instant};

const MIN_INTERVAL: Duration = Duration::from_millis(520);

/// Paces non-heartbeat sends so bursts of commands cannot starve the
/// heartbeat timer of its slot.
#[derive(Debug)]
pub struct SendThrottle {
    next_allowed: Instant,
}

impl SendThrottle {
    /// Build a throttle that allows an immediate first send.
    pub fn new() -> Self {
        Self {
            next_allowed: Instant::now(),
        }
    }

    /// Wait until this send's turn, then reserve the next slot.
    pub async fn acquire(&mut self) {
        let now = Instant::now();
        if now < self.next_allowed {
            sleep_until(self.next_allowed).await;
        }
        self.next_allowed = Instant::now() + MIN_INTERVAL;
    }
}

impl Default for SendThrottle {
    fn default() -> Self {
        Self::new()
    }
}
