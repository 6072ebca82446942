//! C2: `HeartbeatDriver` — periodic liveness signalling and missed-ack
//! (zombie connection) detection.
//!
//! Grounded on the shard processor's heartbeater: an interval timer that
//! fires independently of the read loop, tracked alongside an ack counter
//! the session checks on every tick.

use rand::Rng;
use std::time::{Duration, Instant};

/// Number of consecutive missed acks that signals a zombied connection.
pub const ZOMBIE_THRESHOLD: u32 = 2;

/// Tracks heartbeat timing and ack bookkeeping for one session.
///
/// Owned by [`GatewaySession`](crate::shard::GatewaySession); never shared
/// across sessions.
#[derive(Debug)]
pub struct HeartbeatDriver {
    interval: Duration,
    last_beat_at: Instant,
    last_ack_at: Instant,
    missed_beats: u32,
    last_latency: Option<Duration>,
    running: bool,
}

impl HeartbeatDriver {
    /// Construct a driver that has not yet started.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            interval: Duration::ZERO,
            last_beat_at: now,
            last_ack_at: now,
            missed_beats: 0,
            last_latency: None,
            running: false,
        }
    }

    /// Arm the driver with the interval from Hello. The first beat is due
    /// after `interval * jitter` where `jitter` is drawn uniformly from
    /// `[0, 1)`; subsequent beats are due every `interval`.
    ///
    /// Returns the delay until the first beat should fire.
    pub fn start(&mut self, interval_ms: u32) -> Duration {
        self.interval = Duration::from_millis(u64::from(interval_ms));
        self.missed_beats = 0;
        self.running = true;
        let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
        Duration::from_secs_f64(self.interval.as_secs_f64() * jitter)
    }

    /// Whether the driver currently believes it should be beating.
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// The configured interval between beats, once started.
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Record that a beat was just sent, incrementing the missed-ack
    /// counter (decremented again on the matching ack). Returns the delay
    /// until the next scheduled beat.
    pub fn record_sent(&mut self) -> Duration {
        self.last_beat_at = Instant::now();
        self.missed_beats += 1;
        self.interval
    }

    /// Record an incoming HeartbeatAck, decrementing the missed-ack counter
    /// (floor zero) and recording round-trip latency.
    pub fn record_ack(&mut self) {
        self.last_ack_at = Instant::now();
        self.missed_beats = self.missed_beats.saturating_sub(1);
        self.last_latency = Some(self.last_ack_at.saturating_duration_since(self.last_beat_at));
    }

    /// Whether the zombie threshold has been reached: this connection must
    /// be treated as dead and reconnected with resume.
    pub const fn is_zombied(&self) -> bool {
        self.missed_beats >= ZOMBIE_THRESHOLD
    }

    /// The most recently measured round-trip latency, if any beat has been
    /// acked yet.
    pub const fn latency(&self) -> Option<Duration> {
        self.last_latency
    }

    /// Cancel the timer and clear counters. Idempotent.
    pub fn stop(&mut self) {
        self.running = false;
        self.missed_beats = 0;
    }
}

impl Default for HeartbeatDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_decrements_missed_beats() {
        let mut driver = HeartbeatDriver::new();
        driver.start(1000);
        driver.record_sent();
        driver.record_sent();
        assert_eq!(driver.missed_beats, 2);
        driver.record_ack();
        assert_eq!(driver.missed_beats, 1);
    }

    #[test]
    fn missed_beats_floor_at_zero() {
        let mut driver = HeartbeatDriver::new();
        driver.start(1000);
        driver.record_ack();
        assert_eq!(driver.missed_beats, 0);
    }

    #[test]
    fn zombie_threshold_at_two_misses() {
        let mut driver = HeartbeatDriver::new();
        driver.start(1000);
        assert!(!driver.is_zombied());
        driver.record_sent();
        assert!(!driver.is_zombied());
        driver.record_sent();
        assert!(driver.is_zombied());
    }

    #[test]
    fn stop_is_idempotent() {
        let mut driver = HeartbeatDriver::new();
        driver.start(1000);
        driver.record_sent();
        driver.stop();
        driver.stop();
        assert!(!driver.is_running());
        assert_eq!(driver.missed_beats, 0);
    }
}
