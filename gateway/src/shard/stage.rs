//! The `GatewaySession` state graph: `Idle → Connecting → Hello →
//! Identifying/Resuming → Ready`, with `Closing`/`Dead` terminal and
//! recovery states.

use std::sync::atomic::{AtomicU8, Ordering};

/// One state in the per-connection protocol state machine.
///
/// Initial state is [`Idle`](Phase::Idle); the only terminal state is
/// [`Dead`](Phase::Dead).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Phase {
    /// No connection attempt is in progress.
    Idle,
    /// The WebSocket is opening; awaiting Hello.
    Connecting,
    /// Hello was received; about to send Identify or Resume.
    Hello,
    /// Identify was sent; awaiting READY.
    Identifying,
    /// Resume was sent; awaiting RESUMED or a non-resumable InvalidSession.
    Resuming,
    /// The session is fully established and forwarding dispatches.
    Ready,
    /// The session is intentionally parked without an open connection
    /// (used by re-sharding handoff).
    Suspended,
    /// The connection is being torn down; a reconnect may follow.
    Closing,
    /// Terminal: no further reconnect will be attempted.
    Dead,
}

impl Phase {
    const fn to_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Connecting => 1,
            Self::Hello => 2,
            Self::Identifying => 3,
            Self::Resuming => 4,
            Self::Ready => 5,
            Self::Suspended => 6,
            Self::Closing => 7,
            Self::Dead => 8,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Connecting,
            2 => Self::Hello,
            3 => Self::Identifying,
            4 => Self::Resuming,
            5 => Self::Ready,
            6 => Self::Suspended,
            7 => Self::Closing,
            _ => Self::Dead,
        }
    }

    /// Whether a send is permitted while in this phase: only
    /// Identifying, Resuming, and Ready accept outbound payloads.
    pub const fn accepts_sends(self) -> bool {
        matches!(self, Self::Identifying | Self::Resuming | Self::Ready)
    }

    /// Whether this phase implies a session id should be held by the
    /// ledger.
    pub const fn implies_session_id(self) -> bool {
        matches!(self, Self::Ready | Self::Resuming | Self::Suspended)
    }
}

/// Lock-free holder of the current [`Phase`], shared between the processor
/// task and any handle that wants to read it (e.g. for `info()`).
#[derive(Debug)]
pub struct AtomicPhase(AtomicU8);

impl AtomicPhase {
    /// Construct a holder starting at [`Phase::Idle`].
    pub fn new() -> Self {
        Self(AtomicU8::new(Phase::Idle.to_u8()))
    }

    /// Read the current phase.
    pub fn get(&self) -> Phase {
        Phase::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Store a new phase.
    pub fn set(&self, phase: Phase) {
        self.0.store(phase.to_u8(), Ordering::Release);
    }
}

impl Default for AtomicPhase {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_phase() {
        for phase in [
            Phase::Idle,
            Phase::Connecting,
            Phase::Hello,
            Phase::Identifying,
            Phase::Resuming,
            Phase::Ready,
            Phase::Suspended,
            Phase::Closing,
            Phase::Dead,
        ] {
            let holder = AtomicPhase::new();
            holder.set(phase);
            assert_eq!(holder.get(), phase);
        }
    }

    #[test]
    fn only_handshake_phases_accept_sends() {
        assert!(Phase::Identifying.accepts_sends());
        assert!(Phase::Resuming.accepts_sends());
        assert!(Phase::Ready.accepts_sends());
        assert!(!Phase::Idle.accepts_sends());
        assert!(!Phase::Connecting.accepts_sends());
        assert!(!Phase::Hello.accepts_sends());
        assert!(!Phase::Closing.accepts_sends());
        assert!(!Phase::Dead.accepts_sends());
    }
}
