//! C3: `SessionLedger` — resumption identity bookkeeping for one
//! [`GatewaySession`](crate::shard::GatewaySession).

/// Persistent resumption identity for one session.
///
/// Mutated only from the owning `GatewaySession`'s task — never shared
/// across shards. The session-start budget itself (the cross-shard
/// process-scoped counter) lives in
/// [`stormgate_gateway_queue::StartLimitGate`], acquired directly by the
/// shard processor rather than through this ledger.
#[derive(Clone, Debug, Default)]
pub struct SessionLedger {
    session_id: Option<String>,
    resume_url: Option<String>,
    last_sequence: Option<u64>,
    fresh_session_required: bool,
}

impl SessionLedger {
    /// Create an empty ledger, as for a brand new shard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the identity delivered in a READY dispatch.
    pub fn update_on_ready(&mut self, session_id: impl Into<String>, resume_url: impl Into<String>) {
        self.session_id = Some(session_id.into());
        self.resume_url = Some(resume_url.into());
        self.fresh_session_required = false;
    }

    /// Record the sequence number from a Dispatch envelope. Only ever
    /// called when `s` was `Some`; never regresses.
    pub fn update_sequence(&mut self, sequence: u64) {
        self.last_sequence = Some(match self.last_sequence {
            Some(current) => current.max(sequence),
            None => sequence,
        });
    }

    /// The last observed sequence number, if any.
    pub const fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    /// The session id from the last READY, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// The resume URL from the last READY, if any.
    pub fn resume_url(&self) -> Option<&str> {
        self.resume_url.as_deref()
    }

    /// Whether this ledger holds enough state to attempt a RESUME:
    /// session id, resume URL, and a last sequence are all set, and the
    /// ledger has not been told a fresh session is required.
    pub fn can_resume(&self) -> bool {
        !self.fresh_session_required
            && self.session_id.is_some()
            && self.resume_url.is_some()
            && self.last_sequence.is_some()
    }

    /// Mark that the next reconnect must IDENTIFY fresh rather than RESUME,
    /// as signalled by `op=9 InvalidSession` with `d=false`.
    pub fn require_fresh_session(&mut self) {
        self.fresh_session_required = true;
    }

    /// Forget session id and sequence, used on an unrecoverable close.
    pub fn clear(&mut self) {
        self.session_id = None;
        self.resume_url = None;
        self.last_sequence = None;
        self.fresh_session_required = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cannot_resume_before_ready() {
        let ledger = SessionLedger::new();
        assert!(!ledger.can_resume());
    }

    #[test]
    fn can_resume_after_ready_and_sequence() {
        let mut ledger = SessionLedger::new();
        ledger.update_on_ready("abc", "wss://r.d.gg");
        ledger.update_sequence(1);
        assert!(ledger.can_resume());
    }

    #[test]
    fn sequence_never_regresses() {
        let mut ledger = SessionLedger::new();
        ledger.update_sequence(5);
        ledger.update_sequence(3);
        assert_eq!(ledger.last_sequence(), Some(5));
    }

    #[test]
    fn invalid_session_non_resumable_forces_fresh_identify() {
        let mut ledger = SessionLedger::new();
        ledger.update_on_ready("abc", "wss://r.d.gg");
        ledger.update_sequence(1);
        ledger.require_fresh_session();
        assert!(!ledger.can_resume());
    }

    #[test]
    fn clear_forgets_everything() {
        let mut ledger = SessionLedger::new();
        ledger.update_on_ready("abc", "wss://r.d.gg");
        ledger.update_sequence(1);
        ledger.clear();
        assert!(ledger.session_id().is_none());
        assert!(ledger.last_sequence().is_none());
        assert!(!ledger.can_resume());
    }
}
