//! `GatewaySession`: the handle a caller holds for one gateway connection.
//!
//! Grounded on the teacher's `Shard`/`Session` split (`shard/impl.rs`,
//! `shard/session.rs`): a cheaply-cloneable set of shared, lock-free-where-
//! possible state (phase, ledger, latency, the live outbound sender) plus a
//! background task ([`processor`]) that owns the actual connection and
//! mutates that state as the protocol dictates.

pub mod command;
pub mod config;
pub mod error;
pub mod stage;

mod processor;
mod socket_forwarder;
mod throttle;

pub use config::{ShardConfig, ShardConfigBuilder};
pub use error::{
    ConnectError, ConnectErrorType, FatalCloseError, ProcessError, ProcessErrorType,
    ShardSendError, ShardSendErrorType,
};
pub use stage::Phase;

use crate::codec::encode_payload;
use crate::latency::Latency;
use crate::ledger::SessionLedger;
use crate::model::{Opcode, PayloadEnvelope};
use crate::shard::stage::AtomicPhase;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode, CloseFrame};
use tokio_tungstenite::tungstenite::Message;

/// A point-in-time snapshot of a session's observable state.
#[derive(Clone, Debug)]
pub struct SessionInfo {
    /// Current position in the connection state machine.
    pub phase: Phase,
    /// Session id from the last READY, if any.
    pub session_id: Option<String>,
    /// Last observed dispatch sequence number, if any.
    pub sequence: Option<u64>,
    /// Rolling heartbeat latency.
    pub latency: Latency,
}

/// State shared between a [`GatewaySession`] handle and its background
/// [`processor`] task. Never exposed directly.
#[derive(Debug)]
pub(crate) struct Shared {
    phase: AtomicPhase,
    ledger: Mutex<SessionLedger>,
    latency: Mutex<Latency>,
    outbound: Mutex<Option<UnboundedSender<Message>>>,
    events: Mutex<Option<UnboundedSender<PayloadEnvelope>>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            phase: AtomicPhase::new(),
            ledger: Mutex::new(SessionLedger::new()),
            latency: Mutex::new(Latency::new()),
            outbound: Mutex::new(None),
            events: Mutex::new(None),
        }
    }
}

/// Handle to one gateway connection.
///
/// Owns a background task that keeps the connection open across
/// reconnects and resumes, tearing it down only on an explicit [`close`]
/// or a non-recoverable close code. Cloning is not supported; wrap in an
/// [`Arc`] to share a handle across tasks.
///
/// [`close`]: Self::close
#[derive(Debug)]
pub struct GatewaySession {
    config: Arc<ShardConfig>,
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl GatewaySession {
    /// Construct a session handle that has not yet opened a connection.
    pub fn new(config: ShardConfig) -> Self {
        Self {
            config: Arc::new(config),
            shared: Arc::new(Shared::new()),
            task: Mutex::new(None),
        }
    }

    /// Open the connection, spawning the background task that drives the
    /// handshake, read loop, and automatic reconnection. `gateway_url` is
    /// the base `wss://` URL to connect to (without the `v`/`encoding`/
    /// `compress` query parameters, which are appended automatically);
    /// callers resolve it themselves since this crate treats the REST
    /// gateway-discovery endpoint as out of scope.
    ///
    /// Calling this more than once on the same handle spawns a second,
    /// independent task; callers are expected to call it exactly once.
    pub fn open(&self, gateway_url: impl Into<String>) -> UnboundedReceiver<PayloadEnvelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.shared.events.lock().unwrap() = Some(tx);

        let config = Arc::clone(&self.config);
        let shared = Arc::clone(&self.shared);
        let url = gateway_url.into();

        let handle = tokio::spawn(async move {
            processor::run(config, shared, url).await;
        });

        *self.task.lock().unwrap() = Some(handle);
        rx
    }

    /// Send a command payload. Fails immediately if the current phase does
    /// not accept sends (not yet identified/resumed, or already closing).
    pub fn send<T: Serialize>(&self, op: Opcode, data: T) -> Result<(), ShardSendError> {
        if !self.shared.phase.get().accepts_sends() {
            return Err(ShardSendError {
                kind: ShardSendErrorType::NotConnected,
                source: None,
            });
        }

        let message = encode_payload(self.config.encoding, op, data).map_err(|source| ShardSendError {
            kind: ShardSendErrorType::Serializing,
            source: Some(Box::new(source)),
        })?;

        self.send_raw(message)
    }

    /// Send a raw WebSocket message, bypassing payload encoding. Intended
    /// as an escape hatch; prefer [`send`](Self::send) for anything that
    /// maps to a documented opcode.
    pub fn send_raw(&self, message: Message) -> Result<(), ShardSendError> {
        let outbound = self.shared.outbound.lock().unwrap();
        match outbound.as_ref() {
            Some(tx) => tx.send(message).map_err(|source| ShardSendError {
                kind: ShardSendErrorType::Sending,
                source: Some(Box::new(source)),
            }),
            None => Err(ShardSendError {
                kind: ShardSendErrorType::NotConnected,
                source: None,
            }),
        }
    }

    /// Snapshot the session's current phase, identity, and latency.
    pub fn info(&self) -> SessionInfo {
        let ledger = self.shared.ledger.lock().unwrap();
        SessionInfo {
            phase: self.shared.phase.get(),
            session_id: ledger.session_id().map(ToOwned::to_owned),
            sequence: ledger.last_sequence(),
            latency: self.shared.latency.lock().unwrap().clone(),
        }
    }

    /// The session's rolling heartbeat latency.
    pub fn latency(&self) -> Latency {
        self.shared.latency.lock().unwrap().clone()
    }

    /// The session's current phase.
    pub fn phase(&self) -> Phase {
        self.shared.phase.get()
    }

    /// Close the connection with the clean-reconnect code, ending the
    /// background task. The session is not resumable afterward.
    pub fn close(&self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }

        if let Some(tx) = self.shared.outbound.lock().unwrap().take() {
            let _ = tx.send(Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            })));
        }

        self.shared.phase.set(Phase::Dead);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(GatewaySession: Send, Sync);
    assert_impl_all!(SessionInfo: Clone, Send, Sync);

    #[test]
    fn new_session_starts_idle() {
        let config = ShardConfig::builder("token").build();
        let session = GatewaySession::new(config);
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[test]
    fn send_before_open_is_not_connected() {
        let config = ShardConfig::builder("token").build();
        let session = GatewaySession::new(config);
        let error = session.send(Opcode::Heartbeat, Option::<u64>::None).unwrap_err();
        assert!(matches!(error.kind(), ShardSendErrorType::NotConnected));
    }
}
