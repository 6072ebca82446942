//! C4: the shard processor — the task that owns one WebSocket connection
//! end to end: connecting, the Hello/Identify/Resume handshake, the Ready
//! read loop, heartbeat timing, and close-code-driven reconnection.
//!
//! Grounded on the teacher's `shard/processor/impl.rs` event loop, adapted
//! from its `futures_channel`/`snafu` style to the `tokio::sync::mpsc` and
//! manual `kind`+`source` error idiom used throughout this crate.

use crate::codec::TransportCodec;
use crate::heartbeat::HeartbeatDriver;
use crate::ledger::SessionLedger;
use crate::model::{classify_close_code, CloseCodeClass, Opcode, PayloadEnvelope};
use crate::shard::command::{Identify, IdentifyProperties, Resume};
use crate::shard::config::ShardConfig;
use crate::shard::socket_forwarder::{ShardStream, SocketForwarder};
use crate::shard::stage::Phase;
use crate::shard::throttle::SendThrottle;
use crate::shard::Shared;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use stormgate_gateway_queue::Queue;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::{sleep, sleep_until, Instant};
use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode, CloseFrame};
use tokio_tungstenite::tungstenite::Message;

/// What the handshake-plus-read-loop for one connection attempt decided
/// should happen next.
enum Outcome {
    /// Reconnect, optionally attempting to resume the previous session.
    /// `delay_override`, when set, replaces the normal backoff schedule for
    /// this one reconnect (used for the jittered `InvalidSession`-while-
    /// `Resuming` delay).
    Reconnect {
        resume: bool,
        delay_override: Option<Duration>,
    },
    /// Stop permanently; the session is now [`Phase::Dead`].
    Dead,
}

impl Outcome {
    const fn reconnect(resume: bool) -> Self {
        Self::Reconnect { resume, delay_override: None }
    }
}

struct DriveResult {
    reached_ready: bool,
    outcome: Outcome,
}

/// Runs for the full lifetime of a
/// [`GatewaySession`](super::GatewaySession): reconnects, resumes, and
/// re-identifies as needed until a non-recoverable close code arrives or
/// the handle is dropped.
pub(super) async fn run(config: Arc<ShardConfig>, shared: Arc<Shared>, base_url: String) {
    let mut ledger = SessionLedger::new();
    let mut backoff_attempt: usize = 0;

    loop {
        shared.phase.set(Phase::Connecting);

        let url = match ledger.resume_url() {
            Some(resume_url) if ledger.can_resume() => build_gateway_url(resume_url, &config),
            _ => build_gateway_url(&base_url, &config),
        };

        let stream = match connect(&url, config.connect_timeout).await {
            Ok(stream) => stream,
            Err(_source) => {
                backoff_attempt += 1;
                if exhausted(&config, backoff_attempt) {
                    tracing::warn!(shard = ?config.shard, attempt = backoff_attempt, "reconnect attempts exhausted, giving up");
                    shared.phase.set(Phase::Dead);
                    return;
                }
                let delay = backoff_delay(&config, backoff_attempt);
                tracing::debug!(shard = ?config.shard, attempt = backoff_attempt, ?delay, "connect failed, backing off");
                sleep(delay).await;
                continue;
            }
        };

        tracing::debug!(shard = ?config.shard, "shook hands with remote");

        let (forwarder, inbound, outbound) = SocketForwarder::new(stream);
        tokio::spawn(forwarder.run());
        *shared.outbound.lock().unwrap() = Some(outbound.clone());

        let shard_id = config.shard.map(|s| s[0]);
        let codec = match TransportCodec::new(config.encoding, config.compression, shard_id) {
            Ok(codec) => codec,
            Err(_) => {
                shared.phase.set(Phase::Dead);
                return;
            }
        };

        let result = drive_session(&config, &shared, &mut ledger, codec, inbound, &outbound).await;

        *shared.outbound.lock().unwrap() = None;

        if result.reached_ready {
            backoff_attempt = 0;
        }

        match result.outcome {
            Outcome::Reconnect { resume, delay_override } => {
                if !resume {
                    ledger.clear();
                    *shared.ledger.lock().unwrap() = ledger.clone();
                }
                backoff_attempt += 1;
                if exhausted(&config, backoff_attempt) {
                    tracing::warn!(shard = ?config.shard, attempt = backoff_attempt, "reconnect attempts exhausted, giving up");
                    shared.phase.set(Phase::Dead);
                    return;
                }
                let delay = delay_override.unwrap_or_else(|| backoff_delay(&config, backoff_attempt));
                tracing::debug!(shard = ?config.shard, resume, ?delay, "reconnecting");
                shared.phase.set(Phase::Connecting);
                sleep(delay).await;
            }
            Outcome::Dead => {
                tracing::warn!(shard = ?config.shard, "non-recoverable close, session is dead");
                shared.phase.set(Phase::Dead);
                return;
            }
        }
    }
}

/// Whether `attempt` consecutive reconnect attempts have exhausted the
/// configured cap. Always `false` when no cap is set.
fn exhausted(config: &ShardConfig, attempt: usize) -> bool {
    config.max_reconnect_attempts.is_some_and(|max| attempt as u32 > max)
}

/// `[1s, 5s, 10s]`, then 10s with full jitter for every attempt beyond the
/// schedule's length.
fn backoff_delay(config: &ShardConfig, attempt: usize) -> Duration {
    let base = config
        .backoff_schedule
        .get(attempt.saturating_sub(1))
        .copied()
        .unwrap_or_else(|| *config.backoff_schedule.last().unwrap_or(&Duration::from_secs(10)));

    if attempt > config.backoff_schedule.len() {
        let jitter: f64 = rand::thread_rng().gen_range(0.75..1.25);
        Duration::from_secs_f64(base.as_secs_f64() * jitter)
    } else {
        base
    }
}

fn build_gateway_url(base: &str, config: &ShardConfig) -> String {
    let mut url = format!("{}?v={}&encoding={}", base.trim_end_matches('/'), config.api_version, config.encoding.query_value());
    if let Some(value) = config.compression.query_value() {
        url.push_str("&compress=");
        url.push_str(value);
    }
    url
}

async fn connect(url: &str, timeout: Duration) -> Result<ShardStream, ()> {
    let attempt = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url));

    match attempt.await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(source)) => {
            tracing::warn!(%source, "failed to connect");
            Err(())
        }
        Err(_elapsed) => {
            tracing::warn!(?timeout, "connect timed out");
            Err(())
        }
    }
}

/// Drives the handshake and read loop for one established connection,
/// returning once the connection ends for any reason.
async fn drive_session(
    config: &ShardConfig,
    shared: &Shared,
    ledger: &mut SessionLedger,
    mut codec: TransportCodec,
    mut inbound: UnboundedReceiver<Message>,
    outbound: &UnboundedSender<Message>,
) -> DriveResult {
    let mut heartbeat = HeartbeatDriver::new();
    let mut throttle = SendThrottle::new();
    let mut reached_ready = false;

    // Hello must arrive before anything else; everything else seen first
    // is a protocol violation we simply ignore rather than tear down over.
    let hello_interval = loop {
        match tokio::time::timeout(config.hello_timeout, inbound.recv()).await {
            Ok(Some(message)) => match codec.decode(&message) {
                Ok(Some(envelope)) if envelope.op == Some(Opcode::Hello) => {
                    break envelope
                        .data
                        .get("heartbeat_interval")
                        .and_then(serde_json::Value::as_u64)
                        .unwrap_or(45_000);
                }
                Ok(Some(_)) | Ok(None) => continue,
                Err(_) => {
                    return DriveResult {
                        reached_ready,
                        outcome: Outcome::reconnect(false),
                    }
                }
            },
            Ok(None) => {
                return DriveResult {
                    reached_ready,
                    outcome: Outcome::reconnect(ledger.can_resume()),
                }
            }
            Err(_elapsed) => {
                return DriveResult {
                    reached_ready,
                    outcome: Outcome::reconnect(false),
                }
            }
        }
    };

    let first_beat_delay = heartbeat.start(hello_interval as u32);

    if ledger.can_resume() {
        shared.phase.set(Phase::Resuming);
        let resume = Resume {
            token: (*config.token).to_owned(),
            session_id: ledger.session_id().unwrap_or_default().to_owned(),
            seq: ledger.last_sequence().unwrap_or(0),
        };
        if send_internal(&mut throttle, outbound, &codec, Opcode::Resume, resume)
            .await
            .is_err()
        {
            return DriveResult {
                reached_ready,
                outcome: Outcome::reconnect(true),
            };
        }
    } else {
        if let Some(gate) = &config.start_limit_gate {
            gate.acquire().await;
        }

        let shard_id = config.shard.map(|[id, total]| [u64::from(id), u64::from(total)]).unwrap_or([0, 1]);
        config.queue.request(shard_id).await;

        shared.phase.set(Phase::Identifying);
        let identify = Identify {
            token: (*config.token).to_owned(),
            properties: IdentifyProperties::new(),
            compress: false,
            large_threshold: config.large_threshold as u8,
            intents: config.intents.bits(),
            shard: config.shard,
            presence: config.presence.clone(),
        };
        if send_internal(&mut throttle, outbound, &codec, Opcode::Identify, identify)
            .await
            .is_err()
        {
            return DriveResult {
                reached_ready,
                outcome: Outcome::reconnect(false),
            };
        }
    }

    let mut next_beat = Instant::now() + first_beat_delay;

    loop {
        tokio::select! {
            biased;

            () = sleep_until(next_beat) => {
                if let Err(outcome) = send_heartbeat(&mut throttle, outbound, &codec, &mut heartbeat, shared, ledger, &mut next_beat).await {
                    return DriveResult { reached_ready, outcome };
                }
            }

            message = inbound.recv() => {
                let Some(message) = message else {
                    return DriveResult {
                        reached_ready,
                        outcome: Outcome::reconnect(ledger.can_resume()),
                    };
                };

                if let Message::Close(frame) = &message {
                    let (code, reason) = frame
                        .as_ref()
                        .map(|frame| (u16::from(frame.code), frame.reason.to_string()))
                        .unwrap_or((1000, String::new()));
                    tracing::debug!(code, %reason, "connection closed");

                    return match classify_close_code(code) {
                        CloseCodeClass::CleanReconnect => DriveResult {
                            reached_ready,
                            outcome: Outcome::reconnect(false),
                        },
                        CloseCodeClass::ResumableReconnect | CloseCodeClass::Unknown => DriveResult {
                            reached_ready,
                            outcome: Outcome::reconnect(true),
                        },
                        CloseCodeClass::NonRecoverable => DriveResult {
                            reached_ready,
                            outcome: Outcome::Dead,
                        },
                    };
                }

                match codec.decode(&message) {
                    // Discord may request a heartbeat out of band (op 1); it must be
                    // answered immediately rather than waiting for the interval timer.
                    Ok(Some(envelope)) if envelope.op == Some(Opcode::Heartbeat) => {
                        if let Err(outcome) = send_heartbeat(&mut throttle, outbound, &codec, &mut heartbeat, shared, ledger, &mut next_beat).await {
                            return DriveResult { reached_ready, outcome };
                        }
                    }
                    Ok(Some(envelope)) => {
                        if let Some(outcome) = handle_envelope(config, shared, ledger, &mut heartbeat, &mut reached_ready, envelope) {
                            return DriveResult { reached_ready, outcome };
                        }
                    }
                    Ok(None) => {}
                    Err(_source) => {
                        return DriveResult {
                            reached_ready,
                            outcome: Outcome::reconnect(false),
                        };
                    }
                }
            }
        }
    }
}

/// Applies a single decoded dispatch/control envelope to session state.
/// Returns `Some` when the connection must end.
fn handle_envelope(
    _config: &ShardConfig,
    shared: &Shared,
    ledger: &mut SessionLedger,
    heartbeat: &mut HeartbeatDriver,
    reached_ready: &mut bool,
    envelope: PayloadEnvelope,
) -> Option<Outcome> {
    match envelope.op {
        Some(Opcode::Dispatch) => {
            if let Some(sequence) = envelope.sequence {
                ledger.update_sequence(sequence);
            }

            #[cfg(feature = "metrics")]
            if let Some(event_type) = envelope.event_type.as_deref() {
                metrics::counter!("GatewayEvent", 1, "GatewayEvent" => event_type.to_owned());
            }

            match envelope.event_type.as_deref() {
                Some("READY") => {
                    if let (Some(session_id), Some(resume_url)) = (
                        envelope.data.get("session_id").and_then(serde_json::Value::as_str),
                        envelope.data.get("resume_gateway_url").and_then(serde_json::Value::as_str),
                    ) {
                        tracing::info!(session_id, "session ready");
                        ledger.update_on_ready(session_id, resume_url);
                    }
                    shared.phase.set(Phase::Ready);
                    *reached_ready = true;
                }
                Some("RESUMED") => {
                    tracing::info!("session resumed");
                    shared.phase.set(Phase::Ready);
                    *reached_ready = true;
                }
                _ => {}
            }

            *shared.ledger.lock().unwrap() = ledger.clone();

            if let Some(tx) = shared.events.lock().unwrap().as_ref() {
                let _ = tx.send(envelope);
            }

            None
        }
        Some(Opcode::HeartbeatAck) => {
            heartbeat.record_ack();
            shared.latency.lock().unwrap().record_received(std::time::Instant::now());
            None
        }
        Some(Opcode::Reconnect) => {
            tracing::debug!("server requested a reconnect");
            Some(Outcome::reconnect(true))
        }
        Some(Opcode::InvalidSession) => {
            let resumable = envelope.data.as_bool().unwrap_or(false);
            let was_resuming = shared.phase.get() == Phase::Resuming;
            tracing::warn!(resumable, was_resuming, "session invalidated");

            // While resuming, an invalid session means the resume itself was
            // rejected: give up on it and fall back to a fresh Identify
            // rather than looping on a Resume that will never succeed.
            if !resumable || was_resuming {
                ledger.require_fresh_session();
                *shared.ledger.lock().unwrap() = ledger.clone();
            }

            if was_resuming {
                let delay = Duration::from_secs_f64(rand::thread_rng().gen_range(1.0..=6.0));
                Some(Outcome::Reconnect { resume: false, delay_override: Some(delay) })
            } else {
                Some(Outcome::Reconnect { resume: resumable, delay_override: None })
            }
        }
        _ => None,
    }
}

/// Sends a heartbeat, whether prompted by the interval timer or by an
/// explicit server request (op 1), and folds in the zombie check. Shared so
/// both call sites answer a server-initiated heartbeat the same way the
/// timer does rather than waiting for `next_beat` to catch up.
async fn send_heartbeat(
    throttle: &mut SendThrottle,
    outbound: &UnboundedSender<Message>,
    codec: &TransportCodec,
    heartbeat: &mut HeartbeatDriver,
    shared: &Shared,
    ledger: &SessionLedger,
    next_beat: &mut Instant,
) -> Result<(), Outcome> {
    let sequence = ledger.last_sequence();
    tracing::debug!(?sequence, "sending heartbeat");
    if send_internal(throttle, outbound, codec, Opcode::Heartbeat, sequence)
        .await
        .is_err()
    {
        return Err(Outcome::reconnect(true));
    }
    *next_beat = Instant::now() + heartbeat.record_sent();
    shared.latency.lock().unwrap().record_sent(std::time::Instant::now());

    if heartbeat.is_zombied() {
        tracing::warn!("connection zombied, missed too many heartbeat acks");
        let _ = outbound.send(close_message(4000, "zombied connection"));
        return Err(Outcome::reconnect(true));
    }

    Ok(())
}

async fn send_internal<T: serde::Serialize>(
    throttle: &mut SendThrottle,
    outbound: &UnboundedSender<Message>,
    codec: &TransportCodec,
    op: Opcode,
    data: T,
) -> Result<(), ()> {
    let message = codec.encode(op, data).map_err(|_| ())?;
    if !matches!(op, Opcode::Heartbeat) {
        throttle.acquire().await;
    }
    outbound.send(message).map_err(|_| ())
}

fn close_message(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::from(code),
        reason: reason.to_owned().into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::Shared;
    use tokio::sync::mpsc;

    fn text(op: u8, extra: &str) -> Message {
        Message::Text(format!(r#"{{"op":{op}{extra}}}"#))
    }

    fn hello(heartbeat_interval_ms: u64) -> Message {
        text(10, &format!(r#","d":{{"heartbeat_interval":{heartbeat_interval_ms}}}"#))
    }

    fn ready_dispatch(sequence: u64) -> Message {
        text(
            0,
            &format!(
                r#","s":{sequence},"t":"READY","d":{{"session_id":"abc","resume_gateway_url":"wss://r.d.gg"}}"#
            ),
        )
    }

    #[tokio::test]
    async fn fresh_connect_reaches_ready_s1() {
        let config = ShardConfig::builder("token").hello_timeout(Duration::from_secs(5)).build();
        let shared = Arc::new(Shared::new());
        let codec = TransportCodec::new(config.encoding, config.compression, config.shard.map(|s| s[0])).unwrap();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();

        inbound_tx.send(hello(60_000)).unwrap();
        inbound_tx.send(ready_dispatch(1)).unwrap();

        let mut ledger = SessionLedger::new();
        let drive = tokio::spawn(async move {
            drive_session(&config, &shared, &mut ledger, codec, inbound_rx, &outbound_tx).await
        });

        // Let the Identify go out, then close the inbound side so the drive
        // loop returns instead of blocking forever on the next message.
        let identify = outbound_rx.recv().await.unwrap();
        assert!(matches!(identify, Message::Text(ref text) if text.contains(r#""op":2"#)));
        drop(inbound_tx);

        let result = drive.await.unwrap();
        assert!(result.reached_ready);
    }

    #[tokio::test]
    async fn invalid_session_non_resumable_clears_ledger_s3() {
        let config = ShardConfig::builder("token").hello_timeout(Duration::from_secs(5)).build();
        let shared = Arc::new(Shared::new());
        let codec = TransportCodec::new(config.encoding, config.compression, config.shard.map(|s| s[0])).unwrap();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();

        inbound_tx.send(hello(60_000)).unwrap();
        inbound_tx.send(ready_dispatch(1)).unwrap();
        inbound_tx.send(text(9, r#","d":false"#)).unwrap();
        drop(inbound_tx);

        let mut ledger = SessionLedger::new();
        let result = drive_session(&config, &shared, &mut ledger, codec, inbound_rx, &outbound_tx).await;

        assert!(matches!(result.outcome, Outcome::Reconnect { resume: false, .. }));
        assert!(!ledger.can_resume());
        let _ = outbound_rx.try_recv();
    }

    #[tokio::test]
    async fn disallowed_intents_close_is_non_recoverable_s4() {
        let config = ShardConfig::builder("token").hello_timeout(Duration::from_secs(5)).build();
        let shared = Arc::new(Shared::new());
        let codec = TransportCodec::new(config.encoding, config.compression, config.shard.map(|s| s[0])).unwrap();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();

        inbound_tx.send(hello(60_000)).unwrap();
        inbound_tx
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::from(4014),
                reason: "Disallowed intent(s).".into(),
            })))
            .unwrap();
        drop(inbound_tx);

        let mut ledger = SessionLedger::new();
        let result = drive_session(&config, &shared, &mut ledger, codec, inbound_rx, &outbound_tx).await;

        assert!(matches!(result.outcome, Outcome::Dead));
        let _ = outbound_rx.try_recv();
    }

    #[tokio::test]
    async fn zombied_heartbeats_trigger_resumable_reconnect_s2() {
        let config = ShardConfig::builder("token").hello_timeout(Duration::from_secs(5)).build();
        let shared = Arc::new(Shared::new());
        let codec = TransportCodec::new(config.encoding, config.compression, config.shard.map(|s| s[0])).unwrap();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();

        // A 5ms interval so two missed beats arrive well inside the test
        // timeout instead of the real protocol's 41.25s cadence.
        inbound_tx.send(hello(5)).unwrap();
        inbound_tx.send(ready_dispatch(1)).unwrap();

        let mut ledger = SessionLedger::new();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            drive_session(&config, &shared, &mut ledger, codec, inbound_rx, &outbound_tx),
        )
        .await
        .unwrap();

        assert!(matches!(result.outcome, Outcome::Reconnect { resume: true, .. }));
        assert!(result.reached_ready);

        let mut saw_zombie_close = false;
        while let Ok(message) = outbound_rx.try_recv() {
            if matches!(&message, Message::Close(Some(frame)) if u16::from(frame.code) == 4000) {
                saw_zombie_close = true;
            }
        }
        assert!(saw_zombie_close);
    }

    #[test]
    fn exhausted_respects_configured_cap() {
        let config = ShardConfig::builder("token").max_reconnect_attempts(3).build();
        assert!(!exhausted(&config, 3));
        assert!(exhausted(&config, 4));
    }

    #[test]
    fn exhausted_never_true_without_a_cap() {
        let config = ShardConfig::builder("token").build();
        assert!(!exhausted(&config, 10_000));
    }

    #[test]
    fn backoff_delay_follows_schedule_then_jitters() {
        let config = ShardConfig::builder("token")
            .backoff_schedule(vec![Duration::from_millis(100), Duration::from_millis(200)])
            .build();
        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(200));
        let jittered = backoff_delay(&config, 3);
        assert!(jittered >= Duration::from_millis(150) && jittered <= Duration::from_millis(250));
    }
}
