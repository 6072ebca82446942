//! End-to-end dispatch fan-out through the public surface: push envelopes
//! into the channel a `ShardPool` would normally feed, and confirm the
//! right subscribers see them.

use serde_json::json;
use stormgate_gateway::{DispatchRouter, EventTypeFlags, OverflowPolicy, PayloadEnvelope};
use tokio::sync::mpsc;

fn dispatch_envelope(event_type: &str, sequence: u64) -> PayloadEnvelope {
    PayloadEnvelope {
        op: Some(stormgate_gateway::Opcode::Dispatch),
        raw_op: 0,
        data: json!({}),
        sequence: Some(sequence),
        event_type: Some(event_type.to_owned()),
    }
}

#[tokio::test]
async fn exact_name_subscriber_receives_only_its_event() {
    let router = DispatchRouter::new();
    let mut ready = router.on("READY", 8, OverflowPolicy::Disconnect);
    let mut message_create = router.on("MESSAGE_CREATE", 8, OverflowPolicy::Disconnect);

    let (tx, rx) = mpsc::unbounded_channel();
    let run = tokio::spawn(async move { router.run(rx).await });

    tx.send((0, dispatch_envelope("READY", 1))).unwrap();
    tx.send((0, dispatch_envelope("MESSAGE_CREATE", 2))).unwrap();
    drop(tx);
    run.await.unwrap();

    let ready_envelope = ready.recv().await.unwrap();
    assert_eq!(ready_envelope.envelope.event_type.as_deref(), Some("READY"));
    assert!(ready.try_recv().is_none());

    let message_envelope = message_create.recv().await.unwrap();
    assert_eq!(message_envelope.shard_id, 0);
    assert_eq!(message_envelope.envelope.event_type.as_deref(), Some("MESSAGE_CREATE"));
}

#[tokio::test]
async fn category_subscriber_sees_every_guild_event_regardless_of_name() {
    let router = DispatchRouter::new();
    let mut guild_events = router.on_types(EventTypeFlags::GUILD, 8, OverflowPolicy::Disconnect);

    let (tx, rx) = mpsc::unbounded_channel();
    let run = tokio::spawn(async move { router.run(rx).await });

    tx.send((1, dispatch_envelope("GUILD_CREATE", 1))).unwrap();
    tx.send((1, dispatch_envelope("GUILD_MEMBER_ADD", 2))).unwrap();
    tx.send((1, dispatch_envelope("READY", 3))).unwrap();
    drop(tx);
    run.await.unwrap();

    let first = guild_events.recv().await.unwrap();
    assert_eq!(first.envelope.event_type.as_deref(), Some("GUILD_CREATE"));
    let second = guild_events.recv().await.unwrap();
    assert_eq!(second.envelope.event_type.as_deref(), Some("GUILD_MEMBER_ADD"));
    assert!(guild_events.try_recv().is_none());
}

#[tokio::test]
async fn dropping_a_subscription_stops_future_deliveries() {
    let router = DispatchRouter::new();
    let subscription = router.on("READY", 4, OverflowPolicy::Disconnect);
    drop(subscription);

    let (tx, rx) = mpsc::unbounded_channel();
    let run = tokio::spawn(async move { router.run(rx).await });

    // Two dispatches: the first observes the subscriber is already gone and
    // unsubscribes it, so neither delivery panics or blocks.
    tx.send((0, dispatch_envelope("READY", 1))).unwrap();
    tx.send((0, dispatch_envelope("READY", 2))).unwrap();
    drop(tx);
    run.await.unwrap();
}
