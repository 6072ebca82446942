//! C7: `DispatchRouter` — subscribes user handlers to dispatch events,
//! forwarding each shard's envelopes to every interested subscriber over
//! its own bounded queue so one slow consumer cannot stall the others.
//!
//! Grounded on the teacher's `Emitter`/`Events` split (`shard/emitter.rs`,
//! `shard/event.rs`): a bitflag filter gates what crosses into a
//! subscriber's queue. This router adds a per-subscriber overflow policy
//! and a hand-rolled bounded queue (rather than `tokio::sync::mpsc`) since
//! an `mpsc::Sender` cannot itself evict an already-queued item, which a
//! drop-oldest policy requires.

use crate::model::{Opcode, PayloadEnvelope};
use crate::pool::ShardPool;
use crate::shard::command::{PresenceUpdate, RequestGuildMembers, VoiceStateUpdate};
use crate::shard::ShardSendError;
use bitflags::bitflags;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

bitflags! {
    /// Coarse event-category filter, checked against an event's `t` field
    /// by prefix. Supplements (does not replace) exact-name subscription
    /// via [`DispatchRouter::on`].
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct EventTypeFlags: u32 {
        /// `READY`.
        const READY = 1 << 0;
        /// `RESUMED`.
        const RESUMED = 1 << 1;
        /// Any `GUILD_*` event.
        const GUILD = 1 << 2;
        /// Any `MESSAGE_*` event.
        const MESSAGE = 1 << 3;
        /// Any `VOICE_*` event.
        const VOICE = 1 << 4;
        /// Any `PRESENCE_*` or `TYPING_*` event.
        const PRESENCE = 1 << 5;
        /// Everything not covered by a more specific flag above.
        const OTHER = 1 << 31;
        /// Every known category.
        const ALL = Self::READY.bits()
            | Self::RESUMED.bits()
            | Self::GUILD.bits()
            | Self::MESSAGE.bits()
            | Self::VOICE.bits()
            | Self::PRESENCE.bits()
            | Self::OTHER.bits();
    }
}

impl EventTypeFlags {
    fn classify(event_type: &str) -> Self {
        match event_type {
            "READY" => Self::READY,
            "RESUMED" => Self::RESUMED,
            name if name.starts_with("GUILD") => Self::GUILD,
            name if name.starts_with("MESSAGE") => Self::MESSAGE,
            name if name.starts_with("VOICE") => Self::VOICE,
            name if name.starts_with("PRESENCE") || name.starts_with("TYPING") => Self::PRESENCE,
            _ => Self::OTHER,
        }
    }
}

/// What to do when a subscriber's queue is at capacity.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OverflowPolicy {
    /// Discard the oldest queued envelope to make room for the new one.
    DropOldest,
    /// Unsubscribe the slow consumer entirely; its queue is dropped.
    Disconnect,
}

/// One dispatch envelope plus the shard id it arrived on.
#[derive(Clone, Debug)]
pub struct RoutedEnvelope {
    /// The shard that received this dispatch.
    pub shard_id: u32,
    /// The decoded envelope. `op` is always `Some(Opcode::Dispatch)`.
    pub envelope: PayloadEnvelope,
}

struct Inbox {
    queue: Mutex<VecDeque<RoutedEnvelope>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
}

/// A live subscription returned from [`DispatchRouter::on`] or
/// [`DispatchRouter::on_types`]. Dropping it unsubscribes.
pub struct Subscription {
    inbox: Arc<Inbox>,
}

impl Subscription {
    /// Wait for the next matching envelope, or `None` once the router
    /// driving this subscription has been dropped.
    pub async fn recv(&mut self) -> Option<RoutedEnvelope> {
        loop {
            if let Some(item) = self.inbox.queue.lock().unwrap().pop_front() {
                return Some(item);
            }
            if self.inbox.closed.load(Ordering::Acquire) {
                return None;
            }
            self.inbox.notify.notified().await;
        }
    }

    /// Take the next matching envelope if one is already queued, without
    /// waiting.
    pub fn try_recv(&mut self) -> Option<RoutedEnvelope> {
        self.inbox.queue.lock().unwrap().pop_front()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.inbox.closed.store(true, Ordering::Release);
    }
}

struct Subscriber {
    event_name: Option<String>,
    types: EventTypeFlags,
    policy: OverflowPolicy,
    inbox: Arc<Inbox>,
}

impl Subscriber {
    fn wants(&self, event_type: &str) -> bool {
        let name_matches = self.event_name.as_deref().is_none_or(|name| name == event_type);
        name_matches && self.types.contains(EventTypeFlags::classify(event_type))
    }

    /// Attempt delivery; returns `false` if the subscriber should be
    /// dropped from the router's list (it unsubscribed, or overflowed
    /// under a disconnect policy).
    fn deliver(&self, routed: &RoutedEnvelope) -> bool {
        if self.inbox.closed.load(Ordering::Acquire) {
            return false;
        }

        let mut queue = self.inbox.queue.lock().unwrap();
        if queue.len() >= self.inbox.capacity {
            match self.policy {
                OverflowPolicy::Disconnect => {
                    tracing::warn!(event_name = ?self.event_name, "subscriber queue full, disconnecting");
                    return false;
                }
                OverflowPolicy::DropOldest => {
                    tracing::debug!(event_name = ?self.event_name, "subscriber queue full, dropping oldest");
                    queue.pop_front();
                }
            }
        }
        queue.push_back(routed.clone());
        drop(queue);
        self.inbox.notify.notify_one();
        true
    }
}

/// Fans out dispatch envelopes from a [`ShardPool`]'s merged event stream
/// to subscribers, and offers thin proxies for the outbound commands that
/// are conventionally driven off received events (presence, voice state,
/// guild member requests).
pub struct DispatchRouter {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl DispatchRouter {
    /// Construct an empty router.
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to every dispatch matching `event_name` exactly, e.g.
    /// `"MESSAGE_CREATE"`.
    pub fn on(&self, event_name: impl Into<String>, capacity: usize, policy: OverflowPolicy) -> Subscription {
        self.subscribe(Some(event_name.into()), EventTypeFlags::ALL, capacity, policy)
    }

    /// Subscribe to every dispatch whose category matches `types`.
    pub fn on_types(&self, types: EventTypeFlags, capacity: usize, policy: OverflowPolicy) -> Subscription {
        self.subscribe(None, types, capacity, policy)
    }

    fn subscribe(&self, event_name: Option<String>, types: EventTypeFlags, capacity: usize, policy: OverflowPolicy) -> Subscription {
        let inbox = Arc::new(Inbox {
            queue: Mutex::new(VecDeque::with_capacity(capacity.max(1).min(64))),
            capacity: capacity.max(1),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        });

        self.subscribers.lock().unwrap().push(Subscriber {
            event_name,
            types,
            policy,
            inbox: Arc::clone(&inbox),
        });

        Subscription { inbox }
    }

    /// Drain a pool's merged event stream forever, fanning each envelope
    /// out to matching subscribers. Intended to be spawned as its own
    /// task; returns once the pool's stream ends.
    pub async fn run(&self, mut events: tokio::sync::mpsc::UnboundedReceiver<(u32, PayloadEnvelope)>) {
        while let Some((shard_id, envelope)) = events.recv().await {
            self.dispatch(shard_id, envelope);
        }
    }

    fn dispatch(&self, shard_id: u32, envelope: PayloadEnvelope) {
        let Some(event_type) = envelope.event_type.clone() else {
            return;
        };

        let routed = RoutedEnvelope { shard_id, envelope };
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|subscriber| !subscriber.wants(&event_type) || subscriber.deliver(&routed));
    }

    /// Update this bot's presence on a specific shard.
    pub async fn update_presence(&self, pool: &ShardPool, shard_id: u32, presence: PresenceUpdate) -> Result<(), ShardSendError> {
        pool.send(shard_id, Opcode::PresenceUpdate, presence).await
    }

    /// Join, move, or leave a voice channel, routed to the shard that owns
    /// `guild_id`.
    pub async fn update_voice_state(&self, pool: &ShardPool, guild_id: u64, voice_state: VoiceStateUpdate) -> Result<(), ShardSendError> {
        pool.send_for_guild(guild_id, Opcode::VoiceStateUpdate, voice_state).await
    }

    /// Request a guild's member list, routed to the shard that owns
    /// `guild_id`.
    pub async fn request_guild_members(&self, pool: &ShardPool, guild_id: u64, request: RequestGuildMembers) -> Result<(), ShardSendError> {
        pool.send_for_guild(guild_id, Opcode::RequestGuildMembers, request).await
    }
}

impl Default for DispatchRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(event_type: &str) -> PayloadEnvelope {
        PayloadEnvelope {
            op: Some(Opcode::Dispatch),
            raw_op: 0,
            data: serde_json::Value::Null,
            sequence: Some(1),
            event_type: Some(event_type.to_owned()),
        }
    }

    #[test]
    fn exact_name_subscriber_only_gets_matching_events() {
        let router = DispatchRouter::new();
        let mut sub = router.on("MESSAGE_CREATE", 4, OverflowPolicy::Disconnect);

        router.dispatch(0, envelope("MESSAGE_CREATE"));
        router.dispatch(0, envelope("MESSAGE_DELETE"));

        let first = sub.try_recv().unwrap();
        assert_eq!(first.envelope.event_type.as_deref(), Some("MESSAGE_CREATE"));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn category_subscriber_matches_by_prefix() {
        let router = DispatchRouter::new();
        let mut sub = router.on_types(EventTypeFlags::GUILD, 4, OverflowPolicy::Disconnect);

        router.dispatch(1, envelope("GUILD_CREATE"));
        router.dispatch(1, envelope("MESSAGE_CREATE"));

        let routed = sub.try_recv().unwrap();
        assert_eq!(routed.shard_id, 1);
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn disconnect_policy_drops_subscriber_once_full() {
        let router = DispatchRouter::new();
        let _sub = router.on_types(EventTypeFlags::ALL, 1, OverflowPolicy::Disconnect);

        router.dispatch(0, envelope("READY"));
        router.dispatch(0, envelope("READY"));

        assert_eq!(router.subscribers.lock().unwrap().len(), 0);
    }

    #[test]
    fn drop_oldest_policy_keeps_subscriber_and_newest_item() {
        let router = DispatchRouter::new();
        let mut sub = router.on_types(EventTypeFlags::ALL, 1, OverflowPolicy::DropOldest);

        router.dispatch(0, envelope("GUILD_CREATE"));
        router.dispatch(0, envelope("GUILD_UPDATE"));

        assert_eq!(router.subscribers.lock().unwrap().len(), 1);
        let kept = sub.try_recv().unwrap();
        assert_eq!(kept.envelope.event_type.as_deref(), Some("GUILD_UPDATE"));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn dropping_subscription_unsubscribes_on_next_dispatch() {
        let router = DispatchRouter::new();
        let sub = router.on_types(EventTypeFlags::ALL, 4, OverflowPolicy::Disconnect);
        drop(sub);

        router.dispatch(0, envelope("READY"));

        assert_eq!(router.subscribers.lock().unwrap().len(), 0);
    }
}
