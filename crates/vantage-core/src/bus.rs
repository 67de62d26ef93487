// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Notify};

use crate::events::AgentEvent;

/// An `AgentEvent` tagged with its position in the session's emission order.
///
/// `seq` is assigned by [`EventBus::publish`] and is monotonically
/// increasing for the lifetime of the bus — subscribers that join late can
/// tell from a gap in `seq` that they missed events, and two subscribers
/// will always agree on relative ordering.
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub seq: u64,
    pub event: AgentEvent,
}

/// Bounded multi-subscriber event feed for one agent session.
///
/// Every event the agent emits is published here in addition to being sent
/// down the caller's per-call channel. Subscribers that only care about
/// "has the session gone idle" use [`EventBus::idle_signal`] instead of
/// polling the channel; back-pressure on one slow subscriber never blocks
/// another, since `tokio::sync::broadcast` drops the oldest unread message
/// for a lagging receiver rather than stalling the publisher.
pub struct EventBus {
    sender: broadcast::Sender<BusEvent>,
    seq: AtomicU64,
    idle: Arc<Notify>,
}

/// Back-pressure capacity for the broadcast channel. A subscriber that falls
/// this far behind starts missing events (reported as `RecvError::Lagged` on
/// the next `recv()`), rather than the publisher blocking on it.
const BUS_CAPACITY: usize = 1024;

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            sender,
            seq: AtomicU64::new(0),
            idle: Arc::new(Notify::new()),
        }
    }

    /// Publish `event`, assigning it the next sequence number.
    ///
    /// If there are no subscribers this is a no-op beyond the counter bump —
    /// `broadcast::Sender::send` only errors when the channel has zero
    /// receivers, which is the common case for a one-shot CI run that never
    /// calls [`EventBus::subscribe`].
    pub fn publish(&self, event: AgentEvent) {
        let is_idle = matches!(event, AgentEvent::SessionIdle);
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let _ = self.sender.send(BusEvent { seq, event });
        if is_idle {
            self.idle.notify_waiters();
        }
    }

    /// Subscribe to this bus's event feed from this point forward.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            inner: self.sender.subscribe(),
        }
    }

    /// Resolves the next time `SessionIdle` is published. Callers that start
    /// waiting after the session has already gone idle once will wait for
    /// the *next* occurrence, not return immediately — use this to await a
    /// turn's completion, not to poll current idleness.
    pub async fn idle_signal(&self) {
        self.idle.notified().await;
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscription handle returned by [`EventBus::subscribe`].
pub struct EventReceiver {
    inner: broadcast::Receiver<BusEvent>,
}

impl EventReceiver {
    /// Receive the next event, skipping over any `Lagged` gap rather than
    /// surfacing it as an error — a CI output sink cares about the events it
    /// can still see, not about proving it saw every one.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        loop {
            match self.inner.recv().await {
                Ok(ev) => return Some(ev),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
