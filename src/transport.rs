//! Transport adapter: the only surface components use to reach the bus.

use crate::error::{Result, SpeakerBusError};
use crate::subscription::Subscription;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

/// Publish/subscribe access to the bus
///
/// Both calls are safe to issue concurrently from any task. Neither knows
/// anything about message contents.
pub trait Transport: Send + Sync {
    /// Fire-and-forget publish; no delivery acknowledgment
    fn publish(&self, topic: &str, payload: Bytes) -> Result<()>;

    /// Start receiving payloads published on `topic`
    fn subscribe(&self, topic: &str) -> Result<Subscription>;
}

/// Transport shared by every component of a session
pub type SharedTransport = Arc<dyn Transport>;

/// In-process bus delivering to local subscribers only
///
/// Delivery is synchronous and FIFO per topic. Used by tests and demos in
/// place of a NATS server.
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    topics: DashMap<String, Vec<(u64, mpsc::UnboundedSender<Bytes>)>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .get(topic)
            .map(|subs| subs.len())
            .unwrap_or_default()
    }

    /// Drop every subscriber and refuse further traffic
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.topics.clear();
    }

    fn release(inner: &Weak<MemoryInner>, topic: &str, id: u64) {
        if let Some(inner) = inner.upgrade() {
            if let Some(mut subs) = inner.topics.get_mut(topic) {
                subs.retain(|(sub_id, _)| *sub_id != id);
            }
        }
    }
}

impl Transport for MemoryBus {
    fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(SpeakerBusError::ConnectionClosed);
        }
        if let Some(mut subs) = self.inner.topics.get_mut(topic) {
            subs.retain(|(_, tx)| tx.send(payload.clone()).is_ok());
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<Subscription> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(SpeakerBusError::ConnectionClosed);
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .topics
            .entry(topic.to_string())
            .or_default()
            .push((id, tx));

        let inner = Arc::downgrade(&self.inner);
        let owned_topic = topic.to_string();
        Ok(Subscription::new(topic, rx, move || {
            MemoryBus::release(&inner, &owned_topic, id)
        }))
    }
}
