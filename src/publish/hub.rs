//! Subscriber registry and non-blocking fan-out.
//!
//! Every subscriber owns two bounded queues, one for telemetry (and command
//! replies) and one for auxiliary samples, so a burst on one channel cannot
//! crowd the other out. A fan-out copies the sender set under the lock and
//! delivers outside it with `try_send`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use super::{Event, Topic};
use crate::error::{BridgeError, Result};

/// Outcome of one fan-out
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub dropped: usize,
    pub removed: usize,
}

/// Lifetime totals for the hub
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    pub subscribers: usize,
    pub dropped: u64,
    pub removed: u64,
}

#[derive(Clone)]
struct SubscriberSlot {
    telemetry: mpsc::Sender<Event>,
    aux: mpsc::Sender<Event>,
}

impl SubscriberSlot {
    fn sender(&self, topic: Topic) -> &mpsc::Sender<Event> {
        match topic {
            Topic::Aux => &self.aux,
            Topic::Telemetry | Topic::Command => &self.telemetry,
        }
    }
}

#[derive(Default)]
struct Registry {
    closed: bool,
    subscribers: HashMap<u64, SubscriberSlot>,
}

/// Registry of active subscribers
pub struct SubscriberHub {
    registry: Mutex<Registry>,
    queue_depth: usize,
    next_id: AtomicU64,
    dropped: AtomicU64,
    removed: AtomicU64,
}

impl std::fmt::Debug for SubscriberHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberHub")
            .field("queue_depth", &self.queue_depth)
            .field("stats", &self.stats())
            .finish()
    }
}

impl SubscriberHub {
    /// Create a hub whose subscribers each get `queue_depth` slots per channel
    pub fn new(queue_depth: usize) -> Arc<Self> {
        Arc::new(Self {
            registry: Mutex::new(Registry::default()),
            queue_depth: queue_depth.max(1),
            next_id: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
            removed: AtomicU64::new(0),
        })
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a subscriber
    ///
    /// `initial` is queued before the subscriber becomes visible to any
    /// fan-out, so it is always the first event received.
    ///
    /// # Errors
    ///
    /// `ShuttingDown` once [`close`](Self::close) has been called.
    pub fn subscribe(self: &Arc<Self>, initial: Option<Event>) -> Result<Subscription> {
        let (telemetry_tx, telemetry_rx) = mpsc::channel(self.queue_depth);
        let (aux_tx, aux_rx) = mpsc::channel(self.queue_depth);
        let slot = SubscriberSlot {
            telemetry: telemetry_tx,
            aux: aux_tx,
        };

        if let Some(event) = initial {
            // Fresh queue with at least one free slot
            let _ = slot.sender(event.topic).try_send(event);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut registry = self.registry();
            if registry.closed {
                return Err(BridgeError::ShuttingDown);
            }
            registry.subscribers.insert(id, slot);
        }
        debug!("Subscriber {} registered", id);

        Ok(Subscription {
            id,
            hub: Arc::downgrade(self),
            telemetry: telemetry_rx,
            aux: aux_rx,
        })
    }

    /// Deliver `event` to every subscriber without waiting
    pub fn publish(&self, event: &Event) -> DeliveryReport {
        let targets: Vec<(u64, SubscriberSlot)> = self
            .registry()
            .subscribers
            .iter()
            .map(|(id, slot)| (*id, slot.clone()))
            .collect();

        let mut report = DeliveryReport::default();
        let mut closed = Vec::new();

        for (id, slot) in &targets {
            match slot.sender(event.topic).try_send(event.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    report.dropped += 1;
                    warn!("Subscriber {} queue full, dropped {} event", id, event.topic);
                }
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        if !closed.is_empty() {
            let mut registry = self.registry();
            for id in &closed {
                if registry.subscribers.remove(id).is_some() {
                    report.removed += 1;
                    debug!("Subscriber {} gone, removed", id);
                }
            }
        }

        self.dropped.fetch_add(report.dropped as u64, Ordering::Relaxed);
        self.removed.fetch_add(report.removed as u64, Ordering::Relaxed);
        report
    }

    fn unregister(&self, id: u64) {
        if self.registry().subscribers.remove(&id).is_some() {
            debug!("Subscriber {} unregistered", id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry().subscribers.len()
    }

    /// Refuse new subscribers and drop every registered one
    ///
    /// Subscriptions still drain what was already queued, then end.
    pub fn close(&self) {
        let mut registry = self.registry();
        registry.closed = true;
        let count = registry.subscribers.len();
        registry.subscribers.clear();
        info!("Subscriber hub closed ({} subscribers released)", count);
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            subscribers: self.subscriber_count(),
            dropped: self.dropped.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
        }
    }
}

/// Receiving end of one subscriber; unregisters on drop
pub struct Subscription {
    id: u64,
    hub: Weak<SubscriberHub>,
    telemetry: mpsc::Receiver<Event>,
    aux: mpsc::Receiver<Event>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event from either channel; `None` once the hub released us and
    /// both queues are drained
    pub async fn recv(&mut self) -> Option<Event> {
        tokio::select! {
            Some(event) = self.telemetry.recv() => Some(event),
            Some(event) = self.aux.recv() => Some(event),
            else => None,
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv), telemetry first
    pub fn try_recv(&mut self) -> Option<Event> {
        self.telemetry.try_recv().or_else(|_| self.aux.try_recv()).ok()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish_non_exhaustive()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unregister(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(topic: Topic, n: u64) -> Event {
        Event::new(topic, &json!({ "n": n })).unwrap()
    }

    #[tokio::test]
    async fn test_initial_event_comes_first() {
        let hub = SubscriberHub::new(4);
        let mut sub = hub.subscribe(Some(event(Topic::Telemetry, 0))).unwrap();
        hub.publish(&event(Topic::Telemetry, 1));

        assert_eq!(sub.recv().await.unwrap(), event(Topic::Telemetry, 0));
        assert_eq!(sub.recv().await.unwrap(), event(Topic::Telemetry, 1));
    }

    #[tokio::test]
    async fn test_fanout_reaches_every_subscriber() {
        let hub = SubscriberHub::new(4);
        let mut a = hub.subscribe(None).unwrap();
        let mut b = hub.subscribe(None).unwrap();

        let report = hub.publish(&event(Topic::Telemetry, 7));
        assert_eq!(report.delivered, 2);
        assert_eq!(a.recv().await.unwrap().payload, b.recv().await.unwrap().payload);
    }

    #[tokio::test]
    async fn test_full_queue_does_not_affect_others() {
        let hub = SubscriberHub::new(2);
        let _stalled = hub.subscribe(None).unwrap();
        let mut live = hub.subscribe(None).unwrap();

        for n in 0..5 {
            hub.publish(&event(Topic::Telemetry, n));
            // The live subscriber keeps up
            assert_eq!(live.recv().await.unwrap(), event(Topic::Telemetry, n));
        }

        let stats = hub.stats();
        assert_eq!(stats.dropped, 3);
        assert_eq!(stats.subscribers, 2);
    }

    #[tokio::test]
    async fn test_aux_flood_does_not_crowd_out_telemetry() {
        let hub = SubscriberHub::new(2);
        let mut sub = hub.subscribe(None).unwrap();

        for n in 0..10 {
            hub.publish(&event(Topic::Aux, n));
        }
        let report = hub.publish(&event(Topic::Telemetry, 99));
        assert_eq!(report.delivered, 1);

        let mut received = Vec::new();
        while let Some(e) = sub.try_recv() {
            received.push(e);
        }
        assert_eq!(received.len(), 3);
        assert!(received.contains(&event(Topic::Telemetry, 99)));
    }

    #[test]
    fn test_recv_waits_for_events() {
        let hub = SubscriberHub::new(4);
        let mut sub = hub.subscribe(None).unwrap();

        let mut recv = tokio_test::task::spawn(sub.recv());
        tokio_test::assert_pending!(recv.poll());

        hub.publish(&event(Topic::Aux, 3));
        assert!(recv.is_woken());
        let received = tokio_test::assert_ready!(recv.poll());
        assert_eq!(received, Some(event(Topic::Aux, 3)));
    }

    #[tokio::test]
    async fn test_dropped_subscription_unregisters() {
        let hub = SubscriberHub::new(4);
        let sub = hub.subscribe(None).unwrap();
        assert_eq!(hub.subscriber_count(), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(hub.publish(&event(Topic::Telemetry, 1)), DeliveryReport::default());
    }

    #[tokio::test]
    async fn test_close_releases_subscribers_and_refuses_new() {
        let hub = SubscriberHub::new(4);
        let mut sub = hub.subscribe(None).unwrap();
        hub.publish(&event(Topic::Telemetry, 1));

        hub.close();
        assert_eq!(hub.subscriber_count(), 0);
        assert!(matches!(hub.subscribe(None), Err(BridgeError::ShuttingDown)));

        // Already-queued events drain, then the stream ends
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
        assert_eq!(hub.publish(&event(Topic::Telemetry, 2)).delivered, 0);
    }

    #[test]
    fn test_registry_changes_during_fanout_copy() {
        let hub = SubscriberHub::new(1);
        let subs: Vec<_> = (0..8).map(|_| hub.subscribe(None).unwrap()).collect();

        let hub_clone = Arc::clone(&hub);
        let publisher = std::thread::spawn(move || {
            for n in 0..100 {
                hub_clone.publish(&event(Topic::Telemetry, n));
            }
        });
        drop(subs);
        publisher.join().unwrap();
        assert_eq!(hub.subscriber_count(), 0);
    }
}
