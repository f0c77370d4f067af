//! The Broadcast Hub: fan-out of stream messages to live subscribers.
//!
//! Every subscriber owns a bounded [`mpsc`] queue. Publishing serializes
//! the message once and `try_send`s the shared frame into each eligible
//! queue, so the publisher never waits on a network write. A subscriber
//! whose queue is full or closed is removed on the spot; its transport
//! then sees the end of the stream and closes the connection.
//!
//! Dropping a [`Subscription`] unregisters it immediately.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tallyboard_types::{StreamEvent, Topic};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// One serialized message, shared by every queue it was delivered to.
#[derive(Debug, PartialEq, Eq)]
pub struct Frame {
    /// Message type tag (SSE `event:` name).
    pub name: &'static str,
    /// JSON payload without the tag (SSE `data:`).
    pub data: String,
    /// `{"type": ..., "data": ...}` envelope (`WebSocket` text frame).
    pub envelope: String,
}

impl Frame {
    /// Serialize a stream event into both transport forms.
    pub fn encode(event: &StreamEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            name: event.name(),
            data: event.payload_json()?,
            envelope: serde_json::to_string(event)?,
        })
    }
}

struct Entry {
    tx: mpsc::Sender<Arc<Frame>>,
    authorized: bool,
}

impl Entry {
    const fn accepts(&self, topic: Topic) -> bool {
        match topic {
            Topic::Public => true,
            Topic::Private => self.authorized,
        }
    }
}

struct Registry {
    subscribers: Mutex<HashMap<u64, Entry>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Entry>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registry of live subscribers. Cheap to clone; clones share the
/// registry.
#[derive(Clone)]
pub struct Hub {
    registry: Arc<Registry>,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("subscribers", &self.subscriber_count())
            .field("buffer", &self.registry.buffer)
            .finish()
    }
}

impl Hub {
    /// A hub whose subscribers each buffer up to `buffer` messages.
    pub fn new(buffer: usize) -> Self {
        Self {
            registry: Arc::new(Registry {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                buffer: buffer.max(1),
            }),
        }
    }

    /// Register a subscriber and queue `initial` as its first message.
    ///
    /// `authorized` subscribers also receive [`Topic::Private`] messages.
    /// Call this while holding a read view of the store that `initial`
    /// was computed from, so no publish can slip in between.
    pub fn subscribe(&self, authorized: bool, initial: &StreamEvent) -> Subscription {
        let (tx, rx) = mpsc::channel(self.registry.buffer);
        match Frame::encode(initial) {
            Ok(frame) => {
                // Fresh queue with capacity >= 1 cannot be full.
                let _ = tx.try_send(Arc::new(frame));
            }
            Err(e) => warn!(error = %e, "Failed to encode initial stream message"),
        }

        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let count = {
            let mut subscribers = self.registry.lock();
            subscribers.insert(id, Entry { tx, authorized });
            subscribers.len()
        };
        debug!(subscriber = id, authorized, subscribers = count, "Subscriber joined");

        Subscription {
            id,
            rx,
            registry: Arc::clone(&self.registry),
        }
    }

    /// Deliver `event` to every subscriber eligible for its topic.
    ///
    /// Never blocks. Returns how many subscribers it was queued for.
    pub fn publish(&self, event: &StreamEvent) -> usize {
        let frame = match Frame::encode(event) {
            Ok(frame) => Arc::new(frame),
            Err(e) => {
                warn!(message = event.name(), error = %e, "Failed to encode stream message");
                return 0;
            }
        };
        let topic = event.topic();

        let mut delivered = 0_usize;
        let mut subscribers = self.registry.lock();
        subscribers.retain(|id, entry| {
            if !entry.accepts(topic) {
                return true;
            }
            match entry.tx.try_send(Arc::clone(&frame)) {
                Ok(()) => {
                    delivered = delivered.saturating_add(1);
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber = id, "Subscriber fell behind, dropping it");
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber = id, "Subscriber gone, removing it");
                    false
                }
            }
        });
        delivered
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Drop every subscriber that receives [`Topic::Private`] messages.
    ///
    /// Used when the access rules change: the affected clients reconnect
    /// and are authorized again against the new rules. Public-only
    /// subscribers are untouched.
    pub fn close_private(&self) -> usize {
        let mut subscribers = self.registry.lock();
        let before = subscribers.len();
        subscribers.retain(|_, entry| !entry.authorized);
        let closed = before.saturating_sub(subscribers.len());
        if closed > 0 {
            debug!(subscribers = closed, "Closed privately authorized subscribers");
        }
        closed
    }

    /// Drop every subscriber. Their streams end after any queued messages.
    pub fn close_all(&self) -> usize {
        let closed = self.registry.lock().drain().count();
        if closed > 0 {
            debug!(subscribers = closed, "Closed all subscribers");
        }
        closed
    }
}

/// One live connection's view of the hub.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Arc<Frame>>,
    registry: Arc<Registry>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Subscription {
    /// The next message, or `None` once the hub dropped this subscriber.
    pub async fn recv(&mut self) -> Option<Arc<Frame>> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let remaining = {
            let mut subscribers = self.registry.lock();
            subscribers.remove(&self.id);
            subscribers.len()
        };
        debug!(subscriber = self.id, subscribers = remaining, "Subscriber left");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use chrono::Utc;
    use tallyboard_types::{Participant, ParticipantId};

    use super::*;

    fn heartbeat() -> StreamEvent {
        StreamEvent::Heartbeat { at: Utc::now() }
    }

    fn participant() -> StreamEvent {
        StreamEvent::ParticipantAdded(Participant {
            id: ParticipantId::new(),
            name: "Ada".to_owned(),
            avatar_ref: None,
            self_estimate: 2,
        })
    }

    #[tokio::test]
    async fn initial_message_arrives_first() {
        let hub = Hub::new(8);
        let mut sub = hub.subscribe(false, &StreamEvent::PredictionsLockChanged { locked: true });
        hub.publish(&heartbeat());

        assert_eq!(sub.recv().await.unwrap().name, "predictions-lock-changed");
        assert_eq!(sub.recv().await.unwrap().name, "heartbeat");
    }

    #[tokio::test]
    async fn private_messages_skip_unauthorized_subscribers() {
        let hub = Hub::new(8);
        let mut public = hub.subscribe(false, &heartbeat());
        let mut private = hub.subscribe(true, &heartbeat());
        let _ = public.recv().await;
        let _ = private.recv().await;

        assert_eq!(hub.publish(&participant()), 1);
        assert_eq!(private.recv().await.unwrap().name, "participant-added");
        assert!(public.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_drops_only_that_subscriber() {
        let hub = Hub::new(2);
        let mut healthy = hub.subscribe(false, &heartbeat());
        let stalled = hub.subscribe(false, &heartbeat());

        for _ in 0..3 {
            let _ = healthy.recv().await;
            hub.publish(&heartbeat());
        }

        assert_eq!(hub.subscriber_count(), 1);
        assert!(healthy.recv().await.is_some());
        drop(stalled);
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn dropped_subscription_is_removed() {
        let hub = Hub::new(4);
        let sub = hub.subscribe(false, &heartbeat());
        assert_eq!(hub.subscriber_count(), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(hub.publish(&heartbeat()), 0);
    }

    #[tokio::test]
    async fn close_all_ends_every_stream() {
        let hub = Hub::new(4);
        let mut sub = hub.subscribe(false, &heartbeat());
        assert_eq!(hub.close_all(), 1);
        assert_eq!(sub.recv().await.unwrap().name, "heartbeat");
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn close_private_keeps_public_subscribers() {
        let hub = Hub::new(4);
        let mut public = hub.subscribe(false, &heartbeat());
        let mut private = hub.subscribe(true, &heartbeat());
        assert_eq!(hub.close_private(), 1);
        assert_eq!(hub.subscriber_count(), 1);

        assert_eq!(private.recv().await.unwrap().name, "heartbeat");
        assert!(private.recv().await.is_none());

        hub.publish(&heartbeat());
        assert_eq!(public.recv().await.unwrap().name, "heartbeat");
        assert_eq!(public.recv().await.unwrap().name, "heartbeat");
    }

    #[test]
    fn frame_has_both_transport_forms() {
        let frame = Frame::encode(&StreamEvent::PredictionsLockChanged { locked: false }).unwrap();
        assert_eq!(frame.data, r#"{"locked":false}"#);
        let envelope: serde_json::Value = serde_json::from_str(&frame.envelope).unwrap();
        assert_eq!(envelope["type"], "predictions-lock-changed");
        assert_eq!(envelope["data"]["locked"], false);
    }
}
