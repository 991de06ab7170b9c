//! Publish/subscribe feed for store commits and sync notifications.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tally_core::EventFeed;
//!
//! let feed = EventFeed::new();
//! let mut subscription = feed.subscribe();
//!
//! tokio::spawn(async move {
//!     while let Some(event) = subscription.recv().await {
//!         println!("event: {:?}", event);
//!     }
//! });
//!
//! feed.emit(42u32);
//! ```

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Identifies one subscription on an [`EventFeed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A live subscription.
///
/// Dropping it, or calling [`EventFeed::unsubscribe`] with its ID, stops
/// delivery. Events emitted while unsubscribed are never seen.
#[derive(Debug)]
pub struct Subscription<E> {
    id: SubscriptionId,
    receiver: UnboundedReceiver<E>,
}

impl<E> Subscription<E> {
    /// Returns the subscription's ID.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Waits for the next event.
    ///
    /// Returns `None` once the subscription was removed from the feed and
    /// all events queued before that have been received.
    pub async fn recv(&mut self) -> Option<E> {
        self.receiver.recv().await
    }

    /// Returns the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<E> {
        self.receiver.try_recv().ok()
    }
}

/// A feed that fans events out to any number of subscribers.
///
/// The feed:
/// - Preserves emission order per subscriber
/// - Never blocks the emitter
/// - Drops subscribers whose receiving end is gone
/// - Is thread-safe
pub struct EventFeed<E> {
    subscribers: RwLock<Vec<(SubscriptionId, UnboundedSender<E>)>>,
    next_id: AtomicU64,
}

impl<E: Clone> EventFeed<E> {
    /// Creates a feed without subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> Subscription<E> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().push((id, tx));
        Subscription { id, receiver: rx }
    }

    /// Removes a subscription.
    ///
    /// Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sub_id, _)| *sub_id != id);
        subscribers.len() != before
    }

    /// Emits an event to every subscriber.
    pub fn emit(&self, event: E) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    /// Returns the number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl<E: Clone> Default for EventFeed<E> {
    fn default() -> Self {
        Self::new()
    }
}
