//! Ordered observer registry for in-process event fan-out.
//!
//! Delivery is synchronous and preserves publish order, which is the
//! in-process ordering guarantee the engine exposes. Subscribers hold a
//! stable [`SubscriptionToken`] for unsubscription.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use wavehub_core::types::UserId;

use crate::message::envelope::ChannelEvent;

/// Callback invoked for each published envelope a subscriber should see.
pub type EventCallback = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

/// Stable handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

struct Subscriber {
    token: SubscriptionToken,
    /// When set, only envelopes whose recipients contain this id are
    /// delivered; the filter discards locally, the envelope itself is
    /// published to everyone.
    user_filter: Option<UserId>,
    callback: EventCallback,
}

/// Ordered set of event subscribers for one channel.
pub struct ChannelPublisher {
    subscribers: Mutex<Vec<Subscriber>>,
    next_token: AtomicU64,
}

impl ChannelPublisher {
    /// Creates an empty publisher.
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Subscribes a callback to every published envelope.
    pub fn subscribe(&self, callback: EventCallback) -> SubscriptionToken {
        self.register(None, callback)
    }

    /// Subscribes a callback filtered to envelopes addressed to `user_id`.
    pub fn subscribe_user(&self, user_id: UserId, callback: EventCallback) -> SubscriptionToken {
        self.register(Some(user_id), callback)
    }

    fn register(&self, user_filter: Option<UserId>, callback: EventCallback) -> SubscriptionToken {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let mut subscribers = self.subscribers.lock().expect("publisher lock poisoned");
        subscribers.push(Subscriber {
            token,
            user_filter,
            callback,
        });
        token
    }

    /// Removes a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut subscribers = self.subscribers.lock().expect("publisher lock poisoned");
        let before = subscribers.len();
        subscribers.retain(|s| s.token != token);
        subscribers.len() != before
    }

    /// Publishes an envelope to every matching subscriber, in
    /// subscription order.
    pub fn publish(&self, event: &ChannelEvent) {
        // Callbacks run outside the lock so they may re-enter the
        // publisher (e.g. unsubscribe themselves).
        let callbacks: Vec<EventCallback> = {
            let subscribers = self.subscribers.lock().expect("publisher lock poisoned");
            subscribers
                .iter()
                .filter(|s| match &s.user_filter {
                    Some(user) => event.is_for(user),
                    None => true,
                })
                .map(|s| Arc::clone(&s.callback))
                .collect()
        };

        for callback in callbacks {
            callback(event);
        }
    }

    /// Drops every subscription.
    pub fn clear(&self) {
        self.subscribers
            .lock()
            .expect("publisher lock poisoned")
            .clear();
    }

    /// Number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("publisher lock poisoned")
            .len()
    }
}

impl Default for ChannelPublisher {
    fn default() -> Self {
        Self::new()
    }
}
