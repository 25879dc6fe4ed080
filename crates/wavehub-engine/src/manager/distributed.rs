//! Redis-backed state manager for multi-instance deployments.
//!
//! Every mutation updates the local caches first (read-after-write), then
//! delegates persistence and cross-instance fan-out to the
//! [`ClusterClient`]. Remote changes arriving on the cluster topics are
//! applied to the local caches and re-delivered to locally subscribed
//! users; echoes of this instance's own writes are suppressed by value
//! (state changes) or by request id (channel messages).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tracing::{debug, warn};

use wavehub_core::result::AppResult;
use wavehub_core::types::{ChannelId, RequestId, StateMap, UserId};

use crate::message::envelope::ChannelEvent;
use crate::presence::{PresenceDiff, PresenceEngine};
use crate::pubsub::{ChannelPublisher, EventCallback};

use super::membership::MembershipTable;
use super::{
    CloseHook, ClusterClient, ClusterSubscription, LeaveSnapshot, RemoteStateEvent, StateManager,
};

/// Request ids of recent own broadcasts, kept for echo suppression.
const RECENT_BROADCAST_CAPACITY: usize = 256;

/// Distributed state manager delegating persistence and fan-out to a
/// [`ClusterClient`].
pub struct DistributedManager {
    inner: Arc<Inner>,
}

struct Inner {
    channel_id: ChannelId,
    membership: MembershipTable,
    presence: PresenceEngine,
    publisher: ChannelPublisher,
    client: Arc<dyn ClusterClient>,
    subscriptions: Mutex<Vec<ClusterSubscription>>,
    recent_broadcasts: Mutex<VecDeque<RequestId>>,
    on_close: Mutex<Option<CloseHook>>,
    closed: AtomicBool,
}

impl Inner {
    fn emit_presence(&self, diff: &PresenceDiff) {
        let event = ChannelEvent::presence(&self.channel_id, diff);
        self.publisher.publish(&event);
    }

    fn handle_remote_presence(&self, event: RemoteStateEvent) {
        match event {
            RemoteStateEvent::Changed { user_id, state } => {
                if let Some(diff) = self.presence.apply_remote(&user_id, state) {
                    self.emit_presence(&diff);
                }
            }
            RemoteStateEvent::Synced { snapshot } => {
                for diff in self.presence.reconcile(snapshot) {
                    self.emit_presence(&diff);
                }
            }
        }
    }

    fn handle_remote_assigns(&self, event: RemoteStateEvent) {
        match event {
            RemoteStateEvent::Changed { user_id, state } => {
                self.membership.apply_remote(&user_id, state);
            }
            RemoteStateEvent::Synced { snapshot } => {
                self.membership.reconcile(snapshot);
            }
        }
    }

    fn handle_remote_leave(&self, user_id: UserId) {
        if let Some(diff) = self.presence.apply_remote(&user_id, None) {
            self.emit_presence(&diff);
        }
        self.membership.apply_remote(&user_id, None);
        if let Some(token) = self.membership.take_token(&user_id) {
            self.publisher.unsubscribe(token);
        }
        // A leave that empties the replica closes the manager just like a
        // local removal would, so the lobby drops the channel everywhere.
        if self.membership.is_empty() {
            self.close_now("membership emptied remotely");
        }
    }

    fn handle_remote_message(&self, event: ChannelEvent) {
        if let Some(request_id) = &event.request_id {
            if self.take_recent_broadcast(request_id) {
                return;
            }
        }
        self.publisher.publish(&event);
    }

    fn record_broadcast(&self, request_id: RequestId) {
        let mut recent = self
            .recent_broadcasts
            .lock()
            .expect("recent broadcasts lock poisoned");
        if recent.len() == RECENT_BROADCAST_CAPACITY {
            recent.pop_front();
        }
        recent.push_back(request_id);
    }

    fn close_now(&self, reason: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(channel = %self.channel_id, reason, "Closing distributed manager");

        let subscriptions: Vec<ClusterSubscription> = {
            let mut held = self
                .subscriptions
                .lock()
                .expect("subscriptions lock poisoned");
            held.drain(..).collect()
        };
        for mut subscription in subscriptions {
            subscription.close();
        }

        self.publisher.clear();
        self.membership.clear();
        self.presence.clear();

        let hook = self
            .on_close
            .lock()
            .expect("close hook lock poisoned")
            .take();
        if let Some(hook) = hook {
            hook(&self.channel_id);
        }
    }

    fn take_recent_broadcast(&self, request_id: &RequestId) -> bool {
        let mut recent = self
            .recent_broadcasts
            .lock()
            .expect("recent broadcasts lock poisoned");
        if let Some(position) = recent.iter().position(|id| id == request_id) {
            recent.remove(position);
            true
        } else {
            false
        }
    }
}

impl DistributedManager {
    /// Creates a manager for one channel over the given cluster client.
    pub fn new(channel_id: ChannelId, client: Arc<dyn ClusterClient>) -> Self {
        Self {
            inner: Arc::new(Inner {
                membership: MembershipTable::new(channel_id.clone()),
                presence: PresenceEngine::new(channel_id.clone()),
                publisher: ChannelPublisher::new(),
                channel_id,
                client,
                subscriptions: Mutex::new(Vec::new()),
                recent_broadcasts: Mutex::new(VecDeque::new()),
                on_close: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    async fn subscribe_cluster_topics(&self) -> AppResult<()> {
        let inner = &self.inner;

        let weak: Weak<Inner> = Arc::downgrade(inner);
        let presence_sub = inner
            .client
            .subscribe_presence_changes(Arc::new(move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_remote_presence(event);
                }
            }))
            .await?;

        let weak: Weak<Inner> = Arc::downgrade(inner);
        let assigns_sub = inner
            .client
            .subscribe_assigns_changes(Arc::new(move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_remote_assigns(event);
                }
            }))
            .await?;

        let weak: Weak<Inner> = Arc::downgrade(inner);
        let leave_sub = inner
            .client
            .subscribe_user_leaves(Arc::new(move |user_id| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_remote_leave(user_id);
                }
            }))
            .await?;

        let weak: Weak<Inner> = Arc::downgrade(inner);
        let message_sub = inner
            .client
            .subscribe_channel_messages(Arc::new(move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_remote_message(event);
                }
            }))
            .await?;

        let mut subscriptions = inner
            .subscriptions
            .lock()
            .expect("subscriptions lock poisoned");
        subscriptions.extend([presence_sub, assigns_sub, leave_sub, message_sub]);
        Ok(())
    }
}

#[async_trait]
impl StateManager for DistributedManager {
    fn channel_id(&self) -> &ChannelId {
        &self.inner.channel_id
    }

    async fn initialize(&self, on_close: CloseHook) -> AppResult<()> {
        *self
            .inner
            .on_close
            .lock()
            .expect("close hook lock poisoned") = Some(on_close);

        // Hydrate from the merged snapshot across live instances before
        // attaching to the topics; the initial state sync emitted on
        // attach reconciles anything published in between.
        let presence = self.inner.client.get_presence_cache().await?;
        self.inner.presence.hydrate(presence);
        let assigns = self.inner.client.get_assigns_cache().await?;
        self.inner.membership.hydrate(assigns);

        self.subscribe_cluster_topics().await
    }

    async fn add_user(
        &self,
        user_id: &UserId,
        assigns: StateMap,
        on_message: EventCallback,
    ) -> AppResult<()> {
        self.inner.membership.set_assigns(user_id, assigns.clone())?;
        let token = self
            .inner
            .publisher
            .subscribe_user(user_id.clone(), on_message);
        self.inner.membership.store_token(user_id, token);

        self.inner
            .client
            .publish_assigns_change(user_id, Some(&assigns))
            .await
    }

    async fn remove_user(&self, user_id: &UserId) -> AppResult<LeaveSnapshot> {
        let snapshot = LeaveSnapshot {
            user_id: user_id.clone(),
            assigns: self.inner.membership.get_assigns(user_id).unwrap_or_default(),
            presence: self.inner.presence.get(user_id),
        };

        // Best-effort teardown; removal must always complete.
        if let Ok(Some(diff)) = self.inner.presence.remove(user_id, true) {
            self.inner.emit_presence(&diff);
            if let Err(e) = self
                .inner
                .client
                .publish_presence_change(user_id, None)
                .await
            {
                warn!(channel = %self.inner.channel_id, user = %user_id, error = %e,
                    "Failed to publish presence removal");
            }
        }
        self.inner.membership.remove_assigns(user_id);
        if let Err(e) = self
            .inner
            .client
            .publish_assigns_change(user_id, None)
            .await
        {
            warn!(channel = %self.inner.channel_id, user = %user_id, error = %e,
                "Failed to publish assigns removal");
        }
        if let Err(e) = self.inner.client.publish_user_leave(user_id).await {
            warn!(channel = %self.inner.channel_id, user = %user_id, error = %e,
                "Failed to publish user leave");
        }
        if let Some(token) = self.inner.membership.take_token(user_id) {
            self.inner.publisher.unsubscribe(token);
        }

        if self.inner.membership.is_empty() {
            self.close("last member left").await?;
        }
        Ok(snapshot)
    }

    async fn update_assigns(&self, user_id: &UserId, assigns: StateMap) -> AppResult<()> {
        self.inner.membership.update_assigns(user_id, assigns.clone())?;
        self.inner
            .client
            .publish_assigns_change(user_id, Some(&assigns))
            .await
    }

    async fn track_presence(&self, user_id: &UserId, state: StateMap) -> AppResult<()> {
        let diff = self.inner.presence.track(user_id, state.clone())?;
        self.inner.emit_presence(&diff);
        self.inner
            .client
            .publish_presence_change(user_id, Some(&state))
            .await
    }

    async fn update_presence(&self, user_id: &UserId, state: StateMap) -> AppResult<()> {
        let diff = self.inner.presence.update(user_id, state.clone())?;
        self.inner.emit_presence(&diff);
        self.inner
            .client
            .publish_presence_change(user_id, Some(&state))
            .await
    }

    async fn remove_presence(&self, user_id: &UserId, safe: bool) -> AppResult<()> {
        if let Some(diff) = self.inner.presence.remove(user_id, safe)? {
            self.inner.emit_presence(&diff);
            self.inner
                .client
                .publish_presence_change(user_id, None)
                .await?;
        }
        Ok(())
    }

    async fn upsert_presence(&self, user_id: &UserId, state: StateMap) -> AppResult<()> {
        let diff = self.inner.presence.upsert(user_id, state.clone())?;
        self.inner.emit_presence(&diff);
        self.inner
            .client
            .publish_presence_change(user_id, Some(&state))
            .await
    }

    fn get_presence(&self, user_id: &UserId) -> Option<StateMap> {
        self.inner.presence.get(user_id)
    }

    fn get_assigns(&self, user_id: &UserId) -> Option<StateMap> {
        self.inner.membership.get_assigns(user_id)
    }

    fn member_ids(&self) -> Vec<UserId> {
        self.inner.membership.member_ids()
    }

    fn is_member(&self, user_id: &UserId) -> bool {
        self.inner.membership.is_member(user_id)
    }

    async fn broadcast(&self, mut event: ChannelEvent) -> AppResult<()> {
        let request_id = event
            .request_id
            .clone()
            .unwrap_or_else(RequestId::generate);
        event.request_id = Some(request_id.clone());

        self.inner.record_broadcast(request_id);
        self.inner.publisher.publish(&event);
        self.inner.client.publish_channel_message(&event).await
    }

    async fn close(&self, reason: &str) -> AppResult<()> {
        self.inner.close_now(reason);
        Ok(())
    }
}
