//! Single-process state manager with in-memory fan-out.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::debug;

use wavehub_core::result::AppResult;
use wavehub_core::types::{ChannelId, StateMap, UserId};

use crate::message::envelope::ChannelEvent;
use crate::presence::{PresenceDiff, PresenceEngine};
use crate::pubsub::{ChannelPublisher, EventCallback};

use super::membership::MembershipTable;
use super::{CloseHook, LeaveSnapshot, StateManager};

/// In-process state manager: no persistence, fan-out through the local
/// publisher only.
pub struct LocalManager {
    channel_id: ChannelId,
    membership: MembershipTable,
    presence: PresenceEngine,
    publisher: ChannelPublisher,
    on_close: Mutex<Option<CloseHook>>,
    closed: AtomicBool,
}

impl LocalManager {
    /// Creates a manager for one channel.
    pub fn new(channel_id: ChannelId) -> Self {
        Self {
            membership: MembershipTable::new(channel_id.clone()),
            presence: PresenceEngine::new(channel_id.clone()),
            publisher: ChannelPublisher::new(),
            channel_id,
            on_close: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn emit_presence(&self, diff: &PresenceDiff) {
        let event = ChannelEvent::presence(&self.channel_id, diff);
        self.publisher.publish(&event);
    }
}

#[async_trait]
impl StateManager for LocalManager {
    fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    async fn initialize(&self, on_close: CloseHook) -> AppResult<()> {
        *self.on_close.lock().expect("close hook lock poisoned") = Some(on_close);
        Ok(())
    }

    async fn add_user(
        &self,
        user_id: &UserId,
        assigns: StateMap,
        on_message: EventCallback,
    ) -> AppResult<()> {
        self.membership.set_assigns(user_id, assigns)?;
        let token = self.publisher.subscribe_user(user_id.clone(), on_message);
        self.membership.store_token(user_id, token);
        Ok(())
    }

    async fn remove_user(&self, user_id: &UserId) -> AppResult<LeaveSnapshot> {
        let snapshot = LeaveSnapshot {
            user_id: user_id.clone(),
            assigns: self.membership.get_assigns(user_id).unwrap_or_default(),
            presence: self.presence.get(user_id),
        };

        // Best-effort teardown; removal must always complete.
        if let Ok(Some(diff)) = self.presence.remove(user_id, true) {
            self.emit_presence(&diff);
        }
        self.membership.remove_assigns(user_id);
        if let Some(token) = self.membership.take_token(user_id) {
            self.publisher.unsubscribe(token);
        }

        if self.membership.is_empty() {
            self.close("last member left").await?;
        }
        Ok(snapshot)
    }

    async fn update_assigns(&self, user_id: &UserId, assigns: StateMap) -> AppResult<()> {
        self.membership.update_assigns(user_id, assigns)
    }

    async fn track_presence(&self, user_id: &UserId, state: StateMap) -> AppResult<()> {
        let diff = self.presence.track(user_id, state)?;
        self.emit_presence(&diff);
        Ok(())
    }

    async fn update_presence(&self, user_id: &UserId, state: StateMap) -> AppResult<()> {
        let diff = self.presence.update(user_id, state)?;
        self.emit_presence(&diff);
        Ok(())
    }

    async fn remove_presence(&self, user_id: &UserId, safe: bool) -> AppResult<()> {
        if let Some(diff) = self.presence.remove(user_id, safe)? {
            self.emit_presence(&diff);
        }
        Ok(())
    }

    async fn upsert_presence(&self, user_id: &UserId, state: StateMap) -> AppResult<()> {
        let diff = self.presence.upsert(user_id, state)?;
        self.emit_presence(&diff);
        Ok(())
    }

    fn get_presence(&self, user_id: &UserId) -> Option<StateMap> {
        self.presence.get(user_id)
    }

    fn get_assigns(&self, user_id: &UserId) -> Option<StateMap> {
        self.membership.get_assigns(user_id)
    }

    fn member_ids(&self) -> Vec<UserId> {
        self.membership.member_ids()
    }

    fn is_member(&self, user_id: &UserId) -> bool {
        self.membership.is_member(user_id)
    }

    async fn broadcast(&self, event: ChannelEvent) -> AppResult<()> {
        self.publisher.publish(&event);
        Ok(())
    }

    async fn close(&self, reason: &str) -> AppResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(channel = %self.channel_id, reason, "Closing local manager");

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
        Ok(())
    }
}
