//! The lobby: channel lifecycle and join routing.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use wavehub_core::result::AppResult;
use wavehub_core::types::{ChannelId, StateMap, UserId};

use crate::manager::{CloseHook, LeaveSnapshot, ManagerFactory};
use crate::middleware::{BroadcastMiddleware, PassthroughMiddleware};
use crate::pubsub::EventCallback;

use super::engine::{ChannelEngine, EngineHooks};

/// A user's membership in one channel, handed out by [`LobbyEngine::join`].
pub struct ChannelMembership {
    channel: Arc<ChannelEngine>,
    user_id: UserId,
}

impl std::fmt::Debug for ChannelMembership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelMembership")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl ChannelMembership {
    /// The channel this membership belongs to.
    pub fn channel(&self) -> &Arc<ChannelEngine> {
        &self.channel
    }

    /// The member's id.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Leaves the channel, consuming the membership.
    pub async fn leave(self) -> AppResult<LeaveSnapshot> {
        self.channel.remove_user(&self.user_id).await
    }
}

/// Owns every live channel: channels are created on first join and dropped
/// when their manager closes (last member gone or explicit destroy).
pub struct LobbyEngine {
    channels: Arc<DashMap<ChannelId, Arc<ChannelEngine>>>,
    factory: ManagerFactory,
    middleware: Arc<dyn BroadcastMiddleware>,
    hooks: Arc<EngineHooks>,
    // Serializes channel creation so two concurrent first joins cannot
    // both build a manager for the same channel.
    create_lock: Mutex<()>,
}

impl LobbyEngine {
    /// Creates a lobby with the default passthrough middleware.
    pub fn new(factory: ManagerFactory) -> Self {
        Self::with_middleware(factory, Arc::new(PassthroughMiddleware))
    }

    /// Creates a lobby with an explicit middleware chain.
    pub fn with_middleware(
        factory: ManagerFactory,
        middleware: Arc<dyn BroadcastMiddleware>,
    ) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            factory,
            middleware,
            hooks: Arc::new(EngineHooks::default()),
            create_lock: Mutex::new(()),
        }
    }

    /// Hooks applied to every channel of this lobby.
    pub fn hooks(&self) -> &Arc<EngineHooks> {
        &self.hooks
    }

    /// Adds `user_id` to `channel_id`, creating the channel on first join.
    pub async fn join(
        &self,
        channel_id: &ChannelId,
        user_id: &UserId,
        assigns: StateMap,
        on_message: EventCallback,
    ) -> AppResult<ChannelMembership> {
        let channel = self.get_or_create(channel_id).await?;
        channel.add_user(user_id, assigns, on_message).await?;
        info!(channel = %channel_id, user = %user_id, "User joined channel");
        Ok(ChannelMembership {
            channel,
            user_id: user_id.clone(),
        })
    }

    /// Looks up a live channel.
    pub fn channel(&self, channel_id: &ChannelId) -> Option<Arc<ChannelEngine>> {
        self.channels.get(channel_id).map(|entry| Arc::clone(&entry))
    }

    /// Ids of every live channel.
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.channels.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of live channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether no channels are live.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Destroys a channel, notifying its members first.
    pub async fn destroy_channel(&self, channel_id: &ChannelId, reason: &str) -> AppResult<()> {
        if let Some(channel) = self.channel(channel_id) {
            channel.destroy(reason).await?;
        }
        Ok(())
    }

    async fn get_or_create(&self, channel_id: &ChannelId) -> AppResult<Arc<ChannelEngine>> {
        if let Some(channel) = self.channel(channel_id) {
            return Ok(channel);
        }

        let _guard = self.create_lock.lock().await;
        // A concurrent join may have created it while we waited.
        if let Some(channel) = self.channel(channel_id) {
            return Ok(channel);
        }

        debug!(channel = %channel_id, "Creating channel");
        let manager = self
            .factory
            .create(channel_id, self.close_hook())
            .await?;
        let channel = Arc::new(ChannelEngine::new(
            channel_id.clone(),
            manager,
            Arc::clone(&self.middleware),
            Arc::clone(&self.hooks),
        ));
        self.channels.insert(channel_id.clone(), Arc::clone(&channel));
        Ok(channel)
    }

    fn close_hook(&self) -> CloseHook {
        let channels = Arc::clone(&self.channels);
        Arc::new(move |channel_id: &ChannelId| {
            if channels.remove(channel_id).is_some() {
                debug!(channel = %channel_id, "Channel closed, removed from lobby");
            }
        })
    }
}
