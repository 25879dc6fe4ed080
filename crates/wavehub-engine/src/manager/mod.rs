//! State managers — the pluggable persistence/fan-out layer behind a
//! channel.
//!
//! A [`StateManager`] owns the assigns/presence caches and user
//! subscriptions for one channel. [`local::LocalManager`] keeps
//! everything in-process; [`distributed::DistributedManager`] delegates
//! persistence and cross-instance fan-out to a [`ClusterClient`]
//! implemented by the cluster crate.

pub mod distributed;
pub mod factory;
pub mod local;
pub mod membership;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use wavehub_core::result::AppResult;
use wavehub_core::types::{ChannelId, EndpointId, StateCache, StateMap, UserId};

use crate::message::envelope::ChannelEvent;
use crate::pubsub::EventCallback;

pub use factory::ManagerFactory;

/// Hook invoked exactly once when a manager closes, so the owning lobby
/// can drop the channel by id (no back-pointers).
pub type CloseHook = Arc<dyn Fn(&ChannelId) + Send + Sync>;

/// Snapshot of a member captured at removal time, handed to the leave
/// callback.
#[derive(Debug, Clone)]
pub struct LeaveSnapshot {
    /// The removed member.
    pub user_id: UserId,
    /// The member's assigns at removal time.
    pub assigns: StateMap,
    /// The member's presence at removal time, if tracked.
    pub presence: Option<StateMap>,
}

/// Owns assigns/presence caches and user subscriptions for one channel.
///
/// Invariant: a user id has an assigns entry iff it is a channel member; a
/// presence entry is optional and only valid while the assigns entry
/// exists.
#[async_trait]
pub trait StateManager: Send + Sync {
    /// The channel this manager belongs to.
    fn channel_id(&self) -> &ChannelId;

    /// Prepares the manager (hydration, cluster subscriptions) and stores
    /// the close hook. Must complete before the manager is used.
    async fn initialize(&self, on_close: CloseHook) -> AppResult<()>;

    /// Caches `assigns` for the user (conflict if already a member) and
    /// subscribes `on_message` filtered to envelopes addressed to them.
    async fn add_user(
        &self,
        user_id: &UserId,
        assigns: StateMap,
        on_message: EventCallback,
    ) -> AppResult<()>;

    /// Removes a member, best-effort: presence, then assigns, then the
    /// subscription, swallowing internal errors so disconnect cleanup can
    /// never get stuck. Closes the manager when the member set empties.
    async fn remove_user(&self, user_id: &UserId) -> AppResult<LeaveSnapshot>;

    /// Replaces a member's assigns.
    async fn update_assigns(&self, user_id: &UserId, assigns: StateMap) -> AppResult<()>;

    /// Creates a presence entry (conflict if tracked).
    async fn track_presence(&self, user_id: &UserId, state: StateMap) -> AppResult<()>;

    /// Replaces a presence entry (not-found if untracked).
    async fn update_presence(&self, user_id: &UserId, state: StateMap) -> AppResult<()>;

    /// Removes a presence entry. With `safe`, removal of a missing entry
    /// is a no-op.
    async fn remove_presence(&self, user_id: &UserId, safe: bool) -> AppResult<()>;

    /// Updates a presence entry if tracked, tracks it otherwise.
    async fn upsert_presence(&self, user_id: &UserId, state: StateMap) -> AppResult<()>;

    /// Current presence value of a user.
    fn get_presence(&self, user_id: &UserId) -> Option<StateMap>;

    /// Current assigns of a member.
    fn get_assigns(&self, user_id: &UserId) -> Option<StateMap>;

    /// Ids of every channel member (the assigns key set).
    fn member_ids(&self) -> Vec<UserId>;

    /// Whether a user is a channel member.
    fn is_member(&self, user_id: &UserId) -> bool;

    /// Publishes an envelope to the channel's subscribers (cluster-wide in
    /// distributed mode).
    async fn broadcast(&self, event: ChannelEvent) -> AppResult<()>;

    /// Clears all state, tears down subscriptions, and fires the close
    /// hook once.
    async fn close(&self, reason: &str) -> AppResult<()>;
}

/// A change to one user's presence or assigns received from the cluster.
#[derive(Debug, Clone)]
pub enum RemoteStateEvent {
    /// A single user's state was written (`Some`) or deleted (`None`).
    Changed {
        /// The affected user.
        user_id: UserId,
        /// The new state, or `None` on deletion.
        state: Option<StateMap>,
    },
    /// A full merged snapshot, delivered on state sync.
    Synced {
        /// Merged state of every live instance.
        snapshot: StateCache,
    },
}

/// Handler for remote presence/assigns events.
pub type RemoteStateHandler = Arc<dyn Fn(RemoteStateEvent) + Send + Sync>;

/// Handler for remote user-leave notifications.
pub type RemoteLeaveHandler = Arc<dyn Fn(UserId) + Send + Sync>;

/// Handler for remote channel-message envelopes.
pub type RemoteMessageHandler = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

/// Handle to one cluster topic subscription. Aborts its delivery tasks on
/// close (or drop).
pub struct ClusterSubscription {
    handles: Vec<JoinHandle<()>>,
}

impl ClusterSubscription {
    /// Creates a subscription handle owning the given delivery tasks.
    pub fn new(handles: Vec<JoinHandle<()>>) -> Self {
        Self { handles }
    }

    /// Stops delivery.
    pub fn close(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for ClusterSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// Per-(endpoint, channel) handle into the cluster coordinator.
///
/// Every `publish_*` method both persists the change in the
/// instance-scoped cache and publishes it cluster-wide, atomically.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// The endpoint this client is scoped to.
    fn endpoint_id(&self) -> &EndpointId;

    /// The channel this client is scoped to.
    fn channel_id(&self) -> &ChannelId;

    /// Merged presence snapshot across all live instances.
    async fn get_presence_cache(&self) -> AppResult<StateCache>;

    /// Merged assigns snapshot across all live instances.
    async fn get_assigns_cache(&self) -> AppResult<StateCache>;

    /// Persists and publishes a presence change (`None` deletes).
    async fn publish_presence_change(
        &self,
        user_id: &UserId,
        state: Option<&StateMap>,
    ) -> AppResult<()>;

    /// Persists and publishes an assigns change (`None` deletes).
    async fn publish_assigns_change(
        &self,
        user_id: &UserId,
        state: Option<&StateMap>,
    ) -> AppResult<()>;

    /// Publishes a user-leave notification.
    async fn publish_user_leave(&self, user_id: &UserId) -> AppResult<()>;

    /// Publishes a full event envelope to every instance.
    async fn publish_channel_message(&self, event: &ChannelEvent) -> AppResult<()>;

    /// Subscribes to presence changes for this (endpoint, channel),
    /// including state-sync snapshots.
    async fn subscribe_presence_changes(
        &self,
        handler: RemoteStateHandler,
    ) -> AppResult<ClusterSubscription>;

    /// Subscribes to assigns changes for this (endpoint, channel),
    /// including state-sync snapshots.
    async fn subscribe_assigns_changes(
        &self,
        handler: RemoteStateHandler,
    ) -> AppResult<ClusterSubscription>;

    /// Subscribes to user-leave notifications for this (endpoint, channel).
    async fn subscribe_user_leaves(
        &self,
        handler: RemoteLeaveHandler,
    ) -> AppResult<ClusterSubscription>;

    /// Subscribes to channel-message envelopes for this (endpoint, channel).
    async fn subscribe_channel_messages(
        &self,
        handler: RemoteMessageHandler,
    ) -> AppResult<ClusterSubscription>;
}

/// Builds a [`ClusterClient`] per channel. Supplying a factory to the
/// [`factory::ManagerFactory`] is what selects distributed mode.
pub trait ClientFactory: Send + Sync {
    /// Creates a client handle scoped to `channel_id`.
    fn create(&self, channel_id: &ChannelId) -> Arc<dyn ClusterClient>;
}
