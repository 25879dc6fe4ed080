//! The engine-facing cluster client.
//!
//! One [`RedisChannelClient`] serves one (endpoint, channel) pair. Writes
//! go through the coordinator's atomic write-and-publish path; reads
//! aggregate the per-instance caches; subscriptions filter the shared
//! topics down to this pair and feed the distributed manager's handlers.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use wavehub_core::result::AppResult;
use wavehub_core::types::{ChannelId, EndpointId, StateCache, StateMap, UserId};
use wavehub_engine::ChannelEvent;
use wavehub_engine::manager::{
    ClientFactory, ClusterClient, ClusterSubscription, RemoteLeaveHandler, RemoteMessageHandler,
    RemoteStateEvent, RemoteStateHandler,
};

use crate::coordinator::ClusterCoordinator;
use crate::keys::StateKind;
use crate::messages::{
    ChannelMessageEnvelope, StateChangeMessage, UserLeaveMessage, state_topic, topics,
};

/// Cluster handle for one (endpoint, channel).
pub struct RedisChannelClient {
    coordinator: Arc<ClusterCoordinator>,
    endpoint_id: EndpointId,
    channel_id: ChannelId,
}

impl RedisChannelClient {
    /// Creates a client scoped to one channel of one endpoint.
    pub fn new(
        coordinator: Arc<ClusterCoordinator>,
        endpoint_id: EndpointId,
        channel_id: ChannelId,
    ) -> Self {
        Self {
            coordinator,
            endpoint_id,
            channel_id,
        }
    }

    /// Spawns the change-relay and sync tasks for one state kind. The sync
    /// task aggregates once on attach, then on an interval and on cleanup
    /// notifications.
    async fn subscribe_state(
        &self,
        kind: StateKind,
        handler: RemoteStateHandler,
    ) -> AppResult<ClusterSubscription> {
        let mut changes = self.coordinator.subscribe_topic(state_topic(kind))?;
        let endpoint_id = self.endpoint_id.clone();
        let channel_id = self.channel_id.clone();
        let change_handler = Arc::clone(&handler);
        let change_task = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(payload) => {
                        let msg: StateChangeMessage = match serde_json::from_str(&payload) {
                            Ok(msg) => msg,
                            Err(e) => {
                                warn!(error = %e, "Dropping unparseable state change");
                                continue;
                            }
                        };
                        if msg.endpoint_id == endpoint_id && msg.channel_id == channel_id {
                            change_handler(RemoteStateEvent::Changed {
                                user_id: msg.user_id,
                                state: msg.state,
                            });
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "State change subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let coordinator = Arc::clone(&self.coordinator);
        let mut syncs = coordinator.subscribe_sync();
        let endpoint_id = self.endpoint_id.clone();
        let channel_id = self.channel_id.clone();
        let sync_task = tokio::spawn(async move {
            // The interval's first tick completes immediately, so the
            // first aggregation happens on attach.
            let mut ticker = tokio::time::interval(coordinator.sync_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                let due = tokio::select! {
                    _ = ticker.tick() => true,
                    event = syncs.recv() => match event {
                        Ok(event) => {
                            event.kind == kind
                                && event.endpoint_id == endpoint_id
                                && event.channel_id == channel_id
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => true,
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                };
                if !due {
                    continue;
                }
                match coordinator.aggregate_state(kind, &endpoint_id, &channel_id).await {
                    Ok(snapshot) => {
                        debug!(channel = %channel_id, entries = snapshot.len(),
                            "Delivering state sync snapshot");
                        handler(RemoteStateEvent::Synced { snapshot });
                    }
                    Err(e) => warn!(channel = %channel_id, error = %e,
                        "State sync aggregation failed"),
                }
            }
        });

        Ok(ClusterSubscription::new(vec![change_task, sync_task]))
    }
}

#[async_trait]
impl ClusterClient for RedisChannelClient {
    fn endpoint_id(&self) -> &EndpointId {
        &self.endpoint_id
    }

    fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    async fn get_presence_cache(&self) -> AppResult<StateCache> {
        self.coordinator
            .aggregate_state(StateKind::Presence, &self.endpoint_id, &self.channel_id)
            .await
    }

    async fn get_assigns_cache(&self) -> AppResult<StateCache> {
        self.coordinator
            .aggregate_state(StateKind::Assigns, &self.endpoint_id, &self.channel_id)
            .await
    }

    async fn publish_presence_change(
        &self,
        user_id: &UserId,
        state: Option<&StateMap>,
    ) -> AppResult<()> {
        self.coordinator
            .write_state(
                StateKind::Presence,
                &self.endpoint_id,
                &self.channel_id,
                user_id,
                state,
            )
            .await
    }

    async fn publish_assigns_change(
        &self,
        user_id: &UserId,
        state: Option<&StateMap>,
    ) -> AppResult<()> {
        self.coordinator
            .write_state(
                StateKind::Assigns,
                &self.endpoint_id,
                &self.channel_id,
                user_id,
                state,
            )
            .await
    }

    async fn publish_user_leave(&self, user_id: &UserId) -> AppResult<()> {
        let payload = serde_json::to_string(&UserLeaveMessage {
            endpoint_id: self.endpoint_id.clone(),
            channel_id: self.channel_id.clone(),
            user_id: user_id.clone(),
        })?;
        self.coordinator.publish(topics::USER_LEAVES, &payload).await
    }

    async fn publish_channel_message(&self, event: &ChannelEvent) -> AppResult<()> {
        let payload = serde_json::to_string(&ChannelMessageEnvelope {
            endpoint_id: self.endpoint_id.clone(),
            channel_id: self.channel_id.clone(),
            message: event.clone(),
        })?;
        self.coordinator
            .publish(topics::CHANNEL_MESSAGES, &payload)
            .await
    }

    async fn subscribe_presence_changes(
        &self,
        handler: RemoteStateHandler,
    ) -> AppResult<ClusterSubscription> {
        self.subscribe_state(StateKind::Presence, handler).await
    }

    async fn subscribe_assigns_changes(
        &self,
        handler: RemoteStateHandler,
    ) -> AppResult<ClusterSubscription> {
        self.subscribe_state(StateKind::Assigns, handler).await
    }

    async fn subscribe_user_leaves(
        &self,
        handler: RemoteLeaveHandler,
    ) -> AppResult<ClusterSubscription> {
        let mut leaves = self.coordinator.subscribe_topic(topics::USER_LEAVES)?;
        let endpoint_id = self.endpoint_id.clone();
        let channel_id = self.channel_id.clone();
        let task = tokio::spawn(async move {
            loop {
                match leaves.recv().await {
                    Ok(payload) => {
                        let msg: UserLeaveMessage = match serde_json::from_str(&payload) {
                            Ok(msg) => msg,
                            Err(e) => {
                                warn!(error = %e, "Dropping unparseable user leave");
                                continue;
                            }
                        };
                        if msg.endpoint_id == endpoint_id && msg.channel_id == channel_id {
                            handler(msg.user_id);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "User leave subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(ClusterSubscription::new(vec![task]))
    }

    async fn subscribe_channel_messages(
        &self,
        handler: RemoteMessageHandler,
    ) -> AppResult<ClusterSubscription> {
        let mut messages = self.coordinator.subscribe_topic(topics::CHANNEL_MESSAGES)?;
        let endpoint_id = self.endpoint_id.clone();
        let channel_id = self.channel_id.clone();
        let task = tokio::spawn(async move {
            loop {
                match messages.recv().await {
                    Ok(payload) => {
                        let msg: ChannelMessageEnvelope = match serde_json::from_str(&payload) {
                            Ok(msg) => msg,
                            Err(e) => {
                                warn!(error = %e, "Dropping unparseable channel message");
                                continue;
                            }
                        };
                        if msg.endpoint_id == endpoint_id && msg.channel_id == channel_id {
                            handler(msg.message);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Channel message subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(ClusterSubscription::new(vec![task]))
    }
}

/// Builds a [`RedisChannelClient`] per channel for one endpoint.
pub struct RedisClientFactory {
    coordinator: Arc<ClusterCoordinator>,
    endpoint_id: EndpointId,
}

impl RedisClientFactory {
    /// Creates a factory scoped to one endpoint.
    pub fn new(coordinator: Arc<ClusterCoordinator>, endpoint_id: EndpointId) -> Self {
        Self {
            coordinator,
            endpoint_id,
        }
    }
}

impl ClientFactory for RedisClientFactory {
    fn create(&self, channel_id: &ChannelId) -> Arc<dyn ClusterClient> {
        Arc::new(RedisChannelClient::new(
            Arc::clone(&self.coordinator),
            self.endpoint_id.clone(),
            channel_id.clone(),
        ))
    }
}
