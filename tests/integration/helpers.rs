//! Shared fixtures: per-user event inboxes and an in-memory cluster fake.
//!
//! The fake mirrors the Redis coordinator's contract but delivers
//! everything synchronously, so distributed scenarios need no polling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use wavehub_core::result::AppResult;
use wavehub_core::types::{ChannelId, EndpointId, StateCache, StateMap, UserId};
use wavehub_engine::ChannelEvent;
use wavehub_engine::manager::{
    ClientFactory, ClusterClient, ClusterSubscription, RemoteLeaveHandler, RemoteMessageHandler,
    RemoteStateEvent, RemoteStateHandler,
};
use wavehub_engine::pubsub::EventCallback;

/// Builds a state map from a JSON object literal.
pub fn state(value: serde_json::Value) -> StateMap {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Records every envelope delivered to one user.
#[derive(Clone, Default)]
pub struct Inbox {
    events: Arc<Mutex<Vec<ChannelEvent>>>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> EventCallback {
        let events = Arc::clone(&self.events);
        Arc::new(move |event| {
            events.lock().unwrap().push(event.clone());
        })
    }

    pub fn events(&self) -> Vec<ChannelEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.event).collect()
    }

    pub fn count(&self, event_name: &str) -> usize {
        self.events().iter().filter(|e| e.event == event_name).count()
    }
}

type CacheKey = (EndpointId, ChannelId);

/// Shared state of the in-memory cluster: per-(endpoint, channel) merged
/// caches plus subscriber lists per topic.
#[derive(Default)]
pub struct MemoryHub {
    presence: Mutex<HashMap<CacheKey, StateCache>>,
    assigns: Mutex<HashMap<CacheKey, StateCache>>,
    presence_subs: Mutex<HashMap<CacheKey, Vec<RemoteStateHandler>>>,
    assigns_subs: Mutex<HashMap<CacheKey, Vec<RemoteStateHandler>>>,
    leave_subs: Mutex<HashMap<CacheKey, Vec<RemoteLeaveHandler>>>,
    message_subs: Mutex<HashMap<CacheKey, Vec<RemoteMessageHandler>>>,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn write(
        cache: &Mutex<HashMap<CacheKey, StateCache>>,
        key: &CacheKey,
        user_id: &UserId,
        state: Option<&StateMap>,
    ) {
        let mut cache = cache.lock().unwrap();
        let entry = cache.entry(key.clone()).or_default();
        match state {
            Some(map) => {
                entry.insert(user_id.clone(), map.clone());
            }
            None => {
                entry.shift_remove(user_id);
            }
        }
    }

    fn state_handlers(
        subs: &Mutex<HashMap<CacheKey, Vec<RemoteStateHandler>>>,
        key: &CacheKey,
    ) -> Vec<RemoteStateHandler> {
        subs.lock().unwrap().get(key).cloned().unwrap_or_default()
    }

    /// Writes presence state without notifying subscribers, standing in
    /// for an instance whose change publish this process never received.
    pub fn seed_presence(
        &self,
        endpoint_id: &EndpointId,
        channel_id: &ChannelId,
        user_id: &UserId,
        state: &StateMap,
    ) {
        let key = (endpoint_id.clone(), channel_id.clone());
        Self::write(&self.presence, &key, user_id, Some(state));
    }

    /// Delivers the current merged presence snapshot to every subscriber,
    /// the way the coordinator's state sync does on attach and on its
    /// interval.
    pub fn sync_presence(&self, endpoint_id: &EndpointId, channel_id: &ChannelId) {
        let key = (endpoint_id.clone(), channel_id.clone());
        let snapshot = self
            .presence
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_default();
        for handler in Self::state_handlers(&self.presence_subs, &key) {
            handler(RemoteStateEvent::Synced {
                snapshot: snapshot.clone(),
            });
        }
    }
}

/// One fake cluster handle, scoped to an (endpoint, channel) like the
/// Redis-backed client.
pub struct MemoryClient {
    hub: Arc<MemoryHub>,
    endpoint_id: EndpointId,
    channel_id: ChannelId,
}

impl MemoryClient {
    fn key(&self) -> CacheKey {
        (self.endpoint_id.clone(), self.channel_id.clone())
    }
}

#[async_trait]
impl ClusterClient for MemoryClient {
    fn endpoint_id(&self) -> &EndpointId {
        &self.endpoint_id
    }

    fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    async fn get_presence_cache(&self) -> AppResult<StateCache> {
        Ok(self
            .hub
            .presence
            .lock()
            .unwrap()
            .get(&self.key())
            .cloned()
            .unwrap_or_default())
    }

    async fn get_assigns_cache(&self) -> AppResult<StateCache> {
        Ok(self
            .hub
            .assigns
            .lock()
            .unwrap()
            .get(&self.key())
            .cloned()
            .unwrap_or_default())
    }

    async fn publish_presence_change(
        &self,
        user_id: &UserId,
        state: Option<&StateMap>,
    ) -> AppResult<()> {
        let key = self.key();
        MemoryHub::write(&self.hub.presence, &key, user_id, state);
        for handler in MemoryHub::state_handlers(&self.hub.presence_subs, &key) {
            handler(RemoteStateEvent::Changed {
                user_id: user_id.clone(),
                state: state.cloned(),
            });
        }
        Ok(())
    }

    async fn publish_assigns_change(
        &self,
        user_id: &UserId,
        state: Option<&StateMap>,
    ) -> AppResult<()> {
        let key = self.key();
        MemoryHub::write(&self.hub.assigns, &key, user_id, state);
        for handler in MemoryHub::state_handlers(&self.hub.assigns_subs, &key) {
            handler(RemoteStateEvent::Changed {
                user_id: user_id.clone(),
                state: state.cloned(),
            });
        }
        Ok(())
    }

    async fn publish_user_leave(&self, user_id: &UserId) -> AppResult<()> {
        let handlers = self
            .hub
            .leave_subs
            .lock()
            .unwrap()
            .get(&self.key())
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            handler(user_id.clone());
        }
        Ok(())
    }

    async fn publish_channel_message(&self, event: &ChannelEvent) -> AppResult<()> {
        let handlers = self
            .hub
            .message_subs
            .lock()
            .unwrap()
            .get(&self.key())
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            handler(event.clone());
        }
        Ok(())
    }

    async fn subscribe_presence_changes(
        &self,
        handler: RemoteStateHandler,
    ) -> AppResult<ClusterSubscription> {
        self.hub
            .presence_subs
            .lock()
            .unwrap()
            .entry(self.key())
            .or_default()
            .push(handler);
        Ok(ClusterSubscription::new(Vec::new()))
    }

    async fn subscribe_assigns_changes(
        &self,
        handler: RemoteStateHandler,
    ) -> AppResult<ClusterSubscription> {
        self.hub
            .assigns_subs
            .lock()
            .unwrap()
            .entry(self.key())
            .or_default()
            .push(handler);
        Ok(ClusterSubscription::new(Vec::new()))
    }

    async fn subscribe_user_leaves(
        &self,
        handler: RemoteLeaveHandler,
    ) -> AppResult<ClusterSubscription> {
        self.hub
            .leave_subs
            .lock()
            .unwrap()
            .entry(self.key())
            .or_default()
            .push(handler);
        Ok(ClusterSubscription::new(Vec::new()))
    }

    async fn subscribe_channel_messages(
        &self,
        handler: RemoteMessageHandler,
    ) -> AppResult<ClusterSubscription> {
        self.hub
            .message_subs
            .lock()
            .unwrap()
            .entry(self.key())
            .or_default()
            .push(handler);
        Ok(ClusterSubscription::new(Vec::new()))
    }
}

/// Builds [`MemoryClient`]s against a shared hub, standing in for the
/// Redis-backed factory.
pub struct MemoryClientFactory {
    hub: Arc<MemoryHub>,
    endpoint_id: EndpointId,
}

impl MemoryClientFactory {
    pub fn new(hub: Arc<MemoryHub>, endpoint_id: EndpointId) -> Self {
        Self { hub, endpoint_id }
    }
}

impl ClientFactory for MemoryClientFactory {
    fn create(&self, channel_id: &ChannelId) -> Arc<dyn ClusterClient> {
        Arc::new(MemoryClient {
            hub: Arc::clone(&self.hub),
            endpoint_id: self.endpoint_id.clone(),
            channel_id: channel_id.clone(),
        })
    }
}
