//! The per-instance cluster coordinator.
//!
//! One coordinator runs per process. It registers the instance heartbeat,
//! refreshes it on an interval, sweeps state left behind by dead
//! instances, and fans Redis pub/sub traffic out to in-process
//! subscribers topic by topic.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use redis::Script;
use redis::aio::ConnectionManager;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use wavehub_core::config::cluster::ClusterConfig;
use wavehub_core::error::{AppError, ErrorKind};
use wavehub_core::result::AppResult;
use wavehub_core::types::{ChannelId, EndpointId, InstanceId, StateCache, StateMap, UserId};

use crate::connection::RedisHandle;
use crate::keys::{self, StateKind};
use crate::messages::{StateChangeMessage, state_topic, topics};
use crate::scripts;

/// In-process buffer per pub/sub topic.
const TOPIC_BUFFER: usize = 256;

/// SCAN batch size.
const SCAN_COUNT: usize = 100;

/// A cleanup sweep deleted orphaned state for this cache; subscribers
/// should re-aggregate and reconcile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEvent {
    /// Which cache was affected.
    pub kind: StateKind,
    /// Endpoint segment of the deleted keys.
    pub endpoint_id: EndpointId,
    /// Channel segment of the deleted keys.
    pub channel_id: ChannelId,
}

/// In-process fan-out of the four shared pub/sub topics.
#[derive(Clone)]
struct TopicRouter {
    presence: broadcast::Sender<String>,
    assigns: broadcast::Sender<String>,
    leaves: broadcast::Sender<String>,
    messages: broadcast::Sender<String>,
}

impl TopicRouter {
    fn new() -> Self {
        Self {
            presence: broadcast::channel(TOPIC_BUFFER).0,
            assigns: broadcast::channel(TOPIC_BUFFER).0,
            leaves: broadcast::channel(TOPIC_BUFFER).0,
            messages: broadcast::channel(TOPIC_BUFFER).0,
        }
    }

    fn sender(&self, topic: &str) -> Option<&broadcast::Sender<String>> {
        match topic {
            topics::PRESENCE_CHANGES => Some(&self.presence),
            topics::ASSIGNS_CHANGES => Some(&self.assigns),
            topics::USER_LEAVES => Some(&self.leaves),
            topics::CHANNEL_MESSAGES => Some(&self.messages),
            _ => None,
        }
    }
}

/// Cluster membership and messaging for one instance.
pub struct ClusterCoordinator {
    instance_id: InstanceId,
    config: ClusterConfig,
    redis: RedisHandle,
    state_write: Script,
    topics: TopicRouter,
    sync_events: broadcast::Sender<SyncEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ClusterCoordinator {
    /// Connects to Redis, registers this instance's heartbeat, and starts
    /// the heartbeat, cleanup, and pub/sub reader loops.
    pub async fn start(config: ClusterConfig) -> AppResult<Arc<Self>> {
        let instance_id = InstanceId::generate();
        let redis = RedisHandle::connect(&config.redis.url).await?;

        let coordinator = Arc::new(Self {
            instance_id: instance_id.clone(),
            config,
            redis,
            state_write: scripts::state_write(),
            topics: TopicRouter::new(),
            sync_events: broadcast::channel(TOPIC_BUFFER).0,
            tasks: Mutex::new(Vec::new()),
        });

        coordinator.refresh_heartbeat().await?;
        info!(instance = %instance_id, "Instance registered in cluster");

        let mut tasks = coordinator.tasks.lock().await;
        tasks.push(tokio::spawn(Self::heartbeat_loop(Arc::clone(&coordinator))));
        tasks.push(tokio::spawn(Self::cleanup_loop(Arc::clone(&coordinator))));
        tasks.push(tokio::spawn(Self::pubsub_loop(Arc::clone(&coordinator))));
        drop(tasks);

        Ok(coordinator)
    }

    /// This instance's id.
    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// How often channel clients should re-aggregate cluster state.
    pub fn sync_interval(&self) -> Duration {
        self.config.sync_interval()
    }

    /// Subscribes to the in-process fan-out of one pub/sub topic.
    pub fn subscribe_topic(&self, topic: &str) -> AppResult<broadcast::Receiver<String>> {
        self.topics
            .sender(topic)
            .map(|sender| sender.subscribe())
            .ok_or_else(|| AppError::internal(format!("Unknown cluster topic '{topic}'")))
    }

    /// Subscribes to cleanup-driven sync notifications.
    pub fn subscribe_sync(&self) -> broadcast::Receiver<SyncEvent> {
        self.sync_events.subscribe()
    }

    /// Writes (or deletes, when `state` is `None`) one user's entry in
    /// this instance's cache and publishes the change, atomically.
    pub async fn write_state(
        &self,
        kind: StateKind,
        endpoint_id: &EndpointId,
        channel_id: &ChannelId,
        user_id: &UserId,
        state: Option<&StateMap>,
    ) -> AppResult<()> {
        let key = kind.cache_key(&self.instance_id, endpoint_id, channel_id);
        let value = match state {
            Some(map) => serde_json::to_string(map)?,
            None => String::new(),
        };
        let payload = serde_json::to_string(&StateChangeMessage {
            user_id: user_id.clone(),
            channel_id: channel_id.clone(),
            endpoint_id: endpoint_id.clone(),
            state: state.cloned(),
        })?;

        let mut conn = self.redis.conn();
        self.state_write
            .key(&key)
            .arg(user_id.as_str())
            .arg(&value)
            .arg(state_topic(kind))
            .arg(&payload)
            .invoke_async::<i64>(&mut conn)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Cache, "Redis state write failed", e))?;
        Ok(())
    }

    /// Publishes a raw payload on a shared topic.
    pub async fn publish(&self, topic: &str, payload: &str) -> AppResult<()> {
        let mut conn = self.redis.conn();
        redis::cmd("PUBLISH")
            .arg(topic)
            .arg(payload)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Cache, "Redis PUBLISH failed", e))?;
        Ok(())
    }

    /// Merged snapshot of one cache for an (endpoint, channel), across
    /// every instance. Instances are visited in sorted key order so the
    /// merge is deterministic.
    pub async fn aggregate_state(
        &self,
        kind: StateKind,
        endpoint_id: &EndpointId,
        channel_id: &ChannelId,
    ) -> AppResult<StateCache> {
        let mut conn = self.redis.conn();
        let mut cache_keys =
            scan_keys(&mut conn, &kind.channel_pattern(endpoint_id, channel_id)).await?;
        cache_keys.sort();

        let mut merged = StateCache::new();
        for key in cache_keys {
            let entries: Vec<(String, String)> = redis::cmd("HGETALL")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(|e| {
                    AppError::with_source(ErrorKind::Cache, "Redis HGETALL failed", e)
                })?;
            for (user, raw) in entries {
                match serde_json::from_str::<StateMap>(&raw) {
                    Ok(state) => {
                        merged.insert(UserId::from(user), state);
                    }
                    Err(e) => {
                        warn!(key = %key, user = %user, error = %e,
                            "Dropping unparseable cache entry");
                    }
                }
            }
        }
        Ok(merged)
    }

    /// Deregisters this instance: stops the background loops, deletes the
    /// heartbeat, and removes every cache key this instance owns. Other
    /// instances converge on their next sync. Redis failures are logged
    /// and swallowed; the process is exiting and the heartbeat TTL plus
    /// the cleanup sweep reclaim anything left behind.
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        drop(tasks);

        let mut conn = self.redis.conn();
        let mut doomed = vec![keys::heartbeat(&self.instance_id)];
        for kind in [StateKind::Presence, StateKind::Assigns] {
            match scan_keys(&mut conn, &kind.instance_pattern(&self.instance_id)).await {
                Ok(found) => doomed.extend(found),
                Err(e) => warn!(instance = %self.instance_id, error = %e,
                    "Deregistration scan failed, leaving keys to the cleanup sweep"),
            }
        }
        if let Err(e) = delete_keys(&mut conn, &doomed).await {
            warn!(instance = %self.instance_id, error = %e,
                "Deregistration delete failed, leaving keys to the cleanup sweep");
            return;
        }

        info!(instance = %self.instance_id, "Instance deregistered from cluster");
    }

    async fn refresh_heartbeat(&self) -> AppResult<()> {
        let mut conn = self.redis.conn();
        redis::cmd("SET")
            .arg(keys::heartbeat(&self.instance_id))
            .arg(Utc::now().to_rfc3339())
            .arg("EX")
            .arg(self.config.heartbeat_ttl().as_secs())
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Cache, "Heartbeat refresh failed", e)
            })?;
        Ok(())
    }

    async fn heartbeat_loop(coordinator: Arc<Self>) {
        let mut ticker = tokio::time::interval(coordinator.config.heartbeat_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = coordinator.refresh_heartbeat().await {
                error!(instance = %coordinator.instance_id, error = %e,
                    "Heartbeat refresh failed");
            }
        }
    }

    async fn cleanup_loop(coordinator: Arc<Self>) {
        let mut ticker = tokio::time::interval(coordinator.config.cleanup_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = coordinator.run_cleanup().await {
                error!(instance = %coordinator.instance_id, error = %e,
                    "Cluster cleanup sweep failed");
            }
        }
    }

    /// One cleanup sweep: delete cache keys whose owning instance has no
    /// live heartbeat, then notify subscribers of the affected caches.
    async fn run_cleanup(&self) -> AppResult<()> {
        let mut conn = self.redis.conn();

        let live: HashSet<InstanceId> = scan_keys(&mut conn, keys::HEARTBEAT_PATTERN)
            .await?
            .iter()
            .filter_map(|key| keys::heartbeat_instance(key))
            .collect();

        let mut cache_keys = Vec::new();
        for kind in [StateKind::Presence, StateKind::Assigns] {
            cache_keys.extend(scan_keys(&mut conn, &kind.all_pattern()).await?);
        }

        // An instance is an orphan precisely because its heartbeat key has
        // expired, so only its cache keys remain to delete.
        let orphans = orphan_keys(&cache_keys, &live);
        if orphans.is_empty() {
            return Ok(());
        }

        info!(count = orphans.len(), "Removing state of dead instances");
        delete_keys(&mut conn, &orphans).await?;

        for event in affected_caches(&orphans) {
            debug!(endpoint = %event.endpoint_id, channel = %event.channel_id,
                "Notifying state sync after cleanup");
            // Errors only mean nobody is subscribed right now.
            let _ = self.sync_events.send(event);
        }
        Ok(())
    }

    /// Dedicated pub/sub connection feeding the in-process topic routers.
    /// Reconnects with a short backoff if the connection drops.
    async fn pubsub_loop(coordinator: Arc<Self>) {
        loop {
            match coordinator.read_pubsub().await {
                Ok(()) => warn!("Redis pub/sub stream ended, reconnecting"),
                Err(e) => error!(error = %e, "Redis pub/sub connection failed, reconnecting"),
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    async fn read_pubsub(&self) -> AppResult<()> {
        let client = redis::Client::open(self.redis.url()).map_err(|e| {
            AppError::with_source(ErrorKind::Cache, "Failed to create Redis client", e)
        })?;
        let mut pubsub = client.get_async_pubsub().await.map_err(|e| {
            AppError::with_source(ErrorKind::Cache, "Failed to open pub/sub connection", e)
        })?;

        for topic in [
            topics::PRESENCE_CHANGES,
            topics::ASSIGNS_CHANGES,
            topics::USER_LEAVES,
            topics::CHANNEL_MESSAGES,
        ] {
            pubsub.subscribe(topic).await.map_err(|e| {
                AppError::with_source(
                    ErrorKind::Cache,
                    format!("Failed to subscribe to '{topic}'"),
                    e,
                )
            })?;
        }
        debug!(instance = %self.instance_id, "Subscribed to cluster topics");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let topic = msg.get_channel_name().to_string();
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(topic = %topic, error = %e, "Dropping undecodable pub/sub message");
                    continue;
                }
            };
            if let Some(sender) = self.topics.sender(&topic) {
                // Errors only mean nobody is subscribed right now.
                let _ = sender.send(payload);
            }
        }
        Ok(())
    }
}

/// Cache keys whose owning instance is not in the live set.
fn orphan_keys(cache_keys: &[String], live: &HashSet<InstanceId>) -> Vec<String> {
    cache_keys
        .iter()
        .filter(|key| {
            keys::parse_cache_key(key)
                .map(|parts| !live.contains(&parts.instance_id))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

/// The distinct (kind, endpoint, channel) caches a set of deleted keys
/// belonged to.
fn affected_caches(orphans: &[String]) -> Vec<SyncEvent> {
    let mut seen = HashSet::new();
    let mut events = Vec::new();
    for key in orphans {
        if let Some(parts) = keys::parse_cache_key(key) {
            let event = SyncEvent {
                kind: parts.kind,
                endpoint_id: parts.endpoint_id,
                channel_id: parts.channel_id,
            };
            if seen.insert((event.kind, event.endpoint_id.clone(), event.channel_id.clone())) {
                events.push(event);
            }
        }
    }
    events
}

async fn scan_keys(conn: &mut ConnectionManager, pattern: &str) -> AppResult<Vec<String>> {
    let mut found = Vec::new();
    let mut cursor: u64 = 0;
    loop {
        let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(SCAN_COUNT)
            .query_async(conn)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Cache, "Redis SCAN failed", e))?;
        found.extend(batch);
        cursor = next;
        if cursor == 0 {
            break;
        }
    }
    Ok(found)
}

async fn delete_keys(conn: &mut ConnectionManager, doomed: &[String]) -> AppResult<()> {
    if doomed.is_empty() {
        return Ok(());
    }
    let mut cmd = redis::cmd("DEL");
    for key in doomed {
        cmd.arg(key);
    }
    cmd.query_async::<i64>(conn)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Cache, "Redis DEL failed", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live(ids: &[&str]) -> HashSet<InstanceId> {
        ids.iter().map(|id| InstanceId::from(*id)).collect()
    }

    #[test]
    fn test_orphan_keys_diffs_against_heartbeats() {
        let cache_keys = vec![
            "presence_cache:inst-1:chat:room:1".to_string(),
            "presence_cache:inst-2:chat:room:1".to_string(),
            "assigns_cache:inst-2:chat:room:2".to_string(),
        ];
        let orphans = orphan_keys(&cache_keys, &live(&["inst-1"]));
        assert_eq!(
            orphans,
            vec![
                "presence_cache:inst-2:chat:room:1".to_string(),
                "assigns_cache:inst-2:chat:room:2".to_string(),
            ]
        );
    }

    #[test]
    fn test_orphan_keys_ignores_foreign_keys() {
        let cache_keys = vec!["other:inst-9:x".to_string()];
        assert!(orphan_keys(&cache_keys, &live(&[])).is_empty());
    }

    #[test]
    fn test_affected_caches_dedups_pairs() {
        let orphans = vec![
            "presence_cache:inst-2:chat:room:1".to_string(),
            "presence_cache:inst-3:chat:room:1".to_string(),
            "assigns_cache:inst-2:chat:room:1".to_string(),
        ];
        let events = affected_caches(&orphans);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, StateKind::Presence);
        assert_eq!(events[1].kind, StateKind::Assigns);
        assert_eq!(events[0].channel_id.as_str(), "room:1");
    }
}
