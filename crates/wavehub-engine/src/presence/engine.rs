//! Presence tracker — per-channel presence CRUD with event generation.

use std::sync::Mutex;

use wavehub_core::error::{AppError, ErrorKind, PresenceAction};
use wavehub_core::result::AppResult;
use wavehub_core::types::{ChannelId, StateCache, StateMap, UserId};

use crate::message::types::PresenceEventKind;

/// The outcome of one successful presence mutation.
///
/// `recipients` is the presence key set *after* the mutation and
/// `snapshot` holds every tracked value in cache-iteration order. On a
/// removal, `changed` is the last-known value.
#[derive(Debug, Clone)]
pub struct PresenceDiff {
    /// The transition this mutation produced.
    pub kind: PresenceEventKind,
    /// The affected user.
    pub user_id: UserId,
    /// The affected user's new (or last-known) state.
    pub changed: StateMap,
    /// Full presence snapshot after the mutation, in cache order.
    pub snapshot: Vec<StateMap>,
    /// Presence key set after the mutation.
    pub recipients: Vec<UserId>,
}

/// Tracks presence state for one channel.
///
/// Insertion order is preserved because the snapshot array order is
/// observable by clients.
pub struct PresenceEngine {
    channel_id: ChannelId,
    cache: Mutex<StateCache>,
}

impl PresenceEngine {
    /// Creates an empty presence engine for a channel.
    pub fn new(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            cache: Mutex::new(StateCache::new()),
        }
    }

    /// Creates a presence entry. Fails with a conflict if one exists.
    pub fn track(&self, user_id: &UserId, state: StateMap) -> AppResult<PresenceDiff> {
        let mut cache = self.lock();
        if cache.contains_key(user_id) {
            return Err(AppError::presence(
                ErrorKind::Conflict,
                self.channel_id.as_str(),
                PresenceAction::Track,
                format!("Presence for user '{user_id}' is already tracked"),
            ));
        }
        cache.insert(user_id.clone(), state.clone());
        Ok(Self::diff(&cache, PresenceEventKind::Join, user_id, state))
    }

    /// Replaces an existing presence entry. Fails if none exists.
    pub fn update(&self, user_id: &UserId, state: StateMap) -> AppResult<PresenceDiff> {
        let mut cache = self.lock();
        if !cache.contains_key(user_id) {
            return Err(AppError::presence(
                ErrorKind::NotFound,
                self.channel_id.as_str(),
                PresenceAction::Update,
                format!("Presence for user '{user_id}' does not exist"),
            ));
        }
        cache.insert(user_id.clone(), state.clone());
        Ok(Self::diff(&cache, PresenceEventKind::Update, user_id, state))
    }

    /// Removes a presence entry.
    ///
    /// With `safe` set, removing a missing entry is a no-op returning
    /// `Ok(None)`; otherwise it fails with not-found.
    pub fn remove(&self, user_id: &UserId, safe: bool) -> AppResult<Option<PresenceDiff>> {
        let mut cache = self.lock();
        match cache.shift_remove(user_id) {
            Some(last_known) => Ok(Some(Self::diff(
                &cache,
                PresenceEventKind::Leave,
                user_id,
                last_known,
            ))),
            None if safe => Ok(None),
            None => Err(AppError::presence(
                ErrorKind::NotFound,
                self.channel_id.as_str(),
                PresenceAction::Remove,
                format!("Presence for user '{user_id}' does not exist"),
            )),
        }
    }

    /// Updates if tracked, tracks otherwise.
    pub fn upsert(&self, user_id: &UserId, state: StateMap) -> AppResult<PresenceDiff> {
        let mut cache = self.lock();
        let kind = if cache.contains_key(user_id) {
            PresenceEventKind::Update
        } else {
            PresenceEventKind::Join
        };
        cache.insert(user_id.clone(), state.clone());
        Ok(Self::diff(&cache, kind, user_id, state))
    }

    /// Applies a change received from another instance.
    ///
    /// Unlike the local mutations there are no preconditions; the remote
    /// write already happened. Returns `None` when the cache already holds
    /// the incoming value (echo of this instance's own publish, or a
    /// duplicate delivery).
    pub fn apply_remote(&self, user_id: &UserId, state: Option<StateMap>) -> Option<PresenceDiff> {
        let mut cache = self.lock();
        match state {
            Some(state) => {
                let kind = match cache.get(user_id) {
                    Some(current) if *current == state => return None,
                    Some(_) => PresenceEventKind::Update,
                    None => PresenceEventKind::Join,
                };
                cache.insert(user_id.clone(), state.clone());
                Some(Self::diff(&cache, kind, user_id, state))
            }
            None => {
                let last_known = cache.shift_remove(user_id)?;
                Some(Self::diff(
                    &cache,
                    PresenceEventKind::Leave,
                    user_id,
                    last_known,
                ))
            }
        }
    }

    /// Reconciles the cache against a full cluster snapshot, producing one
    /// diff per divergence.
    pub fn reconcile(&self, snapshot: StateCache) -> Vec<PresenceDiff> {
        let mut diffs = Vec::new();
        let mut cache = self.lock();

        let stale: Vec<UserId> = cache
            .keys()
            .filter(|u| !snapshot.contains_key(*u))
            .cloned()
            .collect();
        for user_id in stale {
            if let Some(last_known) = cache.shift_remove(&user_id) {
                diffs.push(Self::diff(
                    &cache,
                    PresenceEventKind::Leave,
                    &user_id,
                    last_known,
                ));
            }
        }

        for (user_id, state) in snapshot {
            let kind = match cache.get(&user_id) {
                Some(current) if *current == state => continue,
                Some(_) => PresenceEventKind::Update,
                None => PresenceEventKind::Join,
            };
            cache.insert(user_id.clone(), state.clone());
            diffs.push(Self::diff(&cache, kind, &user_id, state));
        }

        diffs
    }

    /// Seeds the cache from a merged cluster snapshot without emitting
    /// diffs (initial hydration).
    pub fn hydrate(&self, snapshot: StateCache) {
        let mut cache = self.lock();
        for (user_id, state) in snapshot {
            cache.entry(user_id).or_insert(state);
        }
    }

    /// Current presence value of a user.
    pub fn get(&self, user_id: &UserId) -> Option<StateMap> {
        self.lock().get(user_id).cloned()
    }

    /// Presence key set, in cache order.
    pub fn user_ids(&self) -> Vec<UserId> {
        self.lock().keys().cloned().collect()
    }

    /// Full snapshot of the cache.
    pub fn entries(&self) -> StateCache {
        self.lock().clone()
    }

    /// Number of tracked presence entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drops every presence entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StateCache> {
        self.cache.lock().expect("presence lock poisoned")
    }

    fn diff(
        cache: &StateCache,
        kind: PresenceEventKind,
        user_id: &UserId,
        changed: StateMap,
    ) -> PresenceDiff {
        PresenceDiff {
            kind,
            user_id: user_id.clone(),
            changed,
            snapshot: cache.values().cloned().collect(),
            recipients: cache.keys().cloned().collect(),
        }
    }
}
