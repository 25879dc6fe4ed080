//! Membership bookkeeping shared by both manager variants.
//!
//! A user is a channel member iff it has an assigns entry; the
//! subscription table maps members to their publisher tokens.

use std::collections::HashMap;
use std::sync::Mutex;

use wavehub_core::error::{AppError, ErrorKind};
use wavehub_core::result::AppResult;
use wavehub_core::types::{ChannelId, StateCache, StateMap, UserId};

use crate::pubsub::SubscriptionToken;

/// Assigns cache + subscription table for one channel.
pub struct MembershipTable {
    channel_id: ChannelId,
    assigns: Mutex<StateCache>,
    tokens: Mutex<HashMap<UserId, SubscriptionToken>>,
}

impl MembershipTable {
    /// Creates an empty table for a channel.
    pub fn new(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            assigns: Mutex::new(StateCache::new()),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Creates the assigns entry for a new member. Fails with a conflict
    /// if the user already has one.
    pub fn set_assigns(&self, user_id: &UserId, assigns: StateMap) -> AppResult<()> {
        let mut cache = self.lock_assigns();
        if cache.contains_key(user_id) {
            return Err(AppError::channel(
                ErrorKind::Conflict,
                self.channel_id.as_str(),
                format!("User '{user_id}' already has assigns in this channel"),
            ));
        }
        cache.insert(user_id.clone(), assigns);
        Ok(())
    }

    /// Replaces a member's assigns. Fails if the user is not a member.
    pub fn update_assigns(&self, user_id: &UserId, assigns: StateMap) -> AppResult<()> {
        let mut cache = self.lock_assigns();
        if !cache.contains_key(user_id) {
            return Err(AppError::channel(
                ErrorKind::NotFound,
                self.channel_id.as_str(),
                format!("User '{user_id}' is not a member of this channel"),
            ));
        }
        cache.insert(user_id.clone(), assigns);
        Ok(())
    }

    /// Applies an assigns change received from another instance; no
    /// preconditions.
    pub fn apply_remote(&self, user_id: &UserId, state: Option<StateMap>) {
        let mut cache = self.lock_assigns();
        match state {
            Some(state) => {
                cache.insert(user_id.clone(), state);
            }
            None => {
                cache.shift_remove(user_id);
            }
        }
    }

    /// Removes a member's assigns entry, returning the last value.
    pub fn remove_assigns(&self, user_id: &UserId) -> Option<StateMap> {
        self.lock_assigns().shift_remove(user_id)
    }

    /// Current assigns of a member.
    pub fn get_assigns(&self, user_id: &UserId) -> Option<StateMap> {
        self.lock_assigns().get(user_id).cloned()
    }

    /// Whether a user is a member.
    pub fn is_member(&self, user_id: &UserId) -> bool {
        self.lock_assigns().contains_key(user_id)
    }

    /// Every member id, in join order.
    pub fn member_ids(&self) -> Vec<UserId> {
        self.lock_assigns().keys().cloned().collect()
    }

    /// Whether the channel has no members.
    pub fn is_empty(&self) -> bool {
        self.lock_assigns().is_empty()
    }

    /// Seeds the assigns cache from a merged cluster snapshot without
    /// overwriting local entries.
    pub fn hydrate(&self, snapshot: StateCache) {
        let mut cache = self.lock_assigns();
        for (user_id, state) in snapshot {
            cache.entry(user_id).or_insert(state);
        }
    }

    /// Reconciles the assigns cache against a full cluster snapshot.
    ///
    /// Entries absent from the snapshot are dropped unless the user is
    /// subscribed on this instance (a local join whose cluster write is
    /// still in flight).
    pub fn reconcile(&self, snapshot: StateCache) {
        let tokens = self.lock_tokens();
        let mut cache = self.lock_assigns();
        cache.retain(|user_id, _| snapshot.contains_key(user_id) || tokens.contains_key(user_id));
        drop(tokens);
        for (user_id, state) in snapshot {
            cache.insert(user_id, state);
        }
    }

    /// Records a member's subscription token.
    pub fn store_token(&self, user_id: &UserId, token: SubscriptionToken) {
        self.lock_tokens().insert(user_id.clone(), token);
    }

    /// Removes and returns a member's subscription token.
    pub fn take_token(&self, user_id: &UserId) -> Option<SubscriptionToken> {
        self.lock_tokens().remove(user_id)
    }

    /// Drops all state.
    pub fn clear(&self) {
        self.lock_assigns().clear();
        self.lock_tokens().clear();
    }

    fn lock_assigns(&self) -> std::sync::MutexGuard<'_, StateCache> {
        self.assigns.lock().expect("assigns lock poisoned")
    }

    fn lock_tokens(&self) -> std::sync::MutexGuard<'_, HashMap<UserId, SubscriptionToken>> {
        self.tokens.lock().expect("tokens lock poisoned")
    }
}
