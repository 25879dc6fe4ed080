//! Per-channel façade over a state manager.

use std::sync::{Arc, RwLock};

use tracing::debug;

use wavehub_core::error::{AppError, ErrorKind};
use wavehub_core::result::AppResult;
use wavehub_core::types::{ChannelId, RequestId, StateMap, UserId};

use crate::manager::{LeaveSnapshot, StateManager};
use crate::message::envelope::ChannelEvent;
use crate::message::types::{events, MessageAction};
use crate::middleware::{BroadcastEvent, BroadcastMiddleware, NextFn};
use crate::pubsub::EventCallback;

use super::types::{ClientMessage, RecipientSpec, Sender};

/// Hook invoked after a member is removed, with the captured snapshot.
pub type LeaveCallback = Arc<dyn Fn(&ChannelId, &LeaveSnapshot) + Send + Sync>;

/// Hook applied to every envelope right before per-user delivery.
pub type OutgoingTransform = Arc<dyn Fn(ChannelEvent) -> ChannelEvent + Send + Sync>;

/// Hooks shared by every channel of one lobby.
#[derive(Default)]
pub struct EngineHooks {
    leave_callback: RwLock<Option<LeaveCallback>>,
    outgoing_transform: RwLock<Option<OutgoingTransform>>,
}

impl EngineHooks {
    /// Sets the leave callback.
    pub fn set_leave_callback(&self, callback: LeaveCallback) {
        *self
            .leave_callback
            .write()
            .expect("hooks lock poisoned") = Some(callback);
    }

    /// Sets the outgoing-event transform.
    pub fn set_outgoing_transform(&self, transform: OutgoingTransform) {
        *self
            .outgoing_transform
            .write()
            .expect("hooks lock poisoned") = Some(transform);
    }

    fn leave_callback(&self) -> Option<LeaveCallback> {
        self.leave_callback
            .read()
            .expect("hooks lock poisoned")
            .clone()
    }

    fn outgoing_transform(&self) -> Option<OutgoingTransform> {
        self.outgoing_transform
            .read()
            .expect("hooks lock poisoned")
            .clone()
    }
}

/// Per-channel engine: membership validation, recipient resolution, and
/// message routing over an agnostic [`StateManager`].
pub struct ChannelEngine {
    channel_id: ChannelId,
    manager: Arc<dyn StateManager>,
    middleware: Arc<dyn BroadcastMiddleware>,
    hooks: Arc<EngineHooks>,
}

impl ChannelEngine {
    /// Creates an engine over an already-initialized manager.
    pub fn new(
        channel_id: ChannelId,
        manager: Arc<dyn StateManager>,
        middleware: Arc<dyn BroadcastMiddleware>,
        hooks: Arc<EngineHooks>,
    ) -> Self {
        Self {
            channel_id,
            manager,
            middleware,
            hooks,
        }
    }

    /// The channel name.
    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    /// Ids of every current member.
    pub fn member_ids(&self) -> Vec<UserId> {
        self.manager.member_ids()
    }

    /// Whether a user is a member.
    pub fn is_member(&self, user_id: &UserId) -> bool {
        self.manager.is_member(user_id)
    }

    /// Current presence of a member.
    pub fn get_presence(&self, user_id: &UserId) -> Option<StateMap> {
        self.manager.get_presence(user_id)
    }

    /// Current assigns of a member.
    pub fn get_assigns(&self, user_id: &UserId) -> Option<StateMap> {
        self.manager.get_assigns(user_id)
    }

    /// Adds a member and acknowledges the join to them alone.
    pub async fn add_user(
        &self,
        user_id: &UserId,
        assigns: StateMap,
        on_message: EventCallback,
    ) -> AppResult<()> {
        if self.manager.is_member(user_id) {
            return Err(AppError::channel(
                ErrorKind::Validation,
                self.channel_id.as_str(),
                format!("User '{user_id}' already exists in this channel"),
            ));
        }

        let delivery = self.wrap_with_transform(on_message);
        self.manager.add_user(user_id, assigns, delivery).await?;

        let acknowledge = ChannelEvent::system(
            &self.channel_id,
            events::ACKNOWLEDGE,
            serde_json::json!({ "channel": self.channel_id }),
            vec![user_id.clone()],
        );
        self.manager.broadcast(acknowledge).await
    }

    /// Removes a member and fires the lobby's leave callback.
    pub async fn remove_user(&self, user_id: &UserId) -> AppResult<LeaveSnapshot> {
        if !self.manager.is_member(user_id) {
            return Err(self.unknown_member(user_id));
        }
        let snapshot = self.manager.remove_user(user_id).await?;
        if let Some(callback) = self.hooks.leave_callback() {
            callback(&self.channel_id, &snapshot);
        }
        Ok(snapshot)
    }

    /// Resolves recipients, validates the sender, and publishes a message.
    pub async fn send_message(
        &self,
        sender: &Sender,
        recipients: RecipientSpec,
        action: MessageAction,
        event: &str,
        payload: serde_json::Value,
        request_id: Option<RequestId>,
    ) -> AppResult<()> {
        let recipients = self.resolve_recipients(sender, recipients)?;
        let envelope = ChannelEvent {
            event: event.to_string(),
            action,
            channel_name: self.channel_id.clone(),
            request_id,
            payload,
            recipients,
        };
        self.manager.broadcast(envelope).await
    }

    /// Routes an inbound client broadcast through the middleware chain.
    ///
    /// If the chain never produces a response, a `handler_not_found` error
    /// is sent back to the sender only.
    pub async fn broadcast_message(
        self: &Arc<Self>,
        user_id: &UserId,
        message: ClientMessage,
    ) -> AppResult<()> {
        if !self.manager.is_member(user_id) {
            return Err(self.unknown_member(user_id));
        }

        let broadcast = BroadcastEvent {
            sender: user_id.clone(),
            event: ChannelEvent {
                event: message.event,
                action: MessageAction::Broadcast,
                channel_name: self.channel_id.clone(),
                request_id: message.request_id,
                payload: message.payload,
                recipients: Vec::new(),
            },
        };

        let engine = Arc::clone(self);
        let not_handled: NextFn = Box::new(move |event: BroadcastEvent| {
            Box::pin(async move {
                debug!(channel = %engine.channel_id, event = %event.event.event,
                    "No handler consumed broadcast");
                engine
                    .send_message(
                        &Sender::System,
                        RecipientSpec::Users(vec![event.sender.clone()]),
                        MessageAction::Error,
                        events::HANDLER_NOT_FOUND,
                        serde_json::json!({
                            "event": event.event.event,
                            "message": "No handler registered for this event",
                        }),
                        event.event.request_id.clone(),
                    )
                    .await
            })
        });

        self.middleware
            .run(broadcast, Arc::clone(self), not_handled)
            .await
    }

    /// Kicks a member: notifies the victim privately, removes them, then
    /// informs the remaining members.
    pub async fn kick_user(&self, user_id: &UserId, reason: &str) -> AppResult<()> {
        self.send_message(
            &Sender::System,
            RecipientSpec::Users(vec![user_id.clone()]),
            MessageAction::System,
            events::KICKED_OUT,
            serde_json::json!({ "reason": reason }),
            None,
        )
        .await?;

        self.remove_user(user_id).await?;

        let remaining = self.manager.member_ids();
        if !remaining.is_empty() {
            let kicked = ChannelEvent::system(
                &self.channel_id,
                events::KICKED,
                serde_json::json!({ "userId": user_id, "reason": reason }),
                remaining,
            );
            self.manager.broadcast(kicked).await?;
        }
        Ok(())
    }

    /// Creates a presence entry for a member.
    pub async fn track_presence(&self, user_id: &UserId, state: StateMap) -> AppResult<()> {
        self.require_member(user_id)?;
        self.manager.track_presence(user_id, state).await
    }

    /// Replaces a member's presence entry.
    pub async fn update_presence(&self, user_id: &UserId, state: StateMap) -> AppResult<()> {
        self.require_member(user_id)?;
        self.manager.update_presence(user_id, state).await
    }

    /// Removes a member's presence entry.
    pub async fn remove_presence(&self, user_id: &UserId, safe: bool) -> AppResult<()> {
        self.require_member(user_id)?;
        self.manager.remove_presence(user_id, safe).await
    }

    /// Updates a member's presence if tracked, tracks it otherwise.
    pub async fn upsert_presence(&self, user_id: &UserId, state: StateMap) -> AppResult<()> {
        self.require_member(user_id)?;
        self.manager.upsert_presence(user_id, state).await
    }

    /// Replaces a member's assigns.
    pub async fn update_assigns(&self, user_id: &UserId, assigns: StateMap) -> AppResult<()> {
        self.manager.update_assigns(user_id, assigns).await
    }

    /// Destroys the channel: notifies every member, then closes the
    /// manager (which clears state and tells the lobby to drop it).
    pub async fn destroy(&self, reason: &str) -> AppResult<()> {
        let members = self.manager.member_ids();
        if !members.is_empty() {
            let destroyed = ChannelEvent::error(
                &self.channel_id,
                events::DESTROYED,
                serde_json::json!({ "reason": reason }),
                members,
            );
            self.manager.broadcast(destroyed).await?;
        }
        self.manager.close(reason).await
    }

    fn resolve_recipients(
        &self,
        sender: &Sender,
        recipients: RecipientSpec,
    ) -> AppResult<Vec<UserId>> {
        if let Some(user_id) = sender.user_id() {
            if !self.manager.is_member(user_id) {
                return Err(self.unknown_member(user_id));
            }
        }

        match recipients {
            RecipientSpec::All => Ok(self.manager.member_ids()),
            RecipientSpec::AllExceptSender => match sender.user_id() {
                Some(user_id) => Ok(self
                    .manager
                    .member_ids()
                    .into_iter()
                    .filter(|id| id != user_id)
                    .collect()),
                None => Err(AppError::channel(
                    ErrorKind::Validation,
                    self.channel_id.as_str(),
                    "The system sender cannot address all-except-sender",
                )),
            },
            RecipientSpec::Users(users) => {
                for user_id in &users {
                    if !self.manager.is_member(user_id) {
                        return Err(AppError::channel(
                            ErrorKind::Validation,
                            self.channel_id.as_str(),
                            format!("Recipient '{user_id}' is not a member of this channel"),
                        ));
                    }
                }
                Ok(users)
            }
        }
    }

    fn require_member(&self, user_id: &UserId) -> AppResult<()> {
        if self.manager.is_member(user_id) {
            Ok(())
        } else {
            Err(self.unknown_member(user_id))
        }
    }

    fn unknown_member(&self, user_id: &UserId) -> AppError {
        AppError::channel(
            ErrorKind::NotFound,
            self.channel_id.as_str(),
            format!("User '{user_id}' is not a member of this channel"),
        )
    }

    fn wrap_with_transform(&self, on_message: EventCallback) -> EventCallback {
        let hooks = Arc::clone(&self.hooks);
        Arc::new(move |event| match hooks.outgoing_transform() {
            Some(transform) => on_message(&transform(event.clone())),
            None => on_message(event),
        })
    }
}
