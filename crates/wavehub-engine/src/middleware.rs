//! The broadcast middleware seam.
//!
//! Middleware composition itself is an external collaborator; the engine
//! only consumes the linear `run(event, channel, next)` contract. The
//! engine supplies `next` as the not-handled fallback: a chain that never
//! produced a response calls it, and the engine then reports
//! `handler_not_found` to the sender.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use wavehub_core::result::AppResult;
use wavehub_core::types::UserId;

use crate::channel::engine::ChannelEngine;
use crate::message::envelope::ChannelEvent;

/// A user-originated broadcast travelling through the middleware chain.
#[derive(Debug, Clone)]
pub struct BroadcastEvent {
    /// The member that sent the message.
    pub sender: UserId,
    /// The wrapped envelope.
    pub event: ChannelEvent,
}

/// The not-handled fallback handed to the chain.
pub type NextFn = Box<dyn FnOnce(BroadcastEvent) -> BoxFuture<'static, AppResult<()>> + Send>;

/// Linear middleware chain consumed as a black box.
#[async_trait]
pub trait BroadcastMiddleware: Send + Sync {
    /// Runs the chain for one broadcast. Implementations either consume
    /// the event (responding through `channel`) or call `next` to signal
    /// that no handler matched.
    async fn run(
        &self,
        event: BroadcastEvent,
        channel: Arc<ChannelEngine>,
        next: NextFn,
    ) -> AppResult<()>;
}

/// Chain that handles nothing; every broadcast falls through to `next`.
pub struct PassthroughMiddleware;

#[async_trait]
impl BroadcastMiddleware for PassthroughMiddleware {
    async fn run(
        &self,
        event: BroadcastEvent,
        _channel: Arc<ChannelEngine>,
        next: NextFn,
    ) -> AppResult<()> {
        next(event).await
    }
}
