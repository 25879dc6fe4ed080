//! Manager selection — the sole place Local vs Distributed is decided.

use std::sync::Arc;

use tracing::debug;

use wavehub_core::result::AppResult;
use wavehub_core::types::ChannelId;

use super::distributed::DistributedManager;
use super::local::LocalManager;
use super::{ClientFactory, CloseHook, StateManager};

/// Builds the state manager for a new channel.
///
/// When a [`ClientFactory`] is configured the channel runs distributed;
/// otherwise it runs in-process. Channel and lobby engines stay agnostic
/// to the choice.
pub struct ManagerFactory {
    client_factory: Option<Arc<dyn ClientFactory>>,
}

impl ManagerFactory {
    /// Creates a factory. Passing a client factory selects distributed
    /// mode for every channel it creates.
    pub fn new(client_factory: Option<Arc<dyn ClientFactory>>) -> Self {
        Self { client_factory }
    }

    /// Builds and initializes the manager for `channel_id`. The manager is
    /// fully initialized (hydrated and subscribed) before it is returned.
    pub async fn create(
        &self,
        channel_id: &ChannelId,
        on_close: CloseHook,
    ) -> AppResult<Arc<dyn StateManager>> {
        let manager: Arc<dyn StateManager> = match &self.client_factory {
            Some(factory) => {
                debug!(channel = %channel_id, "Creating distributed manager");
                let client = factory.create(channel_id);
                Arc::new(DistributedManager::new(channel_id.clone(), client))
            }
            None => {
                debug!(channel = %channel_id, "Creating local manager");
                Arc::new(LocalManager::new(channel_id.clone()))
            }
        };

        manager.initialize(on_close).await?;
        Ok(manager)
    }
}
