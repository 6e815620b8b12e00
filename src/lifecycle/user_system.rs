use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info};

use super::error::SystemError;
use super::reducer::reference_reducer;
use super::store::Store;
use crate::config::MiddlewareConfig;
use crate::framework::TracingErrorSink;
use crate::gateway::{MemoryActor, MemoryGateway};
use crate::middleware::UserMiddleware;
use crate::model::UserState;

/// A ready-to-use assembly of the in-memory gateway, the middleware and a
/// store running [`reference_reducer`].
///
/// ```ignore
/// let system = UserSystem::new(MiddlewareConfig::from_env(), UserState::empty());
/// system.store.dispatch(UserAction::Register("abc".into()))?;
/// system.store.dispatch(UserAction::Create)?;
/// system.shutdown().await?;
/// ```
pub struct UserSystem {
    /// The store hosting the middleware.
    pub store: Store,

    /// Direct handle onto the backing gateway, for seeding and inspection.
    pub gateway: MemoryGateway,

    gateway_handle: JoinHandle<()>,
}

impl UserSystem {
    /// Spawns the gateway actor and the store. Must be called from within a
    /// Tokio runtime.
    pub fn new(config: MiddlewareConfig, initial: UserState) -> Self {
        let (actor, gateway) = MemoryActor::with_counter(config.gateway_buffer);
        Self::with_actor(config, initial, actor, gateway)
    }

    /// Same as [`new`](Self::new) with a pre-built actor, e.g. one that was
    /// [seeded](MemoryActor::seed) or uses a custom beacon generator.
    pub fn with_actor(
        config: MiddlewareConfig,
        initial: UserState,
        actor: MemoryActor,
        gateway: MemoryGateway,
    ) -> Self {
        let gateway_handle = tokio::spawn(actor.run());
        let middleware = UserMiddleware::new(
            Arc::new(gateway.clone()),
            Arc::new(TracingErrorSink),
            config,
        );
        let store = Store::spawn(initial, reference_reducer, middleware);

        Self {
            store,
            gateway,
            gateway_handle,
        }
    }

    /// Stops the store, then closes the gateway and waits for its actor.
    pub async fn shutdown(self) -> Result<(), SystemError> {
        info!("Shutting down system...");

        // The middleware holds gateway clients; they go away with the store.
        self.store.shutdown().await?;
        drop(self.gateway);

        if let Err(e) = self.gateway_handle.await {
            error!("Gateway task failed: {:?}", e);
            return Err(SystemError::TaskFailed(e.to_string()));
        }

        info!("System shutdown complete.");
        Ok(())
    }
}
