//! # User Gateway
//!
//! The boundary between the middleware and whatever actually stores users.
//! The middleware only ever talks to a `dyn UserGateway`; [`memory`] provides
//! an actor-backed implementation for wiring and tests.

pub mod error;
pub mod memory;

pub use error::ProviderError;
pub use memory::{MemoryActor, MemoryGateway};

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::model::{FieldMap, UserFields, UserState};

/// Infinite stream of snapshots for one key. Ends only on error or drop.
pub type ChangeStream = BoxStream<'static, Result<UserState, ProviderError>>;

/// Contract of the external user-record provider.
///
/// All async methods are suspension points from the middleware's point of
/// view: they are started inside an [`EffectRunner`](crate::framework::EffectRunner)
/// slot and may be cancelled by dropping the future.
#[async_trait]
pub trait UserGateway: Send + Sync + 'static {
    /// Fire-and-forget announcement of the active key.
    fn register(&self, key: &str);

    async fn create(&self, key: &str, fields: UserFields) -> Result<(), ProviderError>;

    async fn update(&self, key: &str, fields: FieldMap) -> Result<(), ProviderError>;

    async fn delete(&self, key: &str) -> Result<(), ProviderError>;

    /// Returns the stored record serialized as JSON.
    async fn read(&self, key: &str) -> Result<String, ProviderError>;

    /// Subscribes to every change of the record stored under `key`.
    fn change_listener(&self, key: &str) -> ChangeStream;
}
