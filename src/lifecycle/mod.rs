//! Hosting: the store that drives the middleware and the wiring that puts a
//! gateway, a middleware and a store together.

pub mod error;
pub mod reducer;
pub mod store;
pub mod tracing;
pub mod user_system;

pub use error::SystemError;
pub use reducer::reference_reducer;
pub use store::{Reducer, Store};
pub use tracing::setup_tracing;
pub use user_system::UserSystem;
