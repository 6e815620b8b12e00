//! The action middleware and the types it exchanges with its host.

pub mod core;

pub use self::core::{AfterCommit, Effect, Handled, Immediate, StateReader, UserMiddleware};
pub use crate::framework::{EffectFailure, ErrorSink, Operation, TracingErrorSink};
