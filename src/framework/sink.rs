//! # Error Sink
//!
//! Provider failures never re-enter the action stream. They are handed to an
//! injected [`ErrorSink`] instead; [`TracingErrorSink`] is the default.

use std::fmt;

use tracing::warn;

use crate::gateway::ProviderError;

/// Which gateway operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
    Delete,
    Read,
    Listen,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Read => "read",
            Operation::Listen => "listen",
        };
        f.write_str(name)
    }
}

/// A failed effect, as reported to the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectFailure {
    pub operation: Operation,
    pub key: Option<String>,
    pub error: ProviderError,
}

impl EffectFailure {
    pub fn new(operation: Operation, key: Option<&str>, error: ProviderError) -> Self {
        Self {
            operation,
            key: key.map(str::to_string),
            error,
        }
    }
}

impl fmt::Display for EffectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{} {key}: {}", self.operation, self.error),
            None => write!(f, "{}: {}", self.operation, self.error),
        }
    }
}

/// Receives every effect failure.
///
/// `report` is called from the failed effect's task, after the slot lock has
/// been released. It may inspect the middleware (`is_busy`, `listener`) but
/// must not block, and must not dispatch through `UserMiddleware::handle` or
/// start effects: the failed effect is still being polled and starting one in
/// the same slot would wait on it.
pub trait ErrorSink: Send + Sync + 'static {
    fn report(&self, failure: &EffectFailure);
}

impl<F> ErrorSink for F
where
    F: Fn(&EffectFailure) + Send + Sync + 'static,
{
    fn report(&self, failure: &EffectFailure) {
        self(failure)
    }
}

/// Logs failures at `warn` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, failure: &EffectFailure) {
        warn!(
            operation = %failure.operation,
            key = failure.key.as_deref().unwrap_or("-"),
            error = %failure.error,
            "Effect failed"
        );
    }
}
