use thiserror::Error;

/// Failures of the hosting layer itself, as opposed to provider failures
/// which travel through the [`ErrorSink`](crate::framework::ErrorSink).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SystemError {
    #[error("Store is closed")]
    StoreClosed,

    #[error("Task failed: {0}")]
    TaskFailed(String),
}
