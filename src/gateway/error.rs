//! # Provider Errors
//!
//! One case per failing gateway operation. Every error is terminal for the
//! call that raised it; nothing in this crate retries.

/// Errors reported by a [`UserGateway`](super::UserGateway).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Decoding failed: {0}")]
    Decoding(String),
    #[error("Encoding failed: {0}")]
    Encoding(String),
    #[error("User not found: {0}")]
    NotFound(String),
    #[error("User creation failed: {0}")]
    Creation(String),
    #[error("User update failed: {0}")]
    Update(String),
    #[error("User deletion failed: {0}")]
    Deletion(String),
    #[error("Gateway closed")]
    Closed,
}
