//! # Tracing Setup
//!
//! [`setup_tracing`] installs a compact `tracing_subscriber` formatter whose
//! level comes from `RUST_LOG`:
//!
//! ```bash
//! RUST_LOG=info cargo run
//!
//! # Every action, continuation and gateway request
//! RUST_LOG=debug cargo run
//!
//! # Only the middleware
//! RUST_LOG=user_middleware::middleware=debug cargo run
//! ```
//!
//! With `RUST_LOG=info` a register/create round trip reads:
//!
//! ```text
//! INFO Gateway started records=0
//! INFO Attached to store
//! INFO Store started
//! INFO Listening for changes key=abc generation=1
//! INFO Created key=abc size=1
//! INFO Effect completed operation=create key=abc
//! ```
//!
//! Spans opened by [`UserMiddleware::handle`](crate::middleware::UserMiddleware::handle)
//! and [`AfterCommit::run`](crate::middleware::AfterCommit::run) carry the
//! action name, so `RUST_LOG=debug` shows which action started each effect.

/// Installs the global subscriber. Calling it again is a no-op, so tests may
/// call it freely.
pub fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}
