//! # User Middleware
//!
//! > **Side effects for a pure user store, kept in one place.**
//!
//! A unidirectional store reduces actions into a `UserState` without doing
//! any I/O. This crate supplies the piece that does: a middleware that turns
//! actions into calls against a remote user-record provider and feeds the
//! provider's change notifications back into the store as actions.
//!
//! ## Core Concepts
//!
//! ### Pre-commit and post-commit
//! [`UserMiddleware::handle`](middleware::UserMiddleware::handle) runs before
//! the reducer and may start an effect right away (`Register`, `Read`). It
//! returns an [`AfterCommit`](middleware::AfterCommit) continuation the host
//! runs once the reducer's output is committed. The continuation reads the
//! committed state exactly once, so `Create` always sends the fields the
//! reducer just produced.
//!
//! ### Slots
//! Every effect runs in a named [`Slot`](framework::Slot) of the
//! [`EffectRunner`](framework::EffectRunner). Starting an effect cancels the
//! previous one in the same slot, and a cancelled effect can never deliver a
//! result. Mutations share one slot, the change listener has its own.
//!
//! ### Following the key
//! The [`KeySwitcher`](framework::KeySwitcher) holds at most one live
//! subscription. Registering or starting re-targets it to the store's key;
//! every snapshot it receives is dispatched as
//! [`UserAction::StateChanged`](action::UserAction::StateChanged).
//!
//! ### Failures
//! Provider failures are reported to an [`ErrorSink`](framework::ErrorSink)
//! and never come back as actions.
//!
//! ## Module Tour
//!
//! - [`model`]: `UserInfo`, `UserState` and the update/create payloads.
//! - [`action`]: the `UserAction` vocabulary.
//! - [`gateway`]: the `UserGateway` contract and an in-memory actor behind it.
//! - [`framework`]: effect slots, the key switcher, error sinks and the
//!   [`MockGateway`](framework::mock::MockGateway) for tests.
//! - [`middleware`]: the `UserMiddleware` itself.
//! - [`lifecycle`]: a host `Store`, the `UserSystem` wiring and tracing setup.
//! - [`config`]: `MiddlewareConfig`, read from the environment.
//!
//! ## Running the Demo
//!
//! ```bash
//! RUST_LOG=info cargo run
//! ```

pub mod action;
pub mod config;
pub mod framework;
pub mod gateway;
pub mod lifecycle;
pub mod middleware;
pub mod model;
