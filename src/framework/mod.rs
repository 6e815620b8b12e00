//! Effect plumbing shared by the middleware.
//!
//! # Main Components
//!
//! - [`EffectRunner`] - at most one in-flight effect per [`Slot`], with race-free cancellation
//! - [`KeySwitcher`] - the re-targetable change subscription
//! - [`ErrorSink`] - where provider failures are reported
//!
//! # Testing
//!
//! See [`mock`] for a scriptable gateway that records calls and feeds change streams.

pub mod mock;
pub mod runner;
pub mod sink;
pub mod switcher;

pub use runner::{EffectHandle, EffectRunner, Slot, SlotToken};
pub use sink::{EffectFailure, ErrorSink, Operation, TracingErrorSink};
pub use switcher::{KeySwitcher, SwitcherState};
