//! Plain data carried through the store: the user snapshot and the payloads
//! derived from it for gateway calls.

pub mod user;

pub use user::*;
