//! # Actions
//!
//! [`UserAction`] is the closed set of events the middleware receives from the
//! host and emits back into it. Variant accessors (`is_create()`,
//! `as_read()`, ...) are generated by the `variant_accessors!` macro below so
//! they never drift from the enum.

use tokio::sync::mpsc;

use crate::model::{UserState, UserUpdate};

/// Push side of the host's action mailbox. Sending never blocks, so it is
/// safe to call from inside effect deliveries.
pub type ActionSender = mpsc::UnboundedSender<UserAction>;

/// Every event that flows through the user middleware.
#[derive(Debug, Clone, PartialEq)]
pub enum UserAction {
    /// Begin following the key already present in the store.
    Start,
    /// Persist the record currently held by the store.
    Create,
    /// Remove the record currently held by the store.
    Delete,
    /// Push a partial change of the stored record to the provider.
    Update(UserUpdate),
    /// Look a record up by key.
    Read(String),
    /// Announce the key of the signed-in user.
    Register(String),
    /// The provider reported a new value for the watched record.
    StateChanged(UserState),
}

macro_rules! variant_accessors {
    (
        $enum:ident;
        unit: $($unit:ident),* ;
        payload: $($variant:ident($ty:ty)),* $(;)?
    ) => {
        paste::paste! {
            impl $enum {
                $(
                    pub fn [<is_ $unit:snake>](&self) -> bool {
                        matches!(self, $enum::$unit)
                    }
                )*
                $(
                    pub fn [<is_ $variant:snake>](&self) -> bool {
                        matches!(self, $enum::$variant(_))
                    }

                    pub fn [<as_ $variant:snake>](&self) -> Option<&$ty> {
                        match self {
                            $enum::$variant(value) => Some(value),
                            _ => None,
                        }
                    }
                )*

                /// Variant name, for structured logging.
                pub fn name(&self) -> &'static str {
                    match self {
                        $( $enum::$unit => stringify!($unit), )*
                        $( $enum::$variant(_) => stringify!($variant), )*
                    }
                }
            }
        }
    };
}

variant_accessors! {
    UserAction;
    unit: Start, Create, Delete;
    payload:
        Update(UserUpdate),
        Read(String),
        Register(String),
        StateChanged(UserState);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UserInfo;

    #[test]
    fn unit_accessors() {
        assert!(UserAction::Create.is_create());
        assert!(!UserAction::Create.is_delete());
        assert!(UserAction::Start.is_start());
        assert_eq!(UserAction::Delete.name(), "Delete");
    }

    #[test]
    fn payload_accessors() {
        let read = UserAction::Read("abc".into());
        assert!(read.is_read());
        assert_eq!(read.as_read().map(String::as_str), Some("abc"));
        assert!(read.as_register().is_none());

        let state = UserState::new("abc", UserInfo::new("a@b.com", "A", "B"));
        let changed = UserAction::StateChanged(state.clone());
        assert!(changed.is_state_changed());
        assert_eq!(changed.as_state_changed(), Some(&state));
        assert_eq!(changed.name(), "StateChanged");
    }
}
