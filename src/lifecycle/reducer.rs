//! A reference reducer for the demo binary and end-to-end tests.
//!
//! Real applications bring their own reducer; this one only does what the
//! middleware needs to be exercised: bind the key on registration, adopt
//! provider snapshots, and apply local edits optimistically.

use crate::action::UserAction;
use crate::model::{UserInfo, UserState};

pub fn reference_reducer(state: &UserState, action: &UserAction) -> UserState {
    match action {
        UserAction::Register(key) => state.with_key(key.clone()),
        UserAction::StateChanged(next) => next.clone(),
        UserAction::Update(update) => UserState {
            key: state.key.clone(),
            value: update.apply_to(&state.value),
        },
        UserAction::Delete => UserState {
            key: state.key.clone(),
            value: UserInfo::empty(),
        },
        UserAction::Start | UserAction::Create | UserAction::Read(_) => state.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UserUpdate;

    #[test]
    fn state_changed_replaces_everything() {
        let before = UserState::new("a", UserInfo::new("a@b.com", "A", "B"));
        let incoming = UserState::new("a", UserInfo::new("new@b.com", "N", "M"));
        let after = reference_reducer(&before, &UserAction::StateChanged(incoming.clone()));
        assert_eq!(after, incoming);
    }

    #[test]
    fn register_binds_key_and_keeps_info() {
        let before = UserState {
            key: None,
            value: UserInfo::new("a@b.com", "A", "B"),
        };
        let after = reference_reducer(&before, &UserAction::Register("abc".into()));
        assert_eq!(after.key(), Some("abc"));
        assert_eq!(after.value, before.value);
    }

    #[test]
    fn update_and_delete() {
        let before = UserState::new("a", UserInfo::new("a@b.com", "A", "B"));
        let update = UserUpdate {
            family_name: Some("C".into()),
            ..Default::default()
        };
        let updated = reference_reducer(&before, &UserAction::Update(update));
        assert_eq!(updated.value.family_name, "C");

        let deleted = reference_reducer(&updated, &UserAction::Delete);
        assert_eq!(deleted.key(), Some("a"));
        assert!(deleted.value.is_empty());
    }
}
