use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::gateway::ProviderError;

/// Flat key/value view of a set of user fields, as sent to
/// [`UserGateway::update`](crate::gateway::UserGateway::update).
pub type FieldMap = BTreeMap<String, serde_json::Value>;

/// How the display name is assembled from the given and family names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameStyle {
    /// `given + family` with nothing in between ("AdaLovelace").
    Concatenated,
    /// `given + " " + family` ("Ada Lovelace").
    #[default]
    Spaced,
}

impl NameStyle {
    pub fn join(self, given_name: &str, family_name: &str) -> String {
        match self {
            NameStyle::Concatenated => format!("{given_name}{family_name}"),
            NameStyle::Spaced => format!("{given_name} {family_name}"),
        }
    }
}

impl FromStr for NameStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "concatenated" => Ok(NameStyle::Concatenated),
            "spaced" => Ok(NameStyle::Spaced),
            other => Err(format!("unknown name style: {other}")),
        }
    }
}

/// The user record tracked by the store.
///
/// Values are immutable snapshots: a change produces a new `UserInfo`
/// (see [`UserUpdate::apply_to`]) rather than editing fields in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    #[serde(rename = "beaconid")]
    pub beacon_id: Option<u16>,
    pub email: String,
    pub given_name: String,
    pub family_name: String,
    pub families: Option<BTreeMap<String, bool>>,
    pub tracking: Option<bool>,
}

impl UserInfo {
    /// Creates a record with no beacon, no families and tracking enabled.
    pub fn new(
        email: impl Into<String>,
        given_name: impl Into<String>,
        family_name: impl Into<String>,
    ) -> Self {
        Self {
            beacon_id: None,
            email: email.into(),
            given_name: given_name.into(),
            family_name: family_name.into(),
            families: None,
            tracking: Some(true),
        }
    }

    /// The sentinel used before any record is loaded.
    pub fn empty() -> Self {
        Self {
            beacon_id: None,
            email: String::new(),
            given_name: String::new(),
            family_name: String::new(),
            families: None,
            tracking: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::empty()
    }

    pub fn display_name(&self, style: NameStyle) -> String {
        style.join(&self.given_name, &self.family_name)
    }

    /// Tracking defaults to enabled when the flag was never set.
    pub fn tracking_enabled(&self) -> bool {
        self.tracking.unwrap_or(true)
    }
}

impl Default for UserInfo {
    fn default() -> Self {
        Self::empty()
    }
}

/// Snapshot of the store's user slice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserState {
    /// Absent until the user has been registered.
    pub key: Option<String>,
    pub value: UserInfo,
}

impl UserState {
    pub fn new(key: impl Into<String>, value: UserInfo) -> Self {
        Self {
            key: Some(key.into()),
            value,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Same record, bound to `key`.
    pub fn with_key(&self, key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            value: self.value.clone(),
        }
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }
}

/// Payload for [`UserGateway::create`](crate::gateway::UserGateway::create).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFields {
    pub email: String,
    pub given_name: String,
    pub family_name: String,
    pub display_name: String,
}

impl UserFields {
    pub fn from_info(info: &UserInfo, style: NameStyle) -> Self {
        Self {
            email: info.email.clone(),
            given_name: info.given_name.clone(),
            family_name: info.family_name.clone(),
            display_name: info.display_name(style),
        }
    }
}

/// A partial change to a [`UserInfo`]. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UserUpdate {
    #[serde(rename = "beaconid", default, skip_serializing_if = "Option::is_none")]
    pub beacon_id: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub families: Option<BTreeMap<String, bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking: Option<bool>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Flattens the set fields into a plain key/value map.
    pub fn to_fields(&self) -> Result<FieldMap, ProviderError> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => Ok(map.into_iter().collect()),
            Ok(other) => Err(ProviderError::Encoding(format!(
                "expected an object, got {other}"
            ))),
            Err(e) => Err(ProviderError::Encoding(e.to_string())),
        }
    }

    /// Inverse of [`to_fields`](Self::to_fields). Unknown keys are rejected.
    pub fn from_fields(fields: &FieldMap) -> Result<Self, ProviderError> {
        let object: serde_json::Map<String, serde_json::Value> =
            fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        serde_json::from_value(serde_json::Value::Object(object))
            .map_err(|e| ProviderError::Decoding(e.to_string()))
    }

    /// Returns a new record with this update applied on top of `info`.
    pub fn apply_to(&self, info: &UserInfo) -> UserInfo {
        UserInfo {
            beacon_id: self.beacon_id.or(info.beacon_id),
            email: self.email.clone().unwrap_or_else(|| info.email.clone()),
            given_name: self
                .given_name
                .clone()
                .unwrap_or_else(|| info.given_name.clone()),
            family_name: self
                .family_name
                .clone()
                .unwrap_or_else(|| info.family_name.clone()),
            families: self.families.clone().or_else(|| info.families.clone()),
            tracking: self.tracking.or(info.tracking),
        }
    }
}

impl fmt::Display for UserState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{key} <{}>", self.value.email),
            None => write!(f, "<unregistered>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_follows_style() {
        let info = UserInfo::new("ada@example.com", "Ada", "Lovelace");
        assert_eq!(info.display_name(NameStyle::Concatenated), "AdaLovelace");
        assert_eq!(info.display_name(NameStyle::Spaced), "Ada Lovelace");
    }

    #[test]
    fn empty_sentinel() {
        assert!(UserInfo::empty().is_empty());
        assert!(!UserInfo::new("a@b.com", "A", "B").is_empty());
        assert!(UserState::empty().key.is_none());
        // unset tracking still reads as enabled
        assert!(UserInfo::empty().tracking_enabled());
    }

    #[test]
    fn update_flattens_only_set_fields() {
        let update = UserUpdate {
            given_name: Some("Grace".into()),
            tracking: Some(false),
            ..Default::default()
        };
        let fields = update.to_fields().unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["givenName"], serde_json::json!("Grace"));
        assert_eq!(fields["tracking"], serde_json::json!(false));
    }

    #[test]
    fn empty_update_flattens_to_empty_map() {
        let fields = UserUpdate::default().to_fields().unwrap();
        assert!(fields.is_empty());
    }

    #[test]
    fn from_fields_rejects_unknown_keys() {
        let mut fields = FieldMap::new();
        fields.insert("shoeSize".into(), serde_json::json!(44));
        let err = UserUpdate::from_fields(&fields).unwrap_err();
        assert!(matches!(err, ProviderError::Decoding(_)));
    }

    #[test]
    fn apply_to_produces_new_value() {
        let info = UserInfo::new("a@b.com", "Ada", "Lovelace");
        let update = UserUpdate {
            email: Some("ada@c.org".into()),
            beacon_id: Some(7),
            ..Default::default()
        };
        let next = update.apply_to(&info);
        assert_eq!(next.email, "ada@c.org");
        assert_eq!(next.beacon_id, Some(7));
        assert_eq!(next.given_name, "Ada");
        assert_eq!(info.email, "a@b.com");
    }

    #[test]
    fn user_info_wire_names() {
        let info = UserInfo::new("a@b.com", "Ada", "Lovelace");
        let value = serde_json::to_value(&info).unwrap();
        assert!(value.get("beaconid").is_some());
        assert!(value.get("givenName").is_some());
        let back: UserInfo = serde_json::from_value(value).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn name_style_parses() {
        assert_eq!("Spaced".parse::<NameStyle>(), Ok(NameStyle::Spaced));
        assert_eq!(
            " concatenated ".parse::<NameStyle>(),
            Ok(NameStyle::Concatenated)
        );
        assert!("kebab".parse::<NameStyle>().is_err());
    }
}
