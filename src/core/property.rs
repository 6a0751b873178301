//! Session Property Bag
//!
//! Flat key-value metadata attached to a session by the transport. Values are
//! either text or integers; numbers that arrive as text are parsed explicitly
//! at this boundary and a failed parse is an error, never a default.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::descriptor::{ParticipantId, SessionStatus};
use crate::core::settings::WaveCount;

/// Well-known property keys.
pub mod keys {
    /// Session display name.
    pub const NAME: &str = "name";
    /// Wave count, `0` for unbounded.
    pub const WAVES: &str = "waves";
    /// Lifecycle status.
    pub const STATUS: &str = "status";
    /// Host identity.
    pub const OWNER: &str = "owner";
    /// Hosting region.
    pub const REGION: &str = "region";
}

/// A single property value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Integer value.
    Int(i64),
    /// Text value.
    Text(String),
}

impl PropertyValue {
    /// Text value from anything string-like.
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Read as an integer, parsing text if needed.
    pub fn to_int(&self, key: &str) -> Result<i64, PropertyError> {
        match self {
            Self::Int(v) => Ok(*v),
            Self::Text(s) => s.trim().parse().map_err(|_| PropertyError::InvalidNumber {
                key: key.to_string(),
                value: s.clone(),
            }),
        }
    }

    /// Read as text. Integers are rejected rather than stringified.
    pub fn as_text(&self, key: &str) -> Result<&str, PropertyError> {
        match self {
            Self::Text(s) => Ok(s),
            Self::Int(_) => Err(PropertyError::ExpectedText(key.to_string())),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Ordered property map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyBag(BTreeMap<String, PropertyValue>);

impl PropertyBag {
    /// Empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value.
    pub fn insert(&mut self, key: impl Into<String>, value: PropertyValue) {
        self.0.insert(key.into(), value);
    }

    /// Look up a raw value.
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key)
    }

    /// Integer value for `key`, if present.
    pub fn int(&self, key: &str) -> Result<Option<i64>, PropertyError> {
        self.get(key).map(|v| v.to_int(key)).transpose()
    }

    /// Text value for `key`, if present.
    pub fn text(&self, key: &str) -> Result<Option<&str>, PropertyError> {
        self.get(key).map(|v| v.as_text(key)).transpose()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the bag is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.0.iter()
    }

    /// Compact JSON rendering for logs.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Property bag parse errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PropertyError {
    /// A numeric property carried text that is not a number.
    #[error("property '{key}' is not a number: {value:?}")]
    InvalidNumber {
        /// Property key.
        key: String,
        /// Offending value.
        value: String,
    },

    /// A text property carried an integer.
    #[error("property '{0}' must be text")]
    ExpectedText(String),

    /// Wave count is negative or too large.
    #[error("wave count out of range: {0}")]
    WavesOutOfRange(i64),

    /// Unknown status name.
    #[error("unknown session status: {0:?}")]
    UnknownStatus(String),
}

/// Typed view of the well-known session properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionProperties {
    /// Display name.
    pub name: Option<String>,
    /// Wave configuration.
    pub waves: Option<WaveCount>,
    /// Lifecycle status.
    pub status: Option<SessionStatus>,
    /// Host identity.
    pub owner: Option<ParticipantId>,
    /// Hosting region.
    pub region: Option<String>,
}

impl SessionProperties {
    /// Parse the well-known keys. Unknown keys are ignored.
    pub fn parse(bag: &PropertyBag) -> Result<Self, PropertyError> {
        let waves = match bag.int(keys::WAVES)? {
            Some(raw) => Some(WaveCount::from_wire(raw).ok_or(PropertyError::WavesOutOfRange(raw))?),
            None => None,
        };

        let status = match bag.text(keys::STATUS)? {
            Some(raw) => Some(
                SessionStatus::parse(raw)
                    .ok_or_else(|| PropertyError::UnknownStatus(raw.to_string()))?,
            ),
            None => None,
        };

        Ok(Self {
            name: bag.text(keys::NAME)?.map(str::to_string),
            waves,
            status,
            owner: bag.text(keys::OWNER)?.map(ParticipantId::new),
            region: bag.text(keys::REGION)?.map(str::to_string),
        })
    }

    /// Format into a bag. Absent fields are omitted.
    pub fn to_bag(&self) -> PropertyBag {
        let mut bag = PropertyBag::new();
        if let Some(name) = &self.name {
            bag.insert(keys::NAME, PropertyValue::text(name.as_str()));
        }
        if let Some(waves) = self.waves {
            bag.insert(keys::WAVES, PropertyValue::Int(waves.to_wire()));
        }
        if let Some(status) = self.status {
            bag.insert(keys::STATUS, PropertyValue::text(status.as_str()));
        }
        if let Some(owner) = &self.owner {
            bag.insert(keys::OWNER, PropertyValue::text(owner.as_str()));
        }
        if let Some(region) = &self.region {
            bag.insert(keys::REGION, PropertyValue::text(region.as_str()));
        }
        bag
    }

    /// Only the status key. Used when the host publishes a status change.
    pub fn status_only(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_text_is_parsed() {
        let mut bag = PropertyBag::new();
        bag.insert(keys::WAVES, PropertyValue::text(" 12 "));
        let props = SessionProperties::parse(&bag).unwrap();
        assert_eq!(props.waves, WaveCount::finite(12));
    }

    #[test]
    fn test_bad_number_is_an_error() {
        let mut bag = PropertyBag::new();
        bag.insert(keys::WAVES, PropertyValue::text("twelve"));
        assert!(matches!(
            SessionProperties::parse(&bag),
            Err(PropertyError::InvalidNumber { .. })
        ));
    }

    #[test]
    fn test_negative_waves_rejected() {
        let mut bag = PropertyBag::new();
        bag.insert(keys::WAVES, PropertyValue::Int(-1));
        assert_eq!(
            SessionProperties::parse(&bag),
            Err(PropertyError::WavesOutOfRange(-1))
        );
    }

    #[test]
    fn test_integer_name_rejected() {
        let mut bag = PropertyBag::new();
        bag.insert(keys::NAME, PropertyValue::Int(5));
        assert_eq!(
            SessionProperties::parse(&bag),
            Err(PropertyError::ExpectedText("name".into()))
        );
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let mut bag = PropertyBag::new();
        bag.insert("map", PropertyValue::text("crypt"));
        assert_eq!(SessionProperties::parse(&bag).unwrap(), SessionProperties::default());
    }

    #[test]
    fn test_json_shape_is_flat() {
        let bag = SessionProperties {
            name: Some("Arena".into()),
            waves: Some(WaveCount::Unbounded),
            ..Default::default()
        }
        .to_bag();
        assert_eq!(bag.to_json().unwrap(), r#"{"name":"Arena","waves":0}"#);

        let parsed: PropertyBag = serde_json::from_str(r#"{"name":"Arena","waves":0}"#).unwrap();
        assert_eq!(parsed, bag);
    }
}
