//! Session Descriptors
//!
//! Identity types and the descriptor a participant keeps for the session it
//! hosts or joined. Descriptors change only in response to transport events
//! (and the host's own create/start outcome).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::property::{PropertyBag, PropertyError, SessionProperties};
use crate::core::settings::{SessionConfiguration, WaveCount};

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Unique session identifier.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Create from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identifier for a hosted session.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow as `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Participant identity (display name as known to the transport).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    /// Create from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// STATUS
// =============================================================================

/// Lifecycle status advertised for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Lobby is open, game not started.
    #[default]
    Waiting,
    /// Game running.
    InProgress,
    /// Game finished.
    Ended,
}

impl SessionStatus {
    /// Wire name used in the property bag.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::InProgress => "in_progress",
            Self::Ended => "ended",
        }
    }

    /// Parse a wire name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(Self::Waiting),
            "in_progress" => Some(Self::InProgress),
            "ended" => Some(Self::Ended),
            _ => None,
        }
    }
}

// =============================================================================
// DISCOVERY ENTRY
// =============================================================================

/// A session as reported by the transport (discovery push or join-time sync).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredSession {
    /// Session identifier.
    pub id: SessionId,
    /// Maximum participants.
    pub capacity: u8,
    /// Participants currently connected.
    pub current_count: u8,
    /// Accepting joins.
    pub is_open: bool,
    /// Listed publicly.
    pub is_visible: bool,
    /// Out-of-band metadata.
    pub properties: PropertyBag,
}

impl DiscoveredSession {
    /// Whether this entry may be shown in a directory listing.
    #[inline]
    pub fn is_listable(&self) -> bool {
        self.is_open && self.is_visible
    }
}

// =============================================================================
// DESCRIPTOR
// =============================================================================

/// Everything known about the current (or a listed) session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    /// Session identifier.
    pub id: SessionId,
    /// Display name.
    pub name: String,
    /// Maximum participants.
    pub capacity: u8,
    /// Participants currently connected.
    pub current_count: u8,
    /// Wave configuration.
    pub waves: WaveCount,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Host identity.
    pub owner: ParticipantId,
    /// Hosting region.
    pub region: String,
}

impl SessionDescriptor {
    /// Descriptor for a session the local participant just started hosting.
    pub fn hosted(
        id: SessionId,
        config: &SessionConfiguration,
        waves: WaveCount,
        owner: ParticipantId,
        region: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: config.name.clone(),
            capacity: config.capacity,
            current_count: 1,
            waves,
            status: SessionStatus::Waiting,
            owner,
            region: region.into(),
        }
    }

    /// Placeholder for a joined session whose metadata has not synced yet.
    pub fn pending(id: SessionId) -> Self {
        Self {
            id,
            name: String::new(),
            capacity: 0,
            current_count: 0,
            waves: WaveCount::Unbounded,
            status: SessionStatus::Waiting,
            owner: ParticipantId::new(""),
            region: String::new(),
        }
    }

    /// Build a listing entry from a discovery record.
    pub fn from_discovered(entry: &DiscoveredSession) -> Result<Self, PropertyError> {
        let mut descriptor = Self::pending(entry.id.clone());
        descriptor.apply_sync(entry)?;
        Ok(descriptor)
    }

    /// Apply a sync record. Properties are parsed before anything is written,
    /// so a malformed bag leaves the descriptor untouched.
    pub fn apply_sync(&mut self, entry: &DiscoveredSession) -> Result<(), PropertyError> {
        let props = SessionProperties::parse(&entry.properties)?;
        self.capacity = entry.capacity;
        self.current_count = entry.current_count.min(entry.capacity.max(1));
        self.apply_properties(props);
        Ok(())
    }

    /// Overwrite fields present in `props`.
    pub fn apply_properties(&mut self, props: SessionProperties) {
        if let Some(name) = props.name {
            self.name = name;
        }
        if let Some(waves) = props.waves {
            self.waves = waves;
        }
        if let Some(status) = props.status {
            self.status = status;
        }
        if let Some(owner) = props.owner {
            self.owner = owner;
        }
        if let Some(region) = props.region {
            self.region = region;
        }
    }

    /// Property bag advertised for this session.
    pub fn to_properties(&self) -> PropertyBag {
        SessionProperties {
            name: Some(self.name.clone()),
            waves: Some(self.waves),
            status: Some(self.status),
            owner: Some(self.owner.clone()),
            region: Some(self.region.clone()),
        }
        .to_bag()
    }

    /// Count a newly connected participant. Never exceeds capacity.
    pub fn participant_joined(&mut self) {
        if self.capacity == 0 || self.current_count < self.capacity {
            self.current_count = self.current_count.saturating_add(1);
        }
    }

    /// Count a departed participant.
    pub fn participant_left(&mut self) {
        self.current_count = self.current_count.saturating_sub(1);
    }
}

// =============================================================================
// PARTICIPANTS
// =============================================================================

/// A participant connected to the active session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    /// Participant identity.
    pub id: ParticipantId,
    /// Owns the canonical simulation. True for exactly one participant.
    pub is_authority: bool,
    /// Ready to start.
    pub ready: bool,
}

impl ParticipantRecord {
    /// The session host.
    pub fn host(id: ParticipantId) -> Self {
        Self {
            id,
            is_authority: true,
            ready: false,
        }
    }

    /// A non-authoritative participant.
    pub fn guest(id: ParticipantId) -> Self {
        Self {
            id,
            is_authority: false,
            ready: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::property::{keys, PropertyValue};
    use crate::core::settings::WaveSetting;

    fn arena_config() -> SessionConfiguration {
        SessionConfiguration::new("Arena", 4, WaveSetting::Count(10), true)
    }

    #[test]
    fn test_hosted_descriptor_starts_waiting() {
        let descriptor = SessionDescriptor::hosted(
            SessionId::new("S-1"),
            &arena_config(),
            WaveCount::finite(10).unwrap(),
            ParticipantId::new("host"),
            "eu",
        );
        assert_eq!(descriptor.current_count, 1);
        assert_eq!(descriptor.status, SessionStatus::Waiting);
        assert_eq!(descriptor.capacity, 4);
    }

    #[test]
    fn test_participant_count_clamped_to_capacity() {
        let mut descriptor = SessionDescriptor::hosted(
            SessionId::new("S-1"),
            &SessionConfiguration::new("Duel", 2, WaveSetting::Unbounded, true),
            WaveCount::Unbounded,
            ParticipantId::new("host"),
            "eu",
        );
        descriptor.participant_joined();
        descriptor.participant_joined();
        assert_eq!(descriptor.current_count, 2);

        descriptor.participant_left();
        descriptor.participant_left();
        descriptor.participant_left();
        assert_eq!(descriptor.current_count, 0);
    }

    #[test]
    fn test_properties_roundtrip_through_descriptor() {
        let hosted = SessionDescriptor::hosted(
            SessionId::new("S-7"),
            &arena_config(),
            WaveCount::Unbounded,
            ParticipantId::new("host"),
            "us-east",
        );
        let entry = DiscoveredSession {
            id: hosted.id.clone(),
            capacity: 4,
            current_count: 1,
            is_open: true,
            is_visible: true,
            properties: hosted.to_properties(),
        };

        assert_eq!(SessionDescriptor::from_discovered(&entry).unwrap(), hosted);
    }

    #[test]
    fn test_malformed_sync_leaves_descriptor_untouched() {
        let mut descriptor = SessionDescriptor::pending(SessionId::new("S-1"));
        let mut properties = PropertyBag::new();
        properties.insert(keys::NAME, PropertyValue::text("Arena"));
        properties.insert(keys::WAVES, PropertyValue::text("ten"));

        let entry = DiscoveredSession {
            id: SessionId::new("S-1"),
            capacity: 4,
            current_count: 2,
            is_open: true,
            is_visible: true,
            properties,
        };

        assert!(descriptor.apply_sync(&entry).is_err());
        assert_eq!(descriptor, SessionDescriptor::pending(SessionId::new("S-1")));
    }

    #[test]
    fn test_status_wire_names() {
        for status in [SessionStatus::Waiting, SessionStatus::InProgress, SessionStatus::Ended] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SessionStatus::parse("lobby"), None);
    }
}
