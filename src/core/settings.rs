//! Session Creation Settings
//!
//! Validated input for hosting a session. Validation runs before any
//! transport call is made.

use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{MAX_CAPACITY, MAX_NAME_LEN, MIN_CAPACITY, MIN_NAME_LEN};

// =============================================================================
// WAVES
// =============================================================================

/// Wave count requested by the host, before validation.
///
/// `Count(0)` is representable here so it can be rejected by validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveSetting {
    /// Endless mode.
    Unbounded,
    /// Fixed number of waves.
    Count(u32),
}

/// Validated wave configuration of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveCount {
    /// A fixed, positive number of waves.
    Finite(NonZeroU32),
    /// Waves never run out.
    Unbounded,
}

impl WaveCount {
    /// Wire value for unbounded waves in the property bag.
    pub const UNBOUNDED_WIRE: i64 = 0;

    /// Build a finite count. Returns `None` for zero.
    pub fn finite(count: u32) -> Option<Self> {
        NonZeroU32::new(count).map(Self::Finite)
    }

    /// Encode for the property bag.
    pub fn to_wire(self) -> i64 {
        match self {
            Self::Finite(n) => i64::from(n.get()),
            Self::Unbounded => Self::UNBOUNDED_WIRE,
        }
    }

    /// Decode from the property bag. Negative or oversized values are rejected.
    pub fn from_wire(value: i64) -> Option<Self> {
        if value == Self::UNBOUNDED_WIRE {
            return Some(Self::Unbounded);
        }
        u32::try_from(value).ok().and_then(Self::finite)
    }

    /// Whether `wave` lies past the configured final wave.
    #[inline]
    pub fn is_exceeded_by(self, wave: u32) -> bool {
        match self {
            Self::Finite(n) => wave > n.get(),
            Self::Unbounded => false,
        }
    }
}

impl TryFrom<WaveSetting> for WaveCount {
    type Error = ValidationError;

    fn try_from(setting: WaveSetting) -> Result<Self, Self::Error> {
        match setting {
            WaveSetting::Unbounded => Ok(Self::Unbounded),
            WaveSetting::Count(n) => Self::finite(n).ok_or(ValidationError::WaveCount(n)),
        }
    }
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Input for `CreateSession`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfiguration {
    /// Display name shown in the directory.
    pub name: String,
    /// Maximum participants, host included.
    pub capacity: u8,
    /// Wave configuration.
    pub waves: WaveSetting,
    /// Whether the session is listed in the directory.
    pub visible: bool,
}

impl SessionConfiguration {
    /// Create a configuration. Call [`validate`](Self::validate) before use.
    pub fn new(name: impl Into<String>, capacity: u8, waves: WaveSetting, visible: bool) -> Self {
        Self {
            name: name.into(),
            capacity,
            waves,
            visible,
        }
    }

    /// Check every field against the allowed ranges.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let len = self.name.chars().count();
        if !(MIN_NAME_LEN..=MAX_NAME_LEN).contains(&len) {
            return Err(ValidationError::NameLength(len));
        }

        if !(MIN_CAPACITY..=MAX_CAPACITY).contains(&self.capacity) {
            return Err(ValidationError::Capacity(self.capacity));
        }

        self.wave_count().map(|_| ())
    }

    /// Validated wave count.
    pub fn wave_count(&self) -> Result<WaveCount, ValidationError> {
        WaveCount::try_from(self.waves)
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Name length is outside the allowed range.
    #[error("session name must be {min}-{max} characters, got {0}", min = MIN_NAME_LEN, max = MAX_NAME_LEN)]
    NameLength(usize),

    /// Capacity is outside the allowed range.
    #[error("capacity must be between {min} and {max}, got {0}", min = MIN_CAPACITY, max = MAX_CAPACITY)]
    Capacity(u8),

    /// A finite wave count must be at least one.
    #[error("wave count must be at least 1 or unbounded, got {0}")]
    WaveCount(u32),
}
