//! Orchestrator Configuration

use std::time::Duration;

use crate::core::descriptor::ParticipantId;
use crate::DEFAULT_DISCOVERY_WINDOW_MS;

/// Runtime configuration for the orchestrator and its service task.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Local participant identity, advertised as owner when hosting.
    pub identity: ParticipantId,
    /// Region advertised for hosted sessions.
    pub region: String,
    /// How long a directory refresh waits for a discovery push.
    pub discovery_window: Duration,
    /// Per-subscriber event buffer.
    pub event_capacity: usize,
    /// Pending command buffer of the service task.
    pub command_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            identity: ParticipantId::new("player"),
            region: "local".to_string(),
            discovery_window: Duration::from_millis(DEFAULT_DISCOVERY_WINDOW_MS),
            event_capacity: 256,
            command_capacity: 64,
        }
    }
}

impl OrchestratorConfig {
    /// Create config from environment variables, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            identity: std::env::var("SESSION_PLAYER_NAME")
                .ok()
                .filter(|name| !name.trim().is_empty())
                .map(ParticipantId::new)
                .unwrap_or(defaults.identity),
            region: std::env::var("SESSION_REGION").unwrap_or(defaults.region),
            discovery_window: std::env::var("SESSION_DISCOVERY_WINDOW_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.discovery_window),
            event_capacity: std::env::var("SESSION_EVENT_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.event_capacity),
            command_capacity: defaults.command_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.identity, ParticipantId::new("player"));
        assert_eq!(config.discovery_window, Duration::from_millis(DEFAULT_DISCOVERY_WINDOW_MS));
        assert_eq!(config.event_capacity, 256);
    }
}
