//! Orchestrator Events
//!
//! Fan-out of lifecycle events to presentation and the game-state
//! coordinator. Publishing never blocks: a slow subscriber lags and loses
//! the oldest events instead of stalling the orchestrator.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::core::descriptor::{ParticipantRecord, SessionDescriptor, SessionId};

/// Events published by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    /// Hosting started; the local participant is the authority.
    SessionCreated {
        /// The new session.
        descriptor: SessionDescriptor,
    },
    /// Create was rejected or failed.
    CreationFailed {
        /// Human-readable cause.
        reason: String,
    },
    /// Joined a session; metadata follows as [`OrchestratorEvent::SessionUpdated`].
    SessionJoined {
        /// Joined session.
        session_id: SessionId,
    },
    /// Join was rejected or failed.
    JoinFailed {
        /// Human-readable cause.
        reason: String,
    },
    /// Session metadata changed.
    SessionUpdated {
        /// Current descriptor.
        descriptor: SessionDescriptor,
    },
    /// Directory listing refreshed.
    DirectoryUpdated {
        /// Open, visible sessions.
        sessions: Vec<SessionDescriptor>,
    },
    /// A participant connected.
    ParticipantJoined {
        /// The participant.
        record: ParticipantRecord,
    },
    /// A participant disconnected.
    ParticipantLeft {
        /// The participant.
        record: ParticipantRecord,
    },
    /// A participant's readiness changed.
    ParticipantUpdated {
        /// The participant.
        record: ParticipantRecord,
    },
    /// The game is starting; the transport is loading the scene.
    GameStarting,
    /// The transport finished the scene transition.
    SceneReady,
    /// Left the session deliberately.
    SessionLeft,
    /// The session was closed by the transport or the remote side.
    SessionEnded {
        /// Human-readable cause.
        reason: String,
    },
}

/// Broadcast publisher for [`OrchestratorEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    /// Create a bus that buffers up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: OrchestratorEvent) {
        debug!("Event: {:?}", event);
        let _ = self.tx.send(event);
    }

    /// Current subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
