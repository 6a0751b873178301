//! Replication Transport Seam
//!
//! The orchestrator directs a replication transport but does not implement
//! one. Everything it needs from the transport is expressed here: connection
//! commands on [`ReplicationTransport`], and callbacks as [`TransportEvent`]
//! values delivered on a channel the orchestrator owner drains.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::descriptor::{DiscoveredSession, ParticipantId, SessionId};
use crate::core::property::PropertyBag;

// =============================================================================
// HANDLES
// =============================================================================

/// Transport-assigned connection number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

/// A live transport connection, tagged by purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionHandle {
    /// Browse-only connection used for discovery.
    Directory(ConnectionId),
    /// Connection to the session we host or joined.
    ActiveSession(ConnectionId),
}

impl ConnectionHandle {
    /// Underlying connection number.
    pub fn id(self) -> ConnectionId {
        match self {
            Self::Directory(id) | Self::ActiveSession(id) => id,
        }
    }

    /// Whether this is an active-session connection.
    pub fn is_active_session(self) -> bool {
        matches!(self, Self::ActiveSession(_))
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory(id) => write!(f, "directory#{}", id.0),
            Self::ActiveSession(id) => write!(f, "session#{}", id.0),
        }
    }
}

// =============================================================================
// REQUESTS / FEEDS
// =============================================================================

/// Parameters for starting a connection as session authority.
#[derive(Debug, Clone)]
pub struct HostRequest {
    /// Identifier for the new session.
    pub session_id: SessionId,
    /// Metadata advertised with the session.
    pub properties: PropertyBag,
    /// Maximum participants.
    pub capacity: u8,
    /// Listed in the directory.
    pub visible: bool,
}

/// An open directory connection and its discovery pushes.
///
/// Each push is a complete listing, not a delta.
#[derive(Debug)]
pub struct DirectoryFeed {
    /// Handle to release with [`ReplicationTransport::shutdown`].
    pub handle: ConnectionHandle,
    /// Discovery pushes.
    pub updates: mpsc::UnboundedReceiver<Vec<DiscoveredSession>>,
}

// =============================================================================
// CALLBACKS
// =============================================================================

/// Callbacks delivered by the transport for active-session connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A remote participant connected.
    ParticipantJoined {
        /// Connection the event belongs to.
        handle: ConnectionHandle,
        /// Who joined.
        participant: ParticipantId,
    },
    /// A remote participant disconnected.
    ParticipantLeft {
        /// Connection the event belongs to.
        handle: ConnectionHandle,
        /// Who left.
        participant: ParticipantId,
    },
    /// A participant changed readiness.
    ReadinessChanged {
        /// Connection the event belongs to.
        handle: ConnectionHandle,
        /// Whose readiness changed.
        participant: ParticipantId,
        /// New readiness.
        ready: bool,
    },
    /// Session metadata synced from the authority.
    SessionSynced {
        /// Connection the event belongs to.
        handle: ConnectionHandle,
        /// Current session record.
        session: DiscoveredSession,
    },
    /// Scene transition handshake finished.
    SceneReady {
        /// Connection the event belongs to.
        handle: ConnectionHandle,
    },
    /// The connection was closed, locally or remotely.
    Shutdown {
        /// Connection the event belongs to.
        handle: ConnectionHandle,
        /// Reason reported by the transport.
        reason: String,
    },
}

impl TransportEvent {
    /// Connection the event belongs to.
    pub fn handle(&self) -> ConnectionHandle {
        match self {
            Self::ParticipantJoined { handle, .. }
            | Self::ParticipantLeft { handle, .. }
            | Self::ReadinessChanged { handle, .. }
            | Self::SessionSynced { handle, .. }
            | Self::SceneReady { handle }
            | Self::Shutdown { handle, .. } => *handle,
        }
    }
}

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The local connection object could not be constructed.
    #[error("connection setup failed: {0}")]
    Create(String),

    /// The remote side reported a failure.
    #[error("{0}")]
    Remote(String),
}

// =============================================================================
// TRANSPORT
// =============================================================================

/// The replication transport, as seen by the orchestrator.
#[async_trait]
pub trait ReplicationTransport: Send + Sync {
    /// Open a browse-only connection.
    async fn open_directory(&self) -> Result<DirectoryFeed, TransportError>;

    /// Start a new session as its authority.
    async fn start_as_host(&self, request: HostRequest) -> Result<ConnectionHandle, TransportError>;

    /// Join an existing session as a participant.
    async fn start_as_client(&self, session_id: SessionId) -> Result<ConnectionHandle, TransportError>;

    /// Close a connection. Closing an already closed handle succeeds.
    async fn shutdown(&self, handle: ConnectionHandle) -> Result<(), TransportError>;

    /// Hand the scene/level transition to the transport's own handshake.
    /// Completion is reported with [`TransportEvent::SceneReady`].
    async fn begin_scene_transition(&self, handle: ConnectionHandle) -> Result<(), TransportError>;

    /// Merge properties into the advertised session metadata (authority only).
    async fn update_properties(
        &self,
        handle: ConnectionHandle,
        properties: PropertyBag,
    ) -> Result<(), TransportError>;

    /// Publish local readiness.
    async fn set_ready(&self, handle: ConnectionHandle, ready: bool) -> Result<(), TransportError>;
}
