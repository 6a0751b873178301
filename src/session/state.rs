//! Orchestrator State
//!
//! The lifecycle enum and the connection link it guards. The link is a tagged
//! union so a browse connection and an active session can never be held at
//! the same time.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::descriptor::{ParticipantId, ParticipantRecord, SessionDescriptor};
use crate::network::directory::SessionDirectoryClient;
use crate::network::transport::ConnectionHandle;

/// Lifecycle state of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OrchestratorState {
    /// No session.
    #[default]
    Idle,
    /// Host start in flight.
    CreatingSession,
    /// In a session lobby.
    InWaitingRoom,
    /// Game running.
    InGame,
    /// Client start in flight.
    JoiningSession,
    /// Tearing down the active connection.
    Leaving,
}

impl OrchestratorState {
    /// Whether a create or join is in flight.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::CreatingSession | Self::JoiningSession)
    }

    /// Whether an active session connection is held.
    pub fn in_session(self) -> bool {
        matches!(self, Self::InWaitingRoom | Self::InGame)
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::CreatingSession => "creating a session",
            Self::InWaitingRoom => "in the waiting room",
            Self::InGame => "in game",
            Self::JoiningSession => "joining a session",
            Self::Leaving => "leaving",
        };
        f.write_str(name)
    }
}

/// The session we host or joined.
#[derive(Debug)]
pub struct ActiveSession {
    /// Connection to release on leave.
    pub handle: ConnectionHandle,
    /// Session metadata.
    pub descriptor: SessionDescriptor,
    /// Whether the local participant is the authority.
    pub is_authority: bool,
    /// Known participants, the local one included.
    pub participants: BTreeMap<ParticipantId, ParticipantRecord>,
}

impl ActiveSession {
    /// Start tracking a session with the local participant's record.
    pub fn new(handle: ConnectionHandle, descriptor: SessionDescriptor, local: ParticipantRecord) -> Self {
        let is_authority = local.is_authority;
        let mut participants = BTreeMap::new();
        participants.insert(local.id.clone(), local);

        Self {
            handle,
            descriptor,
            is_authority,
            participants,
        }
    }

    /// Record a newly connected participant. Returns `None` if already known.
    pub fn add_participant(&mut self, id: ParticipantId) -> Option<ParticipantRecord> {
        if self.participants.contains_key(&id) {
            return None;
        }
        let record = ParticipantRecord::guest(id.clone());
        self.participants.insert(id, record.clone());
        self.descriptor.participant_joined();
        Some(record)
    }

    /// Forget a departed participant.
    pub fn remove_participant(&mut self, id: &ParticipantId) -> Option<ParticipantRecord> {
        let record = self.participants.remove(id)?;
        self.descriptor.participant_left();
        Some(record)
    }

    /// Align authority flags with the advertised owner. The owner's record is
    /// the only authority, and is added if not yet known. Does not touch the
    /// participant count, which comes from the sync itself.
    ///
    /// `is_authority` of the session itself is fixed by how it was started.
    pub fn sync_authority(&mut self) {
        let owner = self.descriptor.owner.clone();
        if owner.as_str().is_empty() {
            return;
        }
        for (id, record) in self.participants.iter_mut() {
            record.is_authority = *id == owner;
        }
        self.participants
            .entry(owner.clone())
            .or_insert_with(|| ParticipantRecord::host(owner));
    }
}

/// What the orchestrator is connected to.
pub enum Link {
    /// No connection.
    Detached,
    /// Browse-only directory connection.
    Browsing(SessionDirectoryClient),
    /// Active session connection.
    Active(ActiveSession),
}

impl Link {
    /// Handle of the active session, if any.
    pub fn active_handle(&self) -> Option<ConnectionHandle> {
        match self {
            Self::Active(active) => Some(active.handle),
            _ => None,
        }
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Detached => f.write_str("Detached"),
            Self::Browsing(directory) => write!(f, "Browsing({:?})", directory.handle()),
            Self::Active(active) => write!(f, "Active({})", active.handle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::descriptor::SessionId;
    use crate::network::transport::ConnectionId;

    fn joined() -> ActiveSession {
        ActiveSession::new(
            ConnectionHandle::ActiveSession(ConnectionId(1)),
            SessionDescriptor::pending(SessionId::new("S-1")),
            ParticipantRecord::guest(ParticipantId::new("me")),
        )
    }

    #[test]
    fn test_duplicate_join_ignored() {
        let mut active = joined();
        active.descriptor.capacity = 4;
        active.descriptor.current_count = 2;

        assert!(active.add_participant(ParticipantId::new("bob")).is_some());
        assert!(active.add_participant(ParticipantId::new("bob")).is_none());
        assert_eq!(active.descriptor.current_count, 3);
    }

    fn authorities(active: &ActiveSession) -> Vec<&str> {
        active
            .participants
            .values()
            .filter(|p| p.is_authority)
            .map(|p| p.id.as_str())
            .collect()
    }

    #[test]
    fn test_owner_added_once_as_authority() {
        let mut active = joined();
        active.descriptor.owner = ParticipantId::new("host");
        active.sync_authority();
        active.sync_authority();

        assert_eq!(authorities(&active), vec!["host"]);
        assert_eq!(active.participants.len(), 2);
        assert!(!active.is_authority);
    }

    #[test]
    fn test_owner_change_moves_authority() {
        let mut active = joined();
        active.descriptor.owner = ParticipantId::new("host");
        active.sync_authority();

        active.descriptor.owner = ParticipantId::new("host2");
        active.sync_authority();

        assert_eq!(authorities(&active), vec!["host2"]);
        assert!(active.participants.contains_key(&ParticipantId::new("host")));
    }

    #[test]
    fn test_owner_sharing_local_identity() {
        let mut active = ActiveSession::new(
            ConnectionHandle::ActiveSession(ConnectionId(1)),
            SessionDescriptor::pending(SessionId::new("S-1")),
            ParticipantRecord::guest(ParticipantId::new("player")),
        );
        active.descriptor.owner = ParticipantId::new("player");
        active.sync_authority();

        assert_eq!(authorities(&active), vec!["player"]);
        assert_eq!(active.participants.len(), 1);
        // Starting the game still requires having started as host.
        assert!(!active.is_authority);
    }

    #[test]
    fn test_unknown_participant_leave_ignored() {
        let mut active = joined();
        active.descriptor.current_count = 2;
        assert!(active.remove_participant(&ParticipantId::new("ghost")).is_none());
        assert_eq!(active.descriptor.current_count, 2);
    }
}
