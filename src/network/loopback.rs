//! Loopback Transport
//!
//! In-process [`ReplicationTransport`] that simulates a session directory and
//! the remote side of hosted/joined sessions. Used by the demo binary and the
//! test suites; failures can be injected and a start call can be held open to
//! exercise the in-flight rules of the orchestrator.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::debug;

use crate::core::descriptor::{DiscoveredSession, ParticipantId, SessionId};
use crate::core::property::PropertyBag;
use crate::network::transport::{
    ConnectionHandle, ConnectionId, DirectoryFeed, HostRequest, ReplicationTransport,
    TransportError, TransportEvent,
};

/// Reason attached to the shutdown callback of a deliberate teardown.
pub const LOCAL_SHUTDOWN_REASON: &str = "closed by local request";

/// An open active-session connection.
#[derive(Debug, Clone)]
struct SessionLink {
    session_id: SessionId,
    authority: bool,
}

#[derive(Default)]
struct LoopbackState {
    next_id: u64,
    listings: BTreeMap<SessionId, DiscoveredSession>,
    directories: BTreeMap<ConnectionId, mpsc::UnboundedSender<Vec<DiscoveredSession>>>,
    sessions: BTreeMap<ConnectionId, SessionLink>,
    shutdown_calls: BTreeMap<ConnectionHandle, usize>,
    start_calls: usize,
    directory_opens: usize,
    fail_next_start: Option<TransportError>,
    fail_directory: Option<TransportError>,
    fail_shutdown: bool,
    start_gate: Option<oneshot::Receiver<()>>,
}

impl LoopbackState {
    fn allocate(&mut self) -> ConnectionId {
        self.next_id += 1;
        ConnectionId(self.next_id)
    }

    fn snapshot(&self) -> Vec<DiscoveredSession> {
        self.listings.values().cloned().collect()
    }

    /// Push the full listing to every open directory, dropping closed feeds.
    fn push_discovery(&mut self) {
        let snapshot = self.snapshot();
        self.directories
            .retain(|_, tx| tx.send(snapshot.clone()).is_ok());
    }

    fn listing_for(&mut self, handle: ConnectionHandle) -> Option<&mut DiscoveredSession> {
        let link = self.sessions.get(&handle.id())?;
        self.listings.get_mut(&link.session_id)
    }
}

/// In-process transport.
pub struct LoopbackTransport {
    local: ParticipantId,
    state: Mutex<LoopbackState>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl LoopbackTransport {
    /// Create a transport for the local participant. The receiver carries the
    /// session callbacks and must be handed to the orchestrator owner.
    pub fn new(local: ParticipantId) -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            local,
            state: Mutex::new(LoopbackState::default()),
            events,
        });
        (transport, rx)
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    // =========================================================================
    // SIMULATION CONTROLS
    // =========================================================================

    /// Advertise a remote session and push the new listing.
    pub async fn publish(&self, entry: DiscoveredSession) {
        let mut state = self.state.lock().await;
        state.listings.insert(entry.id.clone(), entry);
        state.push_discovery();
    }

    /// Push the current listing to every open directory.
    pub async fn push_discovery(&self) {
        self.state.lock().await.push_discovery();
    }

    /// Make the next host/client start fail.
    pub async fn fail_next_start(&self, error: TransportError) {
        self.state.lock().await.fail_next_start = Some(error);
    }

    /// Make directory opens fail until cleared with `None`.
    pub async fn fail_directory(&self, error: Option<TransportError>) {
        self.state.lock().await.fail_directory = error;
    }

    /// Make shutdown calls report failure (the connection stays registered).
    pub async fn fail_shutdown(&self, fail: bool) {
        self.state.lock().await.fail_shutdown = fail;
    }

    /// Hold the next start call until the returned sender fires or is dropped.
    pub async fn hold_next_start(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.state.lock().await.start_gate = Some(rx);
        tx
    }

    /// Simulate a remote participant joining the session on `handle`.
    pub async fn remote_join(&self, handle: ConnectionHandle, participant: ParticipantId) {
        if let Some(entry) = self.state.lock().await.listing_for(handle) {
            entry.current_count = entry.current_count.saturating_add(1).min(entry.capacity);
        }
        self.emit(TransportEvent::ParticipantJoined { handle, participant });
    }

    /// Simulate a remote participant leaving the session on `handle`.
    pub async fn remote_leave(&self, handle: ConnectionHandle, participant: ParticipantId) {
        if let Some(entry) = self.state.lock().await.listing_for(handle) {
            entry.current_count = entry.current_count.saturating_sub(1);
        }
        self.emit(TransportEvent::ParticipantLeft { handle, participant });
    }

    /// Simulate a remote readiness change.
    pub fn remote_ready(&self, handle: ConnectionHandle, participant: ParticipantId, ready: bool) {
        self.emit(TransportEvent::ReadinessChanged {
            handle,
            participant,
            ready,
        });
    }

    /// Re-send the session metadata for `handle`.
    pub async fn sync(&self, handle: ConnectionHandle) {
        let entry = self.state.lock().await.listing_for(handle).cloned();
        if let Some(session) = entry {
            self.emit(TransportEvent::SessionSynced { handle, session });
        }
    }

    /// Merge properties into a listing as if the remote authority updated them.
    pub async fn remote_update(&self, session_id: &SessionId, properties: PropertyBag) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.listings.get_mut(session_id) {
            for (key, value) in properties.iter() {
                entry.properties.insert(key.clone(), value.clone());
            }
        }
        state.push_discovery();
    }

    /// Close every directory feed from the remote side.
    pub async fn drop_directories(&self) {
        self.state.lock().await.directories.clear();
    }

    /// Drop a connection from the remote side.
    pub async fn drop_connection(&self, handle: ConnectionHandle, reason: &str) {
        self.state.lock().await.sessions.remove(&handle.id());
        self.emit(TransportEvent::Shutdown {
            handle,
            reason: reason.to_string(),
        });
    }

    /// Raw callback injection.
    pub fn inject(&self, event: TransportEvent) {
        self.emit(event);
    }

    // =========================================================================
    // INSPECTION
    // =========================================================================

    /// Number of host/client start calls made.
    pub async fn start_calls(&self) -> usize {
        self.state.lock().await.start_calls
    }

    /// Number of directory opens attempted.
    pub async fn directory_opens(&self) -> usize {
        self.state.lock().await.directory_opens
    }

    /// Number of directories currently open.
    pub async fn open_directories(&self) -> usize {
        self.state.lock().await.directories.len()
    }

    /// Number of open active-session connections.
    pub async fn open_sessions(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    /// Number of shutdown calls made for `handle`.
    pub async fn shutdown_calls(&self, handle: ConnectionHandle) -> usize {
        self.state
            .lock()
            .await
            .shutdown_calls
            .get(&handle)
            .copied()
            .unwrap_or(0)
    }

    /// Listing entry for a session.
    pub async fn listing(&self, session_id: &SessionId) -> Option<DiscoveredSession> {
        self.state.lock().await.listings.get(session_id).cloned()
    }

    /// Handle of the most recently opened active-session connection.
    pub async fn last_session_handle(&self) -> Option<ConnectionHandle> {
        self.state
            .lock()
            .await
            .sessions
            .keys()
            .next_back()
            .map(|id| ConnectionHandle::ActiveSession(*id))
    }

    /// Count a start call and take the gate, if one is set.
    async fn enter_start(&self) {
        let gate = {
            let mut state = self.state.lock().await;
            state.start_calls += 1;
            state.start_gate.take()
        };
        if let Some(gate) = gate {
            let _ = gate.await;
        }
    }
}

#[async_trait]
impl ReplicationTransport for LoopbackTransport {
    async fn open_directory(&self) -> Result<DirectoryFeed, TransportError> {
        let mut state = self.state.lock().await;
        state.directory_opens += 1;
        if let Some(err) = state.fail_directory.clone() {
            return Err(err);
        }

        let id = state.allocate();
        let (tx, updates) = mpsc::unbounded_channel();
        let _ = tx.send(state.snapshot());
        state.directories.insert(id, tx);
        debug!("Loopback directory {} opened", id.0);

        Ok(DirectoryFeed {
            handle: ConnectionHandle::Directory(id),
            updates,
        })
    }

    async fn start_as_host(&self, request: HostRequest) -> Result<ConnectionHandle, TransportError> {
        self.enter_start().await;

        let mut state = self.state.lock().await;
        if let Some(err) = state.fail_next_start.take() {
            return Err(err);
        }
        if state.listings.contains_key(&request.session_id) {
            return Err(TransportError::Remote("session id already in use".into()));
        }

        let id = state.allocate();
        state.listings.insert(
            request.session_id.clone(),
            DiscoveredSession {
                id: request.session_id.clone(),
                capacity: request.capacity,
                current_count: 1,
                is_open: true,
                is_visible: request.visible,
                properties: request.properties,
            },
        );
        state.sessions.insert(
            id,
            SessionLink {
                session_id: request.session_id,
                authority: true,
            },
        );
        state.push_discovery();

        Ok(ConnectionHandle::ActiveSession(id))
    }

    async fn start_as_client(&self, session_id: SessionId) -> Result<ConnectionHandle, TransportError> {
        self.enter_start().await;

        let mut state = self.state.lock().await;
        if let Some(err) = state.fail_next_start.take() {
            return Err(err);
        }

        let Some(entry) = state.listings.get_mut(&session_id) else {
            return Err(TransportError::Remote(format!("session {} not found", session_id)));
        };
        if !entry.is_open {
            return Err(TransportError::Remote("session is not accepting participants".into()));
        }
        if entry.current_count >= entry.capacity {
            return Err(TransportError::Remote("session is full".into()));
        }
        entry.current_count += 1;
        let session = entry.clone();

        let id = state.allocate();
        state.sessions.insert(
            id,
            SessionLink {
                session_id,
                authority: false,
            },
        );
        state.push_discovery();

        let handle = ConnectionHandle::ActiveSession(id);
        self.emit(TransportEvent::SessionSynced { handle, session });
        Ok(handle)
    }

    async fn shutdown(&self, handle: ConnectionHandle) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        *state.shutdown_calls.entry(handle).or_default() += 1;
        if state.fail_shutdown {
            return Err(TransportError::Remote("teardown failed".into()));
        }

        match handle {
            ConnectionHandle::Directory(id) => {
                state.directories.remove(&id);
            }
            ConnectionHandle::ActiveSession(id) => {
                let Some(link) = state.sessions.remove(&id) else {
                    return Ok(());
                };
                if link.authority {
                    state.listings.remove(&link.session_id);
                } else if let Some(entry) = state.listings.get_mut(&link.session_id) {
                    entry.current_count = entry.current_count.saturating_sub(1);
                }
                state.push_discovery();
                self.emit(TransportEvent::Shutdown {
                    handle,
                    reason: LOCAL_SHUTDOWN_REASON.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn begin_scene_transition(&self, handle: ConnectionHandle) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        match state.sessions.get(&handle.id()) {
            Some(link) if link.authority => {}
            Some(_) => return Err(TransportError::Remote("only the authority can change scenes".into())),
            None => return Err(TransportError::Remote("unknown connection".into())),
        }
        if let Some(entry) = state.listing_for(handle) {
            entry.is_open = false;
        }
        state.push_discovery();
        self.emit(TransportEvent::SceneReady { handle });
        Ok(())
    }

    async fn update_properties(
        &self,
        handle: ConnectionHandle,
        properties: PropertyBag,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if !state.sessions.get(&handle.id()).is_some_and(|link| link.authority) {
            return Err(TransportError::Remote("only the authority can update properties".into()));
        }
        if let Some(entry) = state.listing_for(handle) {
            for (key, value) in properties.iter() {
                entry.properties.insert(key.clone(), value.clone());
            }
        }
        state.push_discovery();
        Ok(())
    }

    async fn set_ready(&self, handle: ConnectionHandle, ready: bool) -> Result<(), TransportError> {
        if !self.state.lock().await.sessions.contains_key(&handle.id()) {
            return Err(TransportError::Remote("unknown connection".into()));
        }
        self.emit(TransportEvent::ReadinessChanged {
            handle,
            participant: self.local.clone(),
            ready,
        });
        Ok(())
    }
}
