//! Session Orchestrator
//!
//! Lifecycle state machine for discovering, creating, joining, starting and
//! leaving sessions. It owns at most one active-session connection, decides
//! authority, and resolves every failure back to `Idle`.
//!
//! Create and join are split into `begin_*` (guards, validation, builds the
//! transport future) and [`SessionOrchestrator::resolve`] (applies the
//! outcome). The service task polls the future between the two, so commands
//! and callbacks keep flowing while a start is in flight. Direct callers use
//! [`SessionOrchestrator::create_session`] / [`SessionOrchestrator::join_session`].
//!
//! Callbacks for connections that are not the live active session are stale
//! and ignored, except while a start is in flight: those are held back and
//! replayed once the start resolves.

use std::future::Future;
use std::mem;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::config::OrchestratorConfig;
use crate::core::descriptor::{
    DiscoveredSession, ParticipantId, ParticipantRecord, SessionDescriptor, SessionId, SessionStatus,
};
use crate::core::property::SessionProperties;
use crate::core::settings::SessionConfiguration;
use crate::network::directory::{DirectorySnapshot, SessionDirectoryClient};
use crate::network::transport::{
    ConnectionHandle, HostRequest, ReplicationTransport, TransportError, TransportEvent,
};
use crate::session::error::OrchestratorError;
use crate::session::events::{EventBus, OrchestratorEvent};
use crate::session::state::{ActiveSession, Link, OrchestratorState};

/// An in-flight host/client start.
pub type StartFuture = BoxFuture<'static, Result<ConnectionHandle, TransportError>>;

/// Context kept while a start is in flight.
#[derive(Debug)]
enum InFlight {
    Create { descriptor: SessionDescriptor },
    Join { session_id: SessionId },
}

/// The session lifecycle state machine.
pub struct SessionOrchestrator {
    config: OrchestratorConfig,
    transport: Arc<dyn ReplicationTransport>,
    state: OrchestratorState,
    link: Link,
    in_flight: Option<InFlight>,
    leave_requested: bool,
    deferred: Vec<TransportEvent>,
    events: EventBus,
}

impl SessionOrchestrator {
    /// Create an idle orchestrator.
    pub fn new(config: OrchestratorConfig, transport: Arc<dyn ReplicationTransport>) -> Self {
        let events = EventBus::new(config.event_capacity);
        Self {
            config,
            transport,
            state: OrchestratorState::Idle,
            link: Link::Detached,
            in_flight: None,
            leave_requested: false,
            deferred: Vec::new(),
            events,
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Current lifecycle state.
    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Configuration in use.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Event bus.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    /// Whether the local participant is the authority of the active session.
    pub fn is_authority(&self) -> bool {
        matches!(&self.link, Link::Active(active) if active.is_authority)
    }

    /// Descriptor of the active session.
    pub fn descriptor(&self) -> Option<&SessionDescriptor> {
        match &self.link {
            Link::Active(active) => Some(&active.descriptor),
            _ => None,
        }
    }

    /// Participants of the active session, ordered by identity.
    pub fn participants(&self) -> Vec<ParticipantRecord> {
        match &self.link {
            Link::Active(active) => active.participants.values().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Handle of the active session connection.
    pub fn active_handle(&self) -> Option<ConnectionHandle> {
        self.link.active_handle()
    }

    /// Handle of the browse connection.
    pub fn directory_handle(&self) -> Option<ConnectionHandle> {
        match &self.link {
            Link::Browsing(directory) => directory.handle(),
            _ => None,
        }
    }

    /// Whether a leave is waiting for the in-flight start to resolve.
    pub fn leave_pending(&self) -> bool {
        self.leave_requested
    }

    fn set_state(&mut self, next: OrchestratorState) {
        if self.state != next {
            debug!("State {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    // =========================================================================
    // CREATE / JOIN
    // =========================================================================

    /// Host a new session.
    pub async fn create_session(&mut self, config: SessionConfiguration) -> Result<(), OrchestratorError> {
        let start = self.begin_create(config)?;
        let outcome = start.await;
        self.resolve(outcome).await
    }

    /// Join an existing session.
    pub async fn join_session(&mut self, session_id: SessionId) -> Result<(), OrchestratorError> {
        let start = self.begin_join(session_id)?;
        let outcome = start.await;
        self.resolve(outcome).await
    }

    /// Validate, move to `CreatingSession` and return the transport start.
    /// The returned future also releases the browse connection, if any.
    pub fn begin_create(&mut self, config: SessionConfiguration) -> Result<StartFuture, OrchestratorError> {
        if self.state != OrchestratorState::Idle {
            return Err(self.reject_create(OrchestratorError::AlreadyInSession));
        }
        let waves = match config.validate().and_then(|_| config.wave_count()) {
            Ok(waves) => waves,
            Err(e) => return Err(self.reject_create(e.into())),
        };

        let descriptor = SessionDescriptor::hosted(
            SessionId::generate(),
            &config,
            waves,
            self.config.identity.clone(),
            self.config.region.clone(),
        );
        let request = HostRequest {
            session_id: descriptor.id.clone(),
            properties: descriptor.to_properties(),
            capacity: config.capacity,
            visible: config.visible,
        };
        info!("Creating session '{}' ({})", descriptor.name, descriptor.id);
        if let Ok(json) = request.properties.to_json() {
            debug!("Advertising properties {}", json);
        }

        let directory = self.detach_directory();
        self.set_state(OrchestratorState::CreatingSession);
        self.in_flight = Some(InFlight::Create { descriptor });

        let transport = self.transport.clone();
        Ok(guard_start(async move {
            release_directory(transport.as_ref(), directory).await;
            transport.start_as_host(request).await
        }))
    }

    /// Move to `JoiningSession` and return the transport start.
    pub fn begin_join(&mut self, session_id: SessionId) -> Result<StartFuture, OrchestratorError> {
        if self.state != OrchestratorState::Idle {
            let err = OrchestratorError::AlreadyInSession;
            warn!("Join of {} rejected: {}", session_id, err);
            self.events.publish(OrchestratorEvent::JoinFailed {
                reason: err.to_string(),
            });
            return Err(err);
        }
        info!("Joining session {}", session_id);

        let directory = self.detach_directory();
        self.set_state(OrchestratorState::JoiningSession);
        self.in_flight = Some(InFlight::Join {
            session_id: session_id.clone(),
        });

        let transport = self.transport.clone();
        Ok(guard_start(async move {
            release_directory(transport.as_ref(), directory).await;
            transport.start_as_client(session_id).await
        }))
    }

    fn reject_create(&self, err: OrchestratorError) -> OrchestratorError {
        warn!("Create rejected: {}", err);
        self.events.publish(OrchestratorEvent::CreationFailed {
            reason: err.to_string(),
        });
        err
    }

    fn detach_directory(&mut self) -> Option<ConnectionHandle> {
        match mem::replace(&mut self.link, Link::Detached) {
            Link::Browsing(mut directory) => directory.detach(),
            Link::Active(active) => {
                self.link = Link::Active(active);
                None
            }
            Link::Detached => None,
        }
    }

    /// Apply the outcome of the in-flight start.
    ///
    /// Success enters the waiting room; failure returns to `Idle`. A shutdown
    /// callback for the new connection that arrived while the start was in
    /// flight turns success into failure. A leave requested meanwhile is
    /// carried out right after.
    #[instrument(skip(self, outcome))]
    pub async fn resolve(
        &mut self,
        outcome: Result<ConnectionHandle, TransportError>,
    ) -> Result<(), OrchestratorError> {
        let Some(in_flight) = self.in_flight.take() else {
            warn!("Start resolved with nothing in flight");
            return Err(OrchestratorError::InvalidState(self.state));
        };
        let outcome = outcome.and_then(|handle| match self.take_deferred_shutdown(handle) {
            Some(reason) => Err(TransportError::Remote(reason)),
            None => Ok(handle),
        });

        let result = match (in_flight, outcome) {
            (InFlight::Create { descriptor }, Ok(handle)) => {
                info!("Session {} created on {}", descriptor.id, handle);
                let local = ParticipantRecord::host(self.config.identity.clone());
                self.link = Link::Active(ActiveSession::new(handle, descriptor.clone(), local));
                self.set_state(OrchestratorState::InWaitingRoom);
                self.events.publish(OrchestratorEvent::SessionCreated { descriptor });
                Ok(())
            }
            (InFlight::Create { descriptor }, Err(e)) => {
                let err = OrchestratorError::from(e);
                warn!("Creating session {} failed: {}", descriptor.id, err);
                self.set_state(OrchestratorState::Idle);
                self.events.publish(OrchestratorEvent::CreationFailed {
                    reason: err.to_string(),
                });
                Err(err)
            }
            (InFlight::Join { session_id }, Ok(handle)) => {
                info!("Joined session {} on {}", session_id, handle);
                let local = ParticipantRecord::guest(self.config.identity.clone());
                let descriptor = SessionDescriptor::pending(session_id.clone());
                self.link = Link::Active(ActiveSession::new(handle, descriptor, local));
                self.set_state(OrchestratorState::InWaitingRoom);
                self.events.publish(OrchestratorEvent::SessionJoined { session_id });
                Ok(())
            }
            (InFlight::Join { session_id }, Err(e)) => {
                let err = OrchestratorError::from(e);
                warn!("Joining session {} failed: {}", session_id, err);
                self.set_state(OrchestratorState::Idle);
                self.events.publish(OrchestratorEvent::JoinFailed {
                    reason: err.to_string(),
                });
                Err(err)
            }
        };

        for event in mem::take(&mut self.deferred) {
            self.handle_transport_event(event);
        }

        if mem::take(&mut self.leave_requested) && self.state.in_session() {
            info!("Carrying out leave requested during start");
            self.leave_session().await;
        }

        result
    }

    fn take_deferred_shutdown(&mut self, handle: ConnectionHandle) -> Option<String> {
        let index = self.deferred.iter().position(
            |event| matches!(event, TransportEvent::Shutdown { handle: h, .. } if *h == handle),
        )?;
        match self.deferred.remove(index) {
            TransportEvent::Shutdown { reason, .. } => Some(reason),
            _ => None,
        }
    }

    // =========================================================================
    // LEAVE
    // =========================================================================

    /// Leave the active session. Always ends `Idle`, even if teardown fails.
    ///
    /// A no-op from `Idle` or `Leaving`. While a start is in flight the leave
    /// is recorded and carried out once the start resolves.
    #[instrument(skip(self))]
    pub async fn leave_session(&mut self) {
        match self.state {
            OrchestratorState::Idle | OrchestratorState::Leaving => {
                debug!("Leave ignored while {}", self.state);
                return;
            }
            OrchestratorState::CreatingSession | OrchestratorState::JoiningSession => {
                if !self.leave_requested {
                    info!("Leave requested while {}, deferring until it resolves", self.state);
                }
                self.leave_requested = true;
                return;
            }
            OrchestratorState::InWaitingRoom | OrchestratorState::InGame => {}
        }

        self.set_state(OrchestratorState::Leaving);
        if let Link::Active(active) = mem::replace(&mut self.link, Link::Detached) {
            info!("Leaving session {}", active.descriptor.id);
            if let Err(e) = self.transport.shutdown(active.handle).await {
                warn!("Teardown of {} failed, dropping it anyway: {}", active.handle, e);
            }
        }
        self.set_state(OrchestratorState::Idle);
        self.events.publish(OrchestratorEvent::SessionLeft);
    }

    // =========================================================================
    // DIRECTORY
    // =========================================================================

    /// Refresh the directory listing and publish it. Never fails: an
    /// unavailable directory yields an empty listing.
    ///
    /// Only available while `Idle`; the browse connection may not coexist with
    /// a session.
    #[instrument(skip(self))]
    pub async fn refresh_directory(&mut self) -> DirectorySnapshot {
        if self.state != OrchestratorState::Idle {
            debug!("Directory refresh while {}, returning empty listing", self.state);
            self.events.publish(OrchestratorEvent::DirectoryUpdated { sessions: Vec::new() });
            return DirectorySnapshot::empty();
        }

        if !matches!(self.link, Link::Browsing(_)) {
            self.link = Link::Browsing(SessionDirectoryClient::new(
                self.transport.clone(),
                self.config.discovery_window,
            ));
        }
        let result = match &mut self.link {
            Link::Browsing(directory) => directory.refresh().await,
            _ => Ok(DirectorySnapshot::empty()),
        };

        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("{}", OrchestratorError::DirectoryUnavailable(e.to_string()));
                self.close_directory().await;
                DirectorySnapshot::empty()
            }
        };

        self.events.publish(OrchestratorEvent::DirectoryUpdated {
            sessions: snapshot.sessions.clone(),
        });
        snapshot
    }

    /// Close the browse connection, if open.
    pub async fn close_directory(&mut self) {
        if !matches!(self.link, Link::Browsing(_)) {
            return;
        }
        if let Link::Browsing(mut directory) = mem::replace(&mut self.link, Link::Detached) {
            directory.close().await;
        }
    }

    // =========================================================================
    // START / READY
    // =========================================================================

    /// Start the game. Host only; rejected without any state change or event
    /// when the caller lacks authority or there is no active session.
    #[instrument(skip(self))]
    pub async fn start_game(&mut self) -> Result<(), OrchestratorError> {
        let (handle, session_id) = match &self.link {
            Link::Active(active) if !active.is_authority => {
                debug!("Start rejected: not the host of {}", active.descriptor.id);
                return Err(OrchestratorError::NotAuthority);
            }
            Link::Active(active) => (active.handle, active.descriptor.id.clone()),
            _ => {
                debug!("Start rejected: no active session");
                return Err(OrchestratorError::NoActiveSession);
            }
        };
        if self.state != OrchestratorState::InWaitingRoom {
            debug!("Start rejected while {}", self.state);
            return Err(OrchestratorError::InvalidState(self.state));
        }

        if let Err(e) = self.transport.begin_scene_transition(handle).await {
            warn!("Scene transition for {} failed: {}", session_id, e);
            return Err(e.into());
        }

        if let Link::Active(active) = &mut self.link {
            active.descriptor.status = SessionStatus::InProgress;
        }
        let status = SessionProperties::status_only(SessionStatus::InProgress).to_bag();
        if let Err(e) = self.transport.update_properties(handle, status).await {
            warn!("Publishing in-progress status for {} failed: {}", session_id, e);
        }

        self.set_state(OrchestratorState::InGame);
        info!("Game starting in session {}", session_id);
        self.events.publish(OrchestratorEvent::GameStarting);
        Ok(())
    }

    /// Advertise `status = ended` once the game is over. Host only, and only
    /// while in game; the session stays up until participants leave.
    #[instrument(skip(self))]
    pub async fn end_game(&mut self) -> Result<(), OrchestratorError> {
        let handle = match &self.link {
            Link::Active(active) if !active.is_authority => return Err(OrchestratorError::NotAuthority),
            Link::Active(active) => active.handle,
            _ => return Err(OrchestratorError::NoActiveSession),
        };
        if self.state != OrchestratorState::InGame {
            return Err(OrchestratorError::InvalidState(self.state));
        }

        let status = SessionProperties::status_only(SessionStatus::Ended).to_bag();
        if let Err(e) = self.transport.update_properties(handle, status).await {
            warn!("Publishing ended status failed: {}", e);
            return Err(e.into());
        }

        let Link::Active(active) = &mut self.link else {
            return Err(OrchestratorError::NoActiveSession);
        };
        active.descriptor.status = SessionStatus::Ended;
        let descriptor = active.descriptor.clone();
        info!("Game over in session {}", descriptor.id);
        self.events.publish(OrchestratorEvent::SessionUpdated { descriptor });
        Ok(())
    }

    /// Publish local readiness. The local record changes when the transport
    /// echoes it back.
    pub async fn set_ready(&mut self, ready: bool) -> Result<(), OrchestratorError> {
        let handle = self.link.active_handle().ok_or(OrchestratorError::NoActiveSession)?;
        self.transport.set_ready(handle, ready).await?;
        Ok(())
    }

    /// Release every connection. Used when the owner shuts down.
    pub async fn close(&mut self) {
        self.leave_session().await;
        self.close_directory().await;
    }

    // =========================================================================
    // TRANSPORT CALLBACKS
    // =========================================================================

    /// Apply a transport callback. Safe to call with duplicate or late events.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        let handle = event.handle();
        if self.link.active_handle() != Some(handle) {
            if self.in_flight.is_some() && handle.is_active_session() {
                debug!("Holding {:?} until the pending start resolves", event);
                self.deferred.push(event);
            } else {
                debug!("Ignoring stale transport event {:?}", event);
            }
            return;
        }

        match event {
            TransportEvent::ParticipantJoined { participant, .. } => self.on_participant_joined(participant),
            TransportEvent::ParticipantLeft { participant, .. } => self.on_participant_left(&participant),
            TransportEvent::ReadinessChanged { participant, ready, .. } => {
                self.on_readiness_changed(&participant, ready)
            }
            TransportEvent::SessionSynced { session, .. } => self.on_session_synced(&session),
            TransportEvent::SceneReady { .. } => self.on_scene_ready(),
            TransportEvent::Shutdown { handle, reason } => self.on_shutdown(handle, reason),
        }
    }

    fn on_participant_joined(&mut self, participant: ParticipantId) {
        let Link::Active(active) = &mut self.link else {
            return;
        };
        match active.add_participant(participant) {
            Some(record) => {
                info!(
                    "{} joined session {} ({}/{})",
                    record.id, active.descriptor.id, active.descriptor.current_count, active.descriptor.capacity
                );
                self.events.publish(OrchestratorEvent::ParticipantJoined { record });
            }
            None => debug!("Duplicate join notification ignored"),
        }
    }

    fn on_participant_left(&mut self, participant: &ParticipantId) {
        let Link::Active(active) = &mut self.link else {
            return;
        };
        match active.remove_participant(participant) {
            Some(record) => {
                info!("{} left session {}", record.id, active.descriptor.id);
                self.events.publish(OrchestratorEvent::ParticipantLeft { record });
            }
            None => debug!("Leave notification for unknown participant {}", participant),
        }
    }

    fn on_readiness_changed(&mut self, participant: &ParticipantId, ready: bool) {
        let Link::Active(active) = &mut self.link else {
            return;
        };
        match active.participants.get_mut(participant) {
            Some(record) => {
                record.ready = ready;
                let record = record.clone();
                self.events.publish(OrchestratorEvent::ParticipantUpdated { record });
            }
            None => debug!("Readiness for unknown participant {}", participant),
        }
    }

    fn on_session_synced(&mut self, session: &DiscoveredSession) {
        let Link::Active(active) = &mut self.link else {
            return;
        };
        if session.id != active.descriptor.id {
            warn!("Sync for {} on the connection of {}, ignoring", session.id, active.descriptor.id);
            return;
        }
        if let Err(e) = active.descriptor.apply_sync(session) {
            warn!("Ignoring malformed sync for {}: {}", session.id, e);
            return;
        }
        active.sync_authority();

        let descriptor = active.descriptor.clone();
        let remote_start = !active.is_authority
            && self.state == OrchestratorState::InWaitingRoom
            && descriptor.status == SessionStatus::InProgress;

        self.events.publish(OrchestratorEvent::SessionUpdated { descriptor });
        if remote_start {
            self.enter_remote_game();
        }
    }

    fn on_scene_ready(&mut self) {
        match self.state {
            OrchestratorState::InGame => {}
            OrchestratorState::InWaitingRoom if !self.is_authority() => {
                if let Link::Active(active) = &mut self.link {
                    active.descriptor.status = SessionStatus::InProgress;
                }
                self.enter_remote_game();
            }
            _ => {
                debug!("Scene ready while {}, ignoring", self.state);
                return;
            }
        }
        info!("Scene ready");
        self.events.publish(OrchestratorEvent::SceneReady);
    }

    /// The authority started the game; follow it.
    fn enter_remote_game(&mut self) {
        self.set_state(OrchestratorState::InGame);
        info!("Host started the game");
        self.events.publish(OrchestratorEvent::GameStarting);
    }

    fn on_shutdown(&mut self, handle: ConnectionHandle, reason: String) {
        warn!("Session connection {} closed by transport: {}", handle, reason);
        self.link = Link::Detached;
        self.leave_requested = false;
        self.set_state(OrchestratorState::Idle);
        self.events.publish(OrchestratorEvent::SessionEnded { reason });
    }
}

/// Box a start future and turn a panic inside the transport into a
/// construction failure, so the state machine still resolves.
fn guard_start<F>(start: F) -> StartFuture
where
    F: Future<Output = Result<ConnectionHandle, TransportError>> + Send + 'static,
{
    AssertUnwindSafe(start)
        .catch_unwind()
        .map(|result| {
            result.unwrap_or_else(|_| Err(TransportError::Create("transport panicked during start".into())))
        })
        .boxed()
}

async fn release_directory(transport: &dyn ReplicationTransport, handle: Option<ConnectionHandle>) {
    if let Some(handle) = handle {
        debug!("Releasing directory {} before session start", handle);
        if let Err(e) = transport.shutdown(handle).await {
            warn!("Directory teardown for {} failed: {}", handle, e);
        }
    }
}
