//! Orchestrator Service
//!
//! Runs a [`SessionOrchestrator`] on its own task. Commands arrive through an
//! [`OrchestratorHandle`], transport callbacks through the transport's event
//! channel, and an in-flight create/join is polled alongside both, so a leave
//! or a second create issued during a start is seen immediately.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::descriptor::SessionId;
use crate::core::settings::SessionConfiguration;
use crate::network::transport::{ConnectionHandle, TransportError, TransportEvent};
use crate::session::error::OrchestratorError;
use crate::session::events::{EventBus, OrchestratorEvent};
use crate::session::orchestrator::{SessionOrchestrator, StartFuture};
use crate::session::state::OrchestratorState;

/// Commands accepted by the service task.
#[derive(Debug)]
pub enum Command {
    /// Host a new session.
    CreateSession(SessionConfiguration),
    /// Join an existing session.
    JoinSession(SessionId),
    /// Leave the active session.
    LeaveSession,
    /// Start the game (host only).
    StartGame,
    /// Mark the running game as over (host only).
    EndGame,
    /// Refresh the directory listing.
    RefreshDirectory,
    /// Publish local readiness.
    SetReady(bool),
    /// Release everything and stop the task.
    Stop,
}

/// Cloneable front end of a running [`OrchestratorService`].
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::Sender<Command>,
    events: EventBus,
    state: watch::Receiver<OrchestratorState>,
}

impl OrchestratorHandle {
    async fn send(&self, command: Command) -> Result<(), OrchestratorError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| OrchestratorError::ServiceStopped)
    }

    /// Host a new session. The outcome arrives as an event.
    pub async fn create_session(&self, config: SessionConfiguration) -> Result<(), OrchestratorError> {
        self.send(Command::CreateSession(config)).await
    }

    /// Join an existing session. The outcome arrives as an event.
    pub async fn join_session(&self, session_id: SessionId) -> Result<(), OrchestratorError> {
        self.send(Command::JoinSession(session_id)).await
    }

    /// Leave the active session.
    pub async fn leave_session(&self) -> Result<(), OrchestratorError> {
        self.send(Command::LeaveSession).await
    }

    /// Start the game.
    pub async fn start_game(&self) -> Result<(), OrchestratorError> {
        self.send(Command::StartGame).await
    }

    /// Mark the running game as over.
    pub async fn end_game(&self) -> Result<(), OrchestratorError> {
        self.send(Command::EndGame).await
    }

    /// Refresh the directory listing.
    pub async fn refresh_directory(&self) -> Result<(), OrchestratorError> {
        self.send(Command::RefreshDirectory).await
    }

    /// Publish local readiness.
    pub async fn set_ready(&self, ready: bool) -> Result<(), OrchestratorError> {
        self.send(Command::SetReady(ready)).await
    }

    /// Ask the service to release its connections and stop.
    pub async fn stop(&self) -> Result<(), OrchestratorError> {
        self.send(Command::Stop).await
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    /// Last published state.
    pub fn state(&self) -> OrchestratorState {
        *self.state.borrow()
    }

    /// Wait until the service reports `target`.
    pub async fn wait_for_state(&self, target: OrchestratorState) -> Result<(), OrchestratorError> {
        let mut state = self.state.clone();
        state
            .wait_for(|current| *current == target)
            .await
            .map(|_| ())
            .map_err(|_| OrchestratorError::ServiceStopped)
    }

    /// Like [`OrchestratorHandle::wait_for_state`] with an upper bound.
    pub async fn wait_for_state_timeout(
        &self,
        target: OrchestratorState,
        limit: Duration,
    ) -> Result<bool, OrchestratorError> {
        match tokio::time::timeout(limit, self.wait_for_state(target)).await {
            Ok(result) => result.map(|_| true),
            Err(_) => Ok(false),
        }
    }
}

/// Task owning the orchestrator.
pub struct OrchestratorService {
    orchestrator: SessionOrchestrator,
    pending: Option<StartFuture>,
    commands: mpsc::Receiver<Command>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    state_tx: watch::Sender<OrchestratorState>,
}

impl OrchestratorService {
    /// Spawn the service task.
    pub fn spawn(
        orchestrator: SessionOrchestrator,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> (OrchestratorHandle, JoinHandle<()>) {
        let (commands_tx, commands) = mpsc::channel(orchestrator.config().command_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(orchestrator.state());

        let handle = OrchestratorHandle {
            commands: commands_tx,
            events: orchestrator.events().clone(),
            state: state_rx,
        };
        let service = Self {
            orchestrator,
            pending: None,
            commands,
            transport_events,
            state_tx,
        };

        (handle, tokio::spawn(service.run()))
    }

    async fn run(mut self) {
        info!("Orchestrator service started");

        loop {
            tokio::select! {
                biased;

                outcome = poll_start(&mut self.pending), if self.pending.is_some() => {
                    self.pending = None;
                    if let Err(e) = self.orchestrator.resolve(outcome).await {
                        debug!("Start resolved with error: {}", e);
                    }
                }

                Some(event) = self.transport_events.recv() => {
                    self.orchestrator.handle_transport_event(event);
                }

                command = self.commands.recv() => match command {
                    Some(Command::Stop) | None => break,
                    Some(command) => self.dispatch(command).await,
                },
            }

            self.state_tx.send_replace(self.orchestrator.state());
        }

        self.stop().await;
    }

    async fn dispatch(&mut self, command: Command) {
        debug!("Command: {:?}", command);
        match command {
            Command::CreateSession(config) => {
                if let Ok(start) = self.orchestrator.begin_create(config) {
                    self.pending = Some(start);
                }
            }
            Command::JoinSession(session_id) => {
                if let Ok(start) = self.orchestrator.begin_join(session_id) {
                    self.pending = Some(start);
                }
            }
            Command::LeaveSession => self.orchestrator.leave_session().await,
            Command::StartGame => {
                if let Err(e) = self.orchestrator.start_game().await {
                    debug!("Start game rejected: {}", e);
                }
            }
            Command::EndGame => {
                if let Err(e) = self.orchestrator.end_game().await {
                    debug!("End game rejected: {}", e);
                }
            }
            Command::RefreshDirectory => {
                self.orchestrator.refresh_directory().await;
            }
            Command::SetReady(ready) => {
                if let Err(e) = self.orchestrator.set_ready(ready).await {
                    warn!("Readiness update failed: {}", e);
                }
            }
            Command::Stop => {}
        }
    }

    /// Finish any in-flight start (tearing it down if it succeeded), then
    /// release every connection.
    async fn stop(&mut self) {
        if let Some(start) = self.pending.take() {
            self.orchestrator.leave_session().await;
            let outcome = start.await;
            let _ = self.orchestrator.resolve(outcome).await;
        }
        self.orchestrator.close().await;
        self.state_tx.send_replace(self.orchestrator.state());
        info!("Orchestrator service stopped");
    }
}

async fn poll_start(pending: &mut Option<StartFuture>) -> Result<ConnectionHandle, TransportError> {
    match pending {
        Some(start) => start.await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::core::descriptor::{DiscoveredSession, ParticipantId, SessionStatus};
    use crate::core::settings::WaveSetting;
    use crate::network::loopback::LoopbackTransport;
    use std::sync::Arc;
    use tokio::time::timeout;

    fn spawn() -> (OrchestratorHandle, JoinHandle<()>, Arc<LoopbackTransport>) {
        let config = OrchestratorConfig {
            identity: ParticipantId::new("me"),
            discovery_window: Duration::from_millis(20),
            ..Default::default()
        };
        let (transport, callbacks) = LoopbackTransport::new(config.identity.clone());
        let orchestrator = SessionOrchestrator::new(config, transport.clone());
        let (handle, task) = OrchestratorService::spawn(orchestrator, callbacks);
        (handle, task, transport)
    }

    fn arena() -> SessionConfiguration {
        SessionConfiguration::new("Arena", 4, WaveSetting::Count(3), true)
    }

    async fn next_event(rx: &mut broadcast::Receiver<OrchestratorEvent>) -> OrchestratorEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event bus closed")
    }

    #[tokio::test]
    async fn test_commands_drive_lifecycle() {
        let (handle, task, transport) = spawn();
        let mut events = handle.subscribe();

        handle.create_session(arena()).await.unwrap();
        assert!(matches!(next_event(&mut events).await, OrchestratorEvent::SessionCreated { .. }));
        handle.wait_for_state(OrchestratorState::InWaitingRoom).await.unwrap();

        handle.start_game().await.unwrap();
        assert_eq!(next_event(&mut events).await, OrchestratorEvent::GameStarting);
        assert_eq!(next_event(&mut events).await, OrchestratorEvent::SceneReady);

        handle.end_game().await.unwrap();
        assert!(matches!(
            next_event(&mut events).await,
            OrchestratorEvent::SessionUpdated { descriptor } if descriptor.status == SessionStatus::Ended
        ));
        assert_eq!(handle.state(), OrchestratorState::InGame);

        handle.leave_session().await.unwrap();
        assert_eq!(next_event(&mut events).await, OrchestratorEvent::SessionLeft);
        handle.wait_for_state(OrchestratorState::Idle).await.unwrap();
        assert_eq!(transport.open_sessions().await, 0);

        handle.stop().await.unwrap();
        task.await.unwrap();
        assert_eq!(handle.leave_session().await, Err(OrchestratorError::ServiceStopped));
    }

    #[tokio::test]
    async fn test_leave_during_create_is_carried_out_after_start() {
        let (handle, task, transport) = spawn();
        let mut events = handle.subscribe();
        let gate = transport.hold_next_start().await;

        handle.create_session(arena()).await.unwrap();
        handle.wait_for_state(OrchestratorState::CreatingSession).await.unwrap();

        handle.leave_session().await.unwrap();
        handle.create_session(arena()).await.unwrap();

        // The second create is rejected while the first is still held.
        assert_eq!(
            next_event(&mut events).await,
            OrchestratorEvent::CreationFailed {
                reason: "Already in a session".into()
            }
        );
        assert_eq!(handle.state(), OrchestratorState::CreatingSession);

        gate.send(()).unwrap();
        assert!(matches!(next_event(&mut events).await, OrchestratorEvent::SessionCreated { .. }));
        assert_eq!(next_event(&mut events).await, OrchestratorEvent::SessionLeft);
        handle.wait_for_state(OrchestratorState::Idle).await.unwrap();

        let session = transport.last_session_handle().await;
        assert!(session.is_none());
        assert_eq!(transport.start_calls().await, 1);
        assert_eq!(transport.open_sessions().await, 0);

        handle.stop().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_join_rejected_while_joining() {
        let (handle, task, transport) = spawn();
        let mut events = handle.subscribe();
        transport
            .publish(DiscoveredSession {
                id: SessionId::new("S-1"),
                capacity: 4,
                current_count: 1,
                is_open: true,
                is_visible: true,
                properties: Default::default(),
            })
            .await;
        let gate = transport.hold_next_start().await;

        handle.join_session(SessionId::new("S-1")).await.unwrap();
        handle.wait_for_state(OrchestratorState::JoiningSession).await.unwrap();
        handle.join_session(SessionId::new("S-1")).await.unwrap();

        assert_eq!(
            next_event(&mut events).await,
            OrchestratorEvent::JoinFailed {
                reason: "Already in a session".into()
            }
        );

        gate.send(()).unwrap();
        assert!(matches!(next_event(&mut events).await, OrchestratorEvent::SessionJoined { .. }));
        assert!(matches!(next_event(&mut events).await, OrchestratorEvent::SessionUpdated { .. }));
        handle.wait_for_state(OrchestratorState::InWaitingRoom).await.unwrap();
        assert_eq!(transport.start_calls().await, 1);

        handle.stop().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_releases_session() {
        let (handle, task, transport) = spawn();
        let mut events = handle.subscribe();

        handle.refresh_directory().await.unwrap();
        assert!(matches!(next_event(&mut events).await, OrchestratorEvent::DirectoryUpdated { .. }));
        assert_eq!(transport.open_directories().await, 1);

        handle.create_session(arena()).await.unwrap();
        handle.wait_for_state(OrchestratorState::InWaitingRoom).await.unwrap();
        assert_eq!(transport.open_directories().await, 0);

        handle.stop().await.unwrap();
        task.await.unwrap();
        assert_eq!(transport.open_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_remote_drop_surfaces_as_session_ended() {
        let (handle, task, transport) = spawn();
        let mut events = handle.subscribe();

        handle.create_session(arena()).await.unwrap();
        assert!(matches!(next_event(&mut events).await, OrchestratorEvent::SessionCreated { .. }));
        let session = transport.last_session_handle().await.unwrap();

        transport.drop_connection(session, "relay lost").await;
        assert_eq!(
            next_event(&mut events).await,
            OrchestratorEvent::SessionEnded {
                reason: "relay lost".into()
            }
        );
        let reached = handle
            .wait_for_state_timeout(OrchestratorState::Idle, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(reached);

        handle.stop().await.unwrap();
        task.await.unwrap();
    }
}
