//! Game State Coordinator
//!
//! Derives the coarse application state from orchestrator events and tracks
//! wave progress. Pause is a local toggle: it is never sent to other
//! participants, so one player pausing does not pause anyone else.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use crate::core::descriptor::SessionStatus;
use crate::game::wave::{WaveOutcome, WaveProgress};
use crate::session::events::OrchestratorEvent;

/// Coarse application state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AppState {
    /// Not in a session.
    #[default]
    MainMenu,
    /// Scene transition in progress.
    Loading,
    /// Session lobby.
    WaitingRoom,
    /// Game running.
    InGame,
    /// Game paused locally.
    Paused,
    /// Configured waves exhausted.
    GameOver,
}

/// Coordinator errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    /// Waves only advance while the game runs.
    #[error("Cannot advance waves while {0:?}")]
    NotInGame(AppState),
}

/// Maps orchestrator events to [`AppState`].
#[derive(Debug, Clone, Default)]
pub struct GameStateCoordinator {
    state: AppState,
    waves: WaveProgress,
}

impl GameStateCoordinator {
    /// Start at the main menu.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> AppState {
        self.state
    }

    /// Wave progress of the current game.
    pub fn waves(&self) -> &WaveProgress {
        &self.waves
    }

    fn transition(&mut self, next: AppState) -> Option<AppState> {
        if self.state == next {
            return None;
        }
        debug!("App state {:?} -> {:?}", self.state, next);
        self.state = next;
        Some(next)
    }

    /// Apply one event. Returns the new state if it changed.
    ///
    /// Failed creates and joins change nothing: the orchestrator rejects them
    /// without leaving whatever session it is in. A session marked ended
    /// while playing is game over, even before the local waves run out.
    pub fn apply(&mut self, event: &OrchestratorEvent) -> Option<AppState> {
        match event {
            OrchestratorEvent::SessionCreated { descriptor } => {
                self.waves = WaveProgress::new(descriptor.waves);
                self.transition(AppState::WaitingRoom)
            }
            OrchestratorEvent::SessionJoined { .. } => {
                self.waves = WaveProgress::default();
                self.transition(AppState::WaitingRoom)
            }
            OrchestratorEvent::SessionUpdated { descriptor } => {
                self.waves.configured = descriptor.waves;
                match (descriptor.status, self.state) {
                    (SessionStatus::Ended, AppState::InGame | AppState::Paused) => {
                        info!("Host ended the game");
                        self.transition(AppState::GameOver)
                    }
                    _ => None,
                }
            }
            OrchestratorEvent::GameStarting => match self.state {
                AppState::WaitingRoom => self.transition(AppState::Loading),
                _ => None,
            },
            OrchestratorEvent::SceneReady => match self.state {
                AppState::WaitingRoom | AppState::Loading => {
                    self.waves.reset();
                    self.transition(AppState::InGame)
                }
                _ => None,
            },
            OrchestratorEvent::SessionLeft | OrchestratorEvent::SessionEnded { .. } => {
                self.waves = WaveProgress::default();
                self.transition(AppState::MainMenu)
            }
            OrchestratorEvent::CreationFailed { reason } | OrchestratorEvent::JoinFailed { reason } => {
                debug!("Ignoring failure event: {}", reason);
                None
            }
            OrchestratorEvent::DirectoryUpdated { .. }
            | OrchestratorEvent::ParticipantJoined { .. }
            | OrchestratorEvent::ParticipantLeft { .. }
            | OrchestratorEvent::ParticipantUpdated { .. } => None,
        }
    }

    /// Advance one wave. Exhausting the configured waves ends the game.
    pub fn advance_wave(&mut self) -> Result<WaveOutcome, CoordinatorError> {
        if self.state != AppState::InGame {
            return Err(CoordinatorError::NotInGame(self.state));
        }
        let outcome = self.waves.advance();
        match outcome {
            WaveOutcome::Continue { wave } => info!("Wave {} started", wave),
            WaveOutcome::Exhausted { wave } => {
                info!("All waves cleared after {}", wave - 1);
                self.transition(AppState::GameOver);
            }
        }
        Ok(outcome)
    }

    /// Flip between `InGame` and `Paused`. Other states are left alone.
    pub fn toggle_pause(&mut self) -> AppState {
        match self.state {
            AppState::InGame => {
                self.transition(AppState::Paused);
            }
            AppState::Paused => {
                self.transition(AppState::InGame);
            }
            _ => debug!("Pause ignored while {:?}", self.state),
        }
        self.state
    }

    /// Simulation speed: stopped while paused.
    pub fn time_scale(&self) -> f32 {
        if self.state == AppState::Paused {
            0.0
        } else {
            1.0
        }
    }

    /// Apply every queued event without waiting. Returns how many were applied.
    pub fn drain(&mut self, events: &mut broadcast::Receiver<OrchestratorEvent>) -> usize {
        let mut applied = 0;
        loop {
            match events.try_recv() {
                Ok(event) => {
                    self.apply(&event);
                    applied += 1;
                }
                Err(TryRecvError::Lagged(missed)) => {
                    warn!("Coordinator fell behind, {} events lost", missed);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::descriptor::{ParticipantId, SessionDescriptor, SessionId};
    use crate::core::settings::{SessionConfiguration, WaveCount, WaveSetting};
    use crate::session::events::EventBus;

    fn created(waves: WaveCount) -> OrchestratorEvent {
        OrchestratorEvent::SessionCreated {
            descriptor: SessionDescriptor::hosted(
                SessionId::new("S-1"),
                &SessionConfiguration::new("Arena", 4, WaveSetting::Count(3), true),
                waves,
                ParticipantId::new("me"),
                "eu",
            ),
        }
    }

    fn in_game(waves: WaveCount) -> GameStateCoordinator {
        let mut coordinator = GameStateCoordinator::new();
        coordinator.apply(&created(waves));
        coordinator.apply(&OrchestratorEvent::GameStarting);
        coordinator.apply(&OrchestratorEvent::SceneReady);
        coordinator
    }

    #[test]
    fn test_lifecycle_mapping() {
        let mut coordinator = GameStateCoordinator::new();
        assert_eq!(coordinator.apply(&created(WaveCount::Unbounded)), Some(AppState::WaitingRoom));
        assert_eq!(coordinator.apply(&OrchestratorEvent::GameStarting), Some(AppState::Loading));
        assert_eq!(coordinator.apply(&OrchestratorEvent::SceneReady), Some(AppState::InGame));
        assert_eq!(coordinator.apply(&OrchestratorEvent::SessionLeft), Some(AppState::MainMenu));
    }

    #[test]
    fn test_rejected_join_keeps_waiting_room() {
        let mut coordinator = GameStateCoordinator::new();
        coordinator.apply(&created(WaveCount::Unbounded));
        let rejected = OrchestratorEvent::JoinFailed {
            reason: "Already in a session".into(),
        };
        assert_eq!(coordinator.apply(&rejected), None);
        assert_eq!(coordinator.state(), AppState::WaitingRoom);
    }

    #[test]
    fn test_three_waves_then_game_over() {
        let mut coordinator = in_game(WaveCount::finite(3).unwrap());
        for wave in 1..=3 {
            assert_eq!(coordinator.advance_wave(), Ok(WaveOutcome::Continue { wave }));
            assert_eq!(coordinator.state(), AppState::InGame);
        }
        assert_eq!(coordinator.advance_wave(), Ok(WaveOutcome::Exhausted { wave: 4 }));
        assert_eq!(coordinator.state(), AppState::GameOver);
        assert_eq!(
            coordinator.advance_wave(),
            Err(CoordinatorError::NotInGame(AppState::GameOver))
        );
    }

    #[test]
    fn test_unbounded_never_game_over() {
        let mut coordinator = in_game(WaveCount::Unbounded);
        for _ in 0..1000 {
            assert!(matches!(coordinator.advance_wave(), Ok(WaveOutcome::Continue { .. })));
        }
        assert_eq!(coordinator.state(), AppState::InGame);
    }

    #[test]
    fn test_pause_is_local_toggle() {
        let mut coordinator = in_game(WaveCount::Unbounded);
        assert_eq!(coordinator.toggle_pause(), AppState::Paused);
        assert_eq!(coordinator.time_scale(), 0.0);
        assert!(coordinator.advance_wave().is_err());
        assert_eq!(coordinator.toggle_pause(), AppState::InGame);
        assert_eq!(coordinator.time_scale(), 1.0);

        let mut menu = GameStateCoordinator::new();
        assert_eq!(menu.toggle_pause(), AppState::MainMenu);
    }

    #[test]
    fn test_guest_receives_waves_from_sync() {
        let mut coordinator = GameStateCoordinator::new();
        coordinator.apply(&OrchestratorEvent::SessionJoined {
            session_id: SessionId::new("S-1"),
        });
        let mut descriptor = SessionDescriptor::pending(SessionId::new("S-1"));
        descriptor.waves = WaveCount::finite(2).unwrap();
        coordinator.apply(&OrchestratorEvent::SessionUpdated { descriptor });

        // Guests go straight from the lobby to the scene.
        coordinator.apply(&OrchestratorEvent::GameStarting);
        coordinator.apply(&OrchestratorEvent::SceneReady);
        assert_eq!(coordinator.waves().configured, WaveCount::finite(2).unwrap());
        assert_eq!(coordinator.waves().current, 0);
    }

    #[test]
    fn test_drain_survives_lag() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        bus.publish(created(WaveCount::Unbounded));
        bus.publish(OrchestratorEvent::GameStarting);
        bus.publish(OrchestratorEvent::SceneReady);

        let mut coordinator = GameStateCoordinator::new();
        assert_eq!(coordinator.drain(&mut rx), 2);
        // The creation event was lost, so the start sequence is ignored.
        assert_eq!(coordinator.state(), AppState::MainMenu);
    }

    #[test]
    fn test_host_marking_ended_is_game_over() {
        let mut coordinator = in_game(WaveCount::Unbounded);
        coordinator.toggle_pause();

        let mut descriptor = SessionDescriptor::pending(SessionId::new("S-1"));
        descriptor.status = SessionStatus::Ended;
        assert_eq!(
            coordinator.apply(&OrchestratorEvent::SessionUpdated { descriptor: descriptor.clone() }),
            Some(AppState::GameOver)
        );
        assert_eq!(coordinator.time_scale(), 1.0);

        // In the lobby an ended status is just metadata.
        let mut lobby = GameStateCoordinator::new();
        lobby.apply(&created(WaveCount::Unbounded));
        assert_eq!(lobby.apply(&OrchestratorEvent::SessionUpdated { descriptor }), None);
        assert_eq!(lobby.state(), AppState::WaitingRoom);
    }

    #[test]
    fn test_session_ended_returns_to_menu() {
        let mut coordinator = in_game(WaveCount::Unbounded);
        coordinator.toggle_pause();
        let ended = OrchestratorEvent::SessionEnded {
            reason: "relay lost".into(),
        };
        assert_eq!(coordinator.apply(&ended), Some(AppState::MainMenu));
        assert_eq!(coordinator.time_scale(), 1.0);
    }
}
