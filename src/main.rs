//! Session Orchestrator Demo
//!
//! Runs a scripted session against the in-process loopback transport:
//! browse, host, take a guest, play every wave, mark the session ended and
//! leave, then join a listed session and leave again.

use std::time::Duration;

use anyhow::{bail, Context};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use session_orchestrator::{
    core::descriptor::DiscoveredSession,
    core::property::SessionProperties,
    game::wave::WaveOutcome,
    AppState, GameStateCoordinator, LoopbackTransport, OrchestratorConfig, OrchestratorEvent,
    OrchestratorHandle, OrchestratorService, ParticipantId, SessionConfiguration, SessionId,
    SessionOrchestrator, SessionStatus, WaveCount, WaveSetting, VERSION,
};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    info!("Session Orchestrator v{}", VERSION);

    let config = OrchestratorConfig::from_env();
    info!("Playing as {} in region {}", config.identity, config.region);

    let (transport, callbacks) = LoopbackTransport::new(config.identity.clone());
    seed_directory(&transport).await;

    let orchestrator = SessionOrchestrator::new(config, transport.clone());
    let (handle, task) = OrchestratorService::spawn(orchestrator, callbacks);

    let mut demo = Demo {
        events: handle.subscribe(),
        coordinator: GameStateCoordinator::new(),
        handle,
    };

    demo.host_and_play(&transport).await?;
    demo.join_and_leave().await?;

    demo.handle.stop().await?;
    task.await.context("orchestrator task failed")?;
    info!("Demo finished");
    Ok(())
}

/// Advertise a couple of remote sessions, one of them hidden.
async fn seed_directory(transport: &LoopbackTransport) {
    let listings = [("friday-night", "Friday Night", true), ("private-room", "Private Room", false)];
    for (id, name, visible) in listings {
        transport
            .publish(DiscoveredSession {
                id: SessionId::new(id),
                capacity: 4,
                current_count: 1,
                is_open: true,
                is_visible: visible,
                properties: SessionProperties {
                    name: Some(name.to_string()),
                    waves: WaveCount::finite(5),
                    status: Some(SessionStatus::Waiting),
                    owner: Some(ParticipantId::new("remote-host")),
                    region: Some("local".into()),
                }
                .to_bag(),
            })
            .await;
    }
}

struct Demo {
    handle: OrchestratorHandle,
    events: broadcast::Receiver<OrchestratorEvent>,
    coordinator: GameStateCoordinator,
}

impl Demo {
    /// Receive events, feeding each to the coordinator, until one matches.
    async fn wait_for<F>(&mut self, what: &str, wanted: F) -> anyhow::Result<OrchestratorEvent>
    where
        F: Fn(&OrchestratorEvent) -> bool,
    {
        loop {
            let event = match timeout(EVENT_TIMEOUT, self.events.recv()).await {
                Ok(Ok(event)) => event,
                Ok(Err(broadcast::error::RecvError::Lagged(missed))) => {
                    warn!("Missed {} events", missed);
                    continue;
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => bail!("event bus closed"),
                Err(_) => bail!("timed out waiting for {}", what),
            };

            if let Some(state) = self.coordinator.apply(&event) {
                info!("App state: {:?}", state);
            }
            match &event {
                OrchestratorEvent::CreationFailed { reason } | OrchestratorEvent::JoinFailed { reason } => {
                    bail!("{} failed: {}", what, reason)
                }
                _ if wanted(&event) => return Ok(event),
                _ => {}
            }
        }
    }

    async fn host_and_play(&mut self, transport: &LoopbackTransport) -> anyhow::Result<()> {
        self.handle.refresh_directory().await?;
        if let OrchestratorEvent::DirectoryUpdated { sessions } = self
            .wait_for("directory", |e| matches!(e, OrchestratorEvent::DirectoryUpdated { .. }))
            .await?
        {
            for session in &sessions {
                info!(
                    "Listed: {} '{}' ({}/{})",
                    session.id, session.name, session.current_count, session.capacity
                );
            }
        }

        let settings = SessionConfiguration::new("Arena", 4, WaveSetting::Count(3), true);
        self.handle.create_session(settings).await?;
        self.wait_for("create", |e| matches!(e, OrchestratorEvent::SessionCreated { .. }))
            .await?;

        let session = transport
            .last_session_handle()
            .await
            .context("hosted session has no connection")?;
        let guest = ParticipantId::new("guest-1");
        transport.remote_join(session, guest.clone()).await;
        transport.remote_ready(session, guest, true);
        self.handle.set_ready(true).await?;
        self.wait_for("guest", |e| matches!(e, OrchestratorEvent::ParticipantJoined { .. }))
            .await?;

        self.handle.start_game().await?;
        self.wait_for("scene", |e| matches!(e, OrchestratorEvent::SceneReady))
            .await?;

        while self.coordinator.state() == AppState::InGame {
            match self.coordinator.advance_wave()? {
                WaveOutcome::Continue { wave } => info!("Fighting wave {}", wave),
                WaveOutcome::Exhausted { .. } => info!("Game over"),
            }
        }

        self.handle.end_game().await?;
        self.wait_for("end", |e| {
            matches!(e, OrchestratorEvent::SessionUpdated { descriptor } if descriptor.status == SessionStatus::Ended)
        })
        .await?;

        self.handle.leave_session().await?;
        self.wait_for("leave", |e| matches!(e, OrchestratorEvent::SessionLeft))
            .await?;
        Ok(())
    }

    async fn join_and_leave(&mut self) -> anyhow::Result<()> {
        self.handle.join_session(SessionId::new("friday-night")).await?;
        if let OrchestratorEvent::SessionUpdated { descriptor } = self
            .wait_for("join", |e| matches!(e, OrchestratorEvent::SessionUpdated { .. }))
            .await?
        {
            info!(
                "Joined '{}' hosted by {} ({:?} waves)",
                descriptor.name, descriptor.owner, descriptor.waves
            );
        }

        // Only the host may start; this is rejected without any event.
        self.handle.start_game().await?;

        self.handle.leave_session().await?;
        self.wait_for("leave", |e| matches!(e, OrchestratorEvent::SessionLeft))
            .await?;
        Ok(())
    }
}
