//! # Session Orchestrator
//!
//! Multiplayer session lifecycle for a wave-based co-op game: discover, host,
//! join, start and leave sessions over a replication transport, and derive the
//! application state the game loop runs against.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   SESSION ORCHESTRATOR                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Data model (no I/O)                       │
//! │  ├── settings.rs - Creation settings and validation          │
//! │  ├── descriptor.rs- Session/participant records              │
//! │  └── property.rs - Property bag and its typed view           │
//! │                                                              │
//! │  network/        - Transport seam                            │
//! │  ├── transport.rs- ReplicationTransport trait and events     │
//! │  ├── directory.rs- Browse-only directory client              │
//! │  └── loopback.rs - In-process transport                      │
//! │                                                              │
//! │  session/        - Lifecycle                                 │
//! │  ├── orchestrator.rs - State machine                         │
//! │  ├── service.rs  - Task + command handle                     │
//! │  ├── state.rs    - States and the connection link            │
//! │  └── events.rs   - Event fan-out                             │
//! │                                                              │
//! │  game/           - Application state                         │
//! │  ├── coordinator.rs - Events to AppState, pause              │
//! │  └── wave.rs     - Wave counting                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - At most one connection is held: browse-only or active session, never both.
//! - Every create/join ends in the waiting room or back at `Idle`.
//! - Only the session authority can start the game.
//! - Leave always ends at `Idle`, even when teardown fails.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod network;
pub mod session;

// Re-export commonly used types
pub use config::OrchestratorConfig;
pub use crate::core::descriptor::{ParticipantId, ParticipantRecord, SessionDescriptor, SessionId, SessionStatus};
pub use crate::core::settings::{SessionConfiguration, WaveCount, WaveSetting};
pub use game::coordinator::{AppState, GameStateCoordinator};
pub use network::loopback::LoopbackTransport;
pub use network::transport::ReplicationTransport;
pub use session::{OrchestratorError, OrchestratorEvent, OrchestratorHandle, OrchestratorService, OrchestratorState, SessionOrchestrator};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shortest allowed session name (characters)
pub const MIN_NAME_LEN: usize = 3;

/// Longest allowed session name (characters)
pub const MAX_NAME_LEN: usize = 30;

/// Smallest session capacity
pub const MIN_CAPACITY: u8 = 2;

/// Largest session capacity
pub const MAX_CAPACITY: u8 = 8;

/// How long a directory refresh waits for a discovery push (ms)
pub const DEFAULT_DISCOVERY_WINDOW_MS: u64 = 2000;
