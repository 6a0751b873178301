//! Session Lifecycle Module
//!
//! ## Module Structure
//!
//! - `state`: Lifecycle enum and the connection link
//! - `orchestrator`: The state machine
//! - `service`: Task wrapper with a command handle
//! - `events`: Event fan-out
//! - `error`: Command errors

pub mod error;
pub mod events;
pub mod orchestrator;
pub mod service;
pub mod state;

pub use error::OrchestratorError;
pub use events::{EventBus, OrchestratorEvent};
pub use orchestrator::{SessionOrchestrator, StartFuture};
pub use service::{Command, OrchestratorHandle, OrchestratorService};
pub use state::{ActiveSession, Link, OrchestratorState};
