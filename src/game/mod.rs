//! Game State Module
//!
//! Application-level state derived from the session lifecycle.
//!
//! ## Module Structure
//!
//! - `coordinator`: Event-to-state mapping, pause toggle
//! - `wave`: Wave counting against the configured count

pub mod coordinator;
pub mod wave;

pub use coordinator::{AppState, CoordinatorError, GameStateCoordinator};
pub use wave::{WaveOutcome, WaveProgress};
