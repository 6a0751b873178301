//! Network Layer
//!
//! The replication transport seam, the directory client built on it, and an
//! in-process loopback implementation.

pub mod directory;
pub mod loopback;
pub mod transport;

pub use directory::{DirectorySnapshot, SessionDirectoryClient};
pub use loopback::LoopbackTransport;
pub use transport::{
    ConnectionHandle, ConnectionId, DirectoryFeed, HostRequest, ReplicationTransport,
    TransportError, TransportEvent,
};
