//! Session Directory Client
//!
//! Owns the browse-only connection. Discovery pushes replace the cached
//! listing; callers pull a filtered snapshot on their own cadence.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::core::descriptor::{DiscoveredSession, SessionDescriptor};
use crate::network::transport::{ConnectionHandle, DirectoryFeed, ReplicationTransport, TransportError};

/// Filtered directory listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorySnapshot {
    /// Open, visible sessions.
    pub sessions: Vec<SessionDescriptor>,
    /// When the cached listing was last replaced by a push.
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl DirectorySnapshot {
    /// Empty listing.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Browse-only connection with a cached discovery listing.
pub struct SessionDirectoryClient {
    transport: Arc<dyn ReplicationTransport>,
    feed: Option<DirectoryFeed>,
    listing: Vec<DiscoveredSession>,
    refreshed_at: Option<DateTime<Utc>>,
    window: Duration,
}

impl SessionDirectoryClient {
    /// Create a closed client. `window` bounds how long a refresh waits for a push.
    pub fn new(transport: Arc<dyn ReplicationTransport>, window: Duration) -> Self {
        Self {
            transport,
            feed: None,
            listing: Vec::new(),
            refreshed_at: None,
            window,
        }
    }

    /// Whether the browse connection is open.
    pub fn is_open(&self) -> bool {
        self.feed.is_some()
    }

    /// Handle of the browse connection, if open.
    pub fn handle(&self) -> Option<ConnectionHandle> {
        self.feed.as_ref().map(|feed| feed.handle)
    }

    /// Open the browse connection. Reuses an open one.
    pub async fn open(&mut self) -> Result<ConnectionHandle, TransportError> {
        Ok(self.ensure_open().await?.handle)
    }

    async fn ensure_open(&mut self) -> Result<&mut DirectoryFeed, TransportError> {
        let feed = match self.feed.take() {
            Some(feed) => feed,
            None => {
                let feed = self.transport.open_directory().await?;
                info!("Directory connection {} opened", feed.handle);
                feed
            }
        };
        Ok(self.feed.insert(feed))
    }

    /// Close the browse connection. Closing a closed client does nothing.
    pub async fn close(&mut self) {
        if let Some(handle) = self.detach() {
            if let Err(e) = self.transport.shutdown(handle).await {
                warn!("Directory teardown for {} failed: {}", handle, e);
            }
        }
    }

    /// Forget the browse connection without closing it and return its handle,
    /// so the caller can release it as part of a larger handoff.
    pub fn detach(&mut self) -> Option<ConnectionHandle> {
        self.feed.take().map(|feed| feed.handle)
    }

    /// Wait up to the refresh window for a discovery push, then return the
    /// filtered listing. Without a push the cached listing is served.
    #[instrument(skip(self))]
    pub async fn refresh(&mut self) -> Result<DirectorySnapshot, TransportError> {
        let window = self.window;
        let feed = self.ensure_open().await?;

        let latest = match timeout(window, feed.updates.recv()).await {
            Ok(Some(mut latest)) => {
                // Only the most recent push matters.
                while let Ok(newer) = feed.updates.try_recv() {
                    latest = newer;
                }
                Some(latest)
            }
            Ok(None) => {
                warn!("Directory feed closed by transport");
                self.close().await;
                return Err(TransportError::Remote("directory feed closed".into()));
            }
            Err(_) => {
                debug!("No discovery push within {:?}, serving cached listing", window);
                None
            }
        };

        if let Some(listing) = latest {
            self.replace(listing);
        }
        Ok(self.snapshot())
    }

    fn replace(&mut self, listing: Vec<DiscoveredSession>) {
        debug!("Discovery listing replaced ({} entries)", listing.len());
        self.listing = listing;
        self.refreshed_at = Some(Utc::now());
    }

    /// Filtered view of the cached listing.
    pub fn snapshot(&self) -> DirectorySnapshot {
        let sessions = self
            .listing
            .iter()
            .filter(|entry| entry.is_listable())
            .filter_map(|entry| match SessionDescriptor::from_discovered(entry) {
                Ok(descriptor) => Some(descriptor),
                Err(e) => {
                    warn!("Dropping directory entry {}: {}", entry.id, e);
                    None
                }
            })
            .collect();

        DirectorySnapshot {
            sessions,
            refreshed_at: self.refreshed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::descriptor::{ParticipantId, SessionId};
    use crate::core::property::{keys, PropertyValue, SessionProperties};
    use crate::network::loopback::LoopbackTransport;
    use proptest::prelude::*;

    fn entry(id: &str, open: bool, visible: bool) -> DiscoveredSession {
        DiscoveredSession {
            id: SessionId::new(id),
            capacity: 4,
            current_count: 1,
            is_open: open,
            is_visible: visible,
            properties: SessionProperties {
                name: Some(format!("Room {}", id)),
                ..Default::default()
            }
            .to_bag(),
        }
    }

    fn client(transport: &Arc<LoopbackTransport>) -> SessionDirectoryClient {
        SessionDirectoryClient::new(transport.clone(), Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_refresh_filters_closed_and_hidden() {
        let (transport, _events) = LoopbackTransport::new(ParticipantId::new("me"));
        transport.publish(entry("S-1", true, true)).await;
        transport.publish(entry("S-2", false, true)).await;
        transport.publish(entry("S-3", true, false)).await;

        let mut directory = client(&transport);
        let snapshot = directory.refresh().await.unwrap();

        let ids: Vec<_> = snapshot.sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["S-1"]);
        assert!(snapshot.refreshed_at.is_some());
    }

    #[tokio::test]
    async fn test_push_replaces_listing() {
        let (transport, _events) = LoopbackTransport::new(ParticipantId::new("me"));
        transport.publish(entry("S-1", true, true)).await;

        let mut directory = client(&transport);
        assert_eq!(directory.refresh().await.unwrap().sessions.len(), 1);

        let mut closed = entry("S-1", false, true);
        closed.current_count = 4;
        transport.publish(closed).await;

        assert!(directory.refresh().await.unwrap().sessions.is_empty());
    }

    #[tokio::test]
    async fn test_open_close_idempotent() {
        let (transport, _events) = LoopbackTransport::new(ParticipantId::new("me"));
        let mut directory = client(&transport);

        let first = directory.open().await.unwrap();
        let second = directory.open().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(transport.directory_opens().await, 1);

        directory.close().await;
        directory.close().await;
        assert!(!directory.is_open());
        assert_eq!(transport.shutdown_calls(first).await, 1);
        assert_eq!(transport.open_directories().await, 0);
    }

    #[tokio::test]
    async fn test_quiet_refresh_serves_cache() {
        let (transport, _events) = LoopbackTransport::new(ParticipantId::new("me"));
        transport.publish(entry("S-1", true, true)).await;

        let mut directory = client(&transport);
        let first = directory.refresh().await.unwrap();
        let second = directory.refresh().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_malformed_entry_dropped() {
        let (transport, _events) = LoopbackTransport::new(ParticipantId::new("me"));
        let mut bad = entry("S-1", true, true);
        bad.properties.insert(keys::WAVES, PropertyValue::text("lots"));
        transport.publish(bad).await;
        transport.publish(entry("S-2", true, true)).await;

        let mut directory = client(&transport);
        let snapshot = directory.refresh().await.unwrap();
        assert_eq!(snapshot.sessions.len(), 1);
        assert_eq!(snapshot.sessions[0].id, SessionId::new("S-2"));
    }

    #[tokio::test]
    async fn test_unavailable_directory_errors() {
        let (transport, _events) = LoopbackTransport::new(ParticipantId::new("me"));
        transport
            .fail_directory(Some(TransportError::Create("no route".into())))
            .await;

        let mut directory = client(&transport);
        assert!(directory.refresh().await.is_err());
        assert!(!directory.is_open());
    }

    #[tokio::test]
    async fn test_closed_feed_releases_connection() {
        let (transport, _events) = LoopbackTransport::new(ParticipantId::new("me"));
        transport.publish(entry("S-1", true, true)).await;

        let mut directory = client(&transport);
        directory.refresh().await.unwrap();
        let handle = directory.handle().unwrap();

        transport.drop_directories().await;
        assert!(directory.refresh().await.is_err());
        assert!(!directory.is_open());
        assert_eq!(transport.shutdown_calls(handle).await, 1);

        // The next refresh opens a fresh connection.
        assert_eq!(directory.refresh().await.unwrap().sessions.len(), 1);
        assert_ne!(directory.handle(), Some(handle));
    }

    proptest! {
        #[test]
        fn prop_refresh_lists_exactly_open_visible(
            flags in proptest::collection::vec((any::<bool>(), any::<bool>()), 0..12),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let listed = runtime.block_on(async {
                let (transport, _events) = LoopbackTransport::new(ParticipantId::new("me"));
                for (i, (open, visible)) in flags.iter().enumerate() {
                    transport.publish(entry(&format!("S-{:02}", i), *open, *visible)).await;
                }
                client(&transport).refresh().await.unwrap().sessions
            });

            let expected = flags.iter().filter(|(open, visible)| *open && *visible).count();
            prop_assert_eq!(listed.len(), expected);
            for session in &listed {
                let index: usize = session.id.as_str()[2..].parse().unwrap();
                prop_assert_eq!(flags[index], (true, true));
            }
        }
    }
}
