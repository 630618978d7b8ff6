//! Typed media library endpoints built on [`ApiClient`].

use crate::client::ApiClient;
use crate::error::{ApiError, Result};
use crate::request::RequestDescriptor;
use crate::types::{
    LibraryResponse, ServerInfo, ServerStatus, ServerTrack, StreamUrlResponse, SyncDelta,
};
use std::time::Duration;
use tracing::debug;

/// Server info rarely changes, so it is cached briefly.
const SERVER_INFO_TTL: Duration = Duration::from_secs(60);

/// Descriptors for the media library endpoints.
///
/// Building descriptors in one place keeps identities stable, so for example
/// [`ApiClient::delete_track`] can invalidate exactly the cache slot that
/// [`ApiClient::track`] fills.
pub mod endpoints {
    use super::*;

    pub fn status() -> RequestDescriptor {
        RequestDescriptor::get("status")
    }

    pub fn server_info() -> RequestDescriptor {
        RequestDescriptor::get("api/info")
            .anonymous()
            .cache_ttl(SERVER_INFO_TTL)
    }

    pub fn full_library() -> RequestDescriptor {
        RequestDescriptor::get("api/library")
    }

    /// Changes since the last sync. Both arguments are `None` on first sync.
    pub fn library_delta(since_timestamp: Option<i64>, sync_token: Option<&str>) -> RequestDescriptor {
        let mut descriptor = RequestDescriptor::get("api/library/delta");
        if let Some(since) = since_timestamp {
            descriptor = descriptor.query("since", since);
        }
        if let Some(token) = sync_token {
            descriptor = descriptor.query("token", token);
        }
        descriptor
    }

    pub fn track(track_id: &str) -> RequestDescriptor {
        RequestDescriptor::get(format!("api/library/tracks/{}", track_id))
    }

    pub fn search_tracks(query: &str, limit: Option<u32>) -> RequestDescriptor {
        let descriptor = RequestDescriptor::get("api/library/tracks/search").query("q", query);
        match limit {
            Some(limit) => descriptor.query("limit", limit),
            None => descriptor,
        }
    }

    pub fn stream_url(track_id: &str) -> RequestDescriptor {
        RequestDescriptor::get(format!("api/library/tracks/{}/stream", track_id))
    }

    pub fn delete_track(track_id: &str) -> RequestDescriptor {
        RequestDescriptor::delete(format!("api/library/tracks/{}", track_id))
    }
}

impl ApiClient {
    /// Server initialization status.
    pub async fn status(&self) -> Result<ServerStatus> {
        self.response(&endpoints::status()).await
    }

    /// Server name, version and features. Does not require authentication.
    pub async fn server_info(&self) -> Result<ServerInfo> {
        let info: ServerInfo = self.response(&endpoints::server_info()).await?;
        debug!(
            name = %info.name,
            version = %info.version,
            features = ?info.features,
            "Fetched server info"
        );
        Ok(info)
    }

    /// Get the full library (for initial sync).
    pub async fn full_library(&self) -> Result<LibraryResponse> {
        let library: LibraryResponse = self.response(&endpoints::full_library()).await?;
        debug!(
            tracks = library.tracks.len(),
            albums = library.albums.len(),
            artists = library.artists.len(),
            "Fetched full library"
        );
        Ok(library)
    }

    /// Get library changes since last sync (delta sync).
    pub async fn library_delta(
        &self,
        since_timestamp: Option<i64>,
        sync_token: Option<&str>,
    ) -> Result<SyncDelta> {
        let delta: SyncDelta = self
            .response(&endpoints::library_delta(since_timestamp, sync_token))
            .await?;
        debug!(
            new_tracks = delta.new_tracks.len(),
            updated_tracks = delta.updated_tracks.len(),
            deleted_tracks = delta.deleted_track_ids.len(),
            "Fetched library delta"
        );
        Ok(delta)
    }

    pub async fn track(&self, track_id: &str) -> Result<ServerTrack> {
        self.response(&endpoints::track(track_id)).await
    }

    pub async fn search_tracks(&self, query: &str, limit: Option<u32>) -> Result<Vec<ServerTrack>> {
        let tracks: Vec<ServerTrack> = self
            .response(&endpoints::search_tracks(query, limit))
            .await?;
        debug!(results = tracks.len(), "Search complete");
        Ok(tracks)
    }

    /// Get a time-limited streaming URL for a track.
    pub async fn stream_url(&self, track_id: &str) -> Result<StreamUrlResponse> {
        self.response(&endpoints::stream_url(track_id)).await
    }

    /// Delete a track from the server. Deleting a missing track succeeds.
    pub async fn delete_track(&self, track_id: &str) -> Result<()> {
        match self.response_empty(&endpoints::delete_track(track_id)).await {
            Ok(()) => debug!(track_id = %track_id, "Track deleted"),
            // Already deleted, that's fine
            Err(ApiError::Http { status: 404, .. }) => {}
            Err(e) => return Err(e),
        }

        self.invalidate(&endpoints::track(track_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_delta_query() {
        let first = endpoints::library_delta(None, None);
        assert!(first.query_pairs().is_empty());

        let next = endpoints::library_delta(Some(1700000000), Some("abc"));
        assert_eq!(
            next.query_pairs(),
            &[
                ("since".to_string(), "1700000000".to_string()),
                ("token".to_string(), "abc".to_string())
            ]
        );
    }

    #[test]
    fn test_server_info_is_anonymous_and_cached() {
        let descriptor = endpoints::server_info();
        assert!(!descriptor.is_authorized());
        assert_eq!(descriptor.effective_cache_ttl(), Some(SERVER_INFO_TTL));
    }

    #[test]
    fn test_search_limit_is_optional() {
        assert_eq!(endpoints::search_tracks("blue", None).query_pairs().len(), 1);
        assert_eq!(endpoints::search_tracks("blue", Some(5)).query_pairs().len(), 2);
    }

    #[test]
    fn test_track_descriptors_are_stable() {
        assert_eq!(endpoints::track("t1").identity(), endpoints::track("t1").identity());
        assert_ne!(endpoints::track("t1").identity(), endpoints::track("t2").identity());
    }
}
