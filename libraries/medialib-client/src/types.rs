//! Types for media library server requests and responses.

use serde::{Deserialize, Serialize};

// =============================================================================
// Authentication Types
// =============================================================================

/// Request body for login endpoint.
#[derive(Debug, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Response from successful login.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Token validity in seconds
    pub expires_in: u64,
    pub user_id: String,
    pub username: String,
}

/// Request body for token refresh.
#[derive(Debug, Serialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

/// Response from token refresh.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshTokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
}

// =============================================================================
// Server Types
// =============================================================================

/// Server initialization status.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerStatus {
    /// Whether the server has completed first-run setup
    #[serde(rename = "isInit")]
    pub is_init: bool,
    #[serde(default)]
    pub version: Option<String>,
}

/// Information about the media library server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub features: Vec<String>,
    /// Whether the server requires authentication
    pub requires_auth: bool,
}

// =============================================================================
// Library Types
// =============================================================================

/// A track as returned by the server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerTrack {
    pub id: String,
    pub title: String,
    pub artist: Option<String>,
    pub artist_id: Option<String>,
    pub album: Option<String>,
    pub album_id: Option<String>,
    pub track_number: Option<i32>,
    pub disc_number: Option<i32>,
    pub year: Option<i32>,
    pub duration_seconds: Option<f64>,
    pub file_format: String,
    pub file_size: i64,
    pub updated_at: String,
}

/// Album as returned by the server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerAlbum {
    pub id: String,
    pub title: String,
    pub artist: Option<String>,
    pub year: Option<i32>,
    pub track_count: i32,
    pub cover_art_url: Option<String>,
}

/// Artist as returned by the server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerArtist {
    pub id: String,
    pub name: String,
    pub album_count: i32,
    pub track_count: i32,
}

/// Delta sync response - changes since last sync.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncDelta {
    pub new_tracks: Vec<ServerTrack>,
    pub updated_tracks: Vec<ServerTrack>,
    pub deleted_track_ids: Vec<String>,
    /// Server's current timestamp for next delta sync
    pub server_timestamp: i64,
    pub sync_token: String,
}

/// Full library response (for initial sync).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LibraryResponse {
    pub tracks: Vec<ServerTrack>,
    pub albums: Vec<ServerAlbum>,
    pub artists: Vec<ServerArtist>,
    pub server_timestamp: i64,
    pub sync_token: String,
}

/// Stream URL response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamUrlResponse {
    pub url: String,
    /// URL validity in seconds
    pub expires_in: u64,
}
