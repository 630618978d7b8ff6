//! Media Library API Client
//!
//! Client-side access layer for a remote media library server.
//!
//! # Features
//!
//! - **Single-flight**: concurrent identical requests share one network call
//! - **Response caching**: requests with a TTL are served from memory until they expire
//! - **Credential refresh**: a missing or rejected token triggers exactly one
//!   refresh, and the rejected request is retried once
//! - **Library endpoints**: typed helpers for status, library sync, search and streaming
//!
//! # Example
//!
//! ```ignore
//! use medialib_client::{ApiClient, ClientConfiguration, RequestDescriptor, SessionCredentials};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let configuration = ClientConfiguration::new("https://music.example.com")?;
//!     let session = Arc::new(SessionCredentials::new(configuration)?);
//!     session.login("user", "password").await?;
//!
//!     let client = ApiClient::new(session)?;
//!
//!     let status = client.status().await?;
//!     println!("Server initialized: {}", status.is_init);
//!
//!     // Cached for 30 seconds; concurrent duplicates share one call
//!     let search = RequestDescriptor::get("api/library/tracks/search")
//!         .query("q", "blue")
//!         .cache_ttl(Duration::from_secs(30));
//!     let tracks: Vec<medialib_client::ServerTrack> = client.response(&search).await?;
//!     println!("Found {} tracks", tracks.len());
//!
//!     Ok(())
//! }
//! ```

mod cache;
mod client;
mod config;
mod credentials;
mod error;
mod inflight;
mod library;
mod refresh;
mod request;
mod response;
mod types;

// Re-export main types
pub use cache::{CacheEntry, ResponseCache};
pub use client::{ApiClient, ApiClientBuilder};
pub use config::ClientOptions;
pub use credentials::{ClientConfiguration, CredentialProvider, SessionCredentials};
pub use error::{ApiError, Result, TransportKind};
pub use inflight::{InFlightRegistry, SharedExecution};
pub use library::endpoints;
pub use refresh::CredentialRefreshCoordinator;
pub use request::{RequestDescriptor, RequestIdentity};
pub use response::RawResponse;
pub use types::{
    LibraryResponse, LoginResponse, RefreshTokenResponse, ServerAlbum, ServerArtist, ServerInfo,
    ServerStatus, ServerTrack, StreamUrlResponse, SyncDelta,
};

// Re-exported so callers can build descriptors without a direct reqwest dependency
pub use reqwest::Method;
