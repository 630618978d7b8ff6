//! Raw responses shared between coalesced callers.

use crate::error::{ApiError, Result};
use bytes::Bytes;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;

/// A successful response as received from the server, before decoding.
///
/// Cloning is cheap: the body is reference counted. Each caller decodes its
/// own copy, so one caller's decode failure never affects another.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RawResponse {
    pub fn new(status: u16, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            ApiError::Decode(format!(
                "Failed to parse {} response: {}",
                std::any::type_name::<T>(),
                e
            ))
        })
    }

    /// The body as raw bytes.
    pub fn bytes(&self) -> Bytes {
        self.body.clone()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}
