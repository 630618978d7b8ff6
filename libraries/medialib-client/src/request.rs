//! Request descriptors and their coalescing identity.

use crate::error::{ApiError, Result};
use reqwest::Method;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Immutable description of one logical API call.
///
/// Two descriptors with the same [`RequestIdentity`] are the same request as
/// far as in-flight coalescing and caching are concerned. The cache TTL is
/// deliberately left out of the identity.
///
/// # Example
///
/// ```ignore
/// let request = RequestDescriptor::get("api/library/tracks/search")
///     .query("q", "blue")
///     .query("limit", "20")
///     .timeout(Duration::from_secs(5))
///     .cache_ttl(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    path: String,
    method: Method,
    query: Vec<(String, String)>,
    body: Option<serde_json::Value>,
    timeout: Option<Duration>,
    cache_ttl: Option<Duration>,
    authorized: bool,
}

impl RequestDescriptor {
    /// Create a descriptor for `method` on `path` (relative to the base URL).
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            path: path.trim_start_matches('/').to_string(),
            method,
            query: Vec::new(),
            body: None,
            timeout: None,
            cache_ttl: None,
            authorized: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append a query parameter. Order is preserved and is part of the identity.
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Set a pre-encoded JSON body.
    pub fn body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Encode `body` as JSON and attach it.
    pub fn json<T: Serialize + ?Sized>(self, body: &T) -> Result<Self> {
        let value = serde_json::to_value(body).map_err(|e| {
            ApiError::invalid_configuration(format!("Failed to encode request body: {}", e))
        })?;
        Ok(self.body(value))
    }

    /// Bound the network call. Distinct timeouts make distinct requests.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Cache successful responses for `ttl`. A zero TTL disables caching.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Send without a bearer token and never trigger a credential refresh.
    pub fn anonymous(mut self) -> Self {
        self.authorized = false;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn body_value(&self) -> Option<&serde_json::Value> {
        self.body.as_ref()
    }

    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout
    }

    /// The TTL to cache under, if caching applies to this request.
    pub fn effective_cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl.filter(|ttl| !ttl.is_zero())
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized
    }

    /// Stable identity used as the coalescing and cache key.
    pub fn identity(&self) -> RequestIdentity {
        let mut key = format!("{} {}", self.method.as_str(), self.path);

        if !self.query.is_empty() {
            let encoded = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(self.query.iter())
                .finish();
            key.push('?');
            key.push_str(&encoded);
        }

        // serde_json's default map sorts keys, so the body encoding is canonical
        match &self.body {
            Some(body) => {
                key.push_str(" body=");
                key.push_str(&body.to_string());
            }
            None => key.push_str(" body=-"),
        }

        match self.timeout {
            Some(timeout) => key.push_str(&format!(" timeout={}ns", timeout.as_nanos())),
            None => key.push_str(" timeout=-"),
        }

        key.push_str(if self.authorized {
            " auth=1"
        } else {
            " auth=0"
        });

        RequestIdentity(key)
    }
}

/// Serialized identity of a [`RequestDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestIdentity(String);

impl RequestIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ttl_not_part_of_identity() {
        let a = RequestDescriptor::get("status").cache_ttl(Duration::from_secs(5));
        let b = RequestDescriptor::get("status").cache_ttl(Duration::from_secs(60));
        let c = RequestDescriptor::get("status");
        assert_eq!(a.identity(), b.identity());
        assert_eq!(a.identity(), c.identity());
    }

    #[test]
    fn test_timeout_is_part_of_identity() {
        let a = RequestDescriptor::get("status").timeout(Duration::from_secs(5));
        let b = RequestDescriptor::get("status").timeout(Duration::from_secs(6));
        let c = RequestDescriptor::get("status");
        assert_ne!(a.identity(), b.identity());
        assert_ne!(a.identity(), c.identity());
    }

    #[test]
    fn test_query_order_matters() {
        let a = RequestDescriptor::get("search").query("q", "x").query("limit", 5);
        let b = RequestDescriptor::get("search").query("limit", 5).query("q", "x");
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn test_query_values_are_escaped() {
        let a = RequestDescriptor::get("search").query("q", "a&b=c");
        let b = RequestDescriptor::get("search").query("q", "a").query("b", "c");
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn test_method_and_body_distinguish() {
        let get = RequestDescriptor::get("playlists");
        let post = RequestDescriptor::post("playlists");
        assert_ne!(get.identity(), post.identity());

        let one = RequestDescriptor::post("playlists").body(json!({"name": "one"}));
        let two = RequestDescriptor::post("playlists").body(json!({"name": "two"}));
        assert_ne!(one.identity(), two.identity());
    }

    #[test]
    fn test_body_key_order_is_canonical() {
        let a = RequestDescriptor::post("x").body(json!({"a": 1, "b": 2}));
        let b = RequestDescriptor::post("x").body(json!({"b": 2, "a": 1}));
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_leading_slash_is_ignored() {
        assert_eq!(
            RequestDescriptor::get("/status").identity(),
            RequestDescriptor::get("status").identity()
        );
    }

    #[test]
    fn test_anonymous_is_distinct() {
        let a = RequestDescriptor::get("api/info");
        let b = RequestDescriptor::get("api/info").anonymous();
        assert_ne!(a.identity(), b.identity());
        assert!(!b.is_authorized());
    }

    #[test]
    fn test_zero_ttl_disables_caching() {
        let d = RequestDescriptor::get("status").cache_ttl(Duration::ZERO);
        assert_eq!(d.effective_cache_ttl(), None);

        let d = RequestDescriptor::get("status").cache_ttl(Duration::from_secs(1));
        assert_eq!(d.effective_cache_ttl(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_json_body() {
        #[derive(Serialize)]
        struct Rename {
            name: String,
        }

        let d = RequestDescriptor::patch("playlists/1")
            .json(&Rename {
                name: "Road trip".into(),
            })
            .unwrap();
        assert_eq!(d.body_value(), Some(&json!({"name": "Road trip"})));
    }
}
