//! The API client façade.

use crate::cache::ResponseCache;
use crate::config::ClientOptions;
use crate::credentials::CredentialProvider;
use crate::error::{ApiError, Result};
use crate::inflight::InFlightRegistry;
use crate::refresh::CredentialRefreshCoordinator;
use crate::request::{RequestDescriptor, RequestIdentity};
use crate::response::RawResponse;
use bytes::Bytes;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};

/// Client for a media library server.
///
/// Turns [`RequestDescriptor`]s into network calls while guaranteeing that
/// identical concurrent requests share one call, that responses with a cache
/// TTL are served from memory until they expire, and that a missing or
/// rejected access token triggers exactly one refresh no matter how many
/// requests notice it at once.
///
/// Cloning is cheap; clones share the cache, the in-flight registry and the
/// credentials.
///
/// # Example
///
/// ```ignore
/// use medialib_client::{ApiClient, ClientConfiguration, RequestDescriptor, SessionCredentials};
///
/// let session = Arc::new(SessionCredentials::new(ClientConfiguration::new(
///     "https://music.example.com",
/// )?)?);
/// session.login("user", "password").await?;
///
/// let client = ApiClient::new(session)?;
/// let status: ServerStatus = client.response(&RequestDescriptor::get("status")).await?;
/// ```
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: Client,
    credentials: Arc<dyn CredentialProvider>,
    refresh: CredentialRefreshCoordinator,
    cache: Arc<ResponseCache>,
    in_flight: Arc<InFlightRegistry>,
}

impl ApiClient {
    /// Create a client with default options and a private cache.
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        Self::builder(credentials).build()
    }

    pub fn builder(credentials: Arc<dyn CredentialProvider>) -> ApiClientBuilder {
        ApiClientBuilder {
            credentials,
            options: ClientOptions::default(),
            http: None,
            cache: None,
            in_flight: None,
        }
    }

    /// Execute `descriptor` and decode the JSON body into `T`.
    ///
    /// Decoding happens per caller: when several callers share one network
    /// call, a caller asking for the wrong type only fails itself.
    pub async fn response<T: DeserializeOwned>(&self, descriptor: &RequestDescriptor) -> Result<T> {
        self.response_raw(descriptor).await?.json()
    }

    /// Execute `descriptor` and return the body bytes unchanged.
    pub async fn response_data(&self, descriptor: &RequestDescriptor) -> Result<Bytes> {
        Ok(self.response_raw(descriptor).await?.bytes())
    }

    /// Execute `descriptor` when no response body is expected.
    pub async fn response_empty(&self, descriptor: &RequestDescriptor) -> Result<()> {
        self.response_raw(descriptor).await.map(|_| ())
    }

    /// Execute `descriptor`, returning the undecoded response.
    ///
    /// Checks the cache when the request has a TTL, then joins or starts the
    /// single execution for the request's identity. The wait is bounded by the
    /// request's own timeout; giving up detaches this caller only.
    pub async fn response_raw(&self, descriptor: &RequestDescriptor) -> Result<RawResponse> {
        let identity = descriptor.identity();

        if descriptor.effective_cache_ttl().is_some() {
            if let Some(entry) = self.inner.cache.lookup(&identity) {
                debug!(identity = %identity, "Cache hit");
                return Ok(entry.value);
            }
            debug!(identity = %identity, "Cache miss");
        }

        let inner = Arc::clone(&self.inner);
        let owned = descriptor.clone();
        let execution_identity = identity.clone();
        let execution = self.inner.in_flight.join(identity.clone(), move || async move {
            inner.execute(execution_identity, owned).await
        });

        match descriptor.timeout_duration() {
            Some(timeout) => tokio::time::timeout(timeout, execution)
                .await
                .map_err(|_| {
                    debug!(identity = %identity, "Caller timed out waiting for response");
                    ApiError::timeout(format!("No response within {:?}", timeout))
                })?,
            None => execution.await,
        }
    }

    /// Drop any cached response for `descriptor`.
    pub fn invalidate(&self, descriptor: &RequestDescriptor) -> bool {
        self.inner.cache.invalidate(&descriptor.identity())
    }

    /// Drop every cached response.
    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.inner.cache
    }

    /// Number of distinct requests currently on the wire.
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.len()
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialProvider> {
        &self.inner.credentials
    }

    pub fn refresh_coordinator(&self) -> &CredentialRefreshCoordinator {
        &self.inner.refresh
    }
}

impl ClientInner {
    /// The one network execution for an identity.
    async fn execute(
        &self,
        identity: RequestIdentity,
        descriptor: RequestDescriptor,
    ) -> Result<RawResponse> {
        let token = if descriptor.is_authorized() {
            Some(self.refresh.ensure_token().await?)
        } else {
            None
        };

        let mut response = self.send(&descriptor, token.as_deref()).await?;

        if response.status == 401 {
            if let Some(rejected) = token {
                warn!(identity = %identity, "Access token rejected, refreshing");
                self.refresh.invalidate(&rejected);
                let fresh = self.refresh.ensure_token().await?;

                response = self.send(&descriptor, Some(&fresh)).await?;
                if response.status == 401 {
                    warn!(identity = %identity, "Access token rejected after refresh");
                    return Err(ApiError::Unauthorized);
                }
            }
        }

        if !(200..300).contains(&response.status) {
            debug!(identity = %identity, status = response.status, "Request failed");
            return Err(ApiError::Http {
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }

        if let Some(ttl) = descriptor.effective_cache_ttl() {
            self.cache.store(identity, response.clone(), ttl);
        }

        Ok(response)
    }

    async fn send(&self, descriptor: &RequestDescriptor, token: Option<&str>) -> Result<RawResponse> {
        let configuration = self.credentials.configuration()?;
        let mut url = configuration.endpoint(descriptor.path())?;
        if !descriptor.query_pairs().is_empty() {
            url.query_pairs_mut().extend_pairs(descriptor.query_pairs());
        }

        debug!(method = %descriptor.method(), url = %url, "Sending request");

        let mut request = self
            .http
            .request(descriptor.method().clone(), url)
            .headers(configuration.static_headers);

        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = descriptor.body_value() {
            request = request.json(body);
        }
        if let Some(timeout) = descriptor.timeout_duration() {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        debug!(status, bytes = body.len(), "Received response");
        Ok(RawResponse::new(status, headers, body))
    }
}

/// Builder for [`ApiClient`].
///
/// The cache and the in-flight registry can be injected so several clients
/// share them, or so tests can inspect them.
pub struct ApiClientBuilder {
    credentials: Arc<dyn CredentialProvider>,
    options: ClientOptions,
    http: Option<Client>,
    cache: Option<Arc<ResponseCache>>,
    in_flight: Option<Arc<InFlightRegistry>>,
}

impl ApiClientBuilder {
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Use an existing reqwest client instead of building one from the options.
    pub fn http_client(mut self, http: Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn in_flight(mut self, in_flight: Arc<InFlightRegistry>) -> Self {
        self.in_flight = Some(in_flight);
        self
    }

    /// Build the client, validating the provider's configuration up front.
    pub fn build(self) -> Result<ApiClient> {
        let configuration = self.credentials.configuration()?;
        debug!(base_url = %configuration.base_url, "Creating API client");

        let http = match self.http {
            Some(http) => http,
            None => self.options.build_http_client()?,
        };

        let cache = self.cache.unwrap_or_else(|| {
            Arc::new(match self.options.cache_capacity {
                Some(capacity) => ResponseCache::with_capacity(capacity),
                None => ResponseCache::new(),
            })
        });

        let in_flight = self
            .in_flight
            .unwrap_or_else(|| Arc::new(InFlightRegistry::new()));

        Ok(ApiClient {
            inner: Arc::new(ClientInner {
                http,
                refresh: CredentialRefreshCoordinator::new(Arc::clone(&self.credentials)),
                credentials: self.credentials,
                cache,
                in_flight,
            }),
        })
    }
}
