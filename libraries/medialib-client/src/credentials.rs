//! Credential providers: where the client gets its base URL and tokens.

use crate::config::ClientOptions;
use crate::error::{ApiError, Result};
use crate::types::{LoginRequest, LoginResponse, RefreshTokenRequest, RefreshTokenResponse};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};
use url::Url;

/// Tokens closer than this to their expiry are treated as already expired.
const EXPIRY_SKEW_SECS: i64 = 30;

/// Where requests go and which headers every request carries.
#[derive(Debug, Clone)]
pub struct ClientConfiguration {
    pub base_url: Url,
    pub static_headers: HeaderMap,
}

impl ClientConfiguration {
    /// Validate and normalize a base URL.
    pub fn new(base_url: &str) -> Result<Self> {
        if base_url.trim().is_empty() {
            return Err(ApiError::invalid_configuration("URL cannot be empty"));
        }

        let trimmed = base_url.trim().trim_end_matches('/');
        if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
            return Err(ApiError::invalid_configuration(
                "URL must start with http:// or https://",
            ));
        }

        let base_url = Url::parse(trimmed)?;
        if base_url.cannot_be_a_base() || base_url.host_str().is_none() {
            return Err(ApiError::invalid_configuration(format!(
                "URL has no host: {}",
                trimmed
            )));
        }

        Ok(Self {
            base_url,
            static_headers: HeaderMap::new(),
        })
    }

    /// Add a header sent with every request.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ApiError::invalid_configuration(format!("Invalid header name {}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ApiError::invalid_configuration(format!("Invalid header value: {}", e)))?;
        self.static_headers.insert(name, value);
        Ok(self)
    }

    /// Resolve `path` against the base URL, keeping any base path prefix.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let url = format!("{}/{}", base, path.trim_start_matches('/'));
        Ok(Url::parse(&url)?)
    }
}

/// Supplies configuration and access tokens to the client.
///
/// Implementations own the token. The client only reads it, asks for it to
/// be dropped after the server rejects it, and asks for a refresh through
/// [`CredentialRefreshCoordinator`](crate::refresh::CredentialRefreshCoordinator),
/// which guarantees `refresh_access_token` is never run concurrently.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Base URL and static headers.
    fn configuration(&self) -> Result<ClientConfiguration>;

    /// The current access token, if one is usable.
    fn access_token(&self) -> Option<String>;

    /// Forget `rejected` if it is still the current token.
    fn invalidate_access_token(&self, rejected: &str);

    /// Obtain a new access token.
    async fn refresh_access_token(&self) -> Result<()>;
}

#[derive(Debug, Default)]
struct TokenState {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl TokenState {
    fn store(&mut self, access_token: String, refresh_token: String, expires_in: u64) {
        self.access_token = Some(access_token);
        self.refresh_token = Some(refresh_token);
        self.expires_at = expiry_after(expires_in);
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Expiry `expires_in` seconds from now, or `None` when that is past what
/// a timestamp can represent.
fn expiry_after(expires_in: u64) -> Option<DateTime<Utc>> {
    let seconds = i64::try_from(expires_in).ok()?;
    let lifetime = chrono::Duration::try_seconds(seconds)?;
    Utc::now().checked_add_signed(lifetime)
}

/// Username/password session against the media server's auth endpoints.
///
/// # Example
///
/// ```ignore
/// let configuration = ClientConfiguration::new("https://music.example.com")?;
/// let session = Arc::new(SessionCredentials::new(configuration)?);
/// session.login("user", "password").await?;
///
/// let client = ApiClient::new(session)?;
/// ```
pub struct SessionCredentials {
    http: Client,
    configuration: ClientConfiguration,
    tokens: RwLock<TokenState>,
}

impl SessionCredentials {
    pub fn new(configuration: ClientConfiguration) -> Result<Self> {
        let http = ClientOptions::default().build_http_client()?;
        Ok(Self::with_http(configuration, http))
    }

    /// Use an existing reqwest client for the auth endpoints.
    pub fn with_http(configuration: ClientConfiguration, http: Client) -> Self {
        Self {
            http,
            configuration,
            tokens: RwLock::new(TokenState::default()),
        }
    }

    /// Login with username and password.
    ///
    /// On success, the tokens are stored for subsequent requests.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse> {
        let url = self.configuration.endpoint("api/auth/login")?;
        debug!(url = %url, username = %username, "Attempting login");

        let request = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };

        let response = self
            .http
            .post(url)
            .headers(self.configuration.static_headers.clone())
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        if status.is_success() {
            let login: LoginResponse = parse_json(response, "login").await?;

            self.write_tokens().store(
                login.access_token.clone(),
                login.refresh_token.clone(),
                login.expires_in,
            );

            info!(
                username = %login.username,
                user_id = %login.user_id,
                "Login successful"
            );

            Ok(login)
        } else if status.as_u16() == 401 {
            warn!(status = %status, "Login failed: invalid credentials");
            Err(ApiError::Unauthorized)
        } else {
            Err(http_error(response).await)
        }
    }

    /// Set tokens directly (e.g., from stored credentials).
    pub fn set_tokens(&self, access_token: String, refresh_token: Option<String>) {
        let mut tokens = self.write_tokens();
        tokens.access_token = Some(access_token);
        tokens.refresh_token = refresh_token;
        tokens.expires_at = None;
    }

    /// Get the current tokens, regardless of expiry.
    pub fn tokens(&self) -> (Option<String>, Option<String>) {
        let tokens = self.read_tokens();
        (tokens.access_token.clone(), tokens.refresh_token.clone())
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.read_tokens().expires_at
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }

    /// Clear stored tokens.
    pub fn logout(&self) {
        self.write_tokens().clear();
        info!("Logged out");
    }

    fn read_tokens(&self) -> RwLockReadGuard<'_, TokenState> {
        self.tokens.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_tokens(&self) -> RwLockWriteGuard<'_, TokenState> {
        self.tokens.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CredentialProvider for SessionCredentials {
    fn configuration(&self) -> Result<ClientConfiguration> {
        Ok(self.configuration.clone())
    }

    fn access_token(&self) -> Option<String> {
        let tokens = self.read_tokens();
        let token = tokens.access_token.as_ref()?;

        match tokens.expires_at {
            Some(expires_at)
                if Utc::now() + chrono::Duration::seconds(EXPIRY_SKEW_SECS) >= expires_at =>
            {
                debug!(%expires_at, "Access token expired or about to expire");
                None
            }
            _ => Some(token.clone()),
        }
    }

    fn invalidate_access_token(&self, rejected: &str) {
        let mut tokens = self.write_tokens();
        if tokens.access_token.as_deref() == Some(rejected) {
            debug!("Dropping rejected access token");
            tokens.access_token = None;
            tokens.expires_at = None;
        }
    }

    async fn refresh_access_token(&self) -> Result<()> {
        let refresh_token = self
            .read_tokens()
            .refresh_token
            .clone()
            .ok_or(ApiError::Unauthorized)?;

        let url = self.configuration.endpoint("api/auth/refresh")?;
        debug!(url = %url, "Refreshing access token");

        let response = self
            .http
            .post(url)
            .headers(self.configuration.static_headers.clone())
            .json(&RefreshTokenRequest { refresh_token })
            .send()
            .await?;

        let status = response.status();

        if status.is_success() {
            let refreshed: RefreshTokenResponse = parse_json(response, "refresh").await?;
            self.write_tokens().store(
                refreshed.access_token,
                refreshed.refresh_token,
                refreshed.expires_in,
            );

            info!("Token refresh successful");
            Ok(())
        } else if status.as_u16() == 401 {
            warn!("Token refresh failed: refresh token expired or invalid");
            self.write_tokens().clear();
            Err(ApiError::Unauthorized)
        } else {
            Err(http_error(response).await)
        }
    }
}

async fn parse_json<T: serde::de::DeserializeOwned>(response: Response, what: &str) -> Result<T> {
    let body = response.bytes().await?;
    serde_json::from_slice(&body)
        .map_err(|e| ApiError::Decode(format!("Failed to parse {} response: {}", what, e)))
}

async fn http_error(response: Response) -> ApiError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ApiError::Http { status, body }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionCredentials {
        SessionCredentials::new(ClientConfiguration::new("https://example.com").unwrap()).unwrap()
    }

    #[test]
    fn test_url_validation() {
        assert!(ClientConfiguration::new("https://example.com").is_ok());
        assert!(ClientConfiguration::new("http://localhost:8080").is_ok());

        for bad in ["", "   ", "not-a-url", "ftp://example.com", "example.com"] {
            match ClientConfiguration::new(bad) {
                Err(ApiError::InvalidConfiguration(_)) => {}
                other => panic!("Expected InvalidConfiguration for {:?}, got: {:?}", bad, other),
            }
        }
    }

    #[test]
    fn test_endpoint_joins_paths() {
        let config = ClientConfiguration::new("https://example.com///").unwrap();
        assert_eq!(
            config.endpoint("status").unwrap().as_str(),
            "https://example.com/status"
        );

        let config = ClientConfiguration::new("https://example.com/media/").unwrap();
        assert_eq!(
            config.endpoint("/api/library").unwrap().as_str(),
            "https://example.com/media/api/library"
        );
    }

    #[test]
    fn test_static_headers() {
        let config = ClientConfiguration::new("https://example.com")
            .unwrap()
            .with_header("X-Client", "medialib")
            .unwrap();
        assert_eq!(config.static_headers.get("x-client").unwrap(), "medialib");

        assert!(ClientConfiguration::new("https://example.com")
            .unwrap()
            .with_header("bad header", "x")
            .is_err());
    }

    #[test]
    fn test_set_tokens_and_logout() {
        let session = session();
        assert!(!session.is_authenticated());

        session.set_tokens("access".into(), Some("refresh".into()));
        assert!(session.is_authenticated());
        assert_eq!(
            session.tokens(),
            (Some("access".to_string()), Some("refresh".to_string()))
        );

        session.logout();
        assert!(!session.is_authenticated());
        assert_eq!(session.tokens(), (None, None));
    }

    #[test]
    fn test_invalidate_only_matching_token() {
        let session = session();
        session.set_tokens("current".into(), None);

        session.invalidate_access_token("stale");
        assert_eq!(session.access_token().as_deref(), Some("current"));

        session.invalidate_access_token("current");
        assert_eq!(session.access_token(), None);
    }

    #[test]
    fn test_expiring_token_is_not_usable() {
        let session = session();
        session.write_tokens().store("short".into(), "refresh".into(), 10);
        assert_eq!(session.access_token(), None);
        assert!(session.expires_at().is_some());

        session.write_tokens().store("long".into(), "refresh".into(), 3600);
        assert_eq!(session.access_token().as_deref(), Some("long"));
    }

    #[test]
    fn test_huge_expires_in_means_no_expiry() {
        for expires_in in [10_000_000_000_000_000, i64::MAX as u64 + 1, u64::MAX] {
            let session = session();
            session
                .write_tokens()
                .store("access".into(), "refresh".into(), expires_in);

            assert_eq!(session.expires_at(), None, "expires_in = {}", expires_in);
            assert_eq!(session.access_token().as_deref(), Some("access"));
        }
    }

    #[test]
    fn test_expiry_after() {
        let expiry = expiry_after(3600).unwrap();
        let remaining = expiry - Utc::now();
        assert!(remaining > chrono::Duration::seconds(3590));
        assert!(remaining <= chrono::Duration::seconds(3600));

        assert!(expiry_after(u64::MAX).is_none());
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token() {
        let session = session();
        let result = session.refresh_access_token().await;
        assert_eq!(result, Err(ApiError::Unauthorized));
    }
}
