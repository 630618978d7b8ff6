/// CLI configuration
use medialib_client::{ClientConfiguration, ClientOptions, SessionCredentials};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_CONFIG_FILE: &str = "medialib.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Client(#[from] medialib_client::ApiError),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CliConfig {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub client: ClientOptions,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerSettings {
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub access_token: Option<String>,

    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Login on startup when no access token is configured
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Extra headers sent with every request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl CliConfig {
    /// Load configuration from file and environment
    ///
    /// An explicit `path` must exist; otherwise `medialib.toml` in the working
    /// directory is used when present. Environment variables prefixed with
    /// `MEDIALIB__` override file values (`MEDIALIB__SERVER__URL`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = config::Config::builder();

        match path {
            Some(path) => {
                settings = settings.add_source(config::File::from(path.to_path_buf()));
            }
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    settings = settings.add_source(config::File::from(default_path));
                }
            }
        }

        settings = settings.add_source(
            config::Environment::with_prefix("MEDIALIB")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = settings
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| ConfigError::Load(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "Server URL is required (set MEDIALIB__SERVER__URL)".to_string(),
            ));
        }

        if self.server.username.is_some() != self.server.password.is_some() {
            return Err(ConfigError::Invalid(
                "username and password must be set together".to_string(),
            ));
        }

        Ok(())
    }

    /// Build the client configuration (base URL plus static headers).
    pub fn client_configuration(&self) -> Result<ClientConfiguration> {
        let mut configuration = ClientConfiguration::new(&self.server.url)?;
        for (name, value) in &self.server.headers {
            configuration = configuration.with_header(name, value)?;
        }
        Ok(configuration)
    }

    /// Build a session seeded with any configured tokens.
    pub fn session(&self) -> Result<SessionCredentials> {
        let http = self.client.build_http_client()?;
        let session = SessionCredentials::with_http(self.client_configuration()?, http);

        if let Some(access_token) = &self.server.access_token {
            session.set_tokens(access_token.clone(), self.server.refresh_token.clone());
        }

        Ok(session)
    }
}
