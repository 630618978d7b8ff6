/// medialib - command-line access to a media library server
mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::CliConfig;
use medialib_client::{ApiClient, RequestDescriptor, SessionCredentials};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "medialib")]
#[command(about = "Query a media library server", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "MEDIALIB_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show server initialization status
    Status,
    /// Show server name, version and features
    Info,
    /// Login and print the issued tokens
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },
    /// Fetch the full library
    Library,
    /// Search tracks
    Search {
        query: String,
        #[arg(short, long)]
        limit: Option<u32>,
    },
    /// GET an arbitrary API path
    Get {
        path: String,
        /// Query parameter as key=value (repeatable)
        #[arg(short, long = "query", value_parser = parse_key_value)]
        query: Vec<(String, String)>,
        /// Cache the response for this many seconds
        #[arg(long)]
        ttl: Option<u64>,
        /// Request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "medialib=info,medialib_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = CliConfig::load(cli.config.as_deref())?;
    config.validate()?;

    let session = Arc::new(config.session()?);

    if let Commands::Login { username, password } = &cli.command {
        return login(&session, username, password).await;
    }

    if session.tokens().0.is_none() {
        if let (Some(username), Some(password)) = (&config.server.username, &config.server.password) {
            session
                .login(username, password)
                .await
                .context("Login with configured credentials failed")?;
        }
    }

    let client = ApiClient::builder(session.clone())
        .options(config.client.clone())
        .build()?;

    tracing::debug!(url = %config.server.url, "Client ready");

    match cli.command {
        Commands::Status => {
            let status = client.status().await?;
            print_json(&status)?;
        }
        Commands::Info => {
            let info = client.server_info().await?;
            print_json(&info)?;
        }
        Commands::Library => {
            let library = client.full_library().await?;
            print_json(&library)?;
        }
        Commands::Search { query, limit } => {
            let tracks = client.search_tracks(&query, limit).await?;
            print_json(&tracks)?;
        }
        Commands::Get {
            path,
            query,
            ttl,
            timeout,
        } => {
            let mut descriptor = RequestDescriptor::get(path);
            for (key, value) in query {
                descriptor = descriptor.query(key, value);
            }
            if let Some(ttl) = ttl {
                descriptor = descriptor.cache_ttl(Duration::from_secs(ttl));
            }
            if let Some(timeout) = timeout {
                descriptor = descriptor.timeout(Duration::from_secs(timeout));
            }

            let response = client.response_raw(&descriptor).await?;
            match response.json::<serde_json::Value>() {
                Ok(value) => print_json(&value)?,
                Err(_) => println!(
                    "{} bytes ({})",
                    response.body.len(),
                    response.content_type().unwrap_or("unknown type")
                ),
            }
        }
        // Handled before a client is built
        Commands::Login { .. } => {}
    }

    Ok(())
}

async fn login(session: &SessionCredentials, username: &str, password: &str) -> anyhow::Result<()> {
    let login = session.login(username, password).await?;
    tracing::info!(username = %login.username, "Logged in");

    println!("MEDIALIB__SERVER__ACCESS_TOKEN={}", login.access_token);
    println!("MEDIALIB__SERVER__REFRESH_TOKEN={}", login.refresh_token);
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{}`", s))?;
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("q=blue=green").unwrap(),
            ("q".to_string(), "blue=green".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
    }

    #[test]
    fn test_parse_get_command() {
        let cli = Cli::parse_from([
            "medialib", "get", "api/library", "-q", "since=10", "--ttl", "30",
        ]);
        match cli.command {
            Commands::Get { path, query, ttl, .. } => {
                assert_eq!(path, "api/library");
                assert_eq!(query, vec![("since".to_string(), "10".to_string())]);
                assert_eq!(ttl, Some(30));
            }
            _ => panic!("Expected Get command"),
        }
    }
}
