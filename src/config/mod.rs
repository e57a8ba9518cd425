//! Client configuration management

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use url::Url;

/// Default GraphQL endpoint of the lending API
pub const DEFAULT_GRAPHQL_API_URL: &str = "http://localhost:4000/";

/// Storage key under which the auth token is persisted
pub const DEFAULT_TOKEN_STORAGE_KEY: &str = "@kemetsehaftalem/token";

/// Log output format for the binary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" | "text" => Some(Self::Pretty),
            _ => None,
        }
    }
}

/// Client configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// GraphQL endpoint every operation is posted to
    pub graphql_api_url: Url,

    /// JSON file backing the device-local key-value storage
    pub token_store_path: PathBuf,

    /// Key of the auth token inside the storage
    pub token_storage_key: String,

    /// HTTP request timeout
    pub request_timeout: Duration,

    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            graphql_api_url: Url::parse(DEFAULT_GRAPHQL_API_URL)
                .expect("default GraphQL url is valid"),
            token_store_path: default_store_path(),
            token_storage_key: DEFAULT_TOKEN_STORAGE_KEY.to_string(),
            request_timeout: Duration::from_secs(30),
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let graphql_api_url = env::var("GRAPHQL_API_URL")
            .unwrap_or_else(|_| DEFAULT_GRAPHQL_API_URL.to_string());
        let graphql_api_url = Url::parse(&graphql_api_url).context("Invalid GRAPHQL_API_URL")?;

        let request_timeout = env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<u64>()
            .context("Invalid REQUEST_TIMEOUT_SECS")?;

        let log_format = match env::var("LOG_FORMAT") {
            Ok(value) => LogFormat::from_env_value(&value)
                .with_context(|| format!("Invalid LOG_FORMAT: {value}"))?,
            Err(_) => LogFormat::Pretty,
        };

        Ok(Self {
            graphql_api_url,

            token_store_path: env::var("TOKEN_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_store_path()),

            token_storage_key: env::var("TOKEN_STORAGE_KEY")
                .unwrap_or_else(|_| DEFAULT_TOKEN_STORAGE_KEY.to_string()),

            request_timeout: Duration::from_secs(request_timeout),

            log_format,
        })
    }
}

/// `<data dir>/kemet/storage.json`, falling back to the working directory
fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("./data"))
        .join("kemet")
        .join("storage.json")
}
