use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::auth::DEFAULT_TOKEN_URL;
use crate::http_client::DEFAULT_API_BASE;

/// SpareBank 1 dashboard gateway
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Server host address
    #[arg(short = 'H', long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Server port
    #[arg(short, long, env = "SERVER_PORT", default_value = "8000")]
    pub port: u16,

    /// Base URL of the personal banking API
    #[arg(long, env = "SB1_API_BASE_URL", default_value = DEFAULT_API_BASE)]
    pub api_base_url: String,

    /// OAuth2 token endpoint
    #[arg(long, env = "SB1_TOKEN_URL", default_value = DEFAULT_TOKEN_URL)]
    pub token_url: String,

    /// Redirect URI registered with the authorization server
    #[arg(long, env = "SB1_REDIRECT_URI")]
    pub redirect_uri: Option<String>,

    /// Path to the SQLite token store (in-memory when unset)
    #[arg(short = 'd', long, env = "SB1_TOKEN_DB_FILE")]
    pub token_db_file: Option<String>,

    /// Per-request timeout in seconds for upstream calls
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "10")]
    pub http_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format (text, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    // Upstream endpoints
    pub api_base_url: String,
    pub token_url: String,
    pub redirect_uri: Option<String>,

    // Token storage
    pub token_db_file: Option<PathBuf>,

    // Timeouts
    pub http_request_timeout: u64,

    // Logging
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LogFormat {
    Text,
    Json,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Ok(Self::from_args(CliArgs::parse()))
    }

    pub fn from_args(args: CliArgs) -> Self {
        Config {
            server_host: args.host,
            server_port: args.port,

            api_base_url: args.api_base_url,
            token_url: args.token_url,
            redirect_uri: args
                .redirect_uri
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),

            token_db_file: args
                .token_db_file
                .filter(|s| !s.trim().is_empty())
                .map(|s| expand_tilde(s.trim())),

            http_request_timeout: args.http_timeout,

            log_level: args.log_level,
            log_format: parse_log_format(&args.log_format),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.http_request_timeout == 0 {
            anyhow::bail!("HTTP_REQUEST_TIMEOUT must be greater than zero");
        }

        for (name, value) in [
            ("SB1_API_BASE_URL", &self.api_base_url),
            ("SB1_TOKEN_URL", &self.token_url),
        ] {
            let url = Url::parse(value).with_context(|| format!("{} is not a valid URL: {}", name, value))?;
            if !matches!(url.scheme(), "http" | "https") {
                anyhow::bail!("{} must use http or https: {}", name, value);
            }
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http_request_timeout)
    }
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Parse log format from string
fn parse_log_format(s: &str) -> LogFormat {
    match s.to_lowercase().as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    }
}
