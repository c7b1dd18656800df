use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::command::RuleAction;
use crate::transport::ReconnectPolicy;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid server URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("server URL must be http or https, got '{0}'")]
    UnsupportedScheme(String),
}

/// Terminal console for a squidwarden proxy.
#[derive(Debug, Clone, Parser)]
#[command(name = "squidwarden-console", version, about)]
pub struct Config {
    /// Base URL of the squidwarden admin server
    #[arg(long, env = "SQUIDWARDEN_SERVER", default_value = "http://127.0.0.1:8080")]
    pub server: String,

    /// Anti-forgery token sent with every mutating request
    #[arg(long, env = "SQUIDWARDEN_CSRF_TOKEN", default_value = "")]
    pub csrf_token: String,

    /// JSON snapshot of the rule table to manage
    #[arg(long, env = "SQUIDWARDEN_SNAPSHOT")]
    pub snapshot: Option<PathBuf>,

    /// Fetch the tail backlog on demand instead of streaming it
    #[arg(long)]
    pub poll: bool,

    /// Seconds between backlog fetches in poll mode (0 = manual refresh only)
    #[arg(long, default_value_t = 0)]
    pub poll_interval: u64,

    /// First reconnect delay; doubles per failed attempt up to 30s. Unset reconnects immediately
    #[arg(long)]
    pub reconnect_backoff_ms: Option<u64>,

    /// Most tail rows kept on screen; older rows are dropped (0 = keep all)
    #[arg(long, default_value_t = 0)]
    pub tail_limit: usize,

    /// Action for rules created from the tail
    #[arg(long, value_enum, default_value_t = RuleAction::Allow)]
    pub rule_action: RuleAction,

    /// Write logs to this file (discarded otherwise)
    #[arg(long, env = "SQUIDWARDEN_LOG")]
    pub log_file: Option<PathBuf>,
}

impl Config {
    pub fn server_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(self.server.trim()).map_err(|source| ConfigError::InvalidUrl {
            url: self.server.clone(),
            source,
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        match self.reconnect_backoff_ms {
            Some(ms) if ms > 0 => ReconnectPolicy::Backoff {
                initial: Duration::from_millis(ms),
                max: MAX_BACKOFF.max(Duration::from_millis(ms)),
            },
            _ => ReconnectPolicy::Immediate,
        }
    }

    pub fn tail_limit(&self) -> Option<usize> {
        (self.tail_limit > 0).then_some(self.tail_limit)
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval > 0).then(|| Duration::from_secs(self.poll_interval))
    }
}

/// The terminal owns stdout, so logs only go somewhere when a file is given.
pub fn init_logging(log_file: Option<&Path>) -> io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::sink)
                .try_init();
        }
    }
    Ok(())
}
