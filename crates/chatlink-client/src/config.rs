//! Client configuration at `~/.chatlink/config.toml`.
//!
//! Holds per-environment endpoints and connection/chat tunables. Every field
//! has a default, so a missing or partial file is fine.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use chatlink_core::codec::HeartBeat;
use chatlink_core::error::{ChatError, ChatResult};

use crate::connection::ConnectionConfig;
use crate::stomp::StompConfig;
use crate::transport::validate_socket_url;

/// Environment variable selecting the endpoint set.
pub const ENV_VAR: &str = "CHATLINK_ENV";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    /// Read [`ENV_VAR`], defaulting to development when unset.
    pub fn from_env() -> ChatResult<Self> {
        match std::env::var(ENV_VAR) {
            Ok(v) if !v.trim().is_empty() => v.parse(),
            _ => Ok(Self::Development),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

impl FromStr for Environment {
    type Err = ChatError;

    fn from_str(s: &str) -> ChatResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(ChatError::Config(format!("unknown environment: {other}"))),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Base URL of the retrieval API and URL of the broker socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub base_url: String,
    pub socket_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default = "default_development")]
    pub development: Option<Endpoints>,
    #[serde(default)]
    pub production: Option<Endpoints>,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            development: default_development(),
            production: None,
        }
    }
}

fn default_development() -> Option<Endpoints> {
    Some(Endpoints {
        base_url: "http://localhost:8080".to_string(),
        socket_url: "ws://localhost:8080/ws".to_string(),
    })
}

/// Connection tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSection {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_outgoing_ms: u64,
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_incoming_ms: u64,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            heartbeat_outgoing_ms: default_heartbeat_ms(),
            heartbeat_incoming_ms: default_heartbeat_ms(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_heartbeat_ms() -> u64 {
    10_000
}

fn default_reconnect_base_delay_ms() -> u64 {
    2_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

/// Chat behaviour tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSection {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_typing_expiry_ms")]
    pub typing_expiry_ms: u64,
    #[serde(default = "default_mark_read_debounce_ms")]
    pub mark_read_debounce_ms: u64,
}

impl Default for ChatSection {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            typing_expiry_ms: default_typing_expiry_ms(),
            mark_read_debounce_ms: default_mark_read_debounce_ms(),
        }
    }
}

fn default_page_size() -> usize {
    20
}

fn default_typing_expiry_ms() -> u64 {
    3_000
}

fn default_mark_read_debounce_ms() -> u64 {
    100
}

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Environment used when neither `--env` nor `CHATLINK_ENV` is given.
    #[serde(default)]
    pub environment: Option<Environment>,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    #[serde(default)]
    pub connection: ConnectionSection,
    #[serde(default)]
    pub chat: ChatSection,
}

impl ClientConfig {
    /// `~/.chatlink/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".chatlink").join("config.toml"))
    }

    /// Load from a TOML file, returning defaults if the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> ChatResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ChatError::Config(format!("failed to read config at {}: {e}", path.display()))
        })?;
        let config = Self::parse(&content).map_err(|e| match e {
            ChatError::Config(msg) => {
                ChatError::Config(format!("failed to parse config at {}: {msg}", path.display()))
            }
            other => other,
        })?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn parse(content: &str) -> ChatResult<Self> {
        toml::from_str(content).map_err(|e| ChatError::Config(e.to_string()))
    }

    /// Endpoints of `env`, validated.
    pub fn endpoints(&self, env: Environment) -> ChatResult<Endpoints> {
        let endpoints = match env {
            Environment::Development => self.endpoints.development.clone(),
            Environment::Production => self.endpoints.production.clone(),
        }
        .ok_or_else(|| ChatError::Config(format!("no endpoints configured for {env}")))?;
        validate_socket_url(&endpoints.socket_url)?;
        let base = endpoints.base_url.to_lowercase();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ChatError::Config(format!(
                "base_url must be http:// or https://: {}",
                endpoints.base_url
            )));
        }
        Ok(endpoints)
    }

    /// Connection manager settings for `socket_url`.
    pub fn connection_config(&self, socket_url: &str) -> ConnectionConfig {
        let c = &self.connection;
        ConnectionConfig {
            url: socket_url.to_string(),
            stomp: StompConfig {
                heart_beat: HeartBeat::new(c.heartbeat_outgoing_ms, c.heartbeat_incoming_ms),
                connect_timeout: Duration::from_secs(c.connect_timeout_secs),
            },
            reconnect_base_delay: Duration::from_millis(c.reconnect_base_delay_ms),
            max_reconnect_attempts: c.max_reconnect_attempts,
        }
    }
}
