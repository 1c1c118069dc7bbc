//! Dashboard client configuration
//!
//! Handles:
//! - API base URL and optional request timeout
//! - Live transport selection (SSE or WebSocket) and reconnect delays
//! - History window size and render interval
//! - TOML file location (env override, then OS config dir)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::metrics::DEFAULT_HISTORY_CAPACITY;

pub const CONFIG_PATH_ENV: &str = "ARCANAS_CONSOLE_CONFIG";
pub const API_BASE_ENV: &str = "ARCANAS_API_BASE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub api: ApiConfig,
    pub realtime: RealtimeConfig,
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base of every endpoint, e.g. `http://nas.local:8080/api`
    pub base_url: String,
    /// None leaves REST calls without a client-side timeout
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Sse,
    Websocket,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub transport: Transport,
    /// Delay before the caller reopens a closed WebSocket
    pub reconnect_delay_ms: u64,
    /// SSE reconnection delay until the server sends its own `retry:`
    pub sse_retry_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub capacity: usize,
    pub render_interval_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            request_timeout_secs: None,
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            transport: Transport::Sse,
            reconnect_delay_ms: 5_000,
            sse_retry_ms: 3_000,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_HISTORY_CAPACITY,
            render_interval_secs: 5,
        }
    }
}

impl RealtimeConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn sse_retry(&self) -> Duration {
        Duration::from_millis(self.sse_retry_ms)
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

impl DashboardConfig {
    /// Load from `$ARCANAS_CONSOLE_CONFIG` or the OS config dir, then apply env overrides.
    ///
    /// A missing file yields the defaults.
    pub async fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => PathBuf::from(path),
            Err(_) => Self::config_file_path()?,
        };

        let mut config = Self::load_from(&path).await?;
        if let Ok(base_url) = std::env::var(API_BASE_ENV) {
            config.api.base_url = base_url;
        }
        Ok(config)
    }

    /// Load a specific file; defaults when it does not exist.
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        toml::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// OS-specific config file path
    pub fn config_file_path() -> Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;

        path.push("arcanas-console");
        path.push("config.toml");
        Ok(path)
    }
}
