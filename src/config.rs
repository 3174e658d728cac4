//! Runtime configuration
//!
//! Configuration is read from an optional YAML file (path in `COURIER_CONFIG`)
//! and then patched with environment overrides. Every field has a default so
//! an empty environment yields a working development setup.

use anyhow::Context;
use serde::Deserialize;
use std::time::Duration;

use crate::proxy::target::TargetSource;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
}

/// Inbound listener settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind (e.g., "127.0.0.1:8080")
    pub listen_addr: String,

    /// Path prefix under which requests are forwarded
    pub mount_path: String,

    /// Largest request body buffered for forwarding
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            mount_path: "/api/proxy".to_string(),
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// When the base URL is (re)read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadPolicy {
    /// Read the environment variable on every request
    #[default]
    PerRequest,
    /// Read the environment variable once when the handler is built
    Startup,
}

/// Upstream target settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Fixed base URL; takes precedence over `base_url_env`
    pub base_url: Option<String>,

    /// Environment variable holding the base URL
    pub base_url_env: String,

    pub reload: ReloadPolicy,

    /// Trailing path segment of the base URL that is normalized away
    pub reserved_suffix: String,

    pub connect_timeout_ms: u64,

    /// Time allowed for the upstream to answer with a status line and headers
    pub request_timeout_ms: u64,

    /// Longest gap allowed between two chunks of a streamed upstream body
    pub body_idle_timeout_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            base_url_env: "API_BASE_URL".to_string(),
            reload: ReloadPolicy::PerRequest,
            reserved_suffix: "/api".to_string(),
            connect_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
            body_idle_timeout_ms: 30_000,
        }
    }
}

impl UpstreamConfig {
    /// Build the source the proxy resolves its base URL from.
    pub fn target_source(&self) -> TargetSource {
        if let Some(url) = &self.base_url {
            return TargetSource::Fixed(url.clone());
        }

        match self.reload {
            ReloadPolicy::PerRequest => TargetSource::Env(self.base_url_env.clone()),
            ReloadPolicy::Startup => {
                let value = std::env::var(&self.base_url_env).unwrap_or_default();
                if value.trim().is_empty() {
                    tracing::warn!(
                        var = %self.base_url_env,
                        "Upstream base URL not set at startup, requests will fail"
                    );
                }
                TargetSource::Fixed(value)
            }
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn body_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.body_idle_timeout_ms)
    }
}

impl Config {
    /// Load configuration from `COURIER_CONFIG` (if set) and the environment.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var("COURIER_CONFIG") {
            Ok(path) if !path.is_empty() => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file {}", path))?;
                tracing::info!(path = %path, "Loaded configuration file");
                Self::from_yaml(&raw)?
            }
            _ => Self::default(),
        };

        if let Ok(listen_addr) = std::env::var("LISTEN") {
            cfg.server.listen_addr = listen_addr;
        }

        Ok(cfg)
    }

    /// Parse a YAML document; missing sections and fields take defaults.
    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).context("Invalid configuration file")
    }
}
