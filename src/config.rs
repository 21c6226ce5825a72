//! Configuration loader and validator for the portal block tools.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable that overrides `api.token` when set.
pub const TOKEN_ENV: &str = "PORTAL_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub api: Api,
    #[serde(default)]
    pub uploads: Uploads,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub request_timeout_ms: u64,
}

/// Portal REST API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Api {
    pub base_url: String,
    #[serde(default)]
    pub token: String,
}

/// Client-side upload limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Uploads {
    pub max_image_mb: u64,
}

impl Default for Uploads {
    fn default() -> Self {
        Self { max_image_mb: 10 }
    }
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.app.request_timeout_ms)
    }

    /// Token from `PORTAL_TOKEN` if present, otherwise `api.token`.
    pub fn resolved_token(&self) -> Option<String> {
        std::env::var(TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| Some(self.api.token.clone()).filter(|t| !t.trim().is_empty()))
    }

    pub fn max_image_bytes(&self) -> u64 {
        self.uploads.max_image_mb * 1024 * 1024
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.request_timeout_ms == 0 {
        return Err(ConfigError::Invalid("app.request_timeout_ms must be > 0"));
    }

    let base = cfg.api.base_url.trim();
    if base.is_empty() {
        return Err(ConfigError::Invalid("api.base_url must be non-empty"));
    }
    if reqwest::Url::parse(base).is_err() {
        return Err(ConfigError::Invalid("api.base_url must be an absolute URL"));
    }
    if !base.ends_with('/') {
        return Err(ConfigError::Invalid("api.base_url must end with '/'"));
    }

    if !(1..=100).contains(&cfg.uploads.max_image_mb) {
        return Err(ConfigError::Invalid("uploads.max_image_mb must be within 1..=100"));
    }

    Ok(())
}

/// Reference configuration, also used by tests.
pub fn example() -> &'static str {
    r#"app:
  request_timeout_ms: 15000

api:
  base_url: "http://localhost:8000/api/"
  token: "YOUR_API_TOKEN"

uploads:
  max_image_mb: 10
"#
}
