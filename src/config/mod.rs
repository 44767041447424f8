pub mod validation;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;
use crate::eventstream::{FrameDecoder, MAX_FRAME_LEN};
use crate::stream::{StreamContext, DEFAULT_CONTEXT_WINDOW_TOKENS};

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Stream translation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Window used to turn a backend usage percentage into input tokens.
    #[serde(default = "default_context_window_tokens")]
    pub context_window_tokens: u64,
    /// Seconds between keepalive pings on the live path; 0 disables them.
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

fn default_context_window_tokens() -> u64 {
    DEFAULT_CONTEXT_WINDOW_TOKENS
}
fn default_keepalive_interval_secs() -> u64 {
    25
}
fn default_max_frame_bytes() -> usize {
    MAX_FRAME_LEN
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            context_window_tokens: default_context_window_tokens(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl StreamConfig {
    #[must_use]
    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_secs > 0).then(|| Duration::from_secs(self.keepalive_interval_secs))
    }

    /// A frame decoder honoring `max_frame_bytes`.
    #[must_use]
    pub fn decoder(&self) -> FrameDecoder {
        FrameDecoder::new().with_max_frame_len(self.max_frame_bytes)
    }

    /// A fresh per-request context sized to `context_window_tokens`.
    #[must_use]
    pub fn new_context(
        &self,
        model: impl Into<String>,
        input_tokens: u64,
        thinking_enabled: bool,
    ) -> StreamContext {
        StreamContext::new(model, input_tokens, thinking_enabled)
            .with_context_window(self.context_window_tokens)
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// `text` or `json`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Top-level bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] when parsing fails, or
/// [`ConfigError::Validation`] when semantic validation fails.
pub fn parse_config(contents: &str) -> Result<BridgeConfig, ConfigError> {
    let config: BridgeConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<BridgeConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}
