//! Configuration loading, validation, and management for taskloop.
//!
//! Loads configuration from `~/.taskloop/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.taskloop/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Override the provider endpoint (proxies, tests)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Model used for every query
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub temperature: f32,

    /// Output token cap per model query
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentSection,

    /// History compression settings
    #[serde(default)]
    pub context: ContextSection,

    /// Provider retry settings
    #[serde(default)]
    pub retry: RetrySection,

    /// Event and persistence settings
    #[serde(default)]
    pub session: SessionSection,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_max_output_tokens() -> u32 {
    8192
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("agent", &self.agent)
            .field("context", &self.context)
            .field("retry", &self.retry)
            .field("session", &self.session)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Loop iterations before giving up
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Expose `return_control_to_user` instead of `complete`
    #[serde(default = "default_true")]
    pub interactive_mode: bool,

    /// Record a one-line digest after every tool result
    #[serde(default)]
    pub step_summaries: bool,

    /// Replace the built-in system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_max_turns() -> u32 {
    10
}
fn default_true() -> bool {
    true
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            interactive_mode: true,
            step_summaries: false,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSection {
    /// Maximum token cost of the live history sent with a query
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    /// Most recent turns never compressed
    #[serde(default = "default_keep_recent_turns")]
    pub keep_recent_turns: usize,

    /// Output cap for the summarization request
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,

    /// Consecutive summarization failures before falling back to dropping turns
    #[serde(default = "default_max_summary_failures")]
    pub max_summary_failures: u32,
}

fn default_token_budget() -> usize {
    120_000
}
fn default_keep_recent_turns() -> usize {
    3
}
fn default_summary_max_tokens() -> u32 {
    1024
}
fn default_max_summary_failures() -> u32 {
    2
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            keep_recent_turns: default_keep_recent_turns(),
            summary_max_tokens: default_summary_max_tokens(),
            max_summary_failures: default_max_summary_failures(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Delay is multiplied by a random factor in `[1 - jitter, 1 + jitter]`
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_retries() -> u32 {
    2
}
fn default_base_delay_ms() -> u64 {
    15_000
}
fn default_max_delay_ms() -> u64 {
    60_000
}
fn default_jitter() -> f64 {
    0.2
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    /// Directory for JSONL session logs; unset disables persistence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    /// Events buffered per subscriber before the oldest are dropped
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_event_buffer() -> usize {
    256
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            dir: None,
            event_buffer: default_event_buffer(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.taskloop/config.toml).
    ///
    /// Environment overrides:
    /// - `TASKLOOP_API_KEY` (highest priority), then `ANTHROPIC_API_KEY`
    /// - `TASKLOOP_MODEL`
    /// - `TASKLOOP_BASE_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("TASKLOOP_API_KEY").or_else(|| lookup("ANTHROPIC_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(model) = lookup("TASKLOOP_MODEL") {
            self.model = model;
        }
        if let Some(url) = lookup("TASKLOOP_BASE_URL") {
            self.base_url = Some(url);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".taskloop")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.max_output_tokens == 0 {
            return Err(ConfigError::ValidationError("max_output_tokens must be > 0".into()));
        }
        if self.agent.max_turns == 0 {
            return Err(ConfigError::ValidationError("agent.max_turns must be > 0".into()));
        }
        if self.context.token_budget == 0 {
            return Err(ConfigError::ValidationError("context.token_budget must be > 0".into()));
        }
        if self.context.keep_recent_turns == 0 {
            return Err(ConfigError::ValidationError(
                "context.keep_recent_turns must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::ValidationError(
                "retry.jitter must be between 0.0 and 1.0".into(),
            ));
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: default_model(),
            temperature: 0.0,
            max_output_tokens: default_max_output_tokens(),
            agent: AgentSection::default(),
            context: ContextSection::default(),
            retry: RetrySection::default(),
            session: SessionSection::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
