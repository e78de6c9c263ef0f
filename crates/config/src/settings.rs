//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub synthesis: SynthesisConfig,

    #[serde(default)]
    pub segmenter: SegmenterConfig,

    #[serde(default)]
    pub response: ResponseConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.synthesis.max_concurrent == 0 {
            return Err(ConfigError::invalid(
                "synthesis.max_concurrent",
                "must allow at least one concurrent synthesis call",
            ));
        }

        if self.server.max_input_chars == 0 {
            return Err(ConfigError::invalid(
                "server.max_input_chars",
                "must be greater than zero",
            ));
        }

        if self.server.rate_limit.enabled {
            if self.server.rate_limit.window_secs == 0 {
                return Err(ConfigError::invalid(
                    "server.rate_limit.window_secs",
                    "window length must be greater than zero",
                ));
            }
            if self.server.rate_limit.max_requests == 0 {
                return Err(ConfigError::invalid(
                    "server.rate_limit.max_requests",
                    "would reject every request; disable the limiter instead",
                ));
            }
        }

        if self.segmenter.terminators.is_empty() {
            return Err(ConfigError::invalid(
                "segmenter.terminators",
                "at least one terminal punctuation character is required",
            ));
        }

        if self.session.sweep_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "session.sweep_interval_secs",
                "must be greater than zero",
            ));
        }

        if self.session.sweep_interval_secs > self.session.idle_timeout_secs {
            return Err(ConfigError::invalid(
                "session.sweep_interval_secs",
                format!(
                    "sweep interval ({}s) exceeds idle timeout ({}s)",
                    self.session.sweep_interval_secs, self.session.idle_timeout_secs
                ),
            ));
        }

        if self.persistence.turn_log_path.is_none() && self.persistence.memory_capacity == 0 {
            return Err(ConfigError::invalid(
                "persistence.memory_capacity",
                "must keep at least one record when no turn log is configured",
            ));
        }

        if self.session.history_turns == 0 {
            tracing::warn!("session.history_turns is 0; the LLM will see no prior context");
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum concurrently registered sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Maximum characters accepted in one text message
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,

    /// Capacity of each session's outbound message queue
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,

    /// CORS allowed origins (empty allows any)
    #[serde(default)]
    pub cors_origins: Vec<String>,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_max_sessions() -> usize {
    1000
}
fn default_max_input_chars() -> usize {
    500
}
fn default_outbound_buffer() -> usize {
    256
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_sessions: default_max_sessions(),
            max_input_chars: default_max_input_chars(),
            outbound_buffer: default_outbound_buffer(),
            cors_origins: Vec::new(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Fixed-window rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Requests accepted per window per session
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_max_requests() -> u32 {
    20
}
fn default_window_secs() -> u64 {
    60
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

/// Session lifetime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sessions idle longer than this are evicted
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// How often the idle sweeper runs
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// History entries kept per session (one entry per message)
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

fn default_idle_timeout() -> u64 {
    300
}
fn default_sweep_interval() -> u64 {
    30
}
fn default_history_turns() -> usize {
    20
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            history_turns: default_history_turns(),
        }
    }
}

/// Speech synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Process-wide cap on in-flight synthesis calls
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Output sample rate (Hz)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Per-call timeout in seconds
    #[serde(default = "default_synthesis_timeout")]
    pub timeout_secs: u64,
}

fn default_max_concurrent() -> usize {
    4
}
fn default_sample_rate() -> u32 {
    24000
}
fn default_synthesis_timeout() -> u64 {
    30
}

impl SynthesisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            sample_rate: default_sample_rate(),
            timeout_secs: default_synthesis_timeout(),
        }
    }
}

/// Sentence segmentation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmenterConfig {
    /// Terminal punctuation characters; a run of them ends a sentence
    #[serde(default = "default_terminators")]
    pub terminators: Vec<char>,

    /// Sentences shorter than this (trimmed, in chars) merge into the next one
    #[serde(default = "default_min_sentence_chars")]
    pub min_sentence_chars: usize,
}

fn default_terminators() -> Vec<char> {
    vec!['。', '！', '？', '!', '?', '.']
}
fn default_min_sentence_chars() -> usize {
    4
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            terminators: default_terminators(),
            min_sentence_chars: default_min_sentence_chars(),
        }
    }
}

/// Response coordination configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// Replies shorter than this are synthesized in one call after streaming
    #[serde(default = "default_min_parallel_chars")]
    pub min_parallel_chars: usize,

    /// Serve greetings and cached context-free replies without the LLM
    #[serde(default = "default_true")]
    pub quick_replies: bool,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

fn default_min_parallel_chars() -> usize {
    20
}
fn default_cache_capacity() -> usize {
    256
}
fn default_cache_ttl() -> u64 {
    600
}

impl ResponseConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            min_parallel_chars: default_min_parallel_chars(),
            quick_replies: true,
            cache_capacity: default_cache_capacity(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

/// Tool invocation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_search_cache_capacity")]
    pub search_cache_capacity: usize,

    #[serde(default = "default_search_cache_ttl")]
    pub search_cache_ttl_secs: u64,

    /// Upper bound for any single tool call
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,
}

fn default_search_cache_capacity() -> usize {
    128
}
fn default_search_cache_ttl() -> u64 {
    300
}
fn default_tool_timeout() -> u64 {
    10
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            search_cache_capacity: default_search_cache_capacity(),
            search_cache_ttl_secs: default_search_cache_ttl(),
            timeout_secs: default_tool_timeout(),
        }
    }
}

/// Turn persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// JSON-lines file receiving completed turns; in-memory store when unset
    #[serde(default)]
    pub turn_log_path: Option<String>,

    /// Records kept by the in-memory store before the oldest are dropped
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,
}

fn default_memory_capacity() -> usize {
    10_000
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            turn_log_path: None,
            memory_capacity: default_memory_capacity(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,

    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (PARLEY__ prefix, e.g. `PARLEY__SERVER__PORT`)
/// 2. config/{env}.toml (if env specified)
/// 3. config/default.toml
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder = builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("PARLEY")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.synthesis.max_concurrent, 4);
        assert_eq!(settings.server.rate_limit.window(), Duration::from_secs(60));
        assert!(settings.segmenter.terminators.contains(&'。'));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = Settings::default();
        settings.synthesis.max_concurrent = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.session.sweep_interval_secs = 600;
        settings.session.idle_timeout_secs = 60;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("session.sweep_interval_secs"));

        let mut settings = Settings::default();
        settings.segmenter.terminators.clear();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.persistence.memory_capacity = 0;
        assert!(settings.validate().is_err());
        settings.persistence.turn_log_path = Some("turns.jsonl".into());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_disabled_rate_limit_skips_window_checks() {
        let mut settings = Settings::default();
        settings.server.rate_limit.enabled = false;
        settings.server.rate_limit.window_secs = 0;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_deserialization_uses_defaults() {
        let json = r#"{ "synthesis": { "max_concurrent": 8 } }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.synthesis.max_concurrent, 8);
        assert_eq!(settings.synthesis.sample_rate, 24000);
        assert_eq!(settings.session.idle_timeout_secs, 300);
        assert_eq!(settings.persistence.memory_capacity, 10_000);
    }
}
