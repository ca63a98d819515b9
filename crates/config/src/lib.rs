//! Configuration loading, validation, and management for Cortex.
//!
//! Loads configuration from `--config`, `$CORTEX_CONFIG` or
//! `~/.cortex/config.toml`, with environment variable overrides for the
//! planner. Validates all settings at startup, before any backend is touched.

use cortex_core::backend::{BackendDescriptor, BackendId, CollisionPolicy, TransportSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// LLM settings for the planner
    #[serde(default)]
    pub planner: PlannerConfig,

    /// Reasoning loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Dispatcher timeouts and naming policy
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Tool backends, in descriptor order
    #[serde(default)]
    pub backends: Vec<BackendEntry>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Provider name ("openrouter", "openai", "ollama", ...)
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Override for the provider's base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Bound on a single planner consultation
    #[serde(default = "default_planner_timeout")]
    pub timeout_secs: u64,

    /// Extra attempts after a failed consultation
    #[serde(default = "default_planner_retries")]
    pub max_retries: u32,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_planner_timeout() -> u64 {
    60
}
fn default_planner_retries() -> u32 {
    1
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for PlannerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannerConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_url: None,
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_planner_timeout(),
            max_retries: default_planner_retries(),
        }
    }
}

impl PlannerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Iteration budget per request
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Prefix the planner uses to mark a final answer
    #[serde(default = "default_marker")]
    pub final_answer_marker: String,

    /// Returned when the iteration budget runs out
    #[serde(default = "default_fallback_answer")]
    pub fallback_answer: String,

    /// Returned when the planner fails
    #[serde(default = "default_failure_answer")]
    pub failure_answer: String,

    /// Optional wall-clock bound on a whole request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

fn default_max_iterations() -> usize {
    8
}
fn default_marker() -> String {
    "FINAL_ANSWER:".into()
}
fn default_fallback_answer() -> String {
    "I'm sorry, I couldn't finish this request within the allowed number of steps.".into()
}
fn default_failure_answer() -> String {
    "I'm sorry, something went wrong while working on your request.".into()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            final_answer_marker: default_marker(),
            fallback_answer: default_fallback_answer(),
            failure_answer: default_failure_answer(),
            request_timeout_secs: None,
        }
    }
}

impl AgentConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Bound on connect + handshake + discovery of one backend
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Bound on one forwarded tool call
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    #[serde(default)]
    pub collision_policy: CollisionPolicy,
}

fn default_connect_timeout() -> u64 {
    10
}
fn default_call_timeout() -> u64 {
    30
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            call_timeout_secs: default_call_timeout(),
            collision_policy: CollisionPolicy::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// One `[[backends]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendEntry {
    pub id: String,

    /// Disabled entries are skipped entirely
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(flatten)]
    pub transport: TransportSpec,
}

fn default_true() -> bool {
    true
}

impl BackendEntry {
    pub fn descriptor(&self) -> BackendDescriptor {
        BackendDescriptor::new(BackendId::from(self.id.as_str()), self.transport.clone())
    }
}

impl AppConfig {
    /// Load configuration, resolving the file path in this order:
    /// the explicit path, `$CORTEX_CONFIG`, `~/.cortex/config.toml`.
    ///
    /// Only the default location may be absent. Environment overrides are
    /// applied afterwards:
    /// - `CORTEX_API_KEY`, `OPENROUTER_API_KEY`, `OPENAI_API_KEY` (first set wins,
    ///   only when no key is configured)
    /// - `CORTEX_PROVIDER`, `CORTEX_MODEL`
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = std::env::var("CORTEX_CONFIG").ok().map(PathBuf::from);
        let mut config = match explicit.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::load_required(&path)?,
            None => Self::load_from(&Self::config_dir().join("config.toml"))?,
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, falling back to
    /// defaults when the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_required(path)
    }

    fn load_required(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        tracing::debug!(
            path = %path.display(),
            backends = config.backends.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Apply planner overrides from a variable lookup (the process
    /// environment in production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.planner.api_key.is_none() {
            self.planner.api_key = lookup("CORTEX_API_KEY")
                .or_else(|| lookup("OPENROUTER_API_KEY"))
                .or_else(|| lookup("OPENAI_API_KEY"));
        }

        if let Some(provider) = lookup("CORTEX_PROVIDER") {
            self.planner.provider = provider;
        }

        if let Some(model) = lookup("CORTEX_MODEL") {
            self.planner.model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".cortex")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.planner.temperature) {
            return Err(ConfigError::ValidationError(
                "planner.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        if self.agent.final_answer_marker.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "agent.final_answer_marker must not be empty".into(),
            ));
        }

        if self.dispatcher.connect_timeout_secs == 0 || self.dispatcher.call_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "dispatcher timeouts must be greater than zero".into(),
            ));
        }

        let mut seen = HashSet::new();
        for entry in &self.backends {
            if entry.id.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "backend id must not be empty".into(),
                ));
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate backend id '{}'",
                    entry.id
                )));
            }
            match &entry.transport {
                TransportSpec::Pipe { command, .. } if command.trim().is_empty() => {
                    return Err(ConfigError::ValidationError(format!(
                        "backend '{}': command must not be empty",
                        entry.id
                    )));
                }
                TransportSpec::Stream { host, port } if host.trim().is_empty() || *port == 0 => {
                    return Err(ConfigError::ValidationError(format!(
                        "backend '{}': host and a non-zero port are required",
                        entry.id
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Descriptors of every enabled backend, in configuration order.
    ///
    /// Starting the agent with none is a configuration error.
    pub fn backend_descriptors(&self) -> Result<Vec<BackendDescriptor>, ConfigError> {
        let descriptors: Vec<_> = self
            .backends
            .iter()
            .filter(|entry| entry.enabled)
            .map(BackendEntry::descriptor)
            .collect();

        if descriptors.is_empty() {
            return Err(ConfigError::ValidationError(
                "no enabled [[backends]] configured".into(),
            ));
        }
        Ok(descriptors)
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.planner.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
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

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::backend::TransportKind;
    use std::collections::HashMap;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.planner.provider, "openrouter");
        assert_eq!(config.agent.max_iterations, 8);
        assert_eq!(config.agent.final_answer_marker, "FINAL_ANSWER:");
        assert_eq!(
            config.dispatcher.collision_policy,
            CollisionPolicy::FirstRegistered
        );
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.planner.model, config.planner.model);
        assert_eq!(parsed.dispatcher.call_timeout_secs, 30);
    }

    #[test]
    fn parses_both_transports_in_order() {
        let file = write_config(
            r#"
            [dispatcher]
            collision_policy = "namespaced"

            [[backends]]
            id = "math"
            transport = "pipe"
            command = "cortex"
            args = ["serve"]

            [[backends]]
            id = "sheets"
            transport = "stream"
            host = "127.0.0.1"
            port = 8051
            "#,
        );
        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.dispatcher.collision_policy, CollisionPolicy::Namespaced);

        let descriptors = config.backend_descriptors().unwrap();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].id.as_str(), "math");
        assert_eq!(descriptors[0].transport.kind(), TransportKind::Pipe);
        assert_eq!(descriptors[0].transport.target(), "cortex serve");
        assert_eq!(descriptors[1].transport.target(), "127.0.0.1:8051");
    }

    #[test]
    fn unknown_transport_is_parse_error() {
        let file = write_config(
            r#"
            [[backends]]
            id = "x"
            transport = "carrier_pigeon"
            "#,
        );
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn missing_port_is_parse_error() {
        let file = write_config(
            r#"
            [[backends]]
            id = "sheets"
            transport = "stream"
            host = "localhost"
            "#,
        );
        assert!(matches!(
            AppConfig::load_from(file.path()),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn duplicate_backend_id_rejected() {
        let file = write_config(
            r#"
            [[backends]]
            id = "math"
            transport = "pipe"
            command = "a"

            [[backends]]
            id = "math"
            transport = "pipe"
            command = "b"
            "#,
        );
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("duplicate backend id 'math'"));
    }

    #[test]
    fn zero_iterations_rejected() {
        let mut config = AppConfig::default();
        config.agent.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.planner.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.planner.provider, "openrouter");
        assert!(config.backends.is_empty());
    }

    #[test]
    fn explicit_missing_file_is_read_error() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/cortex.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn no_enabled_backends_is_error() {
        let file = write_config(
            r#"
            [[backends]]
            id = "math"
            enabled = false
            transport = "pipe"
            command = "cortex"
            "#,
        );
        let config = AppConfig::load_from(file.path()).unwrap();
        assert!(config.backend_descriptors().is_err());
        assert!(AppConfig::default().backend_descriptors().is_err());
    }

    #[test]
    fn env_overrides_apply_in_priority_order() {
        let vars: HashMap<&str, &str> = [
            ("OPENROUTER_API_KEY", "or-key"),
            ("OPENAI_API_KEY", "oa-key"),
            ("CORTEX_MODEL", "local/llama"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.planner.api_key.as_deref(), Some("or-key"));
        assert_eq!(config.planner.model, "local/llama");
        assert_eq!(config.planner.provider, "openrouter");
    }

    #[test]
    fn configured_key_beats_environment() {
        let mut config = AppConfig::default();
        config.planner.api_key = Some("from-file".into());
        config.apply_overrides(|k| (k == "CORTEX_API_KEY").then(|| "from-env".to_string()));
        assert_eq!(config.planner.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut config = AppConfig::default();
        config.planner.api_key = Some("sk-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("openrouter"));
        assert!(toml_str.contains("first_registered"));
    }
}
