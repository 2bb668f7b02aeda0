//! Configuration loading, validation, and management for planact.
//!
//! An [`EngineConfig`] is resolved once (file, then environment overrides,
//! then validation) and handed by reference to every phase. Nothing reads
//! configuration implicitly after construction.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Provider used for bare model names (no `provider/` prefix)
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Model used when a request does not name one
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Model aliases: alias → canonical `provider/model` id
    #[serde(default)]
    pub models: HashMap<String, String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per model call
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Wall-clock ceiling for each phase
    #[serde(default = "default_phase_timeout_secs")]
    pub phase_timeout_secs: u64,

    #[serde(default)]
    pub plan: PlanConfig,

    #[serde(default)]
    pub act: ActConfig,

    #[serde(default)]
    pub response: ResponseConfig,

    #[serde(default)]
    pub events: EventsConfig,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_phase_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Longest plan kept; extra steps are dropped
    #[serde(default = "default_plan_max_steps")]
    pub max_steps: usize,

    #[serde(default = "default_plan_temperature")]
    pub temperature: f32,
}

fn default_plan_max_steps() -> usize {
    10
}
fn default_plan_temperature() -> f32 {
    0.3
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            max_steps: default_plan_max_steps(),
            temperature: default_plan_temperature(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActConfig {
    /// Step budget `B`; the act loop runs at most `2 × B` iterations
    #[serde(default = "default_step_budget")]
    pub step_budget: usize,

    /// Model ↔ tool round trips allowed inside one step
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
}

fn default_step_budget() -> usize {
    5
}
fn default_max_tool_rounds() -> usize {
    5
}

impl ActConfig {
    /// Hard ceiling on act iterations, however many steps get inserted.
    pub fn max_iterations(&self) -> usize {
        self.step_budget.saturating_mul(2)
    }
}

impl Default for ActConfig {
    fn default() -> Self {
        Self {
            step_budget: default_step_budget(),
            max_tool_rounds: default_max_tool_rounds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Buffer size of the combined event stream and the text channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    128
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a file, then apply environment overrides:
    ///
    /// - `PLANACT_MODEL`
    /// - `PLANACT_PHASE_TIMEOUT_SECS`
    /// - `PLANACT_ACT_STEP_BUDGET`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path (missing file → defaults).
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

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the environment, in production).
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(model) = lookup("PLANACT_MODEL") {
            self.default_model = model;
        }
        if let Some(secs) = lookup("PLANACT_PHASE_TIMEOUT_SECS") {
            self.phase_timeout_secs = parse_override("PLANACT_PHASE_TIMEOUT_SECS", &secs)?;
        }
        if let Some(budget) = lookup("PLANACT_ACT_STEP_BUDGET") {
            self.act.step_budget = parse_override("PLANACT_ACT_STEP_BUDGET", &budget)?;
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("temperature", self.temperature),
            ("plan.temperature", self.plan.temperature),
            ("response.temperature", self.response.temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be between 0.0 and 2.0"
                )));
            }
        }

        if self.phase_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "phase_timeout_secs must be > 0".into(),
            ));
        }

        if self.plan.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "plan.max_steps must be > 0".into(),
            ));
        }

        if self.act.step_budget == 0 {
            return Err(ConfigError::ValidationError(
                "act.step_budget must be > 0".into(),
            ));
        }

        if self.act.max_tool_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "act.max_tool_rounds must be > 0".into(),
            ));
        }

        if self.events.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "events.channel_capacity must be > 0".into(),
            ));
        }

        if self.default_model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "default_model must not be empty".into(),
            ));
        }

        Ok(())
    }

    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.phase_timeout_secs)
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            default_model: default_model(),
            models: HashMap::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            phase_timeout_secs: default_phase_timeout_secs(),
            plan: PlanConfig::default(),
            act: ActConfig::default(),
            response: ResponseConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{key} has invalid value '{raw}'")))
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
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.phase_timeout(), Duration::from_secs(120));
        assert_eq!(config.act.max_iterations(), 10);
    }

    #[test]
    fn config_roundtrip_toml() {
        let toml_str = EngineConfig::default_toml();
        let parsed = EngineConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(parsed.default_model, "openai/gpt-4o-mini");
        assert_eq!(parsed.act.step_budget, 5);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
phase_timeout_secs = 30

[act]
step_budget = 3

[models]
fast = "openai/gpt-4o-mini"
"#,
        )
        .unwrap();
        assert_eq!(config.phase_timeout_secs, 30);
        assert_eq!(config.act.step_budget, 3);
        assert_eq!(config.act.max_tool_rounds, 5);
        assert_eq!(config.plan.max_steps, 10);
        assert_eq!(config.models["fast"], "openai/gpt-4o-mini");
    }

    #[test]
    fn invalid_values_rejected() {
        let config = EngineConfig {
            temperature: 5.0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.act.step_budget = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("step_budget"));

        assert!(EngineConfig::from_toml_str("phase_timeout_secs = 0").is_err());
    }

    #[test]
    fn zero_plan_steps_rejected() {
        let err = EngineConfig::from_toml_str("[plan]\nmax_steps = 0").unwrap_err();
        assert!(err.to_string().contains("plan.max_steps"));
    }

    #[test]
    fn overrides_apply() {
        let mut config = EngineConfig::default();
        config
            .apply_overrides(|key| match key {
                "PLANACT_MODEL" => Some("anthropic/claude-sonnet-4".into()),
                "PLANACT_ACT_STEP_BUDGET" => Some("7".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.default_model, "anthropic/claude-sonnet-4");
        assert_eq!(config.act.step_budget, 7);
        assert_eq!(config.phase_timeout_secs, 120);
    }

    #[test]
    fn malformed_override_rejected() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_overrides(|key| (key == "PLANACT_PHASE_TIMEOUT_SECS").then(|| "soon".into()))
            .unwrap_err();
        assert!(err.to_string().contains("PLANACT_PHASE_TIMEOUT_SECS"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = EngineConfig::load_from(Path::new("/nonexistent/planact.toml")).unwrap();
        assert_eq!(config.default_provider, "openai");
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "default_model = \"local/llama3\"\n[plan]\nmax_steps = 4").unwrap();
        let config = EngineConfig::load_from(file.path()).unwrap();
        assert_eq!(config.default_model, "local/llama3");
        assert_eq!(config.plan.max_steps, 4);
    }

    #[test]
    fn unparseable_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "act = 12").unwrap();
        let err = EngineConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }
}
