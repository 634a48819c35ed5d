//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.tablepilot.toml` files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Step and iteration ceilings.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Dataset analysis settings.
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Session report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default session report path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
        }
    }
}

fn default_output() -> String {
    "tablepilot_session.md".to_string()
}

/// LLM model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Default model name.
    #[serde(default = "default_model")]
    pub name: String,

    /// Ollama API URL.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Number of transport retries per request.
    #[serde(default = "default_retries")]
    pub retries: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            ollama_url: default_ollama_url(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout(),
            retries: default_retries(),
        }
    }
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_timeout() -> u64 {
    300
}

fn default_retries() -> usize {
    3
}

/// Step and iteration ceilings. Fixed at session start; the control
/// loop never mutates them mid-session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Global step ceiling across the whole session. Must stay
    /// strictly greater than `worker_max_iterations`.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Iteration ceiling inside a single worker invocation.
    #[serde(default = "default_worker_max_iterations")]
    pub worker_max_iterations: usize,

    /// History entries rendered into prompts (sliding window).
    #[serde(default = "default_max_context_messages")]
    pub max_context_messages: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            worker_max_iterations: default_worker_max_iterations(),
            max_context_messages: default_max_context_messages(),
        }
    }
}

fn default_max_steps() -> usize {
    100
}

fn default_worker_max_iterations() -> usize {
    50
}

fn default_max_context_messages() -> usize {
    20
}

/// Dataset analysis settings shared by the worker operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Flag column pairs whose |r| exceeds this threshold.
    #[serde(default = "default_correlation_threshold")]
    pub correlation_threshold: f64,

    /// Default cluster count.
    #[serde(default = "default_k")]
    pub default_k: usize,

    /// Drop a column when its null fraction exceeds this threshold.
    #[serde(default = "default_drop_null_threshold")]
    pub drop_null_threshold: f64,

    /// Absolute row-retention floor for cleaning.
    #[serde(default = "default_min_retained_rows")]
    pub min_retained_rows: usize,

    /// Fractional row-retention floor for cleaning.
    #[serde(default = "default_min_retained_fraction")]
    pub min_retained_fraction: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            correlation_threshold: default_correlation_threshold(),
            default_k: default_k(),
            drop_null_threshold: default_drop_null_threshold(),
            min_retained_rows: default_min_retained_rows(),
            min_retained_fraction: default_min_retained_fraction(),
        }
    }
}

fn default_correlation_threshold() -> f64 {
    0.85
}

fn default_k() -> usize {
    3
}

fn default_drop_null_threshold() -> f64 {
    0.5
}

fn default_min_retained_rows() -> usize {
    5
}

fn default_min_retained_fraction() -> f64 {
    0.1
}

/// Session report settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Include raw tool output entries in the transcript.
    #[serde(default = "default_true")]
    pub include_tool_output: bool,

    /// Truncate transcript entries to this many characters (0 = keep
    /// everything).
    #[serde(default = "default_max_entry_chars")]
    pub max_entry_chars: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            include_tool_output: true,
            max_entry_chars: default_max_entry_chars(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_entry_chars() -> usize {
    2000
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(".tablepilot.toml");

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Try to load configuration from the dataset's directory.
    pub fn load_from_dataset_dir(dataset: &Path) -> Result<Option<Self>> {
        let Some(dir) = dataset.parent() else {
            return Ok(None);
        };
        let config_path = dir.join(".tablepilot.toml");

        if config_path.exists() {
            Ok(Some(Self::load(&config_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        // Model settings - always override since they have defaults in CLI
        self.model.name = args.model.clone();
        self.model.ollama_url = args.ollama_url.clone();
        self.model.temperature = args.temperature;

        // Timeout - only override if explicitly provided via CLI
        if let Some(timeout) = args.timeout {
            self.model.timeout_seconds = timeout;
        }

        // Ceilings - always override
        self.limits.max_steps = args.max_steps;
        self.limits.worker_max_iterations = args.worker_iterations;

        // Optional analysis settings
        if let Some(k) = args.k {
            self.analysis.default_k = k;
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.model.name, "llama3.2:latest");
        assert_eq!(config.limits.max_steps, 100);
        assert_eq!(config.limits.worker_max_iterations, 50);
        assert!(config.limits.max_steps > config.limits.worker_max_iterations);
        assert_eq!(config.analysis.default_k, 3);
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
output = "session.md"
verbose = true

[model]
name = "qwen2.5:14b"
temperature = 0.2

[limits]
max_steps = 60
worker_max_iterations = 30

[analysis]
correlation_threshold = 0.9
default_k = 4
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.output, "session.md");
        assert!(config.general.verbose);
        assert_eq!(config.model.name, "qwen2.5:14b");
        assert_eq!(config.model.temperature, 0.2);
        assert_eq!(config.limits.max_steps, 60);
        assert_eq!(config.analysis.correlation_threshold, 0.9);
        assert_eq!(config.analysis.default_k, 4);
        // Unspecified sections keep their defaults.
        assert_eq!(config.model.timeout_seconds, 300);
        assert_eq!(config.analysis.min_retained_rows, 5);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(!toml_str.is_empty());
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[model]"));
        assert!(toml_str.contains("[limits]"));
        assert!(toml_str.contains("[analysis]"));
    }
}
