//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// Tablepilot - LLM-supervised data analysis for CSV datasets
///
/// Point it at a CSV file and a request; a supervisor model routes the
/// work across cleaning, clustering, and visualization workers until
/// the whole pipeline has actually run. Markdown/JSON session reports.
///
/// Examples:
///   tablepilot --dataset ./sales.csv
///   tablepilot --dataset ./sales.csv --request "cluster the customers into 4 groups" --k 4
///   tablepilot --dataset ./sales.csv --model qwen2.5:14b --format json
///   tablepilot --dataset ./sales.csv --dry-run
///   tablepilot --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// CSV dataset to analyze
    ///
    /// Not required when using --init-config.
    #[arg(
        short,
        long,
        value_name = "FILE",
        required_unless_present = "init_config"
    )]
    pub dataset: Option<PathBuf>,

    /// Analysis request driving the session
    #[arg(
        short,
        long,
        default_value = "Clean the data, run exploratory analysis, cluster the rows, and visualize the clusters."
    )]
    pub request: String,

    /// Ollama model used for routing and worker reasoning
    ///
    /// Needs tool-calling support. Can also be set via TABLEPILOT_MODEL
    /// or .tablepilot.toml.
    #[arg(short, long, default_value = "llama3.2:latest", env = "TABLEPILOT_MODEL")]
    pub model: String,

    /// Ollama API endpoint URL
    #[arg(long, default_value = "http://localhost:11434", env = "OLLAMA_URL")]
    pub ollama_url: String,

    /// Output file path for the session report
    #[arg(
        short,
        long,
        default_value = "tablepilot_session.md",
        value_name = "FILE"
    )]
    pub output: PathBuf,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Temperature for LLM responses (0.0 - 1.0)
    ///
    /// Lower values produce more consistent routing decisions
    #[arg(long, default_value = "0.1")]
    pub temperature: f32,

    /// Request timeout in seconds
    ///
    /// How long to wait for a single model response. Default: from
    /// config or 300s.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Global step ceiling for the whole session
    ///
    /// Counts every routing decision and worker invocation. Must be
    /// strictly greater than --worker-iterations.
    #[arg(long, default_value = "100", value_name = "COUNT")]
    pub max_steps: usize,

    /// Iteration ceiling inside a single worker invocation
    #[arg(long, default_value = "50", value_name = "COUNT")]
    pub worker_iterations: usize,

    /// Cluster count passed to the clustering worker (default: 3)
    #[arg(long, value_name = "K")]
    pub k: Option<usize>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .tablepilot.toml in the current
    /// directory, then next to the dataset
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Dry run: inspect the dataset without calling the LLM
    ///
    /// Shows shape and column types and exits.
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .tablepilot.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the session report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the dataset path (validated to be present first).
    pub fn dataset_path(&self) -> &std::path::Path {
        self.dataset.as_deref().unwrap_or_else(|| std::path::Path::new(""))
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        let Some(ref dataset) = self.dataset else {
            return Err("A dataset file is required".to_string());
        };
        if !dataset.exists() {
            return Err(format!("Dataset does not exist: {}", dataset.display()));
        }
        if !dataset.is_file() {
            return Err(format!("Dataset is not a file: {}", dataset.display()));
        }

        // Validate Ollama URL format (not needed for dry-run)
        if !self.dry_run
            && !self.ollama_url.starts_with("http://")
            && !self.ollama_url.starts_with("https://")
        {
            return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
        }

        // Validate temperature range
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err("Temperature must be between 0.0 and 1.0".to_string());
        }

        // The global ceiling must dominate a single worker run, or one
        // invocation could swallow the whole session budget.
        if self.max_steps == 0 {
            return Err("Max steps must be at least 1".to_string());
        }
        if self.worker_iterations == 0 {
            return Err("Worker iterations must be at least 1".to_string());
        }
        if self.max_steps <= self.worker_iterations {
            return Err("Max steps must be strictly greater than worker iterations".to_string());
        }

        if let Some(k) = self.k {
            if k == 0 {
                return Err("Cluster count must be at least 1".to_string());
            }
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        // Validate timeout if provided
        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn make_args(dataset: PathBuf) -> Args {
        Args {
            dataset: Some(dataset),
            request: "analyze".to_string(),
            model: "test".to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            output: PathBuf::from("session.md"),
            format: OutputFormat::Markdown,
            temperature: 0.1,
            timeout: None,
            max_steps: 100,
            worker_iterations: 50,
            k: None,
            config: None,
            verbose: false,
            quiet: false,
            dry_run: false,
            init_config: false,
        }
    }

    #[test]
    fn test_validation_accepts_existing_dataset() {
        let file = NamedTempFile::new().unwrap();
        let args = make_args(file.path().to_path_buf());
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_missing_dataset() {
        let args = make_args(PathBuf::from("/definitely/not/here.csv"));
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_invalid_url() {
        let file = NamedTempFile::new().unwrap();
        let mut args = make_args(file.path().to_path_buf());
        args.ollama_url = "localhost:11434".to_string();
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_requires_ceiling_above_worker_limit() {
        let file = NamedTempFile::new().unwrap();
        let mut args = make_args(file.path().to_path_buf());
        args.max_steps = 50;
        args.worker_iterations = 50;
        assert!(args.validate().is_err());

        args.max_steps = 51;
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let file = NamedTempFile::new().unwrap();
        let mut args = make_args(file.path().to_path_buf());
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let file = NamedTempFile::new().unwrap();
        let mut args = make_args(file.path().to_path_buf());
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
