//! Tablepilot - LLM-supervised data analysis for CSV datasets
//!
//! A CLI tool that lets a supervisor model route a CSV dataset through
//! cleaning, exploratory analysis, clustering, and visualization
//! workers until the requested pipeline has actually completed.
//!
//! Exit codes:
//!   0 - Session completed (the completion gate approved termination)
//!   1 - Runtime error (connection, config, unreadable dataset, etc.)
//!   2 - Session did not converge within the step ceiling

mod cli;
mod config;
mod dataset;
mod llm;
mod models;
mod report;
mod session;
mod supervisor;
mod worker;

use anyhow::{Context, Result};
use chrono::Utc;
use cli::{Args, OutputFormat};
use config::Config;
use dataset::Frame;
use llm::{LlmClient, LlmConfig};
use models::{SessionMetadata, SessionReport, SessionStatus};
use session::{ControlLoop, SessionState};
use std::path::Path;
use std::time::Instant;
use supervisor::Router;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use worker::WorkerRunner;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("Tablepilot v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    // Run the session
    match run_session(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Session failed: {}", e);
            eprintln!("\n❌ Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .tablepilot.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(".tablepilot.toml");

    if path.exists() {
        eprintln!("⚠️  .tablepilot.toml already exists. Remove it first or edit it manually.");
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).context("Failed to write .tablepilot.toml")?;

    println!("✅ Created .tablepilot.toml with default settings.");
    println!("   Edit it to customize model, ceilings, and analysis thresholds.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run the complete supervised session. Returns exit code (0 or 2).
async fn run_session(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    // Load configuration
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    // Workers receive an absolute, unambiguous dataset reference.
    let dataset = std::fs::canonicalize(args.dataset_path()).with_context(|| {
        format!(
            "Failed to resolve dataset path: {}",
            args.dataset_path().display()
        )
    })?;

    // Try to load config from the dataset's directory
    if args.config.is_none() {
        if let Ok(Some(dataset_config)) = Config::load_from_dataset_dir(&dataset) {
            info!("Found .tablepilot.toml next to the dataset");
            config = dataset_config;
            config.merge_with_args(&args);
        }
    }

    // Handle --dry-run: inspect the dataset and exit
    if args.dry_run {
        return handle_dry_run(&dataset);
    }

    println!("📊 Dataset: {}", dataset.display());
    println!("🤖 Initializing supervisor...");
    println!("   Model: {}", config.model.name);
    println!("   Ollama: {}", config.model.ollama_url);
    println!(
        "   Ceilings: {} session steps, {} iterations per worker",
        config.limits.max_steps, config.limits.worker_max_iterations
    );

    let llm = LlmClient::new(LlmConfig {
        base_url: config.model.ollama_url.clone(),
        model: config.model.name.clone(),
        temperature: config.model.temperature,
        timeout_seconds: config.model.timeout_seconds,
        retries: config.model.retries,
        show_progress: !args.quiet,
    });

    let router = Router::new(&llm, config.limits.max_context_messages);
    let runner = WorkerRunner::new(&llm, config.analysis.clone(), &config.limits);
    let state = SessionState::new(dataset.clone(), args.request.clone());

    println!("\n🔁 Running supervised analysis...\n");
    let result = ControlLoop::new(router, runner, state, &config.limits)
        .run()
        .await;

    // Build the session report
    let duration = start_time.elapsed().as_secs_f64();
    let session_report = SessionReport {
        metadata: SessionMetadata {
            initial_dataset: dataset.display().to_string(),
            model_used: config.model.name.clone(),
            status: result.status,
            steps_used: result.steps_used,
            max_steps: config.limits.max_steps,
            finished_at: Utc::now(),
            duration_seconds: duration,
        },
        history: result.state.history().to_vec(),
        final_dataset: result.state.active_dataset().display().to_string(),
    };

    println!("\n📝 Writing session report...");
    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&session_report)?,
        OutputFormat::Markdown => {
            report::generate_markdown_report(&session_report, &config.report)
        }
    };
    std::fs::write(&args.output, &output)
        .with_context(|| format!("Failed to write report to {}", args.output.display()))?;

    // Print summary
    println!("\n📊 Session Summary:");
    println!("   Status: {}", result.status);
    println!(
        "   Steps: {} of {}",
        result.steps_used, config.limits.max_steps
    );
    println!("   History entries: {}", session_report.history.len());
    println!("   Final dataset: {}", session_report.final_dataset);
    println!("   Duration: {:.1}s", duration);
    println!("\n✅ Report saved to: {}", args.output.display());

    match result.status {
        SessionStatus::Completed => Ok(0),
        SessionStatus::DidNotConverge => {
            eprintln!(
                "\n⛔ Session did not converge within {} steps. Partial trace kept (exit code 2).",
                config.limits.max_steps
            );
            Ok(2)
        }
    }
}

/// Handle --dry-run: inspect the dataset, print shape and types, exit.
fn handle_dry_run(dataset: &Path) -> Result<i32> {
    println!("\n🔍 Dry run: inspecting dataset (no LLM call)...\n");

    let frame = Frame::load(dataset)?;
    println!(
        "   Rows: {} | Columns: {}",
        frame.row_count(),
        frame.column_count()
    );

    for (idx, name) in frame.headers().iter().enumerate() {
        let kind = if frame.is_numeric(idx) {
            "numeric"
        } else {
            "text"
        };
        let nulls = frame.row_count() - frame.column(idx).non_null_count();
        if nulls > 0 {
            println!("     📄 {} ({}, {} nulls)", name, kind, nulls);
        } else {
            println!("     📄 {} ({})", name, kind);
        }
    }

    println!("\n✅ Dry run complete. No LLM calls were made.");
    Ok(0)
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from .tablepilot.toml");
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
