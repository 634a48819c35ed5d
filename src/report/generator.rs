//! Markdown and JSON session report generation.
//!
//! The exported report is the session's terminal output: metadata,
//! the full history trace, and the final dataset artifact path.

use anyhow::{Context, Result};

use crate::config::ReportConfig;
use crate::models::{Role, SessionMetadata, SessionReport, SessionStatus};

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &SessionReport, config: &ReportConfig) -> String {
    let mut output = String::new();

    output.push_str("# Tablepilot Session Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_trace_section(report, config));
    output.push_str(&generate_final_dataset_section(report));
    output.push_str(&generate_footer());

    output
}

/// Generate the JSON form of the report.
pub fn generate_json_report(report: &SessionReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("Failed to serialize session report")
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &SessionMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Dataset:** `{}`\n", metadata.initial_dataset));
    section.push_str(&format!("- **Model Used:** `{}`\n", metadata.model_used));
    section.push_str(&format!("- **Status:** {}\n", status_label(metadata.status)));
    section.push_str(&format!(
        "- **Steps Used:** {} of {}\n",
        metadata.steps_used, metadata.max_steps
    ));
    section.push_str(&format!(
        "- **Finished:** {}\n",
        metadata.finished_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

fn status_label(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Completed => "✅ completed",
        SessionStatus::DidNotConverge => "⚠️ did not converge (step ceiling reached)",
    }
}

/// Generate the session trace section.
fn generate_trace_section(report: &SessionReport, config: &ReportConfig) -> String {
    let mut section = String::new();

    section.push_str("## Session Trace\n\n");

    for message in &report.history {
        if message.role == Role::Tool && !config.include_tool_output {
            continue;
        }

        let mut label = message.role.to_string();
        if let Some(worker) = message.worker {
            label.push_str(&format!(" ({})", worker));
        }
        if let Some(disposition) = message.disposition {
            label.push_str(&format!(", {}", disposition));
        }

        section.push_str(&format!(
            "**{}** · {}\n\n",
            label,
            message.timestamp.format("%H:%M:%S")
        ));
        section.push_str(&format!("{}\n\n", truncate(&message.content, config.max_entry_chars)));
    }

    section
}

/// Generate the final dataset section.
fn generate_final_dataset_section(report: &SessionReport) -> String {
    format!(
        "## Final Dataset\n\n`{}`\n\n",
        report.final_dataset
    )
}

fn generate_footer() -> String {
    format!(
        "---\n\n*Generated by Tablepilot v{}*\n",
        env!("CARGO_PKG_VERSION")
    )
}

fn truncate(content: &str, max_chars: usize) -> String {
    if max_chars == 0 || content.chars().count() <= max_chars {
        return content.to_string();
    }
    let kept: String = content.chars().take(max_chars).collect();
    format!("{}… [truncated]", kept)
}
