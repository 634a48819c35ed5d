//! The worker invoker: runs one specialist to completion.
//!
//! Each invocation gets a fresh tool executor, a context message
//! naming the exact active dataset path, and a bounded reasoning loop.
//! Completion must be signaled explicitly (the finish tool or a
//! recognized completion phrase); running out of iterations is a
//! stall, not a success.

use tracing::{debug, info, warn};

use crate::config::{AnalysisConfig, LimitsConfig};
use crate::llm::{ChatMessage, LlmClient};
use crate::models::{Disposition, WorkerKind, WorkerOutcome};
use crate::session::SessionState;
use crate::worker::tools::{context_injection, tool_definitions, ToolExecutor};

const NUDGE: &str =
    "Continue with your task, or call finish_task if you are done. Do not ask the user questions.";

/// Runs specialist workers against the shared session state.
pub struct WorkerRunner<'a> {
    llm: &'a LlmClient,
    analysis: AnalysisConfig,
    max_iterations: usize,
    max_context_messages: usize,
}

impl<'a> WorkerRunner<'a> {
    pub fn new(llm: &'a LlmClient, analysis: AnalysisConfig, limits: &LimitsConfig) -> Self {
        Self {
            llm,
            analysis,
            max_iterations: limits.worker_max_iterations,
            max_context_messages: limits.max_context_messages,
        }
    }

    /// Invoke one worker. Never propagates an error: every failure
    /// mode becomes a Failure outcome the control loop records.
    pub async fn run(&self, worker: WorkerKind, state: &SessionState) -> WorkerOutcome {
        info!("Invoking {} worker on {}", worker, state.active_dataset().display());

        let mut executor = ToolExecutor::new(
            self.analysis.clone(),
            state.active_dataset().to_path_buf(),
        );
        let tools = tool_definitions(worker);

        let mut messages = vec![
            ChatMessage::system(worker_instructions(worker)),
            ChatMessage::user(format!(
                "Session so far:\n{}",
                state.render_window(self.max_context_messages)
            )),
            ChatMessage::system(context_injection(state.active_dataset())),
        ];

        let mut last_text = String::new();
        let mut transport_error = None;

        for iteration in 0..self.max_iterations {
            debug!("{} worker iteration {}", worker, iteration + 1);

            let response = match self.llm.complete_with_tools(&messages, &tools).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("{} worker request failed: {}", worker, e);
                    transport_error = Some(e.to_string());
                    break;
                }
            };

            messages.push(ChatMessage::assistant(
                response.content.clone(),
                response.tool_calls.clone(),
            ));
            if !response.content.trim().is_empty() {
                last_text = response.content.trim().to_string();
            }

            match response.tool_calls {
                Some(tool_calls) if !tool_calls.is_empty() => {
                    for call in &tool_calls {
                        let outcome = executor.execute(
                            worker,
                            &call.function.name,
                            &call.function.arguments,
                        );
                        debug!(
                            "Tool {} -> {}",
                            call.function.name,
                            if outcome.success { "ok" } else { "error" }
                        );
                        messages.push(ChatMessage::tool(outcome.output));
                        if executor.finished() {
                            break;
                        }
                    }
                    if executor.finished() {
                        break;
                    }
                }
                _ => {
                    // Text-only turn: accept an explicit completion
                    // phrase, otherwise nudge the worker onward.
                    if is_completion_phrase(&response.content) {
                        executor.mark_finished();
                        break;
                    }
                    messages.push(ChatMessage::user(NUDGE));
                }
            }
        }

        self.build_outcome(worker, executor, last_text, transport_error)
    }

    fn build_outcome(
        &self,
        worker: WorkerKind,
        executor: ToolExecutor,
        last_text: String,
        transport_error: Option<String>,
    ) -> WorkerOutcome {
        let (disposition, note) = if let Some(error) = transport_error {
            (Disposition::Failure, Some(format!("worker aborted: {}", error)))
        } else if !executor.finished() {
            (
                Disposition::Failure,
                Some(format!(
                    "worker stalled: no completion signal within {} iterations",
                    self.max_iterations
                )),
            )
        } else {
            (executor.disposition(), None)
        };

        let mut report = if last_text.is_empty() {
            format!(
                "{} worker ran {} operation(s) without a summary.",
                worker,
                executor.operation_count()
            )
        } else {
            last_text
        };
        if let Some(note) = note {
            report.push_str(&format!(" [{}]", note));
        }

        info!("{} worker finished with {}", worker, disposition);

        WorkerOutcome {
            worker,
            disposition,
            new_dataset: executor.latest_artifact().cloned(),
            findings: executor.findings().to_vec(),
            report,
        }
    }
}

/// Explicit completion phrases accepted in place of the finish tool.
fn is_completion_phrase(text: &str) -> bool {
    let lowered = text.to_lowercase();
    lowered.contains("task complete")
        || lowered.contains("task is complete")
        || lowered.contains("finished my task")
}

fn worker_instructions(worker: WorkerKind) -> String {
    let specific = match worker {
        WorkerKind::Cleaning => {
            "You are the data cleaning specialist. Use clean_data to handle nulls and \
             outliers, then explore_data to check the result. If explore_data reports \
             highly correlated columns, call clean_data once more passing its suggested \
             drops as drop_columns."
        }
        WorkerKind::Clustering => {
            "You are the clustering specialist. Use cluster_data on the active dataset. \
             Only pass an explicit column list when earlier analysis flagged columns to \
             exclude; otherwise cluster on all columns."
        }
        WorkerKind::Visualization => {
            "You are the visualization specialist. Use render_plot on the clustered \
             dataset to validate and summarize the scatter plot."
        }
    };

    format!(
        "{}\n\nRules:\n\
         1. Perform your specific task, then summarize what was done in one short paragraph.\n\
         2. Report facts only; never ask the user how to proceed.\n\
         3. When the summary is written, call finish_task.\n\
         4. If a tool reports an error, adjust the arguments and retry once before giving up.",
        specific
    )
}
