//! The shared session record: history, routing directive, active dataset.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::models::{Directive, Message, Role, WorkerKind, WorkerOutcome};

/// The single mutable record carried through every step of a session.
///
/// History is append-only and never reordered. The active dataset
/// reference changes only when a worker outcome declares a new
/// artifact; nothing else writes here except through the methods the
/// control loop calls.
#[derive(Debug, Clone)]
pub struct SessionState {
    history: Vec<Message>,
    next_directive: Option<Directive>,
    active_dataset: PathBuf,
}

impl SessionState {
    /// Create a session seeded with the initiating user request, so
    /// history is never empty once the loop starts.
    pub fn new(active_dataset: PathBuf, request: impl Into<String>) -> Self {
        Self {
            history: vec![Message::user(request)],
            next_directive: None,
            active_dataset,
        }
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn active_dataset(&self) -> &Path {
        &self.active_dataset
    }

    pub fn next_directive(&self) -> Option<Directive> {
        self.next_directive
    }

    pub(crate) fn set_directive(&mut self, directive: Directive) {
        self.next_directive = Some(directive);
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.history.push(message);
    }

    /// Apply a worker's declared result: append its findings and
    /// report, and adopt its declared artifact, if any. This is the
    /// only place the active dataset reference changes.
    pub(crate) fn apply_worker_outcome(&mut self, outcome: WorkerOutcome) {
        if let Some(new_dataset) = &outcome.new_dataset {
            debug!(
                "Active dataset: {} -> {}",
                self.active_dataset.display(),
                new_dataset.display()
            );
            self.active_dataset = new_dataset.clone();
        }
        if !outcome.findings.is_empty() {
            self.history.push(Message::tool_output(
                outcome.worker,
                outcome.findings.join("\n"),
            ));
        }
        self.history.push(Message::worker_report(
            outcome.worker,
            outcome.disposition,
            outcome.report,
        ));
    }

    /// True once the worker has at least one successful record.
    pub fn completed(&self, worker: WorkerKind) -> bool {
        self.history.iter().any(|m| m.is_success_record(worker))
    }

    /// Index of the worker's most recent report, if it ever ran.
    pub fn last_invocation(&self, worker: WorkerKind) -> Option<usize> {
        self.history
            .iter()
            .rposition(|m| m.role == Role::Worker && m.worker == Some(worker))
    }

    /// One line per worker describing what has already happened, used
    /// in the routing policy prompt.
    pub fn worker_status_summary(&self) -> String {
        WorkerKind::ALL
            .iter()
            .map(|worker| {
                let status = match self.last_invocation(*worker) {
                    None => "not yet run".to_string(),
                    Some(idx) => {
                        let disposition = self.history[idx]
                            .disposition
                            .map(|d| d.to_string())
                            .unwrap_or_else(|| "unknown".to_string());
                        format!("last run ended in {}", disposition)
                    }
                };
                format!("- {}: {}", worker, status)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Render the history for a prompt, bounded by a sliding window:
    /// the seed request is always kept, older middle entries elided.
    pub fn render_window(&self, max_entries: usize) -> String {
        let mut lines = Vec::new();
        let total = self.history.len();

        if max_entries == 0 || total <= max_entries {
            for message in &self.history {
                lines.push(render_entry(message));
            }
        } else {
            let tail = max_entries.saturating_sub(1).max(1);
            lines.push(render_entry(&self.history[0]));
            lines.push(format!("[... {} earlier entries elided ...]", total - 1 - tail));
            for message in &self.history[total - tail..] {
                lines.push(render_entry(message));
            }
        }

        lines.join("\n")
    }
}

fn render_entry(message: &Message) -> String {
    let mut label = message.role.to_string();
    if let Some(worker) = message.worker {
        label.push_str(&format!(":{}", worker));
    }
    if let Some(disposition) = message.disposition {
        label.push_str(&format!(" ({})", disposition));
    }
    format!("[{}] {}", label, message.content)
}
