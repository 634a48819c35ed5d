//! Data models for the analysis session.
//!
//! This module contains the core data structures shared across the
//! control loop: message history entries, worker identities, routing
//! directives, and session outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Author role of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The initiating user request.
    User,
    /// The routing controller.
    Supervisor,
    /// A specialist worker's report.
    Worker,
    /// Raw output of a dataset operation invoked by a worker.
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "User"),
            Role::Supervisor => write!(f, "Supervisor"),
            Role::Worker => write!(f, "Worker"),
            Role::Tool => write!(f, "Tool"),
        }
    }
}

/// Identity of a specialist worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerKind {
    /// Cleaning and exploratory analysis of the active dataset.
    Cleaning,
    /// K-means clustering with 2-D projection columns.
    Clustering,
    /// Scatter-plot preparation from clustering output.
    Visualization,
}

impl WorkerKind {
    /// All workers in canonical invocation order.
    pub const ALL: [WorkerKind; 3] = [
        WorkerKind::Cleaning,
        WorkerKind::Clustering,
        WorkerKind::Visualization,
    ];

    /// Display name used in prompts and routing responses.
    pub fn name(&self) -> &'static str {
        match self {
            WorkerKind::Cleaning => "Cleaning",
            WorkerKind::Clustering => "Clustering",
            WorkerKind::Visualization => "Visualization",
        }
    }

    /// Lowercase keywords that identify this worker inside free-form text.
    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            WorkerKind::Cleaning => &["cleaning", "clean"],
            WorkerKind::Clustering => &["clustering", "cluster"],
            WorkerKind::Visualization => &[
                "visualization",
                "visualisation",
                "visualize",
                "visualise",
                "plot",
            ],
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A resolved routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Invoke the named worker next.
    Invoke(WorkerKind),
    /// Terminate the session (subject to the completion gate).
    Finish,
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::Invoke(worker) => write!(f, "{}", worker),
            Directive::Finish => write!(f, "Finish"),
        }
    }
}

/// Outcome class of a worker invocation or dataset operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// The operation completed with no caveats.
    Success,
    /// The operation completed but refused or adjusted part of the request.
    PartialSuccess,
    /// The operation could not produce its output.
    Failure,
}

impl Disposition {
    /// True for `Success` and `PartialSuccess`.
    pub fn is_success(&self) -> bool {
        !matches!(self, Disposition::Failure)
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Success => write!(f, "success"),
            Disposition::PartialSuccess => write!(f, "partial success"),
            Disposition::Failure => write!(f, "failure"),
        }
    }
}

/// A single entry in the session history.
///
/// Worker report entries carry structured `worker` and `disposition`
/// fields so completion checks scan records, not prose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disposition: Option<Disposition>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            worker: None,
            disposition: None,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn supervisor(content: impl Into<String>) -> Self {
        Self {
            role: Role::Supervisor,
            worker: None,
            disposition: None,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn worker_report(
        worker: WorkerKind,
        disposition: Disposition,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Worker,
            worker: Some(worker),
            disposition: Some(disposition),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn tool_output(worker: WorkerKind, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            worker: Some(worker),
            disposition: None,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// True if this entry records a successful run of the given worker.
    pub fn is_success_record(&self, worker: WorkerKind) -> bool {
        self.role == Role::Worker
            && self.worker == Some(worker)
            && self.disposition.map(|d| d.is_success()).unwrap_or(false)
    }
}

/// Declared result of a worker invocation, applied to the session
/// state by the control loop. This is the only write channel workers
/// have back into shared state.
#[derive(Debug, Clone)]
pub struct WorkerOutcome {
    pub worker: WorkerKind,
    pub disposition: Disposition,
    /// New dataset artifact declared by the worker, if any.
    pub new_dataset: Option<PathBuf>,
    /// Structured findings (flagged columns, cluster sizes, refusals).
    pub findings: Vec<String>,
    /// Human-readable report appended to the history.
    pub report: String,
}

/// Terminal status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// The completion gate approved a Finish directive.
    Completed,
    /// The global step ceiling was reached first.
    DidNotConverge,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::DidNotConverge => write!(f, "did not converge"),
        }
    }
}

/// Metadata about a finished session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Dataset the session started from.
    pub initial_dataset: String,
    /// Model used for routing and worker reasoning.
    pub model_used: String,
    /// Terminal status.
    pub status: SessionStatus,
    /// Steps consumed against the global ceiling.
    pub steps_used: usize,
    /// The configured global ceiling.
    pub max_steps: usize,
    /// Date and time the session finished.
    pub finished_at: DateTime<Utc>,
    /// Wall-clock duration in seconds.
    pub duration_seconds: f64,
}

/// The complete exported session: metadata, full trace, final artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub metadata: SessionMetadata,
    pub history: Vec<Message>,
    /// The dataset considered current when the session ended.
    pub final_dataset: String,
}
