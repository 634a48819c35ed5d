//! The completion gate.
//!
//! A model-driven router can be talked into finishing early; this
//! check cannot. It scans the history for structural success records
//! and only honors a Finish directive when every required worker has
//! one.

use tracing::info;

use crate::models::WorkerKind;
use crate::session::SessionState;

/// Workers that must have succeeded before the session may terminate.
pub const REQUIRED_FOR_COMPLETION: [WorkerKind; 2] =
    [WorkerKind::Clustering, WorkerKind::Visualization];

/// Result of evaluating a Finish directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateDecision {
    pub approved: bool,
    /// Required workers still missing a success record.
    pub missing: Vec<WorkerKind>,
}

/// Evaluate the completion checklist against the history. Structural:
/// counts worker success records, ignores whatever the router claimed.
pub fn evaluate(state: &SessionState) -> GateDecision {
    let missing: Vec<WorkerKind> = REQUIRED_FOR_COMPLETION
        .iter()
        .copied()
        .filter(|worker| !state.completed(*worker))
        .collect();

    let approved = missing.is_empty();
    if approved {
        info!("Completion gate approved termination");
    } else {
        info!(
            "Completion gate rejected termination; missing: {:?}",
            missing
        );
    }
    GateDecision { approved, missing }
}

/// Corrective instruction injected into the history when the gate
/// rejects a Finish directive.
pub fn corrective_instruction(missing: &[WorkerKind]) -> String {
    let names: Vec<&str> = missing.iter().map(|worker| worker.name()).collect();
    format!(
        "Termination rejected: {} must complete successfully before finishing. Route the missing work next.",
        names.join(" and ")
    )
}
