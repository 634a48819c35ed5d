//! The control loop driving the session state machine.
//!
//! Routing -> Invoking -> Routing cycles until a Finish directive
//! passes the completion gate or the global step ceiling is reached.
//! Every routing decision and every worker invocation costs one step;
//! hitting the ceiling surfaces a structured did-not-converge outcome
//! rather than hanging.

use tracing::{info, warn};

use crate::config::LimitsConfig;
use crate::models::{Directive, Message, SessionStatus, WorkerKind};
use crate::session::state::SessionState;
use crate::supervisor::{gatekeeper, Router};
use crate::worker::WorkerRunner;

/// States of the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Routing,
    Invoking(WorkerKind),
    Gatekeeping,
    Terminated,
}

/// Final result of driving a session.
#[derive(Debug)]
pub struct SessionResult {
    pub status: SessionStatus,
    pub state: SessionState,
    pub steps_used: usize,
}

/// Drives Router -> WorkerRunner cycles over an exclusively owned
/// session state.
pub struct ControlLoop<'a> {
    router: Router<'a>,
    runner: WorkerRunner<'a>,
    state: SessionState,
    max_steps: usize,
}

impl<'a> ControlLoop<'a> {
    pub fn new(
        router: Router<'a>,
        runner: WorkerRunner<'a>,
        state: SessionState,
        limits: &LimitsConfig,
    ) -> Self {
        Self {
            router,
            runner,
            state,
            max_steps: limits.max_steps,
        }
    }

    /// Run to termination or to the step ceiling.
    pub async fn run(mut self) -> SessionResult {
        let mut machine = LoopState::Routing;
        let mut steps = 0usize;

        loop {
            match machine {
                LoopState::Routing => {
                    if steps >= self.max_steps {
                        return self.did_not_converge(steps);
                    }
                    steps += 1;

                    let directive = self.router.decide(&self.state).await;
                    self.state.set_directive(directive);
                    self.state
                        .push(Message::supervisor(format!("Routing to {}.", directive)));
                    println!("🧭 Supervisor: routing to {}", directive);

                    machine = match directive {
                        Directive::Finish => LoopState::Gatekeeping,
                        Directive::Invoke(worker) => LoopState::Invoking(worker),
                    };
                }

                LoopState::Invoking(worker) => {
                    if steps >= self.max_steps {
                        return self.did_not_converge(steps);
                    }
                    steps += 1;

                    // The reference must resolve at the moment of
                    // invocation; a dangling artifact is this
                    // invocation's failure, not the session's.
                    if !self.state.active_dataset().exists() {
                        let path = self.state.active_dataset().display().to_string();
                        warn!("Active dataset missing at invocation time: {}", path);
                        self.state.push(Message::worker_report(
                            worker,
                            crate::models::Disposition::Failure,
                            format!("invocation aborted: active dataset not found at {}", path),
                        ));
                        machine = LoopState::Routing;
                        continue;
                    }

                    println!("⚙️  {} worker running...", worker);
                    let outcome = self.runner.run(worker, &self.state).await;
                    println!(
                        "   {} finished with {}",
                        worker, outcome.disposition
                    );
                    self.state.apply_worker_outcome(outcome);
                    machine = LoopState::Routing;
                }

                LoopState::Gatekeeping => {
                    let decision = gatekeeper::evaluate(&self.state);
                    if decision.approved {
                        machine = LoopState::Terminated;
                    } else {
                        let instruction = gatekeeper::corrective_instruction(&decision.missing);
                        println!("⛔ {}", instruction);
                        self.state.push(Message::supervisor(instruction));
                        machine = LoopState::Routing;
                    }
                }

                LoopState::Terminated => {
                    info!("Session completed in {} steps", steps);
                    return SessionResult {
                        status: SessionStatus::Completed,
                        state: self.state,
                        steps_used: steps,
                    };
                }
            }
        }
    }

    fn did_not_converge(self, steps: usize) -> SessionResult {
        warn!(
            "Step ceiling of {} reached without convergence (last directive: {:?})",
            self.max_steps,
            self.state.next_directive()
        );
        SessionResult {
            status: SessionStatus::DidNotConverge,
            state: self.state,
            steps_used: steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::llm::{LlmClient, LlmConfig};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn unreachable_llm() -> LlmClient {
        LlmClient::new(LlmConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_seconds: 2,
            retries: 0,
            ..LlmConfig::default()
        })
    }

    /// With the model unreachable, routing falls back deterministically
    /// and every worker invocation fails; the loop must still halt at
    /// the ceiling with the partial history intact.
    #[tokio::test]
    async fn test_loop_halts_at_ceiling_when_nothing_converges() {
        let dir = TempDir::new().unwrap();
        let dataset = dir.path().join("data.csv");
        std::fs::write(&dataset, "a\n1\n2\n3\n").unwrap();

        let llm = unreachable_llm();
        let limits = LimitsConfig {
            max_steps: 6,
            worker_max_iterations: 2,
            max_context_messages: 10,
        };
        let router = Router::new(&llm, limits.max_context_messages);
        let runner = WorkerRunner::new(&llm, AnalysisConfig::default(), &limits);
        let state = SessionState::new(dataset, "cluster and visualize");

        let result = ControlLoop::new(router, runner, state, &limits).run().await;

        assert_eq!(result.status, SessionStatus::DidNotConverge);
        assert_eq!(result.steps_used, 6);
        // Seed request plus the recorded routing decisions and failures.
        assert!(result.state.history().len() > 1);
        assert!(!result.state.completed(WorkerKind::Clustering));
    }

    /// A missing dataset artifact fails the invocation and re-routes
    /// instead of crashing the session.
    #[tokio::test]
    async fn test_missing_artifact_is_recorded_and_rerouted() {
        let llm = unreachable_llm();
        let limits = LimitsConfig {
            max_steps: 4,
            worker_max_iterations: 2,
            max_context_messages: 10,
        };
        let router = Router::new(&llm, limits.max_context_messages);
        let runner = WorkerRunner::new(&llm, AnalysisConfig::default(), &limits);
        let state = SessionState::new(PathBuf::from("/definitely/missing.csv"), "go");

        let result = ControlLoop::new(router, runner, state, &limits).run().await;

        assert_eq!(result.status, SessionStatus::DidNotConverge);
        let aborted = result
            .state
            .history()
            .iter()
            .any(|m| m.content.contains("active dataset not found"));
        assert!(aborted, "expected an invocation-aborted record");
    }
}
