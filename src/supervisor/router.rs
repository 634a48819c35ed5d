//! Routing decisions over the session history.
//!
//! The model's reply is free-form text; it is never trusted directly
//! as a control value. Extraction maps it onto the closed directive
//! set, a single stricter re-prompt covers chatty replies, and a
//! deterministic fallback keeps the session moving when the model
//! cannot be parsed at all.

use tracing::{debug, warn};

use crate::llm::{ChatMessage, LlmClient};
use crate::models::{Directive, WorkerKind};
use crate::session::SessionState;

const ROUTING_POLICY: &str = "You are the routing controller of a data analysis session. \
You decide which specialist runs next; you never run anything yourself.\n\
\n\
Specialists:\n\
- Cleaning: null handling, outlier removal, exploratory analysis\n\
- Clustering: k-means with 2-D projection columns for plotting\n\
- Visualization: scatter preparation from clustering output\n\
\n\
Rules:\n\
1. Check the records below. Never repeat a specialist that already \
succeeded unless a later step needs it redone.\n\
2. A specialist whose last run failed may be routed to again with \
corrected options.\n\
3. Clustering requires a reasonably clean dataset; Visualization \
requires Clustering output.\n\
4. Do not reply Finish until Clustering and Visualization have both \
succeeded.\n\
\n\
Reply with exactly one word: Cleaning, Clustering, Visualization, or Finish.";

const STRICT_ROUTING_REMINDER: &str = "Your previous reply did not name a valid option. \
Reply with exactly one word and nothing else: Cleaning, Clustering, Visualization, or Finish.";

/// The routing controller.
pub struct Router<'a> {
    llm: &'a LlmClient,
    max_context_messages: usize,
}

impl<'a> Router<'a> {
    pub fn new(llm: &'a LlmClient, max_context_messages: usize) -> Self {
        Self {
            llm,
            max_context_messages,
        }
    }

    /// Produce the next directive. This cannot fail: unparseable or
    /// unreachable model responses degrade to a stricter re-prompt and
    /// then to the deterministic fallback.
    pub async fn decide(&self, state: &SessionState) -> Directive {
        match self.ask(state, false).await {
            Some(directive) => directive,
            None => {
                warn!("Routing response unresolved; re-prompting once with a stricter instruction");
                match self.ask(state, true).await {
                    Some(directive) => directive,
                    None => {
                        let fallback = fallback_directive(state);
                        warn!("Routing still unresolved; falling back to {}", fallback);
                        fallback
                    }
                }
            }
        }
    }

    async fn ask(&self, state: &SessionState, strict: bool) -> Option<Directive> {
        let messages = self.build_messages(state, strict);
        match self.llm.complete(&messages).await {
            Ok(text) => {
                debug!("Routing response: {}", text.trim());
                extract_directive(&text)
            }
            Err(e) => {
                warn!("Routing request failed: {}", e);
                None
            }
        }
    }

    fn build_messages(&self, state: &SessionState, strict: bool) -> Vec<ChatMessage> {
        let policy = format!(
            "{}\n\nSpecialist records so far:\n{}\n\nActive dataset: {}",
            ROUTING_POLICY,
            state.worker_status_summary(),
            state.active_dataset().display()
        );

        let mut messages = vec![
            ChatMessage::system(policy),
            ChatMessage::user(format!(
                "Session so far:\n{}\n\nWhich specialist runs next?",
                state.render_window(self.max_context_messages)
            )),
        ];
        if strict {
            messages.push(ChatMessage::user(STRICT_ROUTING_REMINDER));
        }
        messages
    }
}

/// Extract a directive from free-form text, case-insensitively. When
/// several options appear, the earliest occurrence in reading order
/// wins, on the premise that the model states its decision before
/// elaborating.
pub fn extract_directive(text: &str) -> Option<Directive> {
    let lowered = text.to_lowercase();
    let mut best: Option<(usize, Directive)> = None;

    let mut consider = |pos: usize, directive: Directive| {
        if best.map(|(found, _)| pos < found).unwrap_or(true) {
            best = Some((pos, directive));
        }
    };

    for worker in WorkerKind::ALL {
        for keyword in worker.keywords() {
            if let Some(pos) = lowered.find(keyword) {
                consider(pos, Directive::Invoke(worker));
            }
        }
    }
    for keyword in ["finish", "terminate"] {
        if let Some(pos) = lowered.find(keyword) {
            consider(pos, Directive::Finish);
        }
    }

    best.map(|(_, directive)| directive)
}

/// Deterministic fallback when extraction fails twice: the
/// least-recently-invoked worker without a success record, never
/// Finish while work remains. Never-invoked workers come first, in
/// canonical order.
pub fn fallback_directive(state: &SessionState) -> Directive {
    let mut candidates: Vec<WorkerKind> = WorkerKind::ALL
        .iter()
        .copied()
        .filter(|worker| !state.completed(*worker))
        .collect();

    if candidates.is_empty() {
        return Directive::Finish;
    }

    candidates.sort_by_key(|worker| {
        state
            .last_invocation(*worker)
            .map(|idx| idx as i64)
            .unwrap_or(-1)
    });
    Directive::Invoke(candidates[0])
}
