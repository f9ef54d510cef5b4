//! Greedy single-pass matching of a user's action path against a funnel.
//!
//! A cursor starts before the funnel. Events are scanned once in
//! chronological order; each event is tested against the steps reachable from
//! the cursor (the entry steps while the cursor is unset, otherwise the
//! successors of the current step) in declaration order, and the first match
//! advances the cursor. Events matching no reachable step are skipped. A match
//! is never revisited, even if a later event would have aligned better.
//!
//! Before the first match, an event that matches a non-entry step means the
//! user entered the funnel out of order. There is no path back to an entry
//! step from there, so the walk stops and the trace is unmatched.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::action::ActionEvent;
use crate::definition::FunnelDefinition;
use crate::graph::UserActionGraph;
use crate::step::StepId;
use crate::types::Token;

/// One matched funnel step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceEntry {
    /// Matched step.
    pub step: StepId,
    /// Event that satisfied the step.
    pub event: ActionEvent,
    /// Time the step was reached.
    pub timestamp: DateTime<Utc>,
}

/// Terminal state of a trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceStatus {
    /// The last matched step has no outgoing edge.
    Completed,
    /// Progress stopped at `step`, the `depth`-th matched step (zero-based).
    Stalled {
        /// Last matched step.
        step: StepId,
        /// Zero-based index of `step` in the trace.
        depth: usize,
    },
    /// No step was reached.
    Unmatched,
}

/// Furthest consecutive funnel progress of one user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchTrace {
    /// User the trace belongs to.
    pub token: Token,
    /// One entry per matched step, in walk order.
    pub entries: Vec<TraceEntry>,
    /// How the walk ended.
    pub status: TraceStatus,
}

impl MatchTrace {
    /// Ids of the matched steps in order.
    pub fn steps(&self) -> impl Iterator<Item = StepId> + '_ {
        self.entries.iter().map(|entry| entry.step)
    }

    /// Consecutive matched step pairs (each one is a funnel edge).
    pub fn transitions(&self) -> impl Iterator<Item = (StepId, StepId)> + '_ {
        self.entries
            .windows(2)
            .map(|pair| (pair[0].step, pair[1].step))
    }

    /// Furthest step reached.
    pub fn last_step(&self) -> Option<StepId> {
        self.entries.last().map(|entry| entry.step)
    }

    /// Returns `true` when a terminal step was reached.
    pub fn is_completed(&self) -> bool {
        self.status == TraceStatus::Completed
    }

    /// Returns `true` when no step was reached.
    pub fn is_unmatched(&self) -> bool {
        self.status == TraceStatus::Unmatched
    }
}

/// Matches user graphs against one shared funnel definition.
#[derive(Clone, Copy, Debug)]
pub struct FunnelMatcher<'a> {
    funnel: &'a FunnelDefinition,
}

impl<'a> FunnelMatcher<'a> {
    /// Matcher over `funnel`.
    pub fn new(funnel: &'a FunnelDefinition) -> Self {
        Self { funnel }
    }

    /// Shared funnel definition.
    pub fn funnel(&self) -> &'a FunnelDefinition {
        self.funnel
    }

    /// Walk `graph` once and return the resulting trace.
    pub fn trace(&self, graph: &UserActionGraph) -> MatchTrace {
        let funnel = self.funnel;
        let mut cursor: Option<StepId> = None;
        let mut entries = Vec::new();

        for event in graph.events() {
            let reachable = match cursor {
                None => funnel.entry_steps(),
                Some(step) => funnel.next_steps(step),
            };
            let matched = reachable
                .iter()
                .copied()
                .find(|id| funnel.step(*id).matches(event));

            let Some(step) = matched else {
                if cursor.is_none()
                    && let Some(late) = funnel.steps().iter().find(|step| step.matches(event))
                {
                    debug!(
                        token = graph.token(),
                        step = late.name(),
                        "funnel entered out of order"
                    );
                    break;
                }
                continue;
            };

            entries.push(TraceEntry {
                step,
                event: event.clone(),
                timestamp: event.timestamp,
            });
            cursor = Some(step);
            if funnel.is_terminal(step) {
                break;
            }
        }

        let status = match cursor {
            None => TraceStatus::Unmatched,
            Some(step) if funnel.is_terminal(step) => TraceStatus::Completed,
            Some(step) => TraceStatus::Stalled {
                step,
                depth: entries.len() - 1,
            },
        };

        MatchTrace {
            token: graph.token().to_string(),
            entries,
            status,
        }
    }
}

/// Match one user graph against `funnel`.
pub fn match_graph(graph: &UserActionGraph, funnel: &FunnelDefinition) -> MatchTrace {
    FunnelMatcher::new(funnel).trace(graph)
}
