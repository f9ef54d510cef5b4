use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::definition::FunnelDefinition;
use crate::matcher::{MatchTrace, TraceStatus};
use crate::step::StepId;
use crate::types::StepName;

/// Per-step reach counts and per-edge conversion counts across users.
///
/// Tables built from disjoint user sets merge by component-wise addition, so
/// partial tables from parallel workers can be combined in any order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AggregateTable {
    /// Users whose trace has been accumulated.
    pub users: u64,
    /// Distinct users reaching each step.
    pub reach: BTreeMap<StepId, u64>,
    /// Distinct users converting along each `(from, to)` edge.
    pub conversions: BTreeMap<(StepId, StepId), u64>,
    /// Users whose trace reached a terminal step.
    pub completed: u64,
    /// Users who stopped before a terminal step.
    pub stalled: u64,
    /// Users who never reached an entry step.
    pub unmatched: u64,
    /// Input records excluded before matching (malformed or unreadable).
    pub dropped_records: u64,
}

impl AggregateTable {
    /// Distinct users who reached `step`.
    pub fn reach(&self, step: StepId) -> u64 {
        self.reach.get(&step).copied().unwrap_or(0)
    }

    /// Distinct users who moved from `from` to `to`.
    pub fn conversion(&self, from: StepId, to: StepId) -> u64 {
        self.conversions.get(&(from, to)).copied().unwrap_or(0)
    }

    /// Users who reached `step` but converted along none of its outgoing edges.
    ///
    /// Terminal steps have no outgoing edge and report zero.
    pub fn drop_off(&self, funnel: &FunnelDefinition, step: StepId) -> u64 {
        if funnel.is_terminal(step) {
            return 0;
        }
        let converted: u64 = self
            .conversions
            .iter()
            .filter(|((from, _), _)| *from == step)
            .map(|(_, count)| *count)
            .sum();
        self.reach(step).saturating_sub(converted)
    }

    /// Add `other` into `self` component-wise.
    pub fn merge_from(&mut self, other: &AggregateTable) {
        self.users += other.users;
        for (step, count) in &other.reach {
            *self.reach.entry(*step).or_insert(0) += count;
        }
        for (edge, count) in &other.conversions {
            *self.conversions.entry(*edge).or_insert(0) += count;
        }
        self.completed += other.completed;
        self.stalled += other.stalled;
        self.unmatched += other.unmatched;
        self.dropped_records += other.dropped_records;
    }

    /// Component-wise sum of two tables.
    pub fn merge(mut self, other: &AggregateTable) -> Self {
        self.merge_from(other);
        self
    }

    /// Named per-step rows in the funnel's topological order.
    pub fn report(&self, funnel: &FunnelDefinition) -> Vec<StepReport> {
        let entry_reach: u64 = funnel
            .entry_steps()
            .iter()
            .map(|step| self.reach(*step))
            .sum();
        funnel
            .topological_order()
            .iter()
            .map(|id| {
                let reach = self.reach(*id);
                StepReport {
                    step: *id,
                    name: funnel.step(*id).name().to_string(),
                    pattern: funnel.step(*id).pattern_string(),
                    reach,
                    conversions: funnel
                        .next_steps(*id)
                        .iter()
                        .map(|next| EdgeReport {
                            to: funnel.step(*next).name().to_string(),
                            count: self.conversion(*id, *next),
                            rate: ratio(self.conversion(*id, *next), reach),
                        })
                        .collect(),
                    drop_off: self.drop_off(funnel, *id),
                    share_of_entries: ratio(reach, entry_reach),
                }
            })
            .collect()
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Reporting row for one funnel step.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StepReport {
    /// Step position.
    pub step: StepId,
    /// Step name from the catalogue.
    pub name: StepName,
    /// Constraints rendered with `*` wildcards.
    pub pattern: String,
    /// Distinct users reaching the step.
    pub reach: u64,
    /// One cell per outgoing edge, in declaration order.
    pub conversions: Vec<EdgeReport>,
    /// Users who reached the step and converted along no outgoing edge.
    pub drop_off: u64,
    /// Reach relative to the users who reached any entry step.
    pub share_of_entries: f64,
}

/// Reporting cell for one outgoing edge.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EdgeReport {
    /// Name of the target step.
    pub to: StepName,
    /// Distinct users converting along the edge.
    pub count: u64,
    /// Conversion count relative to the source step's reach.
    pub rate: f64,
}

/// Accumulates traces into an [`AggregateTable`].
///
/// Each user's trace must be submitted exactly once.
#[derive(Clone, Debug, Default)]
pub struct Aggregator {
    table: AggregateTable,
}

impl Aggregator {
    /// Empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one user's trace into the counts.
    pub fn accumulate(&mut self, trace: &MatchTrace) {
        let table = &mut self.table;
        table.users += 1;
        let reached: BTreeSet<StepId> = trace.steps().collect();
        for step in reached {
            *table.reach.entry(step).or_insert(0) += 1;
        }
        let converted: BTreeSet<(StepId, StepId)> = trace.transitions().collect();
        for edge in converted {
            *table.conversions.entry(edge).or_insert(0) += 1;
        }
        match trace.status {
            TraceStatus::Completed => table.completed += 1,
            TraceStatus::Stalled { .. } => table.stalled += 1,
            TraceStatus::Unmatched => table.unmatched += 1,
        }
    }

    /// Count input records excluded before matching.
    pub fn record_dropped(&mut self, count: u64) {
        self.table.dropped_records += count;
    }

    /// Fold a partial table from another worker.
    pub fn absorb(&mut self, partial: &AggregateTable) {
        self.table.merge_from(partial);
    }

    /// Combine two aggregators.
    pub fn merged(mut self, other: Aggregator) -> Self {
        self.table.merge_from(&other.table);
        self
    }

    /// Current counts; valid at any point of a run.
    pub fn snapshot(&self) -> AggregateTable {
        self.table.clone()
    }

    /// Final counts.
    pub fn into_table(self) -> AggregateTable {
        self.table
    }
}
