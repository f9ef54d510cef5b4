//! Batch funnel analysis: records -> events -> user graphs -> traces -> aggregate.
//!
//! Matching is data-parallel per user. Each rayon worker folds its users into
//! a private [`Aggregator`]; partial tables are merged by component-wise
//! addition at the end, so no lock is taken while matching. A cancellation
//! flag is checked between users; a cancelled run returns the partial table.

use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use crate::action::{ActionEvent, ProjectDecomposer};
use crate::aggregate::{AggregateTable, Aggregator};
use crate::config::AnalysisConfig;
use crate::data::EventRecord;
use crate::definition::FunnelDefinition;
use crate::errors::FunnelError;
use crate::graph::{AmbiguousTimestamp, GraphBuilder, UserActionGraph};
use crate::matcher::FunnelMatcher;
use crate::types::{LogMessage, Token};

/// An input record excluded before matching.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DroppedRecord {
    /// Zero-based position in the input stream.
    pub arrival: u64,
    /// Token of the record, when it could be read.
    pub token: Option<Token>,
    /// Why the record was dropped.
    pub reason: LogMessage,
}

/// Events extracted from a record stream plus the records that were dropped.
#[derive(Clone, Debug, Default)]
pub struct EventExtraction {
    /// Events in input order.
    pub events: Vec<ActionEvent>,
    /// Records excluded before matching.
    pub dropped: Vec<DroppedRecord>,
}

/// Result of one batch run.
#[derive(Clone, Debug, Default)]
pub struct AnalysisReport {
    /// Aggregated counts.
    pub table: AggregateTable,
    /// Every dropped record, in input order.
    pub dropped: Vec<DroppedRecord>,
    /// Retained timestamp collisions.
    pub ambiguities: Vec<AmbiguousTimestamp>,
    /// Total timestamp collisions observed.
    pub ambiguity_count: usize,
    /// Users left unmatched because the run was cancelled.
    pub skipped_users: u64,
    /// The cancellation flag was observed set, even if no user was left to skip.
    pub cancelled: bool,
}

/// Runs funnel analysis against one immutable funnel definition.
#[derive(Clone, Debug)]
pub struct FunnelAnalysis {
    funnel: FunnelDefinition,
    config: AnalysisConfig,
    decomposer: Option<ProjectDecomposer>,
}

impl FunnelAnalysis {
    /// Validate `config` and bind it to `funnel`.
    pub fn new(funnel: FunnelDefinition, config: AnalysisConfig) -> Result<Self, FunnelError> {
        let decomposer = config.decomposer()?;
        Ok(Self {
            funnel,
            config,
            decomposer,
        })
    }

    /// Funnel being analysed.
    pub fn funnel(&self) -> &FunnelDefinition {
        &self.funnel
    }

    /// Active configuration.
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Turn records into events, dropping the ones whose key cannot be built.
    ///
    /// Record-level errors (from this step or from the reading layer) are
    /// collected as dropped records; any other error aborts.
    pub fn extract_events<I>(&self, records: I) -> Result<EventExtraction, FunnelError>
    where
        I: IntoIterator<Item = Result<EventRecord, FunnelError>>,
    {
        let mut extraction = EventExtraction::default();
        for (arrival, record) in records.into_iter().enumerate() {
            let arrival = arrival as u64;
            match record {
                Ok(record) => self.push_record(&mut extraction, arrival, &record),
                Err(err) if err.is_record_level() => push_dropped(&mut extraction, arrival, err),
                Err(err) => return Err(err),
            }
        }
        Ok(extraction)
    }

    fn push_record(&self, extraction: &mut EventExtraction, arrival: u64, record: &EventRecord) {
        match ActionEvent::from_record(record, arrival, self.decomposer.as_ref()) {
            Ok(event) => extraction.events.push(event),
            Err(err) => push_dropped(extraction, arrival, err),
        }
    }

    /// Run over records that are already known to be readable.
    pub fn run_records<I>(&self, records: I) -> AnalysisReport
    where
        I: IntoIterator<Item = EventRecord>,
    {
        let mut extraction = EventExtraction::default();
        for (arrival, record) in records.into_iter().enumerate() {
            self.push_record(&mut extraction, arrival as u64, &record);
        }
        self.analyze(extraction, &AtomicBool::new(false))
    }

    /// Run over a fallible record stream.
    pub fn run<I>(&self, records: I) -> Result<AnalysisReport, FunnelError>
    where
        I: IntoIterator<Item = Result<EventRecord, FunnelError>>,
    {
        self.run_with_cancel(records, &AtomicBool::new(false))
    }

    /// Run over a fallible record stream, stopping between users once `cancel` is set.
    pub fn run_with_cancel<I>(
        &self,
        records: I,
        cancel: &AtomicBool,
    ) -> Result<AnalysisReport, FunnelError>
    where
        I: IntoIterator<Item = Result<EventRecord, FunnelError>>,
    {
        let extraction = self.extract_events(records)?;
        Ok(self.analyze(extraction, cancel))
    }

    fn analyze(&self, extraction: EventExtraction, cancel: &AtomicBool) -> AnalysisReport {
        let build = GraphBuilder::new()
            .with_max_warnings(self.config.max_tie_warnings)
            .build(extraction.events);
        let graphs: Vec<UserActionGraph> = build.graphs.into_values().collect();

        let (mut aggregator, skipped_users) = self.match_graphs(&graphs, cancel);
        aggregator.record_dropped(extraction.dropped.len() as u64);
        let table = aggregator.into_table();
        let cancelled = skipped_users > 0 || cancel.load(Ordering::Relaxed);

        info!(
            users = table.users,
            completed = table.completed,
            stalled = table.stalled,
            unmatched = table.unmatched,
            dropped = table.dropped_records,
            ambiguous = build.ambiguity_count,
            cancelled = cancelled,
            "funnel analysis finished"
        );

        AnalysisReport {
            table,
            dropped: extraction.dropped,
            ambiguities: build.ambiguities,
            ambiguity_count: build.ambiguity_count,
            skipped_users,
            cancelled,
        }
    }

    /// Match every graph, returning the aggregate and the number of users skipped by cancellation.
    pub fn match_graphs(&self, graphs: &[UserActionGraph], cancel: &AtomicBool) -> (Aggregator, u64) {
        let matcher = FunnelMatcher::new(&self.funnel);
        let step = |(mut aggregator, skipped): (Aggregator, u64), graph: &UserActionGraph| {
            if cancel.load(Ordering::Relaxed) {
                return (aggregator, skipped + 1);
            }
            aggregator.accumulate(&matcher.trace(graph));
            (aggregator, skipped)
        };

        if self.config.parallel {
            graphs
                .par_iter()
                .fold(|| (Aggregator::new(), 0), step)
                .reduce(
                    || (Aggregator::new(), 0),
                    |(left, left_skipped), (right, right_skipped)| {
                        (left.merged(right), left_skipped + right_skipped)
                    },
                )
        } else {
            graphs.iter().fold((Aggregator::new(), 0), step)
        }
    }
}

fn push_dropped(extraction: &mut EventExtraction, arrival: u64, err: FunnelError) {
    warn!(arrival = arrival, error = %err, "dropping malformed record");
    let token = match &err {
        FunnelError::MalformedInput { token, .. } if !token.is_empty() => Some(token.clone()),
        _ => None,
    };
    extraction.dropped.push(DroppedRecord {
        arrival,
        token,
        reason: err.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::action_key::DEFAULT_PROJECT_PATTERN;
    use crate::definition::{EdgeSpec, NodeSpec};
    use crate::ingest::CapsuleReader;
    use crate::step::StepId;
    use chrono::{TimeZone, Utc};

    fn funnel() -> FunnelDefinition {
        FunnelDefinition::load(
            &[
                NodeSpec::new("impression", [("event", "impression")]),
                NodeSpec::new("click", [("event", "click")]),
            ],
            &[EdgeSpec::new("impression", "click")],
        )
        .unwrap()
    }

    fn record(token: &str, secs: i64, event: &str, project: &str) -> EventRecord {
        EventRecord::new(
            token,
            Utc.timestamp_opt(secs, 0).unwrap(),
            [("event", event), ("project", project)],
        )
    }

    #[test]
    fn parallel_and_sequential_runs_agree() {
        let records: Vec<EventRecord> = (0..50)
            .flat_map(|user| {
                let token = format!("user-{user}");
                let mut out = vec![record(&token, 1, "impression", "en.wikipedia")];
                if user % 3 == 0 {
                    out.push(record(&token, 2, "click", "en.wikipedia"));
                }
                out
            })
            .collect();

        let parallel = FunnelAnalysis::new(funnel(), AnalysisConfig::default()).unwrap();
        let sequential = FunnelAnalysis::new(
            funnel(),
            AnalysisConfig {
                parallel: false,
                ..AnalysisConfig::default()
            },
        )
        .unwrap();

        let left = parallel.run_records(records.clone());
        let right = sequential.run_records(records);
        assert_eq!(left.table, right.table);
        assert_eq!(left.table.users, 50);
        assert_eq!(left.table.reach(StepId(1)), 17);
        assert!(!left.cancelled);
    }

    #[test]
    fn malformed_projects_are_dropped_and_counted() {
        let analysis = FunnelAnalysis::new(
            funnel(),
            AnalysisConfig {
                project_pattern: Some(r"^(?P<language>[a-z]+)\.(?P<project>[a-z]+)$".into()),
                ..AnalysisConfig::default()
            },
        )
        .unwrap();
        let report = analysis.run_records(vec![
            record("a", 1, "impression", "en.wikipedia"),
            record("a", 2, "click", "commons"),
            record("b", 1, "impression", "fr.wikipedia"),
        ]);
        assert_eq!(report.table.dropped_records, 1);
        assert_eq!(report.dropped[0].arrival, 1);
        assert_eq!(report.dropped[0].token.as_deref(), Some("a"));
        assert_eq!(report.table.users, 2);
        assert_eq!(report.table.reach(StepId(1)), 0);
    }

    #[test]
    fn reading_errors_count_as_dropped_but_io_errors_abort() {
        let analysis = FunnelAnalysis::new(funnel(), AnalysisConfig::default()).unwrap();
        let report = analysis
            .run(vec![
                Ok(record("a", 1, "impression", "x")),
                Err(FunnelError::MalformedInput {
                    token: String::new(),
                    reason: "line 2 is not JSON".into(),
                }),
            ])
            .unwrap();
        assert_eq!(report.table.dropped_records, 1);
        assert_eq!(report.dropped[0].token, None);

        let failed = analysis.run(vec![Err(FunnelError::Io(std::io::Error::other("disk")))]);
        assert!(matches!(failed, Err(FunnelError::Io(_))));
    }

    #[test]
    fn cancelled_run_skips_remaining_users() {
        let analysis = FunnelAnalysis::new(funnel(), AnalysisConfig::default()).unwrap();
        let cancel = AtomicBool::new(true);
        let report = analysis
            .run_with_cancel(
                vec![
                    Ok(record("a", 1, "impression", "x")),
                    Ok(record("b", 1, "impression", "x")),
                ],
                &cancel,
            )
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.skipped_users, 2);
        assert_eq!(report.table.users, 0);
    }

    #[test]
    fn cancel_flag_is_reported_when_nothing_is_left_to_skip() {
        let analysis = FunnelAnalysis::new(funnel(), AnalysisConfig::default()).unwrap();
        let cancel = AtomicBool::new(true);
        let none: Vec<Result<EventRecord, FunnelError>> = Vec::new();
        let report = analysis.run_with_cancel(none, &cancel).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.skipped_users, 0);

        let none: Vec<Result<EventRecord, FunnelError>> = Vec::new();
        let untouched = analysis
            .run_with_cancel(none, &AtomicBool::new(false))
            .unwrap();
        assert!(!untouched.cancelled);
    }

    #[test]
    fn undecodable_capsule_line_does_not_abort_the_run() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(
            br#"{"token":"a","event":"impression","meta":{"schema":"S","timestamp":1}}"#,
        );
        bytes.extend_from_slice(b"\n\xff\xfe garbage\n");
        bytes.extend_from_slice(
            br#"{"token":"a","event":"click","meta":{"schema":"S","timestamp":2}}"#,
        );
        bytes.push(b'\n');

        let analysis = FunnelAnalysis::new(funnel(), AnalysisConfig::default()).unwrap();
        let report = analysis
            .run(CapsuleReader::new("S").records(std::io::Cursor::new(bytes)))
            .unwrap();
        assert_eq!(report.table.dropped_records, 1);
        assert_eq!(report.table.completed, 1);
    }

    #[test]
    fn empty_project_is_not_decomposed() {
        let analysis = FunnelAnalysis::new(
            funnel(),
            AnalysisConfig {
                project_pattern: Some(DEFAULT_PROJECT_PATTERN.to_string()),
                ..AnalysisConfig::default()
            },
        )
        .unwrap();
        let report = analysis.run_records(vec![
            record("a", 1, "impression", ""),
            record("a", 2, "click", ""),
        ]);
        assert_eq!(report.table.dropped_records, 0);
        assert!(report.dropped.is_empty());
        assert_eq!(report.table.completed, 1);
    }

    #[test]
    fn ambiguous_timestamps_are_reported() {
        let analysis = FunnelAnalysis::new(funnel(), AnalysisConfig::default()).unwrap();
        let report = analysis.run_records(vec![
            record("a", 5, "impression", "x"),
            record("a", 5, "click", "x"),
        ]);
        assert_eq!(report.ambiguity_count, 1);
        assert_eq!(report.ambiguities[0].token, "a");
        assert_eq!(report.table.completed, 1);
    }
}
