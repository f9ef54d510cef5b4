#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Per-step reach/conversion tables and their merge.
pub mod aggregate;
/// Canonical action keys and extracted events.
pub mod action;
/// Batch orchestration over record streams.
pub mod analysis;
/// `funnel` command-line front end.
pub mod app;
/// The six action-key components.
pub mod component;
/// Analysis configuration.
pub mod config;
/// Centralized constants for key encoding, capsule reading, and analysis.
pub mod constants;
/// Input record type and field lookup.
pub mod data;
/// Funnel graph loading and validation.
pub mod definition;
/// Per-user chronological action graphs.
pub mod graph;
/// Event capsule reading (JSONL, optionally gzip).
pub mod ingest;
/// Greedy funnel matching.
pub mod matcher;
/// Wildcard funnel steps.
pub mod step;
/// Shared type aliases.
pub mod types;

mod errors;

pub use action::{ActionEvent, ActionKey, ProjectDecomposer};
pub use aggregate::{AggregateTable, Aggregator, EdgeReport, StepReport};
pub use analysis::{AnalysisReport, DroppedRecord, FunnelAnalysis};
pub use component::Component;
pub use config::AnalysisConfig;
pub use data::{EventRecord, FieldLookup};
pub use definition::{EdgeSpec, FunnelDefinition, FunnelDocument, NodeSpec};
pub use errors::FunnelError;
pub use graph::{AmbiguousTimestamp, GraphBuild, GraphBuilder, UserActionGraph, build_user_graphs};
pub use ingest::CapsuleReader;
pub use matcher::{FunnelMatcher, MatchTrace, TraceEntry, TraceStatus, match_graph};
pub use step::{FunnelStep, StepId, matches};
pub use types::{CanonicalKey, ComponentValue, LogMessage, SchemaName, StepName, Token};
