//! Per-user action graphs.
//!
//! Events are grouped by token and ordered by timestamp ascending. Events with
//! identical timestamps for the same token keep the order they were handed to
//! the builder (stable sort), and each such collision is reported as an
//! [`AmbiguousTimestamp`] so callers can audit the ordering. The resulting
//! graph is a path: one edge between each pair of chronologically adjacent
//! events. No event is dropped here.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tracing::debug;

use crate::action::ActionEvent;
use crate::constants::analysis::DEFAULT_MAX_TIE_WARNINGS;
use crate::types::{CanonicalKey, Token};

/// Chronological path of one user's actions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserActionGraph {
    token: Token,
    events: Vec<ActionEvent>,
}

impl UserActionGraph {
    /// Build a graph from events already belonging to `token`, ordering them stably by time.
    pub fn from_events(token: impl Into<Token>, mut events: Vec<ActionEvent>) -> Self {
        events.sort_by_key(|event| event.timestamp);
        Self {
            token: token.into(),
            events,
        }
    }

    /// Token shared by every event in the graph.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Events in chronological order (the path's nodes).
    pub fn events(&self) -> &[ActionEvent] {
        &self.events
    }

    /// Edges from each event to the next one in time.
    pub fn edges(&self) -> impl Iterator<Item = (&ActionEvent, &ActionEvent)> + '_ {
        self.events.windows(2).map(|pair| (&pair[0], &pair[1]))
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` when the graph holds no event.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Two events for the same token sharing one timestamp.
///
/// `first` was placed before `second` because it arrived earlier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AmbiguousTimestamp {
    /// Token of both events.
    pub token: Token,
    /// Shared timestamp.
    pub timestamp: DateTime<Utc>,
    /// Key of the event placed first.
    pub first: CanonicalKey,
    /// Input position of the event placed first.
    pub first_arrival: u64,
    /// Key of the event placed second.
    pub second: CanonicalKey,
    /// Input position of the event placed second.
    pub second_arrival: u64,
}

/// Output of [`GraphBuilder::build`].
#[derive(Clone, Debug, Default)]
pub struct GraphBuild {
    /// One graph per token, in order of each token's first appearance.
    pub graphs: IndexMap<Token, UserActionGraph>,
    /// Retained timestamp collisions (capped by the builder).
    pub ambiguities: Vec<AmbiguousTimestamp>,
    /// Total timestamp collisions observed, including ones not retained.
    pub ambiguity_count: usize,
}

impl GraphBuild {
    /// Total number of events across all graphs.
    pub fn event_count(&self) -> usize {
        self.graphs.values().map(UserActionGraph::len).sum()
    }
}

/// Groups events by token into [`UserActionGraph`]s.
#[derive(Clone, Debug)]
pub struct GraphBuilder {
    max_warnings: usize,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self {
            max_warnings: DEFAULT_MAX_TIE_WARNINGS,
        }
    }
}

impl GraphBuilder {
    /// Builder with the default warning cap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap how many ambiguity warnings are retained (all are still counted).
    pub fn with_max_warnings(mut self, max_warnings: usize) -> Self {
        self.max_warnings = max_warnings;
        self
    }

    /// Group `events` (in arrival order) into per-token graphs.
    pub fn build<I>(&self, events: I) -> GraphBuild
    where
        I: IntoIterator<Item = ActionEvent>,
    {
        let mut grouped: IndexMap<Token, Vec<ActionEvent>> = IndexMap::new();
        for event in events {
            grouped.entry(event.token.clone()).or_default().push(event);
        }

        let mut build = GraphBuild::default();
        for (token, events) in grouped {
            let graph = UserActionGraph::from_events(token.clone(), events);
            for (earlier, later) in graph.edges() {
                if earlier.timestamp != later.timestamp {
                    continue;
                }
                build.ambiguity_count += 1;
                debug!(
                    token = %token,
                    timestamp = %earlier.timestamp,
                    first = %earlier.key,
                    second = %later.key,
                    "identical timestamps ordered by arrival"
                );
                if build.ambiguities.len() < self.max_warnings {
                    build.ambiguities.push(AmbiguousTimestamp {
                        token: token.clone(),
                        timestamp: earlier.timestamp,
                        first: earlier.key.canonical_string().to_string(),
                        first_arrival: earlier.arrival,
                        second: later.key.canonical_string().to_string(),
                        second_arrival: later.arrival,
                    });
                }
            }
            build.graphs.insert(token, graph);
        }
        build
    }
}

/// Group events with the default builder settings.
pub fn build_user_graphs<I>(events: I) -> GraphBuild
where
    I: IntoIterator<Item = ActionEvent>,
{
    GraphBuilder::default().build(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKey;
    use crate::component::Component;
    use chrono::TimeZone;

    fn event(token: &str, secs: i64, name: &str, arrival: u64) -> ActionEvent {
        ActionEvent {
            token: token.to_string(),
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            key: ActionKey::from_components([(Component::Event, name)]),
            arrival,
        }
    }

    fn names(graph: &UserActionGraph) -> Vec<&str> {
        graph
            .events()
            .iter()
            .map(|event| event.key.get(Component::Event).unwrap())
            .collect()
    }

    #[test]
    fn groups_by_token_and_orders_by_time() {
        let build = build_user_graphs(vec![
            event("a", 30, "convert", 0),
            event("b", 5, "impression", 1),
            event("a", 10, "impression", 2),
            event("a", 20, "click", 3),
        ]);
        assert_eq!(build.graphs.len(), 2);
        assert_eq!(
            build.graphs.keys().collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(
            names(&build.graphs["a"]),
            vec!["impression", "click", "convert"]
        );
        assert_eq!(build.graphs["a"].edges().count(), 2);
        assert_eq!(build.event_count(), 4);
        assert_eq!(build.ambiguity_count, 0);
    }

    #[test]
    fn identical_timestamps_keep_arrival_order() {
        let build = build_user_graphs(vec![
            event("a", 10, "x", 0),
            event("a", 10, "y", 1),
            event("a", 5, "w", 2),
        ]);
        assert_eq!(names(&build.graphs["a"]), vec!["w", "x", "y"]);
        assert_eq!(build.ambiguity_count, 1);
        let warning = &build.ambiguities[0];
        assert_eq!(warning.token, "a");
        assert_eq!(warning.first, ".:.:.:.:.:x");
        assert_eq!(warning.second, ".:.:.:.:.:y");
        assert_eq!((warning.first_arrival, warning.second_arrival), (0, 1));
    }

    #[test]
    fn warning_retention_is_capped_but_counted() {
        let events: Vec<ActionEvent> = (0..5).map(|i| event("a", 1, "tick", i)).collect();
        let build = GraphBuilder::new().with_max_warnings(2).build(events);
        assert_eq!(build.ambiguity_count, 4);
        assert_eq!(build.ambiguities.len(), 2);
    }

    #[test]
    fn single_event_graph_has_no_edges() {
        let graph = UserActionGraph::from_events("solo", vec![event("solo", 1, "view", 0)]);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.edges().count(), 0);
        assert!(!graph.is_empty());
        assert_eq!(graph.token(), "solo");
    }
}
