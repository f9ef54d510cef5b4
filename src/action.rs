//! Concrete action identities and the events that carry them.
//!
//! An [`ActionKey`] is a sparse mapping from [`Component`] to value. Its
//! identity is the canonical string: components in canonical order, absent or
//! empty values rendered as `.`, joined by `:`. Equality and hashing use that
//! string only, so two keys that render identically are the same key.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::component::Component;
use crate::constants::action_key::{
    COMPONENT_SEPARATOR, EMPTY_PLACEHOLDER, LANGUAGE_GROUP, PROJECT_GROUP,
};
use crate::data::{EventRecord, FieldLookup};
use crate::errors::FunnelError;
use crate::types::{CanonicalKey, ComponentValue, Token};

/// Splits a composite project field into language and project components.
///
/// The pattern must define the named capture groups `language` and `project`.
#[derive(Clone, Debug)]
pub struct ProjectDecomposer {
    pattern: Regex,
}

impl ProjectDecomposer {
    /// Compile a decomposition pattern.
    pub fn new(pattern: &str) -> Result<Self, FunnelError> {
        let pattern = Regex::new(pattern).map_err(|err| {
            FunnelError::Configuration(format!("invalid project pattern '{pattern}': {err}"))
        })?;
        for group in [LANGUAGE_GROUP, PROJECT_GROUP] {
            if !pattern.capture_names().flatten().any(|name| name == group) {
                return Err(FunnelError::Configuration(format!(
                    "project pattern '{}' lacks the named group '{}'",
                    pattern.as_str(),
                    group
                )));
            }
        }
        Ok(Self { pattern })
    }

    /// Raw pattern text.
    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }

    /// Split `raw` into `(language, project)`, or `None` when the pattern does not match.
    pub fn split(&self, raw: &str) -> Option<(ComponentValue, ComponentValue)> {
        let captures = self.pattern.captures(raw)?;
        let language = captures.name(LANGUAGE_GROUP)?.as_str();
        let project = captures.name(PROJECT_GROUP)?.as_str();
        Some((language.to_string(), project.to_string()))
    }
}

/// Structured, partially specified identity of one observed action.
#[derive(Clone)]
pub struct ActionKey {
    values: [Option<ComponentValue>; Component::COUNT],
    canonical: CanonicalKey,
}

impl ActionKey {
    /// Build a key from explicit component values. Empty values count as absent.
    pub fn from_components<V, I>(components: I) -> Self
    where
        I: IntoIterator<Item = (Component, V)>,
        V: Into<ComponentValue>,
    {
        let mut values: [Option<ComponentValue>; Component::COUNT] = Default::default();
        for (component, value) in components {
            let value = value.into();
            values[component.position()] = (!value.is_empty()).then_some(value);
        }
        Self::from_values(values)
    }

    /// Extract every recognized component from a generic field map.
    ///
    /// When a decomposer is supplied the `project` field is split into the
    /// language and project components; a value the pattern cannot split makes
    /// the whole record malformed. Without a decomposer the project value is
    /// used verbatim.
    pub fn from_fields(
        token: &str,
        fields: &impl FieldLookup,
        decomposer: Option<&ProjectDecomposer>,
    ) -> Result<Self, FunnelError> {
        let mut values: [Option<ComponentValue>; Component::COUNT] = Default::default();
        for component in Component::ALL {
            let Some(raw) = fields.field(component.name()) else {
                continue;
            };
            if raw.is_empty() {
                continue;
            }
            match (component, decomposer) {
                (Component::Project, Some(decomposer)) => {
                    let (language, project) =
                        decomposer
                            .split(raw)
                            .ok_or_else(|| FunnelError::MalformedInput {
                                token: token.to_string(),
                                reason: format!(
                                    "project '{}' does not match pattern '{}'",
                                    raw,
                                    decomposer.as_str()
                                ),
                            })?;
                    values[Component::Language.position()] =
                        (!language.is_empty()).then_some(language);
                    values[Component::Project.position()] =
                        (!project.is_empty()).then_some(project);
                }
                _ => values[component.position()] = Some(raw.to_string()),
            }
        }
        Ok(Self::from_values(values))
    }

    /// Rebuild a key from its canonical string.
    ///
    /// `.` positions become absent components. Returns `None` when the string
    /// does not have exactly one position per component.
    pub fn parse_canonical(canonical: &str) -> Option<Self> {
        let parts: Vec<&str> = canonical.split(COMPONENT_SEPARATOR).collect();
        if parts.len() != Component::COUNT {
            return None;
        }
        Some(Self::from_components(
            Component::ALL
                .into_iter()
                .zip(parts)
                .filter(|(_, part)| *part != EMPTY_PLACEHOLDER)
                .map(|(component, part)| (component, part.to_string())),
        ))
    }

    fn from_values(values: [Option<ComponentValue>; Component::COUNT]) -> Self {
        let canonical = render_canonical(&values);
        Self { values, canonical }
    }

    /// Value of `component`, if present.
    pub fn get(&self, component: Component) -> Option<&str> {
        self.values[component.position()].as_deref()
    }

    /// Present components in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (Component, &str)> + '_ {
        Component::ALL
            .into_iter()
            .filter_map(|component| self.get(component).map(|value| (component, value)))
    }

    /// Number of present components.
    pub fn len(&self) -> usize {
        self.values.iter().filter(|value| value.is_some()).count()
    }

    /// Returns `true` when no component is present.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Canonical identity string.
    pub fn canonical_string(&self) -> &str {
        &self.canonical
    }
}

fn render_canonical(values: &[Option<ComponentValue>]) -> CanonicalKey {
    let mut canonical = String::new();
    for (idx, value) in values.iter().enumerate() {
        if idx > 0 {
            canonical.push(COMPONENT_SEPARATOR);
        }
        canonical.push_str(value.as_deref().unwrap_or(EMPTY_PLACEHOLDER));
    }
    canonical
}

impl PartialEq for ActionKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for ActionKey {}

impl Hash for ActionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl fmt::Debug for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ActionKey").field(&self.canonical).finish()
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

/// One observed user action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionEvent {
    /// User/session token.
    pub token: Token,
    /// Observation time.
    pub timestamp: DateTime<Utc>,
    /// Structured action identity.
    pub key: ActionKey,
    /// Zero-based position of the source record in the input stream.
    pub arrival: u64,
}

impl ActionEvent {
    /// Build an event from a raw record, extracting its action key.
    pub fn from_record(
        record: &EventRecord,
        arrival: u64,
        decomposer: Option<&ProjectDecomposer>,
    ) -> Result<Self, FunnelError> {
        let key = ActionKey::from_fields(&record.token, &record.fields, decomposer)?;
        Ok(Self {
            token: record.token.clone(),
            timestamp: record.timestamp,
            key,
            arrival,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::action_key::DEFAULT_PROJECT_PATTERN;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn host_style() -> ProjectDecomposer {
        ProjectDecomposer::new(DEFAULT_PROJECT_PATTERN).unwrap()
    }

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn canonical_string_renders_missing_components_as_dots() {
        let key = ActionKey::from_components([
            (Component::Client, "web"),
            (Component::Event, "click"),
        ]);
        assert_eq!(key.canonical_string(), "web:.:.:.:.:click");
        assert_eq!(key.len(), 2);
    }

    #[test]
    fn empty_values_render_like_missing_ones() {
        let empty = ActionKey::from_components([(Component::Page, ""), (Component::Event, "x")]);
        let missing = ActionKey::from_components([(Component::Event, "x")]);
        assert_eq!(empty, missing);
        assert_eq!(empty.get(Component::Page), None);
    }

    #[test]
    fn empty_key_is_all_placeholders() {
        let key = ActionKey::from_components(Vec::<(Component, String)>::new());
        assert!(key.is_empty());
        assert_eq!(key.canonical_string(), ".:.:.:.:.:.");
    }

    #[test]
    fn from_fields_reads_case_insensitive_keys() {
        let key = ActionKey::from_fields(
            "t",
            &fields(&[("Client", "web"), ("EVENT", "impression"), ("extra", "ignored")]),
            None,
        )
        .unwrap();
        assert_eq!(key.get(Component::Client), Some("web"));
        assert_eq!(key.get(Component::Event), Some("impression"));
        assert_eq!(key.canonical_string(), "web:.:.:.:.:impression");
    }

    #[test]
    fn from_fields_decomposes_project() {
        let decomposer = host_style();
        let key = ActionKey::from_fields(
            "t",
            &fields(&[("project", "fr.wikisource"), ("language", "de")]),
            Some(&decomposer),
        )
        .unwrap();
        assert_eq!(key.get(Component::Language), Some("fr"));
        assert_eq!(key.get(Component::Project), Some("wikisource"));
    }

    #[test]
    fn from_fields_rejects_undecomposable_project() {
        let decomposer = host_style();
        let err = ActionKey::from_fields("tok", &fields(&[("project", "commons")]), Some(&decomposer))
            .unwrap_err();
        match err {
            FunnelError::MalformedInput { token, reason } => {
                assert_eq!(token, "tok");
                assert!(reason.contains("commons"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn from_fields_treats_empty_project_as_absent() {
        let decomposer = host_style();
        let key = ActionKey::from_fields(
            "tok",
            &fields(&[("project", ""), ("event", "click")]),
            Some(&decomposer),
        )
        .unwrap();
        assert_eq!(key.get(Component::Project), None);
        assert_eq!(key.get(Component::Language), None);
        assert_eq!(key.canonical_string(), ".:.:.:.:.:click");
    }

    #[test]
    fn decomposer_requires_named_groups() {
        assert!(matches!(
            ProjectDecomposer::new(r"^(?P<language>\w+)$"),
            Err(FunnelError::Configuration(_))
        ));
        assert!(matches!(
            ProjectDecomposer::new(r"(unclosed"),
            Err(FunnelError::Configuration(_))
        ));
        let wiki = ProjectDecomposer::new(r"^(?P<language>[a-z]+)(?P<project>wiki)$").unwrap();
        assert_eq!(
            wiki.split("enwiki"),
            Some(("en".to_string(), "wiki".to_string()))
        );
    }

    #[test]
    fn parse_canonical_reverses_rendering() {
        let key = ActionKey::parse_canonical("web:en:wikipedia:0:Main_Page:click").unwrap();
        assert_eq!(key.get(Component::Page), Some("Main_Page"));
        assert_eq!(key.canonical_string(), "web:en:wikipedia:0:Main_Page:click");
        assert!(ActionKey::parse_canonical("web:click").is_none());
    }

    #[test]
    fn event_from_record_keeps_token_and_timestamp() {
        let ts = Utc.with_ymd_and_hms(2013, 3, 1, 12, 0, 0).unwrap();
        let record = EventRecord::new("abc", ts, [("event", "click")]);
        let event = ActionEvent::from_record(&record, 7, None).unwrap();
        assert_eq!(event.token, "abc");
        assert_eq!(event.timestamp, ts);
        assert_eq!(event.arrival, 7);
        assert_eq!(event.key.get(Component::Event), Some("click"));
    }
}
