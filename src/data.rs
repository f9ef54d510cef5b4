use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub use crate::types::{ComponentValue, Token};

/// One schema-filtered input record handed to the core by the reading layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// User/session token the record belongs to.
    pub token: Token,
    /// Observation time of the action.
    pub timestamp: DateTime<Utc>,
    /// Generic key/value fields of the record (component values live here).
    pub fields: BTreeMap<String, ComponentValue>,
}

impl EventRecord {
    /// Create a record from any iterable of field pairs.
    pub fn new<K, V, I>(token: impl Into<Token>, timestamp: DateTime<Utc>, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            token: token.into(),
            timestamp,
            fields: fields
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

/// Read-only view over a generic field map.
///
/// Lookups ignore ASCII case so `Event`, `event`, and `EVENT` resolve to the
/// same field. When several keys differ only by case the first one in the
/// map's iteration order wins.
pub trait FieldLookup {
    /// Return the value stored under `name`, ignoring ASCII case.
    fn field(&self, name: &str) -> Option<&str>;
}

impl FieldLookup for BTreeMap<String, String> {
    fn field(&self, name: &str) -> Option<&str> {
        if let Some(value) = self.get(name) {
            return Some(value.as_str());
        }
        self.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl FieldLookup for HashMap<String, String> {
    fn field(&self, name: &str) -> Option<&str> {
        if let Some(value) = self.get(name) {
            return Some(value.as_str());
        }
        let mut matches: Vec<(&String, &String)> = self
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(name))
            .collect();
        // HashMap iteration order is unstable; pick the smallest key for determinism.
        matches.sort_by(|a, b| a.0.cmp(b.0));
        matches.first().map(|(_, value)| value.as_str())
    }
}

impl FieldLookup for IndexMap<String, String> {
    fn field(&self, name: &str) -> Option<&str> {
        if let Some(value) = self.get(name) {
            return Some(value.as_str());
        }
        self.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}
