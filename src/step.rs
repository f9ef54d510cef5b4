use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::action::{ActionEvent, ActionKey};
use crate::component::Component;
use crate::constants::action_key::COMPONENT_SEPARATOR;
use crate::types::{ComponentValue, StepName};

/// Position of a step inside a [`crate::FunnelDefinition`].
///
/// Steps are compared by id, never by pattern: two steps with identical
/// constraints are still distinct funnel positions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StepId(pub usize);

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Wildcard pattern over the component space.
///
/// Components without a constraint match anything.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunnelStep {
    id: StepId,
    name: StepName,
    constraints: BTreeMap<Component, ComponentValue>,
}

impl FunnelStep {
    /// Create a step; empty constraint values are treated as wildcards.
    pub fn new<V, I>(id: StepId, name: impl Into<StepName>, constraints: I) -> Self
    where
        I: IntoIterator<Item = (Component, V)>,
        V: Into<ComponentValue>,
    {
        Self {
            id,
            name: name.into(),
            constraints: constraints
                .into_iter()
                .map(|(component, value)| (component, value.into()))
                .filter(|(_, value)| !value.is_empty())
                .collect(),
        }
    }

    /// Position in the owning definition.
    pub fn id(&self) -> StepId {
        self.id
    }

    /// Name from the node catalogue.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Concrete constraints in canonical order.
    pub fn constraints(&self) -> impl Iterator<Item = (Component, &str)> + '_ {
        self.constraints
            .iter()
            .map(|(component, value)| (*component, value.as_str()))
    }

    /// Constraint on `component`, or `None` for a wildcard.
    pub fn constraint(&self, component: Component) -> Option<&str> {
        self.constraints.get(&component).map(String::as_str)
    }

    /// Copy of this step with the constraint on `component` lifted.
    pub fn without(&self, component: Component) -> Self {
        let mut relaxed = self.clone();
        relaxed.constraints.remove(&component);
        relaxed
    }

    /// Returns `true` when `event` satisfies every concrete constraint.
    pub fn matches(&self, event: &ActionEvent) -> bool {
        matches(self, &event.key)
    }

    /// Pattern rendered like a canonical key with `*` for wildcards.
    pub fn pattern_string(&self) -> String {
        let separator = COMPONENT_SEPARATOR.to_string();
        Component::ALL
            .into_iter()
            .map(|component| match self.constraint(component) {
                Some(value) => value,
                None => "*",
            })
            .collect::<Vec<_>>()
            .join(separator.as_str())
    }
}

/// Test a pattern against a concrete action.
///
/// Every concrete constraint must equal the action's value exactly; an absent
/// action component never satisfies a concrete constraint. Stops at the first
/// mismatch.
pub fn matches(pattern: &FunnelStep, concrete: &ActionKey) -> bool {
    pattern
        .constraints
        .iter()
        .all(|(component, expected)| match concrete.get(*component) {
            Some(actual) => actual == expected,
            None => false,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(pairs: &[(Component, &str)]) -> ActionKey {
        ActionKey::from_components(pairs.iter().map(|(c, v)| (*c, v.to_string())))
    }

    #[test]
    fn wildcard_components_match_anything() {
        let step = FunnelStep::new(StepId(0), "click", [(Component::Event, "click")]);
        assert!(matches(&step, &key(&[(Component::Event, "click")])));
        assert!(matches(
            &step,
            &key(&[(Component::Client, "web"), (Component::Event, "click")])
        ));
        assert!(!matches(&step, &key(&[(Component::Event, "impression")])));
    }

    #[test]
    fn missing_event_data_never_satisfies_a_constraint() {
        let step = FunnelStep::new(
            StepId(0),
            "mobile_click",
            [(Component::Client, "iphone"), (Component::Event, "click")],
        );
        assert!(!matches(&step, &key(&[(Component::Event, "click")])));
    }

    #[test]
    fn unconstrained_step_matches_empty_key() {
        let step = FunnelStep::new(StepId(3), "any", Vec::<(Component, String)>::new());
        assert!(matches(&step, &key(&[])));
    }

    #[test]
    fn removing_a_constraint_keeps_matches() {
        let step = FunnelStep::new(
            StepId(1),
            "ja_click",
            [(Component::Language, "ja"), (Component::Event, "click")],
        );
        let event = key(&[(Component::Language, "ja"), (Component::Event, "click")]);
        assert!(matches(&step, &event));
        assert!(matches(&step.without(Component::Language), &event));
        assert!(matches(&step.without(Component::Event), &event));
    }

    #[test]
    fn pattern_string_marks_wildcards() {
        let step = FunnelStep::new(
            StepId(0),
            "s",
            [(Component::Project, "wikipedia"), (Component::Event, "")],
        );
        assert_eq!(step.pattern_string(), "*:*:wikipedia:*:*:*");
        assert_eq!(step.constraint(Component::Event), None);
    }
}
