use serde::{Deserialize, Serialize};
use std::fmt;

/// Named field of a structured action identity.
///
/// Declaration order is the canonical order: it fixes the position of each
/// component in a canonical key and is the iteration order of [`Component::ALL`].
///
/// | Component  | Meaning                      | Example                  |
/// |------------|------------------------------|--------------------------|
/// | `Client`   | client application           | `web`, `iphone`          |
/// | `Language` | project language code        | `en`, `fr`, `ja`         |
/// | `Project`  | project name                 | `wikipedia`, `wikisource`|
/// | `Namespace`| namespace of the page        | `0`, `2`                 |
/// | `Page`     | page or functional grouping  | `Main_Page`              |
/// | `Event`    | action taken by the user     | `impression`, `click`    |
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    /// Client application.
    Client,
    /// Project language code.
    Language,
    /// Project name.
    Project,
    /// Namespace of the page.
    Namespace,
    /// Page or functional grouping.
    Page,
    /// Action taken by the user.
    Event,
}

impl Component {
    /// Number of components.
    pub const COUNT: usize = 6;

    /// Every component in canonical order.
    pub const ALL: [Component; Self::COUNT] = [
        Component::Client,
        Component::Language,
        Component::Project,
        Component::Namespace,
        Component::Page,
        Component::Event,
    ];

    /// Lower-case field name used when extracting values from a field map.
    pub const fn name(self) -> &'static str {
        match self {
            Component::Client => "client",
            Component::Language => "language",
            Component::Project => "project",
            Component::Namespace => "namespace",
            Component::Page => "page",
            Component::Event => "event",
        }
    }

    /// Resolve a component from a field name, ignoring ASCII case.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|component| component.name().eq_ignore_ascii_case(name))
    }

    /// Position of this component in the canonical ordering.
    pub fn position(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_name_ignores_case() {
        assert_eq!(Component::from_name("EVENT"), Some(Component::Event));
        assert_eq!(Component::from_name("Namespace"), Some(Component::Namespace));
        assert_eq!(Component::from_name("schema"), None);
    }

    #[test]
    fn canonical_order_matches_declaration() {
        let positions: Vec<usize> = Component::ALL.iter().map(|c| c.position()).collect();
        assert_eq!(positions, vec![0, 1, 2, 3, 4, 5]);
        assert!(Component::Client < Component::Event);
    }
}
