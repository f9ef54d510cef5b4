/// Opaque user/session identifier correlating events.
/// Example: `"5a1f0c6e2d9b4f7a"`
pub type Token = String;
/// Name of a funnel step as declared in the node catalogue.
/// Examples: `impression`, `click`, `convert`
pub type StepName = String;
/// Raw value of one action component.
/// Examples: `web`, `en`, `wikipedia`, `0`, `Main_Page`, `click`
pub type ComponentValue = String;
/// Canonical colon-joined action identity.
/// Example: `web:en:wikipedia:0:Main_Page:click`
pub type CanonicalKey = String;
/// Logging schema name used to filter heterogeneous event streams.
/// Example: `ClickTracking`
pub type SchemaName = String;
/// Warning/log message text.
/// Example: `project 'commons' does not decompose into language and project`
pub type LogMessage = String;
