/// Constants used by the canonical action-key encoding.
pub mod action_key {
    /// Separator placed between components in a canonical key.
    pub const COMPONENT_SEPARATOR: char = ':';
    /// Placeholder rendered for a missing or empty component.
    pub const EMPTY_PLACEHOLDER: &str = ".";
    /// Host-style project pattern splitting `en.wikipedia` into language and project.
    pub const DEFAULT_PROJECT_PATTERN: &str =
        r"^(?P<language>[a-z][a-z0-9-]*)\.(?P<project>[a-z]+)$";
    /// Capture group name holding the language code in a project pattern.
    pub const LANGUAGE_GROUP: &str = "language";
    /// Capture group name holding the project name in a project pattern.
    pub const PROJECT_GROUP: &str = "project";
}

/// Constants used by the record-reading collaborator.
pub mod ingest {
    /// Top-level field carrying the user/session token.
    pub const TOKEN_FIELD: &str = "token";
    /// Top-level object carrying capsule metadata.
    pub const META_FIELD: &str = "meta";
    /// Field inside `meta` naming the logging schema.
    pub const SCHEMA_FIELD: &str = "schema";
    /// Field inside `meta` carrying the event timestamp.
    pub const TIMESTAMP_FIELD: &str = "timestamp";
    /// File extension that switches reading to gzip decompression.
    pub const GZIP_EXTENSION: &str = "gz";
}

/// Constants used by batch analysis.
pub mod analysis {
    /// Default cap on retained ambiguous-timestamp warnings per run.
    pub const DEFAULT_MAX_TIE_WARNINGS: usize = 1024;
}
