use std::io;

use thiserror::Error;

use crate::types::Token;

/// Error type for record decomposition, funnel loading, configuration, and IO failures.
#[derive(Debug, Error)]
pub enum FunnelError {
    /// A record could not be turned into an event; only that record is dropped.
    #[error("malformed input record for token '{token}': {reason}")]
    MalformedInput {
        /// Token of the record, empty when it could not be read.
        token: Token,
        /// What was wrong with the record.
        reason: String,
    },
    /// The funnel definition is structurally invalid.
    #[error("malformed funnel definition: {0}")]
    MalformedFunnel(String),
    /// An analysis option is invalid.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Reading input failed.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// A JSON document could not be decoded.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl FunnelError {
    /// Returns `true` for errors that only invalidate a single record.
    pub fn is_record_level(&self) -> bool {
        matches!(self, FunnelError::MalformedInput { .. })
    }
}
