use crate::action::ProjectDecomposer;
use crate::constants::analysis::DEFAULT_MAX_TIE_WARNINGS;
use crate::errors::FunnelError;

/// Top-level analysis configuration.
#[derive(Clone, Debug)]
pub struct AnalysisConfig {
    /// Regex with `language` and `project` named groups used to split the
    /// composite project field. `None` keeps project values verbatim.
    pub project_pattern: Option<String>,
    /// Match users on the rayon pool instead of the calling thread.
    pub parallel: bool,
    /// Max number of ambiguous-timestamp warnings kept in a report.
    ///
    /// Every collision is still counted; this only bounds memory on inputs
    /// with coarse timestamps.
    pub max_tie_warnings: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            project_pattern: None,
            parallel: true,
            max_tie_warnings: DEFAULT_MAX_TIE_WARNINGS,
        }
    }
}

impl AnalysisConfig {
    /// Compile the configured project pattern, if any.
    pub fn decomposer(&self) -> Result<Option<ProjectDecomposer>, FunnelError> {
        self.project_pattern
            .as_deref()
            .map(ProjectDecomposer::new)
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_keeps_projects_verbatim() {
        let config = AnalysisConfig::default();
        assert!(config.parallel);
        assert!(config.decomposer().unwrap().is_none());
    }

    #[test]
    fn invalid_pattern_is_a_configuration_error() {
        let config = AnalysisConfig {
            project_pattern: Some("(?P<language>".into()),
            ..AnalysisConfig::default()
        };
        assert!(matches!(
            config.decomposer(),
            Err(FunnelError::Configuration(_))
        ));
    }
}
