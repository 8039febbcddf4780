//! Error types for the walkthrough registry.

use thiserror::Error;

/// Errors surfaced by registry operations.
///
/// Lookup variants indicate a caller bug (the id was never registered). Authoring variants
/// are returned from registration so the contributing adapter can log them; the registry
/// itself never partially applies a failed registration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Step not found: {id}")]
    StepNotFound { id: String },

    #[error("Walkthrough not found: {id}")]
    WalkthroughNotFound { id: String },

    #[error("Duplicate step id '{step_id}' while registering walkthrough '{walkthrough_id}'")]
    DuplicateStep { walkthrough_id: String, step_id: String },

    #[error("Step '{step_id}' in walkthrough '{walkthrough_id}' has no media")]
    MissingMedia { walkthrough_id: String, step_id: String },
}

impl RegistryError {
    /// Create a step not found error.
    pub fn step_not_found(id: impl Into<String>) -> Self {
        Self::StepNotFound { id: id.into() }
    }

    /// Create a walkthrough not found error.
    pub fn walkthrough_not_found(id: impl Into<String>) -> Self {
        Self::WalkthroughNotFound { id: id.into() }
    }

    /// Whether the error is an authoring problem rather than a lookup failure.
    pub fn is_authoring_error(&self) -> bool {
        matches!(self, Self::DuplicateStep { .. } | Self::MissingMedia { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_name_the_ids() {
        let error = RegistryError::DuplicateStep {
            walkthrough_id: "setup".into(),
            step_id: "theme".into(),
        };
        assert_eq!(error.to_string(), "Duplicate step id 'theme' while registering walkthrough 'setup'");
        assert!(error.is_authoring_error());
        assert!(!RegistryError::step_not_found("x").is_authoring_error());
    }
}
