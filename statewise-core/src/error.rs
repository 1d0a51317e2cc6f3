//! Core error types.

use crate::engine::AttemptPhase;
use thiserror::Error;

/// Errors from the state machine engine.
///
/// Precondition violations are returned as values so callers can branch on
/// [`CoreError::error_code`] without unwinding.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("no transition available for trigger '{trigger}' in state '{state}'")]
    NoAvailableTransitions { state: String, trigger: String },

    #[error("requirements not met for trigger '{trigger}': {}", failure_reasons.join("; "))]
    RequirementsNotMet {
        trigger: String,
        failure_reasons: Vec<String>,
    },

    #[error("transition {transition_id} does not belong to definition '{definition}'")]
    TransitionNotInDefinition {
        transition_id: String,
        definition: String,
    },

    #[error("transition attempt cancelled before {phase}")]
    Cancelled { phase: AttemptPhase },

    #[error("trigger not found: {trigger}")]
    TriggerNotFound { trigger: String },

    #[error("target state must not be empty")]
    StateNull,

    #[error("state '{state}' is not part of definition '{definition}'")]
    StateNotInDefinition { state: String, definition: String },

    #[error("forced transition requires a reason")]
    ForceMissingReason,

    #[error("revert count must be greater than zero")]
    RevertInvalidCount,

    #[error("revert requires a reason")]
    RevertMissingReason,

    #[error("cannot revert {requested} transition(s): only {available} not yet reverted")]
    RevertInsufficientHistory { requested: usize, available: usize },

    #[error("instance has no transition history to revert")]
    RevertNoHistory,

    #[error("definition '{definition}' has no initial state to revert to")]
    RevertNoInitialState { definition: String },

    #[error("revert target state {state_id} no longer exists in definition '{definition}'")]
    RevertStateNotFound { state_id: String, definition: String },

    #[error("invalid definition: {reason}")]
    InvalidDefinition { reason: String },

    #[error("definition '{definition}' has no initial state")]
    NoInitialState { definition: String },

    #[error("definition '{definition}' v{version} is not published")]
    DefinitionNotPublished { definition: String, version: u32 },

    #[error("invalid version {requested}: must be greater than {current}")]
    InvalidVersion { current: u32, requested: u32 },

    #[error("instance record references definition {expected}, got {actual}")]
    DefinitionMismatch { expected: String, actual: String },

    #[error("persistence error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Returns whether the caller may retry with a freshly loaded instance.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::Repository(RepositoryError::ConcurrencyConflict { .. })
        )
    }

    /// Returns the stable error code of this failure.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::NoAvailableTransitions { .. } => "Transition.NoAvailableTransitions",
            CoreError::RequirementsNotMet { .. } => "Transition.RequirementsNotMet",
            CoreError::TransitionNotInDefinition { .. } => "Transition.NotInDefinition",
            CoreError::Cancelled { .. } => "Transition.Cancelled",
            CoreError::TriggerNotFound { .. } => "Trigger.NotFound",
            CoreError::StateNull => "State.Null",
            CoreError::StateNotInDefinition { .. } => "State.NotInDefinition",
            CoreError::ForceMissingReason => "Force.MissingReason",
            CoreError::RevertInvalidCount => "Revert.InvalidCount",
            CoreError::RevertMissingReason => "Revert.MissingReason",
            CoreError::RevertInsufficientHistory { .. } => "Revert.InsufficientHistory",
            CoreError::RevertNoHistory => "Revert.NoHistory",
            CoreError::RevertNoInitialState { .. } => "Revert.NoInitialState",
            CoreError::RevertStateNotFound { .. } => "Revert.StateNotFound",
            CoreError::InvalidDefinition { .. } => "Definition.Invalid",
            CoreError::NoInitialState { .. } => "Definition.NoInitialState",
            CoreError::DefinitionNotPublished { .. } => "Definition.NotPublished",
            CoreError::InvalidVersion { .. } => "Definition.InvalidVersion",
            CoreError::DefinitionMismatch { .. } => "Definition.Mismatch",
            CoreError::Repository(e) => e.error_code(),
            CoreError::Json(_) => "Json",
        }
    }

    /// Aggregated failure reasons for `Transition.RequirementsNotMet`.
    pub fn failure_reasons(&self) -> &[String] {
        match self {
            CoreError::RequirementsNotMet {
                failure_reasons, ..
            } => failure_reasons,
            _ => &[],
        }
    }
}

/// Errors reported by an [`InstanceRepository`](crate::repository::InstanceRepository).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("concurrent update of instance {instance_id}: expected token {expected}, found {actual}")]
    ConcurrencyConflict {
        instance_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("{0}")]
    Failure(String),
}

impl RepositoryError {
    pub fn error_code(&self) -> &'static str {
        match self {
            RepositoryError::ConcurrencyConflict { .. } => "ConcurrencyConflict",
            RepositoryError::Failure(_) => "Repository.Failure",
        }
    }
}

/// Errors raised by requirement and effect handlers.
///
/// The evaluation services turn these into failure reasons; they never
/// escape a transition attempt.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("cannot decode '{kind}' payload: {source}")]
    Decode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            CoreError::RevertInvalidCount.error_code(),
            "Revert.InvalidCount"
        );
        assert_eq!(CoreError::StateNull.error_code(), "State.Null");

        let conflict = CoreError::from(RepositoryError::ConcurrencyConflict {
            instance_id: "i-1".to_string(),
            expected: 1,
            actual: 2,
        });
        assert_eq!(conflict.error_code(), "ConcurrencyConflict");
        assert!(conflict.is_retryable());
        assert!(!CoreError::RevertNoHistory.is_retryable());
    }

    #[test]
    fn test_requirements_not_met_message() {
        let err = CoreError::RequirementsNotMet {
            trigger: "approve".to_string(),
            failure_reasons: vec!["budget missing".to_string(), "no signoff".to_string()],
        };
        assert_eq!(err.failure_reasons().len(), 2);
        assert_eq!(
            err.to_string(),
            "requirements not met for trigger 'approve': budget missing; no signoff"
        );
    }
}
