use data_loader::ValidationError;
use thiserror::Error;

/// Errors surfaced to callers of the orchestrator.
///
/// Per-source failures never appear here; they are recovered inside the
/// pipeline and recorded in the decision trace.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid query: {0}")]
    Validation(#[from] ValidationError),

    /// Every source failed hard. Carries only an opaque reference that maps
    /// to the full trace server-side.
    #[error("We could not complete this request right now (reference {correlation_id})")]
    PipelineFailure { correlation_id: String },
}

impl OrchestratorError {
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            OrchestratorError::PipelineFailure { correlation_id } => Some(correlation_id),
            OrchestratorError::Validation(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_failure_message_is_generic() {
        let err = OrchestratorError::PipelineFailure {
            correlation_id: "abc-123".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("abc-123"));
        assert!(!message.to_lowercase().contains("retrieval"));
        assert_eq!(err.correlation_id(), Some("abc-123"));
    }

    #[test]
    fn test_validation_error_converts() {
        let err: OrchestratorError = ValidationError::UnknownKey("author".to_string()).into();
        assert!(matches!(err, OrchestratorError::Validation(_)));
        assert_eq!(err.correlation_id(), None);
    }
}
