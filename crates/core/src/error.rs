use crate::generation::MediaKind;
use crate::job::JobStatus;
use crate::types::JobId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Unknown model '{model}'. Available: {available:?}")]
    UnknownModel {
        model: String,
        available: Vec<String>,
    },

    #[error("Provider '{provider}' not available for '{model}'. Available: {available:?}")]
    ProviderUnavailable {
        model: String,
        provider: String,
        available: Vec<String>,
    },

    #[error("Model '{model}' generates {actual} but the batch targets {expected}")]
    KindMismatch {
        model: String,
        expected: MediaKind,
        actual: MediaKind,
    },

    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Configuration defects are detected while planning, before any
    /// provider is contacted.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownModel { .. }
                | Self::ProviderUnavailable { .. }
                | Self::KindMismatch { .. }
                | Self::Validation(_)
        )
    }
}
