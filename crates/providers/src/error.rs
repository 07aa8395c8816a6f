//! Provider error type and its mapping onto job failure kinds.

use genbatch_core::job::FailureKind;

/// Errors from a generation provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// A transport-level failure reported without a `reqwest::Error`.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The provider returned a non-2xx status code.
    #[error("{provider} API error ({status}): {body}")]
    Api {
        provider: String,
        status: u16,
        body: String,
    },

    /// The provider reported that the generation itself failed.
    #[error("Generation failed: {0}")]
    Rejected(String),

    /// The response did not have the documented shape.
    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    /// The adapter cannot serve this request (wrong model, missing input).
    #[error("Unsupported request: {0}")]
    Unsupported(String),
}

impl ProviderError {
    /// Whether repeating the same call may succeed.
    ///
    /// Network failures and HTTP 408, 429 and 5xx are transient.
    /// Everything else is a definitive answer from the provider.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(e) => !(e.is_builder() || e.is_decode()),
            Self::Transport(_) => true,
            Self::Api { status, .. } => is_transient_status(*status),
            Self::Rejected(_) | Self::InvalidResponse(_) | Self::Unsupported(_) => false,
        }
    }

    /// Classify this error for the batch report.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Unsupported(_) => FailureKind::Configuration,
            e if e.is_transient() => FailureKind::Transport,
            _ => FailureKind::RemoteRejection,
        }
    }
}

/// HTTP statuses worth retrying.
pub fn is_transient_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
