//! Job lifecycle, outcomes, and failure classification.
//!
//! A [`Job`] moves strictly forward through
//! `Pending -> Submitted -> (Polling) -> Completed | Failed`. The only
//! shortcut is `Pending -> Failed`, used when planning or submission
//! rejects a job before any remote operation exists.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::generation::{GenerationParams, MediaKind};
use crate::types::{JobId, RecordId};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Submitted,
    Polling,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `self -> next` is a legal forward transition.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Submitted | Self::Failed)
                | (Self::Submitted, Self::Polling | Self::Completed | Self::Failed)
                | (Self::Polling, Self::Completed | Self::Failed)
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Polling => "polling",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One request to generate one asset for one record variation.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub record_id: RecordId,
    /// 1-based variation index within the record.
    pub variation: u32,
    pub kind: MediaKind,
    pub model: String,
    pub provider: String,
    /// Model identifier understood by the provider's API.
    pub remote_model_id: String,
    /// Price of one successful generation, in USD.
    pub unit_cost: f64,
    pub params: GenerationParams,
    status: JobStatus,
}

/// Resolved routing for a job, produced by the provider catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRoute {
    pub kind: MediaKind,
    pub model: String,
    pub provider: String,
    pub remote_model_id: String,
    pub unit_cost: f64,
}

impl Job {
    /// Create a new pending job.
    pub fn new(
        record_id: impl Into<RecordId>,
        variation: u32,
        route: JobRoute,
        params: GenerationParams,
    ) -> Self {
        Self {
            id: uuid::Uuid::now_v7(),
            record_id: record_id.into(),
            variation,
            kind: route.kind,
            model: route.model,
            provider: route.provider,
            remote_model_id: route.remote_model_id,
            unit_cost: route.unit_cost,
            params,
            status: JobStatus::Pending,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Move the job to `next`, rejecting any backwards or repeated step.
    pub fn advance(&mut self, next: JobStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                job_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Short human label, e.g. `recA3f/v2`.
    pub fn label(&self) -> String {
        format!("{}/v{}", self.record_id, self.variation)
    }
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

/// Classification of a job-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Unknown model/provider or invalid parameters; never submitted.
    Configuration,
    /// Network or transient HTTP failures exhausted their retries.
    Transport,
    /// The provider explicitly reported a failure.
    RemoteRejection,
    /// The per-handle polling deadline passed.
    Timeout,
    /// The generated media could not be materialised.
    Storage,
    /// The batch was cancelled before this job resolved.
    Cancelled,
}

impl FailureKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Transport => "transport",
            Self::RemoteRejection => "remote_rejection",
            Self::Timeout => "timeout",
            Self::Storage => "storage",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A classified job failure, carried as data rather than raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            FailureKind::Timeout,
            format!("no result after {}s", after.as_secs()),
        )
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "batch cancelled before completion")
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Terminal result of a job. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        original_url: String,
        masked_url: Option<String>,
    },
    Error(JobFailure),
}

impl Outcome {
    pub fn success(original_url: impl Into<String>, masked_url: Option<String>) -> Self {
        Self::Success {
            original_url: original_url.into(),
            masked_url,
        }
    }

    pub fn error(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Error(JobFailure::new(kind, message))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        match self {
            Self::Error(failure) => Some(failure),
            Self::Success { .. } => None,
        }
    }

    /// The status a job ends in once this outcome is known.
    pub fn terminal_status(&self) -> JobStatus {
        if self.is_success() {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::generation::{AspectRatio, Resolution};

    fn sample_job() -> Job {
        Job::new(
            "rec1",
            1,
            JobRoute {
                kind: MediaKind::Video,
                model: "veo-3.1".into(),
                provider: "google".into(),
                remote_model_id: "veo-3.1-generate-preview".into(),
                unit_cost: 0.5,
            },
            GenerationParams {
                prompt: "a hoodie on a rainy street".into(),
                aspect_ratio: AspectRatio::Portrait9x16,
                duration_secs: Some(8),
                resolution: Resolution::Hd720,
                reference_urls: vec![],
            },
        )
    }

    // -- transitions ----------------------------------------------------------

    #[test]
    fn async_path_transitions() {
        let mut job = sample_job();
        assert_eq!(job.status(), JobStatus::Pending);
        job.advance(JobStatus::Submitted).unwrap();
        job.advance(JobStatus::Polling).unwrap();
        job.advance(JobStatus::Completed).unwrap();
        assert!(job.status().is_terminal());
    }

    #[test]
    fn sync_path_skips_polling() {
        let mut job = sample_job();
        job.advance(JobStatus::Submitted).unwrap();
        job.advance(JobStatus::Completed).unwrap();
    }

    #[test]
    fn pending_may_fail_directly() {
        let mut job = sample_job();
        job.advance(JobStatus::Failed).unwrap();
    }

    #[test]
    fn cannot_move_backwards() {
        let mut job = sample_job();
        job.advance(JobStatus::Submitted).unwrap();
        job.advance(JobStatus::Polling).unwrap();
        assert_matches!(
            job.advance(JobStatus::Submitted),
            Err(CoreError::InvalidTransition { from: JobStatus::Polling, to: JobStatus::Submitted, .. })
        );
    }

    #[test]
    fn terminal_states_are_final() {
        let mut job = sample_job();
        job.advance(JobStatus::Failed).unwrap();
        assert!(job.advance(JobStatus::Completed).is_err());
        assert!(job.advance(JobStatus::Failed).is_err());
    }

    #[test]
    fn pending_cannot_complete_without_submission() {
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Polling));
    }

    // -- outcome --------------------------------------------------------------

    #[test]
    fn timeout_is_distinguishable_from_rejection() {
        let timeout = Outcome::Error(JobFailure::timeout(Duration::from_secs(600)));
        let rejected = Outcome::error(FailureKind::RemoteRejection, "content policy");
        assert_eq!(timeout.failure().unwrap().kind, FailureKind::Timeout);
        assert_eq!(rejected.failure().unwrap().kind, FailureKind::RemoteRejection);
        assert_eq!(timeout.terminal_status(), JobStatus::Failed);
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let outcome = Outcome::success("https://cdn/x.mp4", None);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["original_url"], "https://cdn/x.mp4");
        assert!(json["masked_url"].is_null());
    }

    #[test]
    fn failure_display_includes_kind() {
        let failure = JobFailure::new(FailureKind::Transport, "connection reset");
        assert_eq!(failure.to_string(), "transport: connection reset");
    }
}
