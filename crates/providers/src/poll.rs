//! Polling loop for asynchronous operations.
//!
//! [`poll_operation`] drives one [`OperationHandle`] to a terminal result:
//! it checks the provider every [`PollPolicy::interval`], tolerates a
//! bounded number of consecutive transient errors, and gives up when the
//! per-handle deadline passes or the batch is cancelled. Every exit path
//! produces a result; nothing escapes as a panic or an unclassified error.

use std::time::Duration;

use genbatch_core::job::{FailureKind, JobFailure};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::adapter::{AsyncAdapter, GeneratedMedia, OperationHandle, PollStatus};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default time between status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Default per-handle deadline.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(600);

/// Default number of consecutive transient errors tolerated.
pub const DEFAULT_TRANSIENT_RETRIES: u32 = 3;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Timing rules for polling one handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_wait: Duration,
    /// Consecutive transient check failures allowed before the handle is
    /// failed with [`FailureKind::Transport`].
    pub max_transient_retries: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
            max_transient_retries: DEFAULT_TRANSIENT_RETRIES,
        }
    }
}

/// Terminal result for one handle.
pub type PollResult = Result<GeneratedMedia, JobFailure>;

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

/// Poll `handle` until it completes, fails, times out, or `cancel` fires.
pub async fn poll_operation(
    adapter: &dyn AsyncAdapter,
    handle: &OperationHandle,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> PollResult {
    let started = Instant::now();
    let deadline = started + policy.max_wait;
    let mut transient_errors = 0u32;
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let checked = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(JobFailure::cancelled()),
            r = tokio::time::timeout_at(deadline, adapter.check(handle)) => r,
        };

        match checked {
            Err(_elapsed) => return Err(JobFailure::timeout(policy.max_wait)),
            Ok(Ok(PollStatus::Completed(media))) => {
                tracing::debug!(
                    provider = adapter.name(),
                    handle = %handle,
                    attempt,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Operation completed",
                );
                return Ok(media);
            }
            Ok(Ok(PollStatus::Failed(reason))) => {
                return Err(JobFailure::new(FailureKind::RemoteRejection, reason));
            }
            Ok(Ok(PollStatus::Pending(state))) => {
                transient_errors = 0;
                tracing::trace!(provider = adapter.name(), handle = %handle, state, "Still running");
            }
            Ok(Err(e)) if e.is_transient() => {
                transient_errors += 1;
                if transient_errors > policy.max_transient_retries {
                    return Err(JobFailure::new(
                        FailureKind::Transport,
                        format!("{transient_errors} consecutive status check failures, last: {e}"),
                    ));
                }
                tracing::warn!(
                    provider = adapter.name(),
                    handle = %handle,
                    error = %e,
                    "Status check failed ({transient_errors}/{}), retrying",
                    policy.max_transient_retries,
                );
            }
            Ok(Err(e)) => return Err(JobFailure::new(e.failure_kind(), e.to_string())),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(JobFailure::timeout(policy.max_wait));
        }
        let wake = (now + policy.interval).min(deadline);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(JobFailure::cancelled()),
            _ = tokio::time::sleep_until(wake) => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use async_trait::async_trait;

    use super::*;
    use crate::adapter::GenerationRequest;
    use crate::error::ProviderError;

    /// Replays a script of check results, then stays pending forever.
    struct Scripted {
        script: Mutex<VecDeque<Result<PollStatus, ProviderError>>>,
        checks: AtomicU32,
        /// Time `retrieve` takes to download a finished result.
        retrieve_delay: Duration,
    }

    impl Scripted {
        fn new(script: Vec<Result<PollStatus, ProviderError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                checks: AtomicU32::new(0),
                retrieve_delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl AsyncAdapter for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn submit(&self, _: &GenerationRequest) -> Result<OperationHandle, ProviderError> {
            Ok(OperationHandle::new("op"))
        }

        async fn check(&self, _: &OperationHandle) -> Result<PollStatus, ProviderError> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(PollStatus::Pending("running".into())))
        }

        async fn retrieve(&self, media: GeneratedMedia) -> Result<GeneratedMedia, ProviderError> {
            tokio::time::sleep(self.retrieve_delay).await;
            match media {
                GeneratedMedia::Remote { url } => Ok(GeneratedMedia::Inline {
                    bytes: url.into_bytes(),
                    content_type: "video/mp4".into(),
                }),
                inline => Ok(inline),
            }
        }
    }

    fn fast() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(5),
            max_wait: Duration::from_millis(200),
            max_transient_retries: 2,
        }
    }

    fn done() -> PollStatus {
        PollStatus::Completed(GeneratedMedia::Remote {
            url: "https://cdn/out.mp4".into(),
        })
    }

    fn unavailable() -> ProviderError {
        ProviderError::Api {
            provider: "scripted".into(),
            status: 503,
            body: "busy".into(),
        }
    }

    #[tokio::test]
    async fn completes_after_pending_checks() {
        let adapter = Scripted::new(vec![
            Ok(PollStatus::Pending("queued".into())),
            Ok(PollStatus::Pending("processing".into())),
            Ok(done()),
        ]);
        let result = poll_operation(&adapter, &OperationHandle::new("op"), &fast(), &CancellationToken::new()).await;
        assert_matches!(result, Ok(GeneratedMedia::Remote { .. }));
        assert_eq!(adapter.checks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn remote_failure_is_rejection() {
        let adapter = Scripted::new(vec![Ok(PollStatus::Failed("content policy".into()))]);
        let err = poll_operation(&adapter, &OperationHandle::new("op"), &fast(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::RemoteRejection);
        assert_eq!(err.message, "content policy");
    }

    #[tokio::test]
    async fn transient_errors_are_retried_within_budget() {
        let adapter = Scripted::new(vec![Err(unavailable()), Err(unavailable()), Ok(done())]);
        let result = poll_operation(&adapter, &OperationHandle::new("op"), &fast(), &CancellationToken::new()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn transient_errors_beyond_budget_fail_as_transport() {
        let adapter = Scripted::new(vec![
            Err(unavailable()),
            Err(unavailable()),
            Err(unavailable()),
            Ok(done()),
        ]);
        let err = poll_operation(&adapter, &OperationHandle::new("op"), &fast(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Transport);
    }

    #[tokio::test]
    async fn pending_resets_transient_count() {
        let adapter = Scripted::new(vec![
            Err(unavailable()),
            Err(unavailable()),
            Ok(PollStatus::Pending("running".into())),
            Err(unavailable()),
            Err(unavailable()),
            Ok(done()),
        ]);
        let result = poll_operation(&adapter, &OperationHandle::new("op"), &fast(), &CancellationToken::new()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn definitive_check_error_is_not_retried() {
        let adapter = Scripted::new(vec![Err(ProviderError::Api {
            provider: "scripted".into(),
            status: 404,
            body: "no such operation".into(),
        })]);
        let err = poll_operation(&adapter, &OperationHandle::new("op"), &fast(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::RemoteRejection);
        assert_eq!(adapter.checks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn never_finishing_operation_times_out() {
        let adapter = Scripted::new(vec![]);
        let policy = PollPolicy {
            max_wait: Duration::from_millis(40),
            ..fast()
        };
        let started = std::time::Instant::now();
        let err = poll_operation(&adapter, &OperationHandle::new("op"), &policy, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn slow_result_download_does_not_count_against_deadline() {
        let mut adapter = Scripted::new(vec![Ok(done())]);
        adapter.retrieve_delay = Duration::from_millis(300);
        let policy = PollPolicy {
            max_wait: Duration::from_millis(100),
            ..fast()
        };

        let started = std::time::Instant::now();
        let media = poll_operation(&adapter, &OperationHandle::new("op"), &policy, &CancellationToken::new())
            .await
            .unwrap();
        assert!(started.elapsed() < policy.max_wait);

        let media = adapter.retrieve(media).await.unwrap();
        assert_matches!(media, GeneratedMedia::Inline { content_type, .. } if content_type == "video/mp4");
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn cancellation_stops_polling() {
        let adapter = Scripted::new(vec![]);
        let cancel = CancellationToken::new();
        let policy = PollPolicy {
            max_wait: Duration::from_secs(30),
            ..fast()
        };
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = poll_operation(&adapter, &OperationHandle::new("op"), &policy, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Cancelled);
    }

    #[test]
    fn default_policy_matches_documented_values() {
        let policy = PollPolicy::default();
        assert_eq!(policy.interval, Duration::from_secs(10));
        assert_eq!(policy.max_wait, Duration::from_secs(600));
        assert_eq!(policy.max_transient_retries, 3);
    }
}
