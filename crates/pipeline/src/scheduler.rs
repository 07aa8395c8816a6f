//! Bounded-concurrency poll scheduler.
//!
//! One [`PollScheduler`] serves a whole batch run. It keeps a semaphore
//! per provider, so each provider gets at most `pool_size` concurrent
//! pollers no matter how many handles are outstanding, and different
//! providers poll independently of one another.
//!
//! Every input handle gets its own task. A handle's deadline starts when
//! its task acquires a pool slot, not when it was queued.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::stream::{FuturesUnordered, StreamExt};
use genbatch_core::job::{FailureKind, JobFailure};
use genbatch_providers::{poll_operation, AsyncAdapter, OperationHandle, PollPolicy, PollResult};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

pub struct PollScheduler {
    policy: PollPolicy,
    pool_size: usize,
    pools: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl PollScheduler {
    pub fn new(policy: PollPolicy, pool_size: usize) -> Self {
        Self {
            policy,
            pool_size: pool_size.max(1),
            pools: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// The shared pool for one provider, created on first use.
    fn pool_for(&self, provider: &str) -> Arc<Semaphore> {
        let mut pools = self.pools.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        pools
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.pool_size)))
            .clone()
    }

    /// Poll every handle on `adapter` to a terminal result.
    ///
    /// The returned map has exactly one entry per distinct input handle.
    /// Failures, timeouts, cancellation and even a panicking poller are
    /// captured as `Err(JobFailure)` values for that handle only.
    pub async fn poll_all(
        &self,
        adapter: Arc<dyn AsyncAdapter>,
        handles: Vec<OperationHandle>,
        cancel: &CancellationToken,
    ) -> HashMap<OperationHandle, PollResult> {
        let total = handles.len();
        let provider = adapter.name().to_string();
        let pool = self.pool_for(&provider);

        tracing::info!(provider = %provider, handles = total, pool_size = self.pool_size, "Polling started");

        let mut pending = FuturesUnordered::new();
        for handle in handles {
            let adapter = Arc::clone(&adapter);
            let pool = Arc::clone(&pool);
            let policy = self.policy;
            let cancel = cancel.clone();
            let task_handle = handle.clone();

            let task = tokio::spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(JobFailure::cancelled()),
                    permit = pool.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => {
                            return Err(JobFailure::new(
                                FailureKind::Transport,
                                "poller pool closed before polling started",
                            ))
                        }
                    },
                };
                poll_operation(adapter.as_ref(), &task_handle, &policy, &cancel).await
            });

            pending.push(async move { (handle, task.await) });
        }

        let mut results = HashMap::with_capacity(total);
        while let Some((handle, joined)) = pending.next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(provider = %provider, handle = %handle, error = %e, "Poller task failed");
                    Err(JobFailure::new(FailureKind::Transport, format!("poller task failed: {e}")))
                }
            };

            match &result {
                Ok(_) => tracing::info!(
                    provider = %provider,
                    handle = %handle,
                    "Done ({}/{total})",
                    results.len() + 1,
                ),
                Err(failure) => tracing::warn!(
                    provider = %provider,
                    handle = %handle,
                    error = %failure,
                    "Failed ({}/{total})",
                    results.len() + 1,
                ),
            }
            results.insert(handle, result);
        }
        results
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
