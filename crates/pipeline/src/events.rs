//! Batch progress events backed by a `tokio::sync::broadcast` channel.
//!
//! The orchestrator publishes a [`BatchEvent`] at each phase boundary and
//! for every job and record it resolves. Publishing never blocks; a
//! subscriber that falls behind observes `RecvError::Lagged` and loses the
//! oldest events.

use serde::Serialize;
use tokio::sync::broadcast;

use genbatch_core::report::RecordStatus;
use genbatch_core::types::{JobId, RecordId};

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchEvent {
    Planned {
        jobs: usize,
        records: usize,
        skipped: usize,
        estimated_cost: f64,
    },
    JobSubmitted {
        job_id: JobId,
        label: String,
        provider: String,
        accepted: bool,
    },
    /// A job reached its terminal outcome. `resolved` counts jobs resolved
    /// so far, out of `total`.
    JobResolved {
        job_id: JobId,
        label: String,
        success: bool,
        resolved: usize,
        total: usize,
    },
    RecordPersisted {
        record_id: RecordId,
        status: RecordStatus,
        published: bool,
    },
    Finished {
        succeeded: usize,
        failed: usize,
        actual_cost: f64,
        cancelled: bool,
    },
}

/// Fan-out channel for [`BatchEvent`]s.
#[derive(Debug, Clone)]
pub struct BatchEvents {
    sender: broadcast::Sender<BatchEvent>,
}

impl BatchEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. Dropped silently when nobody
    /// is listening.
    pub fn publish(&self, event: BatchEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.sender.subscribe()
    }
}

impl Default for BatchEvents {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
