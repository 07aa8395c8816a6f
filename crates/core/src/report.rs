//! Batch reports for operators and logs.
//!
//! A [`BatchReport`] accounts for every planned job exactly once, either
//! as a success with URLs or as a classified failure, and groups counts
//! and costs by (model, provider).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::accounting::{round_cents, CostLedger};
use crate::generation::MediaKind;
use crate::job::Outcome;
use crate::types::{JobId, RecordId, Timestamp};

// ---------------------------------------------------------------------------
// Record status
// ---------------------------------------------------------------------------

/// Record-level result written back to the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Every submitted variation succeeded.
    Generated,
    /// Some variations succeeded, some failed.
    PartiallyGenerated,
    /// No variation succeeded.
    Failed,
}

impl RecordStatus {
    pub fn from_counts(succeeded: usize, failed: usize) -> Self {
        match (succeeded, failed) {
            (0, _) => Self::Failed,
            (_, 0) => Self::Generated,
            _ => Self::PartiallyGenerated,
        }
    }

    /// Value stored in the record's status field.
    pub fn label(self) -> &'static str {
        match self {
            Self::Generated => "Generated",
            Self::PartiallyGenerated => "Partially Generated",
            Self::Failed => "Failed",
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Generated
    }
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub record_id: RecordId,
    pub variation: u32,
    pub model: String,
    pub provider: String,
    /// Whether the provider accepted the submission.
    pub submitted: bool,
    pub outcome: Outcome,
    /// Non-fatal problems, e.g. masking skipped.
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordSummary {
    pub record_id: RecordId,
    pub name: String,
    pub status: RecordStatus,
    pub succeeded: u32,
    pub failed: u32,
    pub published: bool,
    pub publish_error: Option<String>,
}

/// An input record that produced no jobs.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedRecord {
    pub record_id: RecordId,
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupReport {
    pub model: String,
    pub display_name: String,
    pub provider: String,
    pub unit_cost: f64,
    pub planned: u32,
    pub submitted: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub estimated_cost: f64,
    pub actual_cost: f64,
}

/// Turn ledger tallies into report rows, ordered by (model, provider).
pub fn group_reports(ledger: &CostLedger, display_name: impl Fn(&str) -> String) -> Vec<GroupReport> {
    ledger
        .groups()
        .map(|(key, tally)| GroupReport {
            model: key.model.clone(),
            display_name: display_name(&key.model),
            provider: key.provider.clone(),
            unit_cost: tally.unit_cost,
            planned: tally.planned,
            submitted: tally.submitted,
            succeeded: tally.succeeded,
            failed: tally.failed,
            estimated_cost: tally.estimated_cost,
            actual_cost: tally.actual_cost,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// BatchReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: uuid::Uuid,
    pub kind: MediaKind,
    pub started_at: Timestamp,
    /// `None` for a pre-run (planning only) report.
    pub finished_at: Option<Timestamp>,
    pub cancelled: bool,
    pub groups: Vec<GroupReport>,
    pub jobs: Vec<JobSummary>,
    pub records: Vec<RecordSummary>,
    pub skipped: Vec<SkippedRecord>,
}

impl BatchReport {
    pub fn total_planned(&self) -> u32 {
        self.groups.iter().map(|g| g.planned).sum()
    }

    pub fn submitted(&self) -> usize {
        self.jobs.iter().filter(|j| j.submitted).count()
    }

    pub fn succeeded(&self) -> usize {
        self.jobs.iter().filter(|j| j.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.jobs.iter().filter(|j| !j.outcome.is_success()).count()
    }

    pub fn estimated_cost(&self) -> f64 {
        self.groups.iter().map(|g| g.estimated_cost).sum()
    }

    pub fn actual_cost(&self) -> f64 {
        self.groups.iter().map(|g| g.actual_cost).sum()
    }

    pub fn failed_jobs(&self) -> impl Iterator<Item = &JobSummary> {
        self.jobs.iter().filter(|j| !j.outcome.is_success())
    }

    pub fn is_pre_run(&self) -> bool {
        self.finished_at.is_none()
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let title = if self.is_pre_run() {
            "Batch plan"
        } else if self.cancelled {
            "Batch cancelled"
        } else {
            "Batch complete"
        };
        writeln!(f, "{title}: {} ({})", self.batch_id, self.kind)?;
        writeln!(
            f,
            "  {:<18} {:<10} {:>5} {:>5} {:>5} {:>5} {:>9} {:>9}",
            "model", "provider", "jobs", "sub", "ok", "fail", "estimate", "actual"
        )?;
        for g in &self.groups {
            writeln!(
                f,
                "  {:<18} {:<10} {:>5} {:>5} {:>5} {:>5} {:>9} {:>9}",
                g.display_name,
                g.provider,
                g.planned,
                g.submitted,
                g.succeeded,
                g.failed,
                format!("${:.2}", round_cents(g.estimated_cost)),
                format!("${:.2}", round_cents(g.actual_cost)),
            )?;
        }
        writeln!(
            f,
            "  {:<18} {:<10} {:>5} {:>5} {:>5} {:>5} {:>9} {:>9}",
            "total",
            "",
            self.total_planned(),
            self.submitted(),
            self.succeeded(),
            self.failed(),
            format!("${:.2}", round_cents(self.estimated_cost())),
            format!("${:.2}", round_cents(self.actual_cost())),
        )?;

        if !self.skipped.is_empty() {
            writeln!(f, "  skipped records:")?;
            for s in &self.skipped {
                writeln!(f, "    {} ({}): {}", s.name, s.record_id, s.reason)?;
            }
        }

        let mut failed = self.failed_jobs().peekable();
        if failed.peek().is_some() {
            writeln!(f, "  failed jobs:")?;
            for j in failed {
                let reason = j
                    .outcome
                    .failure()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                writeln!(
                    f,
                    "    {}/v{} [{} via {}] {reason}",
                    j.record_id, j.variation, j.model, j.provider
                )?;
            }
        }

        for r in self.records.iter().filter(|r| !r.published) {
            writeln!(
                f,
                "  not persisted: {} ({}): {}",
                r.name,
                r.record_id,
                r.publish_error.as_deref().unwrap_or("unknown error")
            )?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
