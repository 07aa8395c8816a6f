//! Cost estimation and reconciliation for a batch.
//!
//! Jobs are grouped by (model, provider). The estimate is
//! `unit_cost x job_count` per group, fixed during planning; the actual
//! cost only grows when a job's outcome is known to be a success, and a
//! job is never counted twice.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::job::{Job, Outcome};
use crate::types::JobId;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Grouping key for cost and outcome tallies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CostGroupKey {
    pub model: String,
    pub provider: String,
}

impl CostGroupKey {
    pub fn of(job: &Job) -> Self {
        Self {
            model: job.model.clone(),
            provider: job.provider.clone(),
        }
    }
}

/// Running tallies for one (model, provider) group.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupTally {
    pub unit_cost: f64,
    pub planned: u32,
    pub submitted: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub estimated_cost: f64,
    pub actual_cost: f64,
}

/// Per-group cost ledger for one batch run.
#[derive(Debug, Clone, Default)]
pub struct CostLedger {
    groups: BTreeMap<CostGroupKey, GroupTally>,
    settled: HashSet<JobId>,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

impl CostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a ledger with every job planned.
    pub fn plan<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> Self {
        let mut ledger = Self::new();
        for job in jobs {
            ledger.record_planned(job);
        }
        ledger
    }

    /// Add one job to its group's estimate.
    pub fn record_planned(&mut self, job: &Job) {
        let tally = self.groups.entry(CostGroupKey::of(job)).or_default();
        tally.unit_cost = job.unit_cost;
        tally.planned += 1;
        tally.estimated_cost += job.unit_cost;
    }

    /// Note that a job's submission was accepted by its provider.
    pub fn record_submitted(&mut self, job: &Job) {
        self.groups.entry(CostGroupKey::of(job)).or_default().submitted += 1;
    }

    /// Settle a job's outcome.
    ///
    /// Returns `false` (and changes nothing) if this job was already
    /// settled, which keeps a success from being charged twice.
    pub fn settle(&mut self, job: &Job, outcome: &Outcome) -> bool {
        if !self.settled.insert(job.id) {
            return false;
        }
        let tally = self.groups.entry(CostGroupKey::of(job)).or_default();
        if outcome.is_success() {
            tally.succeeded += 1;
            tally.actual_cost += job.unit_cost;
        } else {
            tally.failed += 1;
        }
        true
    }

    pub fn groups(&self) -> impl Iterator<Item = (&CostGroupKey, &GroupTally)> {
        self.groups.iter()
    }

    pub fn estimated_total(&self) -> f64 {
        self.groups.values().map(|t| t.estimated_cost).sum()
    }

    pub fn actual_total(&self) -> f64 {
        self.groups.values().map(|t| t.actual_cost).sum()
    }

    pub fn settled_count(&self) -> usize {
        self.settled.len()
    }
}

/// Round a USD amount to whole cents for display.
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
