//! Batch orchestration.
//!
//! A run moves through `Planning -> Submitting -> Polling -> Persisting ->
//! Done`:
//!
//! 1. **Planning** expands records x variations into jobs, resolves each
//!    record's model and provider, and fixes the cost estimate. Jobs that
//!    cannot be routed fail here with a configuration error and are never
//!    submitted.
//! 2. **Submitting** calls each job's adapter in plan order, spacing calls
//!    to the same provider. Synchronous adapters return their media here.
//! 3. **Polling** hands the accepted asynchronous operations to the
//!    [`PollScheduler`], one scheduler call per provider, all concurrently.
//!    Every successful result is stored (and masked, when enabled) before
//!    anything references it.
//! 4. **Persisting** writes one merged update per record.
//!
//! Job state lives in the run's [`BatchPlan`] and is only mutated by the
//! run itself between awaits. Concurrent work hands results back as
//! values, so the report has a single writer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use genbatch_core::accounting::CostLedger;
use genbatch_core::catalog::ProviderRegistry;
use genbatch_core::error::CoreError;
use genbatch_core::generation::{
    clamp_variations, validate_prompt, AspectRatio, GenerationParams, MediaKind, Resolution,
    DEFAULT_DURATION_SECS,
};
use genbatch_core::job::{FailureKind, Job, JobFailure, JobRoute, JobStatus, Outcome};
use genbatch_core::report::{
    group_reports, BatchReport, JobSummary, RecordStatus, RecordSummary, SkippedRecord,
};
use genbatch_core::store::MediaStore;
use genbatch_core::types::Timestamp;
use genbatch_providers::{
    Adapter, AdapterSet, AsyncAdapter, GeneratedMedia, GenerationRequest, OperationHandle,
    PollResult,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, EngineConfig};
use crate::events::{BatchEvent, BatchEvents};
use crate::postprocess::PostProcessor;
use crate::publisher::{build_update, ResultPublisher};
use crate::records::BatchRecord;
use crate::scheduler::PollScheduler;

/// Provider shown for jobs whose model could not be resolved.
const UNRESOLVED_PROVIDER: &str = "unresolved";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that stop a batch from starting. Job-level problems never
/// surface here; they become outcomes in the report.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid batch request: {0}")]
    InvalidRequest(String),
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Batch-level parameters. A record's own model overrides `model`, which
/// overrides the configured default for `kind`.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub kind: MediaKind,
    pub model: Option<String>,
    /// Force one provider for every job instead of each model's default.
    pub provider: Option<String>,
    /// Variations per record, clamped to the supported range.
    pub variations: u32,
    pub aspect_ratio: AspectRatio,
    /// Video only. Adapters snap it to the nearest supported length.
    pub duration_secs: Option<u32>,
    pub resolution: Option<Resolution>,
}

impl BatchRequest {
    pub fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            model: None,
            provider: None,
            variations: 1,
            aspect_ratio: AspectRatio::default(),
            duration_secs: None,
            resolution: None,
        }
    }

    fn params_for(&self, record: &BatchRecord) -> GenerationParams {
        GenerationParams {
            prompt: record.prompt.clone(),
            aspect_ratio: self.aspect_ratio,
            duration_secs: match self.kind {
                MediaKind::Video => Some(self.duration_secs.unwrap_or(DEFAULT_DURATION_SECS)),
                MediaKind::Image => None,
            },
            resolution: self.resolution.unwrap_or_else(|| self.kind.default_resolution()),
            reference_urls: record.reference_urls.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct JobSlot {
    job: Job,
    /// Resolved during planning; `None` for jobs that failed planning.
    adapter: Option<Adapter>,
    /// Index into `BatchPlan::records`.
    record: usize,
    submitted: bool,
    outcome: Option<Outcome>,
    warnings: Vec<String>,
}

impl JobSlot {
    fn summary(&self) -> Option<JobSummary> {
        let outcome = self.outcome.clone()?;
        Some(JobSummary {
            job_id: self.job.id,
            record_id: self.job.record_id.clone(),
            variation: self.job.variation,
            model: self.job.model.clone(),
            provider: self.job.provider.clone(),
            submitted: self.submitted,
            outcome,
            warnings: self.warnings.clone(),
        })
    }
}

/// Every job of one batch, with planning failures already decided and the
/// cost estimate fixed.
#[derive(Debug)]
pub struct BatchPlan {
    batch_id: uuid::Uuid,
    kind: MediaKind,
    started_at: Timestamp,
    records: Vec<BatchRecord>,
    skipped: Vec<SkippedRecord>,
    slots: Vec<JobSlot>,
    ledger: CostLedger,
}

impl BatchPlan {
    pub fn batch_id(&self) -> uuid::Uuid {
        self.batch_id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn job_count(&self) -> usize {
        self.slots.len()
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.slots.iter().map(|s| &s.job)
    }

    pub fn records(&self) -> &[BatchRecord] {
        &self.records
    }

    pub fn skipped(&self) -> &[SkippedRecord] {
        &self.skipped
    }

    pub fn estimated_cost(&self) -> f64 {
        self.ledger.estimated_total()
    }

    /// Jobs that failed planning, with their outcome.
    pub fn rejected(&self) -> impl Iterator<Item = (&Job, &Outcome)> {
        self.slots
            .iter()
            .filter_map(|s| s.outcome.as_ref().map(|o| (&s.job, o)))
    }
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// Output of a job that the provider finished, waiting to be stored.
struct Generated {
    index: usize,
    kind: MediaKind,
    variation: u32,
    media: GeneratedMedia,
    /// Adapter that must `retrieve` the media first (asynchronous jobs).
    source: Option<Arc<dyn AsyncAdapter>>,
}

/// A stored result (or the storage failure) for one job.
struct Materialized {
    index: usize,
    outcome: Outcome,
    warnings: Vec<String>,
}

/// Accepted operations for one provider.
struct PollGroup {
    adapter: Arc<dyn AsyncAdapter>,
    entries: Vec<(OperationHandle, usize)>,
}

#[derive(Default)]
struct Submission {
    generated: Vec<Generated>,
    polling: HashMap<String, PollGroup>,
}

struct Progress {
    resolved: usize,
    total: usize,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    config: EngineConfig,
    registry: Arc<dyn ProviderRegistry>,
    adapters: AdapterSet,
    media: Arc<dyn MediaStore>,
    publisher: Arc<dyn ResultPublisher>,
    post: PostProcessor,
    scheduler: PollScheduler,
    events: BatchEvents,
}

impl Orchestrator {
    /// Build an orchestrator. The configuration is validated here, once.
    pub fn new(
        config: EngineConfig,
        registry: Arc<dyn ProviderRegistry>,
        adapters: AdapterSet,
        media: Arc<dyn MediaStore>,
        publisher: Arc<dyn ResultPublisher>,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        Ok(Self {
            post: PostProcessor::new(config.masking.clone()),
            scheduler: PollScheduler::new(config.poll_policy(), config.pool_size),
            config,
            registry,
            adapters,
            media,
            publisher,
            events: BatchEvents::default(),
        })
    }

    pub fn with_events(mut self, events: BatchEvents) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &BatchEvents {
        &self.events
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Plan and execute a batch.
    pub async fn run(
        &self,
        records: Vec<BatchRecord>,
        skipped: Vec<SkippedRecord>,
        request: &BatchRequest,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, OrchestratorError> {
        let plan = self.plan(records, skipped, request)?;
        Ok(self.execute(plan, cancel).await)
    }

    // -----------------------------------------------------------------------
    // Planning
    // -----------------------------------------------------------------------

    /// Expand records into jobs and estimate cost. Makes no network calls.
    pub fn plan(
        &self,
        records: Vec<BatchRecord>,
        mut skipped: Vec<SkippedRecord>,
        request: &BatchRequest,
    ) -> Result<BatchPlan, OrchestratorError> {
        let kind = request.kind;
        if let Some(resolution) = request.resolution {
            resolution
                .validate_for(kind)
                .map_err(|e| OrchestratorError::InvalidRequest(e.to_string()))?;
        }

        let variations = clamp_variations(request.variations);
        if variations != request.variations {
            tracing::warn!(requested = request.variations, using = variations, "Variation count clamped");
        }

        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(records.len());
        for record in records {
            if seen.insert(record.id.clone()) {
                kept.push(record);
            } else {
                skipped.push(SkippedRecord {
                    record_id: record.id,
                    name: record.name,
                    reason: "duplicate record in batch".into(),
                });
            }
        }

        let mut slots = Vec::with_capacity(kept.len() * variations as usize);
        for (index, record) in kept.iter().enumerate() {
            let model = record
                .model_override
                .as_deref()
                .or(request.model.as_deref())
                .unwrap_or_else(|| self.config.default_model(kind));
            let params = request.params_for(record);
            let routed = self.route(model, request.provider.as_deref(), kind).and_then(|(route, adapter)| {
                match validate_prompt(&record.prompt) {
                    Ok(()) => Ok((route, adapter)),
                    Err(e) => Err((route, JobFailure::new(FailureKind::Configuration, e.to_string()))),
                }
            });

            for variation in 1..=variations {
                let slot = match &routed {
                    Ok((route, adapter)) => JobSlot {
                        job: Job::new(record.id.clone(), variation, route.clone(), params.clone()),
                        adapter: Some(adapter.clone()),
                        record: index,
                        submitted: false,
                        outcome: None,
                        warnings: Vec::new(),
                    },
                    Err((route, failure)) => {
                        let mut job = Job::new(record.id.clone(), variation, route.clone(), params.clone());
                        transition(&mut job, JobStatus::Failed);
                        JobSlot {
                            job,
                            adapter: None,
                            record: index,
                            submitted: false,
                            outcome: Some(Outcome::Error(failure.clone())),
                            warnings: Vec::new(),
                        }
                    }
                };
                slots.push(slot);
            }
        }

        let ledger = CostLedger::plan(slots.iter().map(|s| &s.job));
        let plan = BatchPlan {
            batch_id: uuid::Uuid::now_v7(),
            kind,
            started_at: chrono::Utc::now(),
            records: kept,
            skipped,
            slots,
            ledger,
        };

        tracing::info!(
            batch_id = %plan.batch_id,
            kind = %kind,
            jobs = plan.slots.len(),
            records = plan.records.len(),
            skipped = plan.skipped.len(),
            estimated_cost = plan.ledger.estimated_total(),
            "Batch planned",
        );
        for (job, outcome) in plan.rejected() {
            if let Some(failure) = outcome.failure() {
                tracing::error!(job = %job.label(), model = %job.model, error = %failure, "Job rejected during planning");
            }
        }
        self.events.publish(BatchEvent::Planned {
            jobs: plan.slots.len(),
            records: plan.records.len(),
            skipped: plan.skipped.len(),
            estimated_cost: plan.ledger.estimated_total(),
        });
        Ok(plan)
    }

    /// Resolve a model to a route and its registered adapter. On failure,
    /// returns the best-known route for reporting alongside the failure.
    fn route(
        &self,
        model: &str,
        provider: Option<&str>,
        kind: MediaKind,
    ) -> Result<(JobRoute, Adapter), (JobRoute, JobFailure)> {
        let unresolved = |e: CoreError| {
            let route = JobRoute {
                kind,
                model: model.to_string(),
                provider: provider.unwrap_or(UNRESOLVED_PROVIDER).to_string(),
                remote_model_id: String::new(),
                unit_cost: 0.0,
            };
            (route, JobFailure::new(FailureKind::Configuration, e.to_string()))
        };

        let route = self.registry.resolve(model, provider).map_err(unresolved)?;
        if route.kind != kind {
            return Err(unresolved(CoreError::KindMismatch {
                model: route.model,
                expected: kind,
                actual: route.kind,
            }));
        }
        match self.adapters.get(&route.provider, kind).cloned() {
            Some(adapter) => Ok((route, adapter)),
            None => {
                let failure = JobFailure::new(
                    FailureKind::Configuration,
                    format!(
                        "no {kind} adapter configured for provider '{}' (missing credentials?)",
                        route.provider
                    ),
                );
                Err((route, failure))
            }
        }
    }

    /// Report for a plan that has not run: estimates and planning
    /// failures only.
    pub fn pre_run_report(&self, plan: &BatchPlan) -> BatchReport {
        BatchReport {
            batch_id: plan.batch_id,
            kind: plan.kind,
            started_at: plan.started_at,
            finished_at: None,
            cancelled: false,
            groups: group_reports(&plan.ledger, |m| self.registry.display_name(m)),
            jobs: plan.slots.iter().filter_map(JobSlot::summary).collect(),
            records: Vec::new(),
            skipped: plan.skipped.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Execute a plan. The report accounts for every planned job exactly
    /// once, whatever happens during the run.
    pub async fn execute(&self, mut plan: BatchPlan, cancel: &CancellationToken) -> BatchReport {
        let mut progress = Progress {
            resolved: 0,
            total: plan.slots.len(),
        };
        let rejected: Vec<usize> = (0..plan.slots.len())
            .filter(|&i| plan.slots[i].outcome.is_some())
            .collect();
        for index in rejected {
            self.settle(&mut plan, index, &mut progress);
        }

        tracing::info!(batch_id = %plan.batch_id, jobs = progress.total, "Submitting");
        let submission = self.submit_all(&mut plan, cancel, &mut progress).await;

        for group in submission.polling.values() {
            for (_, index) in &group.entries {
                transition(&mut plan.slots[*index].job, JobStatus::Polling);
            }
        }

        // Synchronous results are stored while asynchronous ones are polled.
        let (polled, stored) = tokio::join!(
            self.poll_groups(submission.polling, cancel),
            self.materialize_all(submission.generated),
        );
        self.apply_materialized(&mut plan, stored, &mut progress);

        let mut finished = Vec::new();
        for (index, result, adapter) in polled {
            match result {
                Ok(media) => finished.push(Generated {
                    index,
                    kind: plan.slots[index].job.kind,
                    variation: plan.slots[index].job.variation,
                    media,
                    source: Some(adapter),
                }),
                Err(failure) => self.finish(&mut plan, index, Outcome::Error(failure), Vec::new(), &mut progress),
            }
        }
        let stored = self.materialize_all(finished).await;
        self.apply_materialized(&mut plan, stored, &mut progress);

        let open: Vec<usize> = (0..plan.slots.len())
            .filter(|&i| plan.slots[i].outcome.is_none())
            .collect();
        for index in open {
            let failure = if cancel.is_cancelled() {
                JobFailure::cancelled()
            } else {
                JobFailure::new(FailureKind::Transport, "no result was returned for this job")
            };
            self.finish(&mut plan, index, Outcome::Error(failure), Vec::new(), &mut progress);
        }

        tracing::info!(batch_id = %plan.batch_id, records = plan.records.len(), "Persisting");
        let records = self.persist_all(&plan, cancel.is_cancelled()).await;

        let report = BatchReport {
            batch_id: plan.batch_id,
            kind: plan.kind,
            started_at: plan.started_at,
            finished_at: Some(chrono::Utc::now()),
            cancelled: cancel.is_cancelled(),
            groups: group_reports(&plan.ledger, |m| self.registry.display_name(m)),
            jobs: plan.slots.iter().filter_map(JobSlot::summary).collect(),
            records,
            skipped: plan.skipped,
        };

        tracing::info!(
            batch_id = %report.batch_id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            actual_cost = report.actual_cost(),
            cancelled = report.cancelled,
            "Batch finished",
        );
        self.events.publish(BatchEvent::Finished {
            succeeded: report.succeeded(),
            failed: report.failed(),
            actual_cost: report.actual_cost(),
            cancelled: report.cancelled,
        });
        report
    }

    // -- submitting -----------------------------------------------------------

    /// Submit every open job in plan order. Once `cancel` fires, the
    /// remaining jobs are cancelled without being sent.
    async fn submit_all(
        &self,
        plan: &mut BatchPlan,
        cancel: &CancellationToken,
        progress: &mut Progress,
    ) -> Submission {
        let mut submission = Submission::default();
        let mut last_submit: HashMap<String, Instant> = HashMap::new();

        for index in 0..plan.slots.len() {
            let slot = &plan.slots[index];
            // Jobs rejected during planning carry no adapter.
            let Some(adapter) = slot.adapter.clone().filter(|_| slot.outcome.is_none()) else {
                continue;
            };
            let job = &slot.job;
            let job_id = job.id;
            let variation = job.variation;
            let provider = job.provider.clone();
            let label = job.label();
            let request = GenerationRequest::from(job);

            if let Some(last) = last_submit.get(&provider) {
                let wake = *last + self.config.submit_spacing;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(wake) => {}
                }
            }
            if cancel.is_cancelled() {
                self.finish(plan, index, Outcome::Error(JobFailure::cancelled()), Vec::new(), progress);
                continue;
            }
            last_submit.insert(provider.clone(), Instant::now());

            tracing::info!(job = %label, model = %request.remote_model_id, provider = %provider, "Submitting job");
            let accepted = match adapter {
                Adapter::Sync(adapter) => {
                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Err(JobFailure::cancelled()),
                        r = adapter.generate(&request) => r.map_err(|e| JobFailure::new(e.failure_kind(), e.to_string())),
                    };
                    result.map(|media| {
                        submission.generated.push(Generated {
                            index,
                            kind: request.kind,
                            variation,
                            media,
                            source: None,
                        })
                    })
                }
                Adapter::Async(adapter) => {
                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Err(JobFailure::cancelled()),
                        r = adapter.submit(&request) => r.map_err(|e| JobFailure::new(e.failure_kind(), e.to_string())),
                    };
                    result.map(|handle| {
                        tracing::info!(job = %label, handle = %handle, "Job accepted");
                        submission
                            .polling
                            .entry(provider.clone())
                            .or_insert_with(|| PollGroup {
                                adapter: Arc::clone(&adapter),
                                entries: Vec::new(),
                            })
                            .entries
                            .push((handle, index));
                    })
                }
            };

            let accepted = match accepted {
                Ok(()) => {
                    let slot = &mut plan.slots[index];
                    transition(&mut slot.job, JobStatus::Submitted);
                    slot.submitted = true;
                    plan.ledger.record_submitted(&slot.job);
                    true
                }
                Err(failure) => {
                    tracing::error!(job = %label, provider = %provider, error = %failure, "Submission failed");
                    self.finish(plan, index, Outcome::Error(failure), Vec::new(), progress);
                    false
                }
            };
            self.events.publish(BatchEvent::JobSubmitted {
                job_id,
                label,
                provider,
                accepted,
            });
        }
        submission
    }

    // -- polling --------------------------------------------------------------

    /// Poll every provider's operations concurrently. Returns one result per
    /// submitted job, keyed by slot index, with the adapter that produced it.
    async fn poll_groups(
        &self,
        groups: HashMap<String, PollGroup>,
        cancel: &CancellationToken,
    ) -> Vec<(usize, PollResult, Arc<dyn AsyncAdapter>)> {
        let polls = groups.into_values().map(|group| async move {
            let mut owners: HashMap<OperationHandle, Vec<usize>> = HashMap::new();
            for (handle, index) in group.entries {
                owners.entry(handle).or_default().push(index);
            }
            let adapter = group.adapter;
            let mut results = self
                .scheduler
                .poll_all(Arc::clone(&adapter), owners.keys().cloned().collect(), cancel)
                .await;

            let mut out = Vec::new();
            for (handle, indices) in owners {
                let result = results.remove(&handle).unwrap_or_else(|| {
                    Err(JobFailure::new(FailureKind::Transport, "poller returned no result"))
                });
                out.extend(
                    indices
                        .into_iter()
                        .map(|index| (index, result.clone(), Arc::clone(&adapter))),
                );
            }
            out
        });
        futures::future::join_all(polls).await.into_iter().flatten().collect()
    }

    // -- materializing --------------------------------------------------------

    async fn materialize_all(&self, generated: Vec<Generated>) -> Vec<Materialized> {
        stream::iter(generated)
            .map(|g| self.materialize(g))
            .buffer_unordered(self.config.materialize_concurrency)
            .collect()
            .await
    }

    /// Store one result and, when masking is enabled, its masked
    /// derivative. Masking problems only add a warning.
    async fn materialize(&self, generated: Generated) -> Materialized {
        let Generated {
            index,
            kind,
            variation,
            media,
            source,
        } = generated;
        let storage_failure = |message: String| Materialized {
            index,
            outcome: Outcome::error(FailureKind::Storage, message),
            warnings: Vec::new(),
        };

        let media = match source {
            Some(adapter) => match adapter.retrieve(media).await {
                Ok(media) => media,
                Err(e) => return storage_failure(format!("download failed: {e}")),
            },
            None => media,
        };
        let extension = media.extension().to_string();

        let bytes = match media {
            GeneratedMedia::Inline { bytes, .. } => bytes,
            GeneratedMedia::Remote { url } => match self.media.fetch(&url).await {
                Ok(bytes) => bytes,
                Err(e) => return storage_failure(format!("download failed: {e}")),
            },
        };
        let mask_source = self.post.is_enabled().then(|| bytes.clone());

        let original_url = match self.media.store(bytes, &format!("{kind}-{variation}.{extension}")).await {
            Ok(url) => url,
            Err(e) => return storage_failure(format!("upload failed: {e}")),
        };

        let mut warnings = Vec::new();
        let masked_url = match mask_source {
            None => None,
            Some(source) => match self.post.apply(kind, source, &extension).await {
                Ok(masked) => match self.media.store(masked, &format!("masked-{variation}.{extension}")).await {
                    Ok(url) => Some(url),
                    Err(e) => {
                        warnings.push(format!("masked upload failed: {e}"));
                        None
                    }
                },
                Err(e) => {
                    warnings.push(format!("masking skipped: {e}"));
                    None
                }
            },
        };
        for warning in &warnings {
            tracing::warn!(url = %original_url, "{warning}");
        }

        Materialized {
            index,
            outcome: Outcome::success(original_url, masked_url),
            warnings,
        }
    }

    fn apply_materialized(&self, plan: &mut BatchPlan, stored: Vec<Materialized>, progress: &mut Progress) {
        for m in stored {
            self.finish(plan, m.index, m.outcome, m.warnings, progress);
        }
    }

    // -- resolving ------------------------------------------------------------

    /// Record a job's terminal outcome. Later outcomes for the same job are
    /// ignored.
    fn finish(
        &self,
        plan: &mut BatchPlan,
        index: usize,
        outcome: Outcome,
        warnings: Vec<String>,
        progress: &mut Progress,
    ) {
        let slot = &mut plan.slots[index];
        if slot.outcome.is_some() {
            tracing::warn!(job = %slot.job.label(), "Outcome already recorded, ignoring");
            return;
        }
        transition(&mut slot.job, outcome.terminal_status());
        if let Some(failure) = outcome.failure() {
            tracing::warn!(job = %slot.job.label(), provider = %slot.job.provider, error = %failure, "Job failed");
        }
        slot.outcome = Some(outcome);
        slot.warnings.extend(warnings);
        self.settle(plan, index, progress);
    }

    /// Charge a resolved job to the ledger and announce it.
    fn settle(&self, plan: &mut BatchPlan, index: usize, progress: &mut Progress) {
        let slot = &plan.slots[index];
        let Some(outcome) = &slot.outcome else {
            return;
        };
        if !plan.ledger.settle(&slot.job, outcome) {
            return;
        }
        progress.resolved += 1;
        self.events.publish(BatchEvent::JobResolved {
            job_id: slot.job.id,
            label: slot.job.label(),
            success: outcome.is_success(),
            resolved: progress.resolved,
            total: progress.total,
        });
    }

    // -- persisting -----------------------------------------------------------

    async fn persist_all(&self, plan: &BatchPlan, cancelled: bool) -> Vec<RecordSummary> {
        let mut by_record: Vec<Vec<&JobSlot>> = vec![Vec::new(); plan.records.len()];
        for slot in &plan.slots {
            by_record[slot.record].push(slot);
        }

        stream::iter(plan.records.iter().zip(by_record))
            .map(|(record, slots)| self.persist(plan.kind, record, slots, cancelled))
            .buffered(self.config.persist_concurrency)
            .collect()
            .await
    }

    /// Write one merged update for a record. A record whose jobs were all
    /// cancelled before submission is left untouched.
    async fn persist(
        &self,
        kind: MediaKind,
        record: &BatchRecord,
        slots: Vec<&JobSlot>,
        cancelled: bool,
    ) -> RecordSummary {
        let outcomes: Vec<(u32, &Outcome)> = slots
            .iter()
            .filter_map(|s| s.outcome.as_ref().map(|o| (s.job.variation, o)))
            .collect();
        let succeeded = outcomes.iter().filter(|(_, o)| o.is_success()).count();
        let failed = outcomes.len() - succeeded;
        let status = RecordStatus::from_counts(succeeded, failed);

        let untouched = cancelled
            && slots.iter().all(|s| {
                !s.submitted
                    && s.outcome
                        .as_ref()
                        .and_then(Outcome::failure)
                        .is_some_and(|f| f.kind == FailureKind::Cancelled)
            });

        let (published, publish_error) = if untouched {
            tracing::info!(record_id = %record.id, "Record left untouched, batch cancelled before submission");
            (false, Some("not published: batch cancelled before submission".to_string()))
        } else {
            let model = slots
                .first()
                .map(|s| self.registry.display_name(&s.job.model))
                .unwrap_or_default();
            let update = build_update(self.config.fields(kind), &model, status, &outcomes);
            match self.publisher.publish(&record.id, &update).await {
                Ok(()) => {
                    tracing::info!(record_id = %record.id, status = status.label(), "Record persisted");
                    (true, None)
                }
                Err(e) => {
                    tracing::error!(record_id = %record.id, error = %e, "Failed to persist record");
                    (false, Some(e.to_string()))
                }
            }
        };

        self.events.publish(BatchEvent::RecordPersisted {
            record_id: record.id.clone(),
            status,
            published,
        });
        RecordSummary {
            record_id: record.id.clone(),
            name: record.name.clone(),
            status,
            succeeded: succeeded as u32,
            failed: failed as u32,
            published,
            publish_error,
        }
    }
}

/// Advance a job, logging (not propagating) an illegal transition.
fn transition(job: &mut Job, next: JobStatus) {
    if let Err(e) = job.advance(next) {
        tracing::warn!(job = %job.label(), error = %e, "Ignoring job status transition");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use genbatch_core::catalog::ProviderCatalog;
    use genbatch_core::store::{FieldMap, StorageError};
    use genbatch_providers::{ProviderError, SyncAdapter};

    use super::*;
    use crate::publisher::PublishError;

    const CATALOG: &str = r#"{"models":{
        "pic":{"display_name":"Pic 1","kind":"image","default_provider":"fake",
               "providers":{"fake":{"remote_model_id":"pic-001","unit_cost":0.04}}},
        "clip":{"display_name":"Clip 1","kind":"video","default_provider":"fake",
                "providers":{"fake":{"remote_model_id":"clip-001","unit_cost":0.5}}}}}"#;

    struct Echo;

    #[async_trait]
    impl SyncAdapter for Echo {
        fn name(&self) -> &str {
            "fake"
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia, ProviderError> {
            Ok(GeneratedMedia::Inline {
                bytes: request.params.prompt.as_bytes().to_vec(),
                content_type: "image/png".into(),
            })
        }
    }

    struct NullMedia;

    #[async_trait]
    impl MediaStore for NullMedia {
        async fn store(&self, bytes: Vec<u8>, name: &str) -> Result<String, StorageError> {
            Ok(format!("mem://{}/{name}", bytes.len()))
        }

        async fn fetch(&self, url: &str) -> Result<Vec<u8>, StorageError> {
            Err(StorageError::Download(url.to_string()))
        }
    }

    struct NullPublisher;

    #[async_trait]
    impl ResultPublisher for NullPublisher {
        async fn publish(&self, _: &str, _: &FieldMap) -> Result<(), PublishError> {
            Ok(())
        }
    }

    fn orchestrator() -> Orchestrator {
        let mut config = EngineConfig::default();
        config.masking.enabled = false;
        config.default_image_model = "pic".into();
        config.default_video_model = "clip".into();
        Orchestrator::new(
            config,
            Arc::new(ProviderCatalog::from_json(CATALOG).unwrap()),
            AdapterSet::new().with("fake", MediaKind::Image, Adapter::Sync(Arc::new(Echo))),
            Arc::new(NullMedia),
            Arc::new(NullPublisher),
        )
        .unwrap()
    }

    fn record(id: &str, prompt: &str) -> BatchRecord {
        BatchRecord {
            id: id.into(),
            name: format!("Ad {id}"),
            prompt: prompt.into(),
            model_override: None,
            reference_urls: vec![],
        }
    }

    // -- planning -------------------------------------------------------------

    #[test]
    fn plan_expands_records_by_variations() {
        let mut request = BatchRequest::new(MediaKind::Image);
        request.variations = 2;
        let plan = orchestrator()
            .plan(vec![record("rec1", "a"), record("rec2", "b")], vec![], &request)
            .unwrap();

        assert_eq!(plan.job_count(), 4);
        assert!((plan.estimated_cost() - 0.16).abs() < 1e-9);
        let labels: Vec<String> = plan.jobs().map(Job::label).collect();
        assert_eq!(labels, ["rec1/v1", "rec1/v2", "rec2/v1", "rec2/v2"]);
    }

    #[test]
    fn variations_are_clamped() {
        let mut request = BatchRequest::new(MediaKind::Image);
        request.variations = 9;
        let plan = orchestrator().plan(vec![record("rec1", "a")], vec![], &request).unwrap();
        assert_eq!(plan.job_count(), 2);
    }

    #[test]
    fn duplicate_records_are_skipped() {
        let plan = orchestrator()
            .plan(
                vec![record("rec1", "a"), record("rec1", "again")],
                vec![],
                &BatchRequest::new(MediaKind::Image),
            )
            .unwrap();
        assert_eq!(plan.job_count(), 1);
        assert_eq!(plan.skipped().len(), 1);
        assert_eq!(plan.skipped()[0].reason, "duplicate record in batch");
    }

    #[test]
    fn unknown_override_fails_only_that_record() {
        let mut bad = record("rec2", "b");
        bad.model_override = Some("no-such-model".into());
        let plan = orchestrator()
            .plan(vec![record("rec1", "a"), bad], vec![], &BatchRequest::new(MediaKind::Image))
            .unwrap();

        let rejected: Vec<_> = plan.rejected().collect();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].0.record_id, "rec2");
        assert_eq!(rejected[0].0.provider, UNRESOLVED_PROVIDER);
        assert_eq!(rejected[0].1.failure().unwrap().kind, FailureKind::Configuration);
        assert_eq!(plan.job_count(), 2);
    }

    #[test]
    fn missing_adapter_is_configuration_failure() {
        let plan = orchestrator()
            .plan(vec![record("rec1", "a")], vec![], &BatchRequest::new(MediaKind::Video))
            .unwrap();
        let (job, outcome) = plan.rejected().next().unwrap();
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.provider, "fake");
        assert!(outcome.failure().unwrap().message.contains("missing credentials"));
    }

    #[test]
    fn model_of_wrong_kind_is_rejected() {
        let mut request = BatchRequest::new(MediaKind::Image);
        request.model = Some("clip".into());
        let plan = orchestrator().plan(vec![record("rec1", "a")], vec![], &request).unwrap();
        let (_, outcome) = plan.rejected().next().unwrap();
        assert!(outcome.failure().unwrap().message.contains("batch targets image"));
    }

    #[test]
    fn blank_prompt_is_configuration_failure() {
        let plan = orchestrator()
            .plan(vec![record("rec1", "   ")], vec![], &BatchRequest::new(MediaKind::Image))
            .unwrap();
        assert_eq!(plan.rejected().count(), 1);
    }

    #[test]
    fn only_routable_jobs_carry_an_adapter() {
        let mut bad = record("rec2", "b");
        bad.model_override = Some("no-such-model".into());
        let plan = orchestrator()
            .plan(
                vec![record("rec1", "a"), bad, record("rec3", "  ")],
                vec![],
                &BatchRequest::new(MediaKind::Image),
            )
            .unwrap();

        assert_eq!(plan.slots.len(), 3);
        for slot in &plan.slots {
            assert_eq!(slot.adapter.is_some(), slot.outcome.is_none(), "{}", slot.job.label());
        }
        assert_matches!(plan.slots[0].adapter, Some(Adapter::Sync(_)));
    }

    #[test]
    fn resolution_must_match_kind() {
        let mut request = BatchRequest::new(MediaKind::Image);
        request.resolution = Some(Resolution::Hd1080);
        assert_matches!(
            orchestrator().plan(vec![record("rec1", "a")], vec![], &request),
            Err(OrchestratorError::InvalidRequest(_))
        );
    }

    #[test]
    fn video_params_carry_default_duration() {
        let params = BatchRequest::new(MediaKind::Video).params_for(&record("rec1", "a"));
        assert_eq!(params.duration_secs, Some(DEFAULT_DURATION_SECS));
        assert_eq!(params.resolution, MediaKind::Video.default_resolution());

        let params = BatchRequest::new(MediaKind::Image).params_for(&record("rec1", "a"));
        assert_eq!(params.duration_secs, None);
    }

    #[test]
    fn pre_run_report_has_estimates_only() {
        let orchestrator = orchestrator();
        let plan = orchestrator
            .plan(vec![record("rec1", "a")], vec![], &BatchRequest::new(MediaKind::Image))
            .unwrap();
        let report = orchestrator.pre_run_report(&plan);

        assert!(report.is_pre_run());
        assert_eq!(report.total_planned(), 1);
        assert!(report.jobs.is_empty());
        assert_eq!(report.actual_cost(), 0.0);
    }

    // -- execution ------------------------------------------------------------

    #[tokio::test]
    async fn sync_batch_runs_to_completion() {
        let report = orchestrator()
            .run(
                vec![record("rec1", "a"), record("rec2", "b")],
                vec![],
                &BatchRequest::new(MediaKind::Image),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 0);
        assert!((report.actual_cost() - 0.08).abs() < 1e-9);
        assert!(report.records.iter().all(|r| r.published && r.status == RecordStatus::Generated));
        assert_matches!(
            &report.jobs[0].outcome,
            Outcome::Success { original_url, masked_url: None } if original_url.ends_with("image-1.png")
        );
    }

    #[tokio::test]
    async fn events_report_progress() {
        let orchestrator = orchestrator();
        let mut rx = orchestrator.events().subscribe();
        orchestrator
            .run(
                vec![record("rec1", "a")],
                vec![],
                &BatchRequest::new(MediaKind::Image),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_matches!(events.first(), Some(BatchEvent::Planned { jobs: 1, .. }));
        assert!(events
            .iter()
            .any(|e| matches!(e, BatchEvent::JobResolved { resolved: 1, total: 1, success: true, .. })));
        assert_matches!(events.last(), Some(BatchEvent::Finished { succeeded: 1, failed: 0, .. }));
    }
}
