//! Batch execution for generative media jobs.
//!
//! The [`Orchestrator`](orchestrator::Orchestrator) plans a batch from
//! record-store records, submits jobs through provider adapters, polls
//! asynchronous operations with the bounded
//! [`PollScheduler`](scheduler::PollScheduler), stores and masks the
//! results, and writes one merged update per record through a
//! [`ResultPublisher`](publisher::ResultPublisher).

pub mod config;
pub mod events;
pub mod orchestrator;
pub mod postprocess;
pub mod publisher;
pub mod records;
pub mod scheduler;

pub use config::{ConfigError, EngineConfig, MaskingConfig, RecordFields};
pub use events::{BatchEvent, BatchEvents};
pub use orchestrator::{BatchPlan, BatchRequest, Orchestrator, OrchestratorError};
pub use postprocess::{PostProcessError, PostProcessor};
pub use publisher::{build_update, PublishError, ResultPublisher, StorePublisher};
pub use records::{ingest, BatchRecord};
pub use scheduler::PollScheduler;
