//! Domain types and pure logic for batch media generation.
//!
//! Nothing in this crate touches the network. It defines the job
//! lifecycle, the data-driven provider catalog, cost accounting, the
//! batch report, and the storage traits that the pipeline and the store
//! backends agree on.

pub mod accounting;
pub mod catalog;
pub mod error;
pub mod generation;
pub mod hashing;
pub mod job;
pub mod report;
pub mod store;
pub mod types;
