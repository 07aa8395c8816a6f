//! Concrete backends for the record store and media storage traits
//! defined in `genbatch_core::store`.
//!
//! - [`AirtableStore`](airtable::AirtableStore): REST record store with
//!   formula filtering and offset pagination.
//! - [`LocalMediaStore`](local::LocalMediaStore): writes into a directory
//!   served under a public base URL.
//! - [`S3MediaStore`](s3::S3MediaStore): uploads to an S3-compatible bucket.

pub mod airtable;
pub mod fetch;
pub mod local;
pub mod s3;

pub use airtable::{AirtableConfig, AirtableStore};
pub use fetch::HttpFetcher;
pub use local::LocalMediaStore;
pub use s3::{S3Config, S3MediaStore};
