//! Generation provider adapters.
//!
//! An [`Adapter`](adapter::Adapter) is either synchronous (the result comes
//! back from a single call) or asynchronous (submit returns an
//! [`OperationHandle`](adapter::OperationHandle) that must be polled). The
//! generic polling loop in [`poll`] applies the same deadline and
//! transient-retry rules to every asynchronous backend.

pub mod adapter;
pub mod error;
pub mod google;
pub mod http;
pub mod poll;
pub mod wavespeed;

pub use adapter::{
    Adapter, AdapterSet, AsyncAdapter, GeneratedMedia, GenerationRequest, OperationHandle,
    PollStatus, SyncAdapter,
};
pub use error::ProviderError;
pub use poll::{poll_operation, PollPolicy, PollResult};
