//! The provider adapter abstraction.
//!
//! Synchronicity is part of the type: an adapter is registered as either
//! [`Adapter::Sync`] or [`Adapter::Async`], so the orchestrator never
//! checks a flag at runtime to decide whether a job needs polling.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use genbatch_core::generation::{GenerationParams, MediaKind};
use genbatch_core::job::Job;
use genbatch_core::types::JobId;
use serde::Serialize;

use crate::error::ProviderError;

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

/// What an adapter receives for one job.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub job_id: JobId,
    pub kind: MediaKind,
    pub remote_model_id: String,
    pub params: GenerationParams,
}

impl From<&Job> for GenerationRequest {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            kind: job.kind,
            remote_model_id: job.remote_model_id.clone(),
            params: job.params.clone(),
        }
    }
}

/// Raw output of a finished generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedMedia {
    /// Bytes returned in the response body (or downloaded with provider
    /// credentials).
    Inline { bytes: Vec<u8>, content_type: String },
    /// A URL hosted by the provider. URLs that need provider credentials
    /// are turned into bytes by [`AsyncAdapter::retrieve`].
    Remote { url: String },
}

impl GeneratedMedia {
    /// File extension for storage names, derived from the content type or
    /// the URL path.
    pub fn extension(&self) -> &str {
        match self {
            Self::Inline { content_type, .. } => extension_for_content_type(content_type),
            Self::Remote { url } => {
                let path = url.split(['?', '#']).next().unwrap_or(url);
                let file = path.rsplit('/').next().unwrap_or(path);
                match file.rsplit_once('.') {
                    Some((_, ext)) if !ext.is_empty() && ext.len() <= 5 => ext,
                    _ => "bin",
                }
            }
        }
    }
}

/// Map a MIME type onto the extension used for stored objects.
pub fn extension_for_content_type(content_type: &str) -> &'static str {
    let mime = content_type.split(';').next().unwrap_or("").trim();
    match mime {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "video/mp4" => "mp4",
        "video/quicktime" => "mov",
        "video/webm" => "webm",
        _ => "bin",
    }
}

/// Opaque token for an in-flight remote operation.
///
/// Carries the provider's operation id and, for providers that hand out a
/// dedicated status URL, that URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OperationHandle {
    id: String,
    poll_url: Option<String>,
}

impl OperationHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            poll_url: None,
        }
    }

    pub fn with_poll_url(mut self, url: impl Into<String>) -> Self {
        self.poll_url = Some(url.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn poll_url(&self) -> Option<&str> {
        self.poll_url.as_deref()
    }
}

impl fmt::Display for OperationHandle {
    /// Last path segment of the id, truncated to 12 characters.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tail = self.id.rsplit('/').next().unwrap_or(&self.id);
        let short: String = tail.chars().take(12).collect();
        f.write_str(&short)
    }
}

/// Result of one status check on an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    /// Still running; carries the provider's status text for logging.
    Pending(String),
    Completed(GeneratedMedia),
    /// The provider reports a definitive failure.
    Failed(String),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A backend whose result comes back from a single call.
#[async_trait]
pub trait SyncAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia, ProviderError>;
}

/// A backend that accepts work and must be polled for the result.
#[async_trait]
pub trait AsyncAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn submit(&self, request: &GenerationRequest) -> Result<OperationHandle, ProviderError>;

    /// Perform a single status check. Waiting and retrying belong to
    /// [`poll_operation`](crate::poll::poll_operation).
    async fn check(&self, handle: &OperationHandle) -> Result<PollStatus, ProviderError>;

    /// Make a completed result fetchable without provider credentials.
    /// Called after polling ends, so it is not bound by the poll deadline.
    async fn retrieve(&self, media: GeneratedMedia) -> Result<GeneratedMedia, ProviderError> {
        Ok(media)
    }
}

/// An adapter, tagged by how its results arrive.
#[derive(Clone)]
pub enum Adapter {
    Sync(Arc<dyn SyncAdapter>),
    Async(Arc<dyn AsyncAdapter>),
}

impl Adapter {
    pub fn name(&self) -> &str {
        match self {
            Self::Sync(a) => a.name(),
            Self::Async(a) => a.name(),
        }
    }

    pub fn is_async(&self) -> bool {
        matches!(self, Self::Async(_))
    }
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(a) => write!(f, "Adapter::Sync({})", a.name()),
            Self::Async(a) => write!(f, "Adapter::Async({})", a.name()),
        }
    }
}

// ---------------------------------------------------------------------------
// AdapterSet
// ---------------------------------------------------------------------------

/// Adapters registered per (provider, media kind).
///
/// One provider may serve images synchronously and video asynchronously,
/// so the kind is part of the key.
#[derive(Debug, Clone, Default)]
pub struct AdapterSet {
    adapters: HashMap<(String, MediaKind), Adapter>,
}

impl AdapterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: impl Into<String>, kind: MediaKind, adapter: Adapter) {
        self.adapters.insert((provider.into(), kind), adapter);
    }

    pub fn with(mut self, provider: impl Into<String>, kind: MediaKind, adapter: Adapter) -> Self {
        self.register(provider, kind, adapter);
        self
    }

    pub fn get(&self, provider: &str, kind: MediaKind) -> Option<&Adapter> {
        self.adapters.get(&(provider.to_string(), kind))
    }

    /// Registered provider names for a kind, sorted.
    pub fn providers_for(&self, kind: MediaKind) -> Vec<String> {
        let mut names: Vec<String> = self
            .adapters
            .keys()
            .filter(|(_, k)| *k == kind)
            .map(|(p, _)| p.clone())
            .collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
