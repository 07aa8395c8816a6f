//! WaveSpeed AI adapter for hosted video models (Kling, Sora).
//!
//! The model path goes in the URL; submit returns a task id plus a
//! dedicated status URL, and completed tasks list public output URLs.

use async_trait::async_trait;
use genbatch_core::generation::{snap_duration, DEFAULT_DURATION_SECS};
use serde::Deserialize;

use crate::adapter::{AsyncAdapter, GeneratedMedia, GenerationRequest, OperationHandle, PollStatus};
use crate::error::ProviderError;
use crate::http;

pub const PROVIDER_NAME: &str = "wavespeed";

pub const DEFAULT_BASE_URL: &str = "https://api.wavespeed.ai/api/v3";

/// Clip lengths the hosted video models accept, in seconds.
pub const WAVESPEED_DURATIONS: [u32; 2] = [5, 10];

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Responses may wrap the task in `data` or return it flat.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TaskEnvelope {
    Wrapped { data: Task },
    Flat(Task),
}

impl TaskEnvelope {
    fn into_task(self) -> Task {
        match self {
            Self::Wrapped { data } => data,
            Self::Flat(task) => task,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Task {
    id: Option<String>,
    status: Option<String>,
    #[serde(default)]
    urls: TaskUrls,
    #[serde(default)]
    outputs: Vec<String>,
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TaskUrls {
    get: Option<String>,
}

// ---------------------------------------------------------------------------
// Response interpretation
// ---------------------------------------------------------------------------

/// Extract the task id and status URL from a submit response.
pub fn parse_submit(envelope: TaskEnvelope) -> Result<OperationHandle, ProviderError> {
    let task = envelope.into_task();
    match (task.id.filter(|s| !s.is_empty()), task.urls.get.filter(|s| !s.is_empty())) {
        (Some(id), Some(poll_url)) => Ok(OperationHandle::new(id).with_poll_url(poll_url)),
        _ => Err(ProviderError::InvalidResponse(
            "missing task id or status URL in submit response".into(),
        )),
    }
}

/// Map a status response onto a [`PollStatus`].
pub fn interpret_status(envelope: TaskEnvelope) -> PollStatus {
    let task = envelope.into_task();
    match task.status.as_deref().unwrap_or("unknown") {
        "completed" => match task.outputs.into_iter().next() {
            Some(url) => PollStatus::Completed(GeneratedMedia::Remote { url }),
            None => PollStatus::Failed("task completed without outputs".into()),
        },
        "failed" => PollStatus::Failed(task.error.filter(|e| !e.is_empty()).unwrap_or_else(|| "unknown error".into())),
        other => PollStatus::Pending(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

pub struct WaveSpeedAdapter {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl WaveSpeedAdapter {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Ok(Self {
            http: http::build_client()?,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl AsyncAdapter for WaveSpeedAdapter {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<OperationHandle, ProviderError> {
        let params = &request.params;
        let start_frame = params.reference_urls.first().ok_or_else(|| {
            ProviderError::Unsupported(format!(
                "{} is image-to-video and needs a start frame",
                request.remote_model_id
            ))
        })?;

        let duration = snap_duration(
            params.duration_secs.unwrap_or(DEFAULT_DURATION_SECS),
            &WAVESPEED_DURATIONS,
        );
        let body = serde_json::json!({
            "prompt": params.prompt,
            "image": start_frame,
            "duration": duration,
            "aspect_ratio": params.aspect_ratio.as_str(),
            "resolution": params.resolution.as_str(),
        });

        let response = self
            .http
            .post(format!("{}/{}", self.base_url, request.remote_model_id))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let envelope: TaskEnvelope = http::parse_json(PROVIDER_NAME, response).await?;
        parse_submit(envelope)
    }

    async fn check(&self, handle: &OperationHandle) -> Result<PollStatus, ProviderError> {
        let url = match handle.poll_url() {
            Some(url) => url.to_string(),
            None => format!("{}/predictions/{}/result", self.base_url, handle.id()),
        };
        let response = self.http.get(url).bearer_auth(&self.api_key).send().await?;
        let envelope: TaskEnvelope = http::parse_json(PROVIDER_NAME, response).await?;
        Ok(interpret_status(envelope))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
