//! Google AI Studio adapters (Gemini image models and Veo video).
//!
//! Image generation is synchronous: `generateContent` returns the image
//! inline as base64. Video generation is asynchronous: `predictLongRunning`
//! returns an operation name that is polled until `done`, after which the
//! video is downloaded with the API key (the URI is not public).

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use genbatch_core::generation::{snap_duration, AspectRatio, MediaKind};
use serde::Deserialize;

use crate::adapter::{
    AsyncAdapter, GeneratedMedia, GenerationRequest, OperationHandle, PollStatus, SyncAdapter,
};
use crate::error::ProviderError;
use crate::http;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const PROVIDER_NAME: &str = "google";

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Clip lengths Veo accepts, in seconds.
pub const VEO_DURATIONS: [u32; 3] = [4, 6, 8];

const API_KEY_HEADER: &str = "x-goog-api-key";

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Authenticated HTTP client shared by the Google adapters.
#[derive(Clone)]
pub struct GoogleClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GoogleClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Ok(Self {
            http: http::build_client()?,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Point the client at a different API root (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<T, ProviderError> {
        let response = self
            .http
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .await?;
        http::parse_json(PROVIDER_NAME, response).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, ProviderError> {
        let response = self
            .http
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        http::parse_json(PROVIDER_NAME, response).await
    }

    /// Download with the API key attached.
    async fn download_authenticated(&self, url: &str) -> Result<(Vec<u8>, Option<String>), ProviderError> {
        let response = self
            .http
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        http::read_bytes(PROVIDER_NAME, response).await
    }

    /// Fetch a public reference image and encode it for an inline part.
    async fn inline_reference(&self, url: &str) -> Result<InlineImage, ProviderError> {
        let response = self.http.get(url).send().await?;
        let (bytes, content_type) = http::read_bytes(PROVIDER_NAME, response).await?;
        Ok(InlineImage {
            mime_type: content_type
                .map(|ct| ct.split(';').next().unwrap_or("").trim().to_string())
                .filter(|ct| ct.starts_with("image/"))
                .unwrap_or_else(|| "image/png".to_string()),
            data: BASE64.encode(bytes),
        })
    }
}

struct InlineImage {
    mime_type: String,
    data: String,
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: Option<String>,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// A long-running operation as returned by `predictLongRunning` and the
/// operations endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    name: Option<String>,
    #[serde(default)]
    done: bool,
    error: Option<OperationError>,
    response: Option<OperationResponse>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    code: Option<i64>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResponse {
    generate_video_response: Option<GenerateVideoResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateVideoResponse {
    #[serde(default)]
    generated_samples: Vec<GeneratedSample>,
    #[serde(default)]
    rai_media_filtered_reasons: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GeneratedSample {
    video: Option<VideoRef>,
}

#[derive(Debug, Deserialize)]
struct VideoRef {
    uri: Option<String>,
}

/// Interpreted state of a Veo operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationState {
    Running,
    Failed(String),
    /// Finished; the video must be downloaded from `uri` with the API key.
    Ready { uri: String },
}

// ---------------------------------------------------------------------------
// Response interpretation
// ---------------------------------------------------------------------------

/// Pull the first inline image out of a `generateContent` response.
pub fn extract_inline_image(response: GenerateContentResponse) -> Result<GeneratedMedia, ProviderError> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ProviderError::Rejected(format!("prompt blocked: {reason}")));
    }
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::InvalidResponse("no candidates in response".into()))?;

    let finish_reason = candidate.finish_reason;
    let inline = candidate
        .content
        .into_iter()
        .flat_map(|c| c.parts)
        .find_map(|p| p.inline_data);

    match inline {
        Some(data) => {
            let bytes = BASE64
                .decode(data.data.as_bytes())
                .map_err(|e| ProviderError::InvalidResponse(format!("bad base64 image data: {e}")))?;
            Ok(GeneratedMedia::Inline {
                bytes,
                content_type: data.mime_type.unwrap_or_else(|| "image/png".to_string()),
            })
        }
        None => match finish_reason.as_deref() {
            Some(reason @ ("SAFETY" | "PROHIBITED_CONTENT" | "IMAGE_SAFETY")) => Err(
                ProviderError::Rejected(format!("generation stopped: {reason}")),
            ),
            _ => Err(ProviderError::InvalidResponse(
                "no image data in response parts".into(),
            )),
        },
    }
}

/// Decide what a polled operation means.
pub fn interpret_operation(op: Operation) -> OperationState {
    if !op.done {
        return OperationState::Running;
    }
    if let Some(err) = op.error {
        let message = err.message.unwrap_or_else(|| "unknown error".to_string());
        return OperationState::Failed(match err.code {
            Some(code) => format!("{message} (code {code})"),
            None => message,
        });
    }
    let Some(video) = op.response.and_then(|r| r.generate_video_response) else {
        return OperationState::Failed("operation finished without a video response".into());
    };
    let uri = video
        .generated_samples
        .into_iter()
        .next()
        .and_then(|s| s.video)
        .and_then(|v| v.uri);
    match uri {
        Some(uri) => OperationState::Ready { uri },
        None if !video.rai_media_filtered_reasons.is_empty() => {
            OperationState::Failed(format!("filtered: {}", video.rai_media_filtered_reasons.join("; ")))
        }
        None => OperationState::Failed("no generated samples in response".into()),
    }
}

/// Map an operation state onto a poll status. A finished video stays a
/// remote URI; [`GoogleVideoAdapter`] downloads it in `retrieve`.
fn video_status(state: OperationState) -> PollStatus {
    match state {
        OperationState::Running => PollStatus::Pending("processing".into()),
        OperationState::Failed(reason) => PollStatus::Failed(reason),
        OperationState::Ready { uri } => PollStatus::Completed(GeneratedMedia::Remote { url: uri }),
    }
}

// ---------------------------------------------------------------------------
// Image adapter (synchronous)
// ---------------------------------------------------------------------------

pub struct GoogleImageAdapter {
    client: GoogleClient,
}

impl GoogleImageAdapter {
    pub fn new(client: GoogleClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SyncAdapter for GoogleImageAdapter {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia, ProviderError> {
        if request.kind != MediaKind::Image {
            return Err(ProviderError::Unsupported(format!(
                "{PROVIDER_NAME} image adapter cannot generate {}",
                request.kind
            )));
        }

        let mut parts = vec![serde_json::json!({ "text": request.params.prompt })];
        for url in &request.params.reference_urls {
            let image = self.client.inline_reference(url).await?;
            parts.push(serde_json::json!({
                "inline_data": { "mime_type": image.mime_type, "data": image.data }
            }));
        }

        let body = serde_json::json!({
            "contents": [{ "parts": parts }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
                "imageConfig": {
                    "aspectRatio": request.params.aspect_ratio.as_str(),
                    "imageSize": request.params.resolution.as_str(),
                },
            },
        });

        let url = format!(
            "{}/models/{}:generateContent",
            self.client.base_url, request.remote_model_id
        );
        let response: GenerateContentResponse = self.client.post_json(&url, &body).await?;
        extract_inline_image(response)
    }
}

// ---------------------------------------------------------------------------
// Video adapter (asynchronous)
// ---------------------------------------------------------------------------

pub struct GoogleVideoAdapter {
    client: GoogleClient,
}

impl GoogleVideoAdapter {
    pub fn new(client: GoogleClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AsyncAdapter for GoogleVideoAdapter {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<OperationHandle, ProviderError> {
        let params = &request.params;
        if !matches!(params.aspect_ratio, AspectRatio::Portrait9x16 | AspectRatio::Landscape16x9) {
            return Err(ProviderError::Unsupported(format!(
                "Veo does not support aspect ratio {}",
                params.aspect_ratio.as_str()
            )));
        }

        let mut instance = serde_json::json!({ "prompt": params.prompt });
        if let Some(start_frame) = params.reference_urls.first() {
            let image = self.client.inline_reference(start_frame).await?;
            instance["image"] = serde_json::json!({
                "bytesBase64Encoded": image.data,
                "mimeType": image.mime_type,
            });
        }

        let requested = params
            .duration_secs
            .unwrap_or(genbatch_core::generation::DEFAULT_DURATION_SECS);
        let body = serde_json::json!({
            "instances": [instance],
            "parameters": {
                "aspectRatio": params.aspect_ratio.as_str(),
                "durationSeconds": snap_duration(requested, &VEO_DURATIONS),
                "resolution": params.resolution.as_str(),
                "sampleCount": 1,
            },
        });

        let url = format!(
            "{}/models/{}:predictLongRunning",
            self.client.base_url, request.remote_model_id
        );
        let op: Operation = self.client.post_json(&url, &body).await?;
        let name = op
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ProviderError::InvalidResponse("no operation name in response".into()))?;
        Ok(OperationHandle::new(name))
    }

    async fn check(&self, handle: &OperationHandle) -> Result<PollStatus, ProviderError> {
        let url = format!("{}/{}", self.client.base_url, handle.id());
        let op: Operation = self.client.get_json(&url).await?;
        Ok(video_status(interpret_operation(op)))
    }

    /// The video URI only serves with the API key attached.
    async fn retrieve(&self, media: GeneratedMedia) -> Result<GeneratedMedia, ProviderError> {
        let GeneratedMedia::Remote { url } = media else {
            return Ok(media);
        };
        let (bytes, content_type) = self.client.download_authenticated(&url).await?;
        tracing::debug!(bytes = bytes.len(), "Downloaded Veo video");
        Ok(GeneratedMedia::Inline {
            bytes,
            content_type: content_type
                .filter(|ct| ct.starts_with("video/"))
                .unwrap_or_else(|| "video/mp4".to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn content(json: serde_json::Value) -> GenerateContentResponse {
        serde_json::from_value(json).unwrap()
    }

    fn operation(json: serde_json::Value) -> Operation {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn extracts_inline_image() {
        let data = BASE64.encode(b"\x89PNG fake");
        let resp = content(serde_json::json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "here you go" },
                    { "inlineData": { "mimeType": "image/png", "data": data } }
                ]},
                "finishReason": "STOP"
            }]
        }));
        let media = extract_inline_image(resp).unwrap();
        assert_eq!(
            media,
            GeneratedMedia::Inline {
                bytes: b"\x89PNG fake".to_vec(),
                content_type: "image/png".into()
            }
        );
    }

    #[test]
    fn blocked_prompt_is_rejection() {
        let resp = content(serde_json::json!({
            "promptFeedback": { "blockReason": "SAFETY" }
        }));
        assert_matches!(extract_inline_image(resp), Err(ProviderError::Rejected(_)));
    }

    #[test]
    fn text_only_response_is_invalid() {
        let resp = content(serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "I can't draw" }] } }]
        }));
        assert_matches!(extract_inline_image(resp), Err(ProviderError::InvalidResponse(_)));
    }

    #[test]
    fn safety_stop_is_rejection() {
        let resp = content(serde_json::json!({
            "candidates": [{ "content": { "parts": [] }, "finishReason": "IMAGE_SAFETY" }]
        }));
        assert_matches!(extract_inline_image(resp), Err(ProviderError::Rejected(_)));
    }

    #[test]
    fn running_operation() {
        let op = operation(serde_json::json!({ "name": "models/veo/operations/abc" }));
        assert_eq!(interpret_operation(op), OperationState::Running);
    }

    #[test]
    fn finished_operation_yields_uri() {
        let op = operation(serde_json::json!({
            "name": "models/veo/operations/abc",
            "done": true,
            "response": { "generateVideoResponse": { "generatedSamples": [
                { "video": { "uri": "https://generativelanguage.googleapis.com/files/v1:download" } }
            ]}}
        }));
        assert_matches!(interpret_operation(op), OperationState::Ready { uri } if uri.contains("download"));
    }

    #[test]
    fn operation_error_is_failure() {
        let op = operation(serde_json::json!({
            "done": true,
            "error": { "code": 3, "message": "invalid image" }
        }));
        assert_eq!(
            interpret_operation(op),
            OperationState::Failed("invalid image (code 3)".into())
        );
    }

    #[test]
    fn filtered_video_is_failure_with_reason() {
        let op = operation(serde_json::json!({
            "done": true,
            "response": { "generateVideoResponse": {
                "raiMediaFilteredReasons": ["celebrity likeness"]
            }}
        }));
        assert_matches!(interpret_operation(op), OperationState::Failed(msg) if msg.contains("celebrity"));
    }

    #[test]
    fn finished_video_is_left_for_retrieval() {
        let op = operation(serde_json::json!({
            "name": "models/veo/operations/abc",
            "done": true,
            "response": {"generateVideoResponse": {"generatedSamples": [
                {"video": {"uri": "https://generativelanguage.googleapis.com/v1beta/files/x:download?alt=media"}}
            ]}}
        }));
        assert_matches!(
            video_status(interpret_operation(op)),
            PollStatus::Completed(GeneratedMedia::Remote { url }) if url.ends_with("alt=media")
        );
    }

    #[tokio::test]
    async fn retrieve_passes_inline_media_through() {
        let adapter = GoogleVideoAdapter::new(GoogleClient::new("key").unwrap());
        let media = GeneratedMedia::Inline {
            bytes: vec![1, 2, 3],
            content_type: "video/mp4".into(),
        };
        assert_eq!(adapter.retrieve(media.clone()).await.unwrap(), media);
    }

    #[test]
    fn veo_duration_snaps() {
        assert_eq!(snap_duration(5, &VEO_DURATIONS), 4);
        assert_eq!(snap_duration(10, &VEO_DURATIONS), 8);
        assert_eq!(snap_duration(6, &VEO_DURATIONS), 6);
    }
}
