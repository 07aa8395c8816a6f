//! Shared HTTP helpers for provider clients.

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::ProviderError;

/// Per-request timeout applied to every provider client.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Build the pooled client shared by all adapters of one provider.
pub fn build_client() -> Result<reqwest::Client, ProviderError> {
    Ok(reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("genbatch/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Ensure the response has a success status code. Returns the response
/// unchanged on success, or a [`ProviderError::Api`] carrying the status
/// and body text on failure.
pub async fn ensure_success(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(ProviderError::Api {
            provider: provider.to_string(),
            status: status.as_u16(),
            body: truncate(&body, 500),
        });
    }
    Ok(response)
}

/// Parse a successful JSON response body into the expected type.
pub async fn parse_json<T: DeserializeOwned>(
    provider: &str,
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    let response = ensure_success(provider, response).await?;
    let text = response.text().await?;
    serde_json::from_str(&text)
        .map_err(|e| ProviderError::InvalidResponse(format!("{e}: {}", truncate(&text, 200))))
}

/// Download a body, keeping the `Content-Type` header when present.
pub async fn read_bytes(
    provider: &str,
    response: reqwest::Response,
) -> Result<(Vec<u8>, Option<String>), ProviderError> {
    let response = ensure_success(provider, response).await?;
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = response.bytes().await?;
    Ok((bytes.to_vec(), content_type))
}

/// Cut `text` to at most `max` characters for error messages.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push_str("...");
    out
}
