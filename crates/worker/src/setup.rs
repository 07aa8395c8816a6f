//! Wiring the engine's collaborators from environment variables.
//!
//! Every function takes a `lookup` so the rules can be exercised without
//! touching the process environment.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use genbatch_core::catalog::ProviderCatalog;
use genbatch_core::generation::MediaKind;
use genbatch_core::store::MediaStore;
use genbatch_pipeline::RecordFields;
use genbatch_providers::google::{self, GoogleClient, GoogleImageAdapter, GoogleVideoAdapter};
use genbatch_providers::wavespeed::{self, WaveSpeedAdapter};
use genbatch_providers::{Adapter, AdapterSet};
use genbatch_store::{AirtableConfig, LocalMediaStore, S3Config, S3MediaStore};

pub const DEFAULT_TABLE: &str = "Content";
pub const DEFAULT_MEDIA_DIR: &str = "output";
pub const DEFAULT_MEDIA_BASE_URL: &str = "http://localhost:8000/media";
pub const DEFAULT_S3_PREFIX: &str = "generated";

fn get(lookup: &dyn Fn(&str) -> Option<String>, var: &str) -> Option<String> {
    lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn require(lookup: &dyn Fn(&str) -> Option<String>, var: &str) -> anyhow::Result<String> {
    get(lookup, var).with_context(|| format!("{var} must be set"))
}

/// Adapters for every provider whose credentials are present. A provider
/// without credentials is simply absent; jobs routed to it fail as
/// configuration errors at plan time.
pub fn adapters(lookup: &dyn Fn(&str) -> Option<String>) -> anyhow::Result<AdapterSet> {
    let mut set = AdapterSet::new();

    if let Some(key) = get(lookup, "GOOGLE_API_KEY") {
        let mut client = GoogleClient::new(key)?;
        if let Some(url) = get(lookup, "GOOGLE_API_BASE_URL") {
            client = client.with_base_url(url);
        }
        set = set
            .with(
                google::PROVIDER_NAME,
                MediaKind::Image,
                Adapter::Sync(Arc::new(GoogleImageAdapter::new(client.clone()))),
            )
            .with(
                google::PROVIDER_NAME,
                MediaKind::Video,
                Adapter::Async(Arc::new(GoogleVideoAdapter::new(client))),
            );
    } else {
        tracing::warn!("GOOGLE_API_KEY not set, Google adapters disabled");
    }

    if let Some(key) = get(lookup, "WAVESPEED_API_KEY") {
        let mut adapter = WaveSpeedAdapter::new(key)?;
        if let Some(url) = get(lookup, "WAVESPEED_API_BASE_URL") {
            adapter = adapter.with_base_url(url);
        }
        set = set.with(wavespeed::PROVIDER_NAME, MediaKind::Video, Adapter::Async(Arc::new(adapter)));
    } else {
        tracing::warn!("WAVESPEED_API_KEY not set, WaveSpeed adapter disabled");
    }

    Ok(set)
}

/// The built-in catalog, or the one at `path`.
pub fn catalog(path: Option<&Path>) -> anyhow::Result<ProviderCatalog> {
    match path {
        None => Ok(ProviderCatalog::builtin()?),
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading catalog {}", path.display()))?;
            ProviderCatalog::from_json(&json).with_context(|| format!("loading catalog {}", path.display()))
        }
    }
}

/// Record store settings. Without `AIRTABLE_FILTER`, records whose status
/// field for `kind` reads `Pending` are selected.
pub fn airtable(lookup: &dyn Fn(&str) -> Option<String>, fields: &RecordFields) -> anyhow::Result<AirtableConfig> {
    let mut config = AirtableConfig::new(
        require(lookup, "AIRTABLE_API_KEY")?,
        require(lookup, "AIRTABLE_BASE_ID")?,
        get(lookup, "AIRTABLE_TABLE_NAME").unwrap_or_else(|| DEFAULT_TABLE.to_string()),
    );
    if let Some(url) = get(lookup, "AIRTABLE_API_URL") {
        config.api_url = url;
    }
    let formula = get(lookup, "AIRTABLE_FILTER").unwrap_or_else(|| format!("{{{}}} = 'Pending'", fields.status));
    Ok(config.with_filter(formula))
}

/// Which media backend `GENBATCH_MEDIA_BACKEND` selects.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaBackend {
    Local { dir: String, base_url: String },
    S3(S3Config),
}

impl MediaBackend {
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        match get(lookup, "GENBATCH_MEDIA_BACKEND").as_deref().unwrap_or("local") {
            "local" => Ok(Self::Local {
                dir: get(lookup, "GENBATCH_MEDIA_DIR").unwrap_or_else(|| DEFAULT_MEDIA_DIR.to_string()),
                base_url: get(lookup, "GENBATCH_MEDIA_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_MEDIA_BASE_URL.to_string()),
            }),
            "s3" => Ok(Self::S3(S3Config {
                bucket: require(lookup, "GENBATCH_S3_BUCKET")?,
                prefix: get(lookup, "GENBATCH_S3_PREFIX").unwrap_or_else(|| DEFAULT_S3_PREFIX.to_string()),
                public_base_url: require(lookup, "GENBATCH_S3_PUBLIC_URL")?,
                endpoint_url: get(lookup, "GENBATCH_S3_ENDPOINT"),
            })),
            other => bail!("GENBATCH_MEDIA_BACKEND must be 'local' or 's3', got '{other}'"),
        }
    }

    pub async fn build(self) -> anyhow::Result<Arc<dyn MediaStore>> {
        Ok(match self {
            Self::Local { dir, base_url } => {
                tracing::info!(dir, base_url, "Using local media store");
                Arc::new(LocalMediaStore::new(dir, base_url)?)
            }
            Self::S3(config) => {
                tracing::info!(bucket = %config.bucket, prefix = %config.prefix, "Using S3 media store");
                Arc::new(S3MediaStore::from_env(config).await?)
            }
        })
    }
}
