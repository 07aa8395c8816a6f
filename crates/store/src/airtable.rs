//! Airtable-style REST record store.
//!
//! Records are listed with `GET {api}/{base}/{table}` filtered by a
//! formula and paged with the returned `offset`; updates are
//! `PATCH {api}/{base}/{table}/{id}` with only the named fields.

use std::time::Duration;

use async_trait::async_trait;
use genbatch_core::store::{FieldMap, RecordStore, RecordStoreError, StoreRecord};
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_URL: &str = "https://api.airtable.com/v0";

/// Largest page the API returns.
const PAGE_SIZE: u32 = 100;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Response bodies kept in error messages.
const MAX_ERROR_BODY: usize = 500;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AirtableConfig {
    pub api_key: String,
    pub base_id: String,
    pub table: String,
    /// Selects the records that are ready for generation.
    pub filter_formula: Option<String>,
    pub api_url: String,
}

impl AirtableConfig {
    pub fn new(api_key: impl Into<String>, base_id: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_id: base_id.into(),
            table: table.into(),
            filter_formula: None,
            api_url: DEFAULT_API_URL.to_string(),
        }
    }

    pub fn with_filter(mut self, formula: impl Into<String>) -> Self {
        self.filter_formula = Some(formula.into());
        self
    }

    /// Table endpoint with each path segment percent-encoded, so table
    /// names with spaces work.
    pub fn table_url(&self) -> Result<reqwest::Url, RecordStoreError> {
        let mut url = reqwest::Url::parse(self.api_url.trim_end_matches('/'))
            .map_err(|e| RecordStoreError::Request(format!("invalid API URL '{}': {e}", self.api_url)))?;
        url.path_segments_mut()
            .map_err(|()| RecordStoreError::Request(format!("API URL '{}' cannot have a path", self.api_url)))?
            .pop_if_empty()
            .push(&self.base_id)
            .push(&self.table);
        Ok(url)
    }

    pub fn record_url(&self, record_id: &str) -> Result<reqwest::Url, RecordStoreError> {
        let mut url = self.table_url()?;
        url.path_segments_mut()
            .map_err(|()| RecordStoreError::Request("table URL cannot have a path".into()))?
            .push(record_id);
        Ok(url)
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ListPage {
    #[serde(default)]
    records: Vec<StoreRecord>,
    offset: Option<String>,
}

#[derive(Debug, Serialize)]
struct UpdateBody<'a> {
    fields: &'a FieldMap,
    /// Lets the store coerce text into select options.
    typecast: bool,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct AirtableStore {
    http: reqwest::Client,
    config: AirtableConfig,
}

impl AirtableStore {
    pub fn new(config: AirtableConfig) -> Result<Self, RecordStoreError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("genbatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RecordStoreError::Request(e.to_string()))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &AirtableConfig {
        &self.config
    }

    async fn list_page(&self, offset: Option<&str>) -> Result<ListPage, RecordStoreError> {
        let mut query: Vec<(&str, String)> = vec![("pageSize", PAGE_SIZE.to_string())];
        if let Some(formula) = &self.config.filter_formula {
            query.push(("filterByFormula", formula.clone()));
        }
        if let Some(offset) = offset {
            query.push(("offset", offset.to_string()));
        }

        let response = self
            .http
            .get(self.config.table_url()?)
            .bearer_auth(&self.config.api_key)
            .query(&query)
            .send()
            .await
            .map_err(|e| RecordStoreError::Request(e.to_string()))?;
        let body = checked_body(response).await?;
        parse_page(&body)
    }
}

#[async_trait]
impl RecordStore for AirtableStore {
    async fn fetch_ready(&self) -> Result<Vec<StoreRecord>, RecordStoreError> {
        let mut records = Vec::new();
        let mut offset: Option<String> = None;
        loop {
            let page = self.list_page(offset.as_deref()).await?;
            records.extend(page.records);
            match page.offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        tracing::info!(table = %self.config.table, records = records.len(), "Fetched records");
        Ok(records)
    }

    async fn update_record(&self, id: &str, fields: &FieldMap) -> Result<(), RecordStoreError> {
        let response = self
            .http
            .patch(self.config.record_url(id)?)
            .bearer_auth(&self.config.api_key)
            .json(&UpdateBody { fields, typecast: true })
            .send()
            .await
            .map_err(|e| RecordStoreError::Request(e.to_string()))?;
        checked_body(response).await?;
        tracing::debug!(record_id = id, fields = fields.len(), "Record updated");
        Ok(())
    }
}

/// Read the body, turning a non-2xx status into [`RecordStoreError::Api`].
async fn checked_body(response: reqwest::Response) -> Result<String, RecordStoreError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| RecordStoreError::Request(e.to_string()))?;
    if !status.is_success() {
        return Err(RecordStoreError::Api {
            status: status.as_u16(),
            body: body.chars().take(MAX_ERROR_BODY).collect(),
        });
    }
    Ok(body)
}

fn parse_page(body: &str) -> Result<ListPage, RecordStoreError> {
    serde_json::from_str(body).map_err(|e| RecordStoreError::Decode(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
