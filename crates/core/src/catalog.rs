//! Data-driven model and provider catalog.
//!
//! The catalog maps each model name to the providers that can run it,
//! the provider used by default, and the per-(model, provider) unit cost.
//! It is loaded once at startup (from JSON) and only read afterwards, so
//! an `Arc<ProviderCatalog>` can be shared freely across tasks.
//!
//! Orchestration code depends on the [`ProviderRegistry`] trait rather than
//! on the concrete catalog, so tests and alternative sources can be
//! injected.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::generation::MediaKind;
use crate::job::JobRoute;

/// Catalog compiled into the binary, used when no catalog file is given.
const BUILTIN_CATALOG: &str = include_str!("catalog.json");

// ---------------------------------------------------------------------------
// Catalog document
// ---------------------------------------------------------------------------

/// One provider's offer for a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderOffer {
    /// Model identifier in the provider's own API.
    pub remote_model_id: String,
    /// USD charged per successful generation.
    pub unit_cost: f64,
}

/// Registry entry for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Name shown to operators and written to record stores ("Veo 3.1").
    pub display_name: String,
    pub kind: MediaKind,
    pub default_provider: String,
    pub providers: BTreeMap<String, ProviderOffer>,
}

/// The complete model registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderCatalog {
    pub models: BTreeMap<String, ModelSpec>,
}

// ---------------------------------------------------------------------------
// Registry trait
// ---------------------------------------------------------------------------

/// Read-only model resolution used by the orchestrator.
pub trait ProviderRegistry: Send + Sync {
    /// Resolve `model` (internal or display name) and an optional provider
    /// override into a concrete route.
    fn resolve(&self, model: &str, provider: Option<&str>) -> Result<JobRoute, CoreError>;

    /// Display name for a model, falling back to the model name itself.
    fn display_name(&self, model: &str) -> String;
}

// ---------------------------------------------------------------------------
// Loading and validation
// ---------------------------------------------------------------------------

impl ProviderCatalog {
    /// Parse and validate a catalog from JSON.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let catalog: Self = serde_json::from_str(json)
            .map_err(|e| CoreError::Validation(format!("Invalid provider catalog: {e}")))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// The catalog shipped with the binary.
    pub fn builtin() -> Result<Self, CoreError> {
        Self::from_json(BUILTIN_CATALOG)
    }

    /// Check internal consistency.
    ///
    /// Rules:
    /// - At least one model.
    /// - Every model lists at least one provider and its default provider
    ///   is among them.
    /// - Unit costs are finite and non-negative.
    /// - Display names are unique (case-insensitive).
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.models.is_empty() {
            return Err(CoreError::Validation(
                "Provider catalog must define at least one model".to_string(),
            ));
        }

        let mut seen_display = std::collections::HashSet::new();
        for (name, spec) in &self.models {
            if spec.providers.is_empty() {
                return Err(CoreError::Validation(format!(
                    "Model '{name}' has no providers"
                )));
            }
            if !spec.providers.contains_key(&spec.default_provider) {
                return Err(CoreError::Validation(format!(
                    "Model '{name}' defaults to provider '{}' which it does not list",
                    spec.default_provider
                )));
            }
            for (provider, offer) in &spec.providers {
                if !offer.unit_cost.is_finite() || offer.unit_cost < 0.0 {
                    return Err(CoreError::Validation(format!(
                        "Model '{name}' via '{provider}' has invalid unit cost {}",
                        offer.unit_cost
                    )));
                }
                if offer.remote_model_id.trim().is_empty() {
                    return Err(CoreError::Validation(format!(
                        "Model '{name}' via '{provider}' has an empty remote model id"
                    )));
                }
            }
            if !seen_display.insert(spec.display_name.to_lowercase()) {
                return Err(CoreError::Validation(format!(
                    "Duplicate display name \"{}\"",
                    spec.display_name
                )));
            }
        }
        Ok(())
    }

    // ---- lookups ----

    /// Map an internal name or a display name to the internal model name.
    pub fn canonical_name(&self, name: &str) -> Option<&str> {
        let trimmed = name.trim();
        if let Some((key, _)) = self.models.get_key_value(trimmed) {
            return Some(key.as_str());
        }
        self.models
            .iter()
            .find(|(_, spec)| spec.display_name.eq_ignore_ascii_case(trimmed))
            .map(|(key, _)| key.as_str())
    }

    /// Unit cost for a (model, provider) pair, if the pair exists.
    pub fn unit_cost(&self, model: &str, provider: &str) -> Option<f64> {
        self.models
            .get(model)
            .and_then(|spec| spec.providers.get(provider))
            .map(|offer| offer.unit_cost)
    }

    /// Provider names referenced anywhere in the catalog.
    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .models
            .values()
            .flat_map(|spec| spec.providers.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

impl ProviderRegistry for ProviderCatalog {
    fn resolve(&self, model: &str, provider: Option<&str>) -> Result<JobRoute, CoreError> {
        let canonical = self
            .canonical_name(model)
            .ok_or_else(|| CoreError::UnknownModel {
                model: model.to_string(),
                available: self.models.keys().cloned().collect(),
            })?;
        let spec = &self.models[canonical];

        let provider_name = provider.unwrap_or(&spec.default_provider);
        let offer = spec
            .providers
            .get(provider_name)
            .ok_or_else(|| CoreError::ProviderUnavailable {
                model: canonical.to_string(),
                provider: provider_name.to_string(),
                available: spec.providers.keys().cloned().collect(),
            })?;

        Ok(JobRoute {
            kind: spec.kind,
            model: canonical.to_string(),
            provider: provider_name.to_string(),
            remote_model_id: offer.remote_model_id.clone(),
            unit_cost: offer.unit_cost,
        })
    }

    fn display_name(&self, model: &str) -> String {
        self.models
            .get(model)
            .map(|spec| spec.display_name.clone())
            .unwrap_or_else(|| model.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
