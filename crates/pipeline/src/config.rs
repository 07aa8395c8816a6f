//! Engine configuration.
//!
//! [`EngineConfig`] is built once at startup, validated once, and passed to
//! the orchestrator. Nothing below it reads the environment.

use std::path::PathBuf;
use std::time::Duration;

use genbatch_core::generation::MediaKind;
use genbatch_providers::PollPolicy;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_MAX_WAIT_SECS: u64 = 600;
pub const DEFAULT_POLL_POOL_SIZE: usize = 20;
pub const DEFAULT_POLL_RETRIES: u32 = 3;
pub const DEFAULT_SUBMIT_SPACING_MS: u64 = 2_000;
pub const DEFAULT_MATERIALIZE_CONCURRENCY: usize = 4;
/// Record stores rate-limit writes per base; keep this low.
pub const DEFAULT_PERSIST_CONCURRENCY: usize = 2;
pub const DEFAULT_MASK_PATH: &str = "assets/brand_mask.png";
pub const DEFAULT_IMAGE_MODEL: &str = "nano-banana-pro";
pub const DEFAULT_VIDEO_MODEL: &str = "veo-3.1";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable was set but could not be parsed.
    #[error("{var} must be {expected}, got '{value}'")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },

    /// The values parsed but do not make sense together.
    #[error("Invalid engine configuration: {0}")]
    Inconsistent(String),
}

// ---------------------------------------------------------------------------
// Record field names
// ---------------------------------------------------------------------------

/// Names of the record-store fields the engine reads and writes for one
/// media kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFields {
    pub name: String,
    pub prompt: String,
    pub model: String,
    /// First frame for image-to-video. Unused for images.
    pub start_frame: Option<String>,
    pub references: String,
    pub status: String,
    /// Prefix of the per-variation output field, e.g. `Generated Video`.
    pub generated_prefix: String,
    /// Prefix of the per-variation masked output field.
    pub masked_prefix: String,
}

impl RecordFields {
    pub fn for_kind(kind: MediaKind) -> Self {
        let label = kind.label();
        Self {
            name: "Ad Name".into(),
            prompt: format!("{label} Prompt"),
            model: format!("{label} Model"),
            start_frame: (kind == MediaKind::Video).then(|| "Generated Image 1".to_string()),
            references: "Reference Images".into(),
            status: format!("{label} Status"),
            generated_prefix: format!("Generated {label}"),
            masked_prefix: format!("Masked {label}"),
        }
    }

    pub fn generated_field(&self, variation: u32) -> String {
        format!("{} {variation}", self.generated_prefix)
    }

    pub fn masked_field(&self, variation: u32) -> String {
        format!("{} {variation}", self.masked_prefix)
    }
}

// ---------------------------------------------------------------------------
// Masking
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskingConfig {
    pub enabled: bool,
    /// Transparent PNG composited at the top-left of every output.
    pub overlay_path: PathBuf,
}

impl Default for MaskingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            overlay_path: PathBuf::from(DEFAULT_MASK_PATH),
        }
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub poll_interval: Duration,
    /// Per-handle deadline, measured from when polling that handle starts.
    pub max_wait: Duration,
    /// Concurrent pollers per provider.
    pub pool_size: usize,
    pub max_transient_retries: u32,
    /// Delay between successive submissions to the same provider.
    pub submit_spacing: Duration,
    /// Results stored (and masked) concurrently after a phase resolves.
    pub materialize_concurrency: usize,
    /// Record updates written concurrently during persisting.
    pub persist_concurrency: usize,
    pub masking: MaskingConfig,
    pub default_image_model: String,
    pub default_video_model: String,
    pub image_fields: RecordFields,
    pub video_fields: RecordFields,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_wait: Duration::from_secs(DEFAULT_MAX_WAIT_SECS),
            pool_size: DEFAULT_POLL_POOL_SIZE,
            max_transient_retries: DEFAULT_POLL_RETRIES,
            submit_spacing: Duration::from_millis(DEFAULT_SUBMIT_SPACING_MS),
            materialize_concurrency: DEFAULT_MATERIALIZE_CONCURRENCY,
            persist_concurrency: DEFAULT_PERSIST_CONCURRENCY,
            masking: MaskingConfig::default(),
            default_image_model: DEFAULT_IMAGE_MODEL.into(),
            default_video_model: DEFAULT_VIDEO_MODEL.into(),
            image_fields: RecordFields::for_kind(MediaKind::Image),
            video_fields: RecordFields::for_kind(MediaKind::Video),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default                 |
    /// |---------------------------------|-------------------------|
    /// | `GENBATCH_POLL_INTERVAL_SECS`   | `10`                    |
    /// | `GENBATCH_MAX_WAIT_SECS`        | `600`                   |
    /// | `GENBATCH_POLL_POOL_SIZE`       | `20`                    |
    /// | `GENBATCH_POLL_RETRIES`         | `3`                     |
    /// | `GENBATCH_SUBMIT_SPACING_MS`    | `2000`                  |
    /// | `GENBATCH_STORE_CONCURRENCY`    | `4`                     |
    /// | `GENBATCH_PERSIST_CONCURRENCY`  | `2`                     |
    /// | `GENBATCH_MASK_ENABLED`         | `true`                  |
    /// | `GENBATCH_MASK_PATH`            | `assets/brand_mask.png` |
    /// | `GENBATCH_DEFAULT_IMAGE_MODEL`  | `nano-banana-pro`       |
    /// | `GENBATCH_DEFAULT_VIDEO_MODEL`  | `veo-3.1`               |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let poll_interval = Duration::from_secs(parse_or(
            &get,
            "GENBATCH_POLL_INTERVAL_SECS",
            "a number of seconds",
            DEFAULT_POLL_INTERVAL_SECS,
        )?);
        let max_wait = Duration::from_secs(parse_or(
            &get,
            "GENBATCH_MAX_WAIT_SECS",
            "a number of seconds",
            DEFAULT_MAX_WAIT_SECS,
        )?);
        let pool_size = parse_or(&get, "GENBATCH_POLL_POOL_SIZE", "a positive integer", DEFAULT_POLL_POOL_SIZE)?;
        let max_transient_retries =
            parse_or(&get, "GENBATCH_POLL_RETRIES", "a non-negative integer", DEFAULT_POLL_RETRIES)?;
        let submit_spacing = Duration::from_millis(parse_or(
            &get,
            "GENBATCH_SUBMIT_SPACING_MS",
            "a number of milliseconds",
            DEFAULT_SUBMIT_SPACING_MS,
        )?);
        let materialize_concurrency = parse_or(
            &get,
            "GENBATCH_STORE_CONCURRENCY",
            "a positive integer",
            DEFAULT_MATERIALIZE_CONCURRENCY,
        )?;
        let persist_concurrency = parse_or(
            &get,
            "GENBATCH_PERSIST_CONCURRENCY",
            "a positive integer",
            DEFAULT_PERSIST_CONCURRENCY,
        )?;

        let mask_enabled = match get("GENBATCH_MASK_ENABLED") {
            None => true,
            Some(v) => parse_bool(&v).ok_or(ConfigError::Invalid {
                var: "GENBATCH_MASK_ENABLED",
                expected: "true or false",
                value: v,
            })?,
        };
        let overlay_path = get("GENBATCH_MASK_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.masking.overlay_path);

        let config = Self {
            poll_interval,
            max_wait,
            pool_size,
            max_transient_retries,
            submit_spacing,
            materialize_concurrency,
            persist_concurrency,
            masking: MaskingConfig {
                enabled: mask_enabled,
                overlay_path,
            },
            default_image_model: get("GENBATCH_DEFAULT_IMAGE_MODEL").unwrap_or(defaults.default_image_model),
            default_video_model: get("GENBATCH_DEFAULT_VIDEO_MODEL").unwrap_or(defaults.default_video_model),
            image_fields: defaults.image_fields,
            video_fields: defaults.video_fields,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that the values make sense together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::Inconsistent("poll pool size must be at least 1".into()));
        }
        if self.materialize_concurrency == 0 {
            return Err(ConfigError::Inconsistent("store concurrency must be at least 1".into()));
        }
        if self.persist_concurrency == 0 {
            return Err(ConfigError::Inconsistent("persist concurrency must be at least 1".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Inconsistent("poll interval must be positive".into()));
        }
        if self.poll_interval > self.max_wait {
            return Err(ConfigError::Inconsistent(format!(
                "poll interval ({:?}) exceeds max wait ({:?})",
                self.poll_interval, self.max_wait
            )));
        }
        if self.default_image_model.is_empty() || self.default_video_model.is_empty() {
            return Err(ConfigError::Inconsistent("default models must not be empty".into()));
        }
        Ok(())
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: self.poll_interval,
            max_wait: self.max_wait,
            max_transient_retries: self.max_transient_retries,
        }
    }

    pub fn default_model(&self, kind: MediaKind) -> &str {
        match kind {
            MediaKind::Image => &self.default_image_model,
            MediaKind::Video => &self.default_video_model,
        }
    }

    pub fn fields(&self, kind: MediaKind) -> &RecordFields {
        match kind {
            MediaKind::Image => &self.image_fields,
            MediaKind::Video => &self.video_fields,
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    expected: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(var) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { var, expected, value }),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
