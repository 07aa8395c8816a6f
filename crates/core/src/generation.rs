//! Generation parameters shared by every provider.
//!
//! Aspect ratios and resolution tiers are closed enums so that adapters
//! never see free-form strings. Durations stay numeric because each
//! backend supports its own set of clip lengths; [`snap_duration`] maps a
//! requested length onto that set.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Upper bound on variations generated per record.
pub const MAX_VARIATIONS: u32 = 2;

/// Clip length requested when a batch does not specify one.
pub const DEFAULT_DURATION_SECS: u32 = 8;

/// Maximum prompt length accepted before a job is planned.
pub const MAX_PROMPT_LEN: usize = 8_000;

// ---------------------------------------------------------------------------
// Media kind
// ---------------------------------------------------------------------------

/// What a model produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Capitalised label used in record field names ("Generated Video 1").
    pub fn label(self) -> &'static str {
        match self {
            Self::Image => "Image",
            Self::Video => "Video",
        }
    }

    /// Resolution tier used when a batch does not choose one.
    pub fn default_resolution(self) -> Resolution {
        match self {
            Self::Image => Resolution::Image1K,
            Self::Video => Resolution::Hd720,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => f.write_str("image"),
            Self::Video => f.write_str("video"),
        }
    }
}

impl FromStr for MediaKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            other => Err(CoreError::Validation(format!(
                "Unknown media kind '{other}'. Must be one of: image, video"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Aspect ratio
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "9:16")]
    Portrait9x16,
    #[serde(rename = "16:9")]
    Landscape16x9,
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "4:5")]
    Portrait4x5,
    #[serde(rename = "3:4")]
    Portrait3x4,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [
        Self::Portrait9x16,
        Self::Landscape16x9,
        Self::Square,
        Self::Portrait4x5,
        Self::Portrait3x4,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Portrait9x16 => "9:16",
            Self::Landscape16x9 => "16:9",
            Self::Square => "1:1",
            Self::Portrait4x5 => "4:5",
            Self::Portrait3x4 => "3:4",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s.trim())
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Unsupported aspect ratio '{s}'. Must be one of: 9:16, 16:9, 1:1, 4:5, 3:4"
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolution tier. Video and image backends name their tiers differently,
/// so each variant belongs to exactly one [`MediaKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "720p")]
    Hd720,
    #[serde(rename = "1080p")]
    Hd1080,
    #[serde(rename = "4k")]
    Uhd4k,
    #[serde(rename = "1K")]
    Image1K,
    #[serde(rename = "2K")]
    Image2K,
    #[serde(rename = "4K")]
    Image4K,
}

impl Resolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hd720 => "720p",
            Self::Hd1080 => "1080p",
            Self::Uhd4k => "4k",
            Self::Image1K => "1K",
            Self::Image2K => "2K",
            Self::Image4K => "4K",
        }
    }

    pub fn kind(self) -> MediaKind {
        match self {
            Self::Hd720 | Self::Hd1080 | Self::Uhd4k => MediaKind::Video,
            Self::Image1K | Self::Image2K | Self::Image4K => MediaKind::Image,
        }
    }

    /// Reject a tier that belongs to the other media kind.
    pub fn validate_for(self, kind: MediaKind) -> Result<(), CoreError> {
        if self.kind() == kind {
            Ok(())
        } else {
            Err(CoreError::Validation(format!(
                "Resolution '{}' is not valid for {kind} generation",
                self.as_str()
            )))
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "720p" => Ok(Self::Hd720),
            "1080p" => Ok(Self::Hd1080),
            "4k" => Ok(Self::Uhd4k),
            "1K" => Ok(Self::Image1K),
            "2K" => Ok(Self::Image2K),
            "4K" => Ok(Self::Image4K),
            other => Err(CoreError::Validation(format!(
                "Unknown resolution '{other}'. Video: 720p, 1080p, 4k. Image: 1K, 2K, 4K"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Everything a provider needs to generate one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub prompt: String,
    pub aspect_ratio: AspectRatio,
    /// Requested clip length in seconds. Ignored for images.
    pub duration_secs: Option<u32>,
    pub resolution: Resolution,
    /// Reference media URLs. For video the first entry is the start frame.
    pub reference_urls: Vec<String>,
}

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

/// Snap a requested duration to the nearest supported value.
///
/// Ties resolve to the shorter duration. An empty `supported` slice
/// leaves the request untouched.
pub fn snap_duration(requested: u32, supported: &[u32]) -> u32 {
    supported
        .iter()
        .copied()
        .min_by_key(|&v| (v.abs_diff(requested), v))
        .unwrap_or(requested)
}

/// Clamp a requested variation count into `1..=MAX_VARIATIONS`.
pub fn clamp_variations(requested: u32) -> u32 {
    requested.clamp(1, MAX_VARIATIONS)
}

/// A prompt must contain something other than whitespace and stay within
/// [`MAX_PROMPT_LEN`] characters.
pub fn validate_prompt(prompt: &str) -> Result<(), CoreError> {
    if prompt.trim().is_empty() {
        return Err(CoreError::Validation("Prompt must not be empty".to_string()));
    }
    if prompt.chars().count() > MAX_PROMPT_LEN {
        return Err(CoreError::Validation(format!(
            "Prompt must not exceed {MAX_PROMPT_LEN} characters"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
