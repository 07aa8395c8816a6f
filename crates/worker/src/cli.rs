//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;
use genbatch_core::generation::{AspectRatio, MediaKind, Resolution};
use genbatch_pipeline::BatchRequest;

/// Generate images or videos for every ready record in the record store.
#[derive(Debug, Parser)]
#[command(name = "genbatch-worker", version)]
pub struct Cli {
    /// Media kind to generate: image or video.
    #[arg(value_name = "KIND")]
    pub kind: MediaKind,

    /// Model for records without their own (internal or display name).
    #[arg(long)]
    pub model: Option<String>,

    /// Force one provider instead of each model's default.
    #[arg(long)]
    pub provider: Option<String>,

    /// Variations per record.
    #[arg(long, short = 'n', default_value_t = 1)]
    pub variations: u32,

    #[arg(long, default_value = "9:16")]
    pub aspect_ratio: AspectRatio,

    /// Clip length in seconds (video only).
    #[arg(long)]
    pub duration: Option<u32>,

    /// 720p, 1080p, 4k (video) or 1K, 2K, 4K (image).
    #[arg(long)]
    pub resolution: Option<Resolution>,

    /// Process at most this many records.
    #[arg(long)]
    pub limit: Option<usize>,

    /// Plan and print the cost estimate without calling any provider.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,

    /// Provider catalog JSON replacing the built-in one.
    #[arg(long, env = "GENBATCH_CATALOG_PATH")]
    pub catalog: Option<PathBuf>,
}

impl Cli {
    pub fn batch_request(&self) -> BatchRequest {
        BatchRequest {
            kind: self.kind,
            model: self.model.clone(),
            provider: self.provider.clone(),
            variations: self.variations,
            aspect_ratio: self.aspect_ratio,
            duration_secs: self.duration,
            resolution: self.resolution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_video_batch() {
        let cli = Cli::try_parse_from([
            "genbatch-worker",
            "video",
            "--model",
            "Veo 3.1",
            "-n",
            "2",
            "--aspect-ratio",
            "16:9",
            "--duration",
            "6",
            "--resolution",
            "1080p",
        ])
        .unwrap();

        let request = cli.batch_request();
        assert_eq!(request.kind, MediaKind::Video);
        assert_eq!(request.model.as_deref(), Some("Veo 3.1"));
        assert_eq!(request.variations, 2);
        assert_eq!(request.aspect_ratio, AspectRatio::Landscape16x9);
        assert_eq!(request.duration_secs, Some(6));
        assert_eq!(request.resolution, Some(Resolution::Hd1080));
        assert!(!cli.dry_run);
    }

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["genbatch-worker", "image", "--dry-run"]).unwrap();
        assert_eq!(cli.kind, MediaKind::Image);
        assert_eq!(cli.variations, 1);
        assert_eq!(cli.aspect_ratio, AspectRatio::Portrait9x16);
        assert!(cli.dry_run);
        assert!(cli.resolution.is_none());
    }

    #[test]
    fn rejects_unknown_kind() {
        assert!(Cli::try_parse_from(["genbatch-worker", "audio"]).is_err());
    }

    #[test]
    fn rejects_unknown_aspect_ratio() {
        assert!(Cli::try_parse_from(["genbatch-worker", "image", "--aspect-ratio", "2:1"]).is_err());
    }
}
