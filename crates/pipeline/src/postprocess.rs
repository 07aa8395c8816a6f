//! Brand-mask compositing for generated media.
//!
//! Still images are composited in-process with the `image` crate on a
//! blocking thread. Videos are re-encoded by `ffmpeg` with the mask as a
//! stationary overlay and the source audio stream copied untouched.
//!
//! Failures here never fail a job: the caller records them as warnings
//! and keeps the unmasked result.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use genbatch_core::generation::MediaKind;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, RgbaImage};

use crate::config::MaskingConfig;

/// ffmpeg filter graph: scale the mask to the frame, overlay at (0,0).
const VIDEO_FILTER: &str = "[1:v][0:v]scale2ref[mask][main];[main][mask]overlay=0:0[v]";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PostProcessError {
    #[error("mask asset not found: {}", .0.display())]
    MaskMissing(PathBuf),

    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("ffmpeg binary not found: {0}")]
    FfmpegNotFound(std::io::Error),

    #[error("ffmpeg failed (exit code {exit_code:?}): {stderr}")]
    Ffmpeg { exit_code: Option<i32>, stderr: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("compositing task failed: {0}")]
    Task(String),
}

// ---------------------------------------------------------------------------
// PostProcessor
// ---------------------------------------------------------------------------

/// Applies the configured brand mask to generated media.
#[derive(Debug, Clone)]
pub struct PostProcessor {
    config: MaskingConfig,
}

impl PostProcessor {
    pub fn new(config: MaskingConfig) -> Self {
        Self { config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn overlay_path(&self) -> &Path {
        &self.config.overlay_path
    }

    /// Produce the masked derivative of `source`.
    ///
    /// `extension` is the stored file's extension and selects the output
    /// encoding for images.
    pub async fn apply(
        &self,
        kind: MediaKind,
        source: Vec<u8>,
        extension: &str,
    ) -> Result<Vec<u8>, PostProcessError> {
        let mask_path = self.config.overlay_path.clone();
        let mask_bytes = match tokio::fs::read(&mask_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PostProcessError::MaskMissing(mask_path));
            }
            Err(e) => return Err(e.into()),
        };

        match kind {
            MediaKind::Image => {
                let format = output_format(extension);
                tokio::task::spawn_blocking(move || {
                    let mask = image::load_from_memory(&mask_bytes)?;
                    composite_image(&source, &mask, format)
                })
                .await
                .map_err(|e| PostProcessError::Task(e.to_string()))?
            }
            MediaKind::Video => composite_video(&source, &mask_path, extension).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

/// Encoding for a stored image extension. Unknown extensions encode as PNG.
pub fn output_format(extension: &str) -> ImageFormat {
    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => ImageFormat::Jpeg,
        "webp" => ImageFormat::WebP,
        _ => ImageFormat::Png,
    }
}

/// Largest size with the mask's aspect ratio that fits inside the frame.
/// A mask that already fits keeps its size.
pub fn fit_within(mask: (u32, u32), frame: (u32, u32)) -> (u32, u32) {
    let (mw, mh) = mask;
    let (fw, fh) = frame;
    if mw <= fw && mh <= fh {
        return mask;
    }
    let scale = (fw as f64 / mw as f64).min(fh as f64 / mh as f64);
    let w = ((mw as f64 * scale).floor() as u32).clamp(1, fw.max(1));
    let h = ((mh as f64 * scale).floor() as u32).clamp(1, fh.max(1));
    (w, h)
}

/// Drop the alpha channel by blending onto white.
pub fn flatten_onto_white(image: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b, a] = image.get_pixel(x, y).0;
        let alpha = a as u16;
        let blend = |c: u8| ((c as u16 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

/// Overlay `mask` at the top-left of `source` and encode as `format`.
pub fn composite_image(
    source: &[u8],
    mask: &DynamicImage,
    format: ImageFormat,
) -> Result<Vec<u8>, PostProcessError> {
    let mut base = image::load_from_memory(source)?.to_rgba8();

    let mut overlay = mask.to_rgba8();
    let fitted = fit_within(overlay.dimensions(), base.dimensions());
    if fitted != overlay.dimensions() {
        overlay = imageops::resize(&overlay, fitted.0, fitted.1, FilterType::Lanczos3);
    }
    imageops::overlay(&mut base, &overlay, 0, 0);

    let mut out = Vec::new();
    match format {
        ImageFormat::Jpeg => {
            DynamicImage::ImageRgb8(flatten_onto_white(&base)).write_to(&mut Cursor::new(&mut out), format)?
        }
        _ => DynamicImage::ImageRgba8(base).write_to(&mut Cursor::new(&mut out), format)?,
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Video
// ---------------------------------------------------------------------------

/// Arguments for the overlay re-encode. Audio, when present, is copied.
pub fn ffmpeg_overlay_args(input: &Path, mask: &Path, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into(), "-loglevel".into(), "error".into(), "-i".into()];
    args.push(input.to_string_lossy().into_owned());
    args.push("-i".into());
    args.push(mask.to_string_lossy().into_owned());
    args.extend(
        [
            "-filter_complex",
            VIDEO_FILTER,
            "-map",
            "[v]",
            "-map",
            "0:a?",
            "-c:v",
            "libx264",
            "-pix_fmt",
            "yuv420p",
            "-c:a",
            "copy",
        ]
        .map(String::from),
    );
    args.push(output.to_string_lossy().into_owned());
    args
}

async fn composite_video(source: &[u8], mask: &Path, extension: &str) -> Result<Vec<u8>, PostProcessError> {
    let scratch = tempfile::tempdir()?;
    let ext = if extension.is_empty() || extension == "bin" { "mp4" } else { extension };
    let input = scratch.path().join(format!("input.{ext}"));
    let output = scratch.path().join(format!("masked.{ext}"));
    tokio::fs::write(&input, source).await?;

    let result = tokio::process::Command::new("ffmpeg")
        .args(ffmpeg_overlay_args(&input, mask, &output))
        .output()
        .await
        .map_err(PostProcessError::FfmpegNotFound)?;

    if !result.status.success() {
        return Err(PostProcessError::Ffmpeg {
            exit_code: result.status.code(),
            stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
        });
    }
    Ok(tokio::fs::read(&output).await?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use image::Rgba;

    use super::*;

    fn png(width: u32, height: u32, pixel: Rgba<u8>) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, pixel);
        let mut out = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    // -- sizing ---------------------------------------------------------------

    #[test]
    fn mask_that_fits_is_not_scaled() {
        assert_eq!(fit_within((100, 50), (200, 200)), (100, 50));
    }

    #[test]
    fn oversized_mask_shrinks_preserving_aspect() {
        assert_eq!(fit_within((400, 200), (100, 100)), (100, 50));
        assert_eq!(fit_within((100, 400), (200, 200)), (50, 200));
    }

    // -- compositing ----------------------------------------------------------

    #[test]
    fn opaque_mask_pixels_replace_source() {
        let source = png(4, 4, Rgba([0, 0, 255, 255]));
        let mask = DynamicImage::ImageRgba8(RgbaImage::from_fn(2, 2, |_, _| Rgba([255, 0, 0, 255])));

        let out = composite_image(&source, &mask, ImageFormat::Png).unwrap();
        let result = image::load_from_memory(&out).unwrap().to_rgba8();

        assert_eq!(result.dimensions(), (4, 4));
        assert_eq!(result.get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
        assert_eq!(result.get_pixel(3, 3), &Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn oversized_mask_does_not_grow_output() {
        let source = png(8, 4, Rgba([0, 0, 0, 255]));
        let mask = DynamicImage::ImageRgba8(RgbaImage::from_pixel(32, 32, Rgba([255, 255, 255, 0])));
        let out = composite_image(&source, &mask, ImageFormat::Png).unwrap();
        let result = image::load_from_memory(&out).unwrap();
        assert_eq!((result.width(), result.height()), (8, 4));
    }

    #[test]
    fn jpeg_output_is_flattened() {
        let source = png(4, 4, Rgba([10, 20, 30, 0]));
        let mask = DynamicImage::ImageRgba8(RgbaImage::new(1, 1));
        let out = composite_image(&source, &mask, ImageFormat::Jpeg).unwrap();
        let result = image::load_from_memory(&out).unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Jpeg);
        assert!(!result.color().has_alpha());
    }

    #[test]
    fn flatten_blends_with_white() {
        let img = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 0]));
        assert_eq!(flatten_onto_white(&img).get_pixel(0, 0), &Rgb([255, 255, 255]));
        let img = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255]));
        assert_eq!(flatten_onto_white(&img).get_pixel(0, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn output_format_by_extension() {
        assert_eq!(output_format("JPG"), ImageFormat::Jpeg);
        assert_eq!(output_format("webp"), ImageFormat::WebP);
        assert_eq!(output_format("bin"), ImageFormat::Png);
    }

    // -- video ----------------------------------------------------------------

    #[test]
    fn video_args_copy_audio_and_map_overlay() {
        let args = ffmpeg_overlay_args(Path::new("/t/in.mp4"), Path::new("/m.png"), Path::new("/t/out.mp4"));
        let joined = args.join(" ");
        assert!(joined.contains("-i /t/in.mp4 -i /m.png"));
        assert!(joined.contains("overlay=0:0[v]"));
        assert!(joined.contains("-map 0:a? -c:v libx264"));
        assert!(joined.contains("-c:a copy"));
        assert_eq!(args.last().map(String::as_str), Some("/t/out.mp4"));
    }

    // -- missing mask ---------------------------------------------------------

    #[tokio::test]
    async fn missing_mask_is_reported() {
        let processor = PostProcessor::new(MaskingConfig {
            enabled: true,
            overlay_path: PathBuf::from("/nonexistent/brand_mask.png"),
        });
        let err = processor
            .apply(MediaKind::Image, png(2, 2, Rgba([0, 0, 0, 255])), "png")
            .await
            .unwrap_err();
        assert_matches!(err, PostProcessError::MaskMissing(_));
    }

    #[tokio::test]
    async fn image_mask_applied_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let mask_path = dir.path().join("mask.png");
        std::fs::write(&mask_path, png(1, 1, Rgba([255, 255, 255, 255]))).unwrap();
        let processor = PostProcessor::new(MaskingConfig {
            enabled: true,
            overlay_path: mask_path,
        });

        let out = processor
            .apply(MediaKind::Image, png(2, 2, Rgba([0, 0, 0, 255])), "png")
            .await
            .unwrap();
        let result = image::load_from_memory(&out).unwrap().to_rgba8();
        assert_eq!(result.get_pixel(0, 0), &Rgba([255, 255, 255, 255]));
        assert_eq!(result.get_pixel(1, 1), &Rgba([0, 0, 0, 255]));
    }
}
