//! Derived preview artifacts for processed media.
//!
//! Animated outputs get a palette-optimized GIF, an animated WebP, and a
//! single-frame poster. Still images get no derivations.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;

/// Palette-based GIF filter. Two-pass palettegen keeps the 256-color
/// quantization stable across frames.
const GIF_FILTER: &str =
    "fps=15,scale=480:-1:flags=lanczos,split[s0][s1];[s0]palettegen[p];[s1][p]paletteuse";

/// A preview derived from a primary output file.
#[derive(Debug, Clone)]
pub struct DerivedArtifact {
    /// Key under which the artifact is published ("gif_url", "webp_url", ...)
    pub format_name: String,
    /// Local path of the derived file
    pub path: PathBuf,
    /// MIME type for upload
    pub content_type: String,
}

/// Convert an animated GIF input to MP4 so the processing engine sees a
/// plain video stream.
pub async fn gif_to_mp4(
    runner: &FfmpegRunner,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
) -> MediaResult<PathBuf> {
    let output = output.as_ref().to_path_buf();
    let cmd = FfmpegCommand::new(input.as_ref(), &output)
        .output_args(["-movflags", "+faststart"])
        .output_args(["-pix_fmt", "yuv420p"])
        // libx264 requires even dimensions
        .video_filter("scale=trunc(iw/2)*2:trunc(ih/2)*2")
        .video_codec("libx264");
    runner.run(&cmd).await?;
    Ok(output)
}

/// Render an MP4 back to a palette-optimized GIF.
pub async fn mp4_to_gif(
    runner: &FfmpegRunner,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
) -> MediaResult<PathBuf> {
    let output = output.as_ref().to_path_buf();
    let cmd = FfmpegCommand::new(input.as_ref(), &output)
        .filter_complex(GIF_FILTER)
        .output_args(["-loop", "0"]);
    runner.run(&cmd).await?;
    Ok(output)
}

/// Render an MP4 to an animated WebP.
pub async fn mp4_to_webp(
    runner: &FfmpegRunner,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
) -> MediaResult<PathBuf> {
    let output = output.as_ref().to_path_buf();
    let cmd = FfmpegCommand::new(input.as_ref(), &output)
        .video_filter("fps=10")
        .video_codec("libwebp")
        .output_args(["-lossless", "0"])
        .output_args(["-compression_level", "4"])
        .output_args(["-q:v", "70"])
        .output_args(["-loop", "0"]);
    runner.run(&cmd).await?;
    Ok(output)
}

/// Extract the first frame as a JPEG poster.
pub async fn extract_poster(
    runner: &FfmpegRunner,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
) -> MediaResult<PathBuf> {
    let output = output.as_ref().to_path_buf();
    let cmd = FfmpegCommand::new(input.as_ref(), &output)
        .single_frame()
        .output_args(["-q:v", "2"]);
    runner.run(&cmd).await?;
    Ok(output)
}

/// Derive preview artifacts for an animated MP4 output.
///
/// Each derivation is independent: a failing WebP render does not block the
/// GIF or the poster. Failures are returned so the caller can decide how
/// much degradation it tolerates.
pub async fn derive_previews(
    runner: &FfmpegRunner,
    mp4_path: impl AsRef<Path>,
    out_dir: impl AsRef<Path>,
    stem: &str,
) -> Vec<MediaResult<DerivedArtifact>> {
    let mp4_path = mp4_path.as_ref();
    let out_dir = out_dir.as_ref();
    let mut results = Vec::with_capacity(3);

    let gif_path = out_dir.join(format!("{stem}.gif"));
    results.push(mp4_to_gif(runner, mp4_path, &gif_path).await.map(|path| {
        DerivedArtifact {
            format_name: "gif_url".to_string(),
            path,
            content_type: "image/gif".to_string(),
        }
    }));

    let webp_path = out_dir.join(format!("{stem}.webp"));
    results.push(mp4_to_webp(runner, mp4_path, &webp_path).await.map(|path| {
        DerivedArtifact {
            format_name: "webp_url".to_string(),
            path,
            content_type: "image/webp".to_string(),
        }
    }));

    let poster_path = out_dir.join(format!("{stem}_poster.jpg"));
    results.push(
        extract_poster(runner, mp4_path, &poster_path)
            .await
            .map(|path| DerivedArtifact {
                format_name: "poster_url".to_string(),
                path,
                content_type: "image/jpeg".to_string(),
            }),
    );

    let ok = results.iter().filter(|r| r.is_ok()).count();
    info!(
        "Derived {}/{} preview artifacts for {}",
        ok,
        results.len(),
        mp4_path.display()
    );

    results
}
