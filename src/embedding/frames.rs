//! Representative-frame extraction for video files.
//!
//! Videos are embedded with the image provider, so they first need to become an
//! image. How many frames to sample is a [`FrameSampler`] decision; the default
//! takes a single frame from the middle of the clip.

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat};

pub trait FrameSampler: Send + Sync {
    fn sample(&self, path: &Path) -> Result<DynamicImage>;
}

/// Extracts the midpoint frame with the `ffmpeg`/`ffprobe` binaries.
#[derive(Debug, Clone, Default)]
pub struct FfmpegFrameSampler;

impl FfmpegFrameSampler {
    /// Duration in seconds via ffprobe, `None` if it cannot be determined.
    fn duration_secs(path: &Path) -> Option<f64> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output()
            .ok()?;

        if !output.status.success() {
            return None;
        }

        String::from_utf8_lossy(&output.stdout).trim().parse().ok()
    }
}

impl FrameSampler for FfmpegFrameSampler {
    fn sample(&self, path: &Path) -> Result<DynamicImage> {
        let midpoint = Self::duration_secs(path)
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| d / 2.0)
            .unwrap_or(0.0);

        let output = Command::new("ffmpeg")
            .args(["-v", "error", "-ss", &format!("{midpoint:.3}"), "-i"])
            .arg(path)
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"])
            .output()
            .context("failed to run ffmpeg (is it installed?)")?;

        anyhow::ensure!(
            output.status.success() && !output.stdout.is_empty(),
            "ffmpeg could not extract a frame: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );

        image::load_from_memory_with_format(&output.stdout, ImageFormat::Png)
            .context("failed to decode extracted frame")
    }
}
