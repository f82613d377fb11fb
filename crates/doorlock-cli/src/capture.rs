//! Direct camera access for diagnostics and enrollment, bypassing the daemon.

use anyhow::{anyhow, Context, Result};
use clap::Args;
use doorlock_core::{Embedder, Embedding, ThumbnailEmbedder};
use doorlock_hw::frame::is_dark_frame;
use doorlock_hw::{camera_candidates, open_first, Frame, FrameSource, SourceCandidate};
use std::path::Path;

/// Share of near-black pixels above which a frame counts as dark.
const DARK_PIXEL_SHARE: f32 = 0.95;

/// Frames discarded after opening while exposure settles.
pub const WARMUP_FRAMES: usize = 4;

/// Camera selection, mirroring the daemon's fallback order.
#[derive(Args, Debug, Clone)]
pub struct CameraArgs {
    /// GStreamer launch description tried first; empty to skip
    #[arg(long, default_value = doorlock_hw::pipeline::DEFAULT_PIPELINE)]
    pub pipeline: String,
    /// V4L2 device indices tried after the pipeline
    #[arg(long = "index", value_delimiter = ',', default_values_t = [0u32, 1, 2])]
    pub indices: Vec<u32>,
    /// Fall back to a synthetic test pattern
    #[arg(long)]
    pub synthetic: bool,
}

impl CameraArgs {
    pub fn candidates(&self) -> Vec<SourceCandidate> {
        let pipeline = Some(self.pipeline.trim()).filter(|p| !p.is_empty());
        let mut candidates = camera_candidates(pipeline, &self.indices);
        if self.synthetic {
            candidates.push(SourceCandidate::synthetic(640, 480));
        }
        candidates
    }

    pub fn open(&self) -> Result<Box<dyn FrameSource>> {
        Ok(open_first(self.candidates())?)
    }
}

/// Per-frame diagnostics line.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub sequence: u32,
    pub width: u32,
    pub height: u32,
    pub brightness: f32,
    pub dark: bool,
}

impl FrameReport {
    pub fn of(frame: &Frame) -> Self {
        Self {
            sequence: frame.sequence,
            width: frame.width,
            height: frame.height,
            brightness: frame.avg_brightness(),
            dark: is_dark_frame(&frame.to_gray(), DARK_PIXEL_SHARE),
        }
    }
}

/// Read `count` frames, reporting each. Returns the reports and the last good frame.
pub fn sample(source: &mut dyn FrameSource, count: usize) -> (Vec<FrameReport>, Option<Frame>) {
    let mut reports = Vec::with_capacity(count);
    let mut last = None;

    for i in 0..count {
        match source.read_frame() {
            Ok(frame) => {
                reports.push(FrameReport::of(&frame));
                last = Some(frame);
            }
            Err(e) => tracing::warn!(attempt = i, error = %e, "frame read failed"),
        }
    }

    (reports, last)
}

/// Capture frames until one yields an embedding, skipping dark frames.
pub fn capture_embedding(source: &mut dyn FrameSource, attempts: usize) -> Result<Embedding> {
    let mut embedder = ThumbnailEmbedder::default();

    for _ in 0..WARMUP_FRAMES {
        let _ = source.read_frame();
    }

    for attempt in 0..attempts {
        let frame = match source.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(attempt, error = %e, "frame read failed");
                continue;
            }
        };
        if is_dark_frame(&frame.to_gray(), DARK_PIXEL_SHARE) {
            tracing::debug!(attempt, "dark frame skipped");
            continue;
        }
        match embedder.embed(&frame) {
            Ok(Some(detection)) => return Ok(detection.embedding),
            Ok(None) => tracing::debug!(attempt, "nothing to embed"),
            Err(e) => tracing::warn!(attempt, error = %e, "embedding failed"),
        }
    }

    Err(anyhow!("no usable frame in {attempts} attempts"))
}

pub fn save_png(frame: &Frame, path: &Path) -> Result<()> {
    let image = frame
        .to_image()
        .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;
    image
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use doorlock_hw::synthetic::SyntheticSource;
    use doorlock_hw::PixelLayout;

    fn synthetic_args() -> CameraArgs {
        CameraArgs {
            pipeline: String::new(),
            indices: Vec::new(),
            synthetic: true,
        }
    }

    #[test]
    fn test_candidates_follow_flags() {
        let labels: Vec<_> = synthetic_args()
            .candidates()
            .iter()
            .map(|c| c.label().to_string())
            .collect();
        assert_eq!(labels, vec!["synthetic 640x480"]);
    }

    #[test]
    fn test_sample_reports_every_frame() {
        let mut source = synthetic_args().open().unwrap();
        let (reports, last) = sample(source.as_mut(), 3);
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].width, 640);
        assert!(last.is_some());
        source.close();
    }

    #[test]
    fn test_frame_report_flags_dark_frame() {
        let frame = Frame::new(vec![0; 16], 4, 4, PixelLayout::Gray8, 0).unwrap();
        let report = FrameReport::of(&frame);
        assert!(report.dark);
        assert_eq!(report.brightness, 0.0);
    }

    #[test]
    fn test_capture_embedding_from_synthetic() {
        let mut source = SyntheticSource::new(64, 48);
        let embedding = capture_embedding(&mut source, 5).unwrap();
        assert_eq!(embedding.values.len(), 256);
    }

    #[test]
    fn test_save_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        let frame = Frame::new(vec![200; 4 * 4 * 3], 4, 4, PixelLayout::Rgb24, 0).unwrap();
        save_png(&frame, &path).unwrap();
        assert!(path.exists());
    }
}
