//! Coarse appearance embedder: a normalised grey thumbnail of the frame centre.
//!
//! Not a biometric. It tells "the enrolled scene" from "something else" well
//! enough to exercise the whole capture → gate → lock path on a bench.

use crate::gate::{Detection, Embedder, GateError};
use crate::types::{Embedding, Region};
use doorlock_hw::Frame;

pub const THUMBNAIL_MODEL_VERSION: &str = "thumbnail16";
const THUMBNAIL_SIZE: usize = 16;
const DEFAULT_CROP_FRACTION: f32 = 0.6;

#[derive(Debug, Clone, Copy)]
pub struct ThumbnailEmbedder {
    /// Side of the centred square crop, as a fraction of the shorter frame side.
    crop_fraction: f32,
}

impl Default for ThumbnailEmbedder {
    fn default() -> Self {
        Self {
            crop_fraction: DEFAULT_CROP_FRACTION,
        }
    }
}

impl ThumbnailEmbedder {
    pub fn with_crop_fraction(crop_fraction: f32) -> Self {
        Self {
            crop_fraction: crop_fraction.clamp(0.05, 1.0),
        }
    }

    /// Centred square crop examined for a frame of the given size.
    pub fn region(&self, width: u32, height: u32) -> Region {
        let side = ((width.min(height) as f32 * self.crop_fraction) as u32).max(1);
        Region {
            x: (width.saturating_sub(side)) / 2,
            y: (height.saturating_sub(side)) / 2,
            width: side,
            height: side,
        }
    }
}

impl Embedder for ThumbnailEmbedder {
    fn embed(&mut self, frame: &Frame) -> Result<Option<Detection>, GateError> {
        if frame.width == 0 || frame.height == 0 {
            return Err(GateError::Failed("empty frame".into()));
        }

        let gray = frame.to_gray();
        let region = self.region(frame.width, frame.height);
        let w = frame.width as usize;

        // Box-average the crop down to THUMBNAIL_SIZE x THUMBNAIL_SIZE.
        let mut sums = [0f32; THUMBNAIL_SIZE * THUMBNAIL_SIZE];
        let mut counts = [0u32; THUMBNAIL_SIZE * THUMBNAIL_SIZE];
        let side = region.width as usize;
        for dy in 0..side {
            let ty = dy * THUMBNAIL_SIZE / side;
            let row = (region.y as usize + dy) * w;
            for dx in 0..side {
                let tx = dx * THUMBNAIL_SIZE / side;
                let cell = ty * THUMBNAIL_SIZE + tx;
                sums[cell] += gray[row + region.x as usize + dx] as f32;
                counts[cell] += 1;
            }
        }

        let mut values: Vec<f32> = sums
            .iter()
            .zip(counts.iter())
            .filter(|&(_, &n)| n > 0)
            .map(|(&s, &n)| s / n as f32)
            .collect();

        let mean = values.iter().sum::<f32>() / values.len() as f32;
        values.iter_mut().for_each(|v| *v -= mean);
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm < 1e-3 {
            // Featureless crop (lens cap, blank wall): nothing to compare.
            return Ok(None);
        }
        values.iter_mut().for_each(|v| *v /= norm);

        Ok(Some(Detection {
            region,
            embedding: Embedding {
                values,
                model_version: Some(THUMBNAIL_MODEL_VERSION.to_string()),
            },
        }))
    }
}
