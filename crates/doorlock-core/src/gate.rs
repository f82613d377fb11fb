//! Recognition gate contract and adapters.
//!
//! A gate looks at one frame and answers match / no match, handing back a
//! (possibly annotated) copy of the frame for display. The control loop owns
//! the decision of whether to call it at all.

use crate::types::{CosineMatcher, Embedding, EnrolledFace, Matcher, Region, Verdict};
use doorlock_hw::Frame;
use thiserror::Error;

const MATCH_COLOR: [u8; 3] = [0, 255, 0];
const NO_MATCH_COLOR: [u8; 3] = [255, 0, 0];
const BOX_THICKNESS: u32 = 3;

#[derive(Error, Debug)]
pub enum GateError {
    #[error("no recognizer configured")]
    NotConfigured,
    #[error("recognition failed: {0}")]
    Failed(String),
}

/// Output of one gate invocation.
#[derive(Debug, Clone)]
pub struct Recognition {
    pub frame: Frame,
    pub verdict: Verdict,
}

/// Face recognition decision function.
pub trait RecognitionGate: Send {
    /// Short name for logs and status.
    fn name(&self) -> &str;

    fn recognize(&mut self, frame: &Frame) -> Result<Recognition, GateError>;
}

/// Adapter turning a closure into a gate.
pub struct FnGate<F> {
    name: String,
    f: F,
}

impl<F> FnGate<F>
where
    F: FnMut(&Frame) -> Result<Recognition, GateError> + Send,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> RecognitionGate for FnGate<F>
where
    F: FnMut(&Frame) -> Result<Recognition, GateError> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn recognize(&mut self, frame: &Frame) -> Result<Recognition, GateError> {
        (self.f)(frame)
    }
}

/// Placeholder used when no recognizer is installed. Every call fails.
#[derive(Debug, Default)]
pub struct UnavailableGate;

impl RecognitionGate for UnavailableGate {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn recognize(&mut self, _frame: &Frame) -> Result<Recognition, GateError> {
        Err(GateError::NotConfigured)
    }
}

/// Where an embedder looked and what it found there.
#[derive(Debug, Clone)]
pub struct Detection {
    pub region: Region,
    pub embedding: Embedding,
}

/// Turns a frame into an embedding of its subject.
pub trait Embedder: Send {
    /// `Ok(None)` means there was nothing to embed (e.g. no face in view).
    fn embed(&mut self, frame: &Frame) -> Result<Option<Detection>, GateError>;
}

/// Gate that compares each frame's embedding against an enrolled gallery.
pub struct GalleryGate<E> {
    embedder: E,
    gallery: Vec<EnrolledFace>,
    threshold: f32,
    matcher: CosineMatcher,
}

impl<E: Embedder> GalleryGate<E> {
    pub fn new(embedder: E, gallery: Vec<EnrolledFace>, threshold: f32) -> Self {
        Self {
            embedder,
            gallery,
            threshold,
            matcher: CosineMatcher,
        }
    }

    pub fn gallery_len(&self) -> usize {
        self.gallery.len()
    }
}

impl<E: Embedder> RecognitionGate for GalleryGate<E> {
    fn name(&self) -> &str {
        "gallery"
    }

    fn recognize(&mut self, frame: &Frame) -> Result<Recognition, GateError> {
        let Some(detection) = self.embedder.embed(frame)? else {
            return Ok(Recognition {
                frame: frame.clone(),
                verdict: Verdict::NoMatch,
            });
        };

        if !self.gallery.is_empty()
            && !self
                .gallery
                .iter()
                .any(|face| detection.embedding.is_comparable(&face.embedding))
        {
            return Err(GateError::Failed(format!(
                "no enrolled face is comparable with {}-value {} embeddings",
                detection.embedding.values.len(),
                detection.embedding.model_version.as_deref().unwrap_or("unversioned"),
            )));
        }

        let result = self
            .matcher
            .compare(&detection.embedding, &self.gallery, self.threshold);
        tracing::debug!(
            matched = result.matched,
            similarity = result.similarity,
            label = ?result.face_label,
            "gallery compare"
        );

        let (verdict, color) = if result.matched {
            (Verdict::Match, MATCH_COLOR)
        } else {
            (Verdict::NoMatch, NO_MATCH_COLOR)
        };

        let mut annotated = frame.clone();
        let r = detection.region;
        annotated.draw_rect(r.x, r.y, r.width, r.height, color, BOX_THICKNESS);

        Ok(Recognition {
            frame: annotated,
            verdict,
        })
    }
}
