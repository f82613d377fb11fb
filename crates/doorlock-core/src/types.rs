use serde::{Deserialize, Serialize};
use std::fmt;

/// Status text shown when a face is recognised.
pub const STATUS_MATCH: &str = "Face ID Found, Unlocking Door!";
/// Status text shown when the gate ran and found no enrolled face.
pub const STATUS_NO_MATCH: &str = "No face ID found";
/// Status text shown when recognition did not run this cycle.
pub const STATUS_DISABLED: &str = "Face recognition disabled";

/// What a gate decided about one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Match,
    NoMatch,
}

/// Per-cycle recognition outcome as seen by the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionOutcome {
    /// The gate was not invoked this cycle, or it failed.
    Disabled,
    Match,
    NoMatch,
}

impl RecognitionOutcome {
    pub fn status_text(self) -> &'static str {
        match self {
            RecognitionOutcome::Disabled => STATUS_DISABLED,
            RecognitionOutcome::Match => STATUS_MATCH,
            RecognitionOutcome::NoMatch => STATUS_NO_MATCH,
        }
    }
}

impl From<Verdict> for RecognitionOutcome {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Match => RecognitionOutcome::Match,
            Verdict::NoMatch => RecognitionOutcome::NoMatch,
        }
    }
}

impl fmt::Display for RecognitionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.status_text())
    }
}

/// Pixel region of a frame that an embedder examined.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Appearance embedding vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Embedder that produced this vector (e.g., "thumbnail16").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Same length and produced by the same embedder.
    pub fn is_comparable(&self, other: &Embedding) -> bool {
        self.values.len() == other.values.len() && self.model_version == other.model_version
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// Vectors of different length score 0.0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return 0.0;
        }

        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }
}

/// An enrolled reference face.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrolledFace {
    pub id: String,
    pub label: String,
    pub embedding: Embedding,
    pub created_at: String,
}

/// Result of matching a live embedding against a gallery.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: bool,
    /// Cosine similarity of the best match [-1, 1].
    pub similarity: f32,
    pub face_id: Option<String>,
    pub face_label: Option<String>,
}

/// Strategy for comparing a live embedding against enrolled faces.
pub trait Matcher {
    fn compare(&self, live: &Embedding, gallery: &[EnrolledFace], threshold: f32) -> MatchResult;
}

/// Cosine similarity matcher.
///
/// Always iterates every gallery entry; there is no early exit on a hit.
/// Entries that are not comparable with the live embedding are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, live: &Embedding, gallery: &[EnrolledFace], threshold: f32) -> MatchResult {
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, face) in gallery.iter().enumerate() {
            if !live.is_comparable(&face.embedding) {
                continue;
            }
            let sim = live.similarity(&face.embedding);
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_sim >= threshold => MatchResult {
                matched: true,
                similarity: best_sim,
                face_id: Some(gallery[idx].id.clone()),
                face_label: Some(gallery[idx].label.clone()),
            },
            _ => MatchResult {
                matched: false,
                similarity: if best_sim == f32::NEG_INFINITY { 0.0 } else { best_sim },
                face_id: None,
                face_label: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding { values: values.to_vec(), model_version: None }
    }

    fn face(id: &str, label: &str, values: &[f32]) -> EnrolledFace {
        EnrolledFace {
            id: id.into(),
            label: label.into(),
            embedding: emb(values),
            created_at: "".into(),
        }
    }

    #[test]
    fn test_status_texts() {
        assert_eq!(RecognitionOutcome::Match.status_text(), "Face ID Found, Unlocking Door!");
        assert_eq!(RecognitionOutcome::NoMatch.status_text(), "No face ID found");
        assert_eq!(RecognitionOutcome::Disabled.status_text(), STATUS_DISABLED);
        assert_eq!(RecognitionOutcome::from(Verdict::Match), RecognitionOutcome::Match);
        assert_eq!(RecognitionOutcome::from(Verdict::NoMatch), RecognitionOutcome::NoMatch);
    }

    #[test]
    fn test_cosine_similarity_identical() {
        assert!((emb(&[1.0, 0.0, 0.0]).similarity(&emb(&[1.0, 0.0, 0.0])) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        assert!((emb(&[1.0, 0.0]).similarity(&emb(&[-1.0, 0.0])) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        assert_eq!(emb(&[0.0, 0.0]).similarity(&emb(&[1.0, 0.0])), 0.0);
    }

    #[test]
    fn test_cosine_matcher_scans_whole_gallery() {
        let gallery = vec![
            face("1", "decoy1", &[0.0, 1.0, 0.0]),
            face("2", "decoy2", &[0.0, 0.0, 1.0]),
            face("3", "front door", &[1.0, 0.0, 0.0]),
        ];

        let result = CosineMatcher.compare(&emb(&[1.0, 0.0, 0.0]), &gallery, 0.5);
        assert!(result.matched);
        assert_eq!(result.face_id.as_deref(), Some("3"));
        assert_eq!(result.face_label.as_deref(), Some("front door"));
    }

    #[test]
    fn test_cosine_matcher_below_threshold() {
        let gallery = vec![face("1", "other", &[0.0, 1.0, 0.0])];
        let result = CosineMatcher.compare(&emb(&[1.0, 0.0, 0.0]), &gallery, 0.5);
        assert!(!result.matched);
        assert!(result.similarity.abs() < 1e-6);
    }

    #[test]
    fn test_prefix_of_longer_vector_is_not_a_match() {
        let mut live = vec![0.0; 256];
        live[0] = 1.0;
        let live = Embedding { values: live, model_version: Some("thumbnail16".into()) };
        let short = EnrolledFace {
            embedding: Embedding { values: vec![1.0, 0.0], model_version: Some("other".into()) },
            ..face("1", "old enrolment", &[])
        };

        assert_eq!(live.similarity(&short.embedding), 0.0);
        let result = CosineMatcher.compare(&live, &[short], 0.5);
        assert!(!result.matched);
        assert!(result.face_id.is_none());
    }

    #[test]
    fn test_different_embedder_is_skipped() {
        let live = Embedding { values: vec![1.0, 0.0], model_version: Some("thumbnail16".into()) };
        let foreign = EnrolledFace {
            embedding: Embedding { values: vec![1.0, 0.0], model_version: Some("other".into()) },
            ..face("1", "foreign", &[])
        };
        assert!(!live.is_comparable(&foreign.embedding));
        assert!(!CosineMatcher.compare(&live, &[foreign], 0.5).matched);
    }

    #[test]
    fn test_cosine_matcher_empty_gallery() {
        let result = CosineMatcher.compare(&emb(&[1.0, 0.0]), &[], 0.5);
        assert!(!result.matched);
        assert_eq!(result.similarity, 0.0);
    }
}
