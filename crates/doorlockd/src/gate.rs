use doorlock_core::gallery::load_gallery;
use doorlock_core::{GalleryGate, RecognitionGate, ThumbnailEmbedder, UnavailableGate};
use std::path::Path;

/// Gallery-backed gate when faces are enrolled; otherwise a gate that always fails.
///
/// Returns the gate and the number of enrolled faces it matches against.
pub fn load_gate(gallery_path: &Path, threshold: f32) -> (Box<dyn RecognitionGate>, usize) {
    match load_gallery(gallery_path) {
        Ok(faces) if !faces.is_empty() => {
            let count = faces.len();
            tracing::info!(
                path = %gallery_path.display(),
                faces = count,
                threshold,
                "gallery loaded"
            );
            let gate = GalleryGate::new(ThumbnailEmbedder::default(), faces, threshold);
            (Box::new(gate), count)
        }
        Ok(_) => {
            tracing::warn!(
                path = %gallery_path.display(),
                "no faces enrolled; recognition unavailable"
            );
            (Box::new(UnavailableGate), 0)
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to load gallery; recognition unavailable");
            (Box::new(UnavailableGate), 0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doorlock_core::gallery::enroll;
    use doorlock_core::Embedding;

    #[test]
    fn test_missing_gallery_gives_unavailable_gate() {
        let dir = tempfile::tempdir().unwrap();
        let (gate, count) = load_gate(&dir.path().join("faces.json"), 0.8);
        assert_eq!(count, 0);
        assert_eq!(gate.name(), UnavailableGate.name());
    }

    #[test]
    fn test_corrupt_gallery_gives_unavailable_gate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faces.json");
        std::fs::write(&path, "[").unwrap();
        let (_, count) = load_gate(&path, 0.8);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_enrolled_gallery_gives_gallery_gate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faces.json");
        let embedding = Embedding {
            values: vec![1.0, 0.0],
            model_version: None,
        };
        enroll(&path, "front door", embedding).unwrap();

        let (gate, count) = load_gate(&path, 0.8);
        assert_eq!(count, 1);
        assert_ne!(gate.name(), UnavailableGate.name());
    }
}
