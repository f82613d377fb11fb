//! Enrolled-face gallery persisted as a JSON file.

use crate::types::{Embedding, EnrolledFace};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const GALLERY_FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery io {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("gallery parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported gallery version {0}")]
    UnsupportedVersion(u32),
}

#[derive(Debug, Serialize, Deserialize)]
struct GalleryFile {
    version: u32,
    faces: Vec<EnrolledFace>,
}

/// `$XDG_DATA_HOME/doorlock/faces.json`, falling back to `~/.local/share`.
pub fn default_gallery_path() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("doorlock")
        .join("faces.json")
}

/// Load enrolled faces. A missing file is an empty gallery.
pub fn load_gallery(path: &Path) -> Result<Vec<EnrolledFace>, GalleryError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(GalleryError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };

    let file: GalleryFile = serde_json::from_str(&raw).map_err(|source| GalleryError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    if file.version != GALLERY_FORMAT_VERSION {
        return Err(GalleryError::UnsupportedVersion(file.version));
    }
    Ok(file.faces)
}

/// Write the gallery atomically (temp file + rename), creating parent directories.
pub fn save_gallery(path: &Path, faces: &[EnrolledFace]) -> Result<(), GalleryError> {
    let io_err = |source: std::io::Error| GalleryError::Io {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let file = GalleryFile {
        version: GALLERY_FORMAT_VERSION,
        faces: faces.to_vec(),
    };
    let json = serde_json::to_string_pretty(&file).map_err(|source| GalleryError::Parse {
        path: path.display().to_string(),
        source,
    })?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}

/// Append a new face to the gallery at `path` and return it.
pub fn enroll(path: &Path, label: &str, embedding: Embedding) -> Result<EnrolledFace, GalleryError> {
    let mut faces = load_gallery(path)?;
    let face = EnrolledFace {
        id: uuid::Uuid::new_v4().to_string(),
        label: label.to_string(),
        embedding,
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    faces.push(face.clone());
    save_gallery(path, &faces)?;
    tracing::info!(id = %face.id, label, total = faces.len(), "face enrolled");
    Ok(face)
}
