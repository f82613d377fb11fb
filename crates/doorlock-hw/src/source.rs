//! Frame source contract and ordered backend fallback.
//!
//! A [`SourceCandidate`] is a named constructor for one backend. The control
//! loop is handed an ordered list of candidates and keeps the first one that
//! opens; later candidates are never tried once one succeeds.

use crate::frame::Frame;
use std::fmt;
use thiserror::Error;

/// Failure of a single backend, either while opening or while reading a frame.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("source already closed")]
    Closed,
}

/// No candidate backend could be opened.
#[derive(Debug)]
pub struct SourceError {
    /// Every attempt in order, with the reason it failed.
    pub attempts: Vec<(String, CaptureError)>,
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attempts.is_empty() {
            return write!(f, "source unavailable: no camera candidates configured");
        }
        write!(f, "source unavailable:")?;
        for (label, err) in &self.attempts {
            write!(f, " [{label}: {err}]")?;
        }
        Ok(())
    }
}

impl std::error::Error for SourceError {}

/// An opened camera backend.
pub trait FrameSource: Send {
    /// Human-readable description of the opened backend.
    fn describe(&self) -> String;

    /// Block until the next frame is available.
    fn read_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Release the underlying device. Reads after close fail with [`CaptureError::Closed`].
    fn close(&mut self);
}

type OpenFn = Box<dyn FnOnce() -> Result<Box<dyn FrameSource>, CaptureError> + Send>;

/// A named, not-yet-opened backend.
pub struct SourceCandidate {
    label: String,
    open: OpenFn,
}

impl SourceCandidate {
    pub fn new<F>(label: impl Into<String>, open: F) -> Self
    where
        F: FnOnce() -> Result<Box<dyn FrameSource>, CaptureError> + Send + 'static,
    {
        Self {
            label: label.into(),
            open: Box::new(open),
        }
    }

    /// Pipeline backend built from a GStreamer launch description.
    pub fn pipeline(description: &str) -> Self {
        let description = description.to_string();
        Self::new(format!("pipeline `{description}`"), move || {
            crate::pipeline::PipelineSource::open(&description)
                .map(|s| Box::new(s) as Box<dyn FrameSource>)
        })
    }

    /// Indexed V4L2 backend (`/dev/video{index}`).
    pub fn v4l2_index(index: u32) -> Self {
        Self::new(format!("/dev/video{index}"), move || {
            crate::camera::V4l2Camera::open_index(index).map(|s| Box::new(s) as Box<dyn FrameSource>)
        })
    }

    /// Synthetic test pattern.
    pub fn synthetic(width: u32, height: u32) -> Self {
        Self::new(format!("synthetic {width}x{height}"), move || {
            Ok(Box::new(crate::synthetic::SyntheticSource::new(width, height)) as Box<dyn FrameSource>)
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for SourceCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceCandidate")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Standard fallback order: the pipeline (if any) first, then each V4L2 index in order.
pub fn camera_candidates(pipeline: Option<&str>, indices: &[u32]) -> Vec<SourceCandidate> {
    pipeline
        .map(SourceCandidate::pipeline)
        .into_iter()
        .chain(indices.iter().copied().map(SourceCandidate::v4l2_index))
        .collect()
}

/// Try each candidate in order and return the first that opens.
pub fn open_first(candidates: Vec<SourceCandidate>) -> Result<Box<dyn FrameSource>, SourceError> {
    let mut attempts = Vec::new();

    for candidate in candidates {
        let SourceCandidate { label, open } = candidate;
        match open() {
            Ok(source) => {
                tracing::info!(candidate = %label, source = %source.describe(), "frame source opened");
                return Ok(source);
            }
            Err(e) => {
                tracing::debug!(candidate = %label, error = %e, "frame source candidate failed");
                attempts.push((label, e));
            }
        }
    }

    Err(SourceError { attempts })
}
