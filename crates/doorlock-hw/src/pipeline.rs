//! Pipeline-based capture through GStreamer.
//!
//! Only available with the `pipeline-gstreamer` feature. Without it, opening
//! always fails with [`CaptureError::BackendUnavailable`] so the fallback list
//! moves on to the indexed V4L2 candidates.

use crate::frame::Frame;
use crate::source::{CaptureError, FrameSource};

/// Default libcamera pipeline for a Raspberry Pi camera module.
pub const DEFAULT_PIPELINE: &str = "libcamerasrc ! \
     video/x-raw,format=RGB,width=640,height=480,framerate=30/1 ! \
     videoconvert ! appsink name=appsink";

/// Frames pulled from the `appsink` element of a launch pipeline.
pub struct PipelineSource {
    description: String,
    #[cfg(feature = "pipeline-gstreamer")]
    inner: Option<gst::GstPipeline>,
    #[cfg(feature = "pipeline-gstreamer")]
    sequence: u32,
}

impl PipelineSource {
    /// Build and start the pipeline. The description must contain an
    /// `appsink name=appsink` element.
    #[cfg(feature = "pipeline-gstreamer")]
    pub fn open(description: &str) -> Result<Self, CaptureError> {
        let inner = gst::GstPipeline::start(description)?;
        tracing::info!(pipeline = description, "pipeline playing");
        Ok(Self {
            description: description.to_string(),
            inner: Some(inner),
            sequence: 0,
        })
    }

    #[cfg(not(feature = "pipeline-gstreamer"))]
    pub fn open(description: &str) -> Result<Self, CaptureError> {
        tracing::debug!(pipeline = description, "pipeline backend not compiled in");
        Err(CaptureError::BackendUnavailable(
            "built without the pipeline-gstreamer feature".to_string(),
        ))
    }
}

impl FrameSource for PipelineSource {
    fn describe(&self) -> String {
        format!("pipeline `{}`", self.description)
    }

    #[cfg(feature = "pipeline-gstreamer")]
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        let inner = self.inner.as_mut().ok_or(CaptureError::Closed)?;
        let frame = inner.pull_frame(self.sequence)?;
        self.sequence = self.sequence.wrapping_add(1);
        Ok(frame)
    }

    #[cfg(not(feature = "pipeline-gstreamer"))]
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        Err(CaptureError::Closed)
    }

    fn close(&mut self) {
        #[cfg(feature = "pipeline-gstreamer")]
        if let Some(inner) = self.inner.take() {
            inner.stop();
            tracing::info!(pipeline = %self.description, "pipeline stopped");
        }
    }
}

#[cfg(feature = "pipeline-gstreamer")]
mod gst {
    use crate::frame::{self, Frame, PixelLayout};
    use crate::source::CaptureError;
    use gstreamer::prelude::*;

    /// How long a pipeline may take to reach Playing before the open fails.
    const START_TIMEOUT_SECS: u64 = 5;

    pub(super) struct GstPipeline {
        pipeline: gstreamer::Pipeline,
        appsink: gstreamer_app::AppSink,
    }

    impl GstPipeline {
        pub(super) fn start(description: &str) -> Result<Self, CaptureError> {
            gstreamer::init()
                .map_err(|e| CaptureError::BackendUnavailable(format!("gstreamer init: {e}")))?;

            let pipeline = gstreamer::parse::launch(description)
                .map_err(|e| CaptureError::DeviceNotFound(format!("parse pipeline: {e}")))?
                .downcast::<gstreamer::Pipeline>()
                .map_err(|_| CaptureError::DeviceNotFound("description is not a pipeline".into()))?;

            let appsink = pipeline
                .by_name("appsink")
                .ok_or_else(|| {
                    CaptureError::DeviceNotFound("pipeline has no `appsink name=appsink`".into())
                })?
                .downcast::<gstreamer_app::AppSink>()
                .map_err(|_| CaptureError::DeviceNotFound("`appsink` is not an AppSink".into()))?;

            let caps = gstreamer::Caps::builder("video/x-raw")
                .field("format", "RGB")
                .build();
            appsink.set_caps(Some(&caps));
            appsink.set_max_buffers(1);
            appsink.set_drop(true);
            appsink.set_sync(false);

            // Live sources answer Async or NoPreroll; only a settled Playing counts as open.
            if let Err(e) = Self::reach_playing(&pipeline) {
                if let Err(stop) = pipeline.set_state(gstreamer::State::Null) {
                    tracing::warn!(error = %stop, "failed to tear down pipeline");
                }
                return Err(e);
            }

            Ok(Self { pipeline, appsink })
        }

        fn reach_playing(pipeline: &gstreamer::Pipeline) -> Result<(), CaptureError> {
            pipeline
                .set_state(gstreamer::State::Playing)
                .map_err(|e| CaptureError::DeviceNotFound(format!("start pipeline: {e}")))?;

            let (result, current, _pending) =
                pipeline.state(gstreamer::ClockTime::from_seconds(START_TIMEOUT_SECS));
            match result {
                Ok(gstreamer::StateChangeSuccess::Success | gstreamer::StateChangeSuccess::NoPreroll)
                    if current == gstreamer::State::Playing =>
                {
                    Ok(())
                }
                Ok(gstreamer::StateChangeSuccess::Async) => Err(CaptureError::DeviceNotFound(format!(
                    "pipeline did not reach Playing within {START_TIMEOUT_SECS}s"
                ))),
                Ok(_) => Err(CaptureError::DeviceNotFound(format!(
                    "pipeline settled in {current:?} instead of Playing"
                ))),
                Err(e) => Err(CaptureError::DeviceNotFound(format!("start pipeline: {e}"))),
            }
        }

        pub(super) fn pull_frame(&mut self, sequence: u32) -> Result<Frame, CaptureError> {
            let sample = self
                .appsink
                .pull_sample()
                .map_err(|_| CaptureError::CaptureFailed("pipeline reached EOS or errored".into()))?;

            let buffer = sample
                .buffer()
                .ok_or_else(|| CaptureError::CaptureFailed("sample missing buffer".into()))?;
            let caps = sample
                .caps()
                .ok_or_else(|| CaptureError::CaptureFailed("sample missing caps".into()))?;
            let info = gstreamer_video::VideoInfo::from_caps(caps)
                .map_err(|e| CaptureError::CaptureFailed(format!("parse caps: {e}")))?;

            let width = info.width();
            let height = info.height();
            let row_bytes = width as usize * 3;
            let stride = info.stride()[0] as usize;

            let map = buffer
                .map_readable()
                .map_err(|e| CaptureError::CaptureFailed(format!("map buffer: {e}")))?;
            let pixels = frame::pack_rows(map.as_slice(), row_bytes, stride, height as usize)
                .map_err(|e| CaptureError::CaptureFailed(format!("pipeline buffer: {e}")))?;

            Frame::new(pixels, width, height, PixelLayout::Rgb24, sequence)
                .map_err(|e| CaptureError::CaptureFailed(e.to_string()))
        }

        pub(super) fn stop(self) {
            if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
                tracing::warn!(error = %e, "failed to stop pipeline");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pipeline_names_appsink() {
        assert!(DEFAULT_PIPELINE.contains("appsink name=appsink"));
        assert!(DEFAULT_PIPELINE.starts_with("libcamerasrc"));
    }

    #[cfg(feature = "pipeline-gstreamer")]
    #[test]
    fn test_open_fails_when_pipeline_cannot_play() {
        // Either the element is missing or it cannot open the device; both must fail the open.
        let result = PipelineSource::open("v4l2src device=/dev/video-doorlock-missing ! appsink name=appsink");
        assert!(matches!(
            result,
            Err(CaptureError::DeviceNotFound(_) | CaptureError::BackendUnavailable(_))
        ));
    }

    #[cfg(not(feature = "pipeline-gstreamer"))]
    #[test]
    fn test_open_without_feature_is_unavailable() {
        let result = PipelineSource::open(DEFAULT_PIPELINE);
        assert!(matches!(result, Err(CaptureError::BackendUnavailable(_))));
    }
}
