use crate::control_loop::{LoopHandle, LoopState};
use crate::presentation::{lock_presentation, SharedPresentation};
use doorlock_hw::ActuatorError;
use std::path::PathBuf;
use std::sync::Arc;
use zbus::interface;

pub const BUS_NAME: &str = "org.doorlock.Doorlock1";
pub const OBJECT_PATH: &str = "/org/doorlock/Doorlock1";

/// D-Bus command surface of the door lock daemon.
///
/// Bus name: org.doorlock.Doorlock1
/// Object path: /org/doorlock/Doorlock1
pub struct DoorlockService {
    handle: LoopHandle,
    presentation: SharedPresentation,
    gallery: Option<Arc<GallerySettings>>,
}

struct GallerySettings {
    path: PathBuf,
    threshold: f32,
}

impl DoorlockService {
    pub fn new(handle: LoopHandle, presentation: SharedPresentation) -> Self {
        Self {
            handle,
            presentation,
            gallery: None,
        }
    }

    /// Enable `ReloadGallery` against the gallery file at `path`.
    pub fn with_gallery(mut self, path: PathBuf, threshold: f32) -> Self {
        self.gallery = Some(Arc::new(GallerySettings { path, threshold }));
        self
    }

    /// Run a manual actuator command off the async runtime; moves block for the settle time.
    async fn actuate<F>(&self, command: F) -> zbus::fdo::Result<()>
    where
        F: FnOnce(&LoopHandle) -> Result<(), ActuatorError> + Send + 'static,
    {
        let handle = self.handle.clone();
        tokio::task::spawn_blocking(move || command(&handle))
            .await
            .map_err(|e| zbus::fdo::Error::Failed(format!("actuator task failed: {e}")))?
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }
}

#[interface(name = "org.doorlock.Doorlock1")]
impl DoorlockService {
    /// Enable face recognition from the next tick on.
    async fn start_recognition(&self) {
        self.handle.start_recognition();
    }

    /// Disable face recognition; the lock keeps its current state.
    async fn stop_recognition(&self) {
        self.handle.stop_recognition();
    }

    async fn manual_unlock(&self) -> zbus::fdo::Result<()> {
        self.actuate(LoopHandle::manual_unlock).await
    }

    async fn manual_lock(&self) -> zbus::fdo::Result<()> {
        self.actuate(LoopHandle::manual_lock).await
    }

    /// Re-read the gallery file and swap in a fresh gate. Returns the enrolled face count.
    async fn reload_gallery(&self) -> zbus::fdo::Result<u32> {
        let Some(gallery) = self.gallery.clone() else {
            return Err(zbus::fdo::Error::NotSupported("no gallery configured".into()));
        };
        let handle = self.handle.clone();
        tokio::task::spawn_blocking(move || {
            let (gate, count) = crate::gate::load_gate(&gallery.path, gallery.threshold);
            handle.replace_gate(gate);
            count as u32
        })
        .await
        .map_err(|e| zbus::fdo::Error::Failed(format!("gallery reload failed: {e}")))
    }

    /// Return daemon status as a JSON object.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(status_json(&self.handle, &self.presentation).to_string())
    }

    /// Write the most recently presented frame to `path` as PNG.
    ///
    /// Returns false when no frame has been presented yet.
    async fn save_snapshot(&self, path: &str) -> zbus::fdo::Result<bool> {
        let Some(frame) = lock_presentation(&self.presentation).latest_frame().cloned() else {
            tracing::info!(path, "snapshot requested before first frame");
            return Ok(false);
        };

        let path = PathBuf::from(path);
        tokio::task::spawn_blocking(move || {
            let image = frame
                .to_image()
                .ok_or_else(|| "frame buffer does not match its dimensions".to_string())?;
            image.save(&path).map_err(|e| e.to_string())?;
            tracing::info!(path = %path.display(), sequence = frame.sequence, "snapshot saved");
            Ok::<_, String>(())
        })
        .await
        .map_err(|e| zbus::fdo::Error::Failed(format!("snapshot task failed: {e}")))?
        .map_err(zbus::fdo::Error::Failed)?;

        Ok(true)
    }
}

/// Snapshot of daemon state. Reads only atomics and small mirrors, never the
/// gate or actuator, so it returns while a tick is recognising or settling.
pub fn status_json(handle: &LoopHandle, presentation: &SharedPresentation) -> serde_json::Value {
    let stats = handle.stats();
    let presentation = lock_presentation(presentation);
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "loop": match handle.state() {
            LoopState::Running => "running",
            LoopState::Idle => "idle",
        },
        "recognition_enabled": handle.recognition_enabled(),
        "gate": handle.gate_name(),
        "lock": handle
            .lock_state()
            .map_or_else(|| "unknown".to_string(), |state| state.to_string()),
        "status": presentation.status(),
        "frames_presented": presentation.frames_presented(),
        "ticks_completed": stats.ticks_completed,
        "ticks_skipped": stats.ticks_skipped,
        "gate_failures": stats.gate_failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_loop::{ControlLoop, LoopConfig};
    use crate::presentation::{ChannelSink, Update};
    use doorlock_core::{FnGate, Recognition, UnavailableGate, Verdict};
    use doorlock_hw::mock::{mock_devices, DeviceEvent};
    use doorlock_hw::{Calibration, Frame, LockActuator, LockState, PixelLayout, SourceCandidate};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};

    fn idle_loop() -> ControlLoop {
        let (servo, indicator, _) = mock_devices();
        let calibration = Calibration {
            settle: Duration::ZERO,
            ..Calibration::default()
        };
        let actuator = LockActuator::new(Box::new(servo), Box::new(indicator), calibration);
        let (sink, _rx) = ChannelSink::new(1);
        ControlLoop::new(
            LoopConfig {
                interval: Duration::from_millis(10),
                recognition_enabled: false,
            },
            Vec::new(),
            Box::new(UnavailableGate),
            actuator,
            Box::new(sink),
        )
    }

    #[test]
    fn test_status_json_fields() {
        let control = idle_loop();
        let presentation = SharedPresentation::default();
        let status = status_json(&control.handle(), &presentation);

        assert_eq!(status["loop"], "idle");
        assert_eq!(status["recognition_enabled"], false);
        assert_eq!(status["lock"], "unknown");
        assert_eq!(status["status"], "Waiting for camera");
        assert_eq!(status["ticks_completed"], 0);
    }

    #[tokio::test]
    async fn test_manual_commands_and_snapshot() {
        let control = idle_loop();
        let presentation = SharedPresentation::default();
        let service = DoorlockService::new(control.handle(), presentation.clone());

        service.manual_unlock().await.unwrap();
        assert_eq!(control.handle().lock_state(), Some(LockState::Unlocked));
        service.manual_lock().await.unwrap();
        assert_eq!(control.handle().lock_state(), Some(LockState::Locked));
        assert_eq!(status_json(&control.handle(), &presentation)["lock"], "locked");

        service.start_recognition().await;
        assert!(control.handle().recognition_enabled());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.png");
        let path_str = path.to_str().unwrap().to_string();
        assert!(!service.save_snapshot(&path_str).await.unwrap());

        let frame = Frame::new(vec![128; 3 * 4 * 4], 4, 4, PixelLayout::Rgb24, 1).unwrap();
        lock_presentation(&presentation).apply(Update::Frame(frame));
        assert!(service.save_snapshot(&path_str).await.unwrap());
        assert!(path.exists());
    }

    /// Time a status query; it must not wait for the in-flight tick.
    fn timed_status(handle: &LoopHandle, presentation: &SharedPresentation) -> (serde_json::Value, Duration) {
        let start = Instant::now();
        let status = status_json(handle, presentation);
        (status, start.elapsed())
    }

    #[test]
    fn test_status_answers_during_recognition_and_settle() {
        const SLOW: Duration = Duration::from_millis(400);
        let entered = Arc::new(AtomicBool::new(false));
        let flag = entered.clone();
        let gate = FnGate::new("slow", move |frame: &Frame| {
            flag.store(true, Ordering::SeqCst);
            std::thread::sleep(SLOW);
            Ok(Recognition { frame: frame.clone(), verdict: Verdict::Match })
        });
        let (servo, indicator, devices) = mock_devices();
        let calibration = Calibration {
            settle: SLOW,
            ..Calibration::default()
        };
        let actuator = LockActuator::new(Box::new(servo), Box::new(indicator), calibration);
        let (sink, _rx) = ChannelSink::new(4);
        let control = ControlLoop::new(
            LoopConfig {
                interval: Duration::from_millis(10),
                recognition_enabled: true,
            },
            vec![SourceCandidate::synthetic(8, 8)],
            Box::new(gate),
            actuator,
            Box::new(sink),
        );
        let running = control.start().unwrap();
        let handle = running.handle();
        let presentation = SharedPresentation::default();
        let deadline = Instant::now() + Duration::from_secs(5);

        while !entered.load(Ordering::SeqCst) {
            assert!(Instant::now() < deadline, "gate never ran");
            std::thread::sleep(Duration::from_millis(1));
        }
        let (status, elapsed) = timed_status(&handle, &presentation);
        assert!(elapsed < Duration::from_millis(100), "status waited {elapsed:?} on the gate");
        assert_eq!(status["gate"], "slow");
        assert_eq!(status["lock"], "unknown");

        while !devices.events().contains(&DeviceEvent::Position(-1.0)) {
            assert!(Instant::now() < deadline, "servo never moved");
            std::thread::sleep(Duration::from_millis(1));
        }
        let (status, elapsed) = timed_status(&handle, &presentation);
        assert!(elapsed < Duration::from_millis(100), "status waited {elapsed:?} on the settle");
        assert_eq!(status["loop"], "running");

        running.stop();
        let status = status_json(&handle, &presentation);
        assert_eq!(status["loop"], "idle");
        assert_eq!(status["lock"], "unlocked");
    }

    #[tokio::test]
    async fn test_manual_command_after_release_fails() {
        let control = idle_loop();
        let service = DoorlockService::new(control.handle(), SharedPresentation::default());
        control.handle().release_actuator().unwrap();

        assert!(service.manual_unlock().await.is_err());
    }

    #[tokio::test]
    async fn test_reload_gallery_swaps_gate() {
        let control = idle_loop();
        let service = DoorlockService::new(control.handle(), SharedPresentation::default());
        assert!(service.reload_gallery().await.is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faces.json");
        let embedding = doorlock_core::Embedding {
            values: vec![0.0, 1.0],
            model_version: None,
        };
        doorlock_core::gallery::enroll(&path, "porch", embedding).unwrap();

        let service = service.with_gallery(path, 0.8);
        assert_eq!(service.reload_gallery().await.unwrap(), 1);
        assert_eq!(control.handle().gate_name(), "gallery");
    }
}
