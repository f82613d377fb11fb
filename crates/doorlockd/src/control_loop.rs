//! The capture → recognise → actuate → present cycle.
//!
//! A [`ControlLoop`] starts Idle. [`ControlLoop::start`] opens the first
//! working frame source and runs the cycle on a dedicated OS thread until the
//! returned [`RunningLoop`] is stopped or dropped. A stopped loop cannot be
//! restarted.
//!
//! Commands from other threads go through a [`LoopHandle`]: the recognition
//! flag is an atomic read once per tick, and manual lock/unlock calls share
//! the actuator mutex with the cycle so moves never overlap. Status queries
//! read mirrored copies of the lock state and gate name, never the gate or
//! actuator mutexes, so they answer while a recognition or a move is in
//! flight.

use crate::presentation::PresentationSink;
use doorlock_core::{RecognitionGate, RecognitionOutcome};
use doorlock_hw::{
    open_first, ActuatorError, Frame, FrameSource, LockActuator, LockState, SourceCandidate,
    SourceError,
};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoopError {
    #[error(transparent)]
    SourceUnavailable(#[from] SourceError),
    #[error("failed to spawn capture thread: {0}")]
    Spawn(std::io::Error),
}

/// Fixed settings for one loop instance.
#[derive(Debug, Clone, Copy)]
pub struct LoopConfig {
    /// Sleep between ticks. Drift is not compensated.
    pub interval: Duration,
    /// Whether recognition starts enabled.
    pub recognition_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
}

/// Counters since the loop was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks_completed: u64,
    pub ticks_skipped: u64,
    pub gate_failures: u64,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickReport {
    /// Frame read failed; nothing else ran.
    Skipped,
    Completed(RecognitionOutcome),
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn encode_lock_state(state: Option<LockState>) -> u8 {
    match state {
        None => 0,
        Some(LockState::Locked) => 1,
        Some(LockState::Unlocked) => 2,
    }
}

fn decode_lock_state(raw: u8) -> Option<LockState> {
    match raw {
        1 => Some(LockState::Locked),
        2 => Some(LockState::Unlocked),
        _ => None,
    }
}

struct Shared {
    enabled: AtomicBool,
    stop: AtomicBool,
    running: AtomicBool,
    gate: Mutex<Box<dyn RecognitionGate>>,
    actuator: Mutex<LockActuator>,
    /// Mirror of the actuator's state, written after every move attempt.
    lock_state: AtomicU8,
    /// Mirror of the current gate's name, written by `replace_gate`.
    gate_name: Mutex<String>,
    ticks_completed: AtomicU64,
    ticks_skipped: AtomicU64,
    gate_failures: AtomicU64,
    consecutive_gate_failures: AtomicU64,
}

impl Shared {
    fn new(recognition_enabled: bool, gate: Box<dyn RecognitionGate>, actuator: LockActuator) -> Self {
        Self {
            enabled: AtomicBool::new(recognition_enabled),
            stop: AtomicBool::new(false),
            running: AtomicBool::new(false),
            lock_state: AtomicU8::new(encode_lock_state(actuator.state())),
            gate_name: Mutex::new(gate.name().to_string()),
            gate: Mutex::new(gate),
            actuator: Mutex::new(actuator),
            ticks_completed: AtomicU64::new(0),
            ticks_skipped: AtomicU64::new(0),
            gate_failures: AtomicU64::new(0),
            consecutive_gate_failures: AtomicU64::new(0),
        }
    }

    /// Move the lock under the actuator mutex and publish the resulting state.
    fn actuate(&self, target: LockState) -> Result<(), ActuatorError> {
        let mut actuator = lock(&self.actuator);
        let result = match target {
            LockState::Locked => actuator.lock(),
            LockState::Unlocked => actuator.unlock(),
        };
        self.lock_state
            .store(encode_lock_state(actuator.state()), Ordering::Release);
        result
    }
}

/// Cloneable command handle into a loop.
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<Shared>,
}

impl LoopHandle {
    pub fn start_recognition(&self) {
        if !self.shared.enabled.swap(true, Ordering::AcqRel) {
            tracing::info!("recognition enabled");
        }
    }

    pub fn stop_recognition(&self) {
        if self.shared.enabled.swap(false, Ordering::AcqRel) {
            tracing::info!("recognition disabled");
        }
    }

    pub fn recognition_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    /// Unlock now, bypassing the gate. Blocks for the settle time.
    pub fn manual_unlock(&self) -> Result<(), ActuatorError> {
        tracing::info!("manual unlock");
        self.shared.actuate(LockState::Unlocked)
    }

    /// Lock now, bypassing the gate. Blocks for the settle time.
    pub fn manual_lock(&self) -> Result<(), ActuatorError> {
        tracing::info!("manual lock");
        self.shared.actuate(LockState::Locked)
    }

    /// Last commanded lock state, `None` until the first move completes.
    pub fn lock_state(&self) -> Option<LockState> {
        decode_lock_state(self.shared.lock_state.load(Ordering::Acquire))
    }

    /// Swap in a different gate; takes effect on the next tick that recognises.
    ///
    /// Waits for an in-flight recognition to finish.
    pub fn replace_gate(&self, gate: Box<dyn RecognitionGate>) -> Box<dyn RecognitionGate> {
        let mut current = lock(&self.shared.gate);
        tracing::info!(gate = gate.name(), "recognition gate replaced");
        *lock(&self.shared.gate_name) = gate.name().to_string();
        std::mem::replace(&mut *current, gate)
    }

    pub fn gate_name(&self) -> String {
        lock(&self.shared.gate_name).clone()
    }

    pub fn state(&self) -> LoopState {
        if self.shared.running.load(Ordering::Acquire) {
            LoopState::Running
        } else {
            LoopState::Idle
        }
    }

    pub fn stats(&self) -> LoopStats {
        LoopStats {
            ticks_completed: self.shared.ticks_completed.load(Ordering::Relaxed),
            ticks_skipped: self.shared.ticks_skipped.load(Ordering::Relaxed),
            gate_failures: self.shared.gate_failures.load(Ordering::Relaxed),
        }
    }

    /// Release the servo and indicator. Later lock/unlock calls fail with `DeviceClosed`.
    pub fn release_actuator(&self) -> Result<(), ActuatorError> {
        lock(&self.shared.actuator).cleanup()
    }
}

/// A loop in the Idle state.
pub struct ControlLoop {
    config: LoopConfig,
    candidates: Vec<SourceCandidate>,
    sink: Box<dyn PresentationSink>,
    shared: Arc<Shared>,
}

impl ControlLoop {
    pub fn new(
        config: LoopConfig,
        candidates: Vec<SourceCandidate>,
        gate: Box<dyn RecognitionGate>,
        actuator: LockActuator,
        sink: Box<dyn PresentationSink>,
    ) -> Self {
        Self {
            config,
            candidates,
            sink,
            shared: Arc::new(Shared::new(config.recognition_enabled, gate, actuator)),
        }
    }

    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            shared: self.shared.clone(),
        }
    }

    /// Open a frame source and enter Running.
    ///
    /// Fails without starting if no candidate source opens.
    pub fn start(self) -> Result<RunningLoop, LoopError> {
        let source = OpenSource(open_first(self.candidates)?);
        let shared = self.shared.clone();
        let sink = self.sink;
        let interval = self.config.interval;

        self.shared.running.store(true, Ordering::Release);
        let spawned = std::thread::Builder::new()
            .name("doorlock-cycle".into())
            .spawn(move || run_cycle(shared, source, sink, interval));

        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                return Err(LoopError::Spawn(e));
            }
        };

        Ok(RunningLoop {
            handle: LoopHandle {
                shared: self.shared,
            },
            thread: Some(thread),
        })
    }
}

/// A loop in the Running state. Dropping it stops the loop.
pub struct RunningLoop {
    handle: LoopHandle,
    thread: Option<JoinHandle<()>>,
}

impl RunningLoop {
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Finish the in-flight tick, close the source and return to Idle.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.handle.shared.stop.store(true, Ordering::Release);
        if thread.join().is_err() {
            tracing::error!("capture thread panicked");
        }
        self.handle.shared.running.store(false, Ordering::Release);
    }
}

impl Drop for RunningLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Closes the wrapped source when dropped, including during unwinding.
struct OpenSource(Box<dyn FrameSource>);

impl Drop for OpenSource {
    fn drop(&mut self) {
        self.0.close();
    }
}

fn run_cycle(
    shared: Arc<Shared>,
    mut source: OpenSource,
    sink: Box<dyn PresentationSink>,
    interval: Duration,
) {
    tracing::info!(
        source = %source.0.describe(),
        interval_ms = interval.as_millis() as u64,
        "capture cycle started"
    );

    while !shared.stop.load(Ordering::Acquire) {
        run_tick(&shared, source.0.as_mut(), sink.as_ref());
        std::thread::sleep(interval);
    }

    drop(source);
    shared.running.store(false, Ordering::Release);
    tracing::info!("capture cycle stopped");
}

/// One cycle: read, maybe recognise, actuate, present.
fn run_tick(shared: &Shared, source: &mut dyn FrameSource, sink: &dyn PresentationSink) -> TickReport {
    let frame = match source.read_frame() {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(error = %e, "frame read failed; tick skipped");
            shared.ticks_skipped.fetch_add(1, Ordering::Relaxed);
            return TickReport::Skipped;
        }
    };

    let (frame, outcome) = if shared.enabled.load(Ordering::Acquire) {
        recognize(shared, frame)
    } else {
        (frame, RecognitionOutcome::Disabled)
    };

    let actuated = match outcome {
        RecognitionOutcome::Match => Some(shared.actuate(LockState::Unlocked)),
        RecognitionOutcome::NoMatch => Some(shared.actuate(LockState::Locked)),
        RecognitionOutcome::Disabled => None,
    };
    match actuated {
        Some(Err(ActuatorError::DeviceClosed)) => {
            tracing::error!(%outcome, "lock actuator used after cleanup");
        }
        Some(Err(e)) => tracing::warn!(error = %e, %outcome, "lock actuation failed"),
        _ => {}
    }

    sink.on_frame(frame);
    sink.on_status(outcome.status_text());

    shared.ticks_completed.fetch_add(1, Ordering::Relaxed);
    TickReport::Completed(outcome)
}

/// Run the gate, turning errors and panics into `Disabled`.
fn recognize(shared: &Shared, frame: Frame) -> (Frame, RecognitionOutcome) {
    let mut gate = lock(&shared.gate);
    let result = panic::catch_unwind(AssertUnwindSafe(|| gate.recognize(&frame)));

    let failure = match result {
        Ok(Ok(recognition)) => {
            shared.consecutive_gate_failures.store(0, Ordering::Relaxed);
            return (recognition.frame, recognition.verdict.into());
        }
        Ok(Err(e)) => e.to_string(),
        Err(payload) => format!("gate panicked: {}", panic_message(payload.as_ref())),
    };

    shared.gate_failures.fetch_add(1, Ordering::Relaxed);
    // Only the first failure of a streak is a warning; a missing recognizer fails every tick.
    if shared.consecutive_gate_failures.fetch_add(1, Ordering::Relaxed) == 0 {
        tracing::warn!(gate = gate.name(), error = %failure, "recognition failed; tick treated as disabled");
    } else {
        tracing::debug!(gate = gate.name(), error = %failure, "recognition failed");
    }
    (frame, RecognitionOutcome::Disabled)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
