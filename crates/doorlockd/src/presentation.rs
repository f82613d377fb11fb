//! Presentation sink: the one-way path from the capture cycle to the display side.
//!
//! The cycle thread only ever enqueues; an async task drains the queue and
//! owns the presentation state. Nothing on the cycle thread touches that
//! state directly.
//!
//! Frames travel on a bounded queue and are dropped when it is full. Status
//! text travels on its own latest-value channel, so a backlog of frames can
//! never cost a status change.

use doorlock_hw::Frame;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;

/// Receives pushed frames and status text. Implementations must return quickly.
pub trait PresentationSink: Send {
    fn on_frame(&self, frame: Frame);
    fn on_status(&self, text: &str);
}

/// One pushed update.
#[derive(Debug)]
pub enum Update {
    Frame(Frame),
    Status(String),
}

/// Channel-backed sink: frames on a bounded queue, status as a latest value.
pub struct ChannelSink {
    frames: mpsc::Sender<Frame>,
    status: watch::Sender<String>,
}

impl ChannelSink {
    /// `capacity` bounds the frame queue only.
    pub fn new(capacity: usize) -> (Self, UpdateReceiver) {
        let (frames_tx, frames) = mpsc::channel(capacity);
        let (status_tx, status) = watch::channel(String::new());
        let sink = Self {
            frames: frames_tx,
            status: status_tx,
        };
        let rx = UpdateReceiver {
            frames,
            status,
            frames_open: true,
            status_open: true,
        };
        (sink, rx)
    }
}

impl PresentationSink for ChannelSink {
    fn on_frame(&self, frame: Frame) {
        match self.frames.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => tracing::trace!("presentation queue full; frame dropped"),
            Err(TrySendError::Closed(_)) => tracing::trace!("presentation receiver gone"),
        }
    }

    fn on_status(&self, text: &str) {
        // Overwrites an unread status; only a change wakes the presenter.
        self.status.send_if_modified(|current| {
            if current == text {
                return false;
            }
            text.clone_into(current);
            true
        });
    }
}

/// Receiving half of a [`ChannelSink`].
pub struct UpdateReceiver {
    frames: mpsc::Receiver<Frame>,
    status: watch::Receiver<String>,
    frames_open: bool,
    status_open: bool,
}

impl UpdateReceiver {
    /// Next update, status first. `None` once the sink is gone and both
    /// channels are drained.
    pub async fn recv(&mut self) -> Option<Update> {
        loop {
            tokio::select! {
                biased;
                changed = self.status.changed(), if self.status_open => {
                    if changed.is_ok() {
                        return Some(Update::Status(self.status.borrow_and_update().clone()));
                    }
                    self.status_open = false;
                }
                frame = self.frames.recv(), if self.frames_open => match frame {
                    Some(frame) => return Some(Update::Frame(frame)),
                    None => self.frames_open = false,
                },
                else => return None,
            }
        }
    }
}

/// Latest frame and status as seen by the command surface.
#[derive(Debug)]
pub struct PresentationState {
    status: String,
    latest_frame: Option<Frame>,
    frames_presented: u64,
}

impl Default for PresentationState {
    fn default() -> Self {
        Self {
            status: "Waiting for camera".to_string(),
            latest_frame: None,
            frames_presented: 0,
        }
    }
}

impl PresentationState {
    pub fn apply(&mut self, update: Update) {
        match update {
            Update::Frame(frame) => {
                self.latest_frame = Some(frame);
                self.frames_presented += 1;
            }
            Update::Status(text) => {
                if text != self.status {
                    tracing::info!(status = %text, "status changed");
                    self.status = text;
                }
            }
        }
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn latest_frame(&self) -> Option<&Frame> {
        self.latest_frame.as_ref()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }
}

pub type SharedPresentation = Arc<Mutex<PresentationState>>;

/// Lock the presentation state, ignoring poisoning.
pub fn lock_presentation(state: &SharedPresentation) -> std::sync::MutexGuard<'_, PresentationState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drain updates into `state` until every sender is gone.
pub async fn run_presenter(mut rx: UpdateReceiver, state: SharedPresentation) {
    while let Some(update) = rx.recv().await {
        lock_presentation(&state).apply(update);
    }
    tracing::debug!("presenter exiting");
}
