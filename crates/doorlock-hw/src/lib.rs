//! doorlock-hw: Hardware abstraction for camera capture and lock actuation.
//!
//! Camera frames come from a GStreamer pipeline, an indexed V4L2 device or a
//! synthetic pattern, tried in a fixed fallback order. The lock is a servo
//! plus status LED driven through sysfs PWM/GPIO, or an in-memory mock.

pub mod actuator;
pub mod camera;
pub mod frame;
pub mod mock;
pub mod pipeline;
pub mod source;
pub mod synthetic;
pub mod sysfs;

pub use actuator::{ActuatorError, Calibration, DeviceError, LockActuator, LockState};
pub use camera::V4l2Camera;
pub use frame::{Frame, PixelLayout};
pub use source::{
    camera_candidates, open_first, CaptureError, FrameSource, SourceCandidate, SourceError,
};
