//! Servo-driven lock actuator with a status indicator.
//!
//! Every lock/unlock raises the indicator, moves the servo to a calibrated
//! extreme, waits the settle time and lowers the indicator again. There is no
//! position feedback; the lit indicator is the only sign that a move is in
//! progress.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure of a physical output device.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("position {0} outside [-1, 1]")]
    InvalidPosition(f32),
    #[error("timed out waiting for {0} to appear")]
    ExportTimeout(String),
}

/// Position-control primitive accepting a normalised value in [-1, 1].
pub trait PositionControl: Send {
    fn set_position(&mut self, value: f32) -> Result<(), DeviceError>;

    /// Release the device. Called at most once by [`LockActuator`].
    fn release(&mut self) -> Result<(), DeviceError>;
}

/// Binary digital output (status LED).
pub trait DigitalOutput: Send {
    fn set_level(&mut self, high: bool) -> Result<(), DeviceError>;

    /// Release the device. Called at most once by [`LockActuator`].
    fn release(&mut self) -> Result<(), DeviceError>;
}

/// Physical lock state as last commanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Locked,
    Unlocked,
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockState::Locked => f.write_str("locked"),
            LockState::Unlocked => f.write_str("unlocked"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("actuator used after cleanup")]
    DeviceClosed,
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
}

/// Servo extremes and settle time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub locked_position: f32,
    pub unlocked_position: f32,
    pub settle: Duration,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            locked_position: angle_to_position(90.0),
            unlocked_position: angle_to_position(0.0),
            settle: Duration::from_secs(1),
        }
    }
}

/// Convert a servo horn angle (0–180°) to a normalised position.
///
/// 0° → -1, 90° → 0, 180° → 1; out-of-range angles are clamped.
pub fn angle_to_position(angle: f32) -> f32 {
    (angle / 90.0 - 1.0).clamp(-1.0, 1.0)
}

/// Sole owner of the servo and indicator outputs.
pub struct LockActuator {
    servo: Option<Box<dyn PositionControl>>,
    indicator: Option<Box<dyn DigitalOutput>>,
    calibration: Calibration,
    state: Option<LockState>,
    actuations: u64,
}

impl LockActuator {
    /// Take ownership of the outputs. No motion is issued, so the state is
    /// unknown until the first successful move.
    pub fn new(
        servo: Box<dyn PositionControl>,
        indicator: Box<dyn DigitalOutput>,
        calibration: Calibration,
    ) -> Self {
        Self {
            servo: Some(servo),
            indicator: Some(indicator),
            calibration,
            state: None,
            actuations: 0,
        }
    }

    pub fn lock(&mut self) -> Result<(), ActuatorError> {
        self.actuate(LockState::Locked)
    }

    pub fn unlock(&mut self) -> Result<(), ActuatorError> {
        self.actuate(LockState::Unlocked)
    }

    /// Last commanded state, `None` before any move has completed.
    pub fn state(&self) -> Option<LockState> {
        self.state
    }

    /// Number of completed physical moves.
    pub fn actuations(&self) -> u64 {
        self.actuations
    }

    pub fn is_closed(&self) -> bool {
        self.servo.is_none()
    }

    fn actuate(&mut self, target: LockState) -> Result<(), ActuatorError> {
        let (Some(servo), Some(indicator)) = (self.servo.as_mut(), self.indicator.as_mut()) else {
            return Err(ActuatorError::DeviceClosed);
        };

        let position = match target {
            LockState::Locked => self.calibration.locked_position,
            LockState::Unlocked => self.calibration.unlocked_position,
        };

        indicator.set_level(true)?;
        let moved = servo.set_position(position);
        if moved.is_ok() {
            std::thread::sleep(self.calibration.settle);
        }
        // The indicator goes dark even when the move failed.
        let lowered = indicator.set_level(false);
        moved?;
        lowered?;

        self.state = Some(target);
        self.actuations += 1;
        tracing::info!(state = %target, position, "door {target}");
        Ok(())
    }

    /// Release both outputs. Only the first call touches the devices.
    pub fn cleanup(&mut self) -> Result<(), ActuatorError> {
        let servo = self.servo.take();
        let indicator = self.indicator.take();
        if servo.is_none() && indicator.is_none() {
            return Ok(());
        }

        let servo_result = servo.map(|mut s| s.release()).unwrap_or(Ok(()));
        let indicator_result = indicator.map(|mut i| i.release()).unwrap_or(Ok(()));
        tracing::info!("lock actuator released");
        servo_result?;
        indicator_result?;
        Ok(())
    }
}

impl Drop for LockActuator {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            tracing::warn!(error = %e, "lock actuator cleanup on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{mock_devices, DeviceEvent};

    fn instant_calibration() -> Calibration {
        Calibration {
            settle: Duration::ZERO,
            ..Calibration::default()
        }
    }

    #[test]
    fn test_angle_to_position() {
        assert_eq!(angle_to_position(0.0), -1.0);
        assert_eq!(angle_to_position(90.0), 0.0);
        assert_eq!(angle_to_position(180.0), 1.0);
        assert_eq!(angle_to_position(270.0), 1.0);
        assert_eq!(angle_to_position(-45.0), -1.0);
    }

    #[test]
    fn test_unlock_sequence() {
        let (servo, indicator, log) = mock_devices();
        let mut actuator = LockActuator::new(Box::new(servo), Box::new(indicator), instant_calibration());

        actuator.unlock().unwrap();

        assert_eq!(
            log.events(),
            vec![
                DeviceEvent::Indicator(true),
                DeviceEvent::Position(-1.0),
                DeviceEvent::Indicator(false),
            ]
        );
        assert_eq!(actuator.state(), Some(LockState::Unlocked));
    }

    #[test]
    fn test_state_unknown_until_first_move() {
        let (servo, indicator, log) = mock_devices();
        let mut actuator = LockActuator::new(Box::new(servo), Box::new(indicator), instant_calibration());
        assert_eq!(actuator.state(), None);
        assert!(log.events().is_empty());

        actuator.lock().unwrap();
        assert_eq!(log.positions(), vec![0.0]);
        assert_eq!(actuator.state(), Some(LockState::Locked));
    }

    #[test]
    fn test_lock_is_idempotent() {
        let (servo, indicator, log) = mock_devices();
        let mut actuator = LockActuator::new(Box::new(servo), Box::new(indicator), instant_calibration());

        actuator.lock().unwrap();
        actuator.lock().unwrap();

        assert_eq!(log.positions(), vec![0.0, 0.0]);
        assert_eq!(actuator.actuations(), 2);
        assert_eq!(actuator.state(), Some(LockState::Locked));
    }

    #[test]
    fn test_settle_time_is_held() {
        let (servo, indicator, _log) = mock_devices();
        let calibration = Calibration {
            settle: Duration::from_millis(30),
            ..Calibration::default()
        };
        let mut actuator = LockActuator::new(Box::new(servo), Box::new(indicator), calibration);

        let start = std::time::Instant::now();
        actuator.unlock().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_use_after_cleanup_fails() {
        let (servo, indicator, log) = mock_devices();
        let mut actuator = LockActuator::new(Box::new(servo), Box::new(indicator), instant_calibration());

        actuator.cleanup().unwrap();
        assert!(actuator.is_closed());
        assert!(matches!(actuator.lock(), Err(ActuatorError::DeviceClosed)));
        assert!(matches!(actuator.unlock(), Err(ActuatorError::DeviceClosed)));
        assert!(log.positions().is_empty());
    }

    #[test]
    fn test_cleanup_releases_once() {
        let (servo, indicator, log) = mock_devices();
        let mut actuator = LockActuator::new(Box::new(servo), Box::new(indicator), instant_calibration());

        actuator.cleanup().unwrap();
        actuator.cleanup().unwrap();
        drop(actuator);

        let releases = log
            .events()
            .into_iter()
            .filter(|e| matches!(e, DeviceEvent::ServoReleased | DeviceEvent::IndicatorReleased))
            .count();
        assert_eq!(releases, 2);
    }

    #[test]
    fn test_drop_releases_devices() {
        let (servo, indicator, log) = mock_devices();
        let actuator = LockActuator::new(Box::new(servo), Box::new(indicator), instant_calibration());
        drop(actuator);
        assert!(log.events().contains(&DeviceEvent::ServoReleased));
        assert!(log.events().contains(&DeviceEvent::IndicatorReleased));
    }

    #[test]
    fn test_state_unchanged_when_servo_fails() {
        struct Broken;
        impl PositionControl for Broken {
            fn set_position(&mut self, value: f32) -> Result<(), DeviceError> {
                Err(DeviceError::InvalidPosition(value))
            }
            fn release(&mut self) -> Result<(), DeviceError> {
                Ok(())
            }
        }

        let (_servo, indicator, log) = mock_devices();
        let mut actuator = LockActuator::new(Box::new(Broken), Box::new(indicator), instant_calibration());

        assert!(matches!(actuator.unlock(), Err(ActuatorError::Device(_))));
        assert_eq!(actuator.state(), None);
        // Indicator still lowered after the failed move
        assert_eq!(
            log.events(),
            vec![DeviceEvent::Indicator(true), DeviceEvent::Indicator(false)]
        );
    }
}
