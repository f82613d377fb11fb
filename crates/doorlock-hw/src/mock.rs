//! In-memory servo and indicator for running without GPIO hardware.

use crate::actuator::{DeviceError, DigitalOutput, PositionControl};
use std::sync::{Arc, Mutex, PoisonError};

/// One call recorded by a mock output.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Position(f32),
    Indicator(bool),
    ServoReleased,
    IndicatorReleased,
}

/// Shared, ordered record of everything the mock outputs were asked to do.
#[derive(Debug, Clone, Default)]
pub struct DeviceLog(Arc<Mutex<Vec<DeviceEvent>>>);

impl DeviceLog {
    fn push(&self, event: DeviceEvent) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Servo positions only, in order.
    pub fn positions(&self) -> Vec<f32> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                DeviceEvent::Position(p) => Some(p),
                _ => None,
            })
            .collect()
    }
}

pub struct MockServo {
    log: DeviceLog,
}

impl PositionControl for MockServo {
    fn set_position(&mut self, value: f32) -> Result<(), DeviceError> {
        if !(-1.0..=1.0).contains(&value) {
            return Err(DeviceError::InvalidPosition(value));
        }
        tracing::info!(value, "mock servo: set position");
        self.log.push(DeviceEvent::Position(value));
        Ok(())
    }

    fn release(&mut self) -> Result<(), DeviceError> {
        tracing::info!("mock servo: released");
        self.log.push(DeviceEvent::ServoReleased);
        Ok(())
    }
}

pub struct MockIndicator {
    log: DeviceLog,
}

impl DigitalOutput for MockIndicator {
    fn set_level(&mut self, high: bool) -> Result<(), DeviceError> {
        tracing::debug!(high, "mock indicator");
        self.log.push(DeviceEvent::Indicator(high));
        Ok(())
    }

    fn release(&mut self) -> Result<(), DeviceError> {
        self.log.push(DeviceEvent::IndicatorReleased);
        Ok(())
    }
}

/// A mock servo and indicator sharing one event log.
pub fn mock_devices() -> (MockServo, MockIndicator, DeviceLog) {
    let log = DeviceLog::default();
    (
        MockServo { log: log.clone() },
        MockIndicator { log: log.clone() },
        log,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_servo_rejects_out_of_range() {
        let (mut servo, _indicator, log) = mock_devices();
        assert!(servo.set_position(1.5).is_err());
        assert!(servo.set_position(f32::NAN).is_err());
        assert!(log.events().is_empty());
    }

    #[test]
    fn test_shared_log_orders_events() {
        let (mut servo, mut indicator, log) = mock_devices();
        indicator.set_level(true).unwrap();
        servo.set_position(0.5).unwrap();
        assert_eq!(
            log.events(),
            vec![DeviceEvent::Indicator(true), DeviceEvent::Position(0.5)]
        );
    }
}
