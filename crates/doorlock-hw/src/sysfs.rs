//! Servo and status LED through the Linux sysfs PWM and GPIO interfaces.
//!
//! Both devices take the sysfs class directory as a parameter so they can be
//! pointed at a scratch tree in tests.

use crate::actuator::{DeviceError, DigitalOutput, PositionControl};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SYSFS_PWM_ROOT: &str = "/sys/class/pwm";
pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// Newly exported nodes may take a moment to get udev permissions.
const EXPORT_POLL_INTERVAL: Duration = Duration::from_millis(10);
const EXPORT_POLL_ATTEMPTS: u32 = 50;

fn write_attr(path: &Path, value: &str) -> Result<(), DeviceError> {
    std::fs::write(path, value).map_err(|source| DeviceError::Write {
        path: path.display().to_string(),
        source,
    })
}

fn wait_for(path: &Path) -> Result<(), DeviceError> {
    for _ in 0..EXPORT_POLL_ATTEMPTS {
        if path.exists() {
            return Ok(());
        }
        std::thread::sleep(EXPORT_POLL_INTERVAL);
    }
    Err(DeviceError::ExportTimeout(path.display().to_string()))
}

/// Hobby-servo pulse timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoTiming {
    pub period_ns: u64,
    pub min_pulse_ns: u64,
    pub max_pulse_ns: u64,
}

impl Default for ServoTiming {
    /// 50 Hz frame, 1–2 ms pulse.
    fn default() -> Self {
        Self {
            period_ns: 20_000_000,
            min_pulse_ns: 1_000_000,
            max_pulse_ns: 2_000_000,
        }
    }
}

impl ServoTiming {
    /// Pulse width for a normalised position: -1 → min, 0 → centre, 1 → max.
    pub fn pulse_ns(&self, value: f32) -> u64 {
        let span = (self.max_pulse_ns - self.min_pulse_ns) as f64;
        let fraction = (value.clamp(-1.0, 1.0) as f64 + 1.0) / 2.0;
        self.min_pulse_ns + (span * fraction).round() as u64
    }
}

/// Servo on a sysfs PWM channel (`<root>/pwmchipN/pwmM`).
pub struct SysfsPwmServo {
    chip_dir: PathBuf,
    channel: u32,
    channel_dir: PathBuf,
    timing: ServoTiming,
}

impl SysfsPwmServo {
    pub fn open(chip: u32, channel: u32, timing: ServoTiming) -> Result<Self, DeviceError> {
        Self::open_at(Path::new(SYSFS_PWM_ROOT), chip, channel, timing)
    }

    /// Export the channel if needed, program the period and enable output.
    pub fn open_at(
        root: &Path,
        chip: u32,
        channel: u32,
        timing: ServoTiming,
    ) -> Result<Self, DeviceError> {
        let chip_dir = root.join(format!("pwmchip{chip}"));
        let channel_dir = chip_dir.join(format!("pwm{channel}"));

        if !channel_dir.exists() {
            write_attr(&chip_dir.join("export"), &channel.to_string())?;
            wait_for(&channel_dir)?;
        }

        write_attr(&channel_dir.join("period"), &timing.period_ns.to_string())?;
        write_attr(&channel_dir.join("enable"), "1")?;

        tracing::info!(chip, channel, period_ns = timing.period_ns, "PWM servo ready");

        Ok(Self {
            chip_dir,
            channel,
            channel_dir,
            timing,
        })
    }
}

impl PositionControl for SysfsPwmServo {
    fn set_position(&mut self, value: f32) -> Result<(), DeviceError> {
        if !(-1.0..=1.0).contains(&value) {
            return Err(DeviceError::InvalidPosition(value));
        }
        let pulse = self.timing.pulse_ns(value);
        tracing::debug!(value, pulse_ns = pulse, "servo move");
        write_attr(&self.channel_dir.join("duty_cycle"), &pulse.to_string())
    }

    fn release(&mut self) -> Result<(), DeviceError> {
        write_attr(&self.channel_dir.join("enable"), "0")?;
        write_attr(&self.chip_dir.join("unexport"), &self.channel.to_string())
    }
}

/// Digital output on a sysfs GPIO line (`<root>/gpioN`).
pub struct SysfsGpioOutput {
    root: PathBuf,
    pin: u32,
    pin_dir: PathBuf,
}

impl SysfsGpioOutput {
    pub fn open(pin: u32) -> Result<Self, DeviceError> {
        Self::open_at(Path::new(SYSFS_GPIO_ROOT), pin)
    }

    /// Export the pin if needed and configure it as a low output.
    pub fn open_at(root: &Path, pin: u32) -> Result<Self, DeviceError> {
        let pin_dir = root.join(format!("gpio{pin}"));

        if !pin_dir.exists() {
            write_attr(&root.join("export"), &pin.to_string())?;
            wait_for(&pin_dir)?;
        }

        write_attr(&pin_dir.join("direction"), "out")?;
        write_attr(&pin_dir.join("value"), "0")?;

        tracing::info!(pin, "GPIO output ready");

        Ok(Self {
            root: root.to_path_buf(),
            pin,
            pin_dir,
        })
    }
}

impl DigitalOutput for SysfsGpioOutput {
    fn set_level(&mut self, high: bool) -> Result<(), DeviceError> {
        write_attr(&self.pin_dir.join("value"), if high { "1" } else { "0" })
    }

    fn release(&mut self) -> Result<(), DeviceError> {
        write_attr(&self.pin_dir.join("value"), "0")?;
        write_attr(&self.root.join("unexport"), &self.pin.to_string())
    }
}
