use anyhow::{Context, Result};
use doorlock_hw::sysfs::{ServoTiming, SysfsGpioOutput, SysfsPwmServo};
use doorlock_hw::LockActuator;
use tracing_subscriber::EnvFilter;

mod config;
mod control_loop;
mod dbus_interface;
mod gate;
mod presentation;

use config::{BusKind, Config};
use control_loop::ControlLoop;
use dbus_interface::{DoorlockService, BUS_NAME, OBJECT_PATH};
use presentation::{ChannelSink, SharedPresentation};

/// Frames buffered between the capture thread and the presenter before dropping.
const PRESENTATION_QUEUE_DEPTH: usize = 8;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("doorlockd starting");

    let config = Config::load()?;
    tracing::info!(
        pipeline = %config.camera_pipeline,
        indices = ?config.camera_indices,
        interval_ms = config.cycle_interval_ms,
        recognition_enabled = config.recognition_enabled,
        bus = ?config.bus,
        "config loaded"
    );

    let actuator = build_actuator(&config)?;
    let (gate, _) = gate::load_gate(&config.gallery_path, config.match_threshold);

    let (sink, updates) = ChannelSink::new(PRESENTATION_QUEUE_DEPTH);
    let presentation = SharedPresentation::default();

    let control = ControlLoop::new(
        config.loop_config(),
        config.source_candidates(),
        gate,
        actuator,
        Box::new(sink),
    );
    let handle = control.handle();
    let running = control.start().context("failed to start capture cycle")?;

    let presenter = tokio::spawn(presentation::run_presenter(updates, presentation.clone()));

    let service = DoorlockService::new(handle.clone(), presentation)
        .with_gallery(config.gallery_path.clone(), config.match_threshold);
    let builder = match config.bus {
        BusKind::System => zbus::connection::Builder::system()?,
        BusKind::Session => zbus::connection::Builder::session()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "doorlockd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("doorlockd shutting down");

    // Joining the capture thread can take a full tick including a settle wait.
    tokio::task::spawn_blocking(move || running.stop()).await?;
    if let Err(e) = handle.release_actuator() {
        tracing::warn!(error = %e, "failed to release lock actuator");
    }
    // The capture thread owned the only sender, so the presenter drains and exits.
    presenter.await?;

    Ok(())
}

/// Open the lock outputs and drive the door to Locked, so the reported state
/// always follows a real move.
fn build_actuator(config: &Config) -> Result<LockActuator> {
    let mut actuator = open_actuator(config)?;
    actuator.lock().context("failed to lock the door at startup")?;
    Ok(actuator)
}

fn open_actuator(config: &Config) -> Result<LockActuator> {
    let calibration = config.calibration();

    if config.mock_hardware {
        let (servo, indicator, _log) = doorlock_hw::mock::mock_devices();
        tracing::info!("using mock lock hardware");
        return Ok(LockActuator::new(Box::new(servo), Box::new(indicator), calibration));
    }

    let servo = SysfsPwmServo::open(config.pwm_chip, config.pwm_channel, ServoTiming::default())
        .with_context(|| format!("failed to open pwmchip{}/pwm{}", config.pwm_chip, config.pwm_channel))?;
    let indicator = SysfsGpioOutput::open(config.status_gpio)
        .with_context(|| format!("failed to open status gpio {}", config.status_gpio))?;
    tracing::info!(
        pwm_chip = config.pwm_chip,
        pwm_channel = config.pwm_channel,
        status_gpio = config.status_gpio,
        "sysfs lock hardware opened"
    );
    Ok(LockActuator::new(Box::new(servo), Box::new(indicator), calibration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use doorlock_hw::LockState;

    #[test]
    fn test_startup_actuator_is_locked_by_a_move() {
        let config = Config {
            mock_hardware: true,
            settle_ms: 0,
            ..Config::default()
        };
        let actuator = build_actuator(&config).unwrap();
        assert_eq!(actuator.actuations(), 1);
        assert_eq!(actuator.state(), Some(LockState::Locked));
    }
}
