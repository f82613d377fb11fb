use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use doorlock_hw::V4l2Camera;
use std::path::PathBuf;
use std::time::Duration;

mod capture;

use capture::CameraArgs;

// `#[zbus::proxy]` generates `DoorlockProxy` (async) and `DoorlockProxyBlocking`.
#[zbus::proxy(
    interface = "org.doorlock.Doorlock1",
    default_service = "org.doorlock.Doorlock1",
    default_path = "/org/doorlock/Doorlock1"
)]
trait Doorlock {
    async fn start_recognition(&self) -> zbus::Result<()>;
    async fn stop_recognition(&self) -> zbus::Result<()>;
    async fn manual_unlock(&self) -> zbus::Result<()>;
    async fn manual_lock(&self) -> zbus::Result<()>;
    async fn reload_gallery(&self) -> zbus::Result<u32>;
    async fn status(&self) -> zbus::Result<String>;
    async fn save_snapshot(&self, path: &str) -> zbus::Result<bool>;
}

#[derive(Parser)]
#[command(name = "doorlock", about = "Face recognition door lock CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enable face recognition
    Start,
    /// Disable face recognition
    Stop,
    /// Unlock the door now
    Unlock,
    /// Lock the door now
    Lock,
    /// Show daemon status
    Status,
    /// Save the daemon's latest frame as PNG
    Snapshot {
        /// Output path, as seen by the daemon
        path: PathBuf,
    },
    /// Make the daemon re-read its face gallery
    Reload,
    /// Run camera diagnostics (bypasses the daemon)
    Test {
        #[command(flatten)]
        camera: CameraArgs,
        /// Number of frames to capture
        #[arg(short = 'n', long, default_value_t = 10)]
        frames: usize,
        /// Save the last captured frame as PNG
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// List V4L2 capture devices
    Devices,
    /// Capture a face and add it to the gallery
    Enroll {
        /// Label for this face (e.g., "front door", "glasses")
        #[arg(short, long)]
        label: String,
        /// Gallery file (defaults to the daemon's default location)
        #[arg(long)]
        gallery: Option<PathBuf>,
        /// Frames to try before giving up
        #[arg(long, default_value_t = 10)]
        attempts: usize,
        #[command(flatten)]
        camera: CameraArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            proxy(cli.session).await?.start_recognition().await?;
            println!("Face recognition enabled");
        }
        Commands::Stop => {
            proxy(cli.session).await?.stop_recognition().await?;
            println!("Face recognition disabled");
        }
        Commands::Unlock => {
            proxy(cli.session).await?.manual_unlock().await?;
            println!("Door unlocked");
        }
        Commands::Lock => {
            proxy(cli.session).await?.manual_lock().await?;
            println!("Door locked");
        }
        Commands::Status => {
            let raw = proxy(cli.session).await?.status().await?;
            let status: serde_json::Value =
                serde_json::from_str(&raw).context("daemon returned malformed status")?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Snapshot { path } => {
            // The daemon resolves relative paths against its own working directory.
            let path = if path.is_relative() {
                std::env::current_dir()?.join(path)
            } else {
                path
            };
            let saved = proxy(cli.session)
                .await?
                .save_snapshot(&path.to_string_lossy())
                .await?;
            if saved {
                println!("Snapshot written to {}", path.display());
            } else {
                println!("No frame presented yet; nothing saved");
            }
        }
        Commands::Reload => {
            let faces = proxy(cli.session).await?.reload_gallery().await?;
            println!("Gallery reloaded: {faces} face(s) enrolled");
        }
        Commands::Test {
            camera,
            frames,
            save,
        } => run_test(&camera, frames, save.as_deref())?,
        Commands::Devices => {
            let devices = V4l2Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        Commands::Enroll {
            label,
            gallery,
            attempts,
            camera,
        } => {
            let gallery = gallery.unwrap_or_else(doorlock_core::gallery::default_gallery_path);
            let mut source = camera.open()?;
            println!("Capturing from {}; look at the camera", source.describe());
            let embedding = capture::capture_embedding(source.as_mut(), attempts);
            source.close();

            let face = doorlock_core::gallery::enroll(&gallery, &label, embedding?)?;
            println!("Enrolled '{}' as {} in {}", face.label, face.id, gallery.display());
            println!("Run `doorlock reload` to make a running daemon pick it up");
        }
    }

    Ok(())
}

async fn proxy(session: bool) -> Result<DoorlockProxy<'static>> {
    let builder = if session {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    // Manual moves block for the settle time, so leave headroom over the default.
    let conn = builder
        .method_timeout(Duration::from_secs(10))
        .build()
        .await
        .context("failed to connect to D-Bus")?;
    Ok(DoorlockProxy::new(&conn).await?)
}

fn run_test(camera: &CameraArgs, frames: usize, save: Option<&std::path::Path>) -> Result<()> {
    println!("Running camera diagnostics...");
    let mut source = camera.open()?;
    println!("Opened {}", source.describe());

    let (reports, last) = capture::sample(source.as_mut(), frames);
    source.close();

    for r in &reports {
        println!(
            "frame {:>4}  {}x{}  brightness {:6.1}{}",
            r.sequence,
            r.width,
            r.height,
            r.brightness,
            if r.dark { "  DARK" } else { "" }
        );
    }
    println!("{} of {frames} frames captured", reports.len());

    if let Some(path) = save {
        let frame = last.context("no frame captured; nothing to save")?;
        capture::save_png(&frame, path)?;
        println!("Saved last frame to {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_daemon_commands() {
        let cli = Cli::try_parse_from(["doorlock", "--session", "unlock"]).unwrap();
        assert!(cli.session);
        assert!(matches!(cli.command, Commands::Unlock));

        let cli = Cli::try_parse_from(["doorlock", "snapshot", "/tmp/door.png"]).unwrap();
        assert!(!cli.session);
        match cli.command {
            Commands::Snapshot { path } => assert_eq!(path, PathBuf::from("/tmp/door.png")),
            _ => panic!("expected snapshot"),
        }
    }

    #[test]
    fn test_parse_camera_flags() {
        let cli = Cli::try_parse_from(["doorlock", "test", "-n", "3", "--index", "2,0"]).unwrap();
        match cli.command {
            Commands::Test { camera, frames, save } => {
                assert_eq!(frames, 3);
                assert_eq!(camera.indices, vec![2, 0]);
                assert_eq!(camera.pipeline, doorlock_hw::pipeline::DEFAULT_PIPELINE);
                assert!(!camera.synthetic);
                assert!(save.is_none());
            }
            _ => panic!("expected test"),
        }
    }

    #[test]
    fn test_enroll_requires_label() {
        assert!(Cli::try_parse_from(["doorlock", "enroll"]).is_err());

        let cli = Cli::try_parse_from(["doorlock", "enroll", "-l", "porch", "--synthetic"]).unwrap();
        match cli.command {
            Commands::Enroll { label, camera, attempts, gallery } => {
                assert_eq!(label, "porch");
                assert!(camera.synthetic);
                assert_eq!(camera.indices, vec![0, 1, 2]);
                assert_eq!(attempts, 10);
                assert!(gallery.is_none());
            }
            _ => panic!("expected enroll"),
        }
    }

    #[test]
    fn test_run_test_saves_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diag.png");
        let camera = CameraArgs {
            pipeline: String::new(),
            indices: Vec::new(),
            synthetic: true,
        };
        run_test(&camera, 2, Some(&path)).unwrap();
        assert!(path.exists());
    }
}
