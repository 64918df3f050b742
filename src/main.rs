//! CLI entry point for orcacam
//!
//! Provides commands to:
//! - list cameras
//! - print device identification
//! - dump every property with its range and current value
//! - capture frames (push or pull style) and report throughput
//!
//! Without the `dcam_sdk` feature the simulated camera is used, which makes
//! the binary useful for trying out configuration files.
//!
//! # Usage
//!
//! ```bash
//! orcacam list
//! orcacam --config orcacam.toml capture --frames 100
//! ORCACAM_CAMERA__EXPOSURE_S=0.005 orcacam capture --pull --frames 20
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use orcacam::config::{OrcaConfig, DEFAULT_CONFIG_FILE};
use orcacam::driver::attr;
use orcacam::{logging, Runtime, Session};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Parser)]
#[command(name = "orcacam")]
#[command(about = "Control and capture from Hamamatsu ORCA cameras", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Camera index, overriding the configuration
    #[arg(long, global = true)]
    index: Option<u32>,

    /// Log level, overriding the configuration
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the number of connected cameras
    List,
    /// Print identification strings and sensor size
    Info,
    /// Print every property the camera reports
    Props,
    /// Apply the configuration and capture frames
    Capture {
        /// Frames to receive before stopping
        #[arg(long, default_value = "10")]
        frames: u64,

        /// Give up after this many milliseconds without a frame
        #[arg(long, default_value = "5000")]
        timeout_ms: u64,

        /// Poll with acquire_image instead of a callback
        #[arg(long)]
        pull: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = OrcaConfig::load_from(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if let Some(index) = cli.index {
        config.camera.index = index;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config
        .validate()
        .map_err(|e| anyhow!(e))
        .context("invalid configuration")?;
    logging::init(&config.logging).map_err(|e| anyhow!(e))?;

    let runtime = runtime();
    let result = match cli.command {
        Commands::List => list(&runtime),
        Commands::Info => with_session(&runtime, &config, print_info),
        Commands::Props => with_session(&runtime, &config, print_props),
        Commands::Capture {
            frames,
            timeout_ms,
            pull,
        } => with_session(&runtime, &config, |session| {
            session
                .apply_config(&config.camera)
                .context("failed to apply camera configuration")?;
            let timeout = Duration::from_millis(timeout_ms);
            if pull {
                capture_pull(session, frames, timeout)
            } else {
                capture_push(session, frames, timeout)
            }
        }),
    };

    runtime.shutdown().context("DCAM-API shutdown failed")?;
    result
}

#[cfg(feature = "dcam_sdk")]
fn runtime() -> Arc<Runtime> {
    Runtime::hardware()
}

#[cfg(not(feature = "dcam_sdk"))]
fn runtime() -> Arc<Runtime> {
    info!("built without dcam_sdk, using the simulated camera");
    Runtime::new(Arc::new(orcacam::driver::MockDcam::new()))
}

fn list(runtime: &Arc<Runtime>) -> Result<()> {
    let count = runtime.list_devices().context("failed to enumerate cameras")?;
    println!("{count} camera(s) found");
    Ok(())
}

fn with_session<F>(runtime: &Arc<Runtime>, config: &OrcaConfig, body: F) -> Result<()>
where
    F: FnOnce(&mut Session) -> Result<()>,
{
    let index = config.camera.index;
    let mut session = runtime
        .open(index, config.camera.frame_count)
        .with_context(|| format!("failed to open camera {index}"))?;
    let result = body(&mut session);
    session.close().context("failed to close camera")?;
    result
}

fn print_info(session: &mut Session) -> Result<()> {
    let info = session.device_info().context("failed to read device info")?;
    print!("{}", toml::to_string_pretty(&info)?);
    Ok(())
}

fn print_props(session: &mut Session) -> Result<()> {
    for prop in session.properties()? {
        let name = session.property_name(prop)?;
        let meta = session.attr(prop)?;
        let access = match (meta.is_readable(), meta.is_writable()) {
            (true, true) => "rw",
            (true, false) => "r-",
            (false, true) => "-w",
            (false, false) => "--",
        };
        let value = if meta.is_readable() {
            match session.get_value(prop) {
                Ok(value) if meta.has_value_text() => session
                    .value_text(prop, value)
                    .unwrap_or_else(|_| value.to_string()),
                Ok(value) => value.to_string(),
                Err(err) => format!("<{err}>"),
            }
        } else {
            String::new()
        };
        let range = if meta.attribute & attr::HAS_RANGE != 0 {
            format!("[{} .. {}]", meta.min, meta.max)
        } else {
            String::new()
        };
        println!("{prop} {access} {name:<32} {value:<24} {range}");
    }
    Ok(())
}

fn capture_push(session: &mut Session, frames: u64, timeout: Duration) -> Result<()> {
    let (tx, rx) = mpsc::channel();
    let started = Instant::now();
    session
        .start(move |frame| {
            let sum: u64 = frame.data.iter().map(|&b| u64::from(b)).sum();
            // The receiver hangs up once it has enough frames.
            let _ = tx.send((frame.frame_number, sum));
        })
        .context("failed to start capture")?;

    let mut received = 0;
    let outcome = loop {
        if received == frames {
            break Ok(());
        }
        match rx.recv_timeout(timeout) {
            Ok((number, checksum)) => {
                received += 1;
                info!(frame = number, checksum, "frame received");
            }
            Err(_) => break Err(anyhow!("no frame within {timeout:?}")),
        }
    };

    session.stop().context("failed to stop capture")?;
    report(received, started.elapsed());
    outcome
}

fn capture_pull(session: &mut Session, frames: u64, timeout: Duration) -> Result<()> {
    let started = Instant::now();
    session
        .start_acquisition()
        .context("failed to start acquisition")?;

    let mut received = 0;
    let mut outcome = Ok(());
    while received < frames {
        match session.acquire_image(timeout) {
            Ok(frame) => {
                received += 1;
                info!(frame = frame.frame_number, slot = frame.frame_index, "frame received");
            }
            Err(err) => {
                outcome = Err(err).context("acquire_image failed");
                break;
            }
        }
    }

    session
        .stop_acquisition()
        .context("failed to stop acquisition")?;
    report(received, started.elapsed());
    outcome
}

fn report(frames: u64, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    let fps = if secs > 0.0 { frames as f64 / secs } else { 0.0 };
    println!("{frames} frame(s) in {secs:.2} s ({fps:.1} fps)");
}
