//! # orcacam
//!
//! Session, frame-buffer and acquisition-thread wrapper around the Hamamatsu
//! DCAM-API for ORCA sCMOS cameras.
//!
//! ## Crate Structure
//!
//! - **`driver`**: the [`Dcam`](driver::Dcam) trait at the vendor boundary,
//!   native error codes and identifiers, the simulated camera
//!   ([`MockDcam`](driver::MockDcam)) and, with the `dcam_sdk` feature, the
//!   real driver binding.
//! - **`runtime`**: process-wide API init/uninit, reference-counted by open
//!   sessions.
//! - **`session`**: one open camera; owns its device, wait handle and arena.
//! - **`arena`**: the contiguous frame-slot buffer registered with the
//!   driver.
//! - **`properties`**: generic and typed property access (exposure, ROI,
//!   pixel format, sensor mode, temperature, frame rate).
//! - **`capture`**: push-style (callback on a worker thread) and pull-style
//!   (caller polls) acquisition.
//! - **`frame`**: borrowed frame views and pixel formats.
//! - **`error`**: [`OrcaError`] and its [`ErrorKind`] classification.
//! - **`config`** / **`logging`**: Figment configuration and the tracing
//!   subscriber used by the `orcacam` binary.
//!
//! ## Example
//!
//! ```no_run
//! use orcacam::driver::MockDcam;
//! use orcacam::Runtime;
//! use std::sync::Arc;
//!
//! let runtime = Runtime::new(Arc::new(MockDcam::new()));
//! let mut session = runtime.open(0, 10)?;
//! session.set_exposure(0.01)?;
//! session.start(|frame| println!("frame {} ({}x{})", frame.frame_number, frame.width, frame.height))?;
//! std::thread::sleep(std::time::Duration::from_millis(200));
//! session.stop()?;
//! session.close()?;
//! # Ok::<(), orcacam::OrcaError>(())
//! ```

pub mod arena;
pub mod capture;
pub mod config;
pub mod driver;
pub mod error;
pub mod frame;
pub mod logging;
pub mod properties;
pub mod runtime;
pub mod session;

pub use arena::FrameArena;
pub use config::OrcaConfig;
pub use error::{ErrorKind, OrcaError, Result};
pub use frame::{Frame, PixelFormat};
pub use properties::{Roi, SensorMode};
pub use runtime::Runtime;
pub use session::{DeviceInfo, Session};
