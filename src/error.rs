//! Error types for the DCAM wrapper.
//!
//! This module defines [`OrcaError`], the single error type returned by every
//! fallible library operation. It is built with `thiserror` and keeps two
//! concerns apart:
//!
//! - **Lifecycle conditions** raised by this crate itself: `NotReady` when an
//!   operation needs an active capture, `Busy` when it is forbidden during
//!   one, `Closed` after the session was closed, `OutOfMemory` when the
//!   frame arena cannot be allocated.
//! - **Driver failures**: any non-success `DCAMERR` code. The raw code is kept
//!   verbatim in [`OrcaError::Driver`] together with its description, except
//!   for the four codes that carry lifecycle meaning (busy, not ready,
//!   timeout, abort) which map onto their dedicated variants.
//!
//! Callers that only care about the category use [`OrcaError::kind`]:
//!
//! ```
//! use orcacam::{ErrorKind, OrcaError};
//! use orcacam::driver::DcamErr;
//!
//! let err = OrcaError::from(DcamErr::NO_MEMORY);
//! assert_eq!(err.kind(), ErrorKind::OutOfMemory);
//! assert_eq!(err.dcam_code(), Some(DcamErr::NO_MEMORY));
//! ```

use crate::driver::DcamErr;
use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type Result<T> = std::result::Result<T, OrcaError>;

/// Every failure the library reports.
#[derive(Error, Debug)]
pub enum OrcaError {
    /// The operation needs an active capture.
    #[error("Capture is not running")]
    NotReady,

    /// The operation is not allowed while a capture is active.
    #[error("Operation not allowed while capturing")]
    Busy,

    /// The frame arena could not be allocated.
    #[error("Failed to allocate {bytes} bytes for frame buffers")]
    OutOfMemory {
        /// Size of the failed request.
        bytes: usize,
    },

    /// No frame arrived within the requested time. Retrying is fine.
    #[error("Timed out waiting for a frame")]
    Timeout,

    /// The wait was cancelled by a stop.
    #[error("Wait was aborted")]
    Aborted,

    /// A mode, format or property the camera or this crate cannot handle.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// The requested camera index does not exist.
    #[error("Camera {index} not found ({available} available)")]
    DeviceNotFound {
        /// Requested index.
        index: u32,
        /// Number of cameras the driver reported.
        available: u32,
    },

    /// The session was closed.
    #[error("Session is closed")]
    Closed,

    /// Any other `DCAMERR` failure, code kept verbatim.
    #[error("DCAM error: {code}")]
    Driver {
        /// Raw driver status.
        code: DcamErr,
    },

    /// The frame callback panicked.
    #[error("Acquisition worker panicked")]
    WorkerPanicked,

    /// The acquisition thread could not be created.
    #[error("Failed to spawn acquisition worker: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Category of an [`OrcaError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No capture running.
    NotReady,
    /// A capture is running.
    Busy,
    /// Host or driver memory exhausted.
    OutOfMemory,
    /// Wait timed out.
    Timeout,
    /// Wait aborted.
    Aborted,
    /// Not supported by the camera or the crate.
    Unsupported,
    /// No such camera.
    NotFound,
    /// Session closed.
    Closed,
    /// Other driver failure.
    Driver,
    /// Worker thread failure.
    Thread,
}

impl OrcaError {
    /// Classify the error.
    ///
    /// Driver codes without a dedicated variant are classified by code, so a
    /// `DCAMERR_NOMEMORY` from `dcambuf_attach` reports `OutOfMemory` while
    /// still exposing the raw code through [`OrcaError::dcam_code`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrcaError::NotReady => ErrorKind::NotReady,
            OrcaError::Busy => ErrorKind::Busy,
            OrcaError::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            OrcaError::Timeout => ErrorKind::Timeout,
            OrcaError::Aborted => ErrorKind::Aborted,
            OrcaError::Unsupported(_) => ErrorKind::Unsupported,
            OrcaError::DeviceNotFound { .. } => ErrorKind::NotFound,
            OrcaError::Closed => ErrorKind::Closed,
            OrcaError::WorkerPanicked | OrcaError::Spawn(_) => ErrorKind::Thread,
            OrcaError::Driver { code } => match *code {
                DcamErr::NO_MEMORY | DcamErr::LESS_SYSTEM_MEMORY => ErrorKind::OutOfMemory,
                DcamErr::NOT_SUPPORT
                | DcamErr::NOT_IMPLEMENT
                | DcamErr::INVALID_PROPERTY_ID
                | DcamErr::NO_PROPERTY => ErrorKind::Unsupported,
                DcamErr::NO_CAMERA | DcamErr::INVALID_CAMERA => ErrorKind::NotFound,
                _ => ErrorKind::Driver,
            },
        }
    }

    /// The raw driver code behind this error, if it came from the driver.
    pub fn dcam_code(&self) -> Option<DcamErr> {
        match self {
            OrcaError::Driver { code } => Some(*code),
            OrcaError::Busy => Some(DcamErr::BUSY),
            OrcaError::NotReady => Some(DcamErr::NOT_READY),
            OrcaError::Timeout => Some(DcamErr::TIMEOUT),
            OrcaError::Aborted => Some(DcamErr::ABORT),
            _ => None,
        }
    }

    /// Whether retrying the same call later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Timeout | ErrorKind::Busy)
    }
}

impl From<DcamErr> for OrcaError {
    fn from(code: DcamErr) -> Self {
        match code {
            DcamErr::BUSY => OrcaError::Busy,
            DcamErr::NOT_READY => OrcaError::NotReady,
            DcamErr::TIMEOUT => OrcaError::Timeout,
            DcamErr::ABORT => OrcaError::Aborted,
            code => OrcaError::Driver { code },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_codes_map_to_variants() {
        assert!(matches!(OrcaError::from(DcamErr::BUSY), OrcaError::Busy));
        assert!(matches!(OrcaError::from(DcamErr::NOT_READY), OrcaError::NotReady));
        assert!(matches!(OrcaError::from(DcamErr::TIMEOUT), OrcaError::Timeout));
        assert!(matches!(OrcaError::from(DcamErr::ABORT), OrcaError::Aborted));
    }

    #[test]
    fn driver_codes_keep_raw_value() {
        let err = OrcaError::from(DcamErr::OUT_OF_RANGE);
        assert_eq!(err.kind(), ErrorKind::Driver);
        assert_eq!(err.dcam_code(), Some(DcamErr::OUT_OF_RANGE));
        assert!(err.to_string().contains("0x80000822"));
    }

    #[test]
    fn driver_codes_are_classified() {
        assert_eq!(
            OrcaError::from(DcamErr::LESS_SYSTEM_MEMORY).kind(),
            ErrorKind::OutOfMemory
        );
        assert_eq!(
            OrcaError::from(DcamErr::NOT_SUPPORT).kind(),
            ErrorKind::Unsupported
        );
        assert_eq!(OrcaError::from(DcamErr::NO_CAMERA).kind(), ErrorKind::NotFound);
    }

    #[test]
    fn retryable_errors() {
        assert!(OrcaError::Timeout.is_retryable());
        assert!(!OrcaError::Closed.is_retryable());
        assert!(!OrcaError::from(DcamErr::NO_CAMERA).is_retryable());
    }
}
