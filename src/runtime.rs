//! Process-wide DCAM-API state.
//!
//! `dcamapi_init` / `dcamapi_uninit` affect the whole process. [`Runtime`]
//! makes that state explicit:
//!
//! - The API is initialized on first use (`list_devices` or `open`).
//! - Every open [`Session`] holds a reference; when the last one closes the
//!   API is uninitialized again.
//! - [`Runtime::shutdown`] tears down explicitly. It is safe to call when
//!   the API was never initialized and fails with `Busy` while sessions are
//!   still open.
//!
//! With the `dcam_sdk` feature, [`Runtime::hardware`] returns the single
//! runtime bound to the real driver. Tests build their own runtimes around a
//! [`MockDcam`](crate::driver::MockDcam).

use crate::driver::Dcam;
use crate::error::{OrcaError, Result};
use crate::session::Session;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct RuntimeState {
    /// Device count from `dcamapi_init`; `Some` while initialized.
    device_count: Option<u32>,
    /// Sessions opened (or being opened) through this runtime.
    sessions: usize,
}

/// Explicit owner of the DCAM-API init state.
pub struct Runtime {
    driver: Arc<dyn Dcam>,
    state: Mutex<RuntimeState>,
}

impl Runtime {
    /// Wrap a driver. The API is not initialized until first use.
    pub fn new(driver: Arc<dyn Dcam>) -> Arc<Self> {
        Arc::new(Self {
            driver,
            state: Mutex::new(RuntimeState::default()),
        })
    }

    /// The runtime bound to the installed DCAM-API.
    #[cfg(feature = "dcam_sdk")]
    pub fn hardware() -> Arc<Self> {
        use crate::driver::HardwareDcam;
        use std::sync::OnceLock;

        static HARDWARE: OnceLock<Arc<Runtime>> = OnceLock::new();
        Arc::clone(HARDWARE.get_or_init(|| Runtime::new(Arc::new(HardwareDcam::new()))))
    }

    /// The driver this runtime talks to.
    pub fn driver(&self) -> &Arc<dyn Dcam> {
        &self.driver
    }

    // Recover from poison so the session count stays consistent even after a
    // panic in another thread.
    fn lock(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("runtime state mutex poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    fn ensure_init(&self, state: &mut RuntimeState) -> Result<u32> {
        if let Some(count) = state.device_count {
            return Ok(count);
        }
        let count = self.driver.api_init()?;
        info!(devices = count, "DCAM-API initialized");
        state.device_count = Some(count);
        Ok(count)
    }

    fn uninit(&self, state: &mut RuntimeState) -> Result<()> {
        if state.device_count.take().is_none() {
            return Ok(());
        }
        self.driver.api_uninit()?;
        info!("DCAM-API uninitialized");
        Ok(())
    }

    /// Number of cameras found by the API, initializing it if needed.
    pub fn list_devices(&self) -> Result<u32> {
        let mut state = self.lock();
        self.ensure_init(&mut state)
    }

    /// Open camera `index` with `frame_count` buffer slots.
    ///
    /// See [`Session`] for what opening involves. On failure nothing stays
    /// open, and if no other session exists the API is uninitialized again.
    ///
    /// # Errors
    ///
    /// `DeviceNotFound` when `index` is not below the device count (including
    /// when no cameras are connected), otherwise whatever the first failing
    /// open step returned.
    pub fn open(self: &Arc<Self>, index: u32, frame_count: usize) -> Result<Session> {
        {
            let mut state = self.lock();
            let available = self.ensure_init(&mut state)?;
            if index >= available {
                if state.sessions == 0 {
                    if let Err(err) = self.uninit(&mut state) {
                        warn!(error = %err, "uninit after failed open reported an error");
                    }
                }
                return Err(OrcaError::DeviceNotFound { index, available });
            }
            state.sessions += 1;
        }

        match Session::open(Arc::clone(self), index, frame_count) {
            Ok(session) => {
                info!(index, "camera opened");
                Ok(session)
            }
            Err(err) => {
                self.release();
                Err(err)
            }
        }
    }

    /// Drop one session reference; the last one uninitializes the API.
    pub(crate) fn release(&self) {
        let mut state = self.lock();
        state.sessions = state.sessions.saturating_sub(1);
        if state.sessions == 0 {
            if let Err(err) = self.uninit(&mut state) {
                warn!(error = %err, "DCAM-API uninit failed");
            }
        } else {
            debug!(sessions = state.sessions, "session released");
        }
    }

    /// Uninitialize the API now.
    ///
    /// Does nothing if it is not initialized; calling it repeatedly is fine.
    ///
    /// # Errors
    ///
    /// `Busy` while any session is open, or the driver's uninit error.
    pub fn shutdown(&self) -> Result<()> {
        let mut state = self.lock();
        if state.sessions > 0 {
            return Err(OrcaError::Busy);
        }
        self.uninit(&mut state)
    }

    /// Whether `dcamapi_init` has succeeded and not been undone.
    pub fn is_initialized(&self) -> bool {
        self.lock().device_count.is_some()
    }

    /// Number of sessions currently holding the API open.
    pub fn open_sessions(&self) -> usize {
        self.lock().sessions
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime").field("state", &*self.lock()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DcamErr, MockDcam, MockOp};

    fn runtime() -> (Arc<Runtime>, MockDcam) {
        let mock = MockDcam::with_sensor(64, 64);
        (Runtime::new(Arc::new(mock.clone())), mock)
    }

    #[test]
    fn init_happens_on_first_use() {
        let (rt, mock) = runtime();
        assert!(!rt.is_initialized());
        assert_eq!(rt.list_devices().unwrap(), 1);
        assert!(rt.is_initialized());
        assert_eq!(rt.list_devices().unwrap(), 1);
        assert_eq!(mock.init_calls(), 1);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let (rt, mock) = runtime();
        rt.shutdown().unwrap();
        assert_eq!(mock.uninit_calls(), 0);

        rt.list_devices().unwrap();
        rt.shutdown().unwrap();
        rt.shutdown().unwrap();
        assert!(!rt.is_initialized());
        assert_eq!(mock.uninit_calls(), 1);
    }

    #[test]
    fn init_failure_is_reported() {
        let (rt, mock) = runtime();
        mock.fail_next(MockOp::ApiInit, DcamErr::NO_DRIVER);
        let err = rt.list_devices().unwrap_err();
        assert_eq!(err.dcam_code(), Some(DcamErr::NO_DRIVER));
        assert!(!rt.is_initialized());
        assert_eq!(rt.list_devices().unwrap(), 1);
    }

    #[test]
    fn bad_index_rolls_back_init() {
        let (rt, _mock) = runtime();
        let err = rt.open(3, 4).unwrap_err();
        assert!(matches!(
            err,
            OrcaError::DeviceNotFound {
                index: 3,
                available: 1
            }
        ));
        assert!(!rt.is_initialized());
        assert_eq!(rt.open_sessions(), 0);
    }

    #[test]
    fn last_close_uninitializes() {
        let (rt, mock) = runtime();
        let mut session = rt.open(0, 2).unwrap();
        assert_eq!(rt.open_sessions(), 1);
        assert!(matches!(rt.shutdown(), Err(OrcaError::Busy)));

        session.close().unwrap();
        assert_eq!(rt.open_sessions(), 0);
        assert!(!rt.is_initialized());
        assert_eq!(mock.uninit_calls(), 1);
    }
}
