//! Device sessions: one open camera, its wait handle and its frame arena.
//!
//! A [`Session`] is created by [`Runtime::open`] and owns every driver
//! resource that belongs to one camera. It is move-only; closing it (either
//! explicitly with [`Session::close`] or by dropping it) stops any running
//! capture and releases everything in reverse order of acquisition.
//!
//! Opening performs, in order:
//!
//! 1. `dcamdev_open`
//! 2. `dcamwait_open`
//! 3. ROI reset to the full sensor
//! 4. pixel format `Mono16`
//! 5. arena allocation and registration
//!
//! If any step fails, the steps already done are undone before the error is
//! returned.

use crate::arena::FrameArena;
use crate::capture::CaptureState;
use crate::driver::{Dcam, DeviceHandle, PropId, StringId, WaitHandle};
use crate::error::{OrcaError, Result};
use crate::frame::PixelFormat;
use crate::properties::Roi;
use crate::runtime::Runtime;
use serde::Serialize;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Identification strings and sensor dimensions of one camera.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    /// `DCAM_IDSTR_VENDOR`
    pub vendor: String,
    /// `DCAM_IDSTR_MODEL`
    pub model: String,
    /// `DCAM_IDSTR_CAMERAID`
    pub camera_id: String,
    /// `DCAM_IDSTR_BUS`
    pub bus: String,
    /// `DCAM_IDSTR_CAMERAVERSION`
    pub camera_version: String,
    /// `DCAM_IDSTR_DRIVERVERSION`
    pub driver_version: String,
    /// `DCAM_IDSTR_MODULEVERSION`
    pub module_version: String,
    /// `DCAM_IDSTR_DCAMAPIVERSION`
    pub api_version: String,
    /// Sensor width in pixels.
    pub sensor_width: u32,
    /// Sensor height in pixels.
    pub sensor_height: u32,
    /// Pixel pitch in micrometres, horizontal.
    pub pixel_width_um: f64,
    /// Pixel pitch in micrometres, vertical.
    pub pixel_height_um: f64,
}

/// An open camera.
pub struct Session {
    pub(crate) runtime: Option<Arc<Runtime>>,
    pub(crate) driver: Arc<dyn Dcam>,
    pub(crate) index: u32,
    pub(crate) device: Option<DeviceHandle>,
    pub(crate) wait: Option<WaitHandle>,
    /// Shared with the acquisition worker; cleared to make it exit.
    pub(crate) capturing: Arc<AtomicBool>,
    pub(crate) arena: Option<Arc<FrameArena>>,
    /// Whether the driver currently holds the arena's slot addresses.
    pub(crate) buffers_attached: bool,
    pub(crate) capture: CaptureState,
}

impl Session {
    pub(crate) fn open(runtime: Arc<Runtime>, index: u32, frame_count: usize) -> Result<Self> {
        let driver = Arc::clone(runtime.driver());
        let device = driver.dev_open(index)?;

        let mut session = Session {
            runtime: None,
            driver,
            index,
            device: Some(device),
            wait: None,
            capturing: Arc::new(AtomicBool::new(false)),
            arena: None,
            buffers_attached: false,
            capture: CaptureState::Idle,
        };

        if let Err(err) = session.initialize(frame_count) {
            debug!(index, error = %err, "open failed, unwinding");
            // The caller's error is the interesting one.
            let _ = session.teardown();
            return Err(err);
        }

        session.runtime = Some(runtime);
        Ok(session)
    }

    fn initialize(&mut self, frame_count: usize) -> Result<()> {
        let device = self.device()?;
        self.wait = Some(self.driver.wait_open(device)?);

        let (width, height) = self.sensor_size()?;
        self.set_roi(Roi::full(width, height))?;
        self.set_pixel_format(PixelFormat::Mono16)?;
        self.ensure_capacity(frame_count)
    }

    /// Handle of the open device, or `Closed`.
    pub(crate) fn device(&self) -> Result<DeviceHandle> {
        self.device.ok_or(OrcaError::Closed)
    }

    /// Wait handle of the open device, or `Closed`.
    pub(crate) fn wait_handle(&self) -> Result<WaitHandle> {
        self.wait.ok_or(OrcaError::Closed)
    }

    /// Index the camera was opened with.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Whether [`Session::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.device.is_none()
    }

    /// Whether a push or pull capture is active, or a stop is still pending
    /// at the driver.
    pub fn is_capturing(&self) -> bool {
        !matches!(self.capture, CaptureState::Idle)
    }

    /// Read identification strings and sensor dimensions.
    ///
    /// Any unreadable field fails the whole call.
    pub fn device_info(&self) -> Result<DeviceInfo> {
        let device = self.device()?;
        let string = |id| self.driver.dev_string(device, id);
        let (sensor_width, sensor_height) = self.sensor_size()?;

        Ok(DeviceInfo {
            vendor: string(StringId::Vendor)?,
            model: string(StringId::Model)?,
            camera_id: string(StringId::CameraId)?,
            bus: string(StringId::Bus)?,
            camera_version: string(StringId::CameraVersion)?,
            driver_version: string(StringId::DriverVersion)?,
            module_version: string(StringId::ModuleVersion)?,
            api_version: string(StringId::DcamApiVersion)?,
            sensor_width,
            sensor_height,
            pixel_width_um: self
                .driver
                .prop_get(device, PropId::IMAGE_DETECTOR_PIXEL_WIDTH)?,
            pixel_height_um: self
                .driver
                .prop_get(device, PropId::IMAGE_DETECTOR_PIXEL_HEIGHT)?,
        })
    }

    /// Stop any capture and release the wait handle, device and arena.
    ///
    /// Every step runs even if an earlier one failed; failures are logged
    /// and the first one is returned. A closed session stays closed, and
    /// closing it again returns `Ok(())`.
    pub fn close(&mut self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let result = self.teardown();
        if let Some(runtime) = self.runtime.take() {
            runtime.release();
        }
        info!(index = self.index, "camera closed");
        result
    }

    fn teardown(&mut self) -> Result<()> {
        let mut first_error: Option<OrcaError> = None;
        let mut record = |step: &str, err: OrcaError| {
            warn!(step, error = %err, "teardown step failed");
            first_error.get_or_insert(err);
        };

        if self.is_capturing() {
            match self.stop() {
                Ok(()) | Err(OrcaError::NotReady) => {}
                Err(err) => record("stop capture", err),
            }
        }
        if let Some(wait) = self.wait.take() {
            if let Err(code) = self.driver.wait_close(wait) {
                record("close wait handle", code.into());
            }
        }
        if let Some(device) = self.device.take() {
            // Closing the device drops its buffer registration.
            match self.driver.dev_close(device) {
                Ok(()) => self.buffers_attached = false,
                Err(code) => record("close device", code.into()),
            }
        }
        match self.arena.take() {
            Some(arena) if self.buffers_attached => {
                warn!(
                    index = self.index,
                    bytes = arena.len(),
                    "device still holds the frame buffers, leaking them"
                );
                std::mem::forget(arena);
            }
            _ => {}
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(index = self.index, error = %err, "error while closing dropped session");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("index", &self.index)
            .field("device", &self.device)
            .field("capture", &self.capture)
            .field("arena", &self.arena)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DcamErr, MockDcam, MockOp};
    use tracing_test::traced_test;

    fn open(mock: &MockDcam) -> Result<Session> {
        Runtime::new(Arc::new(mock.clone())).open(0, 4)
    }

    #[test]
    fn open_configures_full_sensor_mono16() {
        let mock = MockDcam::with_sensor(128, 64);
        let session = open(&mock).unwrap();
        assert_eq!(session.roi().unwrap(), Roi::full(128, 64));
        assert_eq!(session.pixel_format().unwrap(), PixelFormat::Mono16);
        let arena = session.arena().unwrap();
        assert_eq!(arena.frame_count(), 4);
        assert_eq!(arena.frame_bytes(), 128 * 2 * 64);
    }

    #[test]
    fn wait_open_failure_unwinds_device() {
        let mock = MockDcam::with_sensor(64, 64);
        mock.fail_next(MockOp::WaitOpen, DcamErr::NO_RESOURCE);
        assert!(open(&mock).is_err());
        assert_eq!(mock.open_devices(), 0);
        assert_eq!(mock.open_waits(), 0);
    }

    #[test]
    fn close_is_idempotent_and_blocks_later_use() {
        let mock = MockDcam::with_sensor(64, 64);
        let mut session = open(&mock).unwrap();
        session.close().unwrap();
        session.close().unwrap();
        assert!(session.is_closed());
        assert!(matches!(session.exposure(), Err(OrcaError::Closed)));
        assert!(matches!(session.device_info(), Err(OrcaError::Closed)));
        assert!(session.arena().is_none());
    }

    #[test]
    fn drop_closes_device() {
        let mock = MockDcam::with_sensor(64, 64);
        {
            let _session = open(&mock).unwrap();
            assert_eq!(mock.open_devices(), 1);
        }
        assert_eq!(mock.open_devices(), 0);
        assert_eq!(mock.open_waits(), 0);
    }

    #[test]
    fn device_info_reads_all_fields() {
        let mock = MockDcam::with_sensor(64, 32);
        let session = open(&mock).unwrap();
        let info = session.device_info().unwrap();
        assert_eq!(info.vendor, "HAMAMATSU");
        assert_eq!(info.sensor_width, 64);
        assert_eq!(info.sensor_height, 32);
        assert!(info.pixel_width_um > 0.0);
    }

    #[test]
    fn device_info_fails_on_unreadable_string() {
        let mock = MockDcam::with_sensor(64, 64);
        let session = open(&mock).unwrap();
        mock.fail_next(MockOp::DevString, DcamErr::NOT_SUPPORT);
        let err = session.device_info().unwrap_err();
        assert_eq!(err.dcam_code(), Some(DcamErr::NOT_SUPPORT));
    }

    #[test]
    #[traced_test]
    fn failing_teardown_step_is_logged_and_later_steps_run() {
        let mock = MockDcam::with_sensor(64, 64);
        let rt = Runtime::new(Arc::new(mock.clone()));
        let mut session = rt.open(0, 2).unwrap();
        mock.fail_next(MockOp::WaitClose, DcamErr::INVALID_WAIT_HANDLE);

        let err = session.close().unwrap_err();
        assert_eq!(err.dcam_code(), Some(DcamErr::INVALID_WAIT_HANDLE));
        assert!(logs_contain("teardown step failed"));
        assert!(session.is_closed());
        assert_eq!(mock.open_devices(), 0);
        assert!(!rt.is_initialized());
    }

    #[test]
    #[traced_test]
    fn dropped_session_logs_close_failure() {
        let mock = MockDcam::with_sensor(64, 64);
        let session = open(&mock).unwrap();
        mock.fail_next(MockOp::DevClose, DcamErr::NO_CONNECTION);
        drop(session);
        assert!(logs_contain("error while closing dropped session"));
    }
}
