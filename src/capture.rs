//! Capture controller: the Idle/Capturing state machine and its worker.
//!
//! Two acquisition styles share one state machine:
//!
//! - **Push** ([`Session::start`]): a dedicated worker thread blocks on the
//!   driver's frame-ready wait and calls the user callback for every frame,
//!   synchronously on the worker. A slow callback throttles delivery; the
//!   driver keeps filling the ring of arena slots regardless, so frames can
//!   be overwritten before they are seen.
//! - **Pull** ([`Session::start_acquisition`] + [`Session::acquire_image`]):
//!   no worker; the caller waits for each frame with its own timeout.
//!
//! # Lifecycle
//!
//! ```text
//!            start / start_acquisition
//!   Idle ─────────────────────────────▶ Streaming | Polling
//!    ▲                                        │
//!    └────────────────────────────────────────┘
//!                      stop
//! ```
//!
//! `start` fails with `Busy` unless idle; `stop` fails with `NotReady` when
//! idle. Both take `&mut self`, so transitions on one session never race.
//!
//! If the driver refuses to stop the sequence or to release the buffers,
//! the session moves to a halting state instead of idle. It still counts as
//! capturing, so settings and the arena stay locked, and `stop` may be
//! called again to retry.
//!
//! # Worker shutdown
//!
//! `stop` clears the shared capturing flag and aborts the wait. The worker
//! also re-checks the flag after every wait, including the internal
//! [`WAIT_TIMEOUT_MS`] timeouts, so it exits within one timeout even when
//! the abort raced with a callback. If the abort call itself fails, `stop`
//! waits a bounded grace period and then detaches the worker; the worker
//! keeps its own references to the driver and arena, so this is memory-safe.

use crate::arena::FrameArena;
use crate::driver::{Dcam, DcamErr, DeviceHandle, WaitHandle, EVENT_FRAME_READY};
use crate::error::{OrcaError, Result};
use crate::frame::{Frame, FrameGeometry};
use crate::session::Session;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Per-wait timeout used by the worker to notice a cleared capturing flag.
pub const WAIT_TIMEOUT_MS: u32 = 1000;

/// How long `stop` waits for the worker after a failed abort.
const DETACH_GRACE: Duration = Duration::from_millis(WAIT_TIMEOUT_MS as u64 + 500);

#[derive(Debug)]
pub(crate) enum CaptureState {
    Idle,
    Streaming { worker: JoinHandle<Result<()>> },
    Polling { geometry: FrameGeometry },
    /// A stop failed at the driver; the sequence may still be running.
    Halting,
}

/// Everything the worker needs, owned so the worker never borrows the session.
struct Worker {
    driver: Arc<dyn Dcam>,
    device: DeviceHandle,
    wait: WaitHandle,
    arena: Arc<FrameArena>,
    geometry: FrameGeometry,
    capturing: Arc<AtomicBool>,
}

impl Worker {
    fn run<F>(self, mut callback: F) -> Result<()>
    where
        F: FnMut(&Frame<'_>),
    {
        debug!(geometry = ?self.geometry, "acquisition worker started");
        let mut delivered: u64 = 0;

        let result = loop {
            if !self.capturing.load(Ordering::Acquire) {
                break Ok(());
            }
            match self
                .driver
                .wait_start(self.wait, EVENT_FRAME_READY, WAIT_TIMEOUT_MS)
            {
                Ok(_) => {}
                Err(DcamErr::TIMEOUT) => continue,
                Err(DcamErr::ABORT) => break Ok(()),
                Err(code) => break Err(OrcaError::from(code)),
            }
            if !self.capturing.load(Ordering::Acquire) {
                break Ok(());
            }

            let info = match self.driver.cap_transfer_info(self.device) {
                Ok(info) => info,
                Err(code) => {
                    debug!(code = %code, "transfer info failed, skipping frame");
                    continue;
                }
            };
            let index = usize::try_from(info.newest_frame_index).ok();
            let frame = index.and_then(|i| {
                let slot = self.arena.slot(i)?;
                Frame::from_slot(slot, &self.geometry, i, info.frame_count.max(0) as u64)
            });
            match frame {
                Some(frame) => {
                    trace!(index = frame.frame_index, number = frame.frame_number, "frame");
                    callback(&frame);
                    delivered += 1;
                }
                None => debug!(
                    index = info.newest_frame_index,
                    "newest frame index outside the arena, skipping"
                ),
            }
        };

        debug!(delivered, "acquisition worker exiting");
        result
    }
}

impl Session {
    fn begin(&mut self) -> Result<(DeviceHandle, WaitHandle, FrameGeometry, Arc<FrameArena>)> {
        let device = self.device()?;
        let wait = self.wait_handle()?;
        if self.is_capturing() {
            return Err(OrcaError::Busy);
        }
        let geometry = FrameGeometry::query(&*self.driver, device)?;
        // Re-registers the slots, reallocating first if the geometry moved.
        self.ensure_capacity(self.frame_count())?;
        let arena = self.arena.clone().ok_or(OrcaError::NotReady)?;
        Ok((device, wait, geometry, arena))
    }

    /// Start streaming frames to `callback` on a background worker.
    ///
    /// The callback runs on the worker thread once per frame, in delivery
    /// order, never concurrently with itself. The [`Frame`] it receives is
    /// only valid during the call. Anything the callback captures plays the
    /// role of the user context.
    ///
    /// # Errors
    ///
    /// - `Busy` if a capture is already running; the running one continues.
    /// - `Spawn` if the worker thread cannot be created.
    /// - The driver's error if arming the capture fails. The worker is
    ///   joined and the session is idle again before the error is returned.
    pub fn start<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnMut(&Frame<'_>) + Send + 'static,
    {
        let (device, wait, geometry, arena) = self.begin()?;

        self.capturing.store(true, Ordering::Release);
        let worker = Worker {
            driver: Arc::clone(&self.driver),
            device,
            wait,
            arena,
            geometry,
            capturing: Arc::clone(&self.capturing),
        };
        let spawned = thread::Builder::new()
            .name(format!("orcacam-acq-{}", self.index))
            .spawn(move || worker.run(callback));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                self.capturing.store(false, Ordering::Release);
                self.release_quietly(device);
                return Err(OrcaError::Spawn(err));
            }
        };

        if let Err(code) = self.driver.cap_start(device) {
            warn!(code = %code, "arming capture failed, stopping worker");
            self.capturing.store(false, Ordering::Release);
            if let Err(abort) = self.driver.wait_abort(wait) {
                debug!(code = %abort, "abort after failed start");
            }
            if let Err(err) = join_worker(handle, None) {
                debug!(error = %err, "worker result after failed start");
            }
            self.release_quietly(device);
            return Err(code.into());
        }

        self.capture = CaptureState::Streaming { worker: handle };
        info!(
            index = self.index,
            width = geometry.width,
            height = geometry.height,
            format = %geometry.pixel_format,
            "capture started"
        );
        Ok(())
    }

    /// Stop the running capture, push or pull.
    ///
    /// Stops the hardware sequence, releases the buffer registration, aborts
    /// the wait and joins the worker. When this returns no callback is
    /// running and none will start.
    ///
    /// # Errors
    ///
    /// `NotReady` when idle (nothing changes). Otherwise the worker's
    /// terminal error if it had one, then any driver error from stopping.
    /// After a driver error the session stays capturing and the call can be
    /// retried.
    pub fn stop(&mut self) -> Result<()> {
        let device = self.device()?;
        let wait = self.wait_handle()?;
        let worker = match std::mem::replace(&mut self.capture, CaptureState::Idle) {
            CaptureState::Idle => return Err(OrcaError::NotReady),
            CaptureState::Streaming { worker } => Some(worker),
            CaptureState::Polling { .. } | CaptureState::Halting => None,
        };

        let stopped = self.driver.cap_stop(device);
        let released = self.release_buffers(device);
        let aborted = self.driver.wait_abort(wait);
        self.capturing.store(false, Ordering::Release);

        let worker_result = match (worker, aborted) {
            (None, _) => Ok(()),
            (Some(worker), Ok(())) => join_worker(worker, None),
            (Some(worker), Err(code)) => {
                warn!(code = %code, "aborting the wait failed, waiting for worker timeout");
                join_worker(worker, Some(DETACH_GRACE)).and(Err(code.into()))
            }
        };

        if stopped.is_err() || released.is_err() {
            warn!(index = self.index, "driver did not stop cleanly, capture left halting");
            self.capture = CaptureState::Halting;
        } else {
            info!(index = self.index, "capture stopped");
        }

        worker_result?;
        stopped?;
        released
    }

    /// Arm a capture without a worker; frames are fetched with
    /// [`Session::acquire_image`].
    ///
    /// # Errors
    ///
    /// `Busy` if a capture is already running, or the driver's error.
    pub fn start_acquisition(&mut self) -> Result<()> {
        let (device, _wait, geometry, _arena) = self.begin()?;
        if let Err(code) = self.driver.cap_start(device) {
            self.release_quietly(device);
            return Err(code.into());
        }
        self.capture = CaptureState::Polling { geometry };
        info!(index = self.index, "polling acquisition started");
        Ok(())
    }

    /// Wait up to `timeout` for the next frame of a pull-style capture.
    ///
    /// The returned view borrows the session, so it must be dropped before
    /// the next call.
    ///
    /// # Errors
    ///
    /// - `NotReady` unless [`Session::start_acquisition`] is active.
    /// - `Timeout` when no frame arrived in time; retrying is fine.
    /// - `Aborted` when the wait was aborted.
    pub fn acquire_image(&mut self, timeout: Duration) -> Result<Frame<'_>> {
        let device = self.device()?;
        let wait = self.wait_handle()?;
        let CaptureState::Polling { geometry } = self.capture else {
            return Err(OrcaError::NotReady);
        };

        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        self.driver.wait_start(wait, EVENT_FRAME_READY, timeout_ms)?;
        let info = self.driver.cap_transfer_info(device)?;

        let arena = self.arena.as_deref().ok_or(OrcaError::NotReady)?;
        let index = usize::try_from(info.newest_frame_index)
            .map_err(|_| OrcaError::from(DcamErr::INVALID_IMAGE))?;
        arena
            .slot(index)
            .and_then(|slot| {
                Frame::from_slot(slot, &geometry, index, info.frame_count.max(0) as u64)
            })
            .ok_or(OrcaError::Driver {
                code: DcamErr::INVALID_IMAGE,
            })
    }

    /// End a pull-style capture. Same as [`Session::stop`].
    pub fn stop_acquisition(&mut self) -> Result<()> {
        self.stop()
    }

    fn release_quietly(&mut self, device: DeviceHandle) {
        if let Err(err) = self.release_buffers(device) {
            debug!(error = %err, "buffer release failed");
        }
    }
}

/// Join the worker, or after `grace` give up and detach it.
fn join_worker(worker: JoinHandle<Result<()>>, grace: Option<Duration>) -> Result<()> {
    if let Some(grace) = grace {
        let deadline = Instant::now() + grace;
        while !worker.is_finished() {
            if Instant::now() >= deadline {
                warn!("acquisition worker still running, detaching it");
                return Ok(());
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
    worker.join().unwrap_or(Err(OrcaError::WorkerPanicked))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MockDcam;
    use crate::runtime::Runtime;
    use std::sync::atomic::AtomicUsize;

    fn session(mock: &MockDcam) -> Session {
        Runtime::new(Arc::new(mock.clone())).open(0, 4).unwrap()
    }

    #[test]
    fn stop_when_idle_is_not_ready() {
        let mock = MockDcam::with_sensor(32, 32);
        let mut session = session(&mock);
        let generation = session.arena().unwrap().generation();
        assert!(matches!(session.stop(), Err(OrcaError::NotReady)));
        assert!(!session.is_capturing());
        assert_eq!(session.arena().unwrap().generation(), generation);
    }

    #[test]
    fn worker_exits_on_abort() {
        let mock = MockDcam::with_sensor(32, 32);
        let mut session = session(&mock);
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        session
            .start(move |_frame| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        thread::sleep(Duration::from_millis(50));
        session.stop().unwrap();
        let after_stop = count.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn panicking_callback_is_reported() {
        let mock = MockDcam::with_sensor(32, 32);
        let mut session = session(&mock);
        session.start(|_frame| panic!("callback failure")).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(matches!(session.stop(), Err(OrcaError::WorkerPanicked)));
        assert!(!session.is_capturing());
    }

    #[test]
    fn acquire_without_polling_is_not_ready() {
        let mock = MockDcam::with_sensor(32, 32);
        let mut session = session(&mock);
        assert!(matches!(
            session.acquire_image(Duration::from_millis(10)),
            Err(OrcaError::NotReady)
        ));
    }
}
