//! Push and pull acquisition against the simulated camera.

use orcacam::driver::{DcamErr, MockDcam, MockOp};
use orcacam::{ErrorKind, OrcaError, PixelFormat, Roi, Runtime, Session};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const FRAME_WAIT: Duration = Duration::from_secs(3);

#[derive(Debug)]
struct Seen {
    width: u32,
    height: u32,
    format: PixelFormat,
    number: u64,
    origin: Option<u16>,
    probe: Option<u16>,
    len: usize,
}

fn open(mock: &MockDcam, frames: usize) -> Session {
    Runtime::new(Arc::new(mock.clone())).open(0, frames).unwrap()
}

/// Start a push capture that forwards a summary of each frame.
fn start_forwarding(session: &mut Session) -> mpsc::Receiver<Seen> {
    let (tx, rx) = mpsc::channel();
    session
        .start(move |frame| {
            let _ = tx.send(Seen {
                width: frame.width,
                height: frame.height,
                format: frame.pixel_format,
                number: frame.frame_number,
                origin: frame.pixel_u16(0, 0),
                probe: frame.pixel_u16(3, 2),
                len: frame.data.len(),
            });
        })
        .unwrap();
    rx
}

#[test]
fn test_push_capture_delivers_roi_frames() {
    let mock = MockDcam::with_sensor(256, 256);
    let mut session = open(&mock, 4);
    session
        .set_roi(Roi {
            x: 64,
            y: 32,
            width: 128,
            height: 128,
        })
        .unwrap();

    let rx = start_forwarding(&mut session);
    assert!(session.is_capturing());
    let frames: Vec<Seen> = (0..10)
        .map(|_| rx.recv_timeout(FRAME_WAIT).expect("frame"))
        .collect();
    session.stop().unwrap();
    assert!(!session.is_capturing());

    for seen in &frames {
        assert_eq!((seen.width, seen.height), (128, 128));
        assert_eq!(seen.format, PixelFormat::Mono16);
        assert_eq!(seen.len, 128 * 128 * 2);
        // Test pattern: pixel (x, y) of frame n holds x + y + n.
        assert_eq!(seen.origin, Some(seen.number as u16));
        assert_eq!(seen.probe, Some(seen.number as u16 + 5));
    }
    assert!(frames.windows(2).all(|w| w[0].number <= w[1].number));
    assert!(frames.last().map_or(0, |f| f.number) >= 10);
}

#[test]
fn test_no_callbacks_after_stop() {
    let mock = MockDcam::with_sensor(64, 64);
    let mut session = open(&mock, 4);
    let count = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&count);
    session
        .start(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    thread::sleep(Duration::from_millis(80));
    session.stop().unwrap();

    let at_stop = count.load(Ordering::SeqCst);
    assert!(at_stop > 0);
    thread::sleep(Duration::from_millis(80));
    assert_eq!(count.load(Ordering::SeqCst), at_stop);
    assert!(!mock.is_capturing());
    assert_eq!(mock.attached_slots(), 0);
}

#[test]
fn test_start_while_capturing_is_busy() {
    let mock = MockDcam::with_sensor(64, 64);
    let mut session = open(&mock, 4);
    let rx = start_forwarding(&mut session);

    let err = session.start(|_| {}).unwrap_err();
    assert!(matches!(err, OrcaError::Busy));
    assert!(matches!(session.start_acquisition(), Err(OrcaError::Busy)));

    // The first capture keeps running.
    assert!(rx.recv_timeout(FRAME_WAIT).is_ok());
    session.stop().unwrap();
}

#[test]
fn test_stop_when_idle_is_not_ready() {
    let mock = MockDcam::with_sensor(64, 64);
    let mut session = open(&mock, 4);
    let err = session.stop().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotReady);
    assert!(matches!(session.stop_acquisition(), Err(OrcaError::NotReady)));
}

#[test]
fn test_arming_failure_leaves_session_idle() {
    let mock = MockDcam::with_sensor(64, 64);
    let mut session = open(&mock, 4);
    mock.fail_next(MockOp::CapStart, DcamErr::NO_RESOURCE);

    let err = session.start(|_| {}).unwrap_err();
    assert_eq!(err.dcam_code(), Some(DcamErr::NO_RESOURCE));
    assert!(!session.is_capturing());
    assert!(!mock.is_capturing());
    assert!(matches!(session.stop(), Err(OrcaError::NotReady)));

    // A later start works normally.
    let rx = start_forwarding(&mut session);
    assert!(rx.recv_timeout(FRAME_WAIT).is_ok());
    session.stop().unwrap();
}

#[test]
fn test_settings_are_locked_while_capturing() {
    let mock = MockDcam::with_sensor(64, 64);
    let mut session = open(&mock, 4);
    let _rx = start_forwarding(&mut session);

    assert!(matches!(session.set_exposure(0.02), Err(OrcaError::Busy)));
    assert!(matches!(session.set_frame_rate(10.0), Err(OrcaError::Busy)));
    assert!(matches!(
        session.set_roi(Roi::full(32, 32)),
        Err(OrcaError::Busy)
    ));
    assert!(matches!(
        session.set_pixel_format(PixelFormat::Mono8),
        Err(OrcaError::Busy)
    ));
    assert!(matches!(session.ensure_capacity(8), Err(OrcaError::Busy)));
    assert_eq!(session.frame_count(), 4);

    // Cooling may change at any time.
    assert_eq!(session.set_temperature_target(-15.0).unwrap(), -15.0);
    session.stop().unwrap();
}

#[test]
fn test_restart_reattaches_buffers() {
    let mock = MockDcam::with_sensor(64, 64);
    let mut session = open(&mock, 3);

    for _ in 0..3 {
        let attaches = mock.attach_calls();
        let rx = start_forwarding(&mut session);
        assert_eq!(mock.attach_calls(), attaches + 1);
        assert_eq!(mock.attached_slots(), 3);
        assert!(rx.recv_timeout(FRAME_WAIT).is_ok());
        session.stop().unwrap();
    }
}

#[test]
fn test_geometry_change_between_captures() {
    let mock = MockDcam::with_sensor(64, 64);
    let mut session = open(&mock, 4);
    let rx = start_forwarding(&mut session);
    let first = rx.recv_timeout(FRAME_WAIT).unwrap();
    session.stop().unwrap();
    assert_eq!(first.format, PixelFormat::Mono16);

    let generation = session.arena().unwrap().generation();
    session.set_pixel_format(PixelFormat::Mono8).unwrap();
    assert!(session.arena().unwrap().generation() > generation);

    let (tx, rx) = mpsc::channel();
    session
        .start(move |frame| {
            let _ = tx.send((frame.pixel_format, frame.frame_number, frame.pixel_u8(0, 0)));
        })
        .unwrap();
    let (format, number, origin) = rx.recv_timeout(FRAME_WAIT).unwrap();
    session.stop().unwrap();
    assert_eq!(format, PixelFormat::Mono8);
    assert_eq!(origin, Some(number as u8));
}

#[test]
fn test_top_offset_is_skipped() {
    let mock = MockDcam::with_sensor(32, 32);
    mock.set_top_offset(128);
    let mut session = open(&mock, 4);
    assert_eq!(session.arena().unwrap().frame_bytes(), 128 + 32 * 32 * 2);

    let rx = start_forwarding(&mut session);
    let seen = rx.recv_timeout(FRAME_WAIT).unwrap();
    session.stop().unwrap();
    assert_eq!(seen.len, 32 * 32 * 2);
    assert_eq!(seen.origin, Some(seen.number as u16));
}

#[test]
fn test_pull_capture() {
    let mock = MockDcam::with_sensor(64, 64);
    let mut session = open(&mock, 4);
    session.start_acquisition().unwrap();
    assert!(session.is_capturing());

    let mut numbers = Vec::new();
    for _ in 0..5 {
        let frame = session.acquire_image(FRAME_WAIT).unwrap();
        assert_eq!((frame.width, frame.height), (64, 64));
        assert_eq!(frame.pixel_u16(0, 0), Some(frame.frame_number as u16));
        numbers.push(frame.frame_number);
    }
    assert!(numbers.windows(2).all(|w| w[0] <= w[1]));
    assert!(numbers[4] >= 5);

    session.stop_acquisition().unwrap();
    assert!(matches!(
        session.acquire_image(Duration::from_millis(10)),
        Err(OrcaError::NotReady)
    ));
}

#[test]
fn test_pull_timeout_is_retryable() {
    let mock = MockDcam::with_sensor(64, 64);
    let mut session = open(&mock, 4);
    session.set_frame_rate(1.0).unwrap();
    session.start_acquisition().unwrap();

    let err = session.acquire_image(Duration::from_millis(50)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(err.is_retryable());
    assert!(session.is_capturing());

    session.stop_acquisition().unwrap();
}

#[test]
fn test_close_while_capturing_stops_everything() {
    let mock = MockDcam::with_sensor(64, 64);
    let mut session = open(&mock, 4);
    let _rx = start_forwarding(&mut session);

    session.close().unwrap();
    assert!(!mock.is_capturing());
    assert_eq!(mock.open_devices(), 0);
    assert_eq!(mock.open_waits(), 0);
    assert!(matches!(session.start(|_| {}), Err(OrcaError::Closed)));
}

#[test]
fn test_drop_while_capturing_stops_everything() {
    let mock = MockDcam::with_sensor(64, 64);
    {
        let mut session = open(&mock, 4);
        let _rx = start_forwarding(&mut session);
        thread::sleep(Duration::from_millis(30));
    }
    assert!(!mock.is_capturing());
    assert_eq!(mock.open_devices(), 0);
    assert!(!mock.is_initialized());
}

#[test]
fn test_failed_driver_stop_keeps_buffers_pinned() {
    let mock = MockDcam::with_sensor(64, 64);
    let mut session = open(&mock, 4);
    let rx = start_forwarding(&mut session);
    assert!(rx.recv_timeout(FRAME_WAIT).is_ok());

    mock.fail_next(MockOp::CapStop, DcamErr::NO_CONNECTION);
    let err = session.stop().unwrap_err();
    assert_eq!(err.dcam_code(), Some(DcamErr::NO_CONNECTION));

    // The camera is still streaming into the slots, so nothing may move.
    assert!(mock.is_capturing());
    assert!(session.is_capturing());
    let generation = session.arena().unwrap().generation();
    assert!(matches!(session.ensure_capacity(8), Err(OrcaError::Busy)));
    assert!(matches!(
        session.set_pixel_format(PixelFormat::Mono8),
        Err(OrcaError::Busy)
    ));
    assert_eq!(session.arena().unwrap().generation(), generation);
    assert_eq!(session.frame_count(), 4);
    assert_eq!(mock.attached_slots(), 4);

    // Retrying the stop finishes the job and unlocks the arena.
    session.stop().unwrap();
    assert!(!mock.is_capturing());
    assert!(!session.is_capturing());
    session.ensure_capacity(8).unwrap();
    assert_eq!(session.frame_count(), 8);
    assert!(session.arena().unwrap().generation() > generation);
}

#[test]
fn test_failed_release_keeps_previous_arena() {
    let mock = MockDcam::with_sensor(64, 64);
    let mut session = open(&mock, 4);
    let generation = session.arena().unwrap().generation();

    mock.fail_next(MockOp::BufRelease, DcamErr::NO_CONNECTION);
    let err = session.ensure_capacity(8).unwrap_err();
    assert_eq!(err.dcam_code(), Some(DcamErr::NO_CONNECTION));
    assert_eq!(session.frame_count(), 4);
    assert_eq!(session.arena().unwrap().generation(), generation);
    assert_eq!(mock.attached_slots(), 4);

    session.ensure_capacity(8).unwrap();
    assert_eq!(session.frame_count(), 8);
    assert_eq!(mock.attached_slots(), 8);
}

#[test]
fn test_close_after_failed_stop_shuts_camera_down() {
    let mock = MockDcam::with_sensor(64, 64);
    let mut session = open(&mock, 4);
    let _rx = start_forwarding(&mut session);

    mock.fail_next(MockOp::CapStop, DcamErr::NO_CONNECTION);
    assert!(session.stop().is_err());
    session.close().unwrap();
    assert!(!mock.is_capturing());
    assert_eq!(mock.open_devices(), 0);
    assert!(!mock.is_initialized());
}
