//! Simulated DCAM camera.
//!
//! [`MockDcam`] implements [`Dcam`] entirely in-process so the wrapper can be
//! exercised without hardware. It models the parts of the driver the wrapper
//! depends on:
//!
//! - device enumeration and exclusive open,
//! - a property table with ranges, steps, value texts and read-only derived
//!   geometry (`IMAGE_*`, `BUFFER_*`) computed from subarray and pixel type,
//! - buffer attach/release and a generator thread that writes a test
//!   pattern into the attached slots at the configured frame interval,
//! - wait handles that wake on new frames, time out, and abort,
//! - one-shot failure injection for any call ([`MockDcam::fail_next`]).
//!
//! Pixel `(x, y)` of frame `n` (1-based) holds `x + y + n`, truncated to the
//! pixel width, so tests can check which frame they were handed.
//!
//! Clones share state, so a test keeps one clone for inspection and gives
//! another to the runtime.

use super::{
    attr, Dcam, DcamErr, DcamResult, DeviceHandle, EnumOption, PropAttr, PropId, QueryOption,
    SlotPtr, StringId, TransferInfo, WaitHandle, EVENT_FRAME_READY, MODE_OFF, MODE_ON,
};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const PIXEL_TYPE_MONO8: f64 = 1.0;
const PIXEL_TYPE_MONO16: f64 = 2.0;
const SUBARRAY_STEP: f64 = 4.0;
const PIXEL_PITCH_UM: f64 = 4.6;

/// A driver call that can be made to fail with [`MockDcam::fail_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    /// `api_init`
    ApiInit,
    /// `api_uninit`
    ApiUninit,
    /// `dev_open`
    DevOpen,
    /// `dev_close`
    DevClose,
    /// `dev_string`
    DevString,
    /// `wait_open`
    WaitOpen,
    /// `wait_close`
    WaitClose,
    /// `wait_start`
    WaitStart,
    /// `wait_abort`
    WaitAbort,
    /// `prop_get` of one property.
    PropGet(PropId),
    /// `prop_set` / `prop_setget` of one property.
    PropSet(PropId),
    /// `buf_attach`
    BufAttach,
    /// `buf_release`
    BufRelease,
    /// `cap_start`
    CapStart,
    /// `cap_stop`
    CapStop,
    /// `cap_transfer_info`
    TransferInfo,
}

/// Simulated DCAM driver. See the module docs.
#[derive(Clone)]
pub struct MockDcam {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<MockState>,
    /// Signalled when a frame is delivered or a wait is aborted.
    frame_ready: Condvar,
    /// Signalled when a capture stops so the generator exits promptly.
    control: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Default)]
struct Counters {
    init: usize,
    uninit: usize,
    attach: usize,
    release: usize,
    abort: usize,
}

struct MockState {
    initialized: bool,
    device_count: u32,
    sensor: (u32, u32),
    top_offset: usize,
    supported_modes: Vec<u32>,
    next_handle: usize,
    devices: HashMap<DeviceHandle, MockDevice>,
    waits: HashMap<WaitHandle, MockWait>,
    failures: HashMap<MockOp, DcamErr>,
    counters: Counters,
}

impl MockState {
    fn take_failure(&mut self, op: MockOp) -> DcamResult<()> {
        match self.failures.remove(&op) {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }

    fn handle(&mut self) -> usize {
        self.next_handle += 1;
        self.next_handle
    }

    fn device(&self, dev: DeviceHandle) -> DcamResult<&MockDevice> {
        self.devices.get(&dev).ok_or(DcamErr::INVALID_HANDLE)
    }

    fn device_mut(&mut self, dev: DeviceHandle) -> DcamResult<&mut MockDevice> {
        self.devices.get_mut(&dev).ok_or(DcamErr::INVALID_HANDLE)
    }

    fn is_active(&self, dev: DeviceHandle, epoch: u64) -> bool {
        self.devices
            .get(&dev)
            .is_some_and(|d| d.capturing && d.epoch == epoch)
    }
}

struct MockWait {
    device: DeviceHandle,
    /// Frames already reported through this wait handle.
    seen: u64,
    /// Bumped by every abort; waits in progress compare against it.
    abort_epoch: u64,
}

/// Frame layout derived from the current property values.
#[derive(Debug, Clone, Copy)]
struct Layout {
    width: usize,
    height: usize,
    bytes_per_pixel: usize,
    row_bytes: usize,
    top_offset: usize,
}

impl Layout {
    fn image_bytes(&self) -> usize {
        self.row_bytes * self.height
    }

    fn frame_bytes(&self) -> usize {
        self.top_offset + self.image_bytes()
    }
}

struct MockDevice {
    index: u32,
    values: HashMap<PropId, f64>,
    slots: Vec<SlotPtr>,
    slot_bytes: usize,
    capturing: bool,
    epoch: u64,
    frames: u64,
    generator: Option<JoinHandle<()>>,
}

impl MockDevice {
    fn new(index: u32, sensor: (u32, u32)) -> Self {
        let (w, h) = (f64::from(sensor.0), f64::from(sensor.1));
        let values = [
            (PropId::SENSOR_MODE, 1.0),
            (PropId::EXPOSURE_TIME, 0.01),
            (PropId::SENSOR_TEMPERATURE_TARGET, -20.0),
            (PropId::INTERNAL_FRAME_RATE, 100.0),
            (PropId::SUBARRAY_HPOS, 0.0),
            (PropId::SUBARRAY_HSIZE, w),
            (PropId::SUBARRAY_VPOS, 0.0),
            (PropId::SUBARRAY_VSIZE, h),
            (PropId::SUBARRAY_MODE, MODE_OFF),
            (PropId::IMAGE_PIXEL_TYPE, PIXEL_TYPE_MONO16),
        ]
        .into_iter()
        .collect();

        Self {
            index,
            values,
            slots: Vec::new(),
            slot_bytes: 0,
            capturing: false,
            epoch: 0,
            frames: 0,
            generator: None,
        }
    }

    fn value(&self, prop: PropId) -> f64 {
        self.values.get(&prop).copied().unwrap_or_default()
    }

    fn layout(&self, sensor: (u32, u32), top_offset: usize) -> Layout {
        let (width, height) = if self.value(PropId::SUBARRAY_MODE) == MODE_ON {
            (
                self.value(PropId::SUBARRAY_HSIZE) as usize,
                self.value(PropId::SUBARRAY_VSIZE) as usize,
            )
        } else {
            (sensor.0 as usize, sensor.1 as usize)
        };
        let bytes_per_pixel = if self.value(PropId::IMAGE_PIXEL_TYPE) == PIXEL_TYPE_MONO8 {
            1
        } else {
            2
        };
        Layout {
            width,
            height,
            bytes_per_pixel,
            row_bytes: width * bytes_per_pixel,
            top_offset,
        }
    }

    fn frame_interval(&self) -> Duration {
        let exposure = self.value(PropId::EXPOSURE_TIME);
        let rate = self.value(PropId::INTERNAL_FRAME_RATE);
        let period = if rate > 0.0 { 1.0 / rate } else { 0.0 };
        Duration::from_secs_f64(exposure.max(period).max(0.0005))
    }

    /// Write frame number `self.frames + 1` into the next slot.
    fn deliver(&mut self, layout: Layout) {
        if self.slots.is_empty() || layout.frame_bytes() > self.slot_bytes {
            return;
        }
        self.frames += 1;
        let n = self.frames;
        let slot = self.slots[((n - 1) % self.slots.len() as u64) as usize];

        let base = slot.0;
        for y in 0..layout.height {
            let row = layout.top_offset + y * layout.row_bytes;
            for x in 0..layout.width {
                let value = x as u64 + y as u64 + n;
                let at = row + x * layout.bytes_per_pixel;
                // SAFETY: the slot was registered by buf_attach with
                // `slot_bytes` usable bytes and stays registered until
                // buf_release, which cannot run while capturing. `at` plus the
                // pixel width stays within frame_bytes <= slot_bytes. Writes go
                // through the raw pointer, like a DMA engine, so no `&mut`
                // aliases the `&[u8]` views readers may hold.
                #[allow(unsafe_code)]
                unsafe {
                    if layout.bytes_per_pixel == 1 {
                        base.add(at).write(value as u8);
                    } else {
                        let le = (value as u16).to_le_bytes();
                        std::ptr::copy_nonoverlapping(le.as_ptr(), base.add(at), le.len());
                    }
                }
            }
        }
    }
}

/// Static description of one simulated property.
struct PropDef {
    name: &'static str,
    kind: u32,
    writable: bool,
    volatile: bool,
    min: f64,
    max: f64,
    step: f64,
    default: f64,
    texts: &'static [(f64, &'static str)],
}

const SENSOR_MODE_TEXTS: &[(f64, &str)] = &[
    (1.0, "AREA"),
    (3.0, "LINE"),
    (4.0, "TDI"),
    (6.0, "FRAMING"),
    (7.0, "PARTIAL AREA"),
    (9.0, "SLIT"),
    (10.0, "TDI EXTENDED"),
    (11.0, "PANORAMIC"),
    (12.0, "PROGRESSIVE"),
    (14.0, "SPLIT VIEW"),
    (16.0, "DUAL LIGHTSHEET"),
    (18.0, "PHOTON NUMBER RESOLVING"),
    (19.0, "WHOLE LINES"),
];
const MODE_TEXTS: &[(f64, &str)] = &[(MODE_OFF, "OFF"), (MODE_ON, "ON")];
const PIXEL_TYPE_TEXTS: &[(f64, &str)] = &[(PIXEL_TYPE_MONO8, "MONO8"), (PIXEL_TYPE_MONO16, "MONO16")];

/// Every simulated property, in enumeration order.
const PROPERTY_IDS: [PropId; 25] = [
    PropId::EXPOSURE_TIME,
    PropId::SENSOR_TEMPERATURE,
    PropId::SENSOR_TEMPERATURE_TARGET,
    PropId::SENSOR_MODE,
    PropId::SUBARRAY_HPOS,
    PropId::SUBARRAY_HSIZE,
    PropId::SUBARRAY_VPOS,
    PropId::SUBARRAY_VSIZE,
    PropId::SUBARRAY_MODE,
    PropId::INTERNAL_FRAME_RATE,
    PropId::INTERNAL_FRAME_INTERVAL,
    PropId::IMAGE_WIDTH,
    PropId::IMAGE_HEIGHT,
    PropId::IMAGE_ROW_BYTES,
    PropId::IMAGE_FRAME_BYTES,
    PropId::IMAGE_TOP_OFFSET_BYTES,
    PropId::IMAGE_PIXEL_TYPE,
    PropId::BUFFER_ROW_BYTES,
    PropId::BUFFER_FRAME_BYTES,
    PropId::BUFFER_TOP_OFFSET_BYTES,
    PropId::BUFFER_PIXEL_TYPE,
    PropId::IMAGE_DETECTOR_PIXEL_WIDTH,
    PropId::IMAGE_DETECTOR_PIXEL_HEIGHT,
    PropId::IMAGE_DETECTOR_PIXEL_NUM_HORZ,
    PropId::IMAGE_DETECTOR_PIXEL_NUM_VERT,
];

fn prop_def(prop: PropId, sensor: (u32, u32)) -> Option<PropDef> {
    let (w, h) = (f64::from(sensor.0), f64::from(sensor.1));
    let def = |name, kind, writable, min, max, step, default| PropDef {
        name,
        kind,
        writable,
        volatile: false,
        min,
        max,
        step,
        default,
        texts: &[],
    };
    let read_only = |name, kind, max| def(name, kind, false, 0.0, max, 0.0, 0.0);
    let big = f64::from(u32::MAX);

    Some(match prop {
        PropId::EXPOSURE_TIME => def("EXPOSURE TIME", attr::TYPE_REAL, true, 1e-5, 10.0, 1e-6, 0.01),
        PropId::SENSOR_TEMPERATURE => PropDef {
            volatile: true,
            ..def("SENSOR TEMPERATURE", attr::TYPE_REAL, false, -50.0, 50.0, 0.0, -20.0)
        },
        PropId::SENSOR_TEMPERATURE_TARGET => def(
            "SENSOR TEMPERATURE TARGET",
            attr::TYPE_REAL,
            true,
            -40.0,
            25.0,
            1.0,
            -20.0,
        ),
        PropId::SENSOR_MODE => PropDef {
            texts: SENSOR_MODE_TEXTS,
            ..def("SENSOR MODE", attr::TYPE_MODE, true, 1.0, 19.0, 1.0, 1.0)
        },
        PropId::SUBARRAY_HPOS => def("SUBARRAY HPOS", attr::TYPE_LONG, true, 0.0, w - SUBARRAY_STEP, SUBARRAY_STEP, 0.0),
        PropId::SUBARRAY_HSIZE => def("SUBARRAY HSIZE", attr::TYPE_LONG, true, SUBARRAY_STEP, w, SUBARRAY_STEP, w),
        PropId::SUBARRAY_VPOS => def("SUBARRAY VPOS", attr::TYPE_LONG, true, 0.0, h - SUBARRAY_STEP, SUBARRAY_STEP, 0.0),
        PropId::SUBARRAY_VSIZE => def("SUBARRAY VSIZE", attr::TYPE_LONG, true, SUBARRAY_STEP, h, SUBARRAY_STEP, h),
        PropId::SUBARRAY_MODE => PropDef {
            texts: MODE_TEXTS,
            ..def("SUBARRAY MODE", attr::TYPE_MODE, true, MODE_OFF, MODE_ON, 1.0, MODE_OFF)
        },
        PropId::INTERNAL_FRAME_RATE => def("INTERNAL FRAME RATE", attr::TYPE_REAL, true, 0.1, 1000.0, 0.0, 100.0),
        PropId::INTERNAL_FRAME_INTERVAL => read_only("INTERNAL FRAME INTERVAL", attr::TYPE_REAL, 10.0),
        PropId::IMAGE_WIDTH => read_only("IMAGE WIDTH", attr::TYPE_LONG, w),
        PropId::IMAGE_HEIGHT => read_only("IMAGE HEIGHT", attr::TYPE_LONG, h),
        PropId::IMAGE_ROW_BYTES => read_only("IMAGE ROWBYTES", attr::TYPE_LONG, big),
        PropId::IMAGE_FRAME_BYTES => read_only("IMAGE FRAMEBYTES", attr::TYPE_LONG, big),
        PropId::IMAGE_TOP_OFFSET_BYTES => read_only("IMAGE TOP OFFSET BYTES", attr::TYPE_LONG, big),
        PropId::IMAGE_PIXEL_TYPE => PropDef {
            texts: PIXEL_TYPE_TEXTS,
            ..def("IMAGE PIXEL TYPE", attr::TYPE_MODE, true, PIXEL_TYPE_MONO8, PIXEL_TYPE_MONO16, 1.0, PIXEL_TYPE_MONO16)
        },
        PropId::BUFFER_ROW_BYTES => read_only("BUFFER ROWBYTES", attr::TYPE_LONG, big),
        PropId::BUFFER_FRAME_BYTES => read_only("BUFFER FRAMEBYTES", attr::TYPE_LONG, big),
        PropId::BUFFER_TOP_OFFSET_BYTES => read_only("BUFFER TOP OFFSET BYTES", attr::TYPE_LONG, big),
        PropId::BUFFER_PIXEL_TYPE => PropDef {
            texts: PIXEL_TYPE_TEXTS,
            ..read_only("BUFFER PIXEL TYPE", attr::TYPE_MODE, PIXEL_TYPE_MONO16)
        },
        PropId::IMAGE_DETECTOR_PIXEL_WIDTH => read_only("IMAGE DETECTOR PIXEL WIDTH", attr::TYPE_REAL, 100.0),
        PropId::IMAGE_DETECTOR_PIXEL_HEIGHT => read_only("IMAGE DETECTOR PIXEL HEIGHT", attr::TYPE_REAL, 100.0),
        PropId::IMAGE_DETECTOR_PIXEL_NUM_HORZ => read_only("IMAGE DETECTOR PIXEL NUM HORZ", attr::TYPE_LONG, w),
        PropId::IMAGE_DETECTOR_PIXEL_NUM_VERT => read_only("IMAGE DETECTOR PIXEL NUM VERT", attr::TYPE_LONG, h),
        _ => return None,
    })
}

/// Properties that may not change while a capture is running.
fn locked_while_capturing(prop: PropId) -> bool {
    matches!(
        prop,
        PropId::SENSOR_MODE
            | PropId::SUBARRAY_HPOS
            | PropId::SUBARRAY_HSIZE
            | PropId::SUBARRAY_VPOS
            | PropId::SUBARRAY_VSIZE
            | PropId::SUBARRAY_MODE
            | PropId::IMAGE_PIXEL_TYPE
            | PropId::INTERNAL_FRAME_RATE
    )
}

fn quantize(value: f64, step: f64) -> f64 {
    if step > 0.0 {
        (value / step).round() * step
    } else {
        value
    }
}

impl MockDcam {
    /// A single 2048 × 2048 camera, the ORCA-Quest sensor size.
    pub fn new() -> Self {
        Self::with_sensor(2048, 2048)
    }

    /// A single camera with the given sensor size (multiples of 4).
    pub fn with_sensor(width: u32, height: u32) -> Self {
        let state = MockState {
            initialized: false,
            device_count: 1,
            sensor: (width, height),
            top_offset: 0,
            supported_modes: vec![1, 12, 18],
            next_handle: 0,
            devices: HashMap::new(),
            waits: HashMap::new(),
            failures: HashMap::new(),
            counters: Counters::default(),
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                frame_ready: Condvar::new(),
                control: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.shared.lock()
    }

    /// Number of cameras reported by the next `api_init`.
    pub fn set_device_count(&self, count: u32) {
        self.lock().device_count = count;
    }

    /// Bytes of header the driver reserves before each frame's pixels.
    pub fn set_top_offset(&self, bytes: usize) {
        self.lock().top_offset = bytes;
    }

    /// Raw sensor mode values the camera accepts (default: area,
    /// progressive, photon number resolving).
    pub fn set_supported_sensor_modes(&self, modes: impl IntoIterator<Item = u32>) {
        self.lock().supported_modes = modes.into_iter().collect();
    }

    /// Make the next call of `op` fail with `code`.
    pub fn fail_next(&self, op: MockOp, code: DcamErr) {
        self.lock().failures.insert(op, code);
    }

    /// Whether the API is initialized.
    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    /// Number of open device handles.
    pub fn open_devices(&self) -> usize {
        self.lock().devices.len()
    }

    /// Number of open wait handles.
    pub fn open_waits(&self) -> usize {
        self.lock().waits.len()
    }

    /// Whether any device is capturing.
    pub fn is_capturing(&self) -> bool {
        self.lock().devices.values().any(|d| d.capturing)
    }

    /// Slots currently attached to the first open device.
    pub fn attached_slots(&self) -> usize {
        let state = self.lock();
        state
            .devices
            .values()
            .min_by_key(|d| d.index)
            .map_or(0, |d| d.slots.len())
    }

    /// Successful `api_init` calls.
    pub fn init_calls(&self) -> usize {
        self.lock().counters.init
    }

    /// Successful `api_uninit` calls.
    pub fn uninit_calls(&self) -> usize {
        self.lock().counters.uninit
    }

    /// Successful `buf_attach` calls.
    pub fn attach_calls(&self) -> usize {
        self.lock().counters.attach
    }

    /// Successful `buf_release` calls.
    pub fn release_calls(&self) -> usize {
        self.lock().counters.release
    }

    /// Successful `wait_abort` calls.
    pub fn abort_calls(&self) -> usize {
        self.lock().counters.abort
    }

    fn spawn_generator(&self, dev: DeviceHandle, epoch: u64) -> std::io::Result<JoinHandle<()>> {
        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name("mock-dcam-frames".into())
            .spawn(move || generate_frames(&shared, dev, epoch))
    }

    /// Stop the generator of `dev`, if running. Takes and releases the lock.
    fn stop_generator(&self, mut state: MutexGuard<'_, MockState>, dev: DeviceHandle) {
        let generator = state.devices.get_mut(&dev).and_then(|d| {
            d.capturing = false;
            d.generator.take()
        });
        drop(state);
        self.shared.control.notify_all();
        self.shared.frame_ready.notify_all();
        if let Some(generator) = generator {
            let _ = generator.join();
        }
    }

    fn read(state: &MockState, dev: DeviceHandle, prop: PropId) -> DcamResult<f64> {
        let device = state.device(dev)?;
        prop_def(prop, state.sensor).ok_or(DcamErr::INVALID_PROPERTY_ID)?;
        let layout = device.layout(state.sensor, state.top_offset);
        let value = match prop {
            PropId::SENSOR_TEMPERATURE => device.value(PropId::SENSOR_TEMPERATURE_TARGET),
            PropId::INTERNAL_FRAME_INTERVAL => device.frame_interval().as_secs_f64(),
            PropId::IMAGE_WIDTH => layout.width as f64,
            PropId::IMAGE_HEIGHT => layout.height as f64,
            PropId::IMAGE_ROW_BYTES | PropId::BUFFER_ROW_BYTES => layout.row_bytes as f64,
            PropId::IMAGE_FRAME_BYTES => layout.image_bytes() as f64,
            PropId::IMAGE_TOP_OFFSET_BYTES => 0.0,
            PropId::BUFFER_FRAME_BYTES => layout.frame_bytes() as f64,
            PropId::BUFFER_TOP_OFFSET_BYTES => layout.top_offset as f64,
            PropId::BUFFER_PIXEL_TYPE => device.value(PropId::IMAGE_PIXEL_TYPE),
            PropId::IMAGE_DETECTOR_PIXEL_WIDTH | PropId::IMAGE_DETECTOR_PIXEL_HEIGHT => {
                PIXEL_PITCH_UM
            }
            PropId::IMAGE_DETECTOR_PIXEL_NUM_HORZ => f64::from(state.sensor.0),
            PropId::IMAGE_DETECTOR_PIXEL_NUM_VERT => f64::from(state.sensor.1),
            other => device.value(other),
        };
        Ok(value)
    }

    /// Validate and quantize `value` for `prop` without storing it.
    fn validate(state: &MockState, device: &MockDevice, prop: PropId, value: f64) -> DcamResult<f64> {
        let def = prop_def(prop, state.sensor).ok_or(DcamErr::INVALID_PROPERTY_ID)?;
        if !def.writable {
            return Err(DcamErr::NOT_WRITABLE);
        }
        let value = quantize(value, def.step);
        if !(def.min..=def.max).contains(&value) {
            return Err(DcamErr::OUT_OF_RANGE);
        }
        match prop {
            PropId::SENSOR_MODE if !state.supported_modes.contains(&(value as u32)) => {
                Err(DcamErr::INVALID_VALUE)
            }
            PropId::IMAGE_PIXEL_TYPE if value != PIXEL_TYPE_MONO8 && value != PIXEL_TYPE_MONO16 => {
                Err(DcamErr::INVALID_VALUE)
            }
            PropId::SUBARRAY_MODE if value == MODE_ON => {
                let fits = |pos: PropId, size: PropId, limit: u32| {
                    device.value(pos) + device.value(size) <= f64::from(limit)
                };
                if fits(PropId::SUBARRAY_HPOS, PropId::SUBARRAY_HSIZE, state.sensor.0)
                    && fits(PropId::SUBARRAY_VPOS, PropId::SUBARRAY_VSIZE, state.sensor.1)
                {
                    Ok(value)
                } else {
                    Err(DcamErr::OUT_OF_RANGE)
                }
            }
            PropId::SUBARRAY_HPOS | PropId::SUBARRAY_HSIZE
                if device.value(PropId::SUBARRAY_MODE) == MODE_ON =>
            {
                let (pos, size) = if prop == PropId::SUBARRAY_HPOS {
                    (value, device.value(PropId::SUBARRAY_HSIZE))
                } else {
                    (device.value(PropId::SUBARRAY_HPOS), value)
                };
                if pos + size <= f64::from(state.sensor.0) {
                    Ok(value)
                } else {
                    Err(DcamErr::OUT_OF_RANGE)
                }
            }
            PropId::SUBARRAY_VPOS | PropId::SUBARRAY_VSIZE
                if device.value(PropId::SUBARRAY_MODE) == MODE_ON =>
            {
                let (pos, size) = if prop == PropId::SUBARRAY_VPOS {
                    (value, device.value(PropId::SUBARRAY_VSIZE))
                } else {
                    (device.value(PropId::SUBARRAY_VPOS), value)
                };
                if pos + size <= f64::from(state.sensor.1) {
                    Ok(value)
                } else {
                    Err(DcamErr::OUT_OF_RANGE)
                }
            }
            _ => Ok(value),
        }
    }

    fn write(state: &mut MockState, dev: DeviceHandle, prop: PropId, value: f64) -> DcamResult<()> {
        state.take_failure(MockOp::PropSet(prop))?;
        let device = state.device(dev)?;
        if device.capturing && locked_while_capturing(prop) {
            return Err(DcamErr::BUSY);
        }
        let value = Self::validate(state, device, prop, value)?;
        state.device_mut(dev)?.values.insert(prop, value);
        Ok(())
    }
}

impl Default for MockDcam {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockDcam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MockDcam")
            .field("sensor", &state.sensor)
            .field("devices", &state.devices.len())
            .field("waits", &state.waits.len())
            .finish()
    }
}

/// Generator thread body: one frame per interval until the capture ends.
fn generate_frames(shared: &Shared, dev: DeviceHandle, epoch: u64) {
    let mut state = shared.lock();
    loop {
        let interval = match state.devices.get(&dev) {
            Some(device) if state.is_active(dev, epoch) => device.frame_interval(),
            _ => return,
        };
        state = match shared
            .control
            .wait_timeout_while(state, interval, |s| s.is_active(dev, epoch))
        {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        };

        let (sensor, top_offset) = (state.sensor, state.top_offset);
        match state.devices.get_mut(&dev) {
            Some(device) if device.capturing && device.epoch == epoch => {
                let layout = device.layout(sensor, top_offset);
                device.deliver(layout);
            }
            _ => return,
        }
        shared.frame_ready.notify_all();
    }
}

impl Dcam for MockDcam {
    fn api_init(&self) -> DcamResult<u32> {
        let mut state = self.lock();
        state.take_failure(MockOp::ApiInit)?;
        state.initialized = true;
        state.counters.init += 1;
        Ok(state.device_count)
    }

    fn api_uninit(&self) -> DcamResult<()> {
        let mut state = self.lock();
        state.take_failure(MockOp::ApiUninit)?;
        state.initialized = false;
        state.counters.uninit += 1;
        Ok(())
    }

    fn dev_open(&self, index: u32) -> DcamResult<DeviceHandle> {
        let mut state = self.lock();
        state.take_failure(MockOp::DevOpen)?;
        if !state.initialized {
            return Err(DcamErr::NOT_READY);
        }
        if index >= state.device_count {
            return Err(DcamErr::NO_CAMERA);
        }
        if state.devices.values().any(|d| d.index == index) {
            return Err(DcamErr::EXCLUDED);
        }
        let handle = DeviceHandle(state.handle());
        let device = MockDevice::new(index, state.sensor);
        state.devices.insert(handle, device);
        Ok(handle)
    }

    fn dev_close(&self, dev: DeviceHandle) -> DcamResult<()> {
        let mut state = self.lock();
        state.take_failure(MockOp::DevClose)?;
        state.device(dev)?;
        let generator = state.devices.remove(&dev).and_then(|mut d| d.generator.take());
        drop(state);
        self.shared.control.notify_all();
        self.shared.frame_ready.notify_all();
        if let Some(generator) = generator {
            let _ = generator.join();
        }
        Ok(())
    }

    fn dev_string(&self, dev: DeviceHandle, id: StringId) -> DcamResult<String> {
        let mut state = self.lock();
        state.take_failure(MockOp::DevString)?;
        let index = state.device(dev)?.index;
        Ok(match id {
            StringId::Bus => "USB3".to_string(),
            StringId::CameraId => format!("S/N: MOCK{index:04}"),
            StringId::Vendor => "HAMAMATSU".to_string(),
            StringId::Model => "C15550-20UP".to_string(),
            StringId::CameraVersion => "1.00.A".to_string(),
            StringId::DriverVersion => "mock-1.0".to_string(),
            StringId::ModuleVersion => "mock-1.0".to_string(),
            StringId::DcamApiVersion => "24.4.6764".to_string(),
        })
    }

    fn wait_open(&self, dev: DeviceHandle) -> DcamResult<WaitHandle> {
        let mut state = self.lock();
        state.take_failure(MockOp::WaitOpen)?;
        state.device(dev)?;
        let handle = WaitHandle(state.handle());
        state.waits.insert(
            handle,
            MockWait {
                device: dev,
                seen: 0,
                abort_epoch: 0,
            },
        );
        Ok(handle)
    }

    fn wait_close(&self, wait: WaitHandle) -> DcamResult<()> {
        let mut state = self.lock();
        state.take_failure(MockOp::WaitClose)?;
        state.waits.remove(&wait).ok_or(DcamErr::INVALID_WAIT_HANDLE)?;
        drop(state);
        self.shared.frame_ready.notify_all();
        Ok(())
    }

    fn wait_start(&self, wait: WaitHandle, event_mask: u32, timeout_ms: u32) -> DcamResult<u32> {
        let deadline = Instant::now() + Duration::from_millis(u64::from(timeout_ms));
        let mut state = self.lock();
        state.take_failure(MockOp::WaitStart)?;
        let entry_epoch = state
            .waits
            .get(&wait)
            .ok_or(DcamErr::INVALID_WAIT_HANDLE)?
            .abort_epoch;

        loop {
            let s = &mut *state;
            let w = s.waits.get_mut(&wait).ok_or(DcamErr::INVALID_WAIT_HANDLE)?;
            if w.abort_epoch != entry_epoch {
                return Err(DcamErr::ABORT);
            }
            let frames = s.devices.get(&w.device).map_or(0, |d| d.frames);
            if event_mask & EVENT_FRAME_READY != 0 && frames > w.seen {
                w.seen = frames;
                return Ok(EVENT_FRAME_READY);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(DcamErr::TIMEOUT);
            }
            state = match self.shared.frame_ready.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn wait_abort(&self, wait: WaitHandle) -> DcamResult<()> {
        let mut state = self.lock();
        state.take_failure(MockOp::WaitAbort)?;
        let w = state.waits.get_mut(&wait).ok_or(DcamErr::INVALID_WAIT_HANDLE)?;
        w.abort_epoch += 1;
        state.counters.abort += 1;
        drop(state);
        self.shared.frame_ready.notify_all();
        Ok(())
    }

    fn prop_get(&self, dev: DeviceHandle, prop: PropId) -> DcamResult<f64> {
        let mut state = self.lock();
        state.take_failure(MockOp::PropGet(prop))?;
        Self::read(&state, dev, prop)
    }

    fn prop_set(&self, dev: DeviceHandle, prop: PropId, value: f64) -> DcamResult<()> {
        let mut state = self.lock();
        Self::write(&mut state, dev, prop, value)
    }

    fn prop_setget(&self, dev: DeviceHandle, prop: PropId, value: f64) -> DcamResult<f64> {
        let mut state = self.lock();
        // The camera keeps its current mode when asked for one it lacks.
        if prop == PropId::SENSOR_MODE && !state.supported_modes.contains(&(value as u32)) {
            state.take_failure(MockOp::PropSet(prop))?;
            return Self::read(&state, dev, prop);
        }
        Self::write(&mut state, dev, prop, value)?;
        Self::read(&state, dev, prop)
    }

    fn prop_query(
        &self,
        dev: DeviceHandle,
        prop: PropId,
        value: f64,
        option: QueryOption,
    ) -> DcamResult<f64> {
        let state = self.lock();
        let device = state.device(dev)?;
        let def = prop_def(prop, state.sensor).ok_or(DcamErr::INVALID_PROPERTY_ID)?;
        let step = if def.step > 0.0 { def.step } else { 1.0 };
        let candidate = match option {
            QueryOption::Current => value,
            QueryOption::Next => quantize(value, def.step) + step,
            QueryOption::Prior => quantize(value, def.step) - step,
        };
        if def.writable {
            Self::validate(&state, device, prop, candidate)
        } else if (def.min..=def.max).contains(&candidate) {
            Ok(candidate)
        } else {
            Err(DcamErr::OUT_OF_RANGE)
        }
    }

    fn prop_attr(&self, dev: DeviceHandle, prop: PropId) -> DcamResult<PropAttr> {
        let state = self.lock();
        state.device(dev)?;
        let def = prop_def(prop, state.sensor).ok_or(DcamErr::INVALID_PROPERTY_ID)?;
        let mut attribute = attr::READABLE | attr::HAS_RANGE | attr::HAS_DEFAULT | def.kind;
        if def.writable {
            attribute |= attr::WRITABLE;
        }
        if def.volatile {
            attribute |= attr::VOLATILE;
        }
        if def.step > 0.0 {
            attribute |= attr::HAS_STEP;
        }
        if !def.texts.is_empty() {
            attribute |= attr::HAS_VALUE_TEXT;
        }
        Ok(PropAttr {
            prop,
            attribute,
            attribute2: 0,
            unit: 0,
            min: def.min,
            max: def.max,
            step: def.step,
            default: def.default,
        })
    }

    /// `Updated` and `ArrayElement` walk the full list: nothing is tracked
    /// for updates and there are no array properties.
    fn prop_next_id(
        &self,
        dev: DeviceHandle,
        prop: PropId,
        option: EnumOption,
    ) -> DcamResult<Option<PropId>> {
        let state = self.lock();
        state.device(dev)?;
        let sensor = state.sensor;
        Ok(PROPERTY_IDS
            .iter()
            .copied()
            .filter(|id| *id > prop)
            .filter(|id| {
                option != EnumOption::Volatile
                    || prop_def(*id, sensor).is_some_and(|def| def.volatile)
            })
            .min())
    }

    fn prop_name(&self, dev: DeviceHandle, prop: PropId) -> DcamResult<String> {
        let state = self.lock();
        state.device(dev)?;
        prop_def(prop, state.sensor)
            .map(|def| def.name.to_string())
            .ok_or(DcamErr::INVALID_PROPERTY_ID)
    }

    fn prop_value_text(&self, dev: DeviceHandle, prop: PropId, value: f64) -> DcamResult<String> {
        let state = self.lock();
        state.device(dev)?;
        let def = prop_def(prop, state.sensor).ok_or(DcamErr::INVALID_PROPERTY_ID)?;
        if def.texts.is_empty() {
            return Err(DcamErr::NO_VALUE_TEXT);
        }
        def.texts
            .iter()
            .find(|(v, _)| *v == value)
            .map(|(_, text)| (*text).to_string())
            .ok_or(DcamErr::INVALID_VALUE)
    }

    fn buf_attach(&self, dev: DeviceHandle, slots: &[SlotPtr], slot_bytes: usize) -> DcamResult<()> {
        let mut state = self.lock();
        state.take_failure(MockOp::BufAttach)?;
        let (sensor, top_offset) = (state.sensor, state.top_offset);
        let device = state.device_mut(dev)?;
        if device.capturing {
            return Err(DcamErr::BUSY);
        }
        if slots.is_empty() || slot_bytes < device.layout(sensor, top_offset).frame_bytes() {
            return Err(DcamErr::INVALID_PARAM);
        }
        device.slots = slots.to_vec();
        device.slot_bytes = slot_bytes;
        state.counters.attach += 1;
        Ok(())
    }

    fn buf_release(&self, dev: DeviceHandle) -> DcamResult<()> {
        let mut state = self.lock();
        state.take_failure(MockOp::BufRelease)?;
        let device = state.device_mut(dev)?;
        if device.capturing {
            return Err(DcamErr::BUSY);
        }
        device.slots.clear();
        device.slot_bytes = 0;
        state.counters.release += 1;
        Ok(())
    }

    fn cap_start(&self, dev: DeviceHandle) -> DcamResult<()> {
        let mut state = self.lock();
        state.take_failure(MockOp::CapStart)?;
        let (sensor, top_offset) = (state.sensor, state.top_offset);
        let device = state.device_mut(dev)?;
        if device.capturing {
            return Err(DcamErr::BUSY);
        }
        if device.slots.is_empty() || device.layout(sensor, top_offset).frame_bytes() > device.slot_bytes {
            return Err(DcamErr::NOT_READY);
        }
        device.capturing = true;
        device.epoch += 1;
        device.frames = 0;
        let epoch = device.epoch;
        for wait in state.waits.values_mut().filter(|w| w.device == dev) {
            wait.seen = 0;
        }

        match self.spawn_generator(dev, epoch) {
            Ok(generator) => {
                if let Some(device) = state.devices.get_mut(&dev) {
                    device.generator = Some(generator);
                }
                Ok(())
            }
            Err(_) => {
                if let Some(device) = state.devices.get_mut(&dev) {
                    device.capturing = false;
                }
                Err(DcamErr::NO_RESOURCE)
            }
        }
    }

    fn cap_stop(&self, dev: DeviceHandle) -> DcamResult<()> {
        let mut state = self.lock();
        state.take_failure(MockOp::CapStop)?;
        state.device(dev)?;
        self.stop_generator(state, dev);
        Ok(())
    }

    fn cap_transfer_info(&self, dev: DeviceHandle) -> DcamResult<TransferInfo> {
        let mut state = self.lock();
        state.take_failure(MockOp::TransferInfo)?;
        let device = state.device(dev)?;
        if device.frames == 0 || device.slots.is_empty() {
            return Ok(TransferInfo {
                newest_frame_index: -1,
                frame_count: 0,
            });
        }
        let newest = (device.frames - 1) % device.slots.len() as u64;
        Ok(TransferInfo {
            newest_frame_index: newest as i32,
            frame_count: device.frames.min(i32::MAX as u64) as i32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_camera(mock: &MockDcam) -> DeviceHandle {
        mock.api_init().unwrap();
        mock.dev_open(0).unwrap()
    }

    #[test]
    fn derived_geometry_follows_subarray() {
        let mock = MockDcam::with_sensor(64, 32);
        let dev = open_camera(&mock);
        assert_eq!(mock.prop_get(dev, PropId::IMAGE_WIDTH).unwrap(), 64.0);
        assert_eq!(mock.prop_get(dev, PropId::BUFFER_FRAME_BYTES).unwrap(), 64.0 * 32.0 * 2.0);

        mock.prop_set(dev, PropId::SUBARRAY_HSIZE, 16.0).unwrap();
        mock.prop_set(dev, PropId::SUBARRAY_VSIZE, 8.0).unwrap();
        mock.prop_set(dev, PropId::SUBARRAY_MODE, MODE_ON).unwrap();
        assert_eq!(mock.prop_get(dev, PropId::IMAGE_WIDTH).unwrap(), 16.0);
        assert_eq!(mock.prop_get(dev, PropId::BUFFER_ROW_BYTES).unwrap(), 32.0);
    }

    #[test]
    fn subarray_on_rejects_out_of_bounds() {
        let mock = MockDcam::with_sensor(64, 64);
        let dev = open_camera(&mock);
        mock.prop_set(dev, PropId::SUBARRAY_HPOS, 32.0).unwrap();
        assert_eq!(
            mock.prop_set(dev, PropId::SUBARRAY_MODE, MODE_ON),
            Err(DcamErr::OUT_OF_RANGE)
        );
    }

    #[test]
    fn exposure_is_quantized() {
        let mock = MockDcam::with_sensor(32, 32);
        let dev = open_camera(&mock);
        let settled = mock.prop_setget(dev, PropId::EXPOSURE_TIME, 0.012_345_67).unwrap();
        assert!((settled - 0.012_346).abs() < 1e-9);
        assert_eq!(
            mock.prop_set(dev, PropId::EXPOSURE_TIME, 100.0),
            Err(DcamErr::OUT_OF_RANGE)
        );
    }

    #[test]
    fn read_only_properties_reject_writes() {
        let mock = MockDcam::with_sensor(32, 32);
        let dev = open_camera(&mock);
        assert_eq!(
            mock.prop_set(dev, PropId::IMAGE_WIDTH, 8.0),
            Err(DcamErr::NOT_WRITABLE)
        );
        assert_eq!(
            mock.prop_get(dev, PropId(0xDEAD_BEEF)),
            Err(DcamErr::INVALID_PROPERTY_ID)
        );
    }

    #[test]
    fn wait_times_out_without_capture() {
        let mock = MockDcam::with_sensor(32, 32);
        let dev = open_camera(&mock);
        let wait = mock.wait_open(dev).unwrap();
        assert_eq!(
            mock.wait_start(wait, EVENT_FRAME_READY, 10),
            Err(DcamErr::TIMEOUT)
        );
    }

    #[test]
    fn abort_wakes_waiter() {
        let mock = MockDcam::with_sensor(32, 32);
        let dev = open_camera(&mock);
        let wait = mock.wait_open(dev).unwrap();
        let waiter = {
            let mock = mock.clone();
            thread::spawn(move || mock.wait_start(wait, EVENT_FRAME_READY, 5_000))
        };
        thread::sleep(Duration::from_millis(20));
        mock.wait_abort(wait).unwrap();
        assert_eq!(waiter.join().unwrap(), Err(DcamErr::ABORT));
    }

    #[test]
    fn generator_writes_pattern() {
        let mock = MockDcam::with_sensor(8, 4);
        let dev = open_camera(&mock);
        let wait = mock.wait_open(dev).unwrap();
        let frame_bytes = 8 * 4 * 2;
        let mut memory = vec![0u8; frame_bytes * 2];
        let slots = [
            SlotPtr(memory.as_mut_ptr()),
            SlotPtr(memory[frame_bytes..].as_mut_ptr()),
        ];
        mock.buf_attach(dev, &slots, frame_bytes).unwrap();
        mock.cap_start(dev).unwrap();
        mock.wait_start(wait, EVENT_FRAME_READY, 1_000).unwrap();
        mock.cap_stop(dev).unwrap();

        let info = mock.cap_transfer_info(dev).unwrap();
        assert!(info.frame_count >= 1);
        // Frame 1 went into slot 0: pixel (3, 2) = 3 + 2 + 1.
        let at = 2 * 16 + 3 * 2;
        assert_eq!(u16::from_le_bytes([memory[at], memory[at + 1]]), 6);
        mock.buf_release(dev).unwrap();
    }

    #[test]
    fn injected_failure_is_one_shot() {
        let mock = MockDcam::with_sensor(32, 32);
        mock.fail_next(MockOp::ApiInit, DcamErr::NO_DRIVER);
        assert_eq!(mock.api_init(), Err(DcamErr::NO_DRIVER));
        assert_eq!(mock.api_init(), Ok(1));
    }

    #[test]
    fn device_open_is_exclusive() {
        let mock = MockDcam::with_sensor(32, 32);
        open_camera(&mock);
        assert_eq!(mock.dev_open(0), Err(DcamErr::EXCLUDED));
        assert_eq!(mock.dev_open(1), Err(DcamErr::NO_CAMERA));
    }

    #[test]
    fn property_enumeration_is_ordered() {
        let mock = MockDcam::with_sensor(32, 32);
        let dev = open_camera(&mock);
        let mut ids = Vec::new();
        let mut current = PropId::FIRST;
        while let Some(next) = mock
            .prop_next_id(dev, current, EnumOption::Supported)
            .unwrap()
        {
            assert!(next > current);
            ids.push(next);
            current = next;
        }
        assert_eq!(ids.len(), PROPERTY_IDS.len());
    }
}
