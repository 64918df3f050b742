//! DCAM-API Trait Abstraction
//!
//! This module provides a safe, testable interface to the Hamamatsu DCAM-API.
//! Everything above this module talks to the vendor driver exclusively through
//! the [`Dcam`] trait, so the session, arena and capture logic run unchanged
//! against real hardware ([`HardwareDcam`], feature `dcam_sdk`) or the
//! in-process simulation ([`MockDcam`]).
//!
//! The trait mirrors the C API one call per method. It neither adds retries
//! nor interprets results: every method returns the driver's raw [`DcamErr`]
//! so the layers above can surface it unchanged.

mod dcamerr;
pub mod mock;
mod props;

#[cfg(feature = "dcam_sdk")]
mod hardware;

pub use dcamerr::DcamErr;
pub use mock::{MockDcam, MockOp};
pub use props::{attr, PropId, StringId, MODE_OFF, MODE_ON};

#[cfg(feature = "dcam_sdk")]
pub use hardware::HardwareDcam;

/// Result of a raw driver call.
pub type DcamResult<T> = std::result::Result<T, DcamErr>;

/// Handle to an opened camera (`HDCAM`).
///
/// Wraps the driver's opaque pointer as an integer so handles are `Copy`,
/// `Send` and hashable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub usize);

/// Handle to a wait object bound to one camera (`HDCAMWAIT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitHandle(pub usize);

/// `DCAMWAIT_CAPEVENT_FRAMEREADY`
pub const EVENT_FRAME_READY: u32 = 0x0002;
/// `DCAMWAIT_CAPEVENT_STOPPED`
pub const EVENT_STOPPED: u32 = 0x0010;

/// Start address of one frame slot handed to the driver for DMA delivery.
///
/// SAFETY: the pointer targets memory owned by a `FrameArena` that outlives
/// the driver registration; the arena releases the registration before it
/// frees or replaces the memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPtr(pub *mut u8);

// SAFETY: see the type-level comment; the pointer is only dereferenced by the
// driver while the owning arena keeps the allocation alive.
#[allow(unsafe_code)]
unsafe impl Send for SlotPtr {}
#[allow(unsafe_code)]
unsafe impl Sync for SlotPtr {}

/// Option passed to `dcamprop_queryvalue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryOption {
    /// Validate the given value as-is.
    #[default]
    Current,
    /// The settable value just below the given one.
    Prior,
    /// The settable value just above the given one.
    Next,
}

impl QueryOption {
    /// Raw `DCAMPROP_OPTION_*` value.
    pub fn as_raw(self) -> i32 {
        match self {
            QueryOption::Current => 0,
            QueryOption::Prior => 0xFF00_0000_u32 as i32,
            QueryOption::Next => 0x0100_0000,
        }
    }
}

/// Which properties `dcamprop_getnextid` walks over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumOption {
    /// Every property the camera supports.
    #[default]
    Supported,
    /// Properties whose attributes changed since they were last read.
    Updated,
    /// Properties whose value can change without being written.
    Volatile,
    /// Element ids of array properties.
    ArrayElement,
}

impl EnumOption {
    /// Raw `DCAMPROP_OPTION_*` value.
    pub fn as_raw(self) -> i32 {
        match self {
            EnumOption::Supported => 0,
            EnumOption::Updated => 0x0010_0000,
            EnumOption::Volatile => 0x0020_0000,
            EnumOption::ArrayElement => 0x0040_0000,
        }
    }
}

/// Frame-transfer progress reported by `dcamcap_transferinfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferInfo {
    /// Slot index of the most recently completed frame.
    pub newest_frame_index: i32,
    /// Total number of frames transferred since capture started.
    pub frame_count: i32,
}

/// Property attributes as reported by `dcamprop_getattr`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PropAttr {
    /// Property this attribute block describes.
    pub prop: PropId,
    /// `DCAMPROP_ATTR_*` / `DCAMPROP_TYPE_*` flags.
    pub attribute: u32,
    /// `DCAMPROP_ATTR2_*` flags.
    pub attribute2: u32,
    /// `DCAMPROP_UNIT_*`.
    pub unit: u32,
    /// Minimum settable value.
    pub min: f64,
    /// Maximum settable value.
    pub max: f64,
    /// Quantization step (0 when the driver does not declare one).
    pub step: f64,
    /// Power-on default.
    pub default: f64,
}

impl PropAttr {
    /// Whether `dcamprop_getvalue` is allowed.
    pub fn is_readable(&self) -> bool {
        self.attribute & attr::READABLE != 0
    }

    /// Whether `dcamprop_setvalue` is allowed.
    pub fn is_writable(&self) -> bool {
        self.attribute & attr::WRITABLE != 0
    }

    /// Whether the value changes without being written (e.g. temperatures).
    pub fn is_volatile(&self) -> bool {
        self.attribute & attr::VOLATILE != 0
    }

    /// Whether the driver publishes value texts for this property.
    pub fn has_value_text(&self) -> bool {
        self.attribute & attr::HAS_VALUE_TEXT != 0
    }

    /// `DCAMPROP_TYPE_*` portion of the attribute word.
    pub fn value_type(&self) -> u32 {
        self.attribute & attr::TYPE_MASK
    }
}

/// Trait defining the DCAM-API abstraction.
///
/// All methods take `&self` so one driver can be shared as `Arc<dyn Dcam>`
/// between a session and its acquisition worker. Implementations must use
/// internal mutability.
pub trait Dcam: Send + Sync {
    /// `dcamapi_init`: initializes the API and returns the device count.
    fn api_init(&self) -> DcamResult<u32>;
    /// `dcamapi_uninit`
    fn api_uninit(&self) -> DcamResult<()>;

    /// `dcamdev_open`
    fn dev_open(&self, index: u32) -> DcamResult<DeviceHandle>;
    /// `dcamdev_close`
    fn dev_close(&self, dev: DeviceHandle) -> DcamResult<()>;
    /// `dcamdev_getstring`
    fn dev_string(&self, dev: DeviceHandle, id: StringId) -> DcamResult<String>;

    /// `dcamwait_open`
    fn wait_open(&self, dev: DeviceHandle) -> DcamResult<WaitHandle>;
    /// `dcamwait_close`
    fn wait_close(&self, wait: WaitHandle) -> DcamResult<()>;
    /// `dcamwait_start`: blocks until one of `event_mask` happens, the wait is
    /// aborted (`DcamErr::ABORT`) or `timeout_ms` expires (`DcamErr::TIMEOUT`).
    /// Returns the event that happened.
    fn wait_start(&self, wait: WaitHandle, event_mask: u32, timeout_ms: u32) -> DcamResult<u32>;
    /// `dcamwait_abort`
    fn wait_abort(&self, wait: WaitHandle) -> DcamResult<()>;

    /// `dcamprop_getvalue`
    fn prop_get(&self, dev: DeviceHandle, prop: PropId) -> DcamResult<f64>;
    /// `dcamprop_setvalue`
    fn prop_set(&self, dev: DeviceHandle, prop: PropId, value: f64) -> DcamResult<()>;
    /// `dcamprop_setgetvalue`: sets and returns the value the driver settled on.
    fn prop_setget(&self, dev: DeviceHandle, prop: PropId, value: f64) -> DcamResult<f64>;
    /// `dcamprop_queryvalue`
    fn prop_query(
        &self,
        dev: DeviceHandle,
        prop: PropId,
        value: f64,
        option: QueryOption,
    ) -> DcamResult<f64>;
    /// `dcamprop_getattr`
    fn prop_attr(&self, dev: DeviceHandle, prop: PropId) -> DcamResult<PropAttr>;
    /// `dcamprop_getnextid`: `Ok(None)` once the enumeration is exhausted.
    fn prop_next_id(
        &self,
        dev: DeviceHandle,
        prop: PropId,
        option: EnumOption,
    ) -> DcamResult<Option<PropId>>;
    /// `dcamprop_getname`
    fn prop_name(&self, dev: DeviceHandle, prop: PropId) -> DcamResult<String>;
    /// `dcamprop_getvaluetext`
    fn prop_value_text(&self, dev: DeviceHandle, prop: PropId, value: f64) -> DcamResult<String>;

    /// `dcambuf_attach` with `DCAMBUF_ATTACHKIND_FRAME`.
    ///
    /// Replaces any previous registration on `dev`. `slot_bytes` is the
    /// usable length of each slot.
    fn buf_attach(&self, dev: DeviceHandle, slots: &[SlotPtr], slot_bytes: usize) -> DcamResult<()>;
    /// `dcambuf_release` with `DCAMBUF_ATTACHKIND_FRAME`.
    fn buf_release(&self, dev: DeviceHandle) -> DcamResult<()>;

    /// `dcamcap_start` with `DCAMCAP_START_SEQUENCE`.
    fn cap_start(&self, dev: DeviceHandle) -> DcamResult<()>;
    /// `dcamcap_stop`
    fn cap_stop(&self, dev: DeviceHandle) -> DcamResult<()>;
    /// `dcamcap_transferinfo` with `DCAMCAP_TRANSFERKIND_FRAME`.
    fn cap_transfer_info(&self, dev: DeviceHandle) -> DcamResult<TransferInfo>;
}
