//! Property and string identifiers from `dcamprop.h` / `dcamapi4.h`.

// Names follow the C headers one-to-one.
#![allow(missing_docs)]

use std::fmt;

/// A `DCAM_IDPROP_*` property identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PropId(pub u32);

impl PropId {
    /// `DCAM_IDPROP_SENSORMODE`
    pub const SENSOR_MODE: PropId = PropId(0x0040_0210);
    /// `DCAM_IDPROP_EXPOSURETIME`
    pub const EXPOSURE_TIME: PropId = PropId(0x001F_0110);
    /// `DCAM_IDPROP_SENSORTEMPERATURE`
    pub const SENSOR_TEMPERATURE: PropId = PropId(0x0020_0310);
    /// `DCAM_IDPROP_SENSORTEMPERATURETARGET`
    pub const SENSOR_TEMPERATURE_TARGET: PropId = PropId(0x0020_0330);
    /// `DCAM_IDPROP_INTERNALFRAMERATE`
    pub const INTERNAL_FRAME_RATE: PropId = PropId(0x0040_3810);
    /// `DCAM_IDPROP_INTERNAL_FRAMEINTERVAL`
    pub const INTERNAL_FRAME_INTERVAL: PropId = PropId(0x0040_3820);

    /// `DCAM_IDPROP_SUBARRAYHPOS`
    pub const SUBARRAY_HPOS: PropId = PropId(0x0040_2110);
    /// `DCAM_IDPROP_SUBARRAYHSIZE`
    pub const SUBARRAY_HSIZE: PropId = PropId(0x0040_2120);
    /// `DCAM_IDPROP_SUBARRAYVPOS`
    pub const SUBARRAY_VPOS: PropId = PropId(0x0040_2130);
    /// `DCAM_IDPROP_SUBARRAYVSIZE`
    pub const SUBARRAY_VSIZE: PropId = PropId(0x0040_2140);
    /// `DCAM_IDPROP_SUBARRAYMODE`
    pub const SUBARRAY_MODE: PropId = PropId(0x0040_2150);

    /// `DCAM_IDPROP_IMAGE_WIDTH`
    pub const IMAGE_WIDTH: PropId = PropId(0x0042_0210);
    /// `DCAM_IDPROP_IMAGE_HEIGHT`
    pub const IMAGE_HEIGHT: PropId = PropId(0x0042_0220);
    /// `DCAM_IDPROP_IMAGE_ROWBYTES`
    pub const IMAGE_ROW_BYTES: PropId = PropId(0x0042_0230);
    /// `DCAM_IDPROP_IMAGE_FRAMEBYTES`
    pub const IMAGE_FRAME_BYTES: PropId = PropId(0x0042_0240);
    /// `DCAM_IDPROP_IMAGE_TOPOFFSETBYTES`
    pub const IMAGE_TOP_OFFSET_BYTES: PropId = PropId(0x0042_0250);
    /// `DCAM_IDPROP_IMAGE_PIXELTYPE`
    pub const IMAGE_PIXEL_TYPE: PropId = PropId(0x0042_0270);

    /// `DCAM_IDPROP_BUFFER_ROWBYTES`
    pub const BUFFER_ROW_BYTES: PropId = PropId(0x0042_0330);
    /// `DCAM_IDPROP_BUFFER_FRAMEBYTES`
    pub const BUFFER_FRAME_BYTES: PropId = PropId(0x0042_0340);
    /// `DCAM_IDPROP_BUFFER_TOPOFFSETBYTES`
    pub const BUFFER_TOP_OFFSET_BYTES: PropId = PropId(0x0042_0350);
    /// `DCAM_IDPROP_BUFFER_PIXELTYPE`
    pub const BUFFER_PIXEL_TYPE: PropId = PropId(0x0042_0360);

    /// `DCAM_IDPROP_IMAGEDETECTOR_PIXELWIDTH`
    pub const IMAGE_DETECTOR_PIXEL_WIDTH: PropId = PropId(0x0042_0810);
    /// `DCAM_IDPROP_IMAGEDETECTOR_PIXELHEIGHT`
    pub const IMAGE_DETECTOR_PIXEL_HEIGHT: PropId = PropId(0x0042_0820);
    /// `DCAM_IDPROP_IMAGEDETECTOR_PIXELNUMHORZ`
    pub const IMAGE_DETECTOR_PIXEL_NUM_HORZ: PropId = PropId(0x0042_0830);
    /// `DCAM_IDPROP_IMAGEDETECTOR_PIXELNUMVERT`
    pub const IMAGE_DETECTOR_PIXEL_NUM_VERT: PropId = PropId(0x0042_0840);

    /// Starting id for `dcamprop_getnextid` enumeration.
    pub const FIRST: PropId = PropId(0);
}

impl fmt::Debug for PropId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropId(0x{:08x})", self.0)
    }
}

impl fmt::Display for PropId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// `DCAMPROP_MODE__OFF`
pub const MODE_OFF: f64 = 1.0;
/// `DCAMPROP_MODE__ON`
pub const MODE_ON: f64 = 2.0;

/// A `DCAM_IDSTR_*` device string identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringId {
    /// `DCAM_IDSTR_BUS`
    Bus,
    /// `DCAM_IDSTR_CAMERAID` (serial number)
    CameraId,
    /// `DCAM_IDSTR_VENDOR`
    Vendor,
    /// `DCAM_IDSTR_MODEL`
    Model,
    /// `DCAM_IDSTR_CAMERAVERSION`
    CameraVersion,
    /// `DCAM_IDSTR_DRIVERVERSION`
    DriverVersion,
    /// `DCAM_IDSTR_MODULEVERSION`
    ModuleVersion,
    /// `DCAM_IDSTR_DCAMAPIVERSION`
    DcamApiVersion,
}

impl StringId {
    /// Every identifier, in header order.
    pub const ALL: [StringId; 8] = [
        StringId::Bus,
        StringId::CameraId,
        StringId::Vendor,
        StringId::Model,
        StringId::CameraVersion,
        StringId::DriverVersion,
        StringId::ModuleVersion,
        StringId::DcamApiVersion,
    ];

    /// Raw `DCAM_IDSTR_*` value.
    pub fn as_raw(self) -> i32 {
        match self {
            StringId::Bus => 0x0400_0101,
            StringId::CameraId => 0x0400_0102,
            StringId::Vendor => 0x0400_0103,
            StringId::Model => 0x0400_0104,
            StringId::CameraVersion => 0x0400_0105,
            StringId::DriverVersion => 0x0400_0106,
            StringId::ModuleVersion => 0x0400_0107,
            StringId::DcamApiVersion => 0x0400_0108,
        }
    }
}

/// `DCAMPROP_ATTR_*` and `DCAMPROP_TYPE_*` flags.
pub mod attr {
    /// `DCAMPROP_ATTR_HASRANGE`
    pub const HAS_RANGE: u32 = 0x8000_0000;
    /// `DCAMPROP_ATTR_HASSTEP`
    pub const HAS_STEP: u32 = 0x4000_0000;
    /// `DCAMPROP_ATTR_HASDEFAULT`
    pub const HAS_DEFAULT: u32 = 0x2000_0000;
    /// `DCAMPROP_ATTR_HASVALUETEXT`
    pub const HAS_VALUE_TEXT: u32 = 0x1000_0000;
    /// `DCAMPROP_ATTR_AUTOROUNDING`
    pub const AUTO_ROUNDING: u32 = 0x0080_0000;
    /// `DCAMPROP_ATTR_VOLATILE`
    pub const VOLATILE: u32 = 0x0008_0000;
    /// `DCAMPROP_ATTR_WRITABLE`
    pub const WRITABLE: u32 = 0x0002_0000;
    /// `DCAMPROP_ATTR_READABLE`
    pub const READABLE: u32 = 0x0001_0000;
    /// `DCAMPROP_ATTR_ACCESSREADY`
    pub const ACCESS_READY: u32 = 0x0000_2000;
    /// `DCAMPROP_ATTR_ACCESSBUSY`
    pub const ACCESS_BUSY: u32 = 0x0000_1000;

    /// `DCAMPROP_TYPE_NONE`
    pub const TYPE_NONE: u32 = 0x0000_0000;
    /// `DCAMPROP_TYPE_MODE`
    pub const TYPE_MODE: u32 = 0x0000_0001;
    /// `DCAMPROP_TYPE_LONG`
    pub const TYPE_LONG: u32 = 0x0000_0002;
    /// `DCAMPROP_TYPE_REAL`
    pub const TYPE_REAL: u32 = 0x0000_0003;
    /// `DCAMPROP_TYPE_MASK`
    pub const TYPE_MASK: u32 = 0x0000_000F;
}
