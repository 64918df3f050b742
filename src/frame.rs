//! Borrowed frame views and pixel formats.

use crate::driver::{Dcam, DeviceHandle, PropId};
use crate::error::{OrcaError, Result};
use std::fmt;
use std::str::FromStr;

/// `DCAM_PIXELTYPE_*` as reported by `IMAGE_PIXELTYPE` / `BUFFER_PIXELTYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8-bit monochrome.
    Mono8,
    /// 16-bit monochrome, little-endian.
    Mono16,
    /// 12-bit monochrome in 16-bit words.
    Mono12,
    /// Packed 12-bit monochrome, two pixels in three bytes.
    Mono12P,
    /// 8-bit RGB.
    Rgb24,
    /// 16-bit RGB.
    Rgb48,
    /// 8-bit BGR.
    Bgr24,
    /// 16-bit BGR.
    Bgr48,
    /// A pixel type without a name here.
    Other(u32),
}

impl PixelFormat {
    /// Decode a raw pixel type value.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0x0000_0001 => PixelFormat::Mono8,
            0x0000_0002 => PixelFormat::Mono16,
            0x0000_0003 => PixelFormat::Mono12,
            0x0000_0005 => PixelFormat::Mono12P,
            0x0000_0021 => PixelFormat::Rgb24,
            0x0000_0022 => PixelFormat::Rgb48,
            0x0000_0029 => PixelFormat::Bgr24,
            0x0000_002A => PixelFormat::Bgr48,
            other => PixelFormat::Other(other),
        }
    }

    /// Raw pixel type value.
    pub fn as_raw(self) -> u32 {
        match self {
            PixelFormat::Mono8 => 0x0000_0001,
            PixelFormat::Mono16 => 0x0000_0002,
            PixelFormat::Mono12 => 0x0000_0003,
            PixelFormat::Mono12P => 0x0000_0005,
            PixelFormat::Rgb24 => 0x0000_0021,
            PixelFormat::Rgb48 => 0x0000_0022,
            PixelFormat::Bgr24 => 0x0000_0029,
            PixelFormat::Bgr48 => 0x0000_002A,
            PixelFormat::Other(raw) => raw,
        }
    }

    /// Bytes per pixel for byte-aligned formats; `None` for packed ones.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Mono8 => Some(1),
            PixelFormat::Mono16 | PixelFormat::Mono12 => Some(2),
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Rgb48 | PixelFormat::Bgr48 => Some(6),
            PixelFormat::Mono12P | PixelFormat::Other(_) => None,
        }
    }

    /// Whether this wrapper lets callers select the format.
    pub fn is_settable(self) -> bool {
        matches!(self, PixelFormat::Mono8 | PixelFormat::Mono16)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Mono8 => f.write_str("MONO8"),
            PixelFormat::Mono16 => f.write_str("MONO16"),
            PixelFormat::Mono12 => f.write_str("MONO12"),
            PixelFormat::Mono12P => f.write_str("MONO12P"),
            PixelFormat::Rgb24 => f.write_str("RGB24"),
            PixelFormat::Rgb48 => f.write_str("RGB48"),
            PixelFormat::Bgr24 => f.write_str("BGR24"),
            PixelFormat::Bgr48 => f.write_str("BGR48"),
            PixelFormat::Other(raw) => write!(f, "0x{raw:x}"),
        }
    }
}

impl FromStr for PixelFormat {
    type Err = OrcaError;

    /// Accepts the display names, case-insensitively (`mono16`, `MONO8`).
    fn from_str(s: &str) -> Result<Self> {
        let format = match s.trim().to_ascii_uppercase().as_str() {
            "MONO8" => PixelFormat::Mono8,
            "MONO16" => PixelFormat::Mono16,
            "MONO12" => PixelFormat::Mono12,
            "MONO12P" => PixelFormat::Mono12P,
            "RGB24" => PixelFormat::Rgb24,
            "RGB48" => PixelFormat::Rgb48,
            "BGR24" => PixelFormat::Bgr24,
            "BGR48" => PixelFormat::Bgr48,
            _ => return Err(OrcaError::Unsupported(format!("pixel format '{s}'"))),
        };
        Ok(format)
    }
}

/// Frame layout read once when a capture starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    /// Bytes before the first pixel row in each slot.
    pub top_offset_bytes: usize,
    /// Bytes between the starts of two rows.
    pub row_bytes: usize,
    /// Pixel layout.
    pub pixel_format: PixelFormat,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl FrameGeometry {
    /// Read the buffer layout the driver will deliver into.
    pub(crate) fn query(driver: &dyn Dcam, dev: DeviceHandle) -> Result<Self> {
        let top_offset_bytes = driver.prop_get(dev, PropId::BUFFER_TOP_OFFSET_BYTES)? as usize;
        let row_bytes = driver.prop_get(dev, PropId::BUFFER_ROW_BYTES)? as usize;
        let pixel_format =
            PixelFormat::from_raw(driver.prop_get(dev, PropId::BUFFER_PIXEL_TYPE)? as u32);
        let width = driver.prop_get(dev, PropId::IMAGE_WIDTH)? as u32;
        let height = driver.prop_get(dev, PropId::IMAGE_HEIGHT)? as u32;
        Ok(Self {
            top_offset_bytes,
            row_bytes,
            pixel_format,
            width,
            height,
        })
    }

    /// Bytes of image data following the top offset.
    pub fn image_bytes(&self) -> usize {
        self.row_bytes * self.height as usize
    }
}

/// A transient, borrowed view of one captured image.
///
/// The view points straight into an arena slot. It is only valid for the
/// duration of the callback invocation (push style) or until the next call
/// on the session (pull style); the driver may overwrite the slot afterwards.
/// Copy the pixels out (`data.to_vec()`) to keep them.
///
/// Once the ring wraps, the driver can write into the slot while the view
/// is still alive; the view then shows a torn frame. See the safety notes
/// in [`crate::arena`].
#[derive(Clone, Copy)]
pub struct Frame<'a> {
    /// Pixel rows, starting at the first row (top offset already skipped).
    pub data: &'a [u8],
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Layout of each pixel in `data`.
    pub pixel_format: PixelFormat,
    /// Bytes between the starts of two consecutive rows.
    pub row_stride: usize,
    /// Arena slot the frame was delivered into.
    pub frame_index: usize,
    /// Frames transferred since the capture started, including this one.
    pub frame_number: u64,
}

impl<'a> Frame<'a> {
    /// Build a view over one arena slot.
    ///
    /// Returns `None` when the slot is too short for the geometry, which
    /// happens only if the driver and the arena disagree on the frame size.
    pub(crate) fn from_slot(
        slot: &'a [u8],
        geometry: &FrameGeometry,
        frame_index: usize,
        frame_number: u64,
    ) -> Option<Self> {
        let start = geometry.top_offset_bytes;
        let end = start.checked_add(geometry.image_bytes())?;
        let data = slot.get(start..end)?;
        Some(Self {
            data,
            width: geometry.width,
            height: geometry.height,
            pixel_format: geometry.pixel_format,
            row_stride: geometry.row_bytes,
            frame_index,
            frame_number,
        })
    }

    /// One row of pixels including any row padding.
    pub fn row(&self, y: u32) -> Option<&'a [u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.row_stride;
        self.data.get(start..start + self.row_stride)
    }

    /// Read one 16-bit little-endian pixel (`Mono16` / `Mono12` frames).
    pub fn pixel_u16(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width {
            return None;
        }
        let row = self.row(y)?;
        let offset = x as usize * 2;
        let bytes = row.get(offset..offset + 2)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read one 8-bit pixel (`Mono8` frames).
    pub fn pixel_u8(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width {
            return None;
        }
        self.row(y)?.get(x as usize).copied()
    }
}

impl fmt::Debug for Frame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pixel_format", &self.pixel_format)
            .field("row_stride", &self.row_stride)
            .field("frame_index", &self.frame_index)
            .field("frame_number", &self.frame_number)
            .field("len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(top: usize) -> FrameGeometry {
        FrameGeometry {
            top_offset_bytes: top,
            row_bytes: 8,
            pixel_format: PixelFormat::Mono16,
            width: 4,
            height: 2,
        }
    }

    #[test]
    fn pixel_format_raw_values() {
        for format in [
            PixelFormat::Mono8,
            PixelFormat::Mono16,
            PixelFormat::Mono12,
            PixelFormat::Mono12P,
            PixelFormat::Rgb24,
            PixelFormat::Bgr48,
        ] {
            assert_eq!(PixelFormat::from_raw(format.as_raw()), format);
        }
        assert_eq!(PixelFormat::from_raw(0x99), PixelFormat::Other(0x99));
        assert!(PixelFormat::Mono16.is_settable());
        assert!(!PixelFormat::Mono12.is_settable());
    }

    #[test]
    fn pixel_format_parses_display_names() {
        assert_eq!("mono16".parse::<PixelFormat>().unwrap(), PixelFormat::Mono16);
        assert_eq!(" MONO8 ".parse::<PixelFormat>().unwrap(), PixelFormat::Mono8);
        assert_eq!(
            PixelFormat::Bgr24.to_string().parse::<PixelFormat>().unwrap(),
            PixelFormat::Bgr24
        );
        assert!("yuv422".parse::<PixelFormat>().is_err());
    }

    #[test]
    fn frame_skips_top_offset() {
        let mut slot = vec![0xEEu8; 4 + 16];
        slot[4] = 0x34;
        slot[5] = 0x12;
        let frame = Frame::from_slot(&slot, &geometry(4), 3, 7).unwrap();
        assert_eq!(frame.data.len(), 16);
        assert_eq!(frame.pixel_u16(0, 0), Some(0x1234));
        assert_eq!(frame.frame_index, 3);
        assert_eq!(frame.frame_number, 7);
    }

    #[test]
    fn frame_rejects_short_slot() {
        let slot = vec![0u8; 10];
        assert!(Frame::from_slot(&slot, &geometry(4), 0, 1).is_none());
    }

    #[test]
    fn pixel_access_is_bounds_checked() {
        let slot = vec![0u8; 16];
        let frame = Frame::from_slot(&slot, &geometry(0), 0, 1).unwrap();
        assert!(frame.row(1).is_some());
        assert!(frame.row(2).is_none());
        assert!(frame.pixel_u16(4, 0).is_none());
    }
}
