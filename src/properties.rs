//! Property accessors.
//!
//! DCAM exposes every camera setting as an `f64`-valued property keyed by a
//! [`PropId`]. This module offers:
//!
//! - **Generic access**: get/set/setget/query, attributes, names, value
//!   texts, and enumeration of every property the camera supports.
//! - **Typed access** for the settings this crate cares about: exposure,
//!   temperature, frame rate, ROI, pixel format and sensor mode.
//!
//! Driver codes are surfaced unchanged. Setters that change the frame
//! geometry (ROI, pixel format, sensor mode) resize the arena before they
//! return, so a successful call guarantees the buffers already match. Those
//! setters, and the timing setters, fail with `Busy` while capturing.

use crate::driver::{EnumOption, PropAttr, PropId, QueryOption, MODE_OFF, MODE_ON};
use crate::error::{OrcaError, Result};
use crate::frame::PixelFormat;
use crate::session::Session;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Properties whose value changes the delivered frame layout.
const GEOMETRY_PROPS: [PropId; 7] = [
    PropId::SUBARRAY_HPOS,
    PropId::SUBARRAY_HSIZE,
    PropId::SUBARRAY_VPOS,
    PropId::SUBARRAY_VSIZE,
    PropId::SUBARRAY_MODE,
    PropId::IMAGE_PIXEL_TYPE,
    PropId::SENSOR_MODE,
];

// Enumeration guard against a driver that never reports the end.
const MAX_ENUMERATED_PROPS: usize = 4096;

/// Region of interest in sensor pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Roi {
    /// Left edge in sensor pixels.
    pub x: u32,
    /// Top edge in sensor pixels.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Roi {
    /// The whole sensor.
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// Whether the rectangle lies inside a `width × height` sensor.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x.checked_add(self.width).is_some_and(|r| r <= width)
            && self.y.checked_add(self.height).is_some_and(|b| b <= height)
    }
}

impl fmt::Display for Roi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// `DCAMPROP_SENSORMODE__*`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorMode {
    /// Full-frame area readout.
    Area,
    /// Single line readout.
    Line,
    /// Time delay integration.
    Tdi,
    /// Framing readout.
    Framing,
    /// Partial area readout.
    PartialArea,
    /// Slit readout.
    Slit,
    /// Extended time delay integration.
    TdiExtended,
    /// Panoramic readout.
    Panoramic,
    /// Progressive (lightsheet) readout.
    Progressive,
    /// Split view readout.
    SplitView,
    /// Dual lightsheet readout.
    DualLightSheet,
    /// Photon number resolving readout.
    PhotonNumberResolving,
    /// Whole lines readout.
    WholeLines,
    /// A mode without a name here.
    Other(u32),
}

impl SensorMode {
    const NAMED: [(SensorMode, u32, &'static str); 13] = [
        (SensorMode::Area, 1, "area"),
        (SensorMode::Line, 3, "line"),
        (SensorMode::Tdi, 4, "tdi"),
        (SensorMode::Framing, 6, "framing"),
        (SensorMode::PartialArea, 7, "partial_area"),
        (SensorMode::Slit, 9, "slit"),
        (SensorMode::TdiExtended, 10, "tdi_extended"),
        (SensorMode::Panoramic, 11, "panoramic"),
        (SensorMode::Progressive, 12, "progressive"),
        (SensorMode::SplitView, 14, "split_view"),
        (SensorMode::DualLightSheet, 16, "dual_light_sheet"),
        (SensorMode::PhotonNumberResolving, 18, "photon_number_resolving"),
        (SensorMode::WholeLines, 19, "whole_lines"),
    ];

    /// Decode a raw sensor mode value.
    pub fn from_raw(raw: u32) -> Self {
        Self::NAMED
            .iter()
            .find(|(_, value, _)| *value == raw)
            .map_or(SensorMode::Other(raw), |(mode, _, _)| *mode)
    }

    /// Raw sensor mode value.
    pub fn as_raw(self) -> u32 {
        match self {
            SensorMode::Other(raw) => raw,
            mode => Self::NAMED
                .iter()
                .find(|(m, _, _)| *m == mode)
                .map_or(0, |(_, value, _)| *value),
        }
    }

    /// Lower-case identifier, as accepted by `FromStr`.
    pub fn name(self) -> Option<&'static str> {
        Self::NAMED
            .iter()
            .find(|(m, _, _)| *m == self)
            .map(|(_, _, name)| *name)
    }
}

impl fmt::Display for SensorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{:x}", self.as_raw()),
        }
    }
}

impl FromStr for SensorMode {
    type Err = OrcaError;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::NAMED
            .iter()
            .find(|(_, _, name)| *name == key)
            .map(|(mode, _, _)| *mode)
            .ok_or_else(|| OrcaError::Unsupported(format!("sensor mode '{s}'")))
    }
}

impl Session {
    // ------------------------------------------------------------------
    // Generic access
    // ------------------------------------------------------------------

    /// `dcamprop_getvalue`
    pub fn get_value(&self, prop: PropId) -> Result<f64> {
        Ok(self.driver.prop_get(self.device()?, prop)?)
    }

    /// `dcamprop_setvalue`. Geometry properties resize the arena afterwards.
    pub fn set_value(&mut self, prop: PropId, value: f64) -> Result<()> {
        let result = self
            .driver
            .prop_set(self.device()?, prop, value)
            .map_err(OrcaError::from);
        self.after_write(prop, result)
    }

    /// `dcamprop_setgetvalue`: returns the value the driver settled on.
    pub fn setget_value(&mut self, prop: PropId, value: f64) -> Result<f64> {
        let result = self
            .driver
            .prop_setget(self.device()?, prop, value)
            .map_err(OrcaError::from);
        self.after_write(prop, result)
    }

    /// `dcamprop_queryvalue`
    pub fn query_value(&self, prop: PropId, value: f64, option: QueryOption) -> Result<f64> {
        Ok(self.driver.prop_query(self.device()?, prop, value, option)?)
    }

    /// `dcamprop_getattr`
    pub fn attr(&self, prop: PropId) -> Result<PropAttr> {
        Ok(self.driver.prop_attr(self.device()?, prop)?)
    }

    /// `dcamprop_getname`
    pub fn property_name(&self, prop: PropId) -> Result<String> {
        Ok(self.driver.prop_name(self.device()?, prop)?)
    }

    /// `dcamprop_getvaluetext`
    pub fn value_text(&self, prop: PropId, value: f64) -> Result<String> {
        Ok(self.driver.prop_value_text(self.device()?, prop, value)?)
    }

    /// Every property id the camera supports, in enumeration order.
    pub fn properties(&self) -> Result<Vec<PropId>> {
        self.properties_with(EnumOption::Supported)
    }

    /// Property ids selected by `option`, in enumeration order.
    pub fn properties_with(&self, option: EnumOption) -> Result<Vec<PropId>> {
        let device = self.device()?;
        let mut ids = Vec::new();
        let mut current = PropId::FIRST;
        while let Some(next) = self.driver.prop_next_id(device, current, option)? {
            ids.push(next);
            if ids.len() >= MAX_ENUMERATED_PROPS {
                break;
            }
            current = next;
        }
        Ok(ids)
    }

    fn after_write<T>(&mut self, prop: PropId, result: Result<T>) -> Result<T> {
        if !GEOMETRY_PROPS.contains(&prop) || self.is_capturing() {
            return result;
        }
        let refreshed = self.refresh_arena();
        let value = result?;
        refreshed.map(|()| value)
    }

    /// Resize the arena for the current geometry, keeping its slot count.
    fn refresh_arena(&mut self) -> Result<()> {
        match self.arena.as_ref().map(|a| a.frame_count()) {
            Some(count) => self.ensure_capacity(count),
            None => Ok(()),
        }
    }

    fn ensure_idle(&self) -> Result<()> {
        self.device()?;
        if self.is_capturing() {
            return Err(OrcaError::Busy);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Timing and temperature
    // ------------------------------------------------------------------

    /// Exposure time in seconds.
    pub fn exposure(&self) -> Result<f64> {
        self.get_value(PropId::EXPOSURE_TIME)
    }

    /// Set the exposure time in seconds; returns the value the camera uses.
    pub fn set_exposure(&mut self, seconds: f64) -> Result<f64> {
        self.ensure_idle()?;
        self.setget_value(PropId::EXPOSURE_TIME, seconds)
    }

    /// Current sensor temperature in °C.
    pub fn temperature(&self) -> Result<f64> {
        self.get_value(PropId::SENSOR_TEMPERATURE)
    }

    /// Cooling set point in °C.
    pub fn temperature_target(&self) -> Result<f64> {
        self.get_value(PropId::SENSOR_TEMPERATURE_TARGET)
    }

    /// Set the cooling set point; returns the value the camera uses.
    pub fn set_temperature_target(&mut self, celsius: f64) -> Result<f64> {
        self.setget_value(PropId::SENSOR_TEMPERATURE_TARGET, celsius)
    }

    /// Internal frame rate in frames per second.
    pub fn frame_rate(&self) -> Result<f64> {
        self.get_value(PropId::INTERNAL_FRAME_RATE)
    }

    /// Set the internal frame rate; returns the value the camera uses.
    pub fn set_frame_rate(&mut self, fps: f64) -> Result<f64> {
        self.ensure_idle()?;
        self.setget_value(PropId::INTERNAL_FRAME_RATE, fps)
    }

    // ------------------------------------------------------------------
    // Geometry
    // ------------------------------------------------------------------

    /// Sensor size in pixels.
    pub fn sensor_size(&self) -> Result<(u32, u32)> {
        let width = self.get_value(PropId::IMAGE_DETECTOR_PIXEL_NUM_HORZ)?;
        let height = self.get_value(PropId::IMAGE_DETECTOR_PIXEL_NUM_VERT)?;
        Ok((width as u32, height as u32))
    }

    /// Size of the delivered image in pixels.
    pub fn frame_size(&self) -> Result<(u32, u32)> {
        let width = self.get_value(PropId::IMAGE_WIDTH)?;
        let height = self.get_value(PropId::IMAGE_HEIGHT)?;
        Ok((width as u32, height as u32))
    }

    /// The active region of interest; the full sensor when subarray mode is off.
    pub fn roi(&self) -> Result<Roi> {
        if self.get_value(PropId::SUBARRAY_MODE)? == MODE_OFF {
            let (width, height) = self.sensor_size()?;
            return Ok(Roi::full(width, height));
        }
        Ok(Roi {
            x: self.get_value(PropId::SUBARRAY_HPOS)? as u32,
            y: self.get_value(PropId::SUBARRAY_VPOS)? as u32,
            width: self.get_value(PropId::SUBARRAY_HSIZE)? as u32,
            height: self.get_value(PropId::SUBARRAY_VSIZE)? as u32,
        })
    }

    /// Select a region of interest and resize the arena to match.
    ///
    /// Subarray mode is switched off while the four coordinates are written,
    /// so intermediate combinations never have to be valid, then switched on.
    pub fn set_roi(&mut self, roi: Roi) -> Result<()> {
        self.ensure_idle()?;
        let device = self.device()?;

        let driver = &self.driver;
        let written = [
            (PropId::SUBARRAY_MODE, MODE_OFF),
            (PropId::SUBARRAY_HPOS, f64::from(roi.x)),
            (PropId::SUBARRAY_HSIZE, f64::from(roi.width)),
            (PropId::SUBARRAY_VPOS, f64::from(roi.y)),
            (PropId::SUBARRAY_VSIZE, f64::from(roi.height)),
            (PropId::SUBARRAY_MODE, MODE_ON),
        ]
        .into_iter()
        .try_for_each(|(prop, value)| driver.prop_set(device, prop, value))
        .map_err(OrcaError::from);

        let refreshed = self.refresh_arena();
        written?;
        refreshed
    }

    /// Pixel format of delivered frames.
    pub fn pixel_format(&self) -> Result<PixelFormat> {
        let raw = self.get_value(PropId::IMAGE_PIXEL_TYPE)?;
        Ok(PixelFormat::from_raw(raw as u32))
    }

    /// Select `Mono8` or `Mono16` and resize the arena to match.
    ///
    /// Other formats fail with `Unsupported` without touching the camera.
    pub fn set_pixel_format(&mut self, format: PixelFormat) -> Result<()> {
        self.ensure_idle()?;
        if !format.is_settable() {
            return Err(OrcaError::Unsupported(format!("pixel format {format}")));
        }
        self.set_value(PropId::IMAGE_PIXEL_TYPE, f64::from(format.as_raw()))
    }

    /// Current sensor readout mode.
    pub fn sensor_mode(&self) -> Result<SensorMode> {
        let raw = self.get_value(PropId::SENSOR_MODE)?;
        Ok(SensorMode::from_raw(raw as u32))
    }

    /// Select a sensor readout mode.
    ///
    /// Fails with `Unsupported` when the camera settles on a different mode.
    pub fn set_sensor_mode(&mut self, mode: SensorMode) -> Result<()> {
        self.ensure_idle()?;
        let settled = self.setget_value(PropId::SENSOR_MODE, f64::from(mode.as_raw()))?;
        let settled = SensorMode::from_raw(settled as u32);
        if settled != mode {
            return Err(OrcaError::Unsupported(format!(
                "sensor mode {mode} (camera kept {settled})"
            )));
        }
        Ok(())
    }
}
