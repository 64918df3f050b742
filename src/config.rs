//! Configuration loading with Figment.
//!
//! Values are layered, later sources winning:
//! 1. built-in defaults
//! 2. a TOML file (`orcacam.toml` unless another path is given)
//! 3. environment variables prefixed with `ORCACAM_`, where `__` separates
//!    nesting levels (`ORCACAM_CAMERA__EXPOSURE_S=0.02`)
//!
//! # Example
//! ```no_run
//! use orcacam::config::OrcaConfig;
//!
//! let config = OrcaConfig::load()?;
//! config.validate()?;
//! println!("camera {} with {} slots", config.camera.index, config.camera.frame_count);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! A file using every key:
//!
//! ```toml
//! [camera]
//! index = 0
//! frame_count = 16
//! exposure_s = 0.01
//! frame_rate = 50.0
//! pixel_format = "mono16"
//! sensor_mode = "area"
//! temperature_target = -20.0
//! roi = { x = 512, y = 512, width = 1024, height = 1024 }
//!
//! [logging]
//! level = "info"
//! format = "compact"
//! ```

use crate::arena::{DEFAULT_FRAME_COUNT, MAX_FRAME_COUNT};
use crate::error::Result;
use crate::frame::PixelFormat;
use crate::logging::LogFormat;
use crate::properties::{Roi, SensorMode};
use crate::session::Session;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// File read by [`OrcaConfig::load`].
pub const DEFAULT_CONFIG_FILE: &str = "orcacam.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "ORCACAM_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrcaConfig {
    /// Camera selection and settings.
    pub camera: CameraConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

/// Which camera to open and how to set it up.
///
/// Unset optional fields leave the camera's current value alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Camera index as enumerated by the driver.
    pub index: u32,
    /// Arena slots.
    pub frame_count: usize,
    /// Exposure time in seconds.
    pub exposure_s: Option<f64>,
    /// Internal frame rate in frames per second.
    pub frame_rate: Option<f64>,
    /// `mono8` or `mono16`.
    pub pixel_format: Option<String>,
    /// Sensor mode name, e.g. `area` or `photon_number_resolving`.
    pub sensor_mode: Option<String>,
    /// Cooling target in °C.
    pub temperature_target: Option<f64>,
    /// Region of interest; the full sensor when unset.
    pub roi: Option<Roi>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            frame_count: DEFAULT_FRAME_COUNT,
            exposure_s: None,
            frame_rate: None,
            pixel_format: None,
            sensor_mode: None,
            temperature_target: None,
            roi: None,
        }
    }
}

/// Log output settings, see [`crate::logging::init`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error. `RUST_LOG` takes precedence.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl OrcaConfig {
    /// Load from [`DEFAULT_CONFIG_FILE`] and the environment.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load() -> std::result::Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from a specific file and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> std::result::Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    /// The layered provider, for callers that merge in more sources.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(OrcaConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let level = self.logging.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            ));
        }

        let camera = &self.camera;
        if !(1..=MAX_FRAME_COUNT).contains(&camera.frame_count) {
            return Err(format!(
                "Invalid frame_count {}. Must be 1-{MAX_FRAME_COUNT}",
                camera.frame_count
            ));
        }
        if let Some(exposure) = camera.exposure_s {
            if !(exposure.is_finite() && exposure > 0.0) {
                return Err(format!("Invalid exposure_s {exposure}. Must be positive"));
            }
        }
        if let Some(rate) = camera.frame_rate {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(format!("Invalid frame_rate {rate}. Must be positive"));
            }
        }
        if let Some(format) = camera.pixel_format()? {
            if !format.is_settable() {
                return Err(format!("Pixel format {format} cannot be selected"));
            }
        }
        camera.sensor_mode()?;
        if let Some(roi) = camera.roi {
            if roi.width == 0 || roi.height == 0 {
                return Err(format!("Invalid roi {roi}. Width and height must be non-zero"));
            }
        }
        Ok(())
    }
}

impl CameraConfig {
    /// The configured pixel format, parsed.
    pub fn pixel_format(&self) -> std::result::Result<Option<PixelFormat>, String> {
        self.pixel_format
            .as_deref()
            .map(str::parse::<PixelFormat>)
            .transpose()
            .map_err(|e| e.to_string())
    }

    /// The configured sensor mode, parsed.
    pub fn sensor_mode(&self) -> std::result::Result<Option<SensorMode>, String> {
        self.sensor_mode
            .as_deref()
            .map(str::parse::<SensorMode>)
            .transpose()
            .map_err(|e| e.to_string())
    }
}

impl Session {
    /// Apply every set field of `config`.
    ///
    /// Order: sensor mode, pixel format, ROI, exposure, frame rate,
    /// temperature target. Stops at the first failure; earlier settings stay
    /// applied. `index` and `frame_count` are used by [`Runtime::open`] and
    /// ignored here.
    ///
    /// [`Runtime::open`]: crate::runtime::Runtime::open
    pub fn apply_config(&mut self, config: &CameraConfig) -> Result<()> {
        if let Some(mode) = &config.sensor_mode {
            self.set_sensor_mode(mode.parse()?)?;
        }
        if let Some(format) = &config.pixel_format {
            self.set_pixel_format(format.parse()?)?;
        }
        if let Some(roi) = config.roi {
            self.set_roi(roi)?;
        }
        if let Some(exposure) = config.exposure_s {
            let actual = self.set_exposure(exposure)?;
            debug!(requested = exposure, actual, "exposure applied");
        }
        if let Some(rate) = config.frame_rate {
            let actual = self.set_frame_rate(rate)?;
            debug!(requested = rate, actual, "frame rate applied");
        }
        if let Some(target) = config.temperature_target {
            self.set_temperature_target(target)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = OrcaConfig::default();
        assert_eq!(config.camera.frame_count, DEFAULT_FRAME_COUNT);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = OrcaConfig::default();
        config.logging.level = "loud".into();
        assert!(config.validate().unwrap_err().contains("log level"));

        let mut config = OrcaConfig::default();
        config.camera.frame_count = 0;
        assert!(config.validate().unwrap_err().contains("frame_count"));

        let mut config = OrcaConfig::default();
        config.camera.pixel_format = Some("mono12".into());
        assert!(config.validate().is_err());

        let mut config = OrcaConfig::default();
        config.camera.sensor_mode = Some("warp".into());
        assert!(config.validate().is_err());

        let mut config = OrcaConfig::default();
        config.camera.roi = Some(Roi {
            x: 0,
            y: 0,
            width: 0,
            height: 8,
        });
        assert!(config.validate().unwrap_err().contains("roi"));
    }

    #[test]
    fn parsed_accessors() {
        let config = CameraConfig {
            pixel_format: Some("MONO8".into()),
            sensor_mode: Some("photon-number-resolving".into()),
            ..CameraConfig::default()
        };
        assert_eq!(config.pixel_format().unwrap(), Some(PixelFormat::Mono8));
        assert_eq!(
            config.sensor_mode().unwrap(),
            Some(SensorMode::PhotonNumberResolving)
        );
    }

    #[test]
    fn parsed_accessors_report_unknown_names() {
        let config = CameraConfig {
            pixel_format: Some("mono9".into()),
            sensor_mode: Some("warp".into()),
            ..CameraConfig::default()
        };
        assert!(config.pixel_format().unwrap_err().contains("mono9"));
        assert!(config.sensor_mode().unwrap_err().contains("warp"));
        assert_eq!(CameraConfig::default().pixel_format(), Ok(None));
    }
}
