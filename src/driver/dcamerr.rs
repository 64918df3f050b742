//! Raw `DCAMERR` status codes.

use std::fmt;

/// A raw `DCAMERR` value as returned by a DCAM-API call.
///
/// Failures are negative when read as `i32` (high bit set). The numeric code
/// is preserved verbatim so callers can always recover it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DcamErr(pub i32);

macro_rules! dcam_codes {
    ($( $(#[$meta:meta])* $name:ident = $code:expr => $text:expr ),* $(,)?) => {
        impl DcamErr {
            $(
                #[doc = $text]
                $(#[$meta])*
                pub const $name: DcamErr = DcamErr({
                    let raw: u32 = $code;
                    raw as i32
                });
            )*

            /// Short human-readable description of the code.
            pub fn description(self) -> &'static str {
                $(
                    if self == DcamErr::$name {
                        return $text;
                    }
                )*
                "unknown DCAM error"
            }

            /// Symbolic `DCAMERR_*` name, if the code is known.
            pub fn name(self) -> Option<&'static str> {
                $(
                    if self == DcamErr::$name {
                        return Some(stringify!($name));
                    }
                )*
                None
            }
        }
    };
}

dcam_codes! {
    /// API cannot process in busy state.
    BUSY = 0x8000_0101 => "API cannot process in busy state",
    /// API requires ready state.
    NOT_READY = 0x8000_0103 => "API requires ready state",
    /// API requires stable or unstable state.
    NOT_STABLE = 0x8000_0104 => "API requires stable or unstable state",
    /// API does not support in unstable state.
    UNSTABLE = 0x8000_0105 => "API does not support in unstable state",
    /// API requires busy state.
    NOT_BUSY = 0x8000_0107 => "API requires busy state",
    /// Some resource is exclusive and already in use.
    EXCLUDED = 0x8000_0110 => "resource is exclusive and already in use",
    /// Something happened near the cooler.
    COOLING_TROUBLE = 0x8000_0302 => "cooling trouble",
    /// No trigger arrived while waiting for a frame.
    NO_TRIGGER = 0x8000_0303 => "no trigger when necessary",
    /// Sensor temperature is out of range.
    TEMPERATURE_TROUBLE = 0x8000_0304 => "temperature trouble",
    /// Triggers arrived faster than the camera can process.
    TOO_FREQUENT_TRIGGER = 0x8000_0305 => "too frequent trigger",
    /// Abort process.
    ABORT = 0x8000_0102 => "wait aborted",
    /// Timeout.
    TIMEOUT = 0x8000_0106 => "timeout",
    /// Frame data was lost.
    LOST_FRAME = 0x8000_0301 => "frame data is lost",
    /// Frame was lost but the reason is low-level driver trouble.
    MISSING_FRAME_TROUBLE = 0x8000_0f06 => "frame is lost by low-level driver trouble",
    /// Hardware reported an invalid image.
    INVALID_IMAGE = 0x8000_0321 => "invalid image",
    /// Not enough resources except memory.
    NO_RESOURCE = 0x8000_0201 => "not enough resource except memory",
    /// Not enough memory.
    NO_MEMORY = 0x8000_0203 => "not enough memory",
    /// No sub-module.
    NO_MODULE = 0x8000_0204 => "no sub-module",
    /// No driver.
    NO_DRIVER = 0x8000_0205 => "no driver",
    /// No camera.
    NO_CAMERA = 0x8000_0206 => "no camera",
    /// No grabber.
    NO_GRABBER = 0x8000_0207 => "no grabber",
    /// Failed to open the camera.
    FAIL_OPEN = 0x8000_1001 => "failed to open camera",
    /// Invalid camera.
    INVALID_CAMERA = 0x8000_0806 => "invalid camera",
    /// Invalid camera handle.
    INVALID_HANDLE = 0x8000_0807 => "invalid camera handle",
    /// Invalid parameter.
    INVALID_PARAM = 0x8000_0808 => "invalid parameter",
    /// Invalid property value.
    INVALID_VALUE = 0x8000_0821 => "invalid property value",
    /// Value is out of range.
    OUT_OF_RANGE = 0x8000_0822 => "value is out of range",
    /// The property is not writable.
    NOT_WRITABLE = 0x8000_0823 => "the property is not writable",
    /// The property is not readable.
    NOT_READABLE = 0x8000_0824 => "the property is not readable",
    /// The property id is invalid.
    INVALID_PROPERTY_ID = 0x8000_0825 => "the property id is invalid",
    /// The camera does not have the property.
    NO_PROPERTY = 0x8000_0828 => "the camera does not have the property",
    /// The property cannot be accessed now.
    ACCESS_DENY = 0x8000_082c => "the property cannot be accessed now",
    /// The property does not have value text.
    NO_VALUE_TEXT = 0x8000_082d => "the property does not have value text",
    /// At least one property value is wrong.
    WRONG_PROPERTY_VALUE = 0x8000_082e => "at least one property value is wrong",
    /// Not enough system memory for the requested buffers.
    LESS_SYSTEM_MEMORY = 0x8000_083f => "not enough system memory",
    /// Camera does not support the function or property with current settings.
    NOT_SUPPORT = 0x8000_0f03 => "camera does not support the function or property",
    /// Failed to read data from the camera.
    FAIL_READ_CAMERA = 0x8300_1002 => "failed to read data from camera",
    /// Failed to write data to the camera.
    FAIL_WRITE_CAMERA = 0x8300_1003 => "failed to write data to camera",
    /// Invalid wait handle.
    INVALID_WAIT_HANDLE = 0x8400_2001 => "invalid wait handle",
    /// Camera connection was lost.
    NO_CONNECTION = 0x8000_0f07 => "no connection to camera",
    /// Not yet implemented.
    NOT_IMPLEMENT = 0x8000_0f02 => "not yet implemented",
    /// Internal error.
    UNREACH = 0x8000_0f01 => "internal error",
    /// No error, nothing to have done.
    NONE = 0 => "no error",
    /// No error, general success code.
    SUCCESS = 1 => "success",
}

impl DcamErr {
    /// Whether the code signals a failure.
    pub fn is_failure(self) -> bool {
        self.0 < 0
    }

    /// Converts a raw return value into a `Result`.
    pub fn check(raw: i32) -> Result<(), DcamErr> {
        let code = DcamErr(raw);
        if code.is_failure() {
            Err(code)
        } else {
            Ok(())
        }
    }

    /// The code as the unsigned hex value the vendor documentation uses.
    pub fn as_u32(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Debug for DcamErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "DcamErr::{}(0x{:08x})", name, self.as_u32()),
            None => write!(f, "DcamErr(0x{:08x})", self.as_u32()),
        }
    }
}

impl fmt::Display for DcamErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:08x})", self.description(), self.as_u32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_are_negative() {
        assert!(DcamErr::TIMEOUT.is_failure());
        assert!(DcamErr::NO_CAMERA.is_failure());
        assert!(!DcamErr::SUCCESS.is_failure());
        assert!(!DcamErr::NONE.is_failure());
    }

    #[test]
    fn check_maps_raw_codes() {
        assert_eq!(DcamErr::check(1), Ok(()));
        assert_eq!(DcamErr::check(0x8000_0106_u32 as i32), Err(DcamErr::TIMEOUT));
    }

    #[test]
    fn display_keeps_raw_code() {
        let text = DcamErr::NO_MEMORY.to_string();
        assert!(text.contains("not enough memory"));
        assert!(text.contains("0x80000203"));
    }

    #[test]
    fn unknown_code_has_generic_description() {
        let code = DcamErr(0x8123_4567_u32 as i32);
        assert_eq!(code.description(), "unknown DCAM error");
        assert_eq!(code.name(), None);
        assert_eq!(format!("{code:?}"), "DcamErr(0x81234567)");
    }
}
