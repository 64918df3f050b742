//! [`Dcam`] over the real DCAM-API via `dcamapi-sys`.
//!
//! Every method fills the C parameter struct, makes one call and converts
//! the returned `DCAMERR` with [`DcamErr::check`]. Handles cross the trait
//! boundary as integers and are cast back to `HDCAM` / `HDCAMWAIT` here.

#![allow(unsafe_code)]

use super::{
    Dcam, DcamErr, DcamResult, DeviceHandle, EnumOption, PropAttr, PropId, QueryOption, SlotPtr,
    StringId, TransferInfo, WaitHandle,
};
use dcamapi_sys as sys;
use std::ffi::{c_char, c_void, CStr};
use std::mem;

/// `DCAMBUF_ATTACHKIND_FRAME`
const ATTACH_KIND_FRAME: i32 = 0;
/// `DCAMCAP_START_SEQUENCE`
const START_SEQUENCE: i32 = -1;
/// `DCAMCAP_TRANSFERKIND_FRAME`
const TRANSFER_KIND_FRAME: i32 = 0;
/// Large enough for every string the API returns.
const TEXT_BYTES: usize = 256;

/// The installed DCAM-API.
#[derive(Debug, Default)]
pub struct HardwareDcam {
    _private: (),
}

impl HardwareDcam {
    /// Bind to the installed DCAM-API. Nothing is initialized yet.
    pub fn new() -> Self {
        Self::default()
    }
}

fn hdcam(dev: DeviceHandle) -> sys::HDCAM {
    dev.0 as sys::HDCAM
}

fn hwait(wait: WaitHandle) -> sys::HDCAMWAIT {
    wait.0 as sys::HDCAMWAIT
}

/// A zeroed C parameter struct with its leading size field set.
macro_rules! param {
    ($ty:ty, $size:ident) => {{
        // SAFETY: DCAM parameter structs are plain C data; all-zero is a
        // valid "no options" state.
        let mut p: $ty = unsafe { mem::zeroed() };
        p.$size = mem::size_of::<$ty>() as _;
        p
    }};
}

fn text_from(buf: &[c_char]) -> String {
    // SAFETY: buffers are one byte longer than the `textbytes` handed to the
    // driver and start zeroed, so the last byte is always a terminator.
    unsafe { CStr::from_ptr(buf.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

impl Dcam for HardwareDcam {
    fn api_init(&self) -> DcamResult<u32> {
        let mut init = param!(sys::DCAMAPI_INIT, size);
        DcamErr::check(unsafe { sys::dcamapi_init(&mut init) } as i32)?;
        Ok(init.iDeviceCount.max(0) as u32)
    }

    fn api_uninit(&self) -> DcamResult<()> {
        DcamErr::check(unsafe { sys::dcamapi_uninit() } as i32)
    }

    fn dev_open(&self, index: u32) -> DcamResult<DeviceHandle> {
        let mut open = param!(sys::DCAMDEV_OPEN, size);
        open.index = index as _;
        DcamErr::check(unsafe { sys::dcamdev_open(&mut open) } as i32)?;
        Ok(DeviceHandle(open.hdcam as usize))
    }

    fn dev_close(&self, dev: DeviceHandle) -> DcamResult<()> {
        DcamErr::check(unsafe { sys::dcamdev_close(hdcam(dev)) } as i32)
    }

    fn dev_string(&self, dev: DeviceHandle, id: StringId) -> DcamResult<String> {
        let mut text = [0 as c_char; TEXT_BYTES + 1];
        let mut param = param!(sys::DCAMDEV_STRING, size);
        param.iString = id.as_raw() as _;
        param.text = text.as_mut_ptr();
        param.textbytes = TEXT_BYTES as _;
        DcamErr::check(unsafe { sys::dcamdev_getstring(hdcam(dev), &mut param) } as i32)?;
        Ok(text_from(&text))
    }

    fn wait_open(&self, dev: DeviceHandle) -> DcamResult<WaitHandle> {
        let mut open = param!(sys::DCAMWAIT_OPEN, size);
        open.hdcam = hdcam(dev);
        DcamErr::check(unsafe { sys::dcamwait_open(&mut open) } as i32)?;
        Ok(WaitHandle(open.hwait as usize))
    }

    fn wait_close(&self, wait: WaitHandle) -> DcamResult<()> {
        DcamErr::check(unsafe { sys::dcamwait_close(hwait(wait)) } as i32)
    }

    fn wait_start(&self, wait: WaitHandle, event_mask: u32, timeout_ms: u32) -> DcamResult<u32> {
        let mut start = param!(sys::DCAMWAIT_START, size);
        start.eventmask = event_mask as _;
        start.timeout = timeout_ms as _;
        DcamErr::check(unsafe { sys::dcamwait_start(hwait(wait), &mut start) } as i32)?;
        Ok(start.eventhappened as u32)
    }

    fn wait_abort(&self, wait: WaitHandle) -> DcamResult<()> {
        DcamErr::check(unsafe { sys::dcamwait_abort(hwait(wait)) } as i32)
    }

    fn prop_get(&self, dev: DeviceHandle, prop: PropId) -> DcamResult<f64> {
        let mut value = 0.0;
        DcamErr::check(
            unsafe { sys::dcamprop_getvalue(hdcam(dev), prop.0 as _, &mut value) } as i32,
        )?;
        Ok(value)
    }

    fn prop_set(&self, dev: DeviceHandle, prop: PropId, value: f64) -> DcamResult<()> {
        DcamErr::check(unsafe { sys::dcamprop_setvalue(hdcam(dev), prop.0 as _, value) } as i32)
    }

    fn prop_setget(&self, dev: DeviceHandle, prop: PropId, value: f64) -> DcamResult<f64> {
        let mut value = value;
        DcamErr::check(unsafe {
            sys::dcamprop_setgetvalue(hdcam(dev), prop.0 as _, &mut value, 0)
        } as i32)?;
        Ok(value)
    }

    fn prop_query(
        &self,
        dev: DeviceHandle,
        prop: PropId,
        value: f64,
        option: QueryOption,
    ) -> DcamResult<f64> {
        let mut value = value;
        DcamErr::check(unsafe {
            sys::dcamprop_queryvalue(hdcam(dev), prop.0 as _, &mut value, option.as_raw() as _)
        } as i32)?;
        Ok(value)
    }

    fn prop_attr(&self, dev: DeviceHandle, prop: PropId) -> DcamResult<PropAttr> {
        let mut attr = param!(sys::DCAMPROP_ATTR, cbSize);
        attr.iProp = prop.0 as _;
        DcamErr::check(unsafe { sys::dcamprop_getattr(hdcam(dev), &mut attr) } as i32)?;
        Ok(PropAttr {
            prop,
            attribute: attr.attribute as u32,
            attribute2: attr.attribute2 as u32,
            unit: attr.iUnit as u32,
            min: attr.valuemin,
            max: attr.valuemax,
            step: attr.valuestep,
            default: attr.valuedefault,
        })
    }

    fn prop_next_id(
        &self,
        dev: DeviceHandle,
        prop: PropId,
        option: EnumOption,
    ) -> DcamResult<Option<PropId>> {
        let mut id = prop.0 as i32;
        let raw = unsafe { sys::dcamprop_getnextid(hdcam(dev), &mut id, option.as_raw() as _) }
            as i32;
        match DcamErr::check(raw) {
            Ok(()) if id != 0 => Ok(Some(PropId(id as u32))),
            Ok(()) => Ok(None),
            // The driver signals the end of the list this way.
            Err(DcamErr::NO_PROPERTY) => Ok(None),
            Err(code) => Err(code),
        }
    }

    fn prop_name(&self, dev: DeviceHandle, prop: PropId) -> DcamResult<String> {
        let mut text = [0 as c_char; TEXT_BYTES + 1];
        DcamErr::check(unsafe {
            sys::dcamprop_getname(
                hdcam(dev),
                prop.0 as _,
                text.as_mut_ptr(),
                TEXT_BYTES as _,
            )
        } as i32)?;
        Ok(text_from(&text))
    }

    fn prop_value_text(&self, dev: DeviceHandle, prop: PropId, value: f64) -> DcamResult<String> {
        let mut text = [0 as c_char; TEXT_BYTES + 1];
        let mut param = param!(sys::DCAMPROP_VALUETEXT, cbSize);
        param.iProp = prop.0 as _;
        param.value = value;
        param.text = text.as_mut_ptr();
        param.textbytes = TEXT_BYTES as _;
        DcamErr::check(unsafe { sys::dcamprop_getvaluetext(hdcam(dev), &mut param) } as i32)?;
        Ok(text_from(&text))
    }

    fn buf_attach(&self, dev: DeviceHandle, slots: &[SlotPtr], _slot_bytes: usize) -> DcamResult<()> {
        let mut pointers: Vec<*mut c_void> = slots.iter().map(|s| s.0.cast()).collect();
        let mut attach = param!(sys::DCAMBUF_ATTACH, size);
        attach.iKind = ATTACH_KIND_FRAME as _;
        attach.buffer = pointers.as_mut_ptr();
        attach.buffercount = pointers.len() as _;
        // The driver copies the pointer table; `pointers` may drop afterwards.
        DcamErr::check(unsafe { sys::dcambuf_attach(hdcam(dev), &attach) } as i32)
    }

    fn buf_release(&self, dev: DeviceHandle) -> DcamResult<()> {
        DcamErr::check(unsafe { sys::dcambuf_release(hdcam(dev), ATTACH_KIND_FRAME as _) } as i32)
    }

    fn cap_start(&self, dev: DeviceHandle) -> DcamResult<()> {
        DcamErr::check(unsafe { sys::dcamcap_start(hdcam(dev), START_SEQUENCE as _) } as i32)
    }

    fn cap_stop(&self, dev: DeviceHandle) -> DcamResult<()> {
        DcamErr::check(unsafe { sys::dcamcap_stop(hdcam(dev)) } as i32)
    }

    fn cap_transfer_info(&self, dev: DeviceHandle) -> DcamResult<TransferInfo> {
        let mut info = param!(sys::DCAMCAP_TRANSFERINFO, size);
        info.iKind = TRANSFER_KIND_FRAME as _;
        DcamErr::check(unsafe { sys::dcamcap_transferinfo(hdcam(dev), &mut info) } as i32)?;
        Ok(TransferInfo {
            newest_frame_index: info.nNewestFrameIndex as i32,
            frame_count: info.nFrameCount as i32,
        })
    }
}
