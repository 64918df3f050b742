//! Raw bindgen output for the Hamamatsu DCAM-API (`dcamapi4.h`, `dcamprop.h`).
//!
//! Built only with the `dcam-sdk` feature; otherwise this crate is empty.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(dead_code)]
#![allow(missing_docs)]
#![allow(clippy::all)]

include!(concat!(env!("OUT_DIR"), "/bindings.rs"));
