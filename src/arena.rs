//! Frame-buffer arena registered with the driver for frame delivery.
//!
//! The arena is a single host allocation of `frame_bytes × frame_count`
//! bytes, sliced into fixed-size slots. The slot start addresses are handed
//! to the driver (`dcambuf_attach`), which then writes captured frames
//! directly into them.
//!
//! # Safety
//!
//! The driver holds raw pointers into the allocation while it is registered.
//! Three rules keep those pointers valid:
//!
//! - The arena is only replaced while the session is idle, and only after
//!   the driver accepted the release of the old registration. A failed
//!   release keeps the old arena installed.
//! - If the device cannot be closed while slots are still registered, the
//!   arena is leaked instead of freed.
//! - The acquisition worker holds its own `Arc<FrameArena>`, so the memory
//!   outlives every slot view the worker can create.
//! - The buffer is never resized in place; a geometry change builds a new
//!   arena.
//!
//! Slot views are plain `&[u8]`, but during a capture the driver may write
//! into a slot while a view of it is alive (the camera DMAs into the ring
//! regardless of the reader). This is the usual hazard of a DMA ring and is
//! accepted: the bytes are plain integers, so a view can only observe a
//! torn frame, never an invalid value. Views handed to callbacks are of the
//! newest slot, which the driver does not revisit until the ring wraps.

use crate::driver::{DeviceHandle, PropId, SlotPtr};
use crate::error::{OrcaError, Result};
use crate::session::Session;
use std::sync::Arc;
use tracing::debug;

/// Slot count used when zero frames are requested.
pub const DEFAULT_FRAME_COUNT: usize = 10;

/// Upper bound on the slot count.
pub const MAX_FRAME_COUNT: usize = 1000;

/// Map a requested slot count onto `[1, MAX_FRAME_COUNT]`.
pub fn normalize_frame_count(requested: usize) -> usize {
    match requested {
        0 => DEFAULT_FRAME_COUNT,
        n => n.min(MAX_FRAME_COUNT),
    }
}

/// Host memory sliced into frame slots.
pub struct FrameArena {
    // Owns the allocation; only accessed through `base` after construction.
    _buffer: Vec<u8>,
    base: *mut u8,
    slots: Vec<SlotPtr>,
    frame_bytes: usize,
    frame_count: usize,
    generation: u64,
}

// SAFETY: `base` points into `_buffer`, which the arena owns and never
// reallocates. Shared access only produces `&[u8]` views; writes come from
// the driver into slots it currently owns.
#[allow(unsafe_code)]
unsafe impl Send for FrameArena {}
#[allow(unsafe_code)]
unsafe impl Sync for FrameArena {}

impl FrameArena {
    /// Allocate exactly `frame_bytes × frame_count` zeroed bytes.
    ///
    /// `frame_count` must already be normalized.
    pub(crate) fn allocate(frame_bytes: usize, frame_count: usize, generation: u64) -> Result<Self> {
        if frame_bytes == 0 || frame_count == 0 {
            return Err(OrcaError::Unsupported(format!(
                "frame buffer of {frame_count} slots × {frame_bytes} bytes"
            )));
        }
        let bytes = frame_bytes
            .checked_mul(frame_count)
            .ok_or(OrcaError::OutOfMemory { bytes: usize::MAX })?;

        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(bytes)
            .map_err(|_| OrcaError::OutOfMemory { bytes })?;
        buffer.resize(bytes, 0u8);

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(frame_count)
            .map_err(|_| OrcaError::OutOfMemory {
                bytes: frame_count * std::mem::size_of::<SlotPtr>(),
            })?;

        let base = buffer.as_mut_ptr();
        for i in 0..frame_count {
            // SAFETY: i * frame_bytes < bytes, so the offset stays inside the allocation.
            #[allow(unsafe_code)]
            let ptr = unsafe { base.add(i * frame_bytes) };
            slots.push(SlotPtr(ptr));
        }

        Ok(Self {
            _buffer: buffer,
            base,
            slots,
            frame_bytes,
            frame_count,
            generation,
        })
    }

    /// Bytes of slot `index`, or `None` when out of range.
    pub fn slot(&self, index: usize) -> Option<&[u8]> {
        if index >= self.frame_count {
            return None;
        }
        // SAFETY: index < frame_count, so the range lies inside the allocation.
        #[allow(unsafe_code)]
        let slot = unsafe {
            std::slice::from_raw_parts(self.base.add(index * self.frame_bytes), self.frame_bytes)
        };
        Some(slot)
    }

    /// Slot start addresses in index order.
    pub(crate) fn slot_ptrs(&self) -> &[SlotPtr] {
        &self.slots
    }

    /// Start address of slot `index`.
    pub fn slot_addr(&self, index: usize) -> Option<*const u8> {
        self.slots.get(index).map(|p| p.0 as *const u8)
    }

    /// Per-slot size in bytes.
    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    /// Number of slots.
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Total size of the allocation in bytes.
    pub fn len(&self) -> usize {
        self.frame_bytes * self.frame_count
    }

    /// Always false; an arena has at least one non-empty slot.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Increases by one on every reallocation within a session.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn matches(&self, frame_bytes: usize, frame_count: usize) -> bool {
        self.frame_bytes == frame_bytes && self.frame_count == frame_count
    }
}

impl std::fmt::Debug for FrameArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameArena")
            .field("frame_bytes", &self.frame_bytes)
            .field("frame_count", &self.frame_count)
            .field("generation", &self.generation)
            .finish()
    }
}

impl Session {
    /// Make sure the arena matches the driver's current frame size and holds
    /// `requested_frames` slots, then register it with the driver.
    ///
    /// `0` selects [`DEFAULT_FRAME_COUNT`]; larger requests are clamped to
    /// [`MAX_FRAME_COUNT`]. Calling this again with the same count and no
    /// geometry change keeps the existing allocation and slot addresses.
    ///
    /// # Errors
    ///
    /// - `Busy` while capturing.
    /// - `OutOfMemory` if the new buffer cannot be allocated; the previous
    ///   arena stays in place.
    /// - The driver's error if the previous slots cannot be released. The
    ///   previous arena stays installed and registered.
    /// - Driver errors from reading the frame size or attaching the buffers.
    pub fn ensure_capacity(&mut self, requested_frames: usize) -> Result<()> {
        let dev = self.device()?;
        if self.is_capturing() {
            return Err(OrcaError::Busy);
        }

        let frame_count = normalize_frame_count(requested_frames);
        let frame_bytes = self.driver.prop_get(dev, PropId::BUFFER_FRAME_BYTES)? as usize;

        let reusable = self
            .arena
            .as_ref()
            .filter(|a| a.matches(frame_bytes, frame_count))
            .map(Arc::clone);

        let arena = match reusable {
            Some(current) => current,
            None => {
                let generation = self.arena.as_ref().map_or(0, |a| a.generation() + 1);
                let arena = Arc::new(FrameArena::allocate(frame_bytes, frame_count, generation)?);
                // The driver may still write into registered slots, so the old
                // arena is only dropped once its registration is gone.
                self.release_buffers(dev)?;
                debug!(
                    frame_bytes,
                    frame_count,
                    generation,
                    "allocated frame arena ({} bytes)",
                    arena.len()
                );
                self.arena = Some(Arc::clone(&arena));
                arena
            }
        };

        self.driver
            .buf_attach(dev, arena.slot_ptrs(), arena.frame_bytes())?;
        self.buffers_attached = true;
        Ok(())
    }

    /// Drop the driver's registration of the current slots, if any.
    pub(crate) fn release_buffers(&mut self, dev: DeviceHandle) -> Result<()> {
        if self.buffers_attached {
            self.driver.buf_release(dev)?;
            self.buffers_attached = false;
        }
        Ok(())
    }

    /// The current arena, if one has been allocated.
    pub fn arena(&self) -> Option<&FrameArena> {
        self.arena.as_deref()
    }

    /// Number of slots in the current arena.
    pub fn frame_count(&self) -> usize {
        self.arena.as_ref().map_or(0, |a| a.frame_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_clamps_and_defaults() {
        assert_eq!(normalize_frame_count(0), DEFAULT_FRAME_COUNT);
        assert_eq!(normalize_frame_count(1), 1);
        assert_eq!(normalize_frame_count(1000), 1000);
        assert_eq!(normalize_frame_count(5000), MAX_FRAME_COUNT);
    }

    #[test]
    fn slots_are_contiguous_and_bounded() {
        let arena = FrameArena::allocate(64, 4, 0).unwrap();
        assert_eq!(arena.len(), 256);
        let base = arena.slot_addr(0).unwrap() as usize;
        for i in 0..4 {
            assert_eq!(arena.slot_addr(i).unwrap() as usize, base + i * 64);
            assert_eq!(arena.slot(i).unwrap().len(), 64);
        }
        assert!(arena.slot(4).is_none());
        assert!(arena.slot_addr(4).is_none());
    }

    #[test]
    fn new_arena_is_zeroed() {
        let arena = FrameArena::allocate(16, 2, 0).unwrap();
        assert!(arena.slot(1).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn oversized_request_is_out_of_memory() {
        let half = (isize::MAX as usize) / 2 + 1;
        let err = FrameArena::allocate(half, 2, 0).unwrap_err();
        assert!(matches!(err, OrcaError::OutOfMemory { .. }));

        let err = FrameArena::allocate(usize::MAX, 2, 0).unwrap_err();
        assert!(matches!(err, OrcaError::OutOfMemory { bytes } if bytes == usize::MAX));
    }

    #[test]
    fn zero_frame_size_is_rejected() {
        assert!(FrameArena::allocate(0, 10, 0).is_err());
    }
}
