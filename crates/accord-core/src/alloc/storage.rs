//! Shared sample storage: one fixed buffer, allocated once, never resized
//!
//! The whole engine mixes out of a single contiguous `f32` array. The
//! allocator carves disjoint regions out of it and hands them to exactly one
//! owner at a time; the storage itself only provides raw views.
//!
//! ## Safety model
//!
//! `SharedBuffer` uses interior mutability so that several `AudioData`
//! handles (over *disjoint* regions) can read and write concurrently from
//! different threads without a lock on the sample data. Soundness rests on
//! the allocator's chunk-exclusivity invariant:
//!
//! - a region is only reachable through the `AudioData` that owns it,
//! - the allocator never hands out overlapping regions,
//! - a released region is never touched again until re-allocated, and the
//!   release itself happens only after the owner's reference count hits zero.
//!
//! The buffer is stored as a slice of `UnsafeCell<Sample>` and views are
//! assembled from raw pointers over only the requested range, so a live view
//! never claims exclusivity over any sample outside it. A transient whole-
//! buffer `&mut` here would invalidate every concurrently held view under
//! the aliasing model, overlap or not.
//!
//! All `unsafe` related to sample storage lives in this file.

use std::cell::UnsafeCell;
use std::slice;

use crate::types::Sample;

/// One fixed-size contiguous sample array; lifetime = allocator lifetime.
pub struct SharedBuffer {
    samples: Box<[UnsafeCell<Sample>]>,
}

// `UnsafeCell` forfeits `Sync`; disjoint-region exclusivity (see module
// docs) makes cross-thread access sound, and the allocator is the only
// component that creates views.
unsafe impl Sync for SharedBuffer {}

impl SharedBuffer {
    /// Allocate the buffer, zero-filled. This is the only allocation the
    /// sample path ever performs.
    pub fn new(len: usize) -> Self {
        Self {
            samples: (0..len).map(|_| UnsafeCell::new(0.0)).collect(),
        }
    }

    /// Total size in samples
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the buffer has zero capacity
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Immutable view of `[offset, offset + len)`.
    ///
    /// # Safety
    /// The caller must own the region (hold the allocator chunk covering it)
    /// and must not hold a mutable view of any overlapping range.
    #[inline]
    pub(crate) unsafe fn slice(&self, offset: usize, len: usize) -> &[Sample] {
        debug_assert!(offset + len <= self.samples.len());
        let cells = &self.samples[offset..offset + len];
        slice::from_raw_parts(cells.as_ptr().cast::<Sample>(), len)
    }

    /// Mutable view of `[offset, offset + len)`.
    ///
    /// # Safety
    /// The caller must own the region and this must be the only live view of
    /// any part of it.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn slice_mut(&self, offset: usize, len: usize) -> &mut [Sample] {
        debug_assert!(offset + len <= self.samples.len());
        let cells = &self.samples[offset..offset + len];
        slice::from_raw_parts_mut(UnsafeCell::raw_get(cells.as_ptr()), len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disjoint_views_are_independent() {
        let buf = SharedBuffer::new(64);
        assert_eq!(buf.len(), 64);

        // Two disjoint regions, one written through each view
        unsafe {
            let a = buf.slice_mut(0, 32);
            a.fill(1.0);
            let b = buf.slice_mut(32, 32);
            b.fill(2.0);
        }
        unsafe {
            assert!(buf.slice(0, 32).iter().all(|&s| s == 1.0));
            assert!(buf.slice(32, 32).iter().all(|&s| s == 2.0));
        }
    }

    #[test]
    fn starts_zeroed() {
        let buf = SharedBuffer::new(16);
        unsafe {
            assert!(buf.slice(0, 16).iter().all(|&s| s == 0.0));
        }
    }

    #[test]
    fn concurrent_reader_and_writer_on_disjoint_regions() {
        let buf = SharedBuffer::new(256);
        unsafe { buf.slice_mut(0, 128) }.fill(0.25);

        // A reader holds its view across the writer's whole run; only the
        // written range may change.
        std::thread::scope(|s| {
            let reader = s.spawn(|| {
                let lo = unsafe { buf.slice(0, 128) };
                lo.iter().all(|&v| v == 0.25)
            });
            let writer = s.spawn(|| {
                unsafe { buf.slice_mut(128, 128) }.fill(0.5);
            });
            assert!(reader.join().unwrap());
            writer.join().unwrap();
        });
        unsafe {
            assert!(buf.slice(0, 128).iter().all(|&v| v == 0.25));
            assert!(buf.slice(128, 128).iter().all(|&v| v == 0.5));
        }
    }
}
