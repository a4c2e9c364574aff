//! Non-GC chunk allocator over one pre-allocated sample buffer
//!
//! The allocator carves two kinds of regions out of a single fixed buffer:
//! recyclable "managed" chunks served from size-class bins and a frontier of
//! raw capacity, and permanent "fixed" chunks carved backward from the tail.
//! There is no per-call heap allocation and no unbounded pause: allocation
//! and release are O(1)/O(bins); the only O(chunks) operation is an explicit
//! defragmentation pass, run when fragmentation actually blocks a request.
//!
//! Regions come back as [`AudioData`] handles. Cloning a handle retains the
//! region; dropping the last clone queues the chunk for release, and the
//! next allocator call folds it back onto its bin (fixed chunks are never
//! reclaimed). Storage is therefore never reused while any holder might
//! still read it. Handle drops happen on the mixing tick, so the drop path
//! never takes the state lock - a defragmentation pass in progress must not
//! stall the tick.

mod chunk;
mod storage;

pub(crate) use chunk::{ChunkId, ChunkNode, NIL};
pub use storage::SharedBuffer;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::AllocatorConfig;
use crate::data::AudioData;
use crate::error::{AllocError, AllocResult};

use chunk::{Bins, ChunkArena};

/// Snapshot of allocator occupancy for capacity planning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocStats {
    /// Total size of the shared buffer, in samples
    pub total: usize,
    /// Largest single region a managed allocation could currently get
    pub largest_free: usize,
    /// Raw (never-carved) capacity between the frontier and the fixed floor
    pub unfragmented: usize,
    /// Samples consumed by fixed (permanent) allocations
    pub fixed: usize,
    /// Number of free chunks sitting in bins
    pub free_chunks: usize,
    /// Defragmentation passes run so far
    pub defrag_passes: usize,
}

/// Ownership marker shared by every clone of an [`AudioData`] handle.
///
/// Dropping the last clone queues the managed chunk for release - exactly
/// once, strictly at refcount zero. Fixed regions are permanent and their
/// drop is a no-op.
pub(crate) struct Region {
    alloc: Arc<DataAllocator>,
    chunk: ChunkId,
    fixed: bool,
}

impl Drop for Region {
    fn drop(&mut self) {
        if !self.fixed {
            self.alloc.defer_release(self.chunk);
        }
    }
}

struct AllocState {
    arena: ChunkArena,
    bins: Bins,
    /// Head/tail of the managed list, ascending offsets, tiling [0, frontier)
    first: ChunkId,
    last: ChunkId,
    /// Offset of the first unclaimed raw sample ("unallocated cursor")
    frontier: usize,
    /// Managed space ends here; fixed chunks occupy [fixed_floor, total)
    fixed_floor: usize,
    /// Fixed chunks, linked tail-first; never unlinked
    fixed_head: ChunkId,
    defrag_passes: usize,
}

/// The allocator. Shared (`Arc`) between the loading context and the handle
/// drops; internal state sits behind one mutex whose critical sections are
/// O(1)/O(bins) except for the explicit defragmentation pass.
pub struct DataAllocator {
    storage: Arc<SharedBuffer>,
    state: Mutex<AllocState>,
    /// Chunks queued by handle drops, drained by the next state-lock holder.
    /// Its critical sections are O(pending), so a drop on the tick thread
    /// never waits behind a defragmentation pass.
    pending: Mutex<Vec<ChunkId>>,
    config: AllocatorConfig,
}

impl DataAllocator {
    /// Create the allocator and its shared buffer. The buffer is the single
    /// allocation of the engine's sample path.
    pub fn new(config: AllocatorConfig) -> Arc<Self> {
        let total = config.total_samples;
        log::info!(
            "data allocator: {} samples ({} bins x {} wide)",
            total,
            config.bin_count,
            config.bin_width
        );
        Arc::new(Self {
            storage: Arc::new(SharedBuffer::new(total)),
            state: Mutex::new(AllocState {
                arena: ChunkArena::with_capacity(64),
                bins: Bins::new(config.bin_width, config.bin_count),
                first: NIL,
                last: NIL,
                frontier: 0,
                fixed_floor: total,
                fixed_head: NIL,
                defrag_passes: 0,
            }),
            pending: Mutex::new(Vec::with_capacity(128)),
            config,
        })
    }

    /// The shared sample buffer backing every region
    pub fn storage(&self) -> &Arc<SharedBuffer> {
        &self.storage
    }

    /// Allocator configuration
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Allocate a managed region of exactly `size` usable samples.
    ///
    /// Order of attempts: the request's own bin, the frontier, a larger bin
    /// (splitting off the remainder), then one defragmentation pass and a
    /// single retry. Failure is explicit - never a silent empty handle.
    pub fn allocate(self: &Arc<Self>, size: usize) -> AllocResult<AudioData> {
        if size == 0 {
            return Err(AllocError::ZeroLength);
        }
        let mut st = self.lock_state();
        let chunk = match st.acquire(size) {
            Some(c) => c,
            None => {
                st.defragment();
                match st.acquire(size) {
                    Some(c) => c,
                    None => {
                        let largest_free = st.largest_free();
                        log::warn!(
                            "allocation of {} samples failed after defragmentation \
                             (largest free: {})",
                            size,
                            largest_free
                        );
                        return Err(AllocError::Exhausted {
                            requested: size,
                            largest_free,
                        });
                    }
                }
            }
        };
        let offset = st.arena.get(chunk).offset;
        drop(st);
        Ok(self.make_data(chunk, offset, size, false))
    }

    /// Allocate a permanent region carved backward from the buffer's tail.
    /// Fixed regions are never reclaimed; the label shows up in logs and
    /// capacity errors.
    pub fn allocate_fixed(self: &Arc<Self>, size: usize, label: &str) -> AllocResult<AudioData> {
        if size == 0 {
            return Err(AllocError::ZeroLength);
        }
        let mut st = self.lock_state();
        let available = st.fixed_floor - st.frontier;
        if size > available {
            return Err(AllocError::FixedExhausted {
                requested: size,
                available,
                label: label.to_string(),
            });
        }
        st.fixed_floor -= size;
        let offset = st.fixed_floor;
        let fixed_head = st.fixed_head;
        let chunk = st.arena.insert(ChunkNode {
            offset,
            max_size: size,
            allocated_size: size,
            next: fixed_head,
        });
        st.fixed_head = chunk;
        drop(st);
        log::debug!("fixed allocation \"{}\": {} samples at {}", label, size, offset);
        Ok(self.make_data(chunk, offset, size, true))
    }

    /// Run a defragmentation pass explicitly. Callers planning bulk
    /// allocations can use this together with [`DataAllocator::stats`].
    pub fn defragment(&self) {
        self.lock_state().defragment();
    }

    /// Largest single managed region currently obtainable
    pub fn largest_free(&self) -> usize {
        self.lock_state().largest_free()
    }

    /// Raw capacity that has never been carved into chunks
    pub fn unfragmented_size(&self) -> usize {
        let st = self.lock_state();
        st.fixed_floor - st.frontier
    }

    /// Samples consumed by fixed allocations
    pub fn fixed_size(&self) -> usize {
        self.config.total_samples - self.lock_state().fixed_floor
    }

    /// Estimate how many regions of `size` could be handed out right now
    /// without defragmentation
    pub fn available_chunks(&self, size: usize) -> usize {
        if size == 0 {
            return 0;
        }
        let st = self.lock_state();
        let binned = st
            .bins
            .iter()
            .filter(|&id| st.arena.get(id).max_size >= size)
            .count();
        let raw = (st.fixed_floor - st.frontier) / st.bins.padded_size(size).max(1);
        binned + raw
    }

    /// Occupancy snapshot
    pub fn stats(&self) -> AllocStats {
        let st = self.lock_state();
        AllocStats {
            total: self.config.total_samples,
            largest_free: st.largest_free(),
            unfragmented: st.fixed_floor - st.frontier,
            fixed: self.config.total_samples - st.fixed_floor,
            free_chunks: st.bins.free_count(),
            defrag_passes: st.defrag_passes,
        }
    }

    fn make_data(
        self: &Arc<Self>,
        chunk: ChunkId,
        offset: usize,
        len: usize,
        fixed: bool,
    ) -> AudioData {
        AudioData::from_region(
            Arc::clone(&self.storage),
            Arc::new(Region {
                alloc: Arc::clone(self),
                chunk,
                fixed,
            }),
            offset,
            len,
        )
    }

    /// Queue a managed chunk for release without touching the state lock.
    /// Called from `Region::drop`, possibly on the mixing tick.
    pub(crate) fn defer_release(&self, chunk: ChunkId) {
        self.lock_pending().push(chunk);
    }

    /// Lock the allocator state and fold in any releases queued since the
    /// last holder. Lock order is state, then pending; `defer_release` takes
    /// only pending.
    fn lock_state(&self) -> MutexGuard<'_, AllocState> {
        // A poisoned lock only means another thread panicked mid-section;
        // the chunk graph is still structurally valid for teardown paths.
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut pending = self.lock_pending();
        for chunk in pending.drain(..) {
            st.release(chunk);
        }
        drop(pending);
        st
    }

    fn lock_pending(&self) -> MutexGuard<'_, Vec<ChunkId>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AllocState {
    /// Return a managed chunk to its nominal bin. O(1), no coalescing - that
    /// is deferred to the next defragmentation pass.
    fn release(&mut self, chunk: ChunkId) {
        let node = self.arena.get_mut(chunk);
        debug_assert!(node.allocated_size > 0, "double release of chunk {chunk}");
        node.allocated_size = 0;
        let max_size = node.max_size;
        self.bins.push(chunk, max_size);
    }

    /// One allocation attempt: own bin, frontier, then split a larger bin.
    fn acquire(&mut self, size: usize) -> Option<ChunkId> {
        self.reuse_binned(size)
            .or_else(|| self.carve_frontier(size))
            .or_else(|| self.split_larger(size))
    }

    fn reuse_binned(&mut self, size: usize) -> Option<ChunkId> {
        let arena = &self.arena;
        let id = self
            .bins
            .pop_fit(size, |id| arena.get(id).max_size >= size)?;
        self.arena.get_mut(id).allocated_size = size;
        Some(id)
    }

    fn carve_frontier(&mut self, size: usize) -> Option<ChunkId> {
        let raw = self.fixed_floor - self.frontier;
        let padded = self.bins.padded_size(size);
        // Pad the capacity to the bin width when the frontier can afford it,
        // so a later release lands the chunk in its nominal bin.
        let capacity = if raw >= padded {
            padded
        } else if raw >= size {
            raw
        } else {
            return None;
        };
        let offset = self.frontier;
        let id = self.arena.insert(ChunkNode {
            offset,
            max_size: capacity,
            allocated_size: size,
            next: NIL,
        });
        if self.last == NIL {
            self.first = id;
        } else {
            self.arena.get_mut(self.last).next = id;
        }
        self.last = id;
        self.frontier += capacity;
        Some(id)
    }

    fn split_larger(&mut self, size: usize) -> Option<ChunkId> {
        let id = self.bins.pop_larger(size)?;
        let capacity = self.arena.get(id).max_size;
        let keep = self.bins.padded_size(size).min(capacity);
        let remainder = capacity - keep;
        let (offset, old_next) = {
            let node = self.arena.get_mut(id);
            node.max_size = keep;
            node.allocated_size = size;
            (node.offset, node.next)
        };
        if remainder > 0 {
            let rest = self.arena.insert(ChunkNode {
                offset: offset + keep,
                max_size: remainder,
                allocated_size: 0,
                next: old_next,
            });
            self.arena.get_mut(id).next = rest;
            if self.last == id {
                self.last = rest;
            }
            self.bins.push(rest, remainder);
        }
        Some(id)
    }

    /// One linear pass over the managed list: merge adjacent free runs,
    /// re-split runs larger than the top bin size into top-bin-sized chunks,
    /// and fold a trailing free run back into the frontier.
    fn defragment(&mut self) {
        self.defrag_passes += 1;
        let mut prev = NIL;
        let mut cur = self.first;
        while cur != NIL {
            if !self.arena.get(cur).is_free() {
                prev = cur;
                cur = self.arena.get(cur).next;
                continue;
            }

            // Collect the free run starting at `cur`; chunks tile the
            // managed space, so consecutive list nodes are offset-adjacent.
            let run_offset = self.arena.get(cur).offset;
            let mut run_size = 0;
            let mut next = cur;
            while next != NIL && self.arena.get(next).is_free() {
                let max_size = self.arena.get(next).max_size;
                self.bins.unlink(next, max_size);
                run_size += max_size;
                let after = self.arena.get(next).next;
                self.arena.remove(next);
                next = after;
            }

            if next == NIL {
                // Trailing run: fold back into the frontier
                self.frontier = run_offset;
                if prev == NIL {
                    self.first = NIL;
                } else {
                    self.arena.get_mut(prev).next = NIL;
                }
                self.last = prev;
                return;
            }

            // Re-split the merged run into bin-sized free chunks
            let top = self.bins.top_size();
            let mut offset = run_offset;
            let mut remaining = run_size;
            let mut link_prev = prev;
            while remaining > 0 {
                let piece = remaining.min(top);
                let id = self.arena.insert(ChunkNode {
                    offset,
                    max_size: piece,
                    allocated_size: 0,
                    next,
                });
                self.bins.push(id, piece);
                if link_prev == NIL {
                    self.first = id;
                } else {
                    self.arena.get_mut(link_prev).next = id;
                }
                link_prev = id;
                offset += piece;
                remaining -= piece;
            }
            prev = link_prev;
            cur = next;
        }
    }

    fn largest_free(&self) -> usize {
        let raw = self.fixed_floor - self.frontier;
        self.bins
            .iter()
            .map(|id| self.arena.get(id).max_size)
            .fold(raw, usize::max)
    }
}
