//! Chunk arena and size-class bins
//!
//! Chunks describe allocatable regions of the shared buffer. They are stored
//! in an index-based arena (a vector of nodes plus a free-index stack) and
//! linked by index, never by pointer, so list splicing stays O(1) without
//! aliasing hazards. Free chunks are kept in per-size-class bins: bin `i`
//! holds chunks whose capacity lies in `(i * width, (i + 1) * width]`.

/// Index of a chunk in the arena
pub(crate) type ChunkId = u32;

/// Sentinel for "no chunk"
pub(crate) const NIL: ChunkId = ChunkId::MAX;

/// One allocatable region of the shared buffer
///
/// Invariant: `allocated_size == 0` for free chunks;
/// `allocated_size <= max_size` for allocated chunks.
#[derive(Debug, Clone)]
pub(crate) struct ChunkNode {
    /// Start offset in the shared buffer
    pub offset: usize,
    /// Capacity of the region
    pub max_size: usize,
    /// Currently exposed length (0 = free)
    pub allocated_size: usize,
    /// Next chunk in ascending-offset order (managed list) or in the
    /// fixed tail list; NIL terminates
    pub next: ChunkId,
}

impl ChunkNode {
    #[inline]
    pub fn is_free(&self) -> bool {
        self.allocated_size == 0
    }
}

/// Index-based arena of chunk nodes with a free-index stack
#[derive(Debug, Default)]
pub(crate) struct ChunkArena {
    nodes: Vec<ChunkNode>,
    recycled: Vec<ChunkId>,
}

impl ChunkArena {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            recycled: Vec::with_capacity(capacity / 4),
        }
    }

    /// Insert a node, reusing a recycled slot when one exists
    pub fn insert(&mut self, node: ChunkNode) -> ChunkId {
        if let Some(id) = self.recycled.pop() {
            self.nodes[id as usize] = node;
            id
        } else {
            let id = self.nodes.len() as ChunkId;
            self.nodes.push(node);
            id
        }
    }

    /// Return a slot to the free-index stack. The node's contents become
    /// meaningless; callers must have unlinked it first.
    pub fn remove(&mut self, id: ChunkId) {
        debug_assert!((id as usize) < self.nodes.len());
        self.recycled.push(id);
    }

    #[inline]
    pub fn get(&self, id: ChunkId) -> &ChunkNode {
        &self.nodes[id as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, id: ChunkId) -> &mut ChunkNode {
        &mut self.nodes[id as usize]
    }
}

/// Per-size-class stacks of free chunks
///
/// Bin `i` holds chunks with `max_size` in `(i * width, (i + 1) * width]`,
/// so a chunk of exactly `(i + 1) * width` sits in bin `i` and the bin index
/// for a size `s` is `(s - 1) / width`, capped at the top bin.
#[derive(Debug)]
pub(crate) struct Bins {
    stacks: Vec<Vec<ChunkId>>,
    width: usize,
}

impl Bins {
    pub fn new(width: usize, count: usize) -> Self {
        assert!(width > 0 && count > 0, "bins need nonzero width and count");
        Self {
            stacks: (0..count).map(|_| Vec::new()).collect(),
            width,
        }
    }

    /// Largest capacity the bins can hold
    #[inline]
    pub fn top_size(&self) -> usize {
        self.width * self.stacks.len()
    }

    /// Bin index for a chunk/request of `size` samples. `size` must be > 0;
    /// oversize values are capped to the top bin (callers treat the top bin
    /// as "at least this big").
    #[inline]
    pub fn index_for(&self, size: usize) -> usize {
        debug_assert!(size > 0);
        ((size - 1) / self.width).min(self.stacks.len() - 1)
    }

    /// Capacity a chunk in the bin serving `size` is padded to
    #[inline]
    pub fn padded_size(&self, size: usize) -> usize {
        if size > self.top_size() {
            size
        } else {
            (self.index_for(size) + 1) * self.width
        }
    }

    /// Push a free chunk onto its nominal bin
    pub fn push(&mut self, id: ChunkId, max_size: usize) {
        let bin = self.index_for(max_size);
        self.stacks[bin].push(id);
    }

    /// Pop a chunk from the bin serving `size` for which `fits` holds.
    ///
    /// Split remainders can leave a bin holding chunks smaller than the bin's
    /// upper bound, so the caller passes a capacity check.
    pub fn pop_fit(&mut self, size: usize, fits: impl Fn(ChunkId) -> bool) -> Option<ChunkId> {
        let bin = self.index_for(size);
        let stack = &mut self.stacks[bin];
        let pos = stack.iter().position(|&id| fits(id))?;
        Some(stack.swap_remove(pos))
    }

    /// Pop a free chunk from any bin strictly above the one serving `size`
    pub fn pop_larger(&mut self, size: usize) -> Option<ChunkId> {
        let start = self.index_for(size) + 1;
        for stack in &mut self.stacks[start..] {
            if let Some(id) = stack.pop() {
                return Some(id);
            }
        }
        None
    }

    /// Remove a specific chunk from whatever bin holds it. Only the
    /// defragmentation pass needs this; it is O(bin occupancy).
    pub fn unlink(&mut self, id: ChunkId, max_size: usize) {
        let bin = self.index_for(max_size);
        if let Some(pos) = self.stacks[bin].iter().position(|&c| c == id) {
            self.stacks[bin].swap_remove(pos);
        }
    }

    /// Iterate all binned free chunks
    pub fn iter(&self) -> impl Iterator<Item = ChunkId> + '_ {
        self.stacks.iter().flat_map(|s| s.iter().copied())
    }

    /// Total number of binned free chunks
    pub fn free_count(&self) -> usize {
        self.stacks.iter().map(|s| s.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bin_index_boundaries() {
        let bins = Bins::new(512, 8);
        // (i*w, (i+1)*w] membership: exactly one bin width lands in bin 0
        assert_eq!(bins.index_for(1), 0);
        assert_eq!(bins.index_for(512), 0);
        assert_eq!(bins.index_for(513), 1);
        assert_eq!(bins.index_for(1024), 1);
        assert_eq!(bins.index_for(1025), 2);
        // Oversize caps at the top bin
        assert_eq!(bins.index_for(512 * 8), 7);
        assert_eq!(bins.index_for(512 * 8 + 1), 7);
    }

    #[test]
    fn padded_size_rounds_to_bin_upper_bound() {
        let bins = Bins::new(512, 8);
        assert_eq!(bins.padded_size(1), 512);
        assert_eq!(bins.padded_size(512), 512);
        assert_eq!(bins.padded_size(513), 1024);
        // Oversize requests are not padded
        assert_eq!(bins.padded_size(5000), 5000);
    }

    #[test]
    fn push_pop_respects_size_class() {
        let mut bins = Bins::new(100, 4);
        bins.push(7, 100); // bin 0
        bins.push(9, 250); // bin 2
        assert_eq!(bins.pop_fit(90, |_| true), Some(7));
        assert_eq!(bins.pop_fit(90, |_| true), None);
        // 250-capacity chunk serves requests in (200, 300]
        assert_eq!(bins.pop_fit(201, |_| true), Some(9));
    }

    #[test]
    fn pop_fit_skips_undersized_chunks() {
        let mut bins = Bins::new(100, 4);
        // Two chunks in bin 2: capacities 210 and 290
        bins.push(1, 210);
        bins.push(2, 290);
        let caps = [0usize, 210, 290];
        assert_eq!(bins.pop_fit(250, |id| caps[id as usize] >= 250), Some(2));
        assert_eq!(bins.pop_fit(250, |id| caps[id as usize] >= 250), None);
        assert_eq!(bins.pop_fit(205, |id| caps[id as usize] >= 205), Some(1));
    }

    #[test]
    fn pop_larger_skips_own_bin() {
        let mut bins = Bins::new(100, 4);
        bins.push(1, 100);
        bins.push(2, 400);
        assert_eq!(bins.pop_larger(50), Some(2));
        assert_eq!(bins.pop_larger(50), None);
        assert_eq!(bins.pop_fit(50, |_| true), Some(1));
    }

    #[test]
    fn arena_recycles_slots() {
        let mut arena = ChunkArena::with_capacity(4);
        let a = arena.insert(ChunkNode {
            offset: 0,
            max_size: 10,
            allocated_size: 0,
            next: NIL,
        });
        let b = arena.insert(ChunkNode {
            offset: 10,
            max_size: 10,
            allocated_size: 0,
            next: NIL,
        });
        assert_ne!(a, b);
        arena.remove(a);
        let c = arena.insert(ChunkNode {
            offset: 20,
            max_size: 5,
            allocated_size: 5,
            next: NIL,
        });
        assert_eq!(c, a);
        assert_eq!(arena.get(c).offset, 20);
    }
}
