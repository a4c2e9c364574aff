//! Index-based intrusive sample queues and the node pool
//!
//! Nodes live in one pre-allocated arena; queues are just head/tail indices
//! with `next` links threaded through the nodes, so prepend, append and
//! whole-queue concatenation are O(1) and trimming is a single
//! order-preserving pass. No queue operation allocates.

use super::sample::BufferedSample;

/// Index of a sample node in the pool
pub(crate) type SampleId = u32;

/// Sentinel for "no node"
pub(crate) const NIL_SAMPLE: SampleId = SampleId::MAX;

/// Fixed-capacity arena of sample nodes plus a free-index stack
pub(crate) struct SamplePool {
    nodes: Vec<BufferedSample>,
    free: Vec<SampleId>,
}

impl SamplePool {
    /// Pre-allocate `capacity` nodes; the pool never grows afterwards
    pub fn with_capacity(capacity: usize) -> Self {
        let nodes = (0..capacity).map(|_| BufferedSample::empty()).collect();
        let free = (0..capacity as SampleId).rev().collect();
        Self { nodes, free }
    }

    /// Take a pooled node, if any remain. The caller must `init` it.
    pub fn acquire(&mut self) -> Option<SampleId> {
        self.free.pop()
    }

    /// Clear a node (releasing its audio data reference) and return it to
    /// the free stack
    pub fn release(&mut self, id: SampleId) {
        self.nodes[id as usize].clear();
        debug_assert!(!self.free.contains(&id), "double release of sample {id}");
        self.free.push(id);
    }

    /// Nodes currently available
    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn get(&self, id: SampleId) -> &BufferedSample {
        &self.nodes[id as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, id: SampleId) -> &mut BufferedSample {
        &mut self.nodes[id as usize]
    }
}

/// An intrusive singly-linked queue of pooled samples
#[derive(Debug, Clone, Copy)]
pub(crate) struct SampleQueue {
    head: SampleId,
    tail: SampleId,
    len: usize,
}

impl SampleQueue {
    pub fn new() -> Self {
        Self {
            head: NIL_SAMPLE,
            tail: NIL_SAMPLE,
            len: 0,
        }
    }

    #[inline]
    pub fn head(&self) -> SampleId {
        self.head
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == NIL_SAMPLE
    }

    /// Append one node; O(1)
    pub fn push_back(&mut self, pool: &mut SamplePool, id: SampleId) {
        pool.get_mut(id).next = NIL_SAMPLE;
        if self.tail == NIL_SAMPLE {
            self.head = id;
        } else {
            pool.get_mut(self.tail).next = id;
        }
        self.tail = id;
        self.len += 1;
    }

    /// Prepend one node; O(1)
    pub fn push_front(&mut self, pool: &mut SamplePool, id: SampleId) {
        pool.get_mut(id).next = self.head;
        self.head = id;
        if self.tail == NIL_SAMPLE {
            self.tail = id;
        }
        self.len += 1;
    }

    /// Splice all of `other` onto the back of `self`, preserving order; O(1)
    pub fn concat(&mut self, pool: &mut SamplePool, other: &mut SampleQueue) {
        if other.is_empty() {
            return;
        }
        if self.tail == NIL_SAMPLE {
            self.head = other.head;
        } else {
            pool.get_mut(self.tail).next = other.head;
        }
        self.tail = other.tail;
        self.len += other.len;
        *other = SampleQueue::new();
    }

    /// Single-pass trim: unlink every node for which `should_remove` holds,
    /// releasing it to the pool, while preserving survivor order. Head
    /// removal is the special case - the queue head moves forward instead of
    /// relinking a predecessor. Returns the number of nodes removed.
    pub fn remove_flagged(&mut self, pool: &mut SamplePool) -> usize {
        let mut removed = 0;
        let mut prev = NIL_SAMPLE;
        let mut cur = self.head;
        while cur != NIL_SAMPLE {
            let next = pool.get(cur).next;
            if pool.get(cur).should_remove {
                if prev == NIL_SAMPLE {
                    self.head = next;
                } else {
                    pool.get_mut(prev).next = next;
                }
                if self.tail == cur {
                    self.tail = prev;
                }
                pool.release(cur);
                self.len -= 1;
                removed += 1;
            } else {
                prev = cur;
            }
            cur = next;
        }
        removed
    }

    /// Unlink every node, releasing all of them to the pool
    pub fn drain_all(&mut self, pool: &mut SamplePool) {
        let mut cur = self.head;
        while cur != NIL_SAMPLE {
            let next = pool.get(cur).next;
            pool.release(cur);
            cur = next;
        }
        *self = SampleQueue::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pooled(pool: &mut SamplePool) -> SampleId {
        pool.acquire().expect("pool exhausted in test")
    }

    fn collect(queue: &SampleQueue, pool: &SamplePool) -> Vec<SampleId> {
        let mut out = Vec::new();
        let mut cur = queue.head();
        while cur != NIL_SAMPLE {
            out.push(cur);
            cur = pool.get(cur).next;
        }
        out
    }

    #[test]
    fn push_and_concat_preserve_order() {
        let mut pool = SamplePool::with_capacity(8);
        let mut a = SampleQueue::new();
        let mut b = SampleQueue::new();

        let n0 = pooled(&mut pool);
        let n1 = pooled(&mut pool);
        let n2 = pooled(&mut pool);
        let n3 = pooled(&mut pool);
        a.push_back(&mut pool, n0);
        a.push_back(&mut pool, n1);
        b.push_back(&mut pool, n2);
        b.push_back(&mut pool, n3);

        a.concat(&mut pool, &mut b);
        assert!(b.is_empty());
        assert_eq!(a.len(), 4);
        assert_eq!(collect(&a, &pool), vec![n0, n1, n2, n3]);

        let front = pooled(&mut pool);
        a.push_front(&mut pool, front);
        assert_eq!(collect(&a, &pool), vec![front, n0, n1, n2, n3]);
    }

    #[test]
    fn concat_into_empty_queue_moves_everything() {
        let mut pool = SamplePool::with_capacity(4);
        let mut a = SampleQueue::new();
        let mut b = SampleQueue::new();
        let n0 = pooled(&mut pool);
        b.push_back(&mut pool, n0);
        a.concat(&mut pool, &mut b);
        assert_eq!(collect(&a, &pool), vec![n0]);
        assert!(b.is_empty());
    }

    #[test]
    fn remove_flagged_handles_head_middle_and_tail() {
        let mut pool = SamplePool::with_capacity(8);
        let mut queue = SampleQueue::new();
        let ids: Vec<SampleId> = (0..5).map(|_| pooled(&mut pool)).collect();
        for &id in &ids {
            queue.push_back(&mut pool, id);
        }

        // Flag the head, one middle node, and the tail
        pool.get_mut(ids[0]).should_remove = true;
        pool.get_mut(ids[2]).should_remove = true;
        pool.get_mut(ids[4]).should_remove = true;

        let removed = queue.remove_flagged(&mut pool);
        assert_eq!(removed, 3);
        assert_eq!(queue.len(), 2);
        assert_eq!(collect(&queue, &pool), vec![ids[1], ids[3]]);
        assert_eq!(pool.available(), 8 - 2);

        // Tail pointer stayed valid: appends still work
        let fresh = pooled(&mut pool);
        queue.push_back(&mut pool, fresh);
        assert_eq!(collect(&queue, &pool), vec![ids[1], ids[3], fresh]);
    }

    #[test]
    fn remove_flagged_can_empty_the_queue() {
        let mut pool = SamplePool::with_capacity(4);
        let mut queue = SampleQueue::new();
        for _ in 0..3 {
            let id = pooled(&mut pool);
            pool.get_mut(id).should_remove = true;
            queue.push_back(&mut pool, id);
        }
        assert_eq!(queue.remove_flagged(&mut pool), 3);
        assert!(queue.is_empty());
        assert_eq!(pool.available(), 4);

        // Still usable after being emptied
        let id = pooled(&mut pool);
        queue.push_back(&mut pool, id);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn pool_exhaustion_returns_none() {
        let mut pool = SamplePool::with_capacity(2);
        let a = pool.acquire();
        let b = pool.acquire();
        assert!(a.is_some() && b.is_some());
        assert!(pool.acquire().is_none());
        pool.release(a.unwrap());
        assert!(pool.acquire().is_some());
        assert_eq!(pool.capacity(), 2);
    }
}
