//! Identifier allocation for buses, buffers and nodes.
//!
//! `BlockAllocator` hands out contiguous integer ranges from a bounded address
//! space, first-fit by address so low addresses are preferentially reused and
//! identical call sequences yield identical ids. `NodeIdAllocator` hands out
//! node ids the way scsynth clients expect: a wrapping counter for temporary
//! nodes plus a small reusable space for permanent ones.

use std::collections::BTreeSet;
use std::fmt;

/// Why an allocation request could not be satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    /// No single free interval is large enough. Retryable: freeing ranges may
    /// make the request satisfiable later.
    Exhausted { size: i32 },
    /// A fixed-position request overlaps an occupied or out-of-bounds range.
    Conflict { start: i32, size: i32 },
}

impl fmt::Display for AllocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationError::Exhausted { size } => {
                write!(f, "no free range of {} ids available", size)
            }
            AllocationError::Conflict { start, size } => {
                write!(f, "range [{}, {}) is not free", start, start + size)
            }
        }
    }
}

impl std::error::Error for AllocationError {}

/// A bounded first-fit range allocator over `[heap_minimum, heap_maximum)`.
///
/// The free set is a sorted list of disjoint half-open intervals, kept
/// maximally coalesced: freeing merges with adjacent free intervals on both
/// sides, so fragmentation only ever reflects live allocations.
#[derive(Debug, Clone)]
pub struct BlockAllocator {
    heap_minimum: i32,
    heap_maximum: i32,
    free: Vec<(i32, i32)>,
}

impl BlockAllocator {
    pub fn new(heap_minimum: i32, heap_maximum: i32) -> Self {
        assert!(
            heap_minimum < heap_maximum,
            "empty heap [{}, {})",
            heap_minimum,
            heap_maximum
        );
        Self {
            heap_minimum,
            heap_maximum,
            free: vec![(heap_minimum, heap_maximum)],
        }
    }

    pub fn heap_minimum(&self) -> i32 {
        self.heap_minimum
    }

    pub fn heap_maximum(&self) -> i32 {
        self.heap_maximum
    }

    /// Total number of currently free ids.
    pub fn free_space(&self) -> i64 {
        self.free
            .iter()
            .map(|&(start, stop)| (stop - start) as i64)
            .sum()
    }

    /// Allocate `size` contiguous ids from the lowest-address free interval
    /// that fits, returning the new block's start.
    pub fn allocate(&mut self, size: i32) -> Result<i32, AllocationError> {
        assert!(size > 0, "block size must be positive, got {}", size);
        for index in 0..self.free.len() {
            let (start, stop) = self.free[index];
            if stop - start >= size {
                if stop - start == size {
                    self.free.remove(index);
                } else {
                    self.free[index].0 = start + size;
                }
                return Ok(start);
            }
        }
        Err(AllocationError::Exhausted { size })
    }

    /// Allocate exactly `[start, start + size)`. Succeeds only when the whole
    /// range is free; because free intervals are maximally coalesced, a fully
    /// free range always lies within a single interval.
    pub fn allocate_at(&mut self, start: i32, size: i32) -> Result<i32, AllocationError> {
        assert!(size > 0, "block size must be positive, got {}", size);
        let stop = start + size;
        if start < self.heap_minimum || stop > self.heap_maximum {
            return Err(AllocationError::Conflict { start, size });
        }
        let index = self.free.partition_point(|&(_, stop)| stop <= start);
        match self.free.get(index) {
            Some(&(free_start, free_stop)) if free_start <= start && stop <= free_stop => {
                self.free.remove(index);
                if stop < free_stop {
                    self.free.insert(index, (stop, free_stop));
                }
                if free_start < start {
                    self.free.insert(index, (free_start, start));
                }
                Ok(start)
            }
            _ => Err(AllocationError::Conflict { start, size }),
        }
    }

    /// Return `[start, start + size)` to the free set, coalescing with
    /// adjacent free intervals. Freeing ids that are already free is a caller
    /// contract violation: fatal in debug builds, warned and ignored in
    /// release builds so the invariants hold either way.
    pub fn free(&mut self, start: i32, size: i32) {
        assert!(size > 0, "block size must be positive, got {}", size);
        let stop = start + size;
        if start < self.heap_minimum || stop > self.heap_maximum {
            debug_assert!(
                false,
                "free of [{}, {}) outside heap [{}, {})",
                start, stop, self.heap_minimum, self.heap_maximum
            );
            log::warn!(
                target: "neume::allocator",
                "ignoring free of [{}, {}) outside heap [{}, {})",
                start, stop, self.heap_minimum, self.heap_maximum
            );
            return;
        }
        let index = self.free.partition_point(|&(_, free_stop)| free_stop <= start);
        if let Some(&(free_start, _)) = self.free.get(index) {
            if free_start < stop {
                debug_assert!(
                    false,
                    "double free: [{}, {}) overlaps free interval starting at {}",
                    start, stop, free_start
                );
                log::warn!(
                    target: "neume::allocator",
                    "ignoring double free of [{}, {})",
                    start, stop
                );
                return;
            }
        }
        let merge_left = index > 0 && self.free[index - 1].1 == start;
        let merge_right = self.free.get(index).is_some_and(|&(free_start, _)| free_start == stop);
        match (merge_left, merge_right) {
            (true, true) => {
                self.free[index - 1].1 = self.free[index].1;
                self.free.remove(index);
            }
            (true, false) => self.free[index - 1].1 = stop,
            (false, true) => self.free[index].0 = start,
            (false, false) => self.free.insert(index, (start, stop)),
        }
    }
}

/// Node ids above this wrap back to the initial temporary id.
const NODE_ID_CEILING: i32 = 0x03FF_FFFF;

/// Node id allocator: temporary ids count up from `initial_node_id` and wrap
/// at the 26-bit ceiling; permanent ids live in `1..initial_node_id` and
/// reuse the lowest freed id first. All ids carry the client id in the top
/// bits so multiple clients never collide on one engine.
#[derive(Debug)]
pub struct NodeIdAllocator {
    initial_node_id: i32,
    mask: i32,
    temp: i32,
    next_permanent_id: i32,
    freed_permanent_ids: BTreeSet<i32>,
}

impl NodeIdAllocator {
    pub fn new(client_id: i32, initial_node_id: i32) -> Self {
        assert!(
            (0..=31).contains(&client_id),
            "client id must be in 0..=31, got {}",
            client_id
        );
        Self {
            initial_node_id,
            mask: client_id << 26,
            temp: initial_node_id,
            next_permanent_id: 1,
            freed_permanent_ids: BTreeSet::new(),
        }
    }

    /// Allocate `count` consecutive temporary node ids, returning the first.
    pub fn allocate(&mut self, count: i32) -> i32 {
        let id = self.temp;
        let mut next = id + count;
        if next > NODE_ID_CEILING {
            next = (next % NODE_ID_CEILING) + self.initial_node_id;
        }
        self.temp = next;
        id | self.mask
    }

    /// Allocate a permanent node id, reusing the lowest freed one first.
    pub fn allocate_permanent(&mut self) -> i32 {
        let id = match self.freed_permanent_ids.iter().next().copied() {
            Some(id) => {
                self.freed_permanent_ids.remove(&id);
                id
            }
            None => {
                let id = self.next_permanent_id;
                self.next_permanent_id = (id + 1).min(self.initial_node_id - 1);
                id
            }
        };
        id | self.mask
    }

    /// Return a permanent node id for reuse. Temporary ids are ignored.
    pub fn free_permanent(&mut self, node_id: i32) {
        let id = node_id & NODE_ID_CEILING;
        if id < self.initial_node_id {
            self.freed_permanent_ids.insert(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every currently-allocated range, reconstructed from the free list, for
    /// the disjointness/conservation checks below.
    fn allocated_ranges(allocator: &BlockAllocator) -> Vec<(i32, i32)> {
        let mut ranges = Vec::new();
        let mut cursor = allocator.heap_minimum();
        for &(start, stop) in &allocator.free {
            if cursor < start {
                ranges.push((cursor, start));
            }
            cursor = stop;
        }
        if cursor < allocator.heap_maximum() {
            ranges.push((cursor, allocator.heap_maximum()));
        }
        ranges
    }

    fn assert_invariants(allocator: &BlockAllocator) {
        // Free intervals sorted, disjoint, non-adjacent (maximally coalesced),
        // and inside the heap.
        for window in allocator.free.windows(2) {
            assert!(window[0].1 < window[1].0, "free list not coalesced: {:?}", allocator.free);
        }
        for &(start, stop) in &allocator.free {
            assert!(start < stop);
            assert!(start >= allocator.heap_minimum());
            assert!(stop <= allocator.heap_maximum());
        }
        // Conservation: allocated + free == heap size.
        let allocated: i64 = allocated_ranges(allocator)
            .iter()
            .map(|&(start, stop)| (stop - start) as i64)
            .sum();
        let heap = (allocator.heap_maximum() - allocator.heap_minimum()) as i64;
        assert_eq!(allocated + allocator.free_space(), heap);
    }

    #[test]
    fn allocates_first_fit_from_the_bottom() {
        let mut allocator = BlockAllocator::new(0, 16);
        assert_eq!(allocator.allocate(4), Ok(0));
        assert_eq!(allocator.allocate(4), Ok(4));
        assert_eq!(allocator.allocate(4), Ok(8));
        assert_eq!(
            allocator.allocate(8),
            Err(AllocationError::Exhausted { size: 8 })
        );
        allocator.free(8, 4);
        assert_eq!(allocator.allocate(8), Ok(8));
        assert_invariants(&allocator);
    }

    #[test]
    fn lowest_address_is_preferentially_reused() {
        let mut allocator = BlockAllocator::new(0, 64);
        assert_eq!(allocator.allocate(8), Ok(0));
        assert_eq!(allocator.allocate(8), Ok(8));
        assert_eq!(allocator.allocate(8), Ok(16));
        allocator.free(0, 8);
        allocator.free(16, 8);
        // First-fit: the lower hole wins even though both fit.
        assert_eq!(allocator.allocate(4), Ok(0));
        assert_eq!(allocator.allocate(8), Ok(16));
        assert_invariants(&allocator);
    }

    #[test]
    fn exhaustion_despite_sufficient_total_space() {
        let mut allocator = BlockAllocator::new(0, 12);
        assert_eq!(allocator.allocate(4), Ok(0));
        assert_eq!(allocator.allocate(4), Ok(4));
        assert_eq!(allocator.allocate(4), Ok(8));
        allocator.free(0, 4);
        allocator.free(8, 4);
        // 8 ids free in total, but no single interval of 8.
        assert_eq!(
            allocator.allocate(8),
            Err(AllocationError::Exhausted { size: 8 })
        );
        assert_eq!(allocator.free_space(), 8);
        assert_invariants(&allocator);
    }

    #[test]
    fn freeing_coalesces_with_both_neighbours() {
        let mut allocator = BlockAllocator::new(0, 12);
        assert_eq!(allocator.allocate(4), Ok(0));
        assert_eq!(allocator.allocate(4), Ok(4));
        assert_eq!(allocator.allocate(4), Ok(8));
        allocator.free(0, 4);
        allocator.free(8, 4);
        assert_eq!(allocator.free.len(), 2);
        allocator.free(4, 4);
        // One fully merged interval, no residual fragmentation.
        assert_eq!(allocator.free, vec![(0, 12)]);
        assert_eq!(allocator.allocate(12), Ok(0));
        assert_invariants(&allocator);
    }

    #[test]
    fn allocate_at_requires_a_fully_free_range() {
        let mut allocator = BlockAllocator::new(0, 32);
        assert_eq!(allocator.allocate_at(8, 8), Ok(8));
        assert_eq!(
            allocator.allocate_at(12, 8),
            Err(AllocationError::Conflict { start: 12, size: 8 })
        );
        assert_eq!(
            allocator.allocate_at(0, 9),
            Err(AllocationError::Conflict { start: 0, size: 9 })
        );
        assert_eq!(allocator.allocate_at(0, 8), Ok(0));
        assert_eq!(allocator.allocate_at(16, 16), Ok(16));
        assert_eq!(allocator.free_space(), 0);
        assert_invariants(&allocator);
    }

    #[test]
    fn allocate_at_rejects_out_of_bounds_ranges() {
        let mut allocator = BlockAllocator::new(16, 32);
        assert_eq!(
            allocator.allocate_at(8, 4),
            Err(AllocationError::Conflict { start: 8, size: 4 })
        );
        assert_eq!(
            allocator.allocate_at(30, 4),
            Err(AllocationError::Conflict { start: 30, size: 4 })
        );
        assert_eq!(allocator.allocate_at(30, 2), Ok(30));
        assert_invariants(&allocator);
    }

    #[test]
    fn allocate_at_splits_an_interval_in_the_middle() {
        let mut allocator = BlockAllocator::new(0, 16);
        assert_eq!(allocator.allocate_at(6, 4), Ok(6));
        assert_eq!(allocator.free, vec![(0, 6), (10, 16)]);
        allocator.free(6, 4);
        assert_eq!(allocator.free, vec![(0, 16)]);
        assert_invariants(&allocator);
    }

    #[test]
    fn identical_call_sequences_are_deterministic() {
        let script = |allocator: &mut BlockAllocator| {
            let mut results = Vec::new();
            results.push(allocator.allocate(3));
            results.push(allocator.allocate(5));
            allocator.free(0, 3);
            results.push(allocator.allocate(2));
            results.push(allocator.allocate_at(20, 4));
            allocator.free(3, 5);
            results.push(allocator.allocate(6));
            results
        };
        let mut first = BlockAllocator::new(0, 32);
        let mut second = BlockAllocator::new(0, 32);
        assert_eq!(script(&mut first), script(&mut second));
        assert_invariants(&first);
    }

    #[test]
    fn allocated_ranges_stay_disjoint_over_a_mixed_sequence() {
        let mut allocator = BlockAllocator::new(0, 64);
        let a = allocator.allocate(10).unwrap();
        let b = allocator.allocate(6).unwrap();
        let c = allocator.allocate_at(32, 8).unwrap();
        allocator.free(a, 10);
        let d = allocator.allocate(4).unwrap();
        assert_invariants(&allocator);
        let ranges = allocated_ranges(&allocator);
        for (i, &(start, stop)) in ranges.iter().enumerate() {
            for &(other_start, other_stop) in &ranges[i + 1..] {
                assert!(stop <= other_start || other_stop <= start);
            }
        }
        assert!(ranges.contains(&(b, b + 6)));
        assert!(ranges.contains(&(c, c + 8)));
        assert!(d < b);
    }

    #[test]
    fn nonzero_heap_minimum_is_respected() {
        let mut allocator = BlockAllocator::new(100, 110);
        assert_eq!(allocator.allocate(10), Ok(100));
        assert_eq!(
            allocator.allocate(1),
            Err(AllocationError::Exhausted { size: 1 })
        );
        allocator.free(100, 10);
        assert_eq!(allocator.allocate(1), Ok(100));
        assert_invariants(&allocator);
    }

    #[test]
    fn node_ids_count_up_from_initial() {
        let mut allocator = NodeIdAllocator::new(0, 1000);
        assert_eq!(allocator.allocate(1), 1000);
        assert_eq!(allocator.allocate(1), 1001);
        assert_eq!(allocator.allocate(1), 1002);
        assert_eq!(allocator.allocate(3), 1003);
        assert_eq!(allocator.allocate(1), 1006);
    }

    #[test]
    fn permanent_ids_reuse_lowest_freed_first() {
        let mut allocator = NodeIdAllocator::new(0, 1000);
        assert_eq!(allocator.allocate_permanent(), 1);
        assert_eq!(allocator.allocate_permanent(), 2);
        assert_eq!(allocator.allocate_permanent(), 3);
        allocator.free_permanent(2);
        assert_eq!(allocator.allocate_permanent(), 2);
        assert_eq!(allocator.allocate_permanent(), 4);
    }

    #[test]
    fn client_id_is_masked_into_every_node_id() {
        let mut allocator = NodeIdAllocator::new(1, 1000);
        assert_eq!(allocator.allocate(1), 1000 | (1 << 26));
        assert_eq!(allocator.allocate_permanent(), 1 | (1 << 26));
        allocator.free_permanent(1 | (1 << 26));
        assert_eq!(allocator.allocate_permanent(), 1 | (1 << 26));
    }

    #[test]
    fn temporary_ids_wrap_at_the_ceiling() {
        let mut allocator = NodeIdAllocator::new(0, 1000);
        allocator.temp = NODE_ID_CEILING - 1;
        assert_eq!(allocator.allocate(4), NODE_ID_CEILING - 1);
        let next = allocator.allocate(1);
        assert!(next >= 1000);
        assert!(next <= NODE_ID_CEILING);
    }
}
