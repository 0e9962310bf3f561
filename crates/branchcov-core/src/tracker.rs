use std::ops::Range;

/// Index into a unit's counter array
pub type TrackerId = usize;

/// Hands out contiguous tracker ranges for one compilation unit
#[derive(Debug, Default, Clone)]
pub struct TrackerAllocator {
    count: usize,
}

impl TrackerAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `n` trackers, returning `[start, start + n)`
    pub fn allocate(&mut self, n: usize) -> Range<TrackerId> {
        let start = self.count;
        self.count += n;
        start..self.count
    }

    pub fn allocate_one(&mut self) -> TrackerId {
        self.allocate(1).start
    }

    /// Total number of trackers handed out so far
    pub fn count(&self) -> usize {
        self.count
    }
}

/// Read access to post-execution tracker hits
pub trait HitSource {
    fn hits(&self, tracker: TrackerId) -> u64;
}

impl HitSource for [u64] {
    fn hits(&self, tracker: TrackerId) -> u64 {
        debug_assert!(tracker < self.len(), "tracker {tracker} out of range");
        self.get(tracker).copied().unwrap_or(0)
    }
}

impl HitSource for Vec<u64> {
    fn hits(&self, tracker: TrackerId) -> u64 {
        self.as_slice().hits(tracker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocations_are_contiguous_and_disjoint() {
        let mut allocator = TrackerAllocator::new();
        assert_eq!(allocator.allocate(2), 0..2);
        assert_eq!(allocator.allocate_one(), 2);
        assert_eq!(allocator.allocate(0), 3..3);
        assert_eq!(allocator.allocate(3), 3..6);
        assert_eq!(allocator.count(), 6);
    }
}
