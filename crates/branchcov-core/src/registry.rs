//! Process-wide counter storage, keyed by unit id.
//!
//! Instrumented code increments `counters[unit][tracker]` directly; the
//! registry only hands out the arrays. Registration is a single map insert,
//! so distinct units can be executed from different threads.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, OnceLock,
    },
};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::tracker::TrackerId;

static NEXT_UNIT_ID: AtomicU64 = AtomicU64::new(1);
static GLOBAL_REGISTRY: OnceLock<Arc<CounterRegistry>> = OnceLock::new();

/// Unique, monotonic, process-scoped unit identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(pub u64);

impl UnitId {
    pub fn next() -> Self {
        Self(NEXT_UNIT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed-size array of hit counters for one unit
#[derive(Debug)]
pub struct CounterArray {
    counters: Vec<AtomicU64>,
}

impl CounterArray {
    pub fn new(len: usize) -> Self {
        Self {
            counters: (0..len).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    pub fn get(&self, tracker: TrackerId) -> Option<u64> {
        self.counters.get(tracker).map(|c| c.load(Ordering::Relaxed))
    }

    /// Add `delta` to a counter, returning the new value
    pub fn increment_by(&self, tracker: TrackerId, delta: u64) -> Option<u64> {
        self.counters
            .get(tracker)
            .map(|c| c.fetch_add(delta, Ordering::Relaxed) + delta)
    }

    pub fn increment(&self, tracker: TrackerId) -> Option<u64> {
        self.increment_by(tracker, 1)
    }

    pub fn snapshot(&self) -> Vec<u64> {
        self.counters
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect()
    }
}

/// Registry of counter arrays owned by the hosting process
#[derive(Debug, Default)]
pub struct CounterRegistry {
    arrays: DashMap<UnitId, Arc<CounterArray>>,
}

impl CounterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared registry used by units that were not given one explicitly
    pub fn global() -> Arc<CounterRegistry> {
        GLOBAL_REGISTRY
            .get_or_init(|| Arc::new(CounterRegistry::new()))
            .clone()
    }

    /// Register a fresh all-zero array under `unit`
    pub fn add(&self, unit: UnitId, len: usize) -> Arc<CounterArray> {
        let array = Arc::new(CounterArray::new(len));
        if self.arrays.insert(unit, array.clone()).is_some() {
            debug!(%unit, "replaced existing counter array");
        }
        debug!(%unit, len, "registered counter array");
        array
    }

    pub fn get(&self, unit: UnitId) -> Option<Arc<CounterArray>> {
        self.arrays.get(&unit).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, unit: UnitId) -> Option<Arc<CounterArray>> {
        let removed = self.arrays.remove(&unit).map(|(_, array)| array);
        if removed.is_some() {
            debug!(%unit, "purged counter array");
        }
        removed
    }

    pub fn contains(&self, unit: UnitId) -> bool {
        self.arrays.contains_key(&unit)
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_ids_are_unique() {
        let a = UnitId::next();
        let b = UnitId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_add_get_remove() {
        let registry = CounterRegistry::new();
        let unit = UnitId::next();
        let array = registry.add(unit, 3);
        assert_eq!(array.snapshot(), vec![0, 0, 0]);

        array.increment(1);
        array.increment_by(1, 2);
        assert_eq!(registry.get(unit).and_then(|a| a.get(1)), Some(3));

        assert!(registry.remove(unit).is_some());
        assert!(registry.get(unit).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_out_of_range_counter_is_none() {
        let array = CounterArray::new(1);
        assert_eq!(array.get(1), None);
        assert_eq!(array.increment(5), None);
    }

    #[test]
    fn test_concurrent_registration_is_disjoint() {
        let registry = Arc::new(CounterRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let unit = UnitId::next();
                    registry.add(unit, 1).increment(0);
                    unit
                })
            })
            .collect();
        let units: Vec<UnitId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(registry.len(), 8);
        for unit in units {
            assert_eq!(registry.get(unit).unwrap().snapshot(), vec![1]);
        }
    }
}
