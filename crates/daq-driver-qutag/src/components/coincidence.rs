//! Coincidence counter cache.
//!
//! The device exposes one counter block covering all singles and channel
//! combinations, refreshed once per exposure cycle. Several instrument
//! channels sample different slots of the same block, so the driver reads it
//! once and caches the result; each slot's update count is then handed out at
//! most once, letting consumers distinguish fresh data from a repeat of the
//! cycle they already sampled.

use std::sync::Mutex;

/// Counter slots in one `TDC_getCoincCounters` block on the quTAG Standard:
/// 5 singles followed by the defined channel combinations.
pub const COINC_SLOT_COUNT: usize = 59;

enum Snapshot {
    /// No block has been read since creation or the last reset.
    Stale,
    Fresh {
        counts: Vec<i32>,
        num_updates: i32,
        /// Slots whose update count has already been handed out.
        consumed: Vec<bool>,
    },
}

/// Cache of the most recent counter block.
pub struct CoincidenceCache {
    inner: Mutex<Snapshot>,
}

impl Default for CoincidenceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CoincidenceCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Snapshot::Stale),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Snapshot> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Feed a raw counter read into the cache.
    ///
    /// A read with `updates == 0` carries values already seen; the previous
    /// snapshot is kept, including which slots were consumed.
    pub fn refresh(&self, counts: Vec<i32>, updates: i32) {
        if updates <= 0 {
            return;
        }
        let consumed = vec![false; counts.len()];
        *self.lock() = Snapshot::Fresh {
            counts,
            num_updates: updates,
            consumed,
        };
    }

    /// Sample one slot, consuming its update count.
    ///
    /// Returns `(count, updates)`. The first sample of a slot after a
    /// refresh carries the block's update count; repeats return the same
    /// count with zero updates. A stale cache or an out-of-range slot yields
    /// `(0, 0)`.
    pub fn take_for(&self, slot: usize) -> (i32, i32) {
        let mut snapshot = self.lock();
        match &mut *snapshot {
            Snapshot::Stale => (0, 0),
            Snapshot::Fresh {
                counts,
                num_updates,
                consumed,
            } => {
                if slot >= counts.len() {
                    return (0, 0);
                }
                let updates = if consumed[slot] { 0 } else { *num_updates };
                consumed[slot] = true;
                (counts[slot], updates)
            }
        }
    }

    /// Copy of the cached block, if any, for diagnostics.
    pub fn snapshot(&self) -> Option<(Vec<i32>, i32)> {
        match &*self.lock() {
            Snapshot::Stale => None,
            Snapshot::Fresh {
                counts,
                num_updates,
                ..
            } => Some((counts.clone(), *num_updates)),
        }
    }

    /// Drop the cached block entirely.
    pub fn reset(&self) {
        *self.lock() = Snapshot::Stale;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_cache_reads_zero() {
        let cache = CoincidenceCache::new();
        assert_eq!(cache.take_for(0), (0, 0));
        assert!(cache.snapshot().is_none());
    }

    #[test]
    fn update_count_is_consumed_once_per_slot() {
        let cache = CoincidenceCache::new();
        let mut counts = vec![0; COINC_SLOT_COUNT];
        counts[0] = 17;
        counts[5] = 4;
        cache.refresh(counts, 3);

        assert_eq!(cache.take_for(0), (17, 3));
        assert_eq!(cache.take_for(0), (17, 0));
        // Other slots keep their own flag.
        assert_eq!(cache.take_for(5), (4, 3));
        assert_eq!(cache.take_for(5), (4, 0));
    }

    #[test]
    fn zero_update_read_keeps_previous_snapshot() {
        let cache = CoincidenceCache::new();
        let mut counts = vec![0; COINC_SLOT_COUNT];
        counts[2] = 9;
        cache.refresh(counts, 1);
        assert_eq!(cache.take_for(2), (9, 1));

        // The device reports 0 cycles; the stale block must not clobber the
        // cache or revive the consumed flag.
        cache.refresh(vec![0; COINC_SLOT_COUNT], 0);
        assert_eq!(cache.take_for(2), (9, 0));
    }

    #[test]
    fn refresh_resets_consumed_flags() {
        let cache = CoincidenceCache::new();
        let mut counts = vec![0; COINC_SLOT_COUNT];
        counts[1] = 2;
        cache.refresh(counts.clone(), 1);
        assert_eq!(cache.take_for(1), (2, 1));

        counts[1] = 5;
        cache.refresh(counts, 2);
        assert_eq!(cache.take_for(1), (5, 2));
    }

    #[test]
    fn out_of_range_slot_reads_zero() {
        let cache = CoincidenceCache::new();
        cache.refresh(vec![1; COINC_SLOT_COUNT], 1);
        assert_eq!(cache.take_for(COINC_SLOT_COUNT + 10), (0, 0));
    }

    #[test]
    fn reset_discards_snapshot() {
        let cache = CoincidenceCache::new();
        cache.refresh(vec![1; COINC_SLOT_COUNT], 1);
        cache.reset();
        assert_eq!(cache.take_for(0), (0, 0));
    }
}
