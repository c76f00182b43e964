// SPDX-License-Identifier: Apache-2.0
//! LRU schedule cache keyed by rate signature.
//!
//! Rate signatures recur across mode revisits (A→B→A cycles), so cached
//! schedules avoid re-solving balance equations. The number of distinct
//! rate combinations can be exponential in actor count, so the map is
//! bounded and evicts least-recently-used entries.
//!
//! Invariants:
//! - The map and the recency list are always in 1:1 correspondence.
//! - The map never exceeds capacity except transiently during insertion,
//!   before eviction runs.
//! - The most-recent fast path is checked before any map access; repeated
//!   identical signatures touch neither the map nor the recency list.

use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::schedule::Schedule;
use crate::signature::RateSignature;
use crate::telemetry;

/// Default bound when none is configured.
pub const DEFAULT_CACHE_CAPACITY: i64 = 100;

/// Cumulative cache counters, exposed for tests and diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Fast-path reuses of the most recent signature.
    pub fast_hits: u64,
    /// Map hits (entry moved to most-recently-used).
    pub hits: u64,
    /// Misses that invoked the compute closure.
    pub misses: u64,
    /// Entries evicted under capacity pressure.
    pub evictions: u64,
}

/// Bounded mapping `RateSignature → Schedule` with LRU eviction.
#[derive(Debug, Default)]
pub struct ScheduleCache {
    /// `None` means unbounded (configured capacity ≤ 0).
    capacity: Option<usize>,
    map: FxHashMap<RateSignature, Arc<Schedule>>,
    /// Most-recently-used key at the front.
    recency: VecDeque<RateSignature>,
    /// Fast path: the signature and schedule of the previous request.
    most_recent: Option<(RateSignature, Arc<Schedule>)>,
    stats: CacheStats,
}

impl ScheduleCache {
    /// Creates a cache from the configured size parameter.
    ///
    /// `size ≤ 0` means unbounded, per the configuration surface contract.
    #[must_use]
    pub fn with_size(size: i64) -> Self {
        Self {
            capacity: capacity_from_size(size),
            ..Self::default()
        }
    }

    /// Returns the schedule for `signature`, computing and inserting it on
    /// a miss.
    ///
    /// Lookup order: most-recent fast path, then the LRU map, then
    /// `compute`. A failed `compute` propagates uncached — the next request
    /// for the same signature will retry it only because the caller asked
    /// again, never because of internal retry.
    pub fn get_or_compute<E>(
        &mut self,
        signature: &RateSignature,
        compute: impl FnOnce() -> Result<Schedule, E>,
    ) -> Result<Arc<Schedule>, E> {
        if let Some((recent_sig, recent_schedule)) = &self.most_recent {
            if recent_sig == signature {
                self.stats.fast_hits += 1;
                telemetry::cache_fast_hit(signature.fingerprint());
                return Ok(Arc::clone(recent_schedule));
            }
        }

        if let Some(schedule) = self.map.get(signature).cloned() {
            self.stats.hits += 1;
            telemetry::cache_hit(signature.fingerprint());
            self.touch(signature);
            self.most_recent = Some((signature.clone(), Arc::clone(&schedule)));
            return Ok(schedule);
        }

        self.stats.misses += 1;
        telemetry::cache_miss(signature.fingerprint());
        let schedule = Arc::new(compute()?);
        self.map.insert(signature.clone(), Arc::clone(&schedule));
        self.recency.push_front(signature.clone());
        if let Some(capacity) = self.capacity {
            while self.map.len() > capacity {
                if let Some(oldest) = self.recency.pop_back() {
                    telemetry::cache_evict(oldest.fingerprint());
                    self.map.remove(&oldest);
                    self.stats.evictions += 1;
                } else {
                    break;
                }
            }
        }
        self.most_recent = Some((signature.clone(), Arc::clone(&schedule)));
        Ok(schedule)
    }

    /// Moves `signature` to the most-recently-used position.
    fn touch(&mut self, signature: &RateSignature) {
        if let Some(pos) = self.recency.iter().position(|s| s == signature) {
            if let Some(sig) = self.recency.remove(pos) {
                self.recency.push_front(sig);
            }
        }
    }

    /// Clears the mapping, the recency list, and the most-recent fast path.
    ///
    /// Called on preinitialize and on structural graph change.
    pub fn invalidate_all(&mut self) {
        self.map.clear();
        self.recency.clear();
        self.most_recent = None;
    }

    /// Reconfigures the capacity.
    ///
    /// Changing capacity invalidates all cached entries rather than
    /// trimming; a same-value call is a no-op.
    pub fn set_capacity(&mut self, size: i64) {
        let capacity = capacity_from_size(size);
        if capacity != self.capacity {
            self.capacity = capacity;
            self.invalidate_all();
        }
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when no entries are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// True when `signature` is resident (no recency effect).
    #[must_use]
    pub fn contains(&self, signature: &RateSignature) -> bool {
        self.map.contains_key(signature)
    }

    /// Cumulative counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

fn capacity_from_size(size: i64) -> Option<usize> {
    usize::try_from(size).ok().filter(|&n| n > 0)
}
