// SPDX-License-Identifier: Apache-2.0
//! Configuration surface for the scheduling core.

use crate::cache::DEFAULT_CACHE_CAPACITY;
use crate::history::DEFAULT_HISTORY_SIZE;

/// Tunables fixed at configuration time.
///
/// `schedule_cache_size` may change at runtime, at the cost of clearing the
/// cache. `token_history_size` must be in place before the iteration that
/// relies on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HdfConfig {
    /// Bound on cached schedules. ≤ 0 means unbounded.
    pub schedule_cache_size: i64,
    /// Consumed-token history window per channel.
    pub token_history_size: usize,
}

impl Default for HdfConfig {
    fn default() -> Self {
        Self {
            schedule_cache_size: DEFAULT_CACHE_CAPACITY,
            token_history_size: DEFAULT_HISTORY_SIZE,
        }
    }
}

impl HdfConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the schedule cache bound (≤ 0 = unbounded).
    #[must_use]
    pub fn with_cache_size(mut self, size: i64) -> Self {
        self.schedule_cache_size = size;
        self
    }

    /// Sets the per-channel token history window.
    #[must_use]
    pub fn with_history_size(mut self, size: usize) -> Self {
        self.token_history_size = size;
        self
    }
}
