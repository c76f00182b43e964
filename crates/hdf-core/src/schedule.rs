// SPDX-License-Identifier: Apache-2.0
//! Immutable firing schedules.

use crate::ident::ActorId;

/// One schedule entry: fire `actor` `count` consecutive times.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Firing {
    /// Actor to fire.
    pub actor: ActorId,
    /// Consecutive firing count within the iteration.
    pub count: u32,
}

/// An ordered sequence of firings satisfying the balance equations for one
/// rate signature.
///
/// Immutable once computed: rates do not change mid-schedule-execution, so
/// the cache hands these out as `Arc` read-only views and never mutates an
/// inserted schedule.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Schedule {
    firings: Vec<Firing>,
}

impl Schedule {
    /// Wraps an ordered firing sequence.
    #[must_use]
    pub fn new(firings: Vec<Firing>) -> Self {
        Self { firings }
    }

    /// The firing records in execution order.
    #[must_use]
    pub fn firings(&self) -> &[Firing] {
        &self.firings
    }

    /// True when the schedule fires nothing (empty graph).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.firings.is_empty()
    }

    /// Total firing events across all records.
    #[must_use]
    pub fn total_firings(&self) -> u64 {
        self.firings.iter().map(|f| u64::from(f.count)).sum()
    }

    /// Number of times `actor` fires in one iteration.
    ///
    /// This is the `firingsPerIteration` input to type-B firing bookkeeping
    /// and history slot arithmetic.
    #[must_use]
    pub fn firings_of(&self, actor: ActorId) -> u32 {
        self.firings
            .iter()
            .filter(|f| f.actor == actor)
            .map(|f| f.count)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn firing_counts_sum_across_records() {
        let a = ActorId(0);
        let b = ActorId(1);
        let s = Schedule::new(vec![
            Firing { actor: a, count: 2 },
            Firing { actor: b, count: 1 },
            Firing { actor: a, count: 1 },
        ]);
        assert_eq!(s.total_firings(), 4);
        assert_eq!(s.firings_of(a), 3);
        assert_eq!(s.firings_of(b), 1);
        assert_eq!(s.firings_of(ActorId(7)), 0);
    }
}
