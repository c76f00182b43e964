// SPDX-License-Identifier: Apache-2.0
//! Per-context schedule coordination: validity tracking, signature
//! computation, and cache delegation.
//!
//! One coordinator exists per director context; nested contexts own
//! independent coordinators and caches, with no cross-context sharing.
//! `get_schedule` is called once per iteration, before execution.

use std::sync::Arc;

use crate::balance::{BalanceScheduler, SchedulingError};
use crate::cache::{CacheStats, ScheduleCache};
use crate::config::HdfConfig;
use crate::graph::{BoundaryPorts, DataflowGraph};
use crate::schedule::Schedule;
use crate::signature::RateSignature;

/// What the caller must do after `postfire`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PostfireAction {
    /// Nothing deferred; the installed schedule stands.
    None,
    /// Enqueue a deferred, non-persistent schedule recomputation on the
    /// change queue. Required when the schedule is invalid or this is not
    /// the outermost scheduling context: an enclosing mode switch may still
    /// rewrite this context's rates via its own queued request, so
    /// recomputing synchronously here could read stale rates.
    DeferRecompute,
}

/// Orchestrates schedule validity checks, rate signatures, and the cache.
#[derive(Debug)]
pub struct ScheduleCoordinator {
    cache: ScheduleCache,
    /// Fast path: when true, `get_schedule` returns the installed schedule
    /// without computing a signature at all.
    schedule_valid: bool,
    installed: Option<Arc<Schedule>>,
    /// Boundary-port enumeration, cached against the graph version.
    boundary: Option<BoundaryPorts>,
    /// False for coordinators nested inside an enclosing HDF context.
    outermost: bool,
}

impl ScheduleCoordinator {
    /// Creates a coordinator for an outermost or nested context.
    #[must_use]
    pub fn new(config: &HdfConfig, outermost: bool) -> Self {
        Self {
            cache: ScheduleCache::with_size(config.schedule_cache_size),
            schedule_valid: false,
            installed: None,
            boundary: None,
            outermost,
        }
    }

    /// True when the installed schedule is still valid.
    #[must_use]
    pub fn is_schedule_valid(&self) -> bool {
        self.schedule_valid
    }

    /// Marks the installed schedule invalid (rates or structure changed).
    pub fn invalidate_schedule(&mut self) {
        self.schedule_valid = false;
    }

    /// Returns the schedule for the graph's current rates.
    ///
    /// Path order, fastest first: the validity flag (no signature work at
    /// all), then the cache's most-recent check, then the LRU map, then a
    /// full balance-equation solve. A solver failure propagates uncached
    /// and is not retried internally.
    pub fn get_schedule(
        &mut self,
        graph: &DataflowGraph,
        scheduler: &impl BalanceScheduler,
    ) -> Result<Arc<Schedule>, SchedulingError> {
        if self.schedule_valid {
            if let Some(installed) = &self.installed {
                return Ok(Arc::clone(installed));
            }
        }

        let boundary = match self.boundary.take() {
            Some(b) if b.version == graph.version() => b,
            _ => BoundaryPorts::collect(graph),
        };
        let signature = RateSignature::compute(graph, &boundary)?;
        self.boundary = Some(boundary);
        let schedule = self
            .cache
            .get_or_compute(&signature, || scheduler.compute_schedule(graph))?;
        self.installed = Some(Arc::clone(&schedule));
        self.schedule_valid = true;
        Ok(schedule)
    }

    /// End-of-iteration protocol.
    ///
    /// Recomputation is deferred through the change queue whenever the
    /// schedule is invalid or this coordinator is nested, never performed
    /// synchronously here.
    #[must_use]
    pub fn postfire(&self) -> PostfireAction {
        if !self.schedule_valid || !self.outermost {
            PostfireAction::DeferRecompute
        } else {
            PostfireAction::None
        }
    }

    /// Start-of-run protocol: clears the cache (and its most-recent fast
    /// path) and forgets the installed schedule and boundary list.
    pub fn preinitialize(&mut self) {
        self.cache.invalidate_all();
        self.schedule_valid = false;
        self.installed = None;
        self.boundary = None;
    }

    /// Reconfigures the cache capacity (a change clears the cache).
    pub fn set_cache_capacity(&mut self, size: i64) {
        self.cache.set_capacity(size);
    }

    /// Cache counters, for tests and diagnostics.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::balance::SdfScheduler;
    use crate::graph::DataflowGraph;
    use crate::ident::PortId;

    fn chain() -> (DataflowGraph, PortId, PortId) {
        let mut g = DataflowGraph::new();
        let a = g.add_actor("a");
        let b = g.add_actor("b");
        let out = g.add_output_port(a, "out", 1, 0).unwrap();
        let inp = g.add_input_port(b, "in", 1).unwrap();
        g.connect(out, inp, 0).unwrap();
        (g, out, inp)
    }

    fn coordinator() -> ScheduleCoordinator {
        ScheduleCoordinator::new(&HdfConfig::new(), true)
    }

    #[test]
    fn valid_flag_short_circuits_everything() {
        let (g, _, _) = chain();
        let mut coord = coordinator();
        let first = coord.get_schedule(&g, &SdfScheduler).unwrap();
        assert!(coord.is_schedule_valid());
        let second = coord.get_schedule(&g, &SdfScheduler).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        // Valid-flag path does not even consult the cache.
        assert_eq!(coord.cache_stats().fast_hits, 0);
        assert_eq!(coord.cache_stats().misses, 1);
    }

    #[test]
    fn invalidation_with_unchanged_rates_is_a_fast_cache_hit() {
        let (g, _, _) = chain();
        let mut coord = coordinator();
        coord.get_schedule(&g, &SdfScheduler).unwrap();
        coord.invalidate_schedule();
        coord.get_schedule(&g, &SdfScheduler).unwrap();
        assert_eq!(coord.cache_stats().misses, 1);
        assert_eq!(coord.cache_stats().fast_hits, 1);
    }

    #[test]
    fn rate_change_recomputes_and_revisit_hits_cache() {
        let (mut g, out, inp) = chain();
        let mut coord = coordinator();
        coord.get_schedule(&g, &SdfScheduler).unwrap();

        g.set_production_rate(out, 2).unwrap();
        coord.invalidate_schedule();
        coord.get_schedule(&g, &SdfScheduler).unwrap();
        assert_eq!(coord.cache_stats().misses, 2);

        // Back to the original rates: LRU hit, not a recompute.
        g.set_production_rate(out, 1).unwrap();
        coord.invalidate_schedule();
        coord.get_schedule(&g, &SdfScheduler).unwrap();
        assert_eq!(coord.cache_stats().misses, 2);
        assert_eq!(coord.cache_stats().hits, 1);
        let _ = inp;
    }

    #[test]
    fn nested_coordinator_always_defers_recompute() {
        let nested = ScheduleCoordinator::new(&HdfConfig::new(), false);
        assert_eq!(nested.postfire(), PostfireAction::DeferRecompute);
    }

    #[test]
    fn outermost_defers_only_when_invalid() {
        let (g, _, _) = chain();
        let mut coord = coordinator();
        assert_eq!(coord.postfire(), PostfireAction::DeferRecompute);
        coord.get_schedule(&g, &SdfScheduler).unwrap();
        assert_eq!(coord.postfire(), PostfireAction::None);
        coord.invalidate_schedule();
        assert_eq!(coord.postfire(), PostfireAction::DeferRecompute);
    }

    #[test]
    fn preinitialize_clears_cache_and_installed_schedule() {
        let (g, _, _) = chain();
        let mut coord = coordinator();
        coord.get_schedule(&g, &SdfScheduler).unwrap();
        coord.preinitialize();
        assert!(!coord.is_schedule_valid());
        coord.get_schedule(&g, &SdfScheduler).unwrap();
        assert_eq!(coord.cache_stats().misses, 2);
    }

    #[test]
    fn solver_failure_propagates_and_caches_nothing() {
        let mut g = DataflowGraph::new();
        g.add_actor("a");
        g.add_actor("island");
        let mut coord = coordinator();
        assert!(coord.get_schedule(&g, &SdfScheduler).is_err());
        assert!(!coord.is_schedule_valid());
        // Still fails on retry: nothing stale was installed.
        assert!(coord.get_schedule(&g, &SdfScheduler).is_err());
        assert_eq!(coord.cache_stats().misses, 2);
    }
}
