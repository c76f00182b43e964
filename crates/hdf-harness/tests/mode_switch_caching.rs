// SPDX-License-Identifier: Apache-2.0
//! End-to-end mode switching through the full iteration loop: a modal
//! actor alternating between Lo and Hi refinements must reuse cached
//! schedules on revisits instead of re-running the balance solver.
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use hdf_core::{
    DataflowGraph, HdfConfig, ModeChart, ModeCoordinator, PortRate, RateKind, Token,
};
use hdf_harness::{
    ActorBehavior, Counter, FiringContext, HarnessError, HdfModel, ModalActor, Manager, Repeat,
};

/// Sink whose consumption log is shared with the test body.
struct SharedRecorder(Rc<RefCell<Vec<Token>>>);

impl ActorBehavior for SharedRecorder {
    fn fire(
        &mut self,
        ctx: &FiringContext<'_>,
    ) -> Result<BTreeMap<hdf_core::PortId, Vec<Token>>, HarnessError> {
        for tokens in ctx.consumed.values() {
            self.0.borrow_mut().extend_from_slice(tokens);
        }
        Ok(BTreeMap::new())
    }
}

/// src --1--> modal --?--> sink, where the modal actor's consumption and
/// production rates are 1 in Lo and 2 in Hi.
fn lo_hi_manager(config: &HdfConfig, lo_guard: &str, hi_guard: &str) -> (Manager, Rc<RefCell<Vec<Token>>>) {
    let mut graph = DataflowGraph::new();
    let src = graph.add_actor("src");
    let modal = graph.add_actor("modal");
    let sink = graph.add_actor("sink");
    let src_out = graph.add_output_port(src, "out", 1, 0).unwrap();
    let m_in = graph.add_input_port(modal, "in", 1).unwrap();
    let m_out = graph.add_output_port(modal, "out", 1, 0).unwrap();
    let s_in = graph.add_input_port(sink, "in", 1).unwrap();
    graph.connect(src_out, m_in, 0).unwrap();
    graph.connect(m_out, s_in, 0).unwrap();

    let mut chart = ModeChart::new();
    let lo = chart.add_mode(
        "Lo",
        vec![
            PortRate { port: m_in, kind: RateKind::Consumption, rate: 1 },
            PortRate { port: m_out, kind: RateKind::Production, rate: 1 },
        ],
    );
    let hi = chart.add_mode(
        "Hi",
        vec![
            PortRate { port: m_in, kind: RateKind::Consumption, rate: 2 },
            PortRate { port: m_out, kind: RateKind::Production, rate: 2 },
        ],
    );
    chart.set_initial(lo).unwrap();
    chart.add_transition(lo, hi, lo_guard, Vec::new()).unwrap();
    chart.add_transition(hi, lo, hi_guard, Vec::new()).unwrap();
    let coordinator = ModeCoordinator::new(chart).unwrap();

    let mut model = HdfModel::new(graph, config);
    model.set_behavior(src, Counter::default());
    model.set_behavior(modal, Repeat::default());
    let log = Rc::new(RefCell::new(Vec::new()));
    model.set_behavior(sink, SharedRecorder(Rc::clone(&log)));
    model.modal = Some(ModalActor::new(modal, coordinator, config));
    (Manager::new(model), log)
}

#[test]
fn alternating_modes_solve_each_signature_once() {
    let config = HdfConfig::new();
    let (mut manager, log) = lo_hi_manager(&config, "true", "true");
    manager.preinitialize().unwrap();

    let mut modes = Vec::new();
    for _ in 0..4 {
        modes.push(manager.iterate().unwrap().mode.unwrap());
    }
    assert_eq!(modes, ["Lo", "Hi", "Lo", "Hi"]);

    // Two distinct rate signatures, each solved exactly once; the two
    // revisits are cache hits.
    assert_eq!(manager.model().scheduler.computes(), 2);
    let stats = manager.model().coordinator.cache_stats();
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.hits, 2);

    // Lo: src emits 0, Repeat forwards it. Hi: src emits 1 and 2, Repeat
    // emits the last twice. Then 3, then 4 and 5.
    let consumed = log.borrow();
    assert_eq!(
        *consumed,
        vec![
            Token::Int(0),
            Token::Int(2),
            Token::Int(2),
            Token::Int(3),
            Token::Int(5),
            Token::Int(5),
        ]
    );
}

#[test]
fn capacity_one_cache_thrashes_on_alternation() {
    let config = HdfConfig::new().with_cache_size(1);
    let (mut manager, _log) = lo_hi_manager(&config, "true", "true");
    manager.preinitialize().unwrap();

    for _ in 0..4 {
        manager.iterate().unwrap();
    }

    // Each switch evicts the only resident entry, so every iteration
    // after the first solves from scratch.
    assert_eq!(manager.model().scheduler.computes(), 4);
    let stats = manager.model().coordinator.cache_stats();
    assert_eq!(stats.misses, 4);
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.evictions, 3);
}

#[test]
fn guard_over_consumed_token_switches_when_threshold_reached() {
    let config = HdfConfig::new();
    // Switch to Hi once the modal actor has consumed a token >= 2; never
    // switch back.
    let (mut manager, _log) = lo_hi_manager(&config, "in >= 2", "false");
    manager.preinitialize().unwrap();

    let mut modes = Vec::new();
    for _ in 0..4 {
        modes.push(manager.iterate().unwrap().mode.unwrap());
    }
    // Counter emits 0, 1, 2, ...: the guard first holds in iteration 3,
    // so the switch takes effect in iteration 4.
    assert_eq!(modes, ["Lo", "Lo", "Lo", "Hi"]);
    assert_eq!(manager.model().scheduler.computes(), 2);
}

#[test]
fn unswitched_runs_reuse_the_installed_schedule() {
    let config = HdfConfig::new();
    let (mut manager, _log) = lo_hi_manager(&config, "false", "false");
    manager.preinitialize().unwrap();

    for _ in 0..5 {
        let report = manager.iterate().unwrap();
        assert_eq!(report.mode.unwrap(), "Lo");
    }
    // No switch ever commits: the validity flag short-circuits after the
    // first solve, without even consulting the cache.
    assert_eq!(manager.model().scheduler.computes(), 1);
    let stats = manager.model().coordinator.cache_stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits + stats.fast_hits, 0);
}
