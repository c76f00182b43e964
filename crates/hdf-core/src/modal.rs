// SPDX-License-Identifier: Apache-2.0
//! Mode charts and deferred mode-transition coordination.
//!
//! A mode chart is a finite set of modes, each carrying the rate table its
//! refinement presents at the enclosing graph's boundary ports, connected
//! by guarded transitions. Transition choice happens at the type-B firing
//! boundary (the last sub-firing of the current global iteration) and
//! commitment is deferred to a change request: the firing that chooses a
//! transition never mutates rates itself, because the engine is still
//! mid-traversal of the current schedule.

use thiserror::Error;

use crate::change::ChangeError;
use crate::graph::{DataflowGraph, GraphError};
use crate::guard::{Guard, GuardError, GuardParseError};
use crate::ident::{ModeId, PortId, TransitionId};
use crate::signature::RateKind;
use crate::telemetry;
use crate::token::{Token, VariableScope};

/// One boundary-port rate presented by a mode's refinement.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortRate {
    /// Boundary port of the enclosing graph.
    pub port: PortId,
    /// Which rate attribute to set.
    pub kind: RateKind,
    /// The rate value.
    pub rate: u32,
}

/// A variable assignment executed when a transition commits.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SetAction {
    /// Target variable name.
    pub variable: String,
    /// Value to assign.
    pub value: Token,
}

/// Error constructing a mode chart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModeChartError {
    /// A transition referenced a mode handle outside the chart.
    #[error("unknown mode handle {0:?}")]
    UnknownMode(ModeId),
    /// The guard text was rejected. Fatal at construction, per contract.
    #[error("invalid guard: {0}")]
    Guard(#[from] GuardParseError),
    /// No initial mode was designated before coordination began.
    #[error("mode chart has no initial mode")]
    NoInitialMode,
}

/// Fatal transition failure, surfaced at the type-B firing boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// More than one outgoing guard evaluated true. No tie-break order is
    /// defined; this is an authoring error.
    #[error("ambiguous transitions from mode '{mode}': guards '{first}' and '{second}' are both enabled")]
    Ambiguous {
        /// Source mode name.
        mode: String,
        /// Guard text of the first enabled transition.
        first: String,
        /// Guard text of the second enabled transition.
        second: String,
    },
    /// A guard failed to evaluate (undefined variable, type mismatch).
    #[error(transparent)]
    Guard(#[from] GuardError),
}

#[derive(Clone, Debug)]
struct ModeRecord {
    name: String,
    rates: Vec<PortRate>,
}

#[derive(Clone, Debug)]
struct TransitionRecord {
    from: ModeId,
    to: ModeId,
    guard: Guard,
    actions: Vec<SetAction>,
}

/// The static structure of a mode-switching controller.
#[derive(Clone, Debug, Default)]
pub struct ModeChart {
    modes: Vec<ModeRecord>,
    transitions: Vec<TransitionRecord>,
    initial: Option<ModeId>,
}

impl ModeChart {
    /// Creates an empty chart.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a mode with the rate table its refinement presents.
    pub fn add_mode(&mut self, name: impl Into<String>, rates: Vec<PortRate>) -> ModeId {
        #[allow(clippy::cast_possible_truncation)]
        let id = ModeId(self.modes.len() as u32);
        self.modes.push(ModeRecord {
            name: name.into(),
            rates,
        });
        id
    }

    /// Designates the initial mode.
    pub fn set_initial(&mut self, mode: ModeId) -> Result<(), ModeChartError> {
        if mode.index() >= self.modes.len() {
            return Err(ModeChartError::UnknownMode(mode));
        }
        self.initial = Some(mode);
        Ok(())
    }

    /// Adds a guarded transition. The guard text is parsed here; malformed
    /// guards never reach evaluation.
    pub fn add_transition(
        &mut self,
        from: ModeId,
        to: ModeId,
        guard: &str,
        actions: Vec<SetAction>,
    ) -> Result<TransitionId, ModeChartError> {
        if from.index() >= self.modes.len() {
            return Err(ModeChartError::UnknownMode(from));
        }
        if to.index() >= self.modes.len() {
            return Err(ModeChartError::UnknownMode(to));
        }
        let guard = Guard::parse(guard)?;
        #[allow(clippy::cast_possible_truncation)]
        let id = TransitionId(self.transitions.len() as u32);
        self.transitions.push(TransitionRecord {
            from,
            to,
            guard,
            actions,
        });
        Ok(id)
    }

    /// Mode name for diagnostics.
    #[must_use]
    pub fn mode_name(&self, mode: ModeId) -> &str {
        self.modes
            .get(mode.index())
            .map_or("<unknown>", |m| m.name.as_str())
    }

    /// Transitions leaving `mode`, in declaration order.
    fn transitions_from(&self, mode: ModeId) -> impl Iterator<Item = (TransitionId, &TransitionRecord)> {
        self.transitions
            .iter()
            .enumerate()
            .filter(move |(_, t)| t.from == mode)
            .map(|(i, t)| {
                #[allow(clippy::cast_possible_truncation)]
                let id = TransitionId(i as u32);
                (id, t)
            })
    }
}

/// A committed mode switch, reported for logging and invalidation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ModeSwitch {
    /// Mode left.
    pub from: ModeId,
    /// Mode entered.
    pub to: ModeId,
}

/// Outcome of `postfire`: whether the global iteration completed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IterationBoundary {
    /// More sub-firings remain in this iteration.
    Continue,
    /// The iteration finished. If a transition was armed during the type-B
    /// firing, it is reported here for deferred commitment.
    Complete {
        /// Transition armed this iteration, if any.
        armed: Option<TransitionId>,
    },
}

/// Runtime state of a mode-switching controller.
///
/// Two-phase transition protocol: `fire` (phase 1, synchronous) only
/// identifies the enabled transition at the type-B boundary and arms it;
/// `commit` (phase 2) runs inside a queued change request and performs the
/// actual state change and rate rewrite. The arming flag is a single-slot
/// mutex: a second arming attempt while one commitment is outstanding is
/// suppressed, so at most one transition commits per global iteration.
#[derive(Clone, Debug)]
pub struct ModeCoordinator {
    chart: ModeChart,
    current: ModeId,
    /// True when no commitment is outstanding (arming is allowed).
    arming_allowed: bool,
    armed: Option<TransitionId>,
    firings_so_far: u32,
    firings_per_iteration: u32,
}

impl ModeCoordinator {
    /// Creates a coordinator positioned at the chart's initial mode.
    pub fn new(chart: ModeChart) -> Result<Self, ModeChartError> {
        let initial = chart.initial.ok_or(ModeChartError::NoInitialMode)?;
        Ok(Self {
            chart,
            current: initial,
            arming_allowed: true,
            armed: None,
            firings_so_far: 0,
            firings_per_iteration: 1,
        })
    }

    /// The active mode.
    #[must_use]
    pub fn current_mode(&self) -> ModeId {
        self.current
    }

    /// Name of the active mode.
    #[must_use]
    pub fn current_mode_name(&self) -> &str {
        self.chart.mode_name(self.current)
    }

    /// True while a chosen transition awaits its deferred commitment.
    #[must_use]
    pub fn transition_pending(&self) -> bool {
        !self.arming_allowed
    }

    /// Sets how many sub-firings constitute one global iteration.
    ///
    /// Derived from the current schedule each iteration; also resets the
    /// sub-firing counter when the schedule changed mid-run.
    pub fn set_firings_per_iteration(&mut self, firings: u32) {
        let firings = firings.max(1);
        if firings != self.firings_per_iteration {
            self.firings_per_iteration = firings;
            self.firings_so_far = 0;
        }
    }

    /// Sub-firings per global iteration under the current schedule.
    #[must_use]
    pub fn firings_per_iteration(&self) -> u32 {
        self.firings_per_iteration
    }

    /// Reverts to the initial mode and clears all iteration state.
    pub fn reinitialize(&mut self) -> Result<(), ModeChartError> {
        self.current = self.chart.initial.ok_or(ModeChartError::NoInitialMode)?;
        self.arming_allowed = true;
        self.armed = None;
        self.firings_so_far = 0;
        Ok(())
    }

    /// Writes the current mode's refinement rates into the graph.
    ///
    /// Used at preinitialization so the enclosing scheduler sees the
    /// initial mode's rates, and by `commit` after a switch.
    pub fn apply_current_rates(&self, graph: &mut DataflowGraph) -> Result<(), GraphError> {
        let mode = &self.chart.modes[self.current.index()];
        for entry in &mode.rates {
            match entry.kind {
                RateKind::Consumption => graph.set_consumption_rate(entry.port, entry.rate)?,
                RateKind::Production => graph.set_production_rate(entry.port, entry.rate)?,
                RateKind::InitProduction => {
                    graph.set_init_production_rate(entry.port, entry.rate)?;
                }
            }
        }
        Ok(())
    }

    /// Evaluates the outgoing guards of the current mode.
    ///
    /// Exactly zero or one may be enabled; two simultaneously true guards
    /// are a fatal configuration error with no tie-break.
    pub fn choose_transition(
        &self,
        scope: &VariableScope,
    ) -> Result<Option<TransitionId>, TransitionError> {
        let mut enabled: Option<(TransitionId, &TransitionRecord)> = None;
        for (id, transition) in self.chart.transitions_from(self.current) {
            if transition.guard.evaluate(scope)? {
                if let Some((_, earlier)) = enabled {
                    return Err(TransitionError::Ambiguous {
                        mode: self.chart.mode_name(self.current).to_owned(),
                        first: earlier.guard.source().to_owned(),
                        second: transition.guard.source().to_owned(),
                    });
                }
                enabled = Some((id, transition));
            }
        }
        Ok(enabled.map(|(id, _)| id))
    }

    /// Phase 1 of the transition protocol, called once per sub-firing.
    ///
    /// Guards are evaluated only at the type-B firing (the last sub-firing
    /// of the iteration). An enabled transition is armed unless a previous
    /// commitment is still outstanding, in which case arming is suppressed.
    pub fn fire(&mut self, scope: &VariableScope) -> Result<(), TransitionError> {
        if self.firings_so_far + 1 == self.firings_per_iteration {
            if let Some(chosen) = self.choose_transition(scope)? {
                if self.arming_allowed {
                    self.arming_allowed = false;
                    self.armed = Some(chosen);
                }
            }
        }
        Ok(())
    }

    /// Advances the sub-firing counter; reports iteration completion.
    pub fn postfire(&mut self) -> IterationBoundary {
        self.firings_so_far += 1;
        if self.firings_so_far >= self.firings_per_iteration {
            self.firings_so_far = 0;
            IterationBoundary::Complete { armed: self.armed }
        } else {
            IterationBoundary::Continue
        }
    }

    /// Phase 2: commits the armed transition, if any.
    ///
    /// Runs inside a queued change request, never inside a firing. Applies
    /// the state change, rewrites the new mode's refinement rates (bumping
    /// the graph version), executes set-actions, and re-allows arming for
    /// the next iteration. The caller must invalidate the enclosing
    /// coordinator's schedule when a switch is reported.
    pub fn commit(
        &mut self,
        graph: &mut DataflowGraph,
        scope: &mut VariableScope,
    ) -> Result<Option<ModeSwitch>, ChangeError> {
        let Some(armed) = self.armed.take() else {
            return Ok(None);
        };
        let transition = self.chart.transitions[armed.index()].clone();
        let switch = ModeSwitch {
            from: self.current,
            to: transition.to,
        };
        telemetry::mode_switch(
            self.chart.mode_name(switch.from),
            self.chart.mode_name(switch.to),
        );
        self.current = transition.to;
        self.apply_current_rates(graph)
            .map_err(ChangeError::Graph)?;
        for action in &transition.actions {
            scope.set(action.variable.clone(), action.value);
        }
        self.arming_allowed = true;
        Ok(Some(switch))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;

    fn scope_with(name: &str, value: Token) -> VariableScope {
        let mut scope = VariableScope::new();
        scope.set(name, value);
        scope
    }

    fn two_mode_chart() -> (ModeChart, ModeId, ModeId) {
        let mut chart = ModeChart::new();
        let lo = chart.add_mode("Lo", Vec::new());
        let hi = chart.add_mode("Hi", Vec::new());
        chart.set_initial(lo).unwrap();
        (chart, lo, hi)
    }

    #[test]
    fn malformed_guard_is_rejected_at_construction() {
        let (mut chart, lo, hi) = two_mode_chart();
        let err = chart.add_transition(lo, hi, "x >= ", Vec::new());
        assert!(matches!(err, Err(ModeChartError::Guard(_))));
    }

    #[test]
    fn ambiguous_guards_are_fatal() {
        let (mut chart, lo, hi) = two_mode_chart();
        chart.add_transition(lo, hi, "x > 0", Vec::new()).unwrap();
        chart.add_transition(lo, lo, "x > 1", Vec::new()).unwrap();
        let coord = ModeCoordinator::new(chart).unwrap();

        // Only one guard true: fine.
        let chosen = coord
            .choose_transition(&scope_with("x", Token::Int(1)))
            .unwrap();
        assert!(chosen.is_some());

        // Both true: fatal, names both guards.
        match coord.choose_transition(&scope_with("x", Token::Int(5))) {
            Err(TransitionError::Ambiguous { mode, first, second }) => {
                assert_eq!(mode, "Lo");
                assert_eq!(first, "x > 0");
                assert_eq!(second, "x > 1");
            }
            other => panic!("expected Ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn guard_evaluates_only_at_type_b_firing() {
        let (mut chart, lo, hi) = two_mode_chart();
        chart.add_transition(lo, hi, "go == 1", Vec::new()).unwrap();
        let mut coord = ModeCoordinator::new(chart).unwrap();
        coord.set_firings_per_iteration(3);

        let scope = scope_with("go", Token::Int(1));
        // Firings 0 and 1 are not type-B: no arming even with a true guard.
        coord.fire(&scope).unwrap();
        assert_eq!(coord.postfire(), IterationBoundary::Continue);
        assert!(!coord.transition_pending());
        coord.fire(&scope).unwrap();
        assert_eq!(coord.postfire(), IterationBoundary::Continue);
        assert!(!coord.transition_pending());
        // Firing 2 is type-B.
        coord.fire(&scope).unwrap();
        assert!(coord.transition_pending());
        match coord.postfire() {
            IterationBoundary::Complete { armed: Some(_) } => {}
            other => panic!("expected armed completion, got {other:?}"),
        }
    }

    #[test]
    fn second_arming_is_suppressed_until_commit() {
        let (mut chart, lo, hi) = two_mode_chart();
        chart.add_transition(lo, hi, "true", Vec::new()).unwrap();
        let mut coord = ModeCoordinator::new(chart).unwrap();
        let scope = VariableScope::new();

        coord.fire(&scope).unwrap();
        let first = coord.postfire();
        assert!(matches!(
            first,
            IterationBoundary::Complete { armed: Some(_) }
        ));

        // Commit has not run; a new iteration may not arm again.
        coord.fire(&scope).unwrap();
        assert!(coord.transition_pending());
        let mut graph = DataflowGraph::new();
        let mut vars = VariableScope::new();
        let switch = coord.commit(&mut graph, &mut vars).unwrap().unwrap();
        assert_eq!(switch.from, lo);
        assert_eq!(switch.to, hi);
        assert!(!coord.transition_pending());
    }

    #[test]
    fn commit_rewrites_refinement_rates_and_runs_actions() {
        let mut graph = DataflowGraph::new();
        let a = graph.add_actor("modal");
        let out = graph.add_output_port(a, "out", 1, 0).unwrap();

        let mut chart = ModeChart::new();
        let lo = chart.add_mode(
            "Lo",
            vec![PortRate {
                port: out,
                kind: RateKind::Production,
                rate: 1,
            }],
        );
        let hi = chart.add_mode(
            "Hi",
            vec![PortRate {
                port: out,
                kind: RateKind::Production,
                rate: 2,
            }],
        );
        chart.set_initial(lo).unwrap();
        chart
            .add_transition(
                lo,
                hi,
                "true",
                vec![SetAction {
                    variable: "switched".to_owned(),
                    value: Token::Bool(true),
                }],
            )
            .unwrap();
        let mut coord = ModeCoordinator::new(chart).unwrap();

        let scope = VariableScope::new();
        coord.fire(&scope).unwrap();
        coord.postfire();

        let version_before = graph.version();
        let mut vars = VariableScope::new();
        coord.commit(&mut graph, &mut vars).unwrap();
        assert_eq!(graph.production_rate(out).unwrap(), 2);
        assert!(graph.version() > version_before);
        assert_eq!(vars.get("switched"), Some(Token::Bool(true)));
    }

    #[test]
    fn commit_without_armed_transition_is_a_noop() {
        let (mut chart, lo, hi) = two_mode_chart();
        chart.add_transition(lo, hi, "false", Vec::new()).unwrap();
        let mut coord = ModeCoordinator::new(chart).unwrap();
        let scope = VariableScope::new();
        coord.fire(&scope).unwrap();
        coord.postfire();
        let mut graph = DataflowGraph::new();
        let mut vars = VariableScope::new();
        assert_eq!(coord.commit(&mut graph, &mut vars).unwrap(), None);
        assert_eq!(coord.current_mode(), lo);
    }
}
