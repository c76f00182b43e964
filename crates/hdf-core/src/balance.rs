// SPDX-License-Identifier: Apache-2.0
//! Balance-equation scheduling: the solver contract and the default SDF
//! implementation.
//!
//! The firing vector is the least positive integer solution of the balance
//! equations `firings(producer) · production = firings(consumer) ·
//! consumption` over every channel. The solution is found by propagating
//! fractional firing ratios across the connection graph, normalizing by the
//! LCM of the denominators, then ordering firings by simulating channel
//! token counts until every actor has fired its full count.

use thiserror::Error;

use crate::graph::{BoundaryPorts, DataflowGraph, GraphError};
use crate::ident::{ActorId, ChannelId};
use crate::schedule::{Firing, Schedule};
use crate::signature::RateSignature;

/// Fatal scheduling failure for the current rate configuration.
///
/// Never retried internally and never cached; the caller decides whether to
/// halt the run. Messages name the offending signature or entity because
/// inconsistent rates are the most common authoring mistake.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulingError {
    /// No integer solution to the balance equations exists.
    #[error("inconsistent rates on channel c{}: no integer balance solution for {signature}", channel.0)]
    InconsistentRates {
        /// Channel whose constraint contradicted the propagated firing ratio.
        channel: ChannelId,
        /// Rate signature the failure was computed for.
        signature: RateSignature,
    },
    /// The graph is not fully connected; actors unreachable from the first
    /// actor have no determined firing count.
    #[error("graph is disconnected: actor '{actor_name}' is unreachable from the first actor")]
    Disconnected {
        /// An unreachable actor, for the diagnostic.
        actor_name: String,
    },
    /// Token simulation stalled before all firings completed: a delay-free
    /// cycle.
    #[error("deadlock (delay-free cycle): no actor can fire for {signature}")]
    Deadlock {
        /// Rate signature the failure was computed for.
        signature: RateSignature,
    },
    /// The normalized firing vector overflowed the firing-count type.
    #[error("firing count overflow for actor '{actor_name}'")]
    RepetitionOverflow {
        /// Actor whose repetition count overflowed.
        actor_name: String,
    },
    /// Internal bookkeeping failure (stale handle, rate on wrong port kind).
    #[error("internal graph error during scheduling: {0}")]
    Graph(#[from] GraphError),
}

/// The "compute a schedule for current rates" contract.
///
/// Callable repeatedly; each call must reflect only the rates current at
/// call time, and repeated calls for the same rates must yield an identical
/// firing order (downstream firing counts and history slots depend on it).
pub trait BalanceScheduler {
    /// Computes a valid static firing order for the graph's current rates.
    fn compute_schedule(&self, graph: &DataflowGraph) -> Result<Schedule, SchedulingError>;
}

/// Default solver implementing classic SDF balance-equation scheduling.
#[derive(Debug, Clone, Copy, Default)]
pub struct SdfScheduler;

impl BalanceScheduler for SdfScheduler {
    fn compute_schedule(&self, graph: &DataflowGraph) -> Result<Schedule, SchedulingError> {
        if graph.actor_count() == 0 {
            return Ok(Schedule::default());
        }
        let repetitions = solve_balance_equations(graph)?;
        order_firings(graph, &repetitions)
    }
}

/// Exact rational with a reduced, positive denominator.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct Fraction {
    num: i64,
    den: i64,
}

impl Fraction {
    fn new(num: i64, den: i64) -> Self {
        let g = gcd(num.unsigned_abs(), den.unsigned_abs()).max(1);
        #[allow(clippy::cast_possible_wrap)]
        let g = g as i64;
        Self {
            num: num / g,
            den: den / g,
        }
    }

    fn multiply(self, other: Self) -> Self {
        Self::new(self.num * other.num, self.den * other.den)
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

fn lcm(a: u64, b: u64) -> u64 {
    if a == 0 || b == 0 {
        return 0;
    }
    a / gcd(a, b) * b
}

fn signature_of(graph: &DataflowGraph) -> Result<RateSignature, GraphError> {
    RateSignature::compute(graph, &BoundaryPorts::collect(graph))
}

/// Solves the balance equations, returning one repetition count per actor.
///
/// Fraction propagation in the style of the classic SDF algorithm: pin the
/// first actor's firing ratio at 1, breadth-first propagate `ratio ·
/// production / consumption` across channels, reject contradictions, then
/// scale by the LCM of the denominators.
fn solve_balance_equations(graph: &DataflowGraph) -> Result<Vec<u32>, SchedulingError> {
    let actor_count = graph.actor_count();
    let mut firings: Vec<Option<Fraction>> = vec![None; actor_count];
    firings[0] = Some(Fraction::new(1, 1));
    let mut frontier = vec![ActorId(0)];

    while let Some(actor) = frontier.pop() {
        // Invariant: actors on the frontier always have a ratio assigned.
        let current = match firings[actor.index()] {
            Some(f) => f,
            None => continue,
        };
        for channel in graph
            .channels_out_of(actor)
            .chain(graph.channels_into(actor))
            .collect::<Vec<_>>()
        {
            let from = graph.channel_from(channel)?;
            let to = graph.channel_to(channel)?;
            let production = graph.production_rate(from)?;
            let consumption = graph.consumption_rate(to)?;
            let producer = graph.port_actor(from)?;
            let consumer = graph.port_actor(to)?;

            // A zero rate on only one end can never balance a nonzero one.
            if (production == 0) != (consumption == 0) {
                return Err(SchedulingError::InconsistentRates {
                    channel,
                    signature: signature_of(graph)?,
                });
            }
            if production == 0 && consumption == 0 {
                continue;
            }

            let (known, unknown, ratio) = if producer == actor {
                let ratio = current.multiply(Fraction::new(
                    i64::from(production),
                    i64::from(consumption),
                ));
                (producer, consumer, ratio)
            } else {
                let ratio = current.multiply(Fraction::new(
                    i64::from(consumption),
                    i64::from(production),
                ));
                (consumer, producer, ratio)
            };
            debug_assert_eq!(known, actor);

            match firings[unknown.index()] {
                None => {
                    firings[unknown.index()] = Some(ratio);
                    frontier.push(unknown);
                }
                Some(existing) if existing != ratio => {
                    return Err(SchedulingError::InconsistentRates {
                        channel,
                        signature: signature_of(graph)?,
                    });
                }
                Some(_) => {}
            }
        }
    }

    let mut denominator_lcm: u64 = 1;
    for (index, fraction) in firings.iter().enumerate() {
        match fraction {
            None => {
                #[allow(clippy::cast_possible_truncation)]
                let actor = ActorId(index as u32);
                return Err(SchedulingError::Disconnected {
                    actor_name: graph.actor_name(actor)?.to_owned(),
                });
            }
            Some(f) => denominator_lcm = lcm(denominator_lcm, f.den.unsigned_abs()),
        }
    }

    let mut repetitions = Vec::with_capacity(actor_count);
    for (index, fraction) in firings.iter().enumerate() {
        // Unreachable actors were rejected above.
        let f = fraction.unwrap_or(Fraction { num: 0, den: 1 });
        #[allow(clippy::cast_possible_wrap)]
        let scaled = f.num * (denominator_lcm as i64) / f.den;
        let count = u32::try_from(scaled).map_err(|_| {
            #[allow(clippy::cast_possible_truncation)]
            let actor = ActorId(index as u32);
            SchedulingError::RepetitionOverflow {
                actor_name: graph
                    .actor_name(actor)
                    .map(str::to_owned)
                    .unwrap_or_default(),
            }
        })?;
        repetitions.push(count);
    }
    Ok(repetitions)
}

/// Orders firings by token-count simulation (the PASS construction).
///
/// Scans actors in arena order; a runnable actor fires as many consecutive
/// times as its inputs allow, capped by its remaining repetition count. A
/// full scan with no progress is a deadlock.
fn order_firings(
    graph: &DataflowGraph,
    repetitions: &[u32],
) -> Result<Schedule, SchedulingError> {
    let mut remaining: Vec<u32> = repetitions.to_vec();
    let mut tokens: Vec<u64> = Vec::with_capacity(graph.channel_count());
    for channel in graph.channels() {
        let from = graph.channel_from(channel)?;
        let initial = u64::from(graph.channel_initial_tokens(channel)?)
            + u64::from(graph.init_production_rate(from)?);
        tokens.push(initial);
    }

    let mut firings = Vec::new();
    let mut outstanding: u64 = remaining.iter().map(|&r| u64::from(r)).sum();
    while outstanding > 0 {
        let mut progressed = false;
        for actor in graph.actors() {
            if remaining[actor.index()] == 0 {
                continue;
            }
            let runnable = max_consecutive_firings(graph, actor, &tokens)?
                .min(u64::from(remaining[actor.index()]));
            if runnable == 0 {
                continue;
            }
            #[allow(clippy::cast_possible_truncation)]
            let count = runnable as u32;
            apply_firings(graph, actor, count, &mut tokens)?;
            remaining[actor.index()] -= count;
            outstanding -= u64::from(count);
            firings.push(Firing { actor, count });
            progressed = true;
        }
        if !progressed {
            return Err(SchedulingError::Deadlock {
                signature: signature_of(graph)?,
            });
        }
    }
    Ok(Schedule::new(firings))
}

/// How many back-to-back firings of `actor` the current channel tokens allow.
fn max_consecutive_firings(
    graph: &DataflowGraph,
    actor: ActorId,
    tokens: &[u64],
) -> Result<u64, SchedulingError> {
    let mut bound = u64::MAX;
    for channel in graph.channels_into(actor) {
        let to = graph.channel_to(channel)?;
        let rate = u64::from(graph.consumption_rate(to)?);
        if rate == 0 {
            continue;
        }
        bound = bound.min(tokens[channel.index()] / rate);
        if bound == 0 {
            return Ok(0);
        }
    }
    Ok(bound)
}

fn apply_firings(
    graph: &DataflowGraph,
    actor: ActorId,
    count: u32,
    tokens: &mut [u64],
) -> Result<(), SchedulingError> {
    for channel in graph.channels_into(actor) {
        let to = graph.channel_to(channel)?;
        let consumed = u64::from(graph.consumption_rate(to)?) * u64::from(count);
        tokens[channel.index()] -= consumed;
    }
    for channel in graph.channels_out_of(actor) {
        let from = graph.channel_from(channel)?;
        let produced = u64::from(graph.production_rate(from)?) * u64::from(count);
        tokens[channel.index()] += produced;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use crate::graph::DataflowGraph;

    fn chain(production: u32, consumption: u32) -> DataflowGraph {
        let mut g = DataflowGraph::new();
        let a = g.add_actor("a");
        let b = g.add_actor("b");
        let out = g.add_output_port(a, "out", production, 0).unwrap();
        let inp = g.add_input_port(b, "in", consumption).unwrap();
        g.connect(out, inp, 0).unwrap();
        g
    }

    #[test]
    fn two_actor_chain_balances() {
        // a produces 2, b consumes 3: fire a 3 times, b 2 times.
        let g = chain(2, 3);
        let s = SdfScheduler.compute_schedule(&g).unwrap();
        assert_eq!(s.firings_of(ActorId(0)), 3);
        assert_eq!(s.firings_of(ActorId(1)), 2);
        // a must fire before b can: first record is a.
        assert_eq!(s.firings()[0].actor, ActorId(0));
    }

    #[test]
    fn schedule_is_deterministic_across_recomputation() {
        let mut g = DataflowGraph::new();
        let a = g.add_actor("a");
        let b = g.add_actor("b");
        let c = g.add_actor("c");
        let a_out = g.add_output_port(a, "out", 3, 0).unwrap();
        let b_in = g.add_input_port(b, "in", 2).unwrap();
        let b_out = g.add_output_port(b, "out", 1, 0).unwrap();
        let c_in = g.add_input_port(c, "in", 3).unwrap();
        g.connect(a_out, b_in, 0).unwrap();
        g.connect(b_out, c_in, 0).unwrap();

        let first = SdfScheduler.compute_schedule(&g).unwrap();
        let second = SdfScheduler.compute_schedule(&g).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn inconsistent_cycle_is_rejected() {
        // a -> b with 2:3 and b -> a with 1:1 cannot balance.
        let mut g = DataflowGraph::new();
        let a = g.add_actor("a");
        let b = g.add_actor("b");
        let a_out = g.add_output_port(a, "out", 2, 0).unwrap();
        let b_in = g.add_input_port(b, "in", 3).unwrap();
        let b_out = g.add_output_port(b, "out", 1, 0).unwrap();
        let a_in = g.add_input_port(a, "in", 1).unwrap();
        g.connect(a_out, b_in, 0).unwrap();
        g.connect(b_out, a_in, 0).unwrap();

        match SdfScheduler.compute_schedule(&g) {
            Err(SchedulingError::InconsistentRates { .. }) => {}
            other => panic!("expected InconsistentRates, got {other:?}"),
        }
    }

    #[test]
    fn delay_free_cycle_deadlocks() {
        // Balanced 1:1 cycle with no delay tokens anywhere.
        let mut g = DataflowGraph::new();
        let a = g.add_actor("a");
        let b = g.add_actor("b");
        let a_out = g.add_output_port(a, "out", 1, 0).unwrap();
        let a_in = g.add_input_port(a, "in", 1).unwrap();
        let b_out = g.add_output_port(b, "out", 1, 0).unwrap();
        let b_in = g.add_input_port(b, "in", 1).unwrap();
        g.connect(a_out, b_in, 0).unwrap();
        g.connect(b_out, a_in, 0).unwrap();

        match SdfScheduler.compute_schedule(&g) {
            Err(SchedulingError::Deadlock { .. }) => {}
            other => panic!("expected Deadlock, got {other:?}"),
        }
    }

    #[test]
    fn delay_token_breaks_the_cycle() {
        let mut g = DataflowGraph::new();
        let a = g.add_actor("a");
        let b = g.add_actor("b");
        let a_out = g.add_output_port(a, "out", 1, 0).unwrap();
        let a_in = g.add_input_port(a, "in", 1).unwrap();
        let b_out = g.add_output_port(b, "out", 1, 0).unwrap();
        let b_in = g.add_input_port(b, "in", 1).unwrap();
        g.connect(a_out, b_in, 0).unwrap();
        g.connect(b_out, a_in, 1).unwrap();

        let s = SdfScheduler.compute_schedule(&g).unwrap();
        assert_eq!(s.firings_of(a), 1);
        assert_eq!(s.firings_of(b), 1);
    }

    #[test]
    fn disconnected_graph_is_rejected() {
        let mut g = chain(1, 1);
        g.add_actor("island");
        match SdfScheduler.compute_schedule(&g) {
            Err(SchedulingError::Disconnected { actor_name }) => {
                assert_eq!(actor_name, "island");
            }
            other => panic!("expected Disconnected, got {other:?}"),
        }
    }

    #[test]
    fn empty_graph_yields_empty_schedule() {
        let g = DataflowGraph::new();
        let s = SdfScheduler.compute_schedule(&g).unwrap();
        assert!(s.is_empty());
    }

    #[test]
    fn initial_production_counts_as_delay() {
        // a's output declares one init token; a 1:1 cycle through b becomes
        // schedulable without explicit channel delay.
        let mut g = DataflowGraph::new();
        let a = g.add_actor("a");
        let b = g.add_actor("b");
        let a_out = g.add_output_port(a, "out", 1, 1).unwrap();
        let a_in = g.add_input_port(a, "in", 1).unwrap();
        let b_out = g.add_output_port(b, "out", 1, 0).unwrap();
        let b_in = g.add_input_port(b, "in", 1).unwrap();
        g.connect(a_out, b_in, 0).unwrap();
        g.connect(b_out, a_in, 0).unwrap();

        let s = SdfScheduler.compute_schedule(&g).unwrap();
        assert_eq!(s.total_firings(), 2);
    }
}
