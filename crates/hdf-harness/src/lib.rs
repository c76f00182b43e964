// SPDX-License-Identifier: Apache-2.0
//! hdf-harness: host execution engine for the HDF scheduling core.
//!
//! The scheduling core is deliberately host-agnostic: it never runs a loop
//! of its own. This crate supplies the loop — a [`Manager`] that drains the
//! change-request queue at iteration boundaries, asks the coordinator for a
//! schedule, executes firings against in-memory channel buffers, and wires
//! the mode controller's two-phase transition protocol through the queue.
//! Scripted [`ActorBehavior`] implementations stand in for a real actor
//! library; this is a test and demo harness, not a production engine.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]
// Rates are u32 and fit usize on every supported target.
#![allow(clippy::cast_possible_truncation)]

use std::cell::Cell;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use thiserror::Error;

use hdf_core::{
    ActorId, BalanceScheduler, ChangeContext, ChangeError, ChangeQueue, ChangeRequest, ChannelId,
    DataflowGraph, GraphError, HdfConfig, InputHistoryTracker, IterationBoundary, ModeChartError,
    ModeCoordinator, PortDirection, PortId, Schedule, ScheduleCoordinator, SchedulingError,
    SdfScheduler, Token, TransitionError, VariableScope,
};

/// Failure surfaced by the host loop.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The current rate configuration is not schedulable.
    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
    /// A queued change request failed.
    #[error(transparent)]
    Change(#[from] ChangeError),
    /// Graph access failed (stale handle).
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// Transition choice failed (ambiguous guards, guard evaluation).
    #[error(transparent)]
    Transition(#[from] TransitionError),
    /// Mode chart misconfiguration.
    #[error(transparent)]
    Chart(#[from] ModeChartError),
    /// A firing consumed from a channel with too few tokens. With a valid
    /// schedule this cannot happen; it indicates a behavior that lied
    /// about its rates.
    #[error("token underflow on channel c{}", .channel.0)]
    TokenUnderflow {
        /// Starved channel.
        channel: ChannelId,
    },
    /// A behavior produced a token count different from its port's
    /// declared production rate.
    #[error("actor '{actor}' produced {got} tokens on port p{} (declared rate {expected})", .port.0)]
    RateViolation {
        /// Offending actor name.
        actor: String,
        /// Output port.
        port: PortId,
        /// Declared production rate.
        expected: u32,
        /// Tokens actually produced.
        got: usize,
    },
    /// No behavior was registered for a scheduled actor.
    #[error("no behavior registered for actor '{actor}'")]
    MissingBehavior {
        /// Actor name.
        actor: String,
    },
}

/// Read-only view handed to a behavior for one firing.
pub struct FiringContext<'a> {
    /// The firing actor.
    pub actor: ActorId,
    /// Tokens consumed this firing, per input port (channel-major order).
    pub consumed: &'a BTreeMap<PortId, Vec<Token>>,
    /// Declared production rate per output port.
    pub output_rates: &'a BTreeMap<PortId, u32>,
}

/// A scripted actor: consumes what the manager hands it, returns what each
/// output port should emit this firing (exactly the declared rate).
pub trait ActorBehavior {
    /// Executes one firing.
    fn fire(
        &mut self,
        ctx: &FiringContext<'_>,
    ) -> Result<BTreeMap<PortId, Vec<Token>>, HarnessError>;
}

/// Source emitting sequential integers on every output port.
#[derive(Debug, Default)]
pub struct Counter {
    next: i64,
}

impl ActorBehavior for Counter {
    fn fire(
        &mut self,
        ctx: &FiringContext<'_>,
    ) -> Result<BTreeMap<PortId, Vec<Token>>, HarnessError> {
        let mut out = BTreeMap::new();
        for (&port, &rate) in ctx.output_rates {
            let mut tokens = Vec::with_capacity(rate as usize);
            for _ in 0..rate {
                tokens.push(Token::Int(self.next));
                self.next += 1;
            }
            out.insert(port, tokens);
        }
        Ok(out)
    }
}

/// Emits, on every output port, `rate` copies of the most recently
/// consumed token (`0` before anything arrives). The default refinement
/// stand-in for mode-switching composites.
#[derive(Debug)]
pub struct Repeat {
    last: Token,
}

impl Default for Repeat {
    fn default() -> Self {
        Self {
            last: Token::Int(0),
        }
    }
}

impl ActorBehavior for Repeat {
    fn fire(
        &mut self,
        ctx: &FiringContext<'_>,
    ) -> Result<BTreeMap<PortId, Vec<Token>>, HarnessError> {
        if let Some(token) = ctx.consumed.values().flatten().last() {
            self.last = *token;
        }
        let mut out = BTreeMap::new();
        for (&port, &rate) in ctx.output_rates {
            out.insert(port, vec![self.last; rate as usize]);
        }
        Ok(out)
    }
}

/// Sink recording everything it consumes.
#[derive(Debug, Default)]
pub struct Recorder {
    consumed: Vec<Token>,
}

impl Recorder {
    /// Tokens consumed so far, in consumption order.
    #[must_use]
    pub fn consumed(&self) -> &[Token] {
        &self.consumed
    }
}

impl ActorBehavior for Recorder {
    fn fire(
        &mut self,
        ctx: &FiringContext<'_>,
    ) -> Result<BTreeMap<PortId, Vec<Token>>, HarnessError> {
        for tokens in ctx.consumed.values() {
            self.consumed.extend_from_slice(tokens);
        }
        Ok(BTreeMap::new())
    }
}

/// Balance scheduler wrapper counting solver invocations, so tests can
/// assert cache behavior end to end.
#[derive(Debug, Default)]
pub struct CountingScheduler {
    inner: SdfScheduler,
    computes: Cell<u64>,
}

impl CountingScheduler {
    /// Solver invocations so far.
    #[must_use]
    pub fn computes(&self) -> u64 {
        self.computes.get()
    }
}

impl BalanceScheduler for CountingScheduler {
    fn compute_schedule(&self, graph: &DataflowGraph) -> Result<Schedule, SchedulingError> {
        self.computes.set(self.computes.get() + 1);
        self.inner.compute_schedule(graph)
    }
}

/// In-memory token queues, one per channel.
#[derive(Debug, Default)]
pub struct ChannelBuffers {
    queues: Vec<VecDeque<Token>>,
}

impl ChannelBuffers {
    /// Resets the buffers to the graph's initial-token state.
    ///
    /// Delay tokens (channel initial tokens plus the producer's declared
    /// initial production) materialize as integer zeros.
    pub fn prime(&mut self, graph: &DataflowGraph) -> Result<(), GraphError> {
        self.queues.clear();
        for channel in graph.channels() {
            let from = graph.channel_from(channel)?;
            let count =
                graph.channel_initial_tokens(channel)? + graph.init_production_rate(from)?;
            let mut queue = VecDeque::new();
            for _ in 0..count {
                queue.push_back(Token::Int(0));
            }
            self.queues.push(queue);
        }
        Ok(())
    }

    /// Tokens currently resident on a channel.
    #[must_use]
    pub fn depth(&self, channel: ChannelId) -> usize {
        self.queues.get(channel.index()).map_or(0, VecDeque::len)
    }

    fn pop(&mut self, channel: ChannelId) -> Result<Token, HarnessError> {
        self.queues
            .get_mut(channel.index())
            .and_then(VecDeque::pop_front)
            .ok_or(HarnessError::TokenUnderflow { channel })
    }

    fn push(&mut self, channel: ChannelId, token: Token) {
        if let Some(queue) = self.queues.get_mut(channel.index()) {
            queue.push_back(token);
        }
    }
}

/// The mode-switching controller attached to one actor of the graph.
#[derive(Debug)]
pub struct ModalActor {
    /// The graph actor whose boundary rates the active mode determines.
    pub actor: ActorId,
    /// Transition coordination state.
    pub coordinator: ModeCoordinator,
    /// Consumption history feeding guard variables.
    pub history: InputHistoryTracker,
    firing_index: u32,
}

impl ModalActor {
    /// Wraps a mode coordinator around a graph actor.
    #[must_use]
    pub fn new(actor: ActorId, coordinator: ModeCoordinator, config: &HdfConfig) -> Self {
        Self {
            actor,
            coordinator,
            history: InputHistoryTracker::new(config.token_history_size),
            firing_index: 0,
        }
    }
}

/// Everything the change requests mutate: graph, coordinators, buffers,
/// behaviors, and the guard-variable scope.
pub struct HdfModel {
    /// The dataflow graph under execution.
    pub graph: DataflowGraph,
    /// Outermost schedule coordinator.
    pub coordinator: ScheduleCoordinator,
    /// Balance scheduler (counting wrapper for test assertions).
    pub scheduler: CountingScheduler,
    /// Channel token queues.
    pub buffers: ChannelBuffers,
    /// Behavior per actor.
    pub behaviors: BTreeMap<ActorId, Box<dyn ActorBehavior>>,
    /// Optional mode-switching controller.
    pub modal: Option<ModalActor>,
    /// Guard-variable scope.
    pub scope: VariableScope,
}

impl HdfModel {
    /// Builds a model around a graph with the given configuration.
    #[must_use]
    pub fn new(graph: DataflowGraph, config: &HdfConfig) -> Self {
        Self {
            graph,
            coordinator: ScheduleCoordinator::new(config, true),
            scheduler: CountingScheduler::default(),
            buffers: ChannelBuffers::default(),
            behaviors: BTreeMap::new(),
            modal: None,
            scope: VariableScope::new(),
        }
    }

    /// Registers the behavior executed when `actor` fires.
    pub fn set_behavior(&mut self, actor: ActorId, behavior: impl ActorBehavior + 'static) {
        self.behaviors.insert(actor, Box::new(behavior));
    }

    fn refresh_schedule(&mut self) -> Result<(), ChangeError> {
        self.coordinator
            .get_schedule(&self.graph, &self.scheduler)
            .map(|_| ())
            .map_err(ChangeError::from)
    }
}

/// Summary of one completed iteration.
#[derive(Debug)]
pub struct IterationReport {
    /// Schedule executed this iteration.
    pub schedule: Arc<Schedule>,
    /// Active mode name during the iteration, when a controller exists.
    pub mode: Option<String>,
}

/// The execution manager: owns the change queue and drives iterations.
///
/// Known gap, preserved deliberately: a refinement signalling termination
/// from its postfire is not specially handled — the loop keeps iterating
/// until the caller stops it.
pub struct Manager {
    model: HdfModel,
    queue: ChangeQueue<HdfModel>,
}

impl Manager {
    /// Wraps a model for execution.
    #[must_use]
    pub fn new(model: HdfModel) -> Self {
        Self {
            model,
            queue: ChangeQueue::new(),
        }
    }

    /// Shared access to the model between iterations.
    #[must_use]
    pub fn model(&self) -> &HdfModel {
        &self.model
    }

    /// Mutable access to the model between iterations.
    pub fn model_mut(&mut self) -> &mut HdfModel {
        &mut self.model
    }

    /// Start-of-run protocol: clears the schedule cache, resets the mode
    /// controller to its initial mode (propagating that mode's rates into
    /// the graph), clears history, and primes channel buffers.
    pub fn preinitialize(&mut self) -> Result<(), HarnessError> {
        self.model.coordinator.preinitialize();
        if let Some(modal) = &mut self.model.modal {
            modal.coordinator.reinitialize()?;
            modal.coordinator.apply_current_rates(&mut self.model.graph)?;
            modal.history.clear();
            modal.firing_index = 0;
        }
        self.model.buffers.prime(&self.model.graph)?;
        self.model.scope.clear();
        Ok(())
    }

    /// Runs one global iteration.
    ///
    /// Order matters and follows the cooperative contract: drain the
    /// change queue (commits from last iteration execute here, before any
    /// schedule is requested), get the schedule, execute firings, then run
    /// the postfire protocol (deferring recomputation through the queue
    /// when required).
    pub fn iterate(&mut self) -> Result<IterationReport, HarnessError> {
        self.queue.drain(&mut self.model)?;

        let schedule = self
            .model
            .coordinator
            .get_schedule(&self.model.graph, &self.model.scheduler)?;

        let mode = if let Some(modal) = &mut self.model.modal {
            modal
                .coordinator
                .set_firings_per_iteration(schedule.firings_of(modal.actor));
            modal.firing_index = 0;
            Some(modal.coordinator.current_mode_name().to_owned())
        } else {
            None
        };

        for firing in schedule.firings() {
            for _ in 0..firing.count {
                self.fire_actor(firing.actor)?;
            }
        }

        if self.model.coordinator.postfire() == hdf_core::PostfireAction::DeferRecompute {
            self.queue.request_change(ChangeRequest::new(
                "recompute schedule",
                HdfModel::refresh_schedule,
            ));
        }

        Ok(IterationReport { schedule, mode })
    }

    fn fire_actor(&mut self, actor: ActorId) -> Result<(), HarnessError> {
        let model = &mut self.model;
        let graph = &model.graph;
        let is_modal = model.modal.as_ref().is_some_and(|m| m.actor == actor);

        // Consume inputs channel by channel, recording history for the
        // modal actor as each token is drawn.
        let mut consumed: BTreeMap<PortId, Vec<Token>> = BTreeMap::new();
        let mut output_rates: BTreeMap<PortId, u32> = BTreeMap::new();
        let ports: Vec<PortId> = graph.ports_of(actor)?.collect();
        for port in ports {
            match graph.port_direction(port)? {
                PortDirection::Input => {
                    let rate = graph.consumption_rate(port)?;
                    let channels: Vec<ChannelId> = graph
                        .channels_into(actor)
                        .filter(|&c| graph.channel_to(c) == Ok(port))
                        .collect();
                    let mut tokens = Vec::new();
                    for (channel_ordinal, channel) in channels.iter().enumerate() {
                        for k in 0..rate {
                            let token = model.buffers.pop(*channel)?;
                            if let Some(modal) = &mut model.modal {
                                if is_modal {
                                    modal.history.record_consumption(
                                        port,
                                        u32::try_from(channel_ordinal).unwrap_or(u32::MAX),
                                        token,
                                        rate,
                                        modal.firing_index,
                                        modal.coordinator.firings_per_iteration(),
                                        k,
                                    );
                                }
                            }
                            tokens.push(token);
                        }
                    }
                    consumed.insert(port, tokens);
                }
                PortDirection::Output => {
                    output_rates.insert(port, graph.production_rate(port)?);
                }
            }
        }

        let ctx = FiringContext {
            actor,
            consumed: &consumed,
            output_rates: &output_rates,
        };
        let behavior = model
            .behaviors
            .get_mut(&actor)
            .ok_or_else(|| HarnessError::MissingBehavior {
                actor: model.graph.actor_name(actor).unwrap_or("?").to_owned(),
            })?;
        let produced = behavior.fire(&ctx)?;

        for (&port, &rate) in &output_rates {
            let tokens = produced.get(&port).map_or(&[] as &[Token], Vec::as_slice);
            if tokens.len() != rate as usize {
                return Err(HarnessError::RateViolation {
                    actor: model.graph.actor_name(actor).unwrap_or("?").to_owned(),
                    port,
                    expected: rate,
                    got: tokens.len(),
                });
            }
            let channels: Vec<ChannelId> = model
                .graph
                .channels_out_of(actor)
                .filter(|&c| model.graph.channel_from(c) == Ok(port))
                .collect();
            for channel in channels {
                for token in tokens {
                    model.buffers.push(channel, *token);
                }
            }
        }

        if is_modal {
            self.modal_postfire(&consumed)?;
        }
        Ok(())
    }

    /// Controller bookkeeping after a modal-actor firing: republish guard
    /// variables, evaluate at the type-B boundary, and enqueue the
    /// deferred commit when a transition was armed.
    fn modal_postfire(
        &mut self,
        consumed: &BTreeMap<PortId, Vec<Token>>,
    ) -> Result<(), HarnessError> {
        let model = &mut self.model;
        let Some(modal) = &mut model.modal else {
            return Ok(());
        };

        for &port in consumed.keys() {
            let base = model.graph.port_name(port)?.to_owned();
            modal.history.publish_channel(port, 0, &base, &mut model.scope);
        }

        modal.coordinator.fire(&model.scope)?;
        let boundary = modal.coordinator.postfire();
        modal.firing_index += 1;

        if let IterationBoundary::Complete { armed: Some(_) } = boundary {
            self.queue
                .request_change(ChangeRequest::new("commit mode transition", |m: &mut HdfModel| {
                    let Some(modal) = &mut m.modal else {
                        return Ok(());
                    };
                    let switch = modal.coordinator.commit(&mut m.graph, &mut m.scope)?;
                    if switch.is_some() {
                        m.coordinator.invalidate_schedule();
                    }
                    Ok(())
                }));
        }
        Ok(())
    }
}
