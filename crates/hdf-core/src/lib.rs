// SPDX-License-Identifier: Apache-2.0
//! hdf-core: heterochronous dataflow (HDF) scheduling core.
//!
//! HDF generalizes synchronous dataflow: actor port rates are
//! piecewise-constant, changing only when an embedded state machine
//! switches modes at iteration boundaries. This crate computes, caches,
//! and re-selects firing schedules for such graphs:
//!
//! - [`DataflowGraph`]: arena-backed actors/ports/channels with versioned
//!   rate declarations.
//! - [`RateSignature`]: the canonical encoding of all current rates, used
//!   as the schedule cache key.
//! - [`ScheduleCache`]: bounded LRU of signature → schedule with a
//!   most-recent fast path.
//! - [`SdfScheduler`]: balance-equation solver producing deterministic
//!   firing orders (behind the [`BalanceScheduler`] contract).
//! - [`ScheduleCoordinator`]: per-context validity tracking and cache
//!   delegation.
//! - [`ModeCoordinator`]: guarded mode transitions, chosen at the type-B
//!   firing boundary and committed through deferred change requests.
//! - [`InputHistoryTracker`]: bounded per-channel consumption history for
//!   guard evaluation.
//!
//! The host execution loop (iteration driver, change-queue drain) lives in
//! `hdf-harness`; this crate is pure in-memory graph and cache
//! manipulation with no I/O and no threads.
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
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

mod balance;
mod cache;
mod change;
mod config;
mod coordinator;
mod graph;
mod guard;
mod history;
mod ident;
mod modal;
mod schedule;
mod signature;
mod telemetry;
mod token;

// Re-exports for stable public API
/// Balance-equation solving: the solver contract and the SDF default.
pub use balance::{BalanceScheduler, SchedulingError, SdfScheduler};
/// LRU schedule cache and its counters.
pub use cache::{CacheStats, ScheduleCache, DEFAULT_CACHE_CAPACITY};
/// Deferred change requests and the queue drained by the host loop.
pub use change::{ChangeContext, ChangeError, ChangeQueue, ChangeRequest};
/// Configuration surface (cache bound, history window).
pub use config::HdfConfig;
/// Per-context schedule coordination.
pub use coordinator::{PostfireAction, ScheduleCoordinator};
/// Dataflow graph arena and boundary-port enumeration.
pub use graph::{BoundaryPorts, DataflowGraph, GraphError, PortDirection};
/// Guard expressions over named variables.
pub use guard::{Guard, GuardError, GuardParseError};
/// Bounded consumption history for guard evaluation.
pub use history::{InputHistoryTracker, DEFAULT_HISTORY_SIZE};
/// Arena handles for graph and chart entities.
pub use ident::{ActorId, ChannelId, ModeId, PortId, TransitionId};
/// Mode charts, transition coordination, and commit outcomes.
pub use modal::{
    IterationBoundary, ModeChart, ModeChartError, ModeCoordinator, ModeSwitch, PortRate,
    SetAction, TransitionError,
};
/// Immutable firing schedules.
pub use schedule::{Firing, Schedule};
/// Rate signatures: canonical cache keys over current port rates.
pub use signature::{RateKind, RateSignature};
/// Token values and the guard-variable scope.
pub use token::{Token, VariableScope};
