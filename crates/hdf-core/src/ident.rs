// SPDX-License-Identifier: Apache-2.0
//! Arena handle types for graph and mode-chart entities.
//!
//! Actors, ports, channels, modes, and transitions all live in arenas owned
//! by [`crate::graph::DataflowGraph`] or [`crate::modal::ModeChart`] and
//! reference each other through these index handles, never through direct
//! object references. This keeps the (cyclic) actor/port/channel topology
//! representable without ownership cycles.

/// Strongly typed handle for an actor in the dataflow graph arena.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ActorId(pub u32);

impl ActorId {
    /// Returns the arena index backing this handle.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Strongly typed handle for a port in the dataflow graph arena.
///
/// A `PortId` is graph-global, not actor-relative: two ports on different
/// actors never share a handle. Rate signatures are keyed on these handles,
/// so their stability across unchanged graphs matters (the arena never
/// reuses indices).
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortId(pub u32);

impl PortId {
    /// Returns the arena index backing this handle.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Strongly typed handle for a channel (producer port → consumer port edge).
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelId(pub u32);

impl ChannelId {
    /// Returns the arena index backing this handle.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Strongly typed handle for a mode (state) in a mode chart.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModeId(pub u32);

impl ModeId {
    /// Returns the arena index backing this handle.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Strongly typed handle for a guarded transition in a mode chart.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransitionId(pub u32);

impl TransitionId {
    /// Returns the arena index backing this handle.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}
