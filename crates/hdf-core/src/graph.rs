// SPDX-License-Identifier: Apache-2.0
//! Arena-backed dataflow graph with per-port rate declarations.
//!
//! Actors, ports, and channels live in append-only arenas addressed by the
//! handles in [`crate::ident`]. Every structural edit and every rate write
//! bumps a monotonically increasing version counter; derived caches (the
//! boundary-port list in [`crate::coordinator`]) compare against that
//! counter instead of carrying their own dirty flags.

// Arena indices are bounded well below u32::MAX by construction.
#![allow(clippy::cast_possible_truncation)]

use thiserror::Error;

use crate::ident::{ActorId, ChannelId, PortId};

/// Direction of a port relative to its owning actor.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PortDirection {
    /// Tokens flow into the actor; carries a consumption rate.
    Input,
    /// Tokens flow out of the actor; carries production and
    /// initial-production rates.
    Output,
}

/// Error returned by [`DataflowGraph`] mutation and lookup operations.
///
/// These are internal invariant violations (spec'd as programming errors):
/// a caller holding a stale or foreign handle must abort, not continue with
/// stale data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The actor handle does not name an actor in this graph.
    #[error("unknown actor handle {0:?}")]
    UnknownActor(ActorId),
    /// The port handle does not name a port in this graph.
    #[error("unknown port handle {0:?}")]
    UnknownPort(PortId),
    /// The channel handle does not name a channel in this graph.
    #[error("unknown channel handle {0:?}")]
    UnknownChannel(ChannelId),
    /// An input port was supplied where an output port is required.
    #[error("port {0:?} is an input port; an output port is required")]
    NotAnOutputPort(PortId),
    /// An output port was supplied where an input port is required.
    #[error("port {0:?} is an output port; an input port is required")]
    NotAnInputPort(PortId),
}

#[derive(Clone, Debug)]
struct ActorRecord {
    name: String,
    ports: Vec<PortId>,
}

#[derive(Clone, Debug)]
struct PortRecord {
    actor: ActorId,
    name: String,
    direction: PortDirection,
    /// Consumption rate (input ports; 0 on outputs).
    consumption: u32,
    /// Production rate (output ports; 0 on inputs).
    production: u32,
    /// Initial production (delay tokens emitted before the first firing;
    /// output ports only).
    init_production: u32,
}

#[derive(Clone, Debug)]
struct ChannelRecord {
    from: PortId,
    to: PortId,
    initial_tokens: u32,
}

/// Canonical enumeration of all rate-carrying boundary ports of a graph.
///
/// All input ports of all actors in arena order, then all output ports in
/// arena order. Rate signatures are computed over this enumeration, so its
/// order must be a pure function of graph structure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundaryPorts {
    /// Input ports in canonical order.
    pub inputs: Vec<PortId>,
    /// Output ports in canonical order.
    pub outputs: Vec<PortId>,
    /// Graph version this enumeration was collected at.
    pub version: u64,
}

impl BoundaryPorts {
    /// Collects the canonical boundary-port enumeration from `graph`.
    #[must_use]
    pub fn collect(graph: &DataflowGraph) -> Self {
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        for (id, port) in graph.ports.iter().enumerate() {
            let handle = PortId(id as u32);
            match port.direction {
                PortDirection::Input => inputs.push(handle),
                PortDirection::Output => outputs.push(handle),
            }
        }
        Self {
            inputs,
            outputs,
            version: graph.version,
        }
    }
}

/// In-memory dataflow graph: actor/port/channel arenas plus rate fields.
#[derive(Clone, Debug, Default)]
pub struct DataflowGraph {
    actors: Vec<ActorRecord>,
    ports: Vec<PortRecord>,
    channels: Vec<ChannelRecord>,
    version: u64,
}

impl DataflowGraph {
    /// Creates an empty graph at version 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current version. Bumped on every structural edit and rate write.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of actors in the arena.
    #[must_use]
    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    /// Number of channels in the arena.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Adds an actor and returns its handle.
    pub fn add_actor(&mut self, name: impl Into<String>) -> ActorId {
        let id = ActorId(self.actors.len() as u32);
        self.actors.push(ActorRecord {
            name: name.into(),
            ports: Vec::new(),
        });
        self.version += 1;
        id
    }

    /// Adds an input port with the given consumption rate.
    pub fn add_input_port(
        &mut self,
        actor: ActorId,
        name: impl Into<String>,
        consumption: u32,
    ) -> Result<PortId, GraphError> {
        self.add_port(actor, name.into(), PortDirection::Input, consumption, 0, 0)
    }

    /// Adds an output port with the given production and initial-production
    /// rates.
    pub fn add_output_port(
        &mut self,
        actor: ActorId,
        name: impl Into<String>,
        production: u32,
        init_production: u32,
    ) -> Result<PortId, GraphError> {
        self.add_port(
            actor,
            name.into(),
            PortDirection::Output,
            0,
            production,
            init_production,
        )
    }

    fn add_port(
        &mut self,
        actor: ActorId,
        name: String,
        direction: PortDirection,
        consumption: u32,
        production: u32,
        init_production: u32,
    ) -> Result<PortId, GraphError> {
        if actor.index() >= self.actors.len() {
            return Err(GraphError::UnknownActor(actor));
        }
        let id = PortId(self.ports.len() as u32);
        self.ports.push(PortRecord {
            actor,
            name,
            direction,
            consumption,
            production,
            init_production,
        });
        self.actors[actor.index()].ports.push(id);
        self.version += 1;
        Ok(id)
    }

    /// Connects an output port to an input port, with `initial_tokens`
    /// delay tokens resident on the channel before the first firing.
    pub fn connect(
        &mut self,
        from: PortId,
        to: PortId,
        initial_tokens: u32,
    ) -> Result<ChannelId, GraphError> {
        match self.port(from)?.direction {
            PortDirection::Output => {}
            PortDirection::Input => return Err(GraphError::NotAnOutputPort(from)),
        }
        match self.port(to)?.direction {
            PortDirection::Input => {}
            PortDirection::Output => return Err(GraphError::NotAnInputPort(to)),
        }
        let id = ChannelId(self.channels.len() as u32);
        self.channels.push(ChannelRecord {
            from,
            to,
            initial_tokens,
        });
        self.version += 1;
        Ok(id)
    }

    fn port(&self, id: PortId) -> Result<&PortRecord, GraphError> {
        self.ports.get(id.index()).ok_or(GraphError::UnknownPort(id))
    }

    fn port_mut(&mut self, id: PortId) -> Result<&mut PortRecord, GraphError> {
        self.ports
            .get_mut(id.index())
            .ok_or(GraphError::UnknownPort(id))
    }

    /// Actor name for diagnostics.
    pub fn actor_name(&self, id: ActorId) -> Result<&str, GraphError> {
        self.actors
            .get(id.index())
            .map(|a| a.name.as_str())
            .ok_or(GraphError::UnknownActor(id))
    }

    /// Port name for diagnostics.
    pub fn port_name(&self, id: PortId) -> Result<&str, GraphError> {
        self.port(id).map(|p| p.name.as_str())
    }

    /// Owning actor of a port.
    pub fn port_actor(&self, id: PortId) -> Result<ActorId, GraphError> {
        self.port(id).map(|p| p.actor)
    }

    /// Direction of a port.
    pub fn port_direction(&self, id: PortId) -> Result<PortDirection, GraphError> {
        self.port(id).map(|p| p.direction)
    }

    /// Consumption rate of an input port.
    pub fn consumption_rate(&self, id: PortId) -> Result<u32, GraphError> {
        let port = self.port(id)?;
        match port.direction {
            PortDirection::Input => Ok(port.consumption),
            PortDirection::Output => Err(GraphError::NotAnInputPort(id)),
        }
    }

    /// Production rate of an output port.
    pub fn production_rate(&self, id: PortId) -> Result<u32, GraphError> {
        let port = self.port(id)?;
        match port.direction {
            PortDirection::Output => Ok(port.production),
            PortDirection::Input => Err(GraphError::NotAnOutputPort(id)),
        }
    }

    /// Initial-production rate of an output port.
    pub fn init_production_rate(&self, id: PortId) -> Result<u32, GraphError> {
        let port = self.port(id)?;
        match port.direction {
            PortDirection::Output => Ok(port.init_production),
            PortDirection::Input => Err(GraphError::NotAnOutputPort(id)),
        }
    }

    /// Sets the consumption rate of an input port. Bumps the version.
    pub fn set_consumption_rate(&mut self, id: PortId, rate: u32) -> Result<(), GraphError> {
        let port = self.port_mut(id)?;
        match port.direction {
            PortDirection::Input => {
                port.consumption = rate;
                self.version += 1;
                Ok(())
            }
            PortDirection::Output => Err(GraphError::NotAnInputPort(id)),
        }
    }

    /// Sets the production rate of an output port. Bumps the version.
    pub fn set_production_rate(&mut self, id: PortId, rate: u32) -> Result<(), GraphError> {
        let port = self.port_mut(id)?;
        match port.direction {
            PortDirection::Output => {
                port.production = rate;
                self.version += 1;
                Ok(())
            }
            PortDirection::Input => Err(GraphError::NotAnOutputPort(id)),
        }
    }

    /// Sets the initial-production rate of an output port. Bumps the version.
    pub fn set_init_production_rate(&mut self, id: PortId, rate: u32) -> Result<(), GraphError> {
        let port = self.port_mut(id)?;
        match port.direction {
            PortDirection::Output => {
                port.init_production = rate;
                self.version += 1;
                Ok(())
            }
            PortDirection::Input => Err(GraphError::NotAnOutputPort(id)),
        }
    }

    /// Iterates actor handles in arena (deterministic) order.
    pub fn actors(&self) -> impl Iterator<Item = ActorId> + '_ {
        (0..self.actors.len()).map(|i| ActorId(i as u32))
    }

    /// Iterates the ports of one actor in declaration order.
    pub fn ports_of(&self, actor: ActorId) -> Result<impl Iterator<Item = PortId> + '_, GraphError> {
        self.actors
            .get(actor.index())
            .map(|a| a.ports.iter().copied())
            .ok_or(GraphError::UnknownActor(actor))
    }

    /// Iterates channel handles in arena order.
    pub fn channels(&self) -> impl Iterator<Item = ChannelId> + '_ {
        (0..self.channels.len()).map(|i| ChannelId(i as u32))
    }

    /// Producer port of a channel.
    pub fn channel_from(&self, id: ChannelId) -> Result<PortId, GraphError> {
        self.channel(id).map(|c| c.from)
    }

    /// Consumer port of a channel.
    pub fn channel_to(&self, id: ChannelId) -> Result<PortId, GraphError> {
        self.channel(id).map(|c| c.to)
    }

    /// Delay tokens resident on a channel before the first firing.
    pub fn channel_initial_tokens(&self, id: ChannelId) -> Result<u32, GraphError> {
        self.channel(id).map(|c| c.initial_tokens)
    }

    fn channel(&self, id: ChannelId) -> Result<&ChannelRecord, GraphError> {
        self.channels
            .get(id.index())
            .ok_or(GraphError::UnknownChannel(id))
    }

    /// Channels whose consumer port belongs to `actor`, in arena order.
    pub fn channels_into(&self, actor: ActorId) -> impl Iterator<Item = ChannelId> + '_ {
        self.channels
            .iter()
            .enumerate()
            .filter(move |(_, c)| self.ports[c.to.index()].actor == actor)
            .map(|(i, _)| ChannelId(i as u32))
    }

    /// Channels whose producer port belongs to `actor`, in arena order.
    pub fn channels_out_of(&self, actor: ActorId) -> impl Iterator<Item = ChannelId> + '_ {
        self.channels
            .iter()
            .enumerate()
            .filter(move |(_, c)| self.ports[c.from.index()].actor == actor)
            .map(|(i, _)| ChannelId(i as u32))
    }
}
