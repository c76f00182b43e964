// SPDX-License-Identifier: Apache-2.0
//! Rate signatures: the cache key derived from current port rates.
//!
//! A signature is the ordered sequence of `(port, kind, rate)` tuples over
//! the canonical boundary-port enumeration. Equality and hashing operate on
//! the structured tuples themselves, never on a concatenated string, so two
//! different rate assignments cannot collide (rates `[1, 23]` and `[12, 3]`
//! encode as distinct tuple sequences).

use std::fmt;

use blake3::Hasher;

use crate::graph::{BoundaryPorts, DataflowGraph};
use crate::ident::PortId;

/// Which rate attribute a signature entry records.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RateKind {
    /// Tokens consumed per firing (input ports).
    Consumption,
    /// Tokens produced per firing (output ports).
    Production,
    /// Delay tokens produced before the first firing (output ports).
    InitProduction,
}

impl RateKind {
    fn tag(self) -> u8 {
        match self {
            Self::Consumption => 0,
            Self::Production => 1,
            Self::InitProduction => 2,
        }
    }
}

impl fmt::Display for RateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Consumption => "consume",
            Self::Production => "produce",
            Self::InitProduction => "init",
        };
        f.write_str(label)
    }
}

/// Canonical encoding of all current port rates of a graph.
///
/// Computed fresh each time a schedule is requested; owned persistently
/// only as a [`crate::cache::ScheduleCache`] key. Two signatures are equal
/// iff their tuple sequences are equal.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RateSignature {
    entries: Vec<(PortId, RateKind, u32)>,
}

impl RateSignature {
    /// Derives the signature from the graph's current rate declarations.
    ///
    /// Enumeration order is fixed by `boundary`: every input port's
    /// consumption rate, then every output port's production rate followed
    /// by its initial-production rate. Total and infallible for handles
    /// collected from the same graph; stale handles yield an internal
    /// bookkeeping error via the graph accessors.
    pub fn compute(
        graph: &DataflowGraph,
        boundary: &BoundaryPorts,
    ) -> Result<Self, crate::graph::GraphError> {
        let mut entries =
            Vec::with_capacity(boundary.inputs.len() + 2 * boundary.outputs.len());
        for &port in &boundary.inputs {
            entries.push((port, RateKind::Consumption, graph.consumption_rate(port)?));
        }
        for &port in &boundary.outputs {
            entries.push((port, RateKind::Production, graph.production_rate(port)?));
            entries.push((
                port,
                RateKind::InitProduction,
                graph.init_production_rate(port)?,
            ));
        }
        Ok(Self { entries })
    }

    /// The tuple entries in canonical order.
    #[must_use]
    pub fn entries(&self) -> &[(PortId, RateKind, u32)] {
        &self.entries
    }

    /// Short stable fingerprint for diagnostics and telemetry.
    ///
    /// BLAKE3 over the length-prefixed tuple encoding, truncated to the
    /// first eight bytes. Never used as the cache key; collisions here cost
    /// only a confusing log line.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = Hasher::new();
        hasher.update(b"rates:");
        hasher.update(&u64::try_from(self.entries.len()).unwrap_or(u64::MAX).to_le_bytes());
        for (port, kind, rate) in &self.entries {
            hasher.update(&port.0.to_le_bytes());
            hasher.update(&[kind.tag()]);
            hasher.update(&rate.to_le_bytes());
        }
        let digest = hasher.finalize();
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest.as_bytes()[0..8]);
        u64::from_le_bytes(word)
    }
}

impl fmt::Display for RateSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sig:{:016x}[", self.fingerprint())?;
        for (i, (port, kind, rate)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "p{}:{kind}={rate}", port.0)?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::graph::DataflowGraph;

    fn chain(rates: (u32, u32)) -> DataflowGraph {
        let mut g = DataflowGraph::new();
        let a = g.add_actor("a");
        let b = g.add_actor("b");
        let out = g.add_output_port(a, "out", rates.0, 0).unwrap();
        let inp = g.add_input_port(b, "in", rates.1).unwrap();
        g.connect(out, inp, 0).unwrap();
        g
    }

    #[test]
    fn unchanged_graph_yields_identical_signature() {
        let g = chain((2, 3));
        let boundary = BoundaryPorts::collect(&g);
        let s1 = RateSignature::compute(&g, &boundary).unwrap();
        let s2 = RateSignature::compute(&g, &boundary).unwrap();
        assert_eq!(s1, s2);
        assert_eq!(s1.fingerprint(), s2.fingerprint());
    }

    #[test]
    fn rate_change_changes_signature() {
        let mut g = chain((2, 3));
        let boundary = BoundaryPorts::collect(&g);
        let before = RateSignature::compute(&g, &boundary).unwrap();
        let out = boundary.outputs[0];
        g.set_production_rate(out, 4).unwrap();
        let after = RateSignature::compute(&g, &boundary).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn adjacent_rates_do_not_collide() {
        // The classic concatenation collision: [1, 23] vs [12, 3].
        let mut g1 = DataflowGraph::new();
        let a = g1.add_actor("a");
        g1.add_input_port(a, "x", 1).unwrap();
        g1.add_input_port(a, "y", 23).unwrap();

        let mut g2 = DataflowGraph::new();
        let b = g2.add_actor("a");
        g2.add_input_port(b, "x", 12).unwrap();
        g2.add_input_port(b, "y", 3).unwrap();

        let s1 = RateSignature::compute(&g1, &BoundaryPorts::collect(&g1)).unwrap();
        let s2 = RateSignature::compute(&g2, &BoundaryPorts::collect(&g2)).unwrap();
        assert_ne!(s1, s2);
    }
}
