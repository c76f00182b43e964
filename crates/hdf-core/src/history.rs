// SPDX-License-Identifier: Apache-2.0
//! Per-channel bounded history of consumed tokens.
//!
//! Guard expressions are evaluated only at the type-B firing boundary, but
//! they may reference values consumed during any sub-firing of the current
//! iteration. This tracker records, per (port, channel), the N most
//! recently consumed tokens so those references resolve after the fact.
//!
//! Slot arithmetic: a token consumed as the `k`-th consumption of firing
//! `f` (out of `F` firings at rate `R`) lands in logical slot
//! `R·F − 1 − (R·f + k)`. Counting from the end of the iteration means slot
//! 0 always ends up holding the very last consumption, however many
//! sub-firings occurred. Slots at or beyond the configured size are
//! deliberately not retained — bounded history is the contract, not a bug.

use std::collections::BTreeMap;

use crate::ident::PortId;
use crate::token::{Token, VariableScope};

/// Default history window when none is configured.
pub const DEFAULT_HISTORY_SIZE: usize = 1;

/// Records the N most recently consumed tokens per (port, channel).
#[derive(Clone, Debug)]
pub struct InputHistoryTracker {
    size: usize,
    rings: BTreeMap<(PortId, u32), Vec<Option<Token>>>,
}

impl Default for InputHistoryTracker {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}

impl InputHistoryTracker {
    /// Creates a tracker with the given per-channel window size.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            size,
            rings: BTreeMap::new(),
        }
    }

    /// Configured window size.
    #[must_use]
    pub fn history_size(&self) -> usize {
        self.size
    }

    /// Reconfigures the window size, dropping all recorded history.
    ///
    /// Must be applied before any firing of the iteration that relies on
    /// the new size.
    pub fn declare_history_size(&mut self, size: usize) {
        if size != self.size {
            self.size = size;
            self.rings.clear();
        }
    }

    /// Records one consumed token.
    ///
    /// `firing_index` counts sub-firings within the current iteration from
    /// zero; `consumption_index` counts consumptions within that firing;
    /// `rate` is the port's consumption rate; `firings_per_iteration` comes
    /// from the current schedule. Tokens whose slot falls outside
    /// `[0, size)` are silently dropped.
    pub fn record_consumption(
        &mut self,
        port: PortId,
        channel: u32,
        token: Token,
        rate: u32,
        firing_index: u32,
        firings_per_iteration: u32,
        consumption_index: u32,
    ) {
        let total = u64::from(rate) * u64::from(firings_per_iteration);
        let position = u64::from(rate) * u64::from(firing_index) + u64::from(consumption_index);
        if position >= total {
            // Bookkeeping from a stale schedule; nothing sensible to store.
            return;
        }
        let slot = match usize::try_from(total - 1 - position) {
            Ok(s) if s < self.size => s,
            _ => return,
        };
        let ring = self
            .rings
            .entry((port, channel))
            .or_insert_with(|| vec![None; self.size]);
        ring[slot] = Some(token);
    }

    /// The token consumed `slot` consumptions ago on (port, channel).
    ///
    /// Slot 0 is the most recent consumption after a full iteration.
    #[must_use]
    pub fn token(&self, port: PortId, channel: u32, slot: usize) -> Option<Token> {
        self.rings
            .get(&(port, channel))
            .and_then(|ring| ring.get(slot))
            .and_then(|t| *t)
    }

    /// Publishes one channel's history into a variable scope.
    ///
    /// Writes `{base}` and `{base}_0` for slot 0, `{base}_1` … for deeper
    /// slots, and `{base}_isPresent` indicating whether anything has been
    /// consumed on the channel.
    pub fn publish_channel(
        &self,
        port: PortId,
        channel: u32,
        base: &str,
        scope: &mut VariableScope,
    ) {
        let newest = self.token(port, channel, 0);
        scope.set(format!("{base}_isPresent"), Token::Bool(newest.is_some()));
        if let Some(token) = newest {
            scope.set(base, token);
        }
        for slot in 0..self.size {
            if let Some(token) = self.token(port, channel, slot) {
                scope.set(format!("{base}_{slot}"), token);
            }
        }
    }

    /// Drops all recorded history (e.g. on reinitialization).
    pub fn clear(&mut self) {
        self.rings.clear();
    }
}
