// SPDX-License-Identifier: Apache-2.0
//! Token values and the named-variable scope consumed by guard evaluation.

use std::collections::BTreeMap;
use std::fmt;

/// A value carried on a channel and recorded in consumption history.
///
/// Guard expressions compare integers and booleans; richer token types are
/// an actor-library concern and out of scope for the scheduling core.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Token {
    /// Signed integer token.
    Int(i64),
    /// Boolean token.
    Bool(bool),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// Named variables visible to guard expressions.
///
/// Populated at each controller firing from live input values and from
/// [`crate::history::InputHistoryTracker`]; read by
/// [`crate::guard::Guard::evaluate`]. `BTreeMap` keeps diagnostic dumps in a
/// deterministic order.
#[derive(Clone, Debug, Default)]
pub struct VariableScope {
    vars: BTreeMap<String, Token>,
}

impl VariableScope {
    /// Creates an empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets (or overwrites) a variable binding.
    pub fn set(&mut self, name: impl Into<String>, value: Token) {
        self.vars.insert(name.into(), value);
    }

    /// Looks up a variable by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Token> {
        self.vars.get(name).copied()
    }

    /// Removes every binding. Used when a new iteration republishes inputs.
    pub fn clear(&mut self) {
        self.vars.clear();
    }

    /// Iterates bindings in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Token)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_overwrites_and_reads_back() {
        let mut scope = VariableScope::new();
        scope.set("x", Token::Int(1));
        scope.set("x", Token::Int(2));
        assert_eq!(scope.get("x"), Some(Token::Int(2)));
        assert_eq!(scope.get("y"), None);
    }
}
