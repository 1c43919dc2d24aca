//! Disassembly strategies

use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub mod linear;
pub mod walker;

pub use walker::{ControlFlowWalker, Target, Walk, WalkState, DEFAULT_INSTRUCTION_LIMIT};

/// How code is discovered.
#[derive(Copy, Clone, ValueEnum, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Recursive descent from vectors, entry points and code-like regions
    #[default]
    Recursive,
    /// Linear sweep of the requested range, bank by bank
    Linear,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Recursive => write!(f, "Recursive descent"),
            Strategy::Linear => write!(f, "Linear sweep"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_display() {
        assert_eq!(Strategy::Linear.to_string(), "Linear sweep");
        assert_eq!(Strategy::Recursive.to_string(), "Recursive descent");
        assert_eq!(Strategy::default(), Strategy::Recursive);
    }
}
