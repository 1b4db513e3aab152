//! Goal-state predicates over a delta stream.

use deployer_env::Delta;

/// What to do after units went into error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    Continue,
    Abort,
}

/// A goal state tracked delta by delta.
pub trait Convergence: Send {
    /// Human-readable goal, for logs and timeout errors.
    fn goal(&self) -> String;

    fn process(&mut self, delta: &Delta);

    fn complete(&self) -> bool;

    /// Units that went into error since the last call. Each unit is
    /// reported at most once over the lifetime of the tracker.
    fn take_new_errors(&mut self) -> Vec<String> {
        Vec::new()
    }
}
