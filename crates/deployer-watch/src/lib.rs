//! deployer-watch: block until the cluster reaches a goal state.
//!
//! A [`Convergence`] is a small state machine fed one delta at a time; it
//! knows what "done" means and which units newly went into error.
//! [`wait_for`] drives one over a watch stream until it completes or the
//! deadline passes.
//!
//! # Components
//!
//! - **`convergence`**: the `Convergence` trait and `ErrorAction`
//! - **`units`**: `WaitForUnits` (goal `started` or `removed`)
//! - **`machines`**: `WaitForMachineTermination`
//! - **`wait`**: the deadline-bounded event loop

pub mod convergence;
pub mod error;
pub mod machines;
pub mod units;
pub mod wait;

pub use convergence::{Convergence, ErrorAction};
pub use error::{WatchError, WatchResult};
pub use machines::WaitForMachineTermination;
pub use units::{Goal, WaitForUnits};
pub use wait::{wait_for, watch_until};
