//! Watch errors.

use std::time::Duration;

use deployer_env::EnvError;
use thiserror::Error;

pub type WatchResult<T> = Result<T, WatchError>;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("timed out after {waited:?} waiting for {goal}")]
    Timeout { goal: String, waited: Duration },

    #[error("aborted on unit errors: {}", units.join(", "))]
    Aborted { units: Vec<String> },

    #[error("watch stream closed before {goal}")]
    StreamClosed { goal: String },

    #[error(transparent)]
    Env(#[from] EnvError),
}
