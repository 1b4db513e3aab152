//! Import errors.

use std::time::Duration;

use deployer_core::{CharmError, Feedback};
use deployer_env::EnvError;
use deployer_watch::WatchError;
use thiserror::Error;

pub type ImportResult<T> = Result<T, ImportError>;

/// Anything that ends a deployment run.
///
/// Nothing already applied to the cluster is rolled back; re-running the
/// import resumes from the live state.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("bundle failed validation with {} error(s)", .0.errors().len())]
    Validation(Feedback),

    #[error("timed out after {waited:?} waiting for {goal}")]
    Timeout { goal: String, waited: Duration },

    #[error("units in error state: {}", units.join(", "))]
    UnitErrors { units: Vec<String> },

    #[error("environment error: {0}")]
    Env(#[from] EnvError),

    #[error("charm error: {0}")]
    Charm(#[from] CharmError),

    #[error("watch error: {0}")]
    Watch(WatchError),
}

impl From<WatchError> for ImportError {
    fn from(err: WatchError) -> Self {
        match err {
            WatchError::Timeout { goal, waited } => Self::Timeout { goal, waited },
            WatchError::Aborted { units } => Self::UnitErrors { units },
            WatchError::Env(e) => Self::Env(e),
            other => Self::Watch(other),
        }
    }
}
