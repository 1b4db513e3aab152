//! The deadline-bounded watch loop.

use deployer_env::{Environment, EventStream};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::convergence::{Convergence, ErrorAction};
use crate::error::{WatchError, WatchResult};

/// Feed `stream` into `convergence` until it completes.
///
/// Completion is checked after each batch, never before the first one,
/// so an empty tracker does not finish before the initial state arrives.
/// Newly errored units are handed to `on_errors` as one batch; returning
/// [`ErrorAction::Abort`] ends the wait.
pub async fn watch_until<C, F>(
    stream: &mut EventStream,
    convergence: &mut C,
    deadline: Instant,
    mut on_errors: F,
) -> WatchResult<()>
where
    C: Convergence + ?Sized,
    F: FnMut(&[String]) -> ErrorAction,
{
    let started = Instant::now();
    loop {
        let batch = tokio::select! {
            batch = stream.recv() => match batch {
                Some(batch) => batch,
                None => return Err(WatchError::StreamClosed { goal: convergence.goal() }),
            },
            _ = tokio::time::sleep_until(deadline) => {
                warn!(goal = %convergence.goal(), "watch deadline reached");
                return Err(WatchError::Timeout {
                    goal: convergence.goal(),
                    waited: started.elapsed(),
                });
            }
        };

        debug!(deltas = batch.len(), "watch batch");
        for delta in &batch {
            convergence.process(delta);
        }

        let errors = convergence.take_new_errors();
        if !errors.is_empty() {
            warn!(units = ?errors, "units in error state");
            if on_errors(&errors) == ErrorAction::Abort {
                return Err(WatchError::Aborted { units: errors });
            }
        }

        if convergence.complete() {
            info!(goal = %convergence.goal(), elapsed = ?started.elapsed(), "goal state reached");
            return Ok(());
        }
    }
}

/// Open a fresh watch on `env` and wait on it.
pub async fn wait_for<C, F>(
    env: &dyn Environment,
    convergence: &mut C,
    deadline: Instant,
    on_errors: F,
) -> WatchResult<()>
where
    C: Convergence + ?Sized,
    F: FnMut(&[String]) -> ErrorAction,
{
    let mut stream = env.get_watch().await?;
    watch_until(&mut stream, convergence, deadline, on_errors).await
}
