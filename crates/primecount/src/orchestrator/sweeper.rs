use super::Shared;
use core::time::Duration;
use std::sync::Weak;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

/// Periodically purges expired job records and progress counters.
///
/// Holds only a weak reference so dropping every [`Orchestrator`] handle
/// also stops the sweeper.
///
/// [`Orchestrator`]: super::Orchestrator
pub(crate) fn spawn(shared: Weak<Shared>, every: Duration, token: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(shared) = shared.upgrade() else { break };
                    let jobs = shared.registry.purge_expired();
                    let counters = shared.tracker.purge_expired();
                    if jobs > 0 || counters > 0 {
                        tracing::debug!(jobs, counters, "Purged expired records");
                    }
                }
            }
        }

        tracing::trace!("Retention sweeper stopped");
    });
}
