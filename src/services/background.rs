use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::services::hub::LibraryHub;

/// Periodically re-sync linked libraries whose snapshot has gone stale.
/// Returns `None` when `every` is zero.
pub fn run_background_tasks(
    hub: Arc<LibraryHub>,
    every: Duration,
    staleness_window: chrono::Duration,
) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        return None;
    }

    Some(tokio::spawn(async move {
        tracing::info!("Refreshing stale libraries every {:?}", every);
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; the startup hydrate covers it.
        interval.tick().await;

        loop {
            interval.tick().await;
            match hub.refresh_stale_libraries(staleness_window).await {
                Ok(0) => {}
                Ok(count) => tracing::info!("Refreshed {} stale libraries", count),
                Err(e) => tracing::error!("Failed to refresh stale libraries: {}", e),
            }
        }
    }))
}
