// src/session/gc.rs

//! Periodic garbage collection of finished sessions.
//!
//! The retention rule itself lives in [`SessionStore::sweep`]; this module
//! only runs it on a timer until shutdown.
//!
//! [`SessionStore::sweep`]: crate::session::SessionStore::sweep

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Spawn the sweep loop.
///
/// `sweep` is called once per `period` and returns how many sessions it
/// removed, or `None` when the registry it sweeps no longer exists. The loop
/// ends on `None` or when `shutdown` flips to `true` (or its sender drops).
pub fn spawn_collector<F>(
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut sweep: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Option<usize> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; nothing can be expired yet.
        ticker.tick().await;

        info!(period_ms = period.as_millis() as u64, "session collector started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match sweep() {
                        Some(0) => debug!("collector sweep removed nothing"),
                        Some(removed) => info!(removed, "collector removed expired sessions"),
                        None => break,
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("session collector stopped");
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sweeps_each_period_until_shutdown() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(false);

        let counter = Arc::clone(&calls);
        let handle = spawn_collector(Duration::from_secs(30), rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(0)
        });

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        tx.send(true).unwrap();
        handle.await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_registry_is_gone() {
        let (_tx, rx) = watch::channel(false);
        let handle = spawn_collector(Duration::from_secs(1), rx, || None);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(handle.is_finished());
    }
}
