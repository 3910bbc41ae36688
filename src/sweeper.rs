//! Background sweep loops.
//!
//! Pending handshakes, cached peers, sessions, and the dedup seen-set
//! all expire on TTLs; each owner runs one of these loops to garbage
//! collect. The loop sleeps on a ticker, runs the sweep under the same
//! lock its owner uses for inserts, and exits when stopped.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

/// Handle to a running sweep loop
///
/// Dropping the handle without calling [`SweepHandle::stop`] detaches
/// the loop; tests should stop and join explicitly.
pub struct SweepHandle {
    stop: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl SweepHandle {
    /// Signal the loop to exit and wait for it to finish
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

/// Spawn a sweep loop invoking `sweep` every `interval`
pub fn spawn_sweeper<F>(name: &'static str, interval: Duration, sweep: F) -> SweepHandle
where
    F: Fn() + Send + 'static,
{
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so a fresh loop
        // does not sweep before anything can expire
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sweep();
                }
                _ = &mut stop_rx => {
                    debug!(name, "sweep loop stopped");
                    break;
                }
            }
        }
    });
    SweepHandle {
        stop: Some(stop_tx),
        join: Some(join),
    }
}
