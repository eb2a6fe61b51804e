//! Interval-driven background task with explicit lifecycle.
//!
//! Workers run as a ticker loop behind a `watch` shutdown channel so a
//! `stop` both interrupts a pending sleep and joins the task.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct ScheduledTask {
    name: &'static str,
    shutdown_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    /// Spawn `tick` on a fixed interval. The first tick runs after one full
    /// interval, not immediately.
    pub fn spawn<F, Fut>(name: &'static str, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => tick().await,
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            debug!(task = name, "scheduled task shutdown");
                            break;
                        }
                    }
                }
            }
        });
        Self {
            name,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Signal shutdown and wait for the loop to exit.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(task = self.name, error = %e, "scheduled task join failed");
            }
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
    }
}
