//! Idle client eviction
//!
//! One reaper task runs per [`Proxy`](crate::proxy::Proxy). It wakes on a fixed
//! interval and removes registry entries that have been idle for too long.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::proxy::limiter::ClientRegistry;

/// How often the registry is swept.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Handle to the background sweep task.
#[derive(Debug)]
pub struct Reaper {
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Reaper {
    /// Start sweeping `registry` every `interval`, evicting clients idle past `idle`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(registry: Arc<ClientRegistry>, idle: Duration, interval: Duration) -> Self {
        let (shutdown, mut stop) = watch::channel(false);

        let task = tokio::spawn(async move {
            // First sweep happens one interval after start
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = registry.evict_idle(idle);
                        tracing::debug!(
                            evicted,
                            remaining = registry.len(),
                            "Swept idle clients"
                        );
                    }

                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::debug!("Idle client reaper stopped");
        });

        Self {
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    /// Stop the task and wait for it to exit. Later calls do nothing.
    pub async fn shutdown(&self) {
        let Some(task) = self.task.lock().take() else {
            return;
        };

        let _ = self.shutdown.send(true);
        if let Err(e) = task.await {
            if !e.is_cancelled() {
                tracing::error!("Idle client reaper failed: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
