//! Cancellable periodic background task
//!
//! Consumer services run small ticking loops (policy monitors, status
//! reporters) next to their inbound listener. A [`PeriodicTask`] owns the
//! ticker and a dedicated stop signal; [`PeriodicTask::stop`] resolves only
//! after the loop has exited.

use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Shortest period a task will tick at; zero is raised to this
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

pub struct PeriodicTask {
    name: String,
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Run `tick` every `period`, first tick one period after spawn.
    ///
    /// A tick that errors is logged and the loop carries on. Ticks never
    /// overlap: a slow tick delays the next one instead of bursting.
    pub fn spawn<F, Fut, E>(name: impl Into<String>, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let name = name.into();
        if period < MIN_PERIOD {
            warn!(task = %name, period_ms = period.as_millis(), "period below minimum, clamping");
        }
        let period = period.max(MIN_PERIOD);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(task = %task_name, period_ms = period.as_millis(), "periodic task started");

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        debug!(task = %task_name, "tick");
                        if let Err(e) = tick().await {
                            warn!(task = %task_name, error = %e, "periodic tick failed");
                        }
                    }
                }
            }

            info!(task = %task_name, "periodic task stopped");
        });

        Self {
            name,
            stop_tx,
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the loop and wait for it to exit. A tick already in progress
    /// runs to completion first.
    pub async fn stop(self) {
        // Receiver is gone only if the task already ended
        let _ = self.stop_tx.send(());
        if let Err(e) = self.handle.await {
            warn!(task = %self.name, error = %e, "periodic task panicked");
        }
    }
}
