//! Durable timer service
//!
//! Timers are persisted `(workflow_id, timer_id, fire_at)` rows, so a wake-up
//! scheduled months out survives any number of process restarts. The
//! [`TimerService`] polls for due timers and feeds each into the executor,
//! which appends the `TimerFired` event and resumes the owning instance.
//! Firing is at-least-once; the event append makes resumption idempotent.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::engine::WorkflowExecutor;
use crate::persistence::WorkflowStore;

/// Timer service configuration
#[derive(Debug, Clone)]
pub struct TimerServiceConfig {
    /// How often to check for due timers
    pub poll_interval: Duration,

    /// Maximum timers to claim per poll
    pub batch_size: usize,
}

impl Default for TimerServiceConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 100,
        }
    }
}

impl TimerServiceConfig {
    /// Set the poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the claim batch size
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }
}

/// Background service that fires due durable timers
///
/// # Example
///
/// ```ignore
/// let timers = TimerService::new(executor.clone(), TimerServiceConfig::default());
/// timers.start()?;
/// // ...
/// timers.shutdown().await;
/// ```
pub struct TimerService<S: WorkflowStore> {
    executor: Arc<WorkflowExecutor<S>>,
    config: TimerServiceConfig,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    poll_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<S: WorkflowStore> TimerService<S> {
    /// Create a timer service over the executor's store
    pub fn new(executor: Arc<WorkflowExecutor<S>>, config: TimerServiceConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            executor,
            config,
            shutdown_tx,
            shutdown_rx,
            poll_handle: std::sync::Mutex::new(None),
        }
    }

    /// Start the polling loop
    #[instrument(skip(self))]
    pub fn start(&self) -> Result<(), AlreadyRunning> {
        let mut handle_slot = self.poll_handle.lock().expect("timer handle lock poisoned");
        if handle_slot.is_some() {
            return Err(AlreadyRunning);
        }

        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "starting timer service"
        );

        let executor = Arc::clone(&self.executor);
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.poll_interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        Self::fire_due(&executor, config.batch_size).await;
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("timer loop: shutdown requested");
                        break;
                    }
                }
            }

            debug!("timer loop exited");
        });

        *handle_slot = Some(handle);
        Ok(())
    }

    /// Stop the polling loop
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self
            .poll_handle
            .lock()
            .expect("timer handle lock poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("timer service stopped");
    }

    /// Claim and fire all currently-due timers, once
    ///
    /// Exposed for tests and embedded callers that drive time manually.
    pub async fn fire_due_once(&self) -> usize {
        Self::fire_due(&self.executor, self.config.batch_size).await
    }

    async fn fire_due(executor: &Arc<WorkflowExecutor<S>>, batch_size: usize) -> usize {
        let due = match executor
            .store()
            .claim_due_timers(Utc::now(), batch_size)
            .await
        {
            Ok(due) => due,
            Err(e) => {
                error!("timer claim failed: {e}");
                return 0;
            }
        };

        let fired = due.len();
        for timer in due {
            debug!(
                workflow_id = %timer.workflow_id,
                timer_id = %timer.timer_id,
                "firing timer"
            );
            if let Err(e) = executor
                .on_timer_fired(&timer.workflow_id, &timer.timer_id)
                .await
            {
                // The instance may have gone terminal between claim and fire
                error!(
                    workflow_id = %timer.workflow_id,
                    timer_id = %timer.timer_id,
                    "failed to apply timer firing: {e}"
                );
            }
        }

        fired
    }
}

/// The service was already started
#[derive(Debug, thiserror::Error)]
#[error("timer service is already running")]
pub struct AlreadyRunning;
