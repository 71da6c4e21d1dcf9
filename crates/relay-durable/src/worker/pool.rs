//! Worker pool implementation

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::activity::{Activity, ActivityContext, ActivityError};
use crate::engine::{EngineError, WorkflowExecutor};
use crate::persistence::{ClaimedTask, StoreError, TaskFailureOutcome, WorkflowStore};

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Worker id recorded on claimed tasks
    pub worker_id: String,

    /// Maximum concurrent attempts
    pub max_concurrency: usize,

    /// Poll interval when tasks were just found
    pub min_poll_interval: Duration,

    /// Poll interval ceiling when idle
    pub max_poll_interval: Duration,

    /// Idle backoff multiplier
    pub poll_backoff_multiplier: f64,

    /// Maximum tasks to claim per poll
    pub batch_size: usize,

    /// Graceful shutdown drain timeout
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::now_v7()),
            max_concurrency: 8,
            min_poll_interval: Duration::from_millis(100),
            max_poll_interval: Duration::from_secs(5),
            poll_backoff_multiplier: 1.5,
            batch_size: 10,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    /// Set the worker id
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    /// Set maximum concurrency
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Set the poll interval band
    pub fn with_poll_intervals(mut self, min: Duration, max: Duration) -> Self {
        self.min_poll_interval = min;
        self.max_poll_interval = max.max(min);
        self
    }

    /// Set the shutdown drain timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Engine error
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Pool already started
    #[error("worker pool is already running")]
    AlreadyRunning,

    /// Active attempts did not drain in time
    #[error("graceful shutdown timed out")]
    ShutdownTimeout,
}

/// Handler executing one activity attempt
type ActivityHandler = Arc<
    dyn Fn(ClaimedTask) -> BoxFuture<'static, Result<serde_json::Value, ActivityError>>
        + Send
        + Sync,
>;

/// Worker pool executing activity tasks
///
/// # Example
///
/// ```ignore
/// let pool = WorkerPool::new(executor.clone(), WorkerPoolConfig::default());
/// pool.register_activity(SendEmailActivity { email });
/// pool.start()?;
/// // ...
/// pool.shutdown().await?;
/// ```
pub struct WorkerPool<S: WorkflowStore> {
    store: Arc<S>,
    executor: Arc<WorkflowExecutor<S>>,
    config: WorkerPoolConfig,
    handlers: std::sync::RwLock<HashMap<String, ActivityHandler>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    active: Arc<Semaphore>,
    poll_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<S: WorkflowStore> WorkerPool<S> {
    /// Create a pool over the executor's store
    pub fn new(executor: Arc<WorkflowExecutor<S>>, config: WorkerPoolConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            store: executor.store().clone(),
            executor,
            active: Arc::new(Semaphore::new(config.max_concurrency)),
            config,
            handlers: std::sync::RwLock::new(HashMap::new()),
            shutdown_tx,
            shutdown_rx,
            poll_handle: std::sync::Mutex::new(None),
        }
    }

    /// Register an untyped handler for an activity type
    pub fn register_handler<F, Fut>(&self, activity_type: &str, handler: F)
    where
        F: Fn(ClaimedTask) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, ActivityError>> + Send + 'static,
    {
        let handler: ActivityHandler = Arc::new(move |task| Box::pin(handler(task)));
        self.handlers
            .write()
            .expect("handler lock poisoned")
            .insert(activity_type.to_string(), handler);
    }

    /// Register a typed [`Activity`], adapting serde input/output
    pub fn register_activity<A: Activity>(&self, activity: A) {
        let activity = Arc::new(activity);
        self.register_handler(A::TYPE, move |task: ClaimedTask| {
            let activity = activity.clone();
            async move {
                let input: A::Input = serde_json::from_value(task.input).map_err(|e| {
                    ActivityError::non_retryable(format!("invalid activity input: {e}"))
                        .with_type("bad_input")
                })?;

                let ctx = ActivityContext::new(
                    task.workflow_id,
                    task.activity_id,
                    task.attempt,
                    task.options.retry_policy.max_attempts,
                );

                let output = activity.execute(&ctx, input).await?;
                serde_json::to_value(output).map_err(|e| {
                    ActivityError::non_retryable(format!("unserializable activity output: {e}"))
                })
            }
        });
    }

    /// Start the polling loop
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub fn start(&self) -> Result<(), WorkerError> {
        let mut handle_slot = self.poll_handle.lock().expect("poll handle lock poisoned");
        if handle_slot.is_some() {
            return Err(WorkerError::AlreadyRunning);
        }

        info!(
            worker_id = %self.config.worker_id,
            max_concurrency = self.config.max_concurrency,
            "starting worker pool"
        );

        let store = Arc::clone(&self.store);
        let executor = Arc::clone(&self.executor);
        let config = self.config.clone();
        let handlers = self
            .handlers
            .read()
            .expect("handler lock poisoned")
            .clone();
        let active = Arc::clone(&self.active);
        let mut shutdown_rx = self.shutdown_rx.clone();

        let handle = tokio::spawn(async move {
            let mut interval = config.min_poll_interval;

            loop {
                if *shutdown_rx.borrow() {
                    debug!("poll loop: shutdown requested");
                    break;
                }

                let slots = active.available_permits().min(config.batch_size);
                let claimed = if slots == 0 {
                    vec![]
                } else {
                    match store.claim_due_tasks(&config.worker_id, slots).await {
                        Ok(tasks) => tasks,
                        Err(e) => {
                            error!("task claim failed: {e}");
                            vec![]
                        }
                    }
                };

                if claimed.is_empty() {
                    // Idle: back off
                    interval = Duration::from_secs_f64(
                        (interval.as_secs_f64() * config.poll_backoff_multiplier)
                            .min(config.max_poll_interval.as_secs_f64()),
                    );
                } else {
                    debug!(count = claimed.len(), "claimed tasks");
                    interval = config.min_poll_interval;

                    for task in claimed {
                        let permit = match active.clone().try_acquire_owned() {
                            Ok(p) => p,
                            Err(_) => {
                                // Claimed more than we can run; leave the rest
                                // for the retry sweep
                                warn!("no execution permits available");
                                break;
                            }
                        };

                        let store = Arc::clone(&store);
                        let executor = Arc::clone(&executor);
                        let handlers = handlers.clone();

                        tokio::spawn(async move {
                            execute_task(&store, &executor, &handlers, task).await;
                            drop(permit);
                        });
                    }
                }

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown_rx.changed() => {
                        debug!("poll loop: shutdown during wait");
                        break;
                    }
                }
            }

            debug!("poll loop exited");
        });

        *handle_slot = Some(handle);
        Ok(())
    }

    /// Gracefully stop: finish in-flight attempts, claim no new ones
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn shutdown(&self) -> Result<(), WorkerError> {
        info!(worker_id = %self.config.worker_id, "initiating graceful shutdown");
        let _ = self.shutdown_tx.send(true);

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        loop {
            if self.active.available_permits() == self.config.max_concurrency {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining = self.config.max_concurrency - self.active.available_permits(),
                    "shutdown timeout reached"
                );
                return Err(WorkerError::ShutdownTimeout);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let handle = self
            .poll_handle
            .lock()
            .expect("poll handle lock poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        info!(worker_id = %self.config.worker_id, "worker pool stopped");
        Ok(())
    }

    /// Execute all currently-due tasks to completion, once
    ///
    /// The synchronous pump used by tests and embedded callers that want to
    /// advance workflows deterministically without the background loop.
    /// Returns the number of attempts executed.
    pub async fn drain_once(&self) -> Result<usize, WorkerError> {
        let handlers = self
            .handlers
            .read()
            .expect("handler lock poisoned")
            .clone();

        let claimed = self
            .store
            .claim_due_tasks(&self.config.worker_id, self.config.batch_size)
            .await?;
        let count = claimed.len();

        for task in claimed {
            execute_task(&self.store, &self.executor, &handlers, task).await;
        }

        Ok(count)
    }
}

/// Run one claimed attempt and report its outcome
async fn execute_task<S: WorkflowStore>(
    store: &Arc<S>,
    executor: &Arc<WorkflowExecutor<S>>,
    handlers: &HashMap<String, ActivityHandler>,
    task: ClaimedTask,
) {
    let task_id = task.id;
    let workflow_id = task.workflow_id.clone();
    let activity_id = task.activity_id.clone();
    let attempt = task.attempt;
    let timeout = task.options.start_to_close_timeout;

    let outcome = match handlers.get(&task.activity_type) {
        Some(handler) => match tokio::time::timeout(timeout, handler(task)).await {
            Ok(result) => result,
            Err(_) => Err(ActivityError::retryable(format!(
                "attempt timed out after {timeout:?}"
            ))
            .with_type("timeout")),
        },
        None => Err(ActivityError::non_retryable(format!(
            "no handler registered for activity type: {}",
            task.activity_type
        ))
        .with_type("unregistered_activity")),
    };

    match outcome {
        Ok(value) => {
            if let Err(e) = store.complete_task(task_id, value.clone()).await {
                error!(%task_id, "failed to record task completion: {e}");
                return;
            }
            if let Err(e) = executor
                .on_activity_completed(&workflow_id, &activity_id, value)
                .await
            {
                error!(%workflow_id, %activity_id, "failed to apply activity completion: {e}");
            }
        }
        Err(activity_error) => {
            let failure = match store.fail_task(task_id, &activity_error).await {
                Ok(f) => f,
                Err(e) => {
                    error!(%task_id, "failed to record task failure: {e}");
                    return;
                }
            };

            let will_retry = matches!(failure, TaskFailureOutcome::WillRetry { .. });
            if let TaskFailureOutcome::WillRetry {
                next_attempt,
                delay,
            } = &failure
            {
                debug!(
                    %workflow_id, %activity_id, attempt, next_attempt, ?delay,
                    "activity attempt failed, will retry"
                );
            } else {
                warn!(
                    %workflow_id, %activity_id, attempt,
                    error = %activity_error.message,
                    "activity failed terminally"
                );
            }

            if let Err(e) = executor
                .on_activity_failed(&workflow_id, &activity_id, activity_error, will_retry)
                .await
            {
                error!(%workflow_id, %activity_id, "failed to apply activity failure: {e}");
            }
        }
    }
}
