//! Workflow executor with replay support
//!
//! The `WorkflowExecutor` is responsible for:
//! - Starting new workflow instances under deterministic string ids
//! - Rebuilding instance state by replaying the persisted event history
//! - Applying new stimuli (activity results, timer firings, signals) and
//!   converting the resulting actions into events and store effects
//! - Continue-as-new resets that bound history for indefinite processes

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, error, info, instrument, warn};

use crate::activity::ActivityError;
use crate::persistence::{StoreError, TaskDefinition, WorkflowStatus, WorkflowStore};
use crate::workflow::{WorkflowAction, WorkflowEvent, WorkflowSignal};

use super::registry::{AnyWorkflow, RegistryError, WorkflowRegistry};

/// Configuration for the workflow executor
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hard cap on history length per instance
    ///
    /// Indefinite-duration processes must stay under this via
    /// [`WorkflowAction::ContinueAsNew`].
    pub max_events_per_workflow: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_events_per_workflow: 10_000,
        }
    }
}

/// Errors from executor operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Registry error
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// History grew past the configured cap
    #[error("workflow {0} has too many events ({1} > {2})")]
    TooManyEvents(String, usize, usize),

    /// Replay found an inconsistent history
    #[error("replay error for workflow {workflow_id}: {message}")]
    Replay {
        workflow_id: String,
        message: String,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outcome of a `start_workflow` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new instance was created and its first actions processed
    Started,

    /// An instance with this id already exists; the call was a no-op
    AlreadyRunning,
}

impl StartOutcome {
    /// Whether a new instance was created
    pub fn started(&self) -> bool {
        matches!(self, Self::Started)
    }
}

/// Outcome of a `signal` call
///
/// Signal delivery is best-effort by design: webhooks arrive late, out of
/// order, and for meetings whose workflow has long since finished. A miss is
/// logged, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalOutcome {
    /// Enqueued and observed by the instance's next processing pass
    Delivered,

    /// Dropped (unknown or terminal instance)
    Dropped { reason: String },
}

impl SignalOutcome {
    /// Whether the signal reached a live instance
    pub fn delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Result of one processing pass over an instance
#[derive(Debug, Default)]
pub struct ProcessResult {
    /// Whether the instance is now in a terminal status
    pub completed: bool,

    /// Number of new events written
    pub events_written: usize,

    /// Number of activity tasks enqueued
    pub tasks_enqueued: usize,

    /// Number of signals consumed
    pub signals_processed: usize,
}

/// A new external fact to apply to an instance, beyond replayed history
enum Stimulus {
    ActivityCompleted {
        activity_id: String,
        result: serde_json::Value,
    },
    ActivityFailed {
        activity_id: String,
        error: ActivityError,
    },
    TimerFired {
        timer_id: String,
    },
}

/// Accumulated effects of one action batch
struct ActionBatch {
    sequence: i32,
    events_written: usize,
    tasks_enqueued: usize,
    /// A terminal action was processed
    terminal: bool,
    /// A `ContinueAsNew` was requested with this input
    continued: Option<serde_json::Value>,
}

/// Workflow executor
///
/// Drives workflow state machines: each instance executes as a single
/// logical thread (a per-instance async lock serializes all processing), and
/// all persistence happens before the instance suspends, so a process restart
/// resumes at the next unresumed step.
///
/// # Example
///
/// ```ignore
/// let store = Arc::new(InMemoryWorkflowStore::new());
/// let mut executor = WorkflowExecutor::new(store);
/// executor.register::<MeetingBotWorkflow>();
/// let executor = Arc::new(executor);
///
/// executor.start_workflow::<MeetingBotWorkflow>("meeting-bot-mtg1", input).await?;
/// executor.signal("meeting-bot-mtg1", WorkflowSignal::new("cancel_bot", json!({}))).await?;
/// ```
pub struct WorkflowExecutor<S: WorkflowStore> {
    store: Arc<S>,
    registry: WorkflowRegistry,
    config: EngineConfig,
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl<S: WorkflowStore> WorkflowExecutor<S> {
    /// Create a new executor over the given store
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    /// Create a new executor with custom config
    pub fn with_config(store: Arc<S>, config: EngineConfig) -> Self {
        Self {
            store,
            registry: WorkflowRegistry::new(),
            config,
            locks: DashMap::new(),
        }
    }

    /// Register a workflow definition
    pub fn register<W: crate::workflow::Workflow>(&mut self) {
        self.registry.register::<W>();
        info!(workflow_type = W::TYPE, "registered workflow type");
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Start a workflow instance under a deterministic id
    ///
    /// Starting an id that already exists is an idempotent no-op: exactly one
    /// live instance per key, exactly one execution of each scheduled step.
    #[instrument(skip(self, input), fields(workflow_type = W::TYPE))]
    pub async fn start_workflow<W: crate::workflow::Workflow>(
        &self,
        workflow_id: &str,
        input: W::Input,
    ) -> Result<StartOutcome, EngineError> {
        let lock = self.instance_lock(workflow_id);
        let _guard = lock.lock().await;

        let input_json = serde_json::to_value(&input)?;

        match self
            .store
            .create_workflow(workflow_id, W::TYPE, input_json.clone())
            .await
        {
            Ok(()) => {}
            Err(StoreError::WorkflowExists(_)) => {
                debug!(%workflow_id, "start ignored: instance already exists");
                return Ok(StartOutcome::AlreadyRunning);
            }
            Err(e) => return Err(e.into()),
        }

        info!(%workflow_id, "starting new workflow");

        let sequence = self
            .store
            .append_events(
                workflow_id,
                0,
                vec![WorkflowEvent::WorkflowStarted {
                    input: input_json.clone(),
                }],
            )
            .await?;

        let mut workflow = self.registry.create(W::TYPE, input_json)?;
        let actions = workflow.on_start();
        let batch = self
            .process_actions(workflow_id, sequence, actions)
            .await?;

        self.finish_pass(workflow_id, W::TYPE, &*workflow, batch)
            .await?;

        Ok(StartOutcome::Started)
    }

    /// Deliver a signal to an instance
    ///
    /// Unknown and terminal instances drop the signal with a warning.
    #[instrument(skip(self, signal), fields(signal_name = %signal.name))]
    pub async fn signal(
        &self,
        workflow_id: &str,
        signal: WorkflowSignal,
    ) -> Result<SignalOutcome, EngineError> {
        let lock = self.instance_lock(workflow_id);
        let _guard = lock.lock().await;

        let status = match self.store.get_workflow_status(workflow_id).await {
            Ok(status) => status,
            Err(StoreError::WorkflowNotFound(_)) => {
                warn!(%workflow_id, signal = %signal.name, "dropping signal for unknown workflow");
                return Ok(SignalOutcome::Dropped {
                    reason: "unknown workflow".to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        if status.is_terminal() {
            warn!(%workflow_id, signal = %signal.name, %status, "dropping signal for terminal workflow");
            return Ok(SignalOutcome::Dropped {
                reason: format!("workflow is {status}"),
            });
        }

        self.store.send_signal(workflow_id, signal).await?;
        self.apply(workflow_id, None).await?;

        Ok(SignalOutcome::Delivered)
    }

    /// Process any buffered signals for an instance
    ///
    /// Useful after a restart to pick up signals that arrived while the
    /// process was down.
    pub async fn process_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<ProcessResult, EngineError> {
        let lock = self.instance_lock(workflow_id);
        let _guard = lock.lock().await;
        self.apply(workflow_id, None).await
    }

    /// Record an activity completion and drive the instance forward
    #[instrument(skip(self, result))]
    pub async fn on_activity_completed(
        &self,
        workflow_id: &str,
        activity_id: &str,
        result: serde_json::Value,
    ) -> Result<ProcessResult, EngineError> {
        let lock = self.instance_lock(workflow_id);
        let _guard = lock.lock().await;
        self.apply(
            workflow_id,
            Some(Stimulus::ActivityCompleted {
                activity_id: activity_id.to_string(),
                result,
            }),
        )
        .await
    }

    /// Record an activity failure
    ///
    /// With `will_retry` the failure is only journaled; the workflow sees the
    /// error once retries are exhausted (or the error is non-retryable).
    #[instrument(skip(self, error))]
    pub async fn on_activity_failed(
        &self,
        workflow_id: &str,
        activity_id: &str,
        error: ActivityError,
        will_retry: bool,
    ) -> Result<ProcessResult, EngineError> {
        let lock = self.instance_lock(workflow_id);
        let _guard = lock.lock().await;

        if will_retry {
            let status = self.store.get_workflow_status(workflow_id).await?;
            if status.is_terminal() {
                return Ok(ProcessResult {
                    completed: true,
                    ..Default::default()
                });
            }

            let sequence = self.store.load_events(workflow_id).await?.len() as i32;
            self.store
                .append_events(
                    workflow_id,
                    sequence,
                    vec![WorkflowEvent::ActivityFailed {
                        activity_id: activity_id.to_string(),
                        error,
                        will_retry: true,
                    }],
                )
                .await?;

            return Ok(ProcessResult {
                events_written: 1,
                ..Default::default()
            });
        }

        self.apply(
            workflow_id,
            Some(Stimulus::ActivityFailed {
                activity_id: activity_id.to_string(),
                error,
            }),
        )
        .await
    }

    /// Record a timer firing and drive the instance forward
    #[instrument(skip(self))]
    pub async fn on_timer_fired(
        &self,
        workflow_id: &str,
        timer_id: &str,
    ) -> Result<ProcessResult, EngineError> {
        let lock = self.instance_lock(workflow_id);
        let _guard = lock.lock().await;
        self.apply(
            workflow_id,
            Some(Stimulus::TimerFired {
                timer_id: timer_id.to_string(),
            }),
        )
        .await
    }

    // =========================================================================
    // Internal
    // =========================================================================

    fn instance_lock(&self, workflow_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(workflow_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// One processing pass: replay history, apply the stimulus (if any),
    /// drain buffered signals, then run continuation resets.
    ///
    /// Caller must hold the instance lock.
    async fn apply(
        &self,
        workflow_id: &str,
        stimulus: Option<Stimulus>,
    ) -> Result<ProcessResult, EngineError> {
        let info = self.store.get_workflow_info(workflow_id).await?;

        if info.status.is_terminal() {
            debug!(%workflow_id, status = %info.status, "instance already terminal");
            return Ok(ProcessResult {
                completed: true,
                ..Default::default()
            });
        }

        let events = self.store.load_events(workflow_id).await?;
        if events.is_empty() {
            return Err(EngineError::Replay {
                workflow_id: workflow_id.to_string(),
                message: "no events for running workflow".to_string(),
            });
        }
        if events.len() > self.config.max_events_per_workflow {
            return Err(EngineError::TooManyEvents(
                workflow_id.to_string(),
                events.len(),
                self.config.max_events_per_workflow,
            ));
        }
        if !matches!(&events[0].1, WorkflowEvent::WorkflowStarted { .. }) {
            return Err(EngineError::Replay {
                workflow_id: workflow_id.to_string(),
                message: "first event must be workflow_started".to_string(),
            });
        }

        // Rebuild state; actions from replayed events were processed in a
        // previous pass and are discarded here.
        let mut workflow = self
            .registry
            .create(&info.workflow_type, info.input.clone())?;
        for (_seq, event) in &events {
            Self::replay_event(&mut *workflow, event);
        }

        let mut sequence = events.len() as i32;
        let mut result = ProcessResult::default();
        let mut terminal = false;
        let mut continued = None;

        // 1. Apply the new stimulus
        if let Some(stimulus) = stimulus {
            let (event, actions) = match stimulus {
                Stimulus::ActivityCompleted {
                    activity_id,
                    result,
                } => {
                    let actions = workflow.on_activity_completed(&activity_id, result.clone());
                    (
                        WorkflowEvent::ActivityCompleted {
                            activity_id,
                            result,
                        },
                        actions,
                    )
                }
                Stimulus::ActivityFailed { activity_id, error } => {
                    let actions = workflow.on_activity_failed(&activity_id, &error);
                    (
                        WorkflowEvent::ActivityFailed {
                            activity_id,
                            error,
                            will_retry: false,
                        },
                        actions,
                    )
                }
                Stimulus::TimerFired { timer_id } => {
                    let actions = workflow.on_timer_fired(&timer_id);
                    (WorkflowEvent::TimerFired { timer_id }, actions)
                }
            };

            sequence = self
                .store
                .append_events(workflow_id, sequence, vec![event])
                .await?;
            result.events_written += 1;

            let batch = self
                .process_actions(workflow_id, sequence, actions)
                .await?;
            sequence = batch.sequence;
            result.events_written += batch.events_written;
            result.tasks_enqueued += batch.tasks_enqueued;
            terminal = batch.terminal;
            continued = batch.continued;
        }

        // 2. Drain buffered signals, in receipt order, one callback each.
        //    Signals left over after a terminal transition or a continuation
        //    reset are dropped: they were addressed to an execution that no
        //    longer exists.
        let signals = self.store.pending_signals(workflow_id).await?;
        if !signals.is_empty() && continued.is_none() {
            for signal in &signals {
                result.signals_processed += 1;

                if terminal {
                    warn!(%workflow_id, signal = %signal.name, "dropping signal buffered past terminal transition");
                    continue;
                }

                let actions = workflow.on_signal(signal);
                sequence = self
                    .store
                    .append_events(
                        workflow_id,
                        sequence,
                        vec![WorkflowEvent::SignalReceived {
                            signal: signal.clone(),
                        }],
                    )
                    .await?;
                result.events_written += 1;

                let batch = self
                    .process_actions(workflow_id, sequence, actions)
                    .await?;
                sequence = batch.sequence;
                result.events_written += batch.events_written;
                result.tasks_enqueued += batch.tasks_enqueued;
                terminal = terminal || batch.terminal;
                if batch.continued.is_some() {
                    continued = batch.continued;
                    break;
                }
            }

            self.store
                .mark_signals_processed(workflow_id, result.signals_processed)
                .await?;
        }

        // 3. Definitions may flag completion in state without an explicit
        //    terminal action.
        if !terminal && continued.is_none() && workflow.is_completed() {
            terminal = true;
            if let Some(error) = workflow.error() {
                self.store
                    .update_workflow_status(workflow_id, WorkflowStatus::Failed, None, Some(error))
                    .await?;
            } else {
                self.store
                    .update_workflow_status(
                        workflow_id,
                        WorkflowStatus::Completed,
                        workflow.result_json(),
                        None,
                    )
                    .await?;
            }
            self.store.cancel_workflow_timers(workflow_id).await?;
        }

        // 4. Continuation resets run to quiescence.
        if continued.is_some() {
            terminal = self
                .run_continuations(workflow_id, &info.workflow_type, continued, &mut result)
                .await?;
        }

        result.completed = terminal;
        if terminal {
            self.locks.remove(workflow_id);
        }

        Ok(result)
    }

    /// Replay one event into a workflow instance, discarding actions
    fn replay_event(workflow: &mut dyn AnyWorkflow, event: &WorkflowEvent) {
        match event {
            WorkflowEvent::WorkflowStarted { .. } => {
                let _ = workflow.on_start();
            }
            WorkflowEvent::ActivityCompleted {
                activity_id,
                result,
            } => {
                let _ = workflow.on_activity_completed(activity_id, result.clone());
            }
            WorkflowEvent::ActivityFailed {
                activity_id,
                error,
                will_retry,
            } => {
                if !will_retry {
                    let _ = workflow.on_activity_failed(activity_id, error);
                }
            }
            WorkflowEvent::TimerFired { timer_id } => {
                let _ = workflow.on_timer_fired(timer_id);
            }
            WorkflowEvent::SignalReceived { signal } => {
                let _ = workflow.on_signal(signal);
            }
            // Journal-only events: no state transitions to replay
            WorkflowEvent::WorkflowCompleted { .. }
            | WorkflowEvent::WorkflowFailed { .. }
            | WorkflowEvent::WorkflowCancelled { .. }
            | WorkflowEvent::ActivityScheduled { .. }
            | WorkflowEvent::TimerStarted { .. }
            | WorkflowEvent::TimerCancelled { .. } => {}
        }
    }

    /// Run continue-as-new cycles until the instance suspends or terminates.
    /// Returns whether the instance ended terminal.
    async fn run_continuations(
        &self,
        workflow_id: &str,
        workflow_type: &str,
        mut next_input: Option<serde_json::Value>,
        result: &mut ProcessResult,
    ) -> Result<bool, EngineError> {
        while let Some(input) = next_input.take() {
            info!(%workflow_id, "continuing workflow as new");

            self.store.reset_workflow(workflow_id, input.clone()).await?;
            let sequence = self
                .store
                .append_events(
                    workflow_id,
                    0,
                    vec![WorkflowEvent::WorkflowStarted {
                        input: input.clone(),
                    }],
                )
                .await?;
            result.events_written += 1;

            let mut workflow = self.registry.create(workflow_type, input)?;
            let actions = workflow.on_start();
            let batch = self
                .process_actions(workflow_id, sequence, actions)
                .await?;
            result.events_written += batch.events_written;
            result.tasks_enqueued += batch.tasks_enqueued;

            if batch.terminal {
                return Ok(true);
            }
            if batch.continued.is_none() && workflow.is_completed() {
                self.store
                    .update_workflow_status(
                        workflow_id,
                        WorkflowStatus::Completed,
                        workflow.result_json(),
                        None,
                    )
                    .await?;
                self.store.cancel_workflow_timers(workflow_id).await?;
                return Ok(true);
            }
            next_input = batch.continued;
        }

        Ok(false)
    }

    /// Convert one action batch into events and store effects
    async fn process_actions(
        &self,
        workflow_id: &str,
        mut sequence: i32,
        actions: Vec<WorkflowAction>,
    ) -> Result<ActionBatch, EngineError> {
        let mut batch = ActionBatch {
            sequence,
            events_written: 0,
            tasks_enqueued: 0,
            terminal: false,
            continued: None,
        };

        let mut actions = actions.into_iter();
        for action in actions.by_ref() {
            match action {
                WorkflowAction::ScheduleActivity {
                    activity_id,
                    activity_type,
                    input,
                    options,
                } => {
                    debug!(%workflow_id, %activity_id, %activity_type, "scheduling activity");

                    let event = WorkflowEvent::ActivityScheduled {
                        activity_id: activity_id.clone(),
                        activity_type: activity_type.clone(),
                        input: input.clone(),
                        options: options.clone(),
                    };
                    sequence = self
                        .store
                        .append_events(workflow_id, sequence, vec![event])
                        .await?;
                    batch.events_written += 1;

                    self.store
                        .enqueue_task(TaskDefinition {
                            workflow_id: workflow_id.to_string(),
                            activity_id,
                            activity_type,
                            input,
                            options,
                        })
                        .await?;
                    batch.tasks_enqueued += 1;
                }

                WorkflowAction::StartTimer { timer_id, duration } => {
                    let fire_at = Utc::now()
                        + chrono::Duration::from_std(duration)
                            .unwrap_or_else(|_| chrono::Duration::zero());
                    debug!(%workflow_id, %timer_id, %fire_at, "starting durable timer");

                    let event = WorkflowEvent::TimerStarted {
                        timer_id: timer_id.clone(),
                        fire_at,
                    };
                    sequence = self
                        .store
                        .append_events(workflow_id, sequence, vec![event])
                        .await?;
                    batch.events_written += 1;

                    self.store
                        .schedule_timer(workflow_id, &timer_id, fire_at)
                        .await?;
                }

                WorkflowAction::CancelTimer { timer_id } => {
                    debug!(%workflow_id, %timer_id, "cancelling timer");

                    let event = WorkflowEvent::TimerCancelled {
                        timer_id: timer_id.clone(),
                    };
                    sequence = self
                        .store
                        .append_events(workflow_id, sequence, vec![event])
                        .await?;
                    batch.events_written += 1;

                    self.store.cancel_timer(workflow_id, &timer_id).await?;
                }

                WorkflowAction::CompleteWorkflow { result } => {
                    info!(%workflow_id, "completing workflow");

                    let event = WorkflowEvent::WorkflowCompleted {
                        result: result.clone(),
                    };
                    sequence = self
                        .store
                        .append_events(workflow_id, sequence, vec![event])
                        .await?;
                    batch.events_written += 1;

                    self.store
                        .update_workflow_status(
                            workflow_id,
                            WorkflowStatus::Completed,
                            Some(result),
                            None,
                        )
                        .await?;
                    self.store.cancel_workflow_timers(workflow_id).await?;
                    batch.terminal = true;
                }

                WorkflowAction::FailWorkflow { error } => {
                    error!(%workflow_id, error = %error.message, "failing workflow");

                    let event = WorkflowEvent::WorkflowFailed {
                        error: error.clone(),
                    };
                    sequence = self
                        .store
                        .append_events(workflow_id, sequence, vec![event])
                        .await?;
                    batch.events_written += 1;

                    self.store
                        .update_workflow_status(
                            workflow_id,
                            WorkflowStatus::Failed,
                            None,
                            Some(error),
                        )
                        .await?;
                    self.store.cancel_workflow_timers(workflow_id).await?;
                    batch.terminal = true;
                }

                WorkflowAction::CancelWorkflow { reason } => {
                    info!(%workflow_id, %reason, "cancelling workflow");

                    let event = WorkflowEvent::WorkflowCancelled {
                        reason: reason.clone(),
                    };
                    sequence = self
                        .store
                        .append_events(workflow_id, sequence, vec![event])
                        .await?;
                    batch.events_written += 1;

                    self.store
                        .update_workflow_status(
                            workflow_id,
                            WorkflowStatus::Cancelled,
                            None,
                            None,
                        )
                        .await?;
                    self.store.cancel_workflow_timers(workflow_id).await?;
                    batch.terminal = true;
                }

                WorkflowAction::ContinueAsNew { input } => {
                    batch.continued = Some(input);
                    break;
                }

                WorkflowAction::None => {}
            }

            if batch.terminal {
                break;
            }
        }

        let remaining = actions.count();
        if remaining > 0 {
            warn!(%workflow_id, remaining, "ignoring actions after terminal/continue action");
        }

        batch.sequence = sequence;
        Ok(batch)
    }

    /// Shared tail of the start path
    async fn finish_pass(
        &self,
        workflow_id: &str,
        workflow_type: &str,
        workflow: &dyn AnyWorkflow,
        batch: ActionBatch,
    ) -> Result<(), EngineError> {
        if batch.terminal {
            self.locks.remove(workflow_id);
            return Ok(());
        }

        if let Some(input) = batch.continued {
            let mut result = ProcessResult::default();
            let terminal = self
                .run_continuations(workflow_id, workflow_type, Some(input), &mut result)
                .await?;
            if terminal {
                self.locks.remove(workflow_id);
            }
            return Ok(());
        }

        if workflow.is_completed() {
            if let Some(error) = workflow.error() {
                self.store
                    .update_workflow_status(workflow_id, WorkflowStatus::Failed, None, Some(error))
                    .await?;
            } else {
                self.store
                    .update_workflow_status(
                        workflow_id,
                        WorkflowStatus::Completed,
                        workflow.result_json(),
                        None,
                    )
                    .await?;
            }
            self.store.cancel_workflow_timers(workflow_id).await?;
            self.locks.remove(workflow_id);
        }

        Ok(())
    }
}
