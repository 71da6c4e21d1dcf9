//! In-memory implementation of WorkflowStore
//!
//! Single-process store used by the test suites and by embedded callers that
//! do not need crash durability. Semantics match the PostgreSQL
//! implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::*;
use crate::activity::ActivityError;
use crate::workflow::{WorkflowError, WorkflowEvent, WorkflowSignal};

/// Internal workflow row
struct WorkflowState {
    workflow_type: String,
    status: WorkflowStatus,
    input: serde_json::Value,
    result: Option<serde_json::Value>,
    error: Option<WorkflowError>,
    run_count: u32,
    events: Vec<WorkflowEvent>,
    signals: Vec<WorkflowSignal>,
}

/// Internal task row
struct TaskState {
    definition: TaskDefinition,
    status: TaskStatus,
    /// Attempts started so far
    attempt: u32,
    next_attempt_at: DateTime<Utc>,
    claimed_by: Option<String>,
    last_error: Option<String>,
}

/// In-memory [`WorkflowStore`]
///
/// ```
/// use relay_durable::InMemoryWorkflowStore;
///
/// let store = InMemoryWorkflowStore::new();
/// ```
pub struct InMemoryWorkflowStore {
    workflows: RwLock<HashMap<String, WorkflowState>>,
    tasks: RwLock<HashMap<Uuid, TaskState>>,
    timers: RwLock<HashMap<(String, String), DateTime<Utc>>>,
}

impl InMemoryWorkflowStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
            tasks: RwLock::new(HashMap::new()),
            timers: RwLock::new(HashMap::new()),
        }
    }

    /// Number of workflow instances
    pub fn workflow_count(&self) -> usize {
        self.workflows.read().len()
    }

    /// Number of tasks currently pending
    pub fn pending_task_count(&self) -> usize {
        self.tasks
            .read()
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .count()
    }

    /// Clear all data (tests)
    pub fn clear(&self) {
        self.workflows.write().clear();
        self.tasks.write().clear();
        self.timers.write().clear();
    }
}

impl Default for InMemoryWorkflowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn create_workflow(
        &self,
        workflow_id: &str,
        workflow_type: &str,
        input: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut workflows = self.workflows.write();
        if workflows.contains_key(workflow_id) {
            return Err(StoreError::WorkflowExists(workflow_id.to_string()));
        }
        workflows.insert(
            workflow_id.to_string(),
            WorkflowState {
                workflow_type: workflow_type.to_string(),
                status: WorkflowStatus::Running,
                input,
                result: None,
                error: None,
                run_count: 1,
                events: vec![],
                signals: vec![],
            },
        );
        Ok(())
    }

    async fn get_workflow_status(&self, workflow_id: &str) -> Result<WorkflowStatus, StoreError> {
        let workflows = self.workflows.read();
        workflows
            .get(workflow_id)
            .map(|w| w.status)
            .ok_or_else(|| StoreError::WorkflowNotFound(workflow_id.to_string()))
    }

    async fn get_workflow_info(&self, workflow_id: &str) -> Result<WorkflowInfo, StoreError> {
        let workflows = self.workflows.read();
        let workflow = workflows
            .get(workflow_id)
            .ok_or_else(|| StoreError::WorkflowNotFound(workflow_id.to_string()))?;

        Ok(WorkflowInfo {
            id: workflow_id.to_string(),
            workflow_type: workflow.workflow_type.clone(),
            status: workflow.status,
            input: workflow.input.clone(),
            result: workflow.result.clone(),
            error: workflow.error.clone(),
            run_count: workflow.run_count,
        })
    }

    async fn append_events(
        &self,
        workflow_id: &str,
        expected_sequence: i32,
        events: Vec<WorkflowEvent>,
    ) -> Result<i32, StoreError> {
        let mut workflows = self.workflows.write();
        let workflow = workflows
            .get_mut(workflow_id)
            .ok_or_else(|| StoreError::WorkflowNotFound(workflow_id.to_string()))?;

        let current_sequence = workflow.events.len() as i32;
        if current_sequence != expected_sequence {
            return Err(StoreError::ConcurrencyConflict {
                expected: expected_sequence,
                actual: current_sequence,
            });
        }

        workflow.events.extend(events);
        Ok(workflow.events.len() as i32)
    }

    async fn load_events(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<(i32, WorkflowEvent)>, StoreError> {
        let workflows = self.workflows.read();
        let workflow = workflows
            .get(workflow_id)
            .ok_or_else(|| StoreError::WorkflowNotFound(workflow_id.to_string()))?;

        Ok(workflow
            .events
            .iter()
            .enumerate()
            .map(|(i, e)| (i as i32, e.clone()))
            .collect())
    }

    async fn update_workflow_status(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
        result: Option<serde_json::Value>,
        error: Option<WorkflowError>,
    ) -> Result<(), StoreError> {
        let mut workflows = self.workflows.write();
        let workflow = workflows
            .get_mut(workflow_id)
            .ok_or_else(|| StoreError::WorkflowNotFound(workflow_id.to_string()))?;

        workflow.status = status;
        if result.is_some() {
            workflow.result = result;
        }
        if error.is_some() {
            workflow.error = error;
        }
        Ok(())
    }

    async fn reset_workflow(
        &self,
        workflow_id: &str,
        input: serde_json::Value,
    ) -> Result<(), StoreError> {
        {
            let mut workflows = self.workflows.write();
            let workflow = workflows
                .get_mut(workflow_id)
                .ok_or_else(|| StoreError::WorkflowNotFound(workflow_id.to_string()))?;

            workflow.input = input;
            workflow.status = WorkflowStatus::Running;
            workflow.result = None;
            workflow.error = None;
            workflow.run_count += 1;
            workflow.events.clear();
            workflow.signals.clear();
        }

        // Unclaimed tasks die with the old generation; in-flight ones finish
        // and report against the new history, where they are dropped.
        self.tasks
            .write()
            .retain(|_, t| !(t.definition.workflow_id == workflow_id && t.status == TaskStatus::Pending));

        self.timers
            .write()
            .retain(|(wf, _), _| wf != workflow_id);

        Ok(())
    }

    async fn enqueue_task(&self, task: TaskDefinition) -> Result<Uuid, StoreError> {
        let id = Uuid::now_v7();
        self.tasks.write().insert(
            id,
            TaskState {
                definition: task,
                status: TaskStatus::Pending,
                attempt: 0,
                next_attempt_at: Utc::now(),
                claimed_by: None,
                last_error: None,
            },
        );
        Ok(id)
    }

    async fn claim_due_tasks(
        &self,
        worker_id: &str,
        limit: usize,
    ) -> Result<Vec<ClaimedTask>, StoreError> {
        let now = Utc::now();
        let mut tasks = self.tasks.write();

        let mut due: Vec<(Uuid, DateTime<Utc>)> = tasks
            .iter()
            .filter(|(_, t)| t.status == TaskStatus::Pending && t.next_attempt_at <= now)
            .map(|(id, t)| (*id, t.next_attempt_at))
            .collect();
        due.sort_by_key(|(_, at)| *at);
        due.truncate(limit);

        let mut claimed = Vec::with_capacity(due.len());
        for (id, _) in due {
            let task = tasks.get_mut(&id).expect("task present under lock");
            task.status = TaskStatus::Claimed;
            task.attempt += 1;
            task.claimed_by = Some(worker_id.to_string());

            claimed.push(ClaimedTask {
                id,
                workflow_id: task.definition.workflow_id.clone(),
                activity_id: task.definition.activity_id.clone(),
                activity_type: task.definition.activity_type.clone(),
                input: task.definition.input.clone(),
                options: task.definition.options.clone(),
                attempt: task.attempt,
            });
        }

        Ok(claimed)
    }

    async fn complete_task(
        &self,
        task_id: Uuid,
        _result: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(&task_id)
            .ok_or(StoreError::TaskNotFound(task_id))?;
        task.status = TaskStatus::Completed;
        Ok(())
    }

    async fn fail_task(
        &self,
        task_id: Uuid,
        error: &ActivityError,
    ) -> Result<TaskFailureOutcome, StoreError> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(&task_id)
            .ok_or(StoreError::TaskNotFound(task_id))?;

        task.last_error = Some(error.message.clone());

        let policy = &task.definition.options.retry_policy;
        let may_retry = error.retryable
            && policy.should_retry(error.error_type.as_deref())
            && policy.has_attempts_remaining(task.attempt);

        if may_retry {
            let next_attempt = task.attempt + 1;
            let delay = policy.delay_for_attempt(next_attempt);
            task.status = TaskStatus::Pending;
            task.next_attempt_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            task.claimed_by = None;
            Ok(TaskFailureOutcome::WillRetry {
                next_attempt,
                delay,
            })
        } else {
            task.status = TaskStatus::Failed;
            Ok(TaskFailureOutcome::ExhaustedRetries)
        }
    }

    async fn schedule_timer(
        &self,
        workflow_id: &str,
        timer_id: &str,
        fire_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.timers
            .write()
            .insert((workflow_id.to_string(), timer_id.to_string()), fire_at);
        Ok(())
    }

    async fn cancel_timer(&self, workflow_id: &str, timer_id: &str) -> Result<(), StoreError> {
        self.timers
            .write()
            .remove(&(workflow_id.to_string(), timer_id.to_string()));
        Ok(())
    }

    async fn cancel_workflow_timers(&self, workflow_id: &str) -> Result<(), StoreError> {
        self.timers.write().retain(|(wf, _), _| wf != workflow_id);
        Ok(())
    }

    async fn claim_due_timers(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TimerEntry>, StoreError> {
        let mut timers = self.timers.write();

        let mut due: Vec<TimerEntry> = timers
            .iter()
            .filter(|(_, fire_at)| **fire_at <= now)
            .map(|((wf, id), fire_at)| TimerEntry {
                workflow_id: wf.clone(),
                timer_id: id.clone(),
                fire_at: *fire_at,
            })
            .collect();
        due.sort_by_key(|t| t.fire_at);
        due.truncate(limit);

        for entry in &due {
            timers.remove(&(entry.workflow_id.clone(), entry.timer_id.clone()));
        }

        Ok(due)
    }

    async fn pending_timers(&self, workflow_id: &str) -> Result<Vec<TimerEntry>, StoreError> {
        let timers = self.timers.read();
        let mut pending: Vec<TimerEntry> = timers
            .iter()
            .filter(|((wf, _), _)| wf == workflow_id)
            .map(|((wf, id), fire_at)| TimerEntry {
                workflow_id: wf.clone(),
                timer_id: id.clone(),
                fire_at: *fire_at,
            })
            .collect();
        pending.sort_by_key(|t| t.fire_at);
        Ok(pending)
    }

    async fn send_signal(
        &self,
        workflow_id: &str,
        signal: WorkflowSignal,
    ) -> Result<(), StoreError> {
        let mut workflows = self.workflows.write();
        let workflow = workflows
            .get_mut(workflow_id)
            .ok_or_else(|| StoreError::WorkflowNotFound(workflow_id.to_string()))?;
        workflow.signals.push(signal);
        Ok(())
    }

    async fn pending_signals(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<WorkflowSignal>, StoreError> {
        let workflows = self.workflows.read();
        let workflow = workflows
            .get(workflow_id)
            .ok_or_else(|| StoreError::WorkflowNotFound(workflow_id.to_string()))?;
        Ok(workflow.signals.clone())
    }

    async fn mark_signals_processed(
        &self,
        workflow_id: &str,
        count: usize,
    ) -> Result<(), StoreError> {
        let mut workflows = self.workflows.write();
        let workflow = workflows
            .get_mut(workflow_id)
            .ok_or_else(|| StoreError::WorkflowNotFound(workflow_id.to_string()))?;
        workflow.signals.drain(..count.min(workflow.signals.len()));
        Ok(())
    }
}
