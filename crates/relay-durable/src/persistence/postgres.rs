//! PostgreSQL implementation of WorkflowStore
//!
//! Production persistence:
//! - Optimistic concurrency on event appends via sequence numbers
//! - Task and timer claiming with `FOR UPDATE SKIP LOCKED`
//! - Signal mailbox in receipt (serial) order

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::*;
use crate::activity::ActivityError;
use crate::workflow::{ActivityOptions, WorkflowError, WorkflowEvent, WorkflowSignal};

/// PostgreSQL [`WorkflowStore`]
///
/// # Example
///
/// ```ignore
/// let pool = PgPool::connect(&database_url).await?;
/// let store = PostgresWorkflowStore::new(pool);
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresWorkflowStore {
    pool: PgPool,
}

impl PostgresWorkflowStore {
    /// Create a store over the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn parse_workflow_status(status: &str) -> Result<WorkflowStatus, StoreError> {
    match status {
        "running" => Ok(WorkflowStatus::Running),
        "completed" => Ok(WorkflowStatus::Completed),
        "failed" => Ok(WorkflowStatus::Failed),
        "cancelled" => Ok(WorkflowStatus::Cancelled),
        other => Err(StoreError::Database(format!(
            "unknown workflow status: {other}"
        ))),
    }
}

fn event_type_name(event: &WorkflowEvent) -> &'static str {
    match event {
        WorkflowEvent::WorkflowStarted { .. } => "workflow_started",
        WorkflowEvent::WorkflowCompleted { .. } => "workflow_completed",
        WorkflowEvent::WorkflowFailed { .. } => "workflow_failed",
        WorkflowEvent::WorkflowCancelled { .. } => "workflow_cancelled",
        WorkflowEvent::ActivityScheduled { .. } => "activity_scheduled",
        WorkflowEvent::ActivityCompleted { .. } => "activity_completed",
        WorkflowEvent::ActivityFailed { .. } => "activity_failed",
        WorkflowEvent::TimerStarted { .. } => "timer_started",
        WorkflowEvent::TimerFired { .. } => "timer_fired",
        WorkflowEvent::TimerCancelled { .. } => "timer_cancelled",
        WorkflowEvent::SignalReceived { .. } => "signal_received",
    }
}

#[async_trait]
impl WorkflowStore for PostgresWorkflowStore {
    #[instrument(skip(self, input))]
    async fn create_workflow(
        &self,
        workflow_id: &str,
        workflow_type: &str,
        input: serde_json::Value,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO relay_workflows (id, workflow_type, status, input)
            VALUES ($1, $2, 'running', $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(workflow_id)
        .bind(workflow_type)
        .bind(&input)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to create workflow: {e}");
            db_err(e)
        })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::WorkflowExists(workflow_id.to_string()));
        }

        debug!(%workflow_id, %workflow_type, "created workflow");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_workflow_status(&self, workflow_id: &str) -> Result<WorkflowStatus, StoreError> {
        let row = sqlx::query("SELECT status FROM relay_workflows WHERE id = $1")
            .bind(workflow_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| StoreError::WorkflowNotFound(workflow_id.to_string()))?;

        let status: String = row.get("status");
        parse_workflow_status(&status)
    }

    #[instrument(skip(self))]
    async fn get_workflow_info(&self, workflow_id: &str) -> Result<WorkflowInfo, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, workflow_type, status, input, result, error, run_count
            FROM relay_workflows
            WHERE id = $1
            "#,
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| StoreError::WorkflowNotFound(workflow_id.to_string()))?;

        let status: String = row.get("status");
        let error_json: Option<serde_json::Value> = row.get("error");

        Ok(WorkflowInfo {
            id: row.get("id"),
            workflow_type: row.get("workflow_type"),
            status: parse_workflow_status(&status)?,
            input: row.get("input"),
            result: row.get("result"),
            error: error_json.and_then(|v| serde_json::from_value::<WorkflowError>(v).ok()),
            run_count: row.get::<i32, _>("run_count") as u32,
        })
    }

    #[instrument(skip(self, events))]
    async fn append_events(
        &self,
        workflow_id: &str,
        expected_sequence: i32,
        events: Vec<WorkflowEvent>,
    ) -> Result<i32, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query(
            r#"
            SELECT COALESCE(MAX(sequence_num) + 1, 0) AS next_seq
            FROM relay_workflow_events
            WHERE workflow_id = $1
            "#,
        )
        .bind(workflow_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        let current_sequence = row.get::<i32, _>("next_seq");
        if current_sequence != expected_sequence {
            return Err(StoreError::ConcurrencyConflict {
                expected: expected_sequence,
                actual: current_sequence,
            });
        }

        let mut new_sequence = current_sequence;
        for event in events {
            let event_data = serde_json::to_value(&event)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;

            sqlx::query(
                r#"
                INSERT INTO relay_workflow_events (workflow_id, sequence_num, event_type, event_data)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(workflow_id)
            .bind(new_sequence)
            .bind(event_type_name(&event))
            .bind(&event_data)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            new_sequence += 1;
        }

        tx.commit().await.map_err(db_err)?;

        debug!(%workflow_id, new_sequence, "appended events");
        Ok(new_sequence)
    }

    #[instrument(skip(self))]
    async fn load_events(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<(i32, WorkflowEvent)>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT sequence_num, event_data
            FROM relay_workflow_events
            WHERE workflow_id = $1
            ORDER BY sequence_num
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let seq: i32 = row.get("sequence_num");
            let data: serde_json::Value = row.get("event_data");
            let event: WorkflowEvent = serde_json::from_value(data)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            events.push((seq, event));
        }

        Ok(events)
    }

    #[instrument(skip(self, result, error))]
    async fn update_workflow_status(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
        result: Option<serde_json::Value>,
        error: Option<WorkflowError>,
    ) -> Result<(), StoreError> {
        let status_str = status.to_string();
        let error_json = error
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let updated = sqlx::query(
            r#"
            UPDATE relay_workflows
            SET status = $2,
                result = COALESCE($3, result),
                error = COALESCE($4, error),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(workflow_id)
        .bind(&status_str)
        .bind(&result)
        .bind(&error_json)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::WorkflowNotFound(workflow_id.to_string()));
        }

        debug!(%workflow_id, %status_str, "updated workflow status");
        Ok(())
    }

    #[instrument(skip(self, input))]
    async fn reset_workflow(
        &self,
        workflow_id: &str,
        input: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let updated = sqlx::query(
            r#"
            UPDATE relay_workflows
            SET input = $2,
                status = 'running',
                result = NULL,
                error = NULL,
                run_count = run_count + 1,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(workflow_id)
        .bind(&input)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::WorkflowNotFound(workflow_id.to_string()));
        }

        sqlx::query("DELETE FROM relay_workflow_events WHERE workflow_id = $1")
            .bind(workflow_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        // Unclaimed tasks die with the old generation; claimed ones are left
        // to finish and report into the fresh history, where they are dropped
        sqlx::query(
            "DELETE FROM relay_activity_tasks WHERE workflow_id = $1 AND status = 'pending'",
        )
        .bind(workflow_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query("DELETE FROM relay_timers WHERE workflow_id = $1")
            .bind(workflow_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        sqlx::query("DELETE FROM relay_signals WHERE workflow_id = $1")
            .bind(workflow_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        debug!(%workflow_id, "reset workflow for continuation");
        Ok(())
    }

    #[instrument(skip(self, task))]
    async fn enqueue_task(&self, task: TaskDefinition) -> Result<Uuid, StoreError> {
        let task_id = Uuid::now_v7();
        let options_json = serde_json::to_value(&task.options)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO relay_activity_tasks (id, workflow_id, activity_id, activity_type, input, options)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(task_id)
        .bind(&task.workflow_id)
        .bind(&task.activity_id)
        .bind(&task.activity_type)
        .bind(&task.input)
        .bind(&options_json)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to enqueue task: {e}");
            db_err(e)
        })?;

        debug!(%task_id, workflow_id = %task.workflow_id, activity_type = %task.activity_type, "enqueued task");
        Ok(task_id)
    }

    #[instrument(skip(self))]
    async fn claim_due_tasks(
        &self,
        worker_id: &str,
        limit: usize,
    ) -> Result<Vec<ClaimedTask>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let rows = sqlx::query(
            r#"
            SELECT id, workflow_id, activity_id, activity_type, input, options, attempt
            FROM relay_activity_tasks
            WHERE status = 'pending' AND next_attempt_at <= now()
            ORDER BY next_attempt_at
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.get("id");
            let attempt = row.get::<i32, _>("attempt") + 1;

            sqlx::query(
                r#"
                UPDATE relay_activity_tasks
                SET status = 'claimed', attempt = $2, claimed_by = $3, updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(attempt)
            .bind(worker_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            let options_json: serde_json::Value = row.get("options");
            let options: ActivityOptions = serde_json::from_value(options_json)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;

            claimed.push(ClaimedTask {
                id,
                workflow_id: row.get("workflow_id"),
                activity_id: row.get("activity_id"),
                activity_type: row.get("activity_type"),
                input: row.get("input"),
                options,
                attempt: attempt as u32,
            });
        }

        tx.commit().await.map_err(db_err)?;

        if !claimed.is_empty() {
            debug!(count = claimed.len(), %worker_id, "claimed tasks");
        }
        Ok(claimed)
    }

    #[instrument(skip(self, result))]
    async fn complete_task(
        &self,
        task_id: Uuid,
        result: serde_json::Value,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE relay_activity_tasks
            SET status = 'completed', result = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(task_id)
        .bind(&result)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::TaskNotFound(task_id));
        }
        Ok(())
    }

    #[instrument(skip(self, error))]
    async fn fail_task(
        &self,
        task_id: Uuid,
        error: &ActivityError,
    ) -> Result<TaskFailureOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query(
            r#"
            SELECT options, attempt FROM relay_activity_tasks
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or(StoreError::TaskNotFound(task_id))?;

        let options_json: serde_json::Value = row.get("options");
        let options: ActivityOptions = serde_json::from_value(options_json)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let attempt = row.get::<i32, _>("attempt") as u32;

        let policy = &options.retry_policy;
        let may_retry = error.retryable
            && policy.should_retry(error.error_type.as_deref())
            && policy.has_attempts_remaining(attempt);

        let outcome = if may_retry {
            let next_attempt = attempt + 1;
            let delay = policy.delay_for_attempt(next_attempt);
            let next_attempt_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

            sqlx::query(
                r#"
                UPDATE relay_activity_tasks
                SET status = 'pending',
                    claimed_by = NULL,
                    last_error = $2,
                    next_attempt_at = $3,
                    updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(task_id)
            .bind(&error.message)
            .bind(next_attempt_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            TaskFailureOutcome::WillRetry {
                next_attempt,
                delay,
            }
        } else {
            sqlx::query(
                r#"
                UPDATE relay_activity_tasks
                SET status = 'failed', last_error = $2, updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(task_id)
            .bind(&error.message)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            TaskFailureOutcome::ExhaustedRetries
        };

        tx.commit().await.map_err(db_err)?;
        Ok(outcome)
    }

    #[instrument(skip(self))]
    async fn schedule_timer(
        &self,
        workflow_id: &str,
        timer_id: &str,
        fire_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO relay_timers (workflow_id, timer_id, fire_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (workflow_id, timer_id) DO UPDATE SET fire_at = EXCLUDED.fire_at
            "#,
        )
        .bind(workflow_id)
        .bind(timer_id)
        .bind(fire_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn cancel_timer(&self, workflow_id: &str, timer_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM relay_timers WHERE workflow_id = $1 AND timer_id = $2")
            .bind(workflow_id)
            .bind(timer_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn cancel_workflow_timers(&self, workflow_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM relay_timers WHERE workflow_id = $1")
            .bind(workflow_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn claim_due_timers(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TimerEntry>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let rows = sqlx::query(
            r#"
            SELECT workflow_id, timer_id, fire_at
            FROM relay_timers
            WHERE fire_at <= $1
            ORDER BY fire_at
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;

        let mut due = Vec::with_capacity(rows.len());
        for row in rows {
            let entry = TimerEntry {
                workflow_id: row.get("workflow_id"),
                timer_id: row.get("timer_id"),
                fire_at: row.get("fire_at"),
            };

            sqlx::query("DELETE FROM relay_timers WHERE workflow_id = $1 AND timer_id = $2")
                .bind(&entry.workflow_id)
                .bind(&entry.timer_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;

            due.push(entry);
        }

        tx.commit().await.map_err(db_err)?;
        Ok(due)
    }

    #[instrument(skip(self))]
    async fn pending_timers(&self, workflow_id: &str) -> Result<Vec<TimerEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT workflow_id, timer_id, fire_at
            FROM relay_timers
            WHERE workflow_id = $1
            ORDER BY fire_at
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|row| TimerEntry {
                workflow_id: row.get("workflow_id"),
                timer_id: row.get("timer_id"),
                fire_at: row.get("fire_at"),
            })
            .collect())
    }

    #[instrument(skip(self, signal), fields(signal_name = %signal.name))]
    async fn send_signal(
        &self,
        workflow_id: &str,
        signal: WorkflowSignal,
    ) -> Result<(), StoreError> {
        let signal_json =
            serde_json::to_value(&signal).map_err(|e| StoreError::Serialization(e.to_string()))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO relay_signals (workflow_id, signal, sent_at)
            SELECT $1, $2, $3
            WHERE EXISTS (SELECT 1 FROM relay_workflows WHERE id = $1)
            "#,
        )
        .bind(workflow_id)
        .bind(&signal_json)
        .bind(signal.sent_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if inserted.rows_affected() == 0 {
            return Err(StoreError::WorkflowNotFound(workflow_id.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn pending_signals(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<WorkflowSignal>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT signal
            FROM relay_signals
            WHERE workflow_id = $1 AND NOT processed
            ORDER BY id
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut signals = Vec::with_capacity(rows.len());
        for row in rows {
            let data: serde_json::Value = row.get("signal");
            let signal: WorkflowSignal = serde_json::from_value(data)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            signals.push(signal);
        }

        Ok(signals)
    }

    #[instrument(skip(self))]
    async fn mark_signals_processed(
        &self,
        workflow_id: &str,
        count: usize,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE relay_signals
            SET processed = TRUE
            WHERE id IN (
                SELECT id FROM relay_signals
                WHERE workflow_id = $1 AND NOT processed
                ORDER BY id
                LIMIT $2
            )
            "#,
        )
        .bind(workflow_id)
        .bind(count as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
