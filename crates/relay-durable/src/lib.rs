//! # Relay Durable Execution Engine
//!
//! The crash-recoverable orchestration core behind Relay's long-running CRM
//! processes (meeting recording bots, outbound sequence enrollments).
//!
//! ## Features
//!
//! - **Event-sourced instances**: every state change is persisted as an
//!   event; replay rebuilds the exact state after a restart
//! - **Deterministic identity**: workflow ids are business keys
//!   (`meeting-bot-<meetingId>`), making `Start` idempotent and enforcing one
//!   live instance per key
//! - **Retryable activities**: bounded attempts with exponential backoff and
//!   non-retryable error classes
//! - **Durable timers**: persisted wake-ups that survive restarts
//! - **Signals**: best-effort external events, delivered in receipt order,
//!   dropped (and logged) for unknown or finished instances
//! - **Continue-as-new**: indefinite processes reset their history each cycle
//!   and keep O(1) persisted state
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowExecutor                        │
//! │  (replays event history, applies stimuli, persists actions)  │
//! └─────────────────────────────────────────────────────────────┘
//!            ▲                    │                    ▲
//!            │ on_timer_fired     │ enqueue_task       │ on_activity_*
//! ┌──────────┴─────────┐ ┌────────▼─────────┐ ┌────────┴─────────┐
//! │    TimerService    │ │  WorkflowStore   │ │    WorkerPool    │
//! │  (fires due rows)  │ │ (memory/postgres)│ │ (runs activities)│
//! └────────────────────┘ └──────────────────┘ └──────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use relay_durable::prelude::*;
//!
//! let store = Arc::new(InMemoryWorkflowStore::new());
//! let mut executor = WorkflowExecutor::new(store);
//! executor.register::<MeetingBotWorkflow>();
//! let executor = Arc::new(executor);
//!
//! let pool = WorkerPool::new(executor.clone(), WorkerPoolConfig::default());
//! pool.register_activity(CreateRecordingBotActivity { recorder });
//! pool.start()?;
//!
//! let timers = TimerService::new(executor.clone(), TimerServiceConfig::default());
//! timers.start()?;
//!
//! executor
//!     .start_workflow::<MeetingBotWorkflow>(&meeting_bot_workflow_id("mtg1"), input)
//!     .await?;
//! ```

pub mod activity;
pub mod engine;
pub mod persistence;
pub mod reliability;
pub mod timer;
pub mod worker;
pub mod workflow;

/// Prelude for common imports
pub mod prelude {
    pub use crate::activity::{Activity, ActivityContext, ActivityError};
    pub use crate::engine::{
        EngineConfig, EngineError, SignalOutcome, StartOutcome, WorkflowExecutor,
        WorkflowRegistry,
    };
    pub use crate::persistence::{
        ClaimedTask, InMemoryWorkflowStore, PostgresWorkflowStore, StoreError, TaskDefinition,
        WorkflowStatus, WorkflowStore,
    };
    pub use crate::reliability::RetryPolicy;
    pub use crate::timer::{TimerService, TimerServiceConfig};
    pub use crate::worker::{WorkerPool, WorkerPoolConfig};
    pub use crate::workflow::{
        ActivityOptions, Workflow, WorkflowAction, WorkflowError, WorkflowEvent, WorkflowSignal,
    };
}

// Re-export key types at crate root
pub use activity::{Activity, ActivityContext, ActivityError};
pub use engine::{
    EngineConfig, EngineError, ProcessResult, SignalOutcome, StartOutcome, WorkflowExecutor,
    WorkflowRegistry,
};
pub use persistence::{
    ClaimedTask, InMemoryWorkflowStore, PostgresWorkflowStore, StoreError, TaskDefinition,
    TimerEntry, WorkflowInfo, WorkflowStatus, WorkflowStore,
};
pub use reliability::RetryPolicy;
pub use timer::{TimerService, TimerServiceConfig};
pub use worker::{WorkerError, WorkerPool, WorkerPoolConfig};
pub use workflow::{
    ActivityOptions, Workflow, WorkflowAction, WorkflowError, WorkflowEvent, WorkflowSignal,
};
