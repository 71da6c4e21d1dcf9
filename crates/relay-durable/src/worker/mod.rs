//! Worker pool for activity execution
//!
//! The pool is the Activity Executor: it claims due tasks from the store,
//! runs the registered handler under the per-attempt timeout, and reports
//! the outcome back into the workflow executor — completing the task or
//! consulting the retry policy.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      WorkerPool                       │
//! │   poll loop (adaptive backoff)                        │
//! │        │ claim_due_tasks                              │
//! │        ▼                                              │
//! │   [attempt] [attempt] ... (semaphore-capped)          │
//! │        │                                              │
//! │        ├─ ok ───────► complete_task ► on_activity_completed
//! │        └─ err ──────► fail_task ─┬─► requeue (backoff)│
//! │                                  └─► on_activity_failed
//! └──────────────────────────────────────────────────────┘
//! ```

mod pool;

pub use pool::{WorkerError, WorkerPool, WorkerPoolConfig};
