//! Persistence layer for durable execution
//!
//! This module provides:
//! - [`WorkflowStore`] trait for instance, event, task, timer and signal
//!   persistence
//! - [`InMemoryWorkflowStore`] for tests and embedded single-process use
//! - [`PostgresWorkflowStore`] for production

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryWorkflowStore;
pub use postgres::PostgresWorkflowStore;
pub use store::{
    ClaimedTask, StoreError, TaskDefinition, TaskFailureOutcome, TaskStatus, TimerEntry,
    WorkflowInfo, WorkflowStatus, WorkflowStore,
};
