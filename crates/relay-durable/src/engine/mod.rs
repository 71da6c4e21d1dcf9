//! Workflow execution engine
//!
//! The engine module provides the [`WorkflowExecutor`], which drives workflow
//! state machines through event replay and action processing, and the
//! type-erased [`WorkflowRegistry`] it replays definitions from.

mod executor;
mod registry;

pub use executor::{
    EngineConfig, EngineError, ProcessResult, SignalOutcome, StartOutcome, WorkflowExecutor,
};
pub use registry::{AnyWorkflow, RegistryError, WorkflowFactory, WorkflowRegistry};
