//! Type-erased workflow registry
//!
//! Maps workflow type names to factories that build instances from JSON
//! input, so the executor can replay any registered definition without
//! knowing its concrete type.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::activity::ActivityError;
use crate::workflow::{Workflow, WorkflowAction, WorkflowError, WorkflowSignal};

/// Object-safe view of a [`Workflow`]
///
/// All parameters and results cross this boundary as JSON.
pub trait AnyWorkflow: Send + Sync {
    /// Workflow type identifier
    fn workflow_type(&self) -> &'static str;

    /// See [`Workflow::on_start`]
    fn on_start(&mut self) -> Vec<WorkflowAction>;

    /// See [`Workflow::on_activity_completed`]
    fn on_activity_completed(&mut self, activity_id: &str, result: Value) -> Vec<WorkflowAction>;

    /// See [`Workflow::on_activity_failed`]
    fn on_activity_failed(
        &mut self,
        activity_id: &str,
        error: &ActivityError,
    ) -> Vec<WorkflowAction>;

    /// See [`Workflow::on_timer_fired`]
    fn on_timer_fired(&mut self, timer_id: &str) -> Vec<WorkflowAction>;

    /// See [`Workflow::on_signal`]
    fn on_signal(&mut self, signal: &WorkflowSignal) -> Vec<WorkflowAction>;

    /// See [`Workflow::is_completed`]
    fn is_completed(&self) -> bool;

    /// Result as JSON, if completed successfully
    fn result_json(&self) -> Option<Value>;

    /// Error, if failed
    fn error(&self) -> Option<WorkflowError>;
}

struct WorkflowWrapper<W: Workflow> {
    inner: W,
}

impl<W: Workflow> AnyWorkflow for WorkflowWrapper<W> {
    fn workflow_type(&self) -> &'static str {
        W::TYPE
    }

    fn on_start(&mut self) -> Vec<WorkflowAction> {
        self.inner.on_start()
    }

    fn on_activity_completed(&mut self, activity_id: &str, result: Value) -> Vec<WorkflowAction> {
        self.inner.on_activity_completed(activity_id, result)
    }

    fn on_activity_failed(
        &mut self,
        activity_id: &str,
        error: &ActivityError,
    ) -> Vec<WorkflowAction> {
        self.inner.on_activity_failed(activity_id, error)
    }

    fn on_timer_fired(&mut self, timer_id: &str) -> Vec<WorkflowAction> {
        self.inner.on_timer_fired(timer_id)
    }

    fn on_signal(&mut self, signal: &WorkflowSignal) -> Vec<WorkflowAction> {
        self.inner.on_signal(signal)
    }

    fn is_completed(&self) -> bool {
        self.inner.is_completed()
    }

    fn result_json(&self) -> Option<Value> {
        self.inner
            .result()
            .map(|r| serde_json::to_value(r).unwrap_or(Value::Null))
    }

    fn error(&self) -> Option<WorkflowError> {
        self.inner.error()
    }
}

/// Factory building a workflow instance from JSON input
pub type WorkflowFactory =
    Box<dyn Fn(Value) -> Result<Box<dyn AnyWorkflow>, serde_json::Error> + Send + Sync>;

/// Registry of workflow definitions by type name
pub struct WorkflowRegistry {
    factories: HashMap<String, WorkflowFactory>,
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a workflow definition
    pub fn register<W: Workflow>(&mut self) {
        let factory: WorkflowFactory = Box::new(|input: Value| {
            let typed_input: W::Input = serde_json::from_value(input)?;
            Ok(Box::new(WorkflowWrapper {
                inner: W::new(typed_input),
            }) as Box<dyn AnyWorkflow>)
        });

        self.factories.insert(W::TYPE.to_string(), factory);
    }

    /// Whether a type name is registered
    pub fn contains(&self, workflow_type: &str) -> bool {
        self.factories.contains_key(workflow_type)
    }

    /// Build an instance from type name and JSON input
    pub fn create(
        &self,
        workflow_type: &str,
        input: Value,
    ) -> Result<Box<dyn AnyWorkflow>, RegistryError> {
        let factory = self
            .factories
            .get(workflow_type)
            .ok_or_else(|| RegistryError::UnknownWorkflowType(workflow_type.to_string()))?;

        factory(input).map_err(RegistryError::Deserialization)
    }

    /// Registered type names
    pub fn workflow_types(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(|s| s.as_str())
    }
}

impl fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowRegistry")
            .field("workflow_types", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Errors from registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Workflow type not registered
    #[error("unknown workflow type: {0}")]
    UnknownWorkflowType(String),

    /// Input did not deserialize into the definition's input type
    #[error("failed to deserialize workflow input: {0}")]
    Deserialization(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct PingInput {
        target: String,
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct PingOutput {
        target: String,
    }

    struct PingWorkflow {
        target: String,
        completed: bool,
    }

    impl Workflow for PingWorkflow {
        const TYPE: &'static str = "ping";
        type Input = PingInput;
        type Output = PingOutput;

        fn new(input: Self::Input) -> Self {
            Self {
                target: input.target,
                completed: false,
            }
        }

        fn on_start(&mut self) -> Vec<WorkflowAction> {
            vec![WorkflowAction::schedule_activity(
                "ping",
                "ping_target",
                serde_json::json!({ "target": self.target }),
            )]
        }

        fn on_activity_completed(&mut self, _activity_id: &str, _result: Value) -> Vec<WorkflowAction> {
            self.completed = true;
            vec![WorkflowAction::complete(serde_json::json!({ "target": self.target }))]
        }

        fn on_activity_failed(
            &mut self,
            _activity_id: &str,
            error: &ActivityError,
        ) -> Vec<WorkflowAction> {
            vec![WorkflowAction::fail(WorkflowError::new(&error.message))]
        }

        fn is_completed(&self) -> bool {
            self.completed
        }

        fn result(&self) -> Option<Self::Output> {
            self.completed.then(|| PingOutput {
                target: self.target.clone(),
            })
        }
    }

    #[test]
    fn register_and_create() {
        let mut registry = WorkflowRegistry::new();
        registry.register::<PingWorkflow>();

        assert!(registry.contains("ping"));
        assert!(!registry.contains("pong"));

        let workflow = registry
            .create("ping", serde_json::json!({ "target": "host-a" }))
            .expect("should create workflow");
        assert_eq!(workflow.workflow_type(), "ping");
        assert!(!workflow.is_completed());
    }

    #[test]
    fn unknown_type_is_an_error() {
        let registry = WorkflowRegistry::new();
        let result = registry.create("missing", serde_json::json!({}));
        assert!(matches!(result, Err(RegistryError::UnknownWorkflowType(_))));
    }

    #[test]
    fn bad_input_is_a_deserialization_error() {
        let mut registry = WorkflowRegistry::new();
        registry.register::<PingWorkflow>();

        let result = registry.create("ping", serde_json::json!({}));
        assert!(matches!(result, Err(RegistryError::Deserialization(_))));
    }

    #[test]
    fn wrapper_round_trips_callbacks() {
        let mut registry = WorkflowRegistry::new();
        registry.register::<PingWorkflow>();

        let mut workflow = registry
            .create("ping", serde_json::json!({ "target": "host-a" }))
            .unwrap();

        let actions = workflow.on_start();
        assert!(matches!(actions[0], WorkflowAction::ScheduleActivity { .. }));

        let actions = workflow.on_activity_completed("ping", serde_json::json!({}));
        assert!(matches!(actions[0], WorkflowAction::CompleteWorkflow { .. }));
        assert!(workflow.is_completed());
        assert_eq!(
            workflow.result_json(),
            Some(serde_json::json!({ "target": "host-a" }))
        );
    }
}
