//! Activity trait definition

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::ActivityContext;

/// Error type for activity failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityError {
    /// Error message
    pub message: String,

    /// Error class for programmatic handling (e.g. `email_bounced`)
    pub error_type: Option<String>,

    /// Whether the worker may retry this attempt
    ///
    /// Non-retryable errors fail the activity immediately, regardless of
    /// remaining attempts; the workflow decides what that means.
    pub retryable: bool,

    /// Additional detail for debugging
    pub details: Option<serde_json::Value>,
}

impl ActivityError {
    /// Create a retryable error
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: true,
            details: None,
        }
    }

    /// Create a non-retryable error
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: false,
            details: None,
        }
    }

    /// Set the error class
    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    /// Attach detail
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Whether this error carries the given class
    pub fn is_type(&self, error_type: &str) -> bool {
        self.error_type.as_deref() == Some(error_type)
    }
}

impl std::fmt::Display for ActivityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ActivityError {}

impl From<anyhow::Error> for ActivityError {
    fn from(err: anyhow::Error) -> Self {
        Self::retryable(format!("{err:#}"))
    }
}

/// A unit of side-effecting work invoked by a workflow
///
/// Activities hold the collaborator clients they need and are registered on
/// the worker pool by type name. An activity must be safe to retry: the
/// engine guarantees at most one *scheduling* per `(workflow_id, activity_id)`,
/// but a crashed worker can re-run an attempt.
///
/// # Example
///
/// ```ignore
/// struct SendEmailActivity { email: Arc<dyn EmailClient> }
///
/// #[async_trait]
/// impl Activity for SendEmailActivity {
///     const TYPE: &'static str = "send_sequence_email";
///     type Input = SendEmailInput;
///     type Output = SendEmailOutput;
///
///     async fn execute(
///         &self,
///         ctx: &ActivityContext,
///         input: Self::Input,
///     ) -> Result<Self::Output, ActivityError> {
///         // ...
///     }
/// }
/// ```
#[async_trait]
pub trait Activity: Send + Sync + 'static {
    /// Unique type identifier, used to look the handler up
    const TYPE: &'static str;

    /// Input type
    type Input: Serialize + DeserializeOwned + Send;

    /// Output type
    type Output: Serialize + DeserializeOwned + Send;

    /// Execute one attempt
    ///
    /// Return [`ActivityError::retryable`] for transient failures and
    /// [`ActivityError::non_retryable`] for permanent ones.
    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_flag() {
        assert!(ActivityError::retryable("socket reset").retryable);
        assert!(!ActivityError::non_retryable("bad address").retryable);
    }

    #[test]
    fn error_class_matching() {
        let error = ActivityError::non_retryable("recipient rejected").with_type("email_bounced");
        assert!(error.is_type("email_bounced"));
        assert!(!error.is_type("timeout"));
    }

    #[test]
    fn anyhow_conversion_defaults_to_retryable() {
        let error: ActivityError = anyhow::anyhow!("provider 503").into();
        assert!(error.retryable);
        assert!(error.message.contains("provider 503"));
    }

    #[test]
    fn error_serialization() {
        let error = ActivityError::retryable("rate limited")
            .with_type("throttled")
            .with_details(serde_json::json!({"retry_after": 30}));

        let parsed: ActivityError =
            serde_json::from_str(&serde_json::to_string(&error).unwrap()).unwrap();
        assert_eq!(error, parsed);
    }
}
