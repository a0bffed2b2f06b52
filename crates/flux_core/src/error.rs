//! Error types for flux processors and pipelines.

use crate::state::FlowState;
use std::fmt;

/// Flux result type
pub type FluxResult<T> = Result<T, FluxError>;

/// Flux error type
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FluxError {
    /// Edge not present in the lifecycle table
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        /// State before the attempted move
        from: FlowState,
        /// Requested state
        to: FlowState,
    },

    /// Operation attempted from an incompatible state
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// Current state
        state: FlowState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Configuration rejected at construction
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The inner operation failed
    #[error("Operation {operation} failed: {message}")]
    Operation {
        /// Name of the inner operation
        operation: String,
        /// Error reported by the inner operation
        message: String,
    },

    /// A perturbation result did not arrive in time
    #[error("Perturbation timed out after {timeout_ms}ms")]
    PerturbationTimeout {
        /// Configured timeout
        timeout_ms: u64,
    },

    /// A bounded queue refused an item
    #[error("Queue {queue} is full (capacity {capacity})")]
    QueueFull {
        /// Queue name
        queue: &'static str,
        /// Queue capacity
        capacity: usize,
    },

    /// The processor was stopped before the request was served
    #[error("Processor stopped")]
    Stopped,

    /// The entropy budget or event cap ran out
    #[error("Processor collapsed after {events_processed} events")]
    Collapsed {
        /// Events processed before collapse
        events_processed: u64,
    },

    /// The request was dropped while in flight
    #[error("Operation cancelled")]
    Cancelled,

    /// A pipeline stage failed to start
    #[error("Pipeline stage {stage} ({name}) failed: {source}")]
    Pipeline {
        /// Stage index
        stage: usize,
        /// Stage name
        name: String,
        /// Underlying error
        #[source]
        source: Box<FluxError>,
    },

    /// One or more pipeline stages failed to stop
    #[error("Pipeline stop failed for {} stage(s)", .failures.len())]
    PipelineStop {
        /// Every stage that failed, in the order they were stopped
        failures: Vec<StageFailure>,
    },

    /// A pipeline needs at least one stage
    #[error("Pipeline requires at least one stage")]
    EmptyPipeline,

    /// The pipeline is already running
    #[error("Pipeline already started")]
    PipelineAlreadyStarted,

    /// Internal error (for unexpected errors)
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl FluxError {
    /// Shorthand for [`FluxError::InvalidState`].
    #[must_use]
    pub const fn invalid_state(state: FlowState, operation: &'static str) -> Self {
        Self::InvalidState { state, operation }
    }

    /// Whether the error came from the inner operation rather than the engine.
    #[must_use]
    pub const fn is_operation(&self) -> bool {
        matches!(self, Self::Operation { .. })
    }
}

/// A pipeline stage that failed during `stop`
#[derive(Debug, Clone, PartialEq)]
pub struct StageFailure {
    /// Stage index
    pub stage: usize,
    /// Stage name
    pub name: String,
    /// What went wrong
    pub error: FluxError,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {} ({}): {}", self.stage, self.name, self.error)
    }
}

/// A single rejected configuration field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigViolation {
    /// Field name
    pub field: &'static str,
    /// Why it was rejected
    pub reason: String,
}

/// Every violation found while validating a configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid configuration: {}", render_violations(.violations))]
pub struct ConfigError {
    /// Offending fields, in validation order
    pub violations: Vec<ConfigViolation>,
}

impl ConfigError {
    /// Whether `field` is among the violations.
    #[must_use]
    pub fn has_field(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }
}

fn render_violations(violations: &[ConfigViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("{} {}", v.field, v.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error returned by an inner operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct OperationError {
    message: String,
}

impl OperationError {
    /// Create from anything printable
    pub fn new(message: impl fmt::Display) -> Self {
        Self {
            message: message.to_string(),
        }
    }

    /// Error message
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for OperationError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for OperationError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FluxError::invalid_state(FlowState::Draining, "invoke");
        assert_eq!(err.to_string(), "Cannot invoke while draining");

        let err = FluxError::QueueFull {
            queue: "perturbation",
            capacity: 8,
        };
        assert_eq!(err.to_string(), "Queue perturbation is full (capacity 8)");
    }

    #[test]
    fn test_config_error_lists_all_fields() {
        let err = ConfigError {
            violations: vec![
                ConfigViolation {
                    field: "buffer_size",
                    reason: "must be greater than 0".to_string(),
                },
                ConfigViolation {
                    field: "feedback_fraction",
                    reason: "must be within [0, 1]".to_string(),
                },
            ],
        };
        let s = err.to_string();
        assert!(s.contains("buffer_size"));
        assert!(s.contains("feedback_fraction"));
        assert!(err.has_field("buffer_size"));
        assert!(!err.has_field("entropy_budget"));
    }

    #[test]
    fn test_pipeline_error_carries_stage() {
        let err = FluxError::Pipeline {
            stage: 1,
            name: "increment".to_string(),
            source: Box::new(FluxError::invalid_state(FlowState::Flowing, "start")),
        };
        let s = err.to_string();
        assert!(s.contains("stage 1"));
        assert!(s.contains("increment"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_operation_error_conversions() {
        let err: OperationError = "boom".into();
        assert_eq!(err.message(), "boom");
        assert_eq!(OperationError::new(42).to_string(), "42");
    }
}
