//! Observability payloads.
//!
//! Signals are best-effort notifications about a processor. Emitting one never
//! changes what the processor does next.

use crate::state::FlowState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Entropy budget or event cap exhausted
    Collapsed,
    /// An ordinary event failed inside the inner operation
    Error,
    /// The processor was stopped by its owner
    Stopped,
}

impl SignalKind {
    /// Lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Collapsed => "collapsed",
            Self::Error => "error",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured observability signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// What happened
    pub kind: SignalKind,
    /// Processor that raised it
    pub source: String,
    /// State at emission time
    pub state: FlowState,
    /// Events processed at emission time
    pub events_processed: u64,
    /// Kind-specific details
    pub payload: serde_json::Value,
}

impl Signal {
    /// Create a signal with an empty payload
    #[must_use]
    pub fn new(kind: SignalKind, source: impl Into<String>, state: FlowState, events_processed: u64) -> Self {
        Self {
            kind,
            source: source.into(),
            state,
            events_processed,
            payload: serde_json::Value::Null,
        }
    }

    /// Attach a payload
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Where a processed event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOrigin {
    /// Injected through `invoke`
    Perturbation,
    /// Re-injected output
    Feedback,
    /// Pulled from the source stream
    Source,
}

/// Per-event record handed to a metabolism adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetabolicEvent {
    /// Processor name
    pub source: String,
    /// Where the event came from
    pub origin: EventOrigin,
    /// Whether the inner operation succeeded
    pub succeeded: bool,
    /// Events processed including this one
    pub events_processed: u64,
    /// Entropy left after this event
    pub entropy_remaining: f64,
}

/// Warning raised by a metabolism adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeverSignal {
    /// Adapter-defined severity
    pub intensity: f64,
    /// Human-readable cause
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_signal_serializes_kind_and_state() {
        let signal = Signal::new(SignalKind::Collapsed, "doubler", FlowState::Collapsed, 100)
            .with_payload(json!({ "entropy_remaining": 0.0 }));
        let value = serde_json::to_value(&signal).unwrap();
        assert_eq!(value["kind"], "collapsed");
        assert_eq!(value["state"], "collapsed");
        assert_eq!(value["events_processed"], 100);
        assert_eq!(value["payload"]["entropy_remaining"], 0.0);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(SignalKind::Error.to_string(), "error");
        assert_eq!(SignalKind::Stopped.as_str(), "stopped");
    }
}
