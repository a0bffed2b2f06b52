//! Processor configuration.
//!
//! A [`FluxConfig`] is built once, validated as a whole, and never mutated by
//! the processor. Validation collects every bad field into one
//! [`ConfigError`] instead of stopping at the first.

use crate::error::{ConfigError, ConfigViolation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// What the output queue does when it is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Wait for space; nothing is lost but the processor may stall
    #[default]
    Block,
    /// Evict the oldest queued item to make room
    DropOldest,
    /// Discard the incoming item
    DropNewest,
}

impl DropPolicy {
    /// Name as written in config files and on the command line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::DropOldest => "drop_oldest",
            Self::DropNewest => "drop_newest",
        }
    }
}

impl fmt::Display for DropPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DropPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "block" => Ok(Self::Block),
            "drop_oldest" => Ok(Self::DropOldest),
            "drop_newest" => Ok(Self::DropNewest),
            other => Err(format!(
                "unknown drop policy '{other}' (expected block, drop_oldest or drop_newest)"
            )),
        }
    }
}

/// Tunables for a single flux processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FluxConfig {
    /// Entropy available to a run
    pub entropy_budget: f64,
    /// Entropy spent per processed event
    pub entropy_decay: f64,
    /// Hard cap on processed events
    pub max_events: Option<u64>,
    /// Output queue capacity
    pub buffer_size: usize,
    /// Output queue overflow behaviour
    pub drop_policy: DropPolicy,
    /// Probability that an ordinary result is fed back as input
    pub feedback_fraction: f64,
    /// Feedback queue capacity
    pub feedback_queue_size: usize,
    /// Default priority for `invoke` perturbations
    pub perturbation_priority: i32,
    /// How long `invoke` waits for a perturbation result
    #[serde(with = "optional_millis", rename = "perturbation_timeout_ms")]
    pub perturbation_timeout: Option<Duration>,
    /// Perturbation queue capacity
    pub perturbation_queue_size: usize,
    /// Seed for feedback sampling; entropy-seeded when unset
    pub feedback_seed: Option<u64>,
}

impl FluxConfig {
    /// Create the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the entropy budget
    #[must_use]
    pub fn with_entropy_budget(mut self, budget: f64) -> Self {
        self.entropy_budget = budget;
        self
    }

    /// Set the per-event entropy decay
    #[must_use]
    pub fn with_entropy_decay(mut self, decay: f64) -> Self {
        self.entropy_decay = decay;
        self
    }

    /// Cap the number of processed events
    #[must_use]
    pub fn with_max_events(mut self, max: u64) -> Self {
        self.max_events = Some(max);
        self
    }

    /// Set the output buffer capacity
    #[must_use]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set the backpressure policy
    #[must_use]
    pub fn with_drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Set the feedback probability
    #[must_use]
    pub fn with_feedback_fraction(mut self, fraction: f64) -> Self {
        self.feedback_fraction = fraction;
        self
    }

    /// Set the feedback queue capacity
    #[must_use]
    pub fn with_feedback_queue_size(mut self, size: usize) -> Self {
        self.feedback_queue_size = size;
        self
    }

    /// Seed feedback sampling
    #[must_use]
    pub fn with_feedback_seed(mut self, seed: u64) -> Self {
        self.feedback_seed = Some(seed);
        self
    }

    /// Set the default perturbation priority
    #[must_use]
    pub fn with_perturbation_priority(mut self, priority: i32) -> Self {
        self.perturbation_priority = priority;
        self
    }

    /// Bound how long `invoke` waits
    #[must_use]
    pub fn with_perturbation_timeout(mut self, timeout: Duration) -> Self {
        self.perturbation_timeout = Some(timeout);
        self
    }

    /// Set the perturbation queue capacity
    #[must_use]
    pub fn with_perturbation_queue_size(mut self, size: usize) -> Self {
        self.perturbation_queue_size = size;
        self
    }

    /// Validate and return self
    ///
    /// # Errors
    ///
    /// Returns every violation found
    pub fn validated(self) -> Result<Self, ConfigError> {
        self.validate()?;
        Ok(self)
    }

    /// Check every field
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] listing all offending fields
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut violations = Vec::new();
        let mut reject = |field: &'static str, reason: &str| {
            violations.push(ConfigViolation {
                field,
                reason: reason.to_string(),
            });
        };

        if !self.entropy_budget.is_finite() || self.entropy_budget <= 0.0 {
            reject("entropy_budget", "must be a finite number greater than 0");
        }
        if !self.entropy_decay.is_finite() || self.entropy_decay < 0.0 {
            reject("entropy_decay", "must be a finite number of at least 0");
        }
        if self.max_events == Some(0) {
            reject("max_events", "must be greater than 0 when set");
        }
        if self.buffer_size == 0 {
            reject("buffer_size", "must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.feedback_fraction) {
            reject("feedback_fraction", "must be within [0, 1]");
        }
        if self.feedback_queue_size == 0 {
            reject("feedback_queue_size", "must be greater than 0");
        }
        if self.perturbation_timeout == Some(Duration::ZERO) {
            reject("perturbation_timeout", "must be greater than 0 when set");
        }
        if self.perturbation_queue_size == 0 {
            reject("perturbation_queue_size", "must be greater than 0");
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ConfigError { violations })
        }
    }

    /// Whether any ordinary output can be fed back.
    #[must_use]
    pub fn feedback_enabled(&self) -> bool {
        self.feedback_fraction > 0.0
    }
}

impl Default for FluxConfig {
    fn default() -> Self {
        Self {
            entropy_budget: 1.0,
            entropy_decay: 0.01,
            max_events: None,
            buffer_size: 100,
            drop_policy: DropPolicy::Block,
            feedback_fraction: 0.0,
            feedback_queue_size: 100,
            perturbation_priority: 100,
            perturbation_timeout: None,
            perturbation_queue_size: 100,
            feedback_seed: None,
        }
    }
}

mod optional_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = FluxConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.entropy_budget, 1.0);
        assert_eq!(config.entropy_decay, 0.01);
        assert_eq!(config.buffer_size, 100);
        assert_eq!(config.drop_policy, DropPolicy::Block);
        assert!(!config.feedback_enabled());
    }

    #[test]
    fn test_builder_methods() {
        let config = FluxConfig::new()
            .with_entropy_budget(5.0)
            .with_entropy_decay(0.5)
            .with_max_events(10)
            .with_buffer_size(4)
            .with_drop_policy(DropPolicy::DropOldest)
            .with_feedback_fraction(0.25)
            .with_perturbation_timeout(Duration::from_millis(250));

        assert_eq!(config.max_events, Some(10));
        assert_eq!(config.drop_policy, DropPolicy::DropOldest);
        assert_eq!(config.perturbation_timeout, Some(Duration::from_millis(250)));
        assert!(config.feedback_enabled());
        assert!(config.validated().is_ok());
    }

    #[test]
    fn test_validation_aggregates_violations() {
        let config = FluxConfig {
            entropy_budget: 0.0,
            entropy_decay: -1.0,
            max_events: Some(0),
            buffer_size: 0,
            feedback_fraction: 1.5,
            feedback_queue_size: 0,
            perturbation_timeout: Some(Duration::ZERO),
            perturbation_queue_size: 0,
            ..FluxConfig::default()
        };

        let err = config.validate().unwrap_err();
        assert_eq!(err.violations.len(), 8);
        for field in [
            "entropy_budget",
            "entropy_decay",
            "max_events",
            "buffer_size",
            "feedback_fraction",
            "feedback_queue_size",
            "perturbation_timeout",
            "perturbation_queue_size",
        ] {
            assert!(err.has_field(field), "missing {field}");
        }
    }

    #[test]
    fn test_non_finite_rejected() {
        let config = FluxConfig::new()
            .with_entropy_budget(f64::INFINITY)
            .with_feedback_fraction(f64::NAN);
        let err = config.validate().unwrap_err();
        assert!(err.has_field("entropy_budget"));
        assert!(err.has_field("feedback_fraction"));
    }

    #[test]
    fn test_zero_decay_allowed() {
        let config = FluxConfig::new().with_entropy_decay(0.0).with_max_events(5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_drop_policy_parse() {
        assert_eq!("block".parse::<DropPolicy>(), Ok(DropPolicy::Block));
        assert_eq!("drop-oldest".parse::<DropPolicy>(), Ok(DropPolicy::DropOldest));
        assert_eq!("DROP_NEWEST".parse::<DropPolicy>(), Ok(DropPolicy::DropNewest));
        assert!("lossy".parse::<DropPolicy>().is_err());
    }

    #[test]
    fn test_json_config() {
        let json = r#"{
            "entropy_budget": 2.0,
            "drop_policy": "drop_newest",
            "perturbation_timeout_ms": 1500
        }"#;
        let config: FluxConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.entropy_budget, 2.0);
        assert_eq!(config.drop_policy, DropPolicy::DropNewest);
        assert_eq!(config.perturbation_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.buffer_size, 100);

        let encoded = serde_json::to_value(&config).unwrap();
        assert_eq!(encoded["perturbation_timeout_ms"], 1500);
    }

    #[test]
    fn test_json_rejects_unknown_fields() {
        let result = serde_json::from_str::<FluxConfig>(r#"{"entropy": 1.0}"#);
        assert!(result.is_err());
    }
}
