//! Entropy budget accounting.
//!
//! Every processed event burns `decay` units of entropy. Once the budget is
//! gone (or the optional event cap is reached) no further event is admitted.

use crate::config::FluxConfig;
use serde::{Deserialize, Serialize};

/// Share of the budget at or below which remaining entropy counts as exhausted.
pub const ENTROPY_EPSILON: f64 = 1e-9;

/// Admission gate for a single processor run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntropyGauge {
    budget: f64,
    decay: f64,
    max_events: Option<u64>,
    remaining: f64,
    processed: u64,
}

impl EntropyGauge {
    /// Create a full gauge
    #[must_use]
    pub fn new(budget: f64, decay: f64, max_events: Option<u64>) -> Self {
        Self {
            budget,
            decay,
            max_events,
            remaining: budget,
            processed: 0,
        }
    }

    /// Gauge matching a processor configuration
    #[must_use]
    pub fn from_config(config: &FluxConfig) -> Self {
        Self::new(config.entropy_budget, config.entropy_decay, config.max_events)
    }

    /// Whether one more event may be processed.
    #[must_use]
    pub fn admits(&self) -> bool {
        let has_entropy = self.remaining > self.budget * ENTROPY_EPSILON;
        let under_cap = self.max_events.is_none_or(|max| self.processed < max);
        has_entropy && under_cap
    }

    /// Account for one processed event.
    pub fn consume(&mut self) {
        self.remaining = (self.remaining - self.decay).max(0.0);
        self.processed = self.processed.saturating_add(1);
    }

    /// Refill the budget and zero the counter.
    pub fn reset(&mut self) {
        self.remaining = self.budget;
        self.processed = 0;
    }

    /// Entropy left
    #[must_use]
    pub const fn remaining(&self) -> f64 {
        self.remaining
    }

    /// Events accounted so far
    #[must_use]
    pub const fn processed(&self) -> u64 {
        self.processed
    }

    /// Full budget
    #[must_use]
    pub const fn budget(&self) -> f64 {
        self.budget
    }

    /// Events the budget allows when decay is positive, ignoring the cap.
    #[must_use]
    pub fn projected_capacity(&self) -> Option<f64> {
        (self.decay > 0.0).then(|| self.budget / self.decay)
    }
}
