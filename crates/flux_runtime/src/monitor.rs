//! Processor metrics.
//!
//! Counters are updated from the processing loop and from `invoke`, and read
//! at any time through [`FluxMonitor::snapshot`].

use crate::backpressure::PushOutcome;
use crate::feedback::FeedbackOutcome;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of a processor's counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    /// Source events processed
    pub source_events: u64,
    /// Feedback events processed
    pub feedback_events: u64,
    /// Perturbations served (success or failure)
    pub perturbations_served: u64,
    /// Ordinary events whose inner call failed
    pub ordinary_failures: u64,
    /// Results delivered to the output queue
    pub outputs_emitted: u64,
    /// Results evicted by drop-oldest
    pub outputs_dropped_oldest: u64,
    /// Results discarded by drop-newest
    pub outputs_dropped_newest: u64,
    /// Results fed back as input
    pub feedback_queued: u64,
    /// Feedback lost to a full queue
    pub feedback_dropped: u64,
    /// Fevers raised by the metabolism adapter
    pub fevers: u64,
    /// Runs started
    pub runs: u64,
    /// Runs that ended in collapse
    pub collapses: u64,
}

impl Metrics {
    /// Events the loop has handled, whatever their origin
    #[must_use]
    pub fn events_handled(&self) -> u64 {
        self.source_events + self.feedback_events + self.perturbations_served
    }

    /// Share of ordinary results lost to backpressure (0.0 - 1.0)
    #[must_use]
    pub fn loss_rate(&self) -> f64 {
        let lost = self.outputs_dropped_oldest + self.outputs_dropped_newest;
        let offered = self.outputs_emitted + self.outputs_dropped_newest;
        if offered == 0 {
            return 0.0;
        }
        lost as f64 / offered as f64
    }
}

/// Lock-free metric counters
#[derive(Debug, Default)]
pub struct FluxMonitor {
    source_events: AtomicU64,
    feedback_events: AtomicU64,
    perturbations_served: AtomicU64,
    ordinary_failures: AtomicU64,
    outputs_emitted: AtomicU64,
    outputs_dropped_oldest: AtomicU64,
    outputs_dropped_newest: AtomicU64,
    feedback_queued: AtomicU64,
    feedback_dropped: AtomicU64,
    fevers: AtomicU64,
    runs: AtomicU64,
    collapses: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl FluxMonitor {
    /// Create zeroed counters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_source(&self) {
        bump(&self.source_events);
    }

    pub(crate) fn record_feedback_event(&self) {
        bump(&self.feedback_events);
    }

    pub(crate) fn record_perturbation(&self) {
        bump(&self.perturbations_served);
    }

    pub(crate) fn record_failure(&self) {
        bump(&self.ordinary_failures);
    }

    pub(crate) fn record_fever(&self) {
        bump(&self.fevers);
    }

    pub(crate) fn record_run(&self) {
        bump(&self.runs);
    }

    pub(crate) fn record_collapse(&self) {
        bump(&self.collapses);
    }

    pub(crate) fn record_push(&self, outcome: PushOutcome) {
        match outcome {
            PushOutcome::Accepted => bump(&self.outputs_emitted),
            PushOutcome::DroppedOldest => {
                bump(&self.outputs_emitted);
                bump(&self.outputs_dropped_oldest);
            }
            PushOutcome::DroppedNewest => bump(&self.outputs_dropped_newest),
            PushOutcome::Closed => {}
        }
    }

    pub(crate) fn record_feedback(&self, outcome: FeedbackOutcome) {
        match outcome {
            FeedbackOutcome::Queued => bump(&self.feedback_queued),
            FeedbackOutcome::Dropped => bump(&self.feedback_dropped),
            FeedbackOutcome::Skipped => {}
        }
    }

    /// Copy the current counters
    #[must_use]
    pub fn snapshot(&self) -> Metrics {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        Metrics {
            source_events: load(&self.source_events),
            feedback_events: load(&self.feedback_events),
            perturbations_served: load(&self.perturbations_served),
            ordinary_failures: load(&self.ordinary_failures),
            outputs_emitted: load(&self.outputs_emitted),
            outputs_dropped_oldest: load(&self.outputs_dropped_oldest),
            outputs_dropped_newest: load(&self.outputs_dropped_newest),
            feedback_queued: load(&self.feedback_queued),
            feedback_dropped: load(&self.feedback_dropped),
            fevers: load(&self.fevers),
            runs: load(&self.runs),
            collapses: load(&self.collapses),
        }
    }
}
