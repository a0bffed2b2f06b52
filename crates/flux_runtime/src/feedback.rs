//! Ouroboric feedback: a sampled share of a processor's own output is turned
//! back into input and merged ahead of the source.

use flux_core::FluxConfig;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::Arc;

/// Converts an output into the next input
pub type FeedbackTransform<O, I> = Arc<dyn Fn(&O) -> I + Send + Sync>;

/// What happened to a result offered for feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackOutcome {
    /// Not sampled this time
    Skipped,
    /// Queued as future input
    Queued,
    /// Sampled but the queue was full
    Dropped,
}

/// Per-run feedback queue and sampler.
///
/// Owned by the processing loop, so it needs no locking. A new router is built
/// for every run.
pub struct FeedbackRouter<O, I> {
    fraction: f64,
    transform: Option<FeedbackTransform<O, I>>,
    queue: VecDeque<I>,
    capacity: usize,
    rng: SmallRng,
}

impl<O, I> FeedbackRouter<O, I> {
    /// Router for one run of a processor
    #[must_use]
    pub fn new(config: &FluxConfig, transform: Option<FeedbackTransform<O, I>>) -> Self {
        let rng = match config.feedback_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Self {
            fraction: config.feedback_fraction,
            transform,
            queue: VecDeque::new(),
            capacity: config.feedback_queue_size,
            rng,
        }
    }

    /// Offer a successful ordinary result for feedback
    pub fn offer(&mut self, output: &O) -> FeedbackOutcome {
        let Some(transform) = &self.transform else {
            return FeedbackOutcome::Skipped;
        };
        let sampled = self.fraction >= 1.0
            || (self.fraction > 0.0 && self.rng.gen_bool(self.fraction));
        if !sampled {
            return FeedbackOutcome::Skipped;
        }
        if self.queue.len() >= self.capacity {
            return FeedbackOutcome::Dropped;
        }
        self.queue.push_back(transform(output));
        FeedbackOutcome::Queued
    }

    /// Next fed-back input, oldest first
    pub fn pop(&mut self) -> Option<I> {
        self.queue.pop_front()
    }

    /// Items waiting to be re-processed
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is waiting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn increment() -> FeedbackTransform<i64, i64> {
        Arc::new(|x: &i64| x + 1)
    }

    #[test]
    fn test_full_fraction_always_queues() {
        let config = FluxConfig::new().with_feedback_fraction(1.0);
        let mut router = FeedbackRouter::new(&config, Some(increment()));
        assert_eq!(router.offer(&1), FeedbackOutcome::Queued);
        assert_eq!(router.offer(&2), FeedbackOutcome::Queued);
        assert_eq!(router.pop(), Some(2));
        assert_eq!(router.pop(), Some(3));
        assert!(router.is_empty());
    }

    #[test]
    fn test_zero_fraction_never_queues() {
        let config = FluxConfig::new().with_feedback_fraction(0.0);
        let mut router = FeedbackRouter::new(&config, Some(increment()));
        for i in 0..100 {
            assert_eq!(router.offer(&i), FeedbackOutcome::Skipped);
        }
        assert!(router.is_empty());
    }

    #[test]
    fn test_missing_transform_skips() {
        let config = FluxConfig::new().with_feedback_fraction(1.0);
        let mut router = FeedbackRouter::<i64, i64>::new(&config, None);
        assert_eq!(router.offer(&1), FeedbackOutcome::Skipped);
    }

    #[test]
    fn test_full_queue_drops() {
        let config = FluxConfig::new()
            .with_feedback_fraction(1.0)
            .with_feedback_queue_size(1);
        let mut router = FeedbackRouter::new(&config, Some(increment()));
        assert_eq!(router.offer(&1), FeedbackOutcome::Queued);
        assert_eq!(router.offer(&2), FeedbackOutcome::Dropped);
        assert_eq!(router.len(), 1);
    }

    #[test]
    fn test_seeded_sampling_is_reproducible() {
        let config = FluxConfig::new()
            .with_feedback_fraction(0.5)
            .with_feedback_queue_size(1_000)
            .with_feedback_seed(7);
        let sample = || {
            let mut router = FeedbackRouter::new(&config, Some(increment()));
            (0..200).map(|i| router.offer(&i)).collect::<Vec<_>>()
        };
        let first = sample();
        assert_eq!(first, sample());

        let queued = first.iter().filter(|o| **o == FeedbackOutcome::Queued).count();
        assert!(queued > 50 && queued < 150, "queued {queued} of 200");
    }
}
