//! Lifecycle states for flux processors.
//!
//! A processor owns exactly one [`FlowState`] at a time. Every change goes
//! through [`FlowState::transition`], which checks the move against a fixed
//! adjacency table:
//!
//! ```text
//! Dormant   -> Flowing | Stopped
//! Flowing   -> Perturbed | Draining | Collapsed | Stopped
//! Perturbed -> Flowing | Stopped
//! Draining  -> Stopped
//! Stopped   -> Flowing
//! Collapsed -> (none)
//! ```
//!
//! `Collapsed` can only be left through an explicit processor reset.

use crate::error::{FluxError, FluxResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Processor lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    /// Constructed, not yet started
    Dormant,
    /// Background loop is consuming events
    Flowing,
    /// A perturbation is being served
    Perturbed,
    /// Source exhausted, internal queues draining
    Draining,
    /// Stopped by the caller or after draining
    Stopped,
    /// Entropy budget or event cap exhausted
    Collapsed,
}

impl FlowState {
    /// All states, in declaration order.
    pub const ALL: [FlowState; 6] = [
        FlowState::Dormant,
        FlowState::Flowing,
        FlowState::Perturbed,
        FlowState::Draining,
        FlowState::Stopped,
        FlowState::Collapsed,
    ];

    /// States reachable from `self` in one step.
    #[must_use]
    pub const fn successors(self) -> &'static [FlowState] {
        match self {
            Self::Dormant => &[Self::Flowing, Self::Stopped],
            Self::Flowing => &[Self::Perturbed, Self::Draining, Self::Collapsed, Self::Stopped],
            Self::Perturbed => &[Self::Flowing, Self::Stopped],
            Self::Draining => &[Self::Stopped],
            Self::Stopped => &[Self::Flowing],
            Self::Collapsed => &[],
        }
    }

    /// Whether `self -> to` is a legal edge.
    #[must_use]
    pub fn can_transition_to(self, to: FlowState) -> bool {
        self.successors().contains(&to)
    }

    /// Validate and perform a transition.
    ///
    /// # Errors
    ///
    /// Returns [`FluxError::InvalidTransition`] if the edge is not in the table.
    pub fn transition(self, to: FlowState) -> FluxResult<FlowState> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(FluxError::InvalidTransition { from: self, to })
        }
    }

    /// A processor may be started from here.
    #[must_use]
    pub const fn can_start(self) -> bool {
        matches!(self, Self::Dormant | Self::Stopped)
    }

    /// The background loop owns the processor.
    #[must_use]
    pub const fn is_processing(self) -> bool {
        matches!(self, Self::Flowing | Self::Perturbed | Self::Draining)
    }

    /// No background work is happening.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Collapsed)
    }

    /// Perturbations are only queued while flowing. A dormant processor serves
    /// `invoke` directly instead.
    #[must_use]
    pub const fn allows_perturbation(self) -> bool {
        matches!(self, Self::Flowing)
    }

    /// Lowercase name used in logs and signal payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dormant => "dormant",
            Self::Flowing => "flowing",
            Self::Perturbed => "perturbed",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
            Self::Collapsed => "collapsed",
        }
    }
}

impl Default for FlowState {
    fn default() -> Self {
        Self::Dormant
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dormant_transitions() {
        assert!(FlowState::Dormant.can_transition_to(FlowState::Flowing));
        assert!(FlowState::Dormant.can_transition_to(FlowState::Stopped));
        assert!(!FlowState::Dormant.can_transition_to(FlowState::Perturbed));
        assert!(!FlowState::Dormant.can_transition_to(FlowState::Collapsed));
    }

    #[test]
    fn test_flowing_transitions() {
        for to in [
            FlowState::Perturbed,
            FlowState::Draining,
            FlowState::Collapsed,
            FlowState::Stopped,
        ] {
            assert_eq!(FlowState::Flowing.transition(to), Ok(to));
        }
        assert!(FlowState::Flowing.transition(FlowState::Dormant).is_err());
    }

    #[test]
    fn test_draining_only_stops() {
        assert_eq!(FlowState::Draining.successors(), &[FlowState::Stopped]);
        assert!(!FlowState::Draining.can_transition_to(FlowState::Collapsed));
    }

    #[test]
    fn test_collapsed_is_dead_end() {
        for to in FlowState::ALL {
            assert!(!FlowState::Collapsed.can_transition_to(to));
        }
    }

    #[test]
    fn test_invalid_transition_error() {
        let err = FlowState::Stopped.transition(FlowState::Draining).unwrap_err();
        assert_eq!(
            err,
            FluxError::InvalidTransition {
                from: FlowState::Stopped,
                to: FlowState::Draining,
            }
        );
        assert!(err.to_string().contains("stopped"));
        assert!(err.to_string().contains("draining"));
    }

    #[test]
    fn test_predicates() {
        assert!(FlowState::Dormant.can_start());
        assert!(FlowState::Stopped.can_start());
        assert!(!FlowState::Collapsed.can_start());
        assert!(!FlowState::Flowing.can_start());

        assert!(FlowState::Flowing.is_processing());
        assert!(FlowState::Perturbed.is_processing());
        assert!(FlowState::Draining.is_processing());
        assert!(!FlowState::Dormant.is_processing());

        assert!(FlowState::Stopped.is_terminal());
        assert!(FlowState::Collapsed.is_terminal());
        assert!(!FlowState::Draining.is_terminal());

        let allowing: Vec<_> = FlowState::ALL
            .into_iter()
            .filter(|s| s.allows_perturbation())
            .collect();
        assert_eq!(allowing, vec![FlowState::Flowing]);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&FlowState::Perturbed).unwrap();
        assert_eq!(json, "\"perturbed\"");
        let back: FlowState = serde_json::from_str("\"collapsed\"").unwrap();
        assert_eq!(back, FlowState::Collapsed);
    }
}
