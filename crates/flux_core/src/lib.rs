//! FLUX Core Types
//!
//! Lifecycle states, configuration, errors, entropy accounting, perturbations
//! and signal payloads shared by the flux runtime. Nothing here spawns tasks.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod entropy;
pub mod error;
pub mod perturbation;
pub mod signal;
pub mod state;

// Re-exports
pub use config::{DropPolicy, FluxConfig};
pub use entropy::{EntropyGauge, ENTROPY_EPSILON};
pub use error::{ConfigError, ConfigViolation, FluxError, FluxResult, OperationError, StageFailure};
pub use perturbation::{Perturbation, PerturbationQueue, ResultSlot, SlotReceiver};
pub use signal::{EventOrigin, FeverSignal, MetabolicEvent, Signal, SignalKind};
pub use state::FlowState;
