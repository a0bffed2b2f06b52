//! FLUX Runtime
//!
//! Stream processors that merge perturbations, feedback and a source under an
//! entropy budget, plus the pipelines that chain them.
//!
//! ```no_run
//! use flux_core::FluxConfig;
//! use flux_runtime::{from_fn, lift};
//! use futures::StreamExt;
//!
//! # async fn demo() -> flux_core::FluxResult<()> {
//! let double = from_fn("double", |x: i64| async move { Ok(x * 2) });
//! let processor = lift(double, FluxConfig::default())?;
//! let results: Vec<i64> = processor.start(futures::stream::iter(1..=3))?.collect().await;
//! assert_eq!(results, vec![2, 4, 6]);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backpressure;
pub mod feedback;
pub mod hooks;
pub mod lift;
pub mod monitor;
pub mod operation;
pub mod pipeline;
pub mod processor;

pub use backpressure::{OutputQueue, PushOutcome};
pub use feedback::{FeedbackOutcome, FeedbackRouter, FeedbackTransform};
pub use hooks::{ChannelEmitter, Metabolism, MetabolismError, SignalEmitter, SignalError, TracingEmitter};
pub use lift::lift;
pub use monitor::{FluxMonitor, Metrics};
pub use operation::{from_fn, FnOperation, Operation};
pub use pipeline::{FluxPipeline, FluxStage};
pub use processor::{FluxBuilder, FluxProcessor};
