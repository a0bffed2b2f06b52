//! Lifting operations into processors.
//!
//! A processor is itself an [`Operation`], so lifting is a functor: anything
//! that accepts an operation (including [`lift`]) also accepts a processor.
//! [`FluxProcessor::inner`] gets the original back.

use crate::operation::Operation;
use crate::processor::FluxProcessor;
use async_trait::async_trait;
use flux_core::{FluxConfig, FluxResult, OperationError};

/// Wrap `op` in a dormant processor with `config`
///
/// # Errors
///
/// Returns [`flux_core::FluxError::Config`] if `config` is invalid or enables
/// feedback (use [`FluxProcessor::builder`] to supply a transform)
pub fn lift<Op: Operation>(op: Op, config: FluxConfig) -> FluxResult<FluxProcessor<Op>> {
    FluxProcessor::new(op, config)
}

#[async_trait]
impl<Op: Operation> Operation for FluxProcessor<Op> {
    type Input = Op::Input;
    type Output = Op::Output;

    fn name(&self) -> &str {
        FluxProcessor::name(self)
    }

    async fn invoke(&self, input: Op::Input) -> Result<Op::Output, OperationError> {
        self.invoke_with_priority(input, self.config().perturbation_priority)
            .await
            .map_err(OperationError::new)
    }
}
