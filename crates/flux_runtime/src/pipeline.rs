//! Pipelines of processors.
//!
//! Stages are chained so each one's output stream is the next one's source.
//! Ending the source ends every stage in turn; a stage that collapses ends
//! the streams downstream of it.

use crate::operation::Operation;
use crate::processor::FluxProcessor;
use async_trait::async_trait;
use flux_core::{FlowState, FluxError, FluxResult, StageFailure};
use futures::stream::{BoxStream, Stream, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const TARGET: &str = "flux::pipeline";

/// Anything that can run as one step of a [`FluxPipeline`]
#[async_trait]
pub trait FluxStage<T>: Send + Sync {
    /// Name used in errors and logs
    fn stage_name(&self) -> &str;

    /// Current lifecycle state
    fn stage_state(&self) -> FlowState;

    /// Start consuming `input`, returning this stage's output
    ///
    /// # Errors
    ///
    /// Any reason the stage cannot start
    fn start_stage(&self, input: BoxStream<'static, T>) -> FluxResult<BoxStream<'static, T>>;

    /// Stop the stage
    ///
    /// # Errors
    ///
    /// Any failure while shutting down
    async fn stop_stage(&self) -> FluxResult<()>;

    /// Wait for the stage to finish on its own
    ///
    /// # Errors
    ///
    /// Any failure of the stage's background work
    async fn wait_stage(&self) -> FluxResult<()>;
}

#[async_trait]
impl<T, Op> FluxStage<T> for FluxProcessor<Op>
where
    T: Send + 'static,
    Op: Operation<Input = T, Output = T>,
{
    fn stage_name(&self) -> &str {
        self.name()
    }

    fn stage_state(&self) -> FlowState {
        self.state()
    }

    fn start_stage(&self, input: BoxStream<'static, T>) -> FluxResult<BoxStream<'static, T>> {
        self.start(input)
    }

    async fn stop_stage(&self) -> FluxResult<()> {
        self.stop().await
    }

    async fn wait_stage(&self) -> FluxResult<()> {
        self.wait().await
    }
}

/// An ordered chain of stages over one item type
pub struct FluxPipeline<T> {
    stages: Vec<Arc<dyn FluxStage<T>>>,
    started: AtomicBool,
}

impl<T: Send + 'static> FluxPipeline<T> {
    /// Pipeline over `stages`, in order
    ///
    /// # Errors
    ///
    /// Returns [`FluxError::EmptyPipeline`] if `stages` is empty
    pub fn new(stages: Vec<Arc<dyn FluxStage<T>>>) -> FluxResult<Self> {
        if stages.is_empty() {
            return Err(FluxError::EmptyPipeline);
        }
        Ok(Self {
            stages,
            started: AtomicBool::new(false),
        })
    }

    /// Pipeline with a single stage
    pub fn from_stage(stage: Arc<dyn FluxStage<T>>) -> Self {
        Self {
            stages: vec![stage],
            started: AtomicBool::new(false),
        }
    }

    /// Append a stage
    #[must_use]
    pub fn then(mut self, stage: Arc<dyn FluxStage<T>>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Start every stage, first to last.
    ///
    /// If a stage fails to start, the stages already started are stopped
    /// again before the error is returned.
    ///
    /// # Errors
    ///
    /// [`FluxError::PipelineAlreadyStarted`] on a second start, or
    /// [`FluxError::Pipeline`] naming the stage that failed
    pub async fn start<S>(&self, source: S) -> FluxResult<BoxStream<'static, T>>
    where
        S: Stream<Item = T> + Send + 'static,
    {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(FluxError::PipelineAlreadyStarted);
        }

        let mut stream = source.boxed();
        for (index, stage) in self.stages.iter().enumerate() {
            match stage.start_stage(stream) {
                Ok(next) => stream = next,
                Err(err) => {
                    tracing::warn!(
                        target: TARGET,
                        stage = index,
                        name = stage.stage_name(),
                        error = %err,
                        "stage failed to start, rolling back"
                    );
                    self.rollback(index).await;
                    self.started.store(false, Ordering::SeqCst);
                    return Err(FluxError::Pipeline {
                        stage: index,
                        name: stage.stage_name().to_string(),
                        source: Box::new(err),
                    });
                }
            }
        }

        tracing::debug!(target: TARGET, stages = self.stages.len(), "pipeline started");
        Ok(stream)
    }

    async fn rollback(&self, started: usize) {
        for (index, stage) in self.stages[..started].iter().enumerate().rev() {
            if let Err(err) = stage.stop_stage().await {
                tracing::warn!(target: TARGET, stage = index, name = stage.stage_name(), error = %err, "rollback stop failed");
            }
        }
    }

    /// Stop every stage, last to first. Every stage is attempted even if an
    /// earlier one fails.
    ///
    /// # Errors
    ///
    /// [`FluxError::PipelineStop`] listing each stage that failed
    pub async fn stop(&self) -> FluxResult<()> {
        let mut failures = Vec::new();
        for (index, stage) in self.stages.iter().enumerate().rev() {
            if let Err(error) = stage.stop_stage().await {
                failures.push(StageFailure {
                    stage: index,
                    name: stage.stage_name().to_string(),
                    error,
                });
            }
        }
        self.started.store(false, Ordering::SeqCst);

        if failures.is_empty() {
            Ok(())
        } else {
            tracing::warn!(target: TARGET, failed = failures.len(), "pipeline stop incomplete");
            Err(FluxError::PipelineStop { failures })
        }
    }

    /// Wait for every stage to finish, first to last
    ///
    /// # Errors
    ///
    /// The first stage failure encountered
    pub async fn wait(&self) -> FluxResult<()> {
        for stage in &self.stages {
            stage.wait_stage().await?;
        }
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Number of stages
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false; a pipeline cannot be built empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage names in order
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.stage_name()).collect()
    }

    /// Stage states in order
    #[must_use]
    pub fn states(&self) -> Vec<FlowState> {
        self.stages.iter().map(|s| s.stage_state()).collect()
    }
}
