//! Flux stream processor.
//!
//! Wraps an [`Operation`] in a long-running loop that merges three inputs by
//! priority (perturbations, then feedback, then the source), spends entropy
//! per event, and writes ordinary results to a bounded output queue.
//!
//! One background task drives each run. `invoke`, `stop` and `reset` touch the
//! shared state only in short critical sections that never span an await.

use crate::backpressure::OutputQueue;
use crate::feedback::{FeedbackRouter, FeedbackTransform};
use crate::hooks::{emit_best_effort, Metabolism, SignalEmitter, TracingEmitter};
use crate::monitor::{FluxMonitor, Metrics};
use crate::operation::Operation;
use flux_core::{
    ConfigError, ConfigViolation, EntropyGauge, EventOrigin, FlowState, FluxConfig, FluxError,
    FluxResult, MetabolicEvent, OperationError, Perturbation, PerturbationQueue, ResultSlot,
    Signal, SignalKind, SlotReceiver,
};
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{BoxStream, Stream, StreamExt};
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::{CancellationToken, DropGuard};

const TARGET: &str = "flux::processor";

/// Mutable processor state, guarded by one mutex
struct Core<I, O> {
    state: FlowState,
    gauge: EntropyGauge,
    /// Bumped on every start so a finished run cannot touch its successor
    generation: u64,
    perturbations: Arc<PerturbationQueue<I, O>>,
    output: Arc<OutputQueue<O>>,
}

/// State shared between the processor handle and its run task
struct SharedState<I, O> {
    name: String,
    config: FluxConfig,
    core: Mutex<Core<I, O>>,
    monitor: FluxMonitor,
    signals: Arc<dyn SignalEmitter>,
    metabolism: Option<Arc<dyn Metabolism>>,
}

impl<I, O> SharedState<I, O> {
    fn lock(&self) -> MutexGuard<'_, Core<I, O>> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace `from` with `to` if this run still owns the processor and the
    /// state is exactly `from`.
    fn swap_state(&self, generation: u64, from: FlowState, to: FlowState) -> bool {
        let mut core = self.lock();
        if core.generation == generation && core.state == from && from.can_transition_to(to) {
            core.state = to;
            true
        } else {
            false
        }
    }

    fn signal(&self, kind: SignalKind, state: FlowState, events: u64, payload: serde_json::Value) {
        let signal = Signal::new(kind, self.name.clone(), state, events).with_payload(payload);
        emit_best_effort(&self.signals, &signal);
    }
}

type RunCompletion = Shared<BoxFuture<'static, Result<(), String>>>;

/// Perturbation the loop is currently serving, if any
type InFlight<O> = Arc<Mutex<Option<Arc<ResultSlot<O>>>>>;

struct RunHandle {
    token: CancellationToken,
    done: RunCompletion,
    /// Dropping the processor cancels its run
    _cancel_on_drop: DropGuard,
}

/// A stream processor around an inner operation
pub struct FluxProcessor<Op: Operation> {
    inner: Arc<Op>,
    shared: Arc<SharedState<Op::Input, Op::Output>>,
    feedback_transform: Option<FeedbackTransform<Op::Output, Op::Input>>,
    run: Mutex<Option<RunHandle>>,
}

/// Builder for [`FluxProcessor`]
pub struct FluxBuilder<Op: Operation> {
    inner: Op,
    name: Option<String>,
    config: FluxConfig,
    feedback_transform: Option<FeedbackTransform<Op::Output, Op::Input>>,
    signals: Arc<dyn SignalEmitter>,
    metabolism: Option<Arc<dyn Metabolism>>,
}

impl<Op: Operation> FluxBuilder<Op> {
    /// Use `config` instead of the defaults
    #[must_use]
    pub fn config(mut self, config: FluxConfig) -> Self {
        self.config = config;
        self
    }

    /// Name used in logs and signals; defaults to the operation's name
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Turn outputs back into inputs for feedback
    #[must_use]
    pub fn feedback_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&Op::Output) -> Op::Input + Send + Sync + 'static,
    {
        self.feedback_transform = Some(Arc::new(transform));
        self
    }

    /// Send signals somewhere other than `tracing`
    #[must_use]
    pub fn signals(mut self, emitter: Arc<dyn SignalEmitter>) -> Self {
        self.signals = emitter;
        self
    }

    /// Attach a metabolism adapter
    #[must_use]
    pub fn metabolism(mut self, adapter: Arc<dyn Metabolism>) -> Self {
        self.metabolism = Some(adapter);
        self
    }

    /// Validate and build
    ///
    /// # Errors
    ///
    /// Returns [`FluxError::Config`] listing every invalid field
    pub fn build(self) -> FluxResult<FluxProcessor<Op>> {
        let mut violations = self
            .config
            .validate()
            .err()
            .map(|err| err.violations)
            .unwrap_or_default();
        if self.config.feedback_enabled() && self.feedback_transform.is_none() {
            violations.push(ConfigViolation {
                field: "feedback_transform",
                reason: "is required when feedback_fraction > 0".to_string(),
            });
        }
        if !violations.is_empty() {
            return Err(ConfigError { violations }.into());
        }

        let name = self.name.unwrap_or_else(|| self.inner.name().to_string());
        let core = Core {
            state: FlowState::Dormant,
            gauge: EntropyGauge::from_config(&self.config),
            generation: 0,
            perturbations: Arc::new(PerturbationQueue::new(self.config.perturbation_queue_size)),
            output: Arc::new(OutputQueue::new(self.config.buffer_size, self.config.drop_policy)),
        };

        Ok(FluxProcessor {
            inner: Arc::new(self.inner),
            shared: Arc::new(SharedState {
                name,
                config: self.config,
                core: Mutex::new(core),
                monitor: FluxMonitor::new(),
                signals: self.signals,
                metabolism: self.metabolism,
            }),
            feedback_transform: self.feedback_transform,
            run: Mutex::new(None),
        })
    }
}

impl<Op> FluxBuilder<Op>
where
    Op: Operation,
    Op::Output: Clone + Into<Op::Input>,
{
    /// Feed outputs back unchanged (converted with `Into`)
    #[must_use]
    pub fn passthrough_feedback(self) -> Self {
        self.feedback_transform(|output: &Op::Output| output.clone().into())
    }
}

enum Route<I, O> {
    Direct(I),
    Queued(SlotReceiver<O>),
}

impl<Op: Operation> FluxProcessor<Op> {
    /// Start building a processor around `inner`
    pub fn builder(inner: Op) -> FluxBuilder<Op> {
        FluxBuilder {
            inner,
            name: None,
            config: FluxConfig::default(),
            feedback_transform: None,
            signals: Arc::new(TracingEmitter),
            metabolism: None,
        }
    }

    /// Processor with `config` and default hooks
    ///
    /// # Errors
    ///
    /// Returns [`FluxError::Config`] if the configuration is invalid
    pub fn new(inner: Op, config: FluxConfig) -> FluxResult<Self> {
        Self::builder(inner).config(config).build()
    }

    /// Start processing `source` in a background task.
    ///
    /// Must be called from within a tokio runtime. The returned stream yields
    /// ordinary results in processing order and ends when the run ends.
    ///
    /// # Errors
    ///
    /// Returns [`FluxError::InvalidState`] unless the processor is dormant or
    /// stopped
    pub fn start<S>(&self, source: S) -> FluxResult<BoxStream<'static, Op::Output>>
    where
        S: Stream<Item = Op::Input> + Send + 'static,
    {
        let config = &self.shared.config;
        let (generation, perturbations, output) = {
            let mut core = self.shared.lock();
            if !core.state.can_start() {
                return Err(FluxError::invalid_state(core.state, "start"));
            }
            if core.state == FlowState::Stopped {
                core.gauge.reset();
                core.state = FlowState::Dormant;
            }
            core.perturbations = Arc::new(PerturbationQueue::new(config.perturbation_queue_size));
            core.output = Arc::new(OutputQueue::new(config.buffer_size, config.drop_policy));
            core.state = core.state.transition(FlowState::Flowing)?;
            core.generation += 1;
            (
                core.generation,
                Arc::clone(&core.perturbations),
                Arc::clone(&core.output),
            )
        };
        self.shared.monitor.record_run();

        let run = RunLoop {
            inner: Arc::clone(&self.inner),
            shared: Arc::clone(&self.shared),
            generation,
            perturbations,
            output: Arc::clone(&output),
            feedback: FeedbackRouter::new(config, self.feedback_transform.clone()),
            source: Some(source.boxed()),
            in_flight: Arc::default(),
        };

        let token = CancellationToken::new();
        let handle = tokio::spawn(run.drive(token.clone()));
        let done = handle
            .map(|joined| match joined {
                Ok(()) => Ok(()),
                Err(err) if err.is_cancelled() => Ok(()),
                Err(err) => Err(err.to_string()),
            })
            .boxed()
            .shared();

        *self.run.lock().unwrap_or_else(PoisonError::into_inner) = Some(RunHandle {
            _cancel_on_drop: token.clone().drop_guard(),
            token,
            done,
        });

        tracing::debug!(
            target: TARGET,
            processor = %self.shared.name,
            generation,
            buffer_size = config.buffer_size,
            drop_policy = %config.drop_policy,
            "run started"
        );

        Ok(output.into_stream())
    }

    /// Process one input and return its result.
    ///
    /// A dormant processor calls the inner operation directly. A flowing one
    /// queues a perturbation at the configured default priority and waits
    /// for the loop to serve it.
    ///
    /// # Errors
    ///
    /// [`FluxError::InvalidState`] outside dormant/flowing, the inner
    /// operation's failure, [`FluxError::PerturbationTimeout`], or the reason
    /// the perturbation was abandoned
    pub async fn invoke(&self, input: Op::Input) -> FluxResult<Op::Output> {
        self.invoke_with_priority(input, self.shared.config.perturbation_priority)
            .await
    }

    /// [`invoke`](Self::invoke) with an explicit priority
    ///
    /// # Errors
    ///
    /// Same as [`invoke`](Self::invoke)
    pub async fn invoke_with_priority(
        &self,
        input: Op::Input,
        priority: i32,
    ) -> FluxResult<Op::Output> {
        let route = {
            let core = self.shared.lock();
            if core.state == FlowState::Dormant {
                Route::Direct(input)
            } else if core.state.allows_perturbation() {
                let (perturbation, rx) = Perturbation::new(input, priority);
                core.perturbations.push(perturbation)?;
                Route::Queued(rx)
            } else {
                return Err(FluxError::invalid_state(core.state, "invoke"));
            }
        };

        let rx = match route {
            Route::Direct(input) => {
                return self
                    .inner
                    .invoke(input)
                    .await
                    .map_err(|err| operation_failed(self.inner.name(), &err));
            }
            Route::Queued(rx) => rx,
        };

        match self.shared.config.perturbation_timeout {
            Some(timeout) => tokio::time::timeout(timeout, rx.recv())
                .await
                .unwrap_or(Err(FluxError::PerturbationTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                })),
            None => rx.recv().await,
        }
    }

    /// Stop the current run.
    ///
    /// Pending perturbations fail with [`FluxError::Stopped`], the output
    /// stream ends after what is already queued, and the background task is
    /// cancelled and awaited. Safe to call in any state and more than once.
    ///
    /// # Errors
    ///
    /// Returns [`FluxError::Internal`] if the background task panicked
    pub async fn stop(&self) -> FluxResult<()> {
        let (perturbations, output, state, events) = {
            let mut core = self.shared.lock();
            if core.state.can_transition_to(FlowState::Stopped) {
                core.state = FlowState::Stopped;
            }
            (
                Arc::clone(&core.perturbations),
                Arc::clone(&core.output),
                core.state,
                core.gauge.processed(),
            )
        };

        let failed = perturbations.close(&FluxError::Stopped);
        output.close();

        let run = self.run.lock().unwrap_or_else(PoisonError::into_inner).take();
        let joined = match run {
            Some(run) => {
                run.token.cancel();
                run.done.await
            }
            None => Ok(()),
        };

        self.shared.signal(
            SignalKind::Stopped,
            state,
            events,
            json!({ "failed_perturbations": failed }),
        );

        joined.map_err(|message| {
            tracing::warn!(target: TARGET, processor = %self.shared.name, error = %message, "run task panicked");
            FluxError::Internal { message }
        })
    }

    /// Wait for the current run to finish on its own.
    ///
    /// # Errors
    ///
    /// Returns [`FluxError::Internal`] if the background task panicked
    pub async fn wait(&self) -> FluxResult<()> {
        let done = self
            .run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|run| run.done.clone());
        match done {
            Some(done) => done.await.map_err(|message| FluxError::Internal { message }),
            None => Ok(()),
        }
    }

    /// Return a stopped or collapsed processor to dormant with a full budget.
    ///
    /// # Errors
    ///
    /// Returns [`FluxError::InvalidState`] from any other state
    pub fn reset(&self) -> FluxResult<()> {
        let mut core = self.shared.lock();
        if !core.state.is_terminal() {
            return Err(FluxError::invalid_state(core.state, "reset"));
        }
        core.state = FlowState::Dormant;
        core.gauge.reset();
        Ok(())
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> FlowState {
        self.shared.lock().state
    }

    /// Events processed in the current run
    #[must_use]
    pub fn events_processed(&self) -> u64 {
        self.shared.lock().gauge.processed()
    }

    /// Entropy left in the current run
    #[must_use]
    pub fn entropy_remaining(&self) -> f64 {
        self.shared.lock().gauge.remaining()
    }

    /// Counters accumulated over the processor's lifetime
    #[must_use]
    pub fn metrics(&self) -> Metrics {
        self.shared.monitor.snapshot()
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &FluxConfig {
        &self.shared.config
    }

    /// Processor name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// The wrapped operation
    #[must_use]
    pub fn inner(&self) -> &Op {
        &self.inner
    }
}

fn operation_failed(operation: &str, err: &OperationError) -> FluxError {
    FluxError::Operation {
        operation: operation.to_string(),
        message: err.message().to_string(),
    }
}

enum Event<I, O> {
    Perturbation(Perturbation<I, O>),
    Feedback(I),
    Source(I),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunEnd {
    Exhausted,
    Collapsed,
    Cancelled,
}

/// Everything one run owns
struct RunLoop<Op: Operation> {
    inner: Arc<Op>,
    shared: Arc<SharedState<Op::Input, Op::Output>>,
    generation: u64,
    perturbations: Arc<PerturbationQueue<Op::Input, Op::Output>>,
    output: Arc<OutputQueue<Op::Output>>,
    feedback: FeedbackRouter<Op::Output, Op::Input>,
    source: Option<BoxStream<'static, Op::Input>>,
    in_flight: InFlight<Op::Output>,
}

impl<Op: Operation> RunLoop<Op> {
    async fn drive(self, token: CancellationToken) {
        let shared = Arc::clone(&self.shared);
        let generation = self.generation;
        let perturbations = Arc::clone(&self.perturbations);
        let output = Arc::clone(&self.output);
        let in_flight = Arc::clone(&self.in_flight);

        let end = tokio::select! {
            biased;
            () = token.cancelled() => RunEnd::Cancelled,
            end = self.run() => end,
        };

        // Cancelled mid-invoke: the caller is owed a reason
        let interrupted = in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some_and(|slot| slot.set_error(FluxError::Stopped));

        let (state, events) = {
            let mut core = shared.lock();
            if core.generation == generation && core.state.is_processing() {
                core.state = FlowState::Stopped;
            }
            (core.state, core.gauge.processed())
        };
        let abandoned = match end {
            RunEnd::Collapsed => FluxError::Collapsed {
                events_processed: events,
            },
            RunEnd::Exhausted | RunEnd::Cancelled => FluxError::Stopped,
        };
        let failed = perturbations.close(&abandoned) + usize::from(interrupted);
        output.close();

        tracing::info!(
            target: TARGET,
            processor = %shared.name,
            generation,
            end = ?end,
            state = %state,
            events,
            failed_perturbations = failed,
            "run finished"
        );
    }

    async fn run(mut self) -> RunEnd {
        loop {
            let Some(event) = self.next_event().await else {
                return RunEnd::Exhausted;
            };
            if !self.admits() {
                self.collapse(event);
                return RunEnd::Collapsed;
            }
            self.process(event).await;
            // Sources and operations may never return Pending
            tokio::task::yield_now().await;
        }
    }

    /// Perturbations first, then feedback, then the source. Returns `None`
    /// once the source is exhausted and both internal queues are empty.
    async fn next_event(&mut self) -> Option<Event<Op::Input, Op::Output>> {
        let perturbations = Arc::clone(&self.perturbations);
        loop {
            if let Some(perturbation) = perturbations.pop() {
                return Some(Event::Perturbation(perturbation));
            }
            if let Some(input) = self.feedback.pop() {
                return Some(Event::Feedback(input));
            }
            let source = self.source.as_mut()?;

            let pulled = tokio::select! {
                biased;
                () = perturbations.notified() => None,
                item = source.next() => Some(item),
            };
            match pulled {
                None => continue,
                Some(Some(input)) => return Some(Event::Source(input)),
                Some(None) => {
                    self.source = None;
                    if self
                        .shared
                        .swap_state(self.generation, FlowState::Flowing, FlowState::Draining)
                    {
                        tracing::debug!(target: TARGET, processor = %self.shared.name, "source exhausted, draining");
                    }
                }
            }
        }
    }

    fn admits(&self) -> bool {
        let core = self.shared.lock();
        core.generation == self.generation && core.gauge.admits()
    }

    fn collapse(&self, event: Event<Op::Input, Op::Output>) {
        let collapsed =
            self.shared
                .swap_state(self.generation, FlowState::Flowing, FlowState::Collapsed);
        let (state, events, remaining) = {
            let core = self.shared.lock();
            (core.state, core.gauge.processed(), core.gauge.remaining())
        };
        if collapsed {
            self.shared.monitor.record_collapse();
        }
        if let Event::Perturbation(perturbation) = event {
            perturbation.slot().set_error(FluxError::Collapsed {
                events_processed: events,
            });
        }

        self.shared.signal(
            SignalKind::Collapsed,
            state,
            events,
            json!({
                "entropy_remaining": remaining,
                "entropy_budget": self.shared.config.entropy_budget,
                "max_events": self.shared.config.max_events,
            }),
        );
    }

    async fn process(&mut self, event: Event<Op::Input, Op::Output>) {
        let (payload, slot, origin) = match event {
            Event::Perturbation(perturbation) => {
                let (payload, slot) = perturbation.into_parts();
                (payload, Some(slot), EventOrigin::Perturbation)
            }
            Event::Feedback(input) => (input, None, EventOrigin::Feedback),
            Event::Source(input) => (input, None, EventOrigin::Source),
        };

        let slot = slot.map(Arc::new);
        let perturbed = slot.is_some()
            && self
                .shared
                .swap_state(self.generation, FlowState::Flowing, FlowState::Perturbed);

        self.set_in_flight(slot.clone());
        let result = self.inner.invoke(payload).await;
        self.set_in_flight(None);
        let succeeded = result.is_ok();

        if perturbed {
            self.shared
                .swap_state(self.generation, FlowState::Perturbed, FlowState::Flowing);
        }
        let (events, remaining) = self.settle(origin);

        match (result, slot) {
            (Ok(value), Some(slot)) => {
                slot.set_result(value);
            }
            (Err(err), Some(slot)) => {
                slot.set_error(operation_failed(self.inner.name(), &err));
            }
            (Ok(value), None) => self.emit(value).await,
            (Err(err), None) => self.ordinary_failure(&err, origin, events),
        }

        self.metabolize(origin, succeeded, events, remaining);
    }

    fn set_in_flight(&self, slot: Option<Arc<ResultSlot<Op::Output>>>) {
        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner) = slot;
    }

    /// Spend entropy and count the event
    fn settle(&self, origin: EventOrigin) -> (u64, f64) {
        match origin {
            EventOrigin::Perturbation => self.shared.monitor.record_perturbation(),
            EventOrigin::Feedback => self.shared.monitor.record_feedback_event(),
            EventOrigin::Source => self.shared.monitor.record_source(),
        }
        let mut core = self.shared.lock();
        if core.generation == self.generation {
            core.gauge.consume();
        }
        (core.gauge.processed(), core.gauge.remaining())
    }

    async fn emit(&mut self, value: Op::Output) {
        let routed = self.feedback.offer(&value);
        self.shared.monitor.record_feedback(routed);

        let outcome = self.output.push(value).await;
        self.shared.monitor.record_push(outcome);
        if outcome.is_loss() {
            tracing::trace!(target: TARGET, processor = %self.shared.name, outcome = ?outcome, "output lost to backpressure");
        }
    }

    fn ordinary_failure(&self, err: &OperationError, origin: EventOrigin, events: u64) {
        self.shared.monitor.record_failure();
        tracing::debug!(
            target: TARGET,
            processor = %self.shared.name,
            origin = ?origin,
            error = %err,
            "event failed, continuing"
        );
        let state = self.shared.lock().state;
        self.shared.signal(
            SignalKind::Error,
            state,
            events,
            json!({
                "operation": self.inner.name(),
                "origin": origin,
                "error": err.message(),
            }),
        );
    }

    fn metabolize(&self, origin: EventOrigin, succeeded: bool, events: u64, remaining: f64) {
        let Some(metabolism) = &self.shared.metabolism else {
            return;
        };
        let event = MetabolicEvent {
            source: self.shared.name.clone(),
            origin,
            succeeded,
            events_processed: events,
            entropy_remaining: remaining,
        };
        match metabolism.consume(&event) {
            Ok(Some(fever)) => {
                self.shared.monitor.record_fever();
                tracing::warn!(
                    target: TARGET,
                    processor = %self.shared.name,
                    intensity = fever.intensity,
                    reason = %fever.reason,
                    "metabolic fever"
                );
            }
            Ok(None) => {}
            Err(err) => {
                tracing::debug!(target: TARGET, processor = %self.shared.name, error = %err, "metabolism adapter failed");
            }
        }
    }
}
