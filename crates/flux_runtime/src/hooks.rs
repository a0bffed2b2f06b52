//! Observability hooks.
//!
//! Both hooks are best-effort: the processor logs and discards their errors.

use flux_core::{FeverSignal, MetabolicEvent, Signal, SignalKind};
use std::sync::Arc;

/// Signal emission failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Signal emission failed: {0}")]
pub struct SignalError(pub String);

/// Metabolism adapter failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Metabolism adapter failed: {0}")]
pub struct MetabolismError(pub String);

/// Fire-and-forget sink for processor signals
pub trait SignalEmitter: Send + Sync {
    /// Deliver one signal without blocking
    ///
    /// # Errors
    ///
    /// Any delivery failure; the caller ignores it
    fn emit(&self, signal: &Signal) -> Result<(), SignalError>;
}

/// Per-event observer that may raise a fever
pub trait Metabolism: Send + Sync {
    /// Observe one processed event
    ///
    /// # Errors
    ///
    /// Any adapter failure; the caller ignores it
    fn consume(&self, event: &MetabolicEvent) -> Result<Option<FeverSignal>, MetabolismError>;
}

/// Writes signals as structured `tracing` events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEmitter;

impl SignalEmitter for TracingEmitter {
    fn emit(&self, signal: &Signal) -> Result<(), SignalError> {
        match signal.kind {
            SignalKind::Collapsed => tracing::warn!(
                target: "flux::signal",
                source = %signal.source,
                state = %signal.state,
                events_processed = signal.events_processed,
                payload = %signal.payload,
                "processor collapsed"
            ),
            SignalKind::Error => tracing::warn!(
                target: "flux::signal",
                source = %signal.source,
                state = %signal.state,
                events_processed = signal.events_processed,
                payload = %signal.payload,
                "ordinary event failed"
            ),
            SignalKind::Stopped => tracing::info!(
                target: "flux::signal",
                source = %signal.source,
                state = %signal.state,
                events_processed = signal.events_processed,
                "processor stopped"
            ),
        }
        Ok(())
    }
}

/// Forwards signals to a bounded channel, dropping them when it is full
#[derive(Debug, Clone)]
pub struct ChannelEmitter {
    tx: tokio::sync::mpsc::Sender<Signal>,
}

impl ChannelEmitter {
    /// Emitter plus the receiving end
    #[must_use]
    pub fn new(capacity: usize) -> (Self, tokio::sync::mpsc::Receiver<Signal>) {
        let (tx, rx) = tokio::sync::mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl SignalEmitter for ChannelEmitter {
    fn emit(&self, signal: &Signal) -> Result<(), SignalError> {
        self.tx
            .try_send(signal.clone())
            .map_err(|err| SignalError(err.to_string()))
    }
}

/// Emit and swallow any failure
pub(crate) fn emit_best_effort(emitter: &Arc<dyn SignalEmitter>, signal: &Signal) {
    if let Err(err) = emitter.emit(signal) {
        tracing::debug!(
            target: "flux::signal",
            kind = %signal.kind,
            error = %err,
            "signal dropped"
        );
    }
}
