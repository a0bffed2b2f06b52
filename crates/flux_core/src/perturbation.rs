//! Perturbations: prioritized requests injected into a running stream.
//!
//! A caller that wants an answer from a flowing processor wraps its input in a
//! [`Perturbation`] and waits on the paired [`SlotReceiver`]. The processor
//! serves perturbations ahead of feedback and source input, highest priority
//! first and oldest first among equals.

use crate::error::{FluxError, FluxResult};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;
use std::time::Instant;
use tokio::sync::{oneshot, Notify};
use tokio::sync::futures::Notified;

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Single-assignment result slot.
///
/// The first resolution wins; later calls are no-ops that return `false`.
/// This lets a stop racing a completed perturbation settle without error.
#[derive(Debug)]
pub struct ResultSlot<T> {
    sender: Mutex<Option<oneshot::Sender<FluxResult<T>>>>,
}

impl<T> ResultSlot<T> {
    /// Create a slot and the receiver the caller waits on
    #[must_use]
    pub fn new() -> (Self, SlotReceiver<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sender: Mutex::new(Some(tx)),
            },
            SlotReceiver { inner: rx },
        )
    }

    /// Resolve with a value or error. Returns whether this call resolved it.
    pub fn resolve(&self, result: FluxResult<T>) -> bool {
        let sender = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match sender {
            // A receiver that gave up (timeout) still counts as resolved.
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Resolve with a value
    pub fn set_result(&self, value: T) -> bool {
        self.resolve(Ok(value))
    }

    /// Resolve with an error
    pub fn set_error(&self, error: FluxError) -> bool {
        self.resolve(Err(error))
    }

    /// Resolve as cancelled
    pub fn cancel(&self) -> bool {
        self.resolve(Err(FluxError::Cancelled))
    }

    /// Whether a result has been set
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        match self.sender.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}

/// Waiting side of a [`ResultSlot`]
#[derive(Debug)]
pub struct SlotReceiver<T> {
    inner: oneshot::Receiver<FluxResult<T>>,
}

impl<T> SlotReceiver<T> {
    /// Wait for the result. A slot dropped unresolved reads as cancelled.
    ///
    /// # Errors
    ///
    /// Returns the error the slot was resolved with
    pub async fn recv(self) -> FluxResult<T> {
        self.inner.await.unwrap_or(Err(FluxError::Cancelled))
    }
}

/// A prioritized request carrying its own result slot
#[derive(Debug)]
pub struct Perturbation<I, O> {
    payload: I,
    priority: i32,
    created_at: Instant,
    sequence: u64,
    slot: ResultSlot<O>,
}

impl<I, O> Perturbation<I, O> {
    /// Wrap `payload`; returns the perturbation and the caller's receiver
    #[must_use]
    pub fn new(payload: I, priority: i32) -> (Self, SlotReceiver<O>) {
        let (slot, rx) = ResultSlot::new();
        let perturbation = Self {
            payload,
            priority,
            created_at: Instant::now(),
            sequence: NEXT_SEQUENCE.fetch_add(1, AtomicOrdering::Relaxed),
            slot,
        };
        (perturbation, rx)
    }

    /// Priority, higher first
    #[must_use]
    pub const fn priority(&self) -> i32 {
        self.priority
    }

    /// Creation time
    #[must_use]
    pub const fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Borrow the payload
    #[must_use]
    pub const fn payload(&self) -> &I {
        &self.payload
    }

    /// Borrow the result slot
    #[must_use]
    pub const fn slot(&self) -> &ResultSlot<O> {
        &self.slot
    }

    /// Split into payload and slot
    #[must_use]
    pub fn into_parts(self) -> (I, ResultSlot<O>) {
        (self.payload, self.slot)
    }
}

impl<I, O> PartialEq for Perturbation<I, O> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<I, O> Eq for Perturbation<I, O> {}

impl<I, O> PartialOrd for Perturbation<I, O> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// "Greater" means "served sooner": higher priority, then earlier creation.
impl<I, O> Ord for Perturbation<I, O> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.created_at.cmp(&self.created_at))
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct QueueState<I, O> {
    heap: BinaryHeap<Perturbation<I, O>>,
    closed: bool,
}

/// Bounded priority queue of pending perturbations
pub struct PerturbationQueue<I, O> {
    state: Mutex<QueueState<I, O>>,
    notify: Notify,
    capacity: usize,
}

impl<I, O> PerturbationQueue<I, O> {
    /// Create an empty queue
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState<I, O>> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Enqueue a perturbation and wake the consumer
    ///
    /// # Errors
    ///
    /// Returns [`FluxError::QueueFull`] at capacity or [`FluxError::Stopped`]
    /// once closed
    pub fn push(&self, perturbation: Perturbation<I, O>) -> FluxResult<()> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(FluxError::Stopped);
            }
            if state.heap.len() >= self.capacity {
                return Err(FluxError::QueueFull {
                    queue: "perturbation",
                    capacity: self.capacity,
                });
            }
            state.heap.push(perturbation);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Take the most urgent perturbation
    pub fn pop(&self) -> Option<Perturbation<I, O>> {
        self.lock().heap.pop()
    }

    /// Resolves after a push. A push with no waiter leaves a permit, so a
    /// push between `pop` returning `None` and awaiting this is not lost.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    /// Number of pending perturbations
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    /// Whether nothing is pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }

    /// Queue capacity
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Refuse further pushes and fail everything pending with `error`.
    /// Returns how many perturbations were failed.
    pub fn close(&self, error: &FluxError) -> usize {
        let pending = {
            let mut state = self.lock();
            state.closed = true;
            std::mem::take(&mut state.heap)
        };
        pending
            .into_iter()
            .filter(|p| p.slot.set_error(error.clone()))
            .count()
    }

    /// Whether the queue has been closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
