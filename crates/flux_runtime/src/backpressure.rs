//! Bounded output queue with backpressure.
//!
//! The processor pushes ordinary results here; the caller drains them through
//! the stream returned by `start`. When the queue is full the configured
//! [`DropPolicy`] decides between waiting and discarding.

use flux_core::DropPolicy;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Result of a single push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Enqueued without loss
    Accepted,
    /// Enqueued after evicting the oldest item
    DroppedOldest,
    /// The new item was discarded
    DroppedNewest,
    /// The queue was closed; the item was discarded
    Closed,
}

impl PushOutcome {
    /// Whether an item was lost
    #[must_use]
    pub const fn is_loss(self) -> bool {
        !matches!(self, Self::Accepted)
    }
}

struct Buffer<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded queue between the processing loop and the output stream
pub struct OutputQueue<T> {
    buffer: Mutex<Buffer<T>>,
    capacity: usize,
    policy: DropPolicy,
    readable: Notify,
    writable: Notify,
}

impl<T> OutputQueue<T> {
    /// Create an open, empty queue
    #[must_use]
    pub fn new(capacity: usize, policy: DropPolicy) -> Self {
        Self {
            buffer: Mutex::new(Buffer {
                items: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            }),
            capacity: capacity.max(1),
            policy,
            readable: Notify::new(),
            writable: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Buffer<T>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push an item under the queue's policy.
    ///
    /// Only [`DropPolicy::Block`] can suspend, and only until space frees up
    /// or the queue is closed.
    pub async fn push(&self, item: T) -> PushOutcome {
        let mut pending = Some(item);
        loop {
            let writable = self.writable.notified();
            tokio::pin!(writable);
            writable.as_mut().enable();

            let outcome = {
                let mut buffer = self.lock();
                let Some(item) = pending.take() else {
                    return PushOutcome::Closed;
                };
                if buffer.closed {
                    return PushOutcome::Closed;
                }
                if buffer.items.len() < self.capacity {
                    buffer.items.push_back(item);
                    Some(PushOutcome::Accepted)
                } else {
                    match self.policy {
                        DropPolicy::DropOldest => {
                            buffer.items.pop_front();
                            buffer.items.push_back(item);
                            Some(PushOutcome::DroppedOldest)
                        }
                        DropPolicy::DropNewest => return PushOutcome::DroppedNewest,
                        DropPolicy::Block => {
                            pending = Some(item);
                            None
                        }
                    }
                }
            };

            match outcome {
                Some(outcome) => {
                    self.readable.notify_one();
                    return outcome;
                }
                None => writable.await,
            }
        }
    }

    /// Take the next item, waiting while the queue is empty and open.
    /// Returns `None` once the queue is closed and drained.
    pub async fn recv(&self) -> Option<T> {
        loop {
            let readable = self.readable.notified();
            tokio::pin!(readable);
            readable.as_mut().enable();

            {
                let mut buffer = self.lock();
                if let Some(item) = buffer.items.pop_front() {
                    drop(buffer);
                    self.writable.notify_one();
                    return Some(item);
                }
                if buffer.closed {
                    return None;
                }
            }
            readable.await;
        }
    }

    /// Take the next item without waiting
    pub fn try_recv(&self) -> Option<T> {
        let item = self.lock().items.pop_front();
        if item.is_some() {
            self.writable.notify_one();
        }
        item
    }

    /// Mark the end of output. Queued items stay readable; blocked producers
    /// and idle consumers wake up.
    pub fn close(&self) {
        self.lock().closed = true;
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }

    /// Whether `close` has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Items currently queued
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Whether nothing is queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Queue capacity
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Overflow policy
    #[must_use]
    pub const fn policy(&self) -> DropPolicy {
        self.policy
    }

    /// Buffer fill ratio (0.0 - 1.0)
    #[must_use]
    pub fn fill_ratio(&self) -> f64 {
        (self.len() as f64 / self.capacity as f64).min(1.0)
    }
}

impl<T: Send + 'static> OutputQueue<T> {
    /// Consume the queue as a stream that ends when the queue is closed and empty
    pub fn into_stream(self: Arc<Self>) -> BoxStream<'static, T> {
        stream::unfold(self, |queue| async move {
            let item = queue.recv().await?;
            Some((item, queue))
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_accepts_until_full() {
        let queue = OutputQueue::new(2, DropPolicy::DropNewest);
        assert_eq!(queue.push(1).await, PushOutcome::Accepted);
        assert_eq!(queue.push(2).await, PushOutcome::Accepted);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.fill_ratio(), 1.0);
    }

    #[tokio::test]
    async fn test_drop_newest_keeps_first() {
        let queue = OutputQueue::new(1, DropPolicy::DropNewest);
        assert_eq!(queue.push("first").await, PushOutcome::Accepted);
        assert_eq!(queue.push("second").await, PushOutcome::DroppedNewest);
        queue.close();
        assert_eq!(queue.recv().await, Some("first"));
        assert_eq!(queue.recv().await, None);
    }

    #[tokio::test]
    async fn test_drop_oldest_keeps_second() {
        let queue = OutputQueue::new(1, DropPolicy::DropOldest);
        assert_eq!(queue.push("first").await, PushOutcome::Accepted);
        assert_eq!(queue.push("second").await, PushOutcome::DroppedOldest);
        queue.close();
        assert_eq!(queue.recv().await, Some("second"));
        assert_eq!(queue.recv().await, None);
    }

    #[tokio::test]
    async fn test_block_waits_for_space() {
        let queue = Arc::new(OutputQueue::new(1, DropPolicy::Block));
        queue.push(1).await;

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.push(2).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        assert_eq!(queue.recv().await, Some(1));
        assert_eq!(producer.await.unwrap(), PushOutcome::Accepted);
        assert_eq!(queue.recv().await, Some(2));
    }

    #[tokio::test]
    async fn test_close_releases_blocked_producer() {
        let queue = Arc::new(OutputQueue::new(1, DropPolicy::Block));
        queue.push(1).await;

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.push(2).await })
        };
        tokio::task::yield_now().await;
        queue.close();
        assert_eq!(producer.await.unwrap(), PushOutcome::Closed);
        assert_eq!(queue.recv().await, Some(1));
        assert_eq!(queue.recv().await, None);
    }

    #[tokio::test]
    async fn test_stream_ends_after_close() {
        let queue = Arc::new(OutputQueue::new(4, DropPolicy::Block));
        let stream = Arc::clone(&queue).into_stream();
        for i in 0..3 {
            queue.push(i).await;
        }
        queue.close();
        assert_eq!(stream.collect::<Vec<_>>().await, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_consumer_wakes_on_push() {
        let queue = Arc::new(OutputQueue::new(4, DropPolicy::Block));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.recv().await })
        };
        tokio::task::yield_now().await;
        queue.push(7).await;
        assert_eq!(consumer.await.unwrap(), Some(7));
    }

    proptest::proptest! {
        #[test]
        fn prop_drop_policies_keep_window(capacity in 1usize..16, count in 0usize..64) {
            let (oldest, newest) = futures::executor::block_on(async {
                let oldest = OutputQueue::new(capacity, DropPolicy::DropOldest);
                let newest = OutputQueue::new(capacity, DropPolicy::DropNewest);
                for i in 0..count {
                    oldest.push(i).await;
                    newest.push(i).await;
                }
                let drain = |q: &OutputQueue<usize>| std::iter::from_fn(|| q.try_recv()).collect::<Vec<_>>();
                (drain(&oldest), drain(&newest))
            });

            let kept = count.min(capacity);
            proptest::prop_assert_eq!(oldest, (count - kept..count).collect::<Vec<_>>());
            proptest::prop_assert_eq!(newest, (0..kept).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_push_outcome_loss() {
        assert!(!PushOutcome::Accepted.is_loss());
        assert!(PushOutcome::DroppedOldest.is_loss());
        assert!(PushOutcome::DroppedNewest.is_loss());
        assert!(PushOutcome::Closed.is_loss());
    }
}
