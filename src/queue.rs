//! Bounded, closeable single-producer/single-consumer queue of byte chunks.
//!
//! The producer side applies a [`Backpressure`] policy when the queue is full:
//! either wait for the consumer, or evict the oldest chunk to make room. Closing
//! either side wakes the other; chunks already queued stay readable after close.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SlipError};

/// What the producer does when the queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Backpressure {
    /// Wait for capacity. No chunk is ever lost.
    #[default]
    Block,
    /// Evict the oldest queued chunk to admit the new one.
    DropOldest,
}

/// Error returned by [`ChunkSender::try_send`]. The rejected chunk is handed back.
#[derive(Debug, thiserror::Error)]
pub enum TrySendError {
    #[error("chunk queue full")]
    Full(Bytes),
    #[error("chunk queue closed")]
    Closed(Bytes),
}

/// Error returned by [`ChunkReceiver::try_recv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TryRecvError {
    #[error("chunk queue empty")]
    Empty,
    #[error("chunk queue closed")]
    Closed,
}

struct State {
    chunks: VecDeque<Bytes>,
    closed: bool,
}

struct Shared {
    state: Mutex<State>,
    capacity: usize,
    backpressure: Backpressure,
    readable: Notify,
    writable: Notify,
    dropped_chunks: AtomicU64,
    dropped_bytes: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        self.lock().closed = true;
        self.readable.notify_one();
        self.writable.notify_one();
    }

    /// Returns the chunk back when it could not be queued without waiting.
    fn push(&self, chunk: Bytes) -> std::result::Result<(), TrySendError> {
        let mut state = self.lock();
        if state.closed {
            return Err(TrySendError::Closed(chunk));
        }
        if state.chunks.len() >= self.capacity {
            match self.backpressure {
                Backpressure::Block => return Err(TrySendError::Full(chunk)),
                Backpressure::DropOldest => {
                    if let Some(evicted) = state.chunks.pop_front() {
                        self.dropped_chunks.fetch_add(1, Ordering::Relaxed);
                        self.dropped_bytes
                            .fetch_add(evicted.len() as u64, Ordering::Relaxed);
                        tracing::trace!(len = evicted.len(), "evicted oldest chunk");
                    }
                }
            }
        }
        state.chunks.push_back(chunk);
        drop(state);
        self.readable.notify_one();
        Ok(())
    }

    fn pop(&self) -> std::result::Result<Bytes, TryRecvError> {
        let mut state = self.lock();
        match state.chunks.pop_front() {
            Some(chunk) => {
                drop(state);
                self.writable.notify_one();
                Ok(chunk)
            }
            None if state.closed => Err(TryRecvError::Closed),
            None => Err(TryRecvError::Empty),
        }
    }
}

/// Create a queue holding at most `capacity` chunks (clamped to at least one).
pub fn channel(capacity: usize, backpressure: Backpressure) -> (ChunkSender, ChunkReceiver) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            chunks: VecDeque::with_capacity(capacity.max(1)),
            closed: false,
        }),
        capacity: capacity.max(1),
        backpressure,
        readable: Notify::new(),
        writable: Notify::new(),
        dropped_chunks: AtomicU64::new(0),
        dropped_bytes: AtomicU64::new(0),
    });
    (
        ChunkSender {
            shared: shared.clone(),
        },
        ChunkReceiver { shared },
    )
}

/// Producer half. Dropping it closes the queue.
pub struct ChunkSender {
    shared: Arc<Shared>,
}

impl ChunkSender {
    /// Enqueue `chunk`, applying the queue's [`Backpressure`] policy.
    ///
    /// Under [`Backpressure::Block`] this waits for capacity; the wait ends early with
    /// [`SlipError::Cancelled`] once `cancel` fires, or [`SlipError::QueueClosed`] when
    /// the consumer goes away.
    pub async fn send(&self, chunk: Bytes, cancel: &CancellationToken) -> Result<()> {
        let mut chunk = chunk;
        loop {
            match self.shared.push(chunk) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Closed(_)) => return Err(SlipError::QueueClosed),
                Err(TrySendError::Full(rejected)) => chunk = rejected,
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SlipError::Cancelled),
                _ = self.shared.writable.notified() => {}
            }
        }
    }

    /// Enqueue without waiting.
    pub fn try_send(&self, chunk: Bytes) -> std::result::Result<(), TrySendError> {
        self.shared.push(chunk)
    }

    /// Mark the queue complete. Already queued chunks remain readable.
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Handle for observing queue depth and evictions after the sender has moved.
    pub fn metrics(&self) -> QueueMetrics {
        QueueMetrics {
            shared: self.shared.clone(),
        }
    }
}

impl Drop for ChunkSender {
    fn drop(&mut self) {
        self.shared.close();
    }
}

/// Consumer half. Dropping it closes the queue, which fails pending sends.
pub struct ChunkReceiver {
    shared: Arc<Shared>,
}

impl ChunkReceiver {
    /// Wait for the next chunk. Returns `None` once the queue is closed and drained.
    ///
    /// Cancel safe: dropping the future never loses a chunk.
    pub async fn recv(&mut self) -> Option<Bytes> {
        loop {
            match self.shared.pop() {
                Ok(chunk) => return Some(chunk),
                Err(TryRecvError::Closed) => return None,
                Err(TryRecvError::Empty) => self.shared.readable.notified().await,
            }
        }
    }

    /// Wait until a chunk is available. Returns `false` once the queue is closed and drained.
    pub async fn wait_readable(&mut self) -> bool {
        loop {
            {
                let state = self.shared.lock();
                if !state.chunks.is_empty() {
                    return true;
                }
                if state.closed {
                    return false;
                }
            }
            self.shared.readable.notified().await;
        }
    }

    /// Take the next chunk without waiting.
    pub fn try_recv(&mut self) -> std::result::Result<Bytes, TryRecvError> {
        self.shared.pop()
    }

    /// Close the queue from the consumer side.
    pub fn close(&mut self) {
        self.shared.close();
    }

    /// Returns `true` once the queue is closed, even if chunks remain to be read.
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub fn metrics(&self) -> QueueMetrics {
        QueueMetrics {
            shared: self.shared.clone(),
        }
    }
}

impl Drop for ChunkReceiver {
    fn drop(&mut self) {
        self.shared.close();
    }
}

/// Read-only view of a queue's depth and eviction counters.
#[derive(Clone)]
pub struct QueueMetrics {
    shared: Arc<Shared>,
}

impl QueueMetrics {
    /// Chunks currently waiting to be read.
    pub fn len(&self) -> usize {
        self.shared.lock().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn backpressure(&self) -> Backpressure {
        self.shared.backpressure
    }

    /// Chunks evicted by [`Backpressure::DropOldest`].
    pub fn dropped_chunks(&self) -> u64 {
        self.shared.dropped_chunks.load(Ordering::Relaxed)
    }

    /// Bytes evicted by [`Backpressure::DropOldest`].
    pub fn dropped_bytes(&self) -> u64 {
        self.shared.dropped_bytes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn chunk(byte: u8) -> Bytes {
        Bytes::from(vec![byte])
    }

    #[tokio::test]
    async fn send_then_recv_in_order() {
        let (tx, mut rx) = channel(4, Backpressure::Block);
        let cancel = CancellationToken::new();
        for i in 0..3 {
            tx.send(chunk(i), &cancel).await.unwrap();
        }
        drop(tx);
        assert_eq!(rx.recv().await, Some(chunk(0)));
        assert_eq!(rx.recv().await, Some(chunk(1)));
        assert_eq!(rx.recv().await, Some(chunk(2)));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn try_send_full_returns_chunk() {
        let (tx, mut rx) = channel(1, Backpressure::Block);
        tx.try_send(chunk(1)).unwrap();
        match tx.try_send(chunk(2)) {
            Err(TrySendError::Full(rejected)) => assert_eq!(rejected, chunk(2)),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(rx.try_recv(), Ok(chunk(1)));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn drop_oldest_evicts_front() {
        let (tx, mut rx) = channel(2, Backpressure::DropOldest);
        let metrics = tx.metrics();
        tx.try_send(chunk(1)).unwrap();
        tx.try_send(chunk(2)).unwrap();
        tx.try_send(Bytes::from_static(&[3, 3])).unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics.dropped_chunks(), 1);
        assert_eq!(metrics.dropped_bytes(), 1);
        assert_eq!(rx.try_recv(), Ok(chunk(2)));
        assert_eq!(rx.try_recv(), Ok(Bytes::from_static(&[3, 3])));
    }

    #[test]
    fn closed_queue_drains_then_reports_closed() {
        let (tx, mut rx) = channel(2, Backpressure::Block);
        tx.try_send(chunk(9)).unwrap();
        tx.close();
        assert!(rx.is_closed());
        assert!(matches!(tx.try_send(chunk(1)), Err(TrySendError::Closed(_))));
        assert_eq!(rx.try_recv(), Ok(chunk(9)));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));
    }

    #[tokio::test]
    async fn blocked_send_resumes_after_recv() {
        let (tx, mut rx) = channel(1, Backpressure::Block);
        let cancel = CancellationToken::new();
        tx.send(chunk(1), &cancel).await.unwrap();

        let producer = tokio::spawn(async move {
            tx.send(chunk(2), &cancel).await.unwrap();
            tx
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!producer.is_finished());

        assert_eq!(rx.recv().await, Some(chunk(1)));
        let _tx = producer.await.unwrap();
        assert_eq!(rx.recv().await, Some(chunk(2)));
    }

    #[tokio::test]
    async fn blocked_send_observes_cancellation() {
        let (tx, _rx) = channel(1, Backpressure::Block);
        let cancel = CancellationToken::new();
        tx.send(chunk(1), &cancel).await.unwrap();

        let child = cancel.clone();
        let producer = tokio::spawn(async move { tx.send(chunk(2), &child).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        assert!(matches!(producer.await.unwrap(), Err(SlipError::Cancelled)));
    }

    #[tokio::test]
    async fn blocked_send_fails_when_receiver_dropped() {
        let (tx, rx) = channel(1, Backpressure::Block);
        let cancel = CancellationToken::new();
        tx.send(chunk(1), &cancel).await.unwrap();

        let producer = tokio::spawn(async move { tx.send(chunk(2), &cancel).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(rx);
        assert!(matches!(producer.await.unwrap(), Err(SlipError::QueueClosed)));
    }

    #[tokio::test]
    async fn pending_recv_wakes_on_close() {
        let (tx, mut rx) = channel(1, Backpressure::Block);
        let consumer = tokio::spawn(async move { rx.wait_readable().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(tx);
        assert!(!consumer.await.unwrap());
    }
}
