//! Bridges a byte transport onto a bounded chunk queue.
//!
//! A [`ByteSource`] owns one read loop. The loop reads up to
//! [`SourceConfig::chunk_size`] bytes at a time and hands each read to the queue
//! under the configured [`Backpressure`] policy. The queue is closed whenever the
//! loop ends, so the consumer never waits on a dead producer.

use std::future::Future;
use std::io::{self, ErrorKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SlipError};
use crate::queue::{self, Backpressure, ChunkReceiver, ChunkSender, QueueMetrics};

/// Default number of bytes requested per transport read.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Default number of chunks the queue holds before backpressure applies.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Byte stream the source reads from.
///
/// Implementations report end of stream by returning `Ok(0)` from
/// [`read`](Transport::read). Any error is treated as fatal for the read loop.
pub trait Transport: Send + 'static {
    /// Read up to `buf.len()` bytes.
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Release the underlying resource.
    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

/// [`Transport`] over any [`AsyncRead`]: a file, a socket, a serial port stream.
///
/// Closing drops the reader.
#[derive(Debug)]
pub struct StreamTransport<R> {
    inner: Option<R>,
}

impl<R> StreamTransport<R> {
    pub fn new(inner: R) -> Self {
        Self { inner: Some(inner) }
    }

    /// Borrow the reader, or `None` once closed.
    pub fn get_ref(&self) -> Option<&R> {
        self.inner.as_ref()
    }
}

impl<R> Transport for StreamTransport<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.as_mut() {
            Some(reader) => reader.read(buf).await,
            None => Ok(0),
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        self.inner.take();
        Ok(())
    }
}

/// Configuration for [`ByteSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceConfig {
    /// Upper bound on bytes per transport read. Clamped to at least 1.
    pub chunk_size: usize,
    /// Chunks buffered between the read loop and the consumer. Clamped to at least 1.
    pub queue_capacity: usize,
    /// What the read loop does when the queue is full.
    pub backpressure: Backpressure,
}

impl SourceConfig {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn with_backpressure(mut self, backpressure: Backpressure) -> Self {
        self.backpressure = backpressure;
        self
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            backpressure: Backpressure::Block,
        }
    }
}

/// Snapshot of a source's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Bytes returned by the transport.
    pub bytes_read: u64,
    /// Successful non-empty reads.
    pub chunks_read: u64,
    /// Chunks evicted from the queue under [`Backpressure::DropOldest`].
    pub chunks_dropped: u64,
    /// Bytes in evicted chunks.
    pub bytes_dropped: u64,
    /// Chunks waiting in the queue.
    pub queued: usize,
}

#[derive(Default)]
struct Counters {
    bytes_read: AtomicU64,
    chunks_read: AtomicU64,
}

/// Runs one read loop from a [`Transport`] into a bounded chunk queue.
///
/// `start` needs a Tokio runtime. Dropping a running source cancels its loop;
/// use [`shutdown`](ByteSource::shutdown) to also wait for it and close the transport.
pub struct ByteSource<T: Transport> {
    config: SourceConfig,
    transport: Option<T>,
    sender: Option<ChunkSender>,
    receiver: Option<ChunkReceiver>,
    metrics: QueueMetrics,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    task: Option<JoinHandle<(T, Result<()>)>>,
}

impl<T: Transport> ByteSource<T> {
    pub fn new(transport: T, config: SourceConfig) -> Self {
        let config = SourceConfig {
            chunk_size: config.chunk_size.max(1),
            queue_capacity: config.queue_capacity.max(1),
            ..config
        };
        let (sender, receiver) = queue::channel(config.queue_capacity, config.backpressure);
        Self {
            config,
            transport: Some(transport),
            metrics: sender.metrics(),
            sender: Some(sender),
            receiver: Some(receiver),
            counters: Arc::default(),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Hand out the consumer side of the chunk queue. Succeeds once.
    pub fn take_chunks(&mut self) -> Result<ChunkReceiver> {
        self.receiver.take().ok_or(SlipError::ChunksTaken)
    }

    /// Spawn the read loop.
    ///
    /// # Errors
    ///
    /// [`SlipError::AlreadyStarted`] if the loop was started before.
    pub fn start(&mut self) -> Result<()> {
        let (Some(transport), Some(sender)) = (self.transport.take(), self.sender.take()) else {
            return Err(SlipError::AlreadyStarted);
        };
        tracing::debug!(
            chunk_size = self.config.chunk_size,
            capacity = self.config.queue_capacity,
            backpressure = ?self.config.backpressure,
            "starting byte source"
        );
        self.task = Some(tokio::spawn(read_loop(
            transport,
            sender,
            self.config.chunk_size,
            self.cancel.clone(),
            self.counters.clone(),
        )));
        Ok(())
    }

    /// Request the read loop to stop. Returns immediately.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// `true` while the read loop is alive.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            bytes_read: self.counters.bytes_read.load(Ordering::Relaxed),
            chunks_read: self.counters.chunks_read.load(Ordering::Relaxed),
            chunks_dropped: self.metrics.dropped_chunks(),
            bytes_dropped: self.metrics.dropped_bytes(),
            queued: self.metrics.len(),
        }
    }

    /// Cancel the read loop, wait for it, then close the transport.
    ///
    /// Returns the transport error that ended the loop, if any. A failure to close
    /// the transport is logged and otherwise ignored.
    pub async fn shutdown(mut self) -> Result<()> {
        self.cancel.cancel();

        let (transport, result) = match self.task.take() {
            Some(task) => {
                let (transport, result) = task.await?;
                (Some(transport), result)
            }
            None => (self.transport.take(), Ok(())),
        };

        if let Some(mut transport) = transport {
            if let Err(err) = transport.close().await {
                tracing::warn!(error = %err, "failed to close transport");
            }
        }
        tracing::debug!("byte source shut down");
        result
    }
}

impl<T: Transport> Drop for ByteSource<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn read_loop<T: Transport>(
    mut transport: T,
    sender: ChunkSender,
    chunk_size: usize,
    cancel: CancellationToken,
    counters: Arc<Counters>,
) -> (T, Result<()>) {
    let result = pump(&mut transport, &sender, chunk_size, &cancel, &counters).await;
    sender.close();
    (transport, result)
}

async fn pump<T: Transport>(
    transport: &mut T,
    sender: &ChunkSender,
    chunk_size: usize,
    cancel: &CancellationToken,
    counters: &Counters,
) -> Result<()> {
    let mut buf = vec![0u8; chunk_size];

    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("read loop cancelled");
                return Ok(());
            }
            read = transport.read(&mut buf) => read,
        };

        let n = match read {
            Ok(0) => {
                tracing::debug!("transport reached end of stream");
                return Ok(());
            }
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                tracing::warn!(error = %err, "transport read failed");
                return Err(SlipError::Io(err));
            }
        };

        counters.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
        counters.chunks_read.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(len = n, "read chunk");

        match sender.send(Bytes::copy_from_slice(&buf[..n]), cancel).await {
            Ok(()) => {}
            Err(SlipError::Cancelled) => {
                tracing::debug!("read loop cancelled while waiting for queue capacity");
                return Ok(());
            }
            Err(SlipError::QueueClosed) => {
                tracing::debug!("chunk consumer went away");
                return Ok(());
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use super::*;

    /// Hands out scripted reads, then end of stream.
    struct Scripted {
        reads: VecDeque<io::Result<Vec<u8>>>,
        close_error: bool,
    }

    impl Scripted {
        fn new(reads: Vec<io::Result<Vec<u8>>>) -> Self {
            Self {
                reads: reads.into(),
                close_error: false,
            }
        }
    }

    impl Transport for Scripted {
        async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(data)) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Some(Err(err)) => Err(err),
                None => Ok(0),
            }
        }

        async fn close(&mut self) -> io::Result<()> {
            if self.close_error {
                Err(io::Error::other("close failed"))
            } else {
                Ok(())
            }
        }
    }

    async fn drain(mut rx: ChunkReceiver) -> Vec<Bytes> {
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test]
    async fn forwards_reads_trimmed_in_order() {
        let transport = Scripted::new(vec![Ok(vec![1, 2, 3]), Ok(vec![4]), Ok(vec![5, 6])]);
        let mut source = ByteSource::new(transport, SourceConfig::default().with_chunk_size(8));
        let rx = source.take_chunks().unwrap();
        source.start().unwrap();

        let chunks = drain(rx).await;
        assert_eq!(
            chunks,
            vec![
                Bytes::from_static(&[1, 2, 3]),
                Bytes::from_static(&[4]),
                Bytes::from_static(&[5, 6])
            ]
        );

        let stats = source.stats();
        assert_eq!(stats.bytes_read, 6);
        assert_eq!(stats.chunks_read, 3);
        source.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn second_start_fails() {
        let mut source = ByteSource::new(Scripted::new(vec![]), SourceConfig::default());
        source.start().unwrap();
        assert!(matches!(source.start(), Err(SlipError::AlreadyStarted)));
        source.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn chunks_handed_out_once() {
        let mut source = ByteSource::new(Scripted::new(vec![]), SourceConfig::default());
        let _rx = source.take_chunks().unwrap();
        assert!(matches!(source.take_chunks(), Err(SlipError::ChunksTaken)));
    }

    #[tokio::test]
    async fn read_error_closes_queue_and_is_reported() {
        let transport = Scripted::new(vec![
            Ok(vec![7]),
            Err(io::Error::new(ErrorKind::Interrupted, "retry")),
            Ok(vec![8]),
            Err(io::Error::new(ErrorKind::BrokenPipe, "unplugged")),
        ]);
        let mut source = ByteSource::new(transport, SourceConfig::default());
        let rx = source.take_chunks().unwrap();
        source.start().unwrap();

        assert_eq!(
            drain(rx).await,
            vec![Bytes::from_static(&[7]), Bytes::from_static(&[8])]
        );
        match source.shutdown().await {
            Err(SlipError::Io(err)) => assert_eq!(err.kind(), ErrorKind::BrokenPipe),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_failure_is_swallowed() {
        let mut transport = Scripted::new(vec![Ok(vec![1])]);
        transport.close_error = true;
        let mut source = ByteSource::new(transport, SourceConfig::default());
        source.start().unwrap();
        source.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn stop_unblocks_full_queue() {
        let reads = (0..10).map(|i| Ok(vec![i])).collect();
        let config = SourceConfig::default().with_queue_capacity(2);
        let mut source = ByteSource::new(Scripted::new(reads), config);
        let _rx = source.take_chunks().unwrap();
        source.start().unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(source.is_running());
        assert_eq!(source.stats().queued, 2);

        source.stop();
        tokio::time::timeout(Duration::from_secs(1), source.shutdown())
            .await
            .expect("shutdown should not hang")
            .unwrap();
    }

    #[tokio::test]
    async fn drop_oldest_never_blocks() {
        let reads = (0..10).map(|i| Ok(vec![i])).collect();
        let config = SourceConfig::default()
            .with_queue_capacity(3)
            .with_backpressure(Backpressure::DropOldest);
        let mut source = ByteSource::new(Scripted::new(reads), config);
        let rx = source.take_chunks().unwrap();
        source.start().unwrap();

        let chunks = drain(rx).await;
        let stats = source.stats();
        assert_eq!(stats.bytes_read, 10);
        assert_eq!(chunks.len() as u64 + stats.chunks_dropped, 10);
        assert_eq!(chunks.last(), Some(&Bytes::from_static(&[9])));
        assert!(chunks.windows(2).all(|w| w[0][0] < w[1][0]));
        source.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn stream_transport_reads_async_reader() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let mut source = ByteSource::new(StreamTransport::new(reader), SourceConfig::default());
        let rx = source.take_chunks().unwrap();
        source.start().unwrap();

        tokio::io::AsyncWriteExt::write_all(&mut writer, b"hello").await.unwrap();
        drop(writer);

        let bytes: Vec<u8> = drain(rx).await.concat();
        assert_eq!(bytes, b"hello");
        source.shutdown().await.unwrap();
    }
}
