//! Wires a [`ByteSource`] to a [`SlipDecoder`] and fans decoded frames out to subscribers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::stream::{BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::decoder::SlipDecoder;
use crate::error::{Result, SlipError};
use crate::frame::Frame;
use crate::source::{ByteSource, SourceStats, Transport};

/// Handle returned by the `subscribe` methods, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

enum Sink {
    Callback(Box<dyn FnMut(&Frame) + Send>),
    Channel(mpsc::UnboundedSender<Frame>),
}

impl Sink {
    /// Returns `false` once the sink can no longer receive frames.
    fn deliver(&mut self, frame: &Frame) -> bool {
        match self {
            Sink::Callback(callback) => {
                callback(frame);
                true
            }
            Sink::Channel(tx) => tx.send(frame.clone()).is_ok(),
        }
    }
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    entries: Vec<(SubscriptionId, Sink)>,
}

impl Subscribers {
    fn add(&mut self, sink: Sink) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, sink));
        id
    }

    fn dispatch(&mut self, frame: &Frame) {
        self.entries.retain_mut(|(id, sink)| {
            let alive = sink.deliver(frame);
            if !alive {
                tracing::debug!(subscription = id.0, "dropping closed subscriber");
            }
            alive
        });
    }
}

type SharedSubscribers = Arc<Mutex<Subscribers>>;

fn lock(subscribers: &SharedSubscribers) -> MutexGuard<'_, Subscribers> {
    subscribers.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Moves frames from one transport to any number of subscribers.
///
/// Frames reach subscribers in the order their delimiters appeared on the wire,
/// one at a time, from a single dispatch task. Callbacks run while the subscriber
/// list is locked and must not subscribe or unsubscribe from inside the callback.
///
/// ```no_run
/// use slipbus::{Bus, ByteSource, CrcMode, SlipDecoder, SourceConfig, StreamTransport};
///
/// # async fn run(port: tokio::io::DuplexStream) -> slipbus::Result<()> {
/// let source = ByteSource::new(StreamTransport::new(port), SourceConfig::default());
/// let mut bus = Bus::new(source, SlipDecoder::with_crc_mode(CrcMode::Crc16Ccitt));
/// let mut frames = bus.subscribe_channel();
/// bus.start()?;
/// if let Some(frame) = frames.recv().await {
///     println!("{:?}", frame);
/// }
/// bus.shutdown().await
/// # }
/// ```
pub struct Bus<T: Transport> {
    source: Option<ByteSource<T>>,
    decoder: Option<SlipDecoder>,
    subscribers: SharedSubscribers,
    dispatched: Arc<AtomicU64>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<T: Transport> Bus<T> {
    pub fn new(source: ByteSource<T>, decoder: SlipDecoder) -> Self {
        Self {
            source: Some(source),
            decoder: Some(decoder),
            subscribers: SharedSubscribers::default(),
            dispatched: Arc::default(),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Call `callback` for every frame, on the dispatch task.
    ///
    /// A slow callback holds up every other subscriber and, through the queue,
    /// the read loop.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: FnMut(&Frame) + Send + 'static,
    {
        lock(&self.subscribers).add(Sink::Callback(Box::new(callback)))
    }

    /// Receive every frame on an unbounded channel.
    ///
    /// The subscription goes away by itself when the receiver is dropped.
    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.subscribers).add(Sink::Channel(tx));
        rx
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = lock(&self.subscribers);
        let before = subscribers.entries.len();
        subscribers.entries.retain(|(entry, _)| *entry != id);
        subscribers.entries.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).entries.len()
    }

    /// Frames handed to subscribers so far.
    pub fn frames_dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Counters of the underlying source.
    pub fn source_stats(&self) -> SourceStats {
        self.source.as_ref().map(ByteSource::stats).unwrap_or_default()
    }

    /// `true` while the dispatch loop is alive.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Start the source, then the decode-and-dispatch loop.
    ///
    /// # Errors
    ///
    /// [`SlipError::AlreadyStarted`] on a second call, or whatever the source
    /// reports when it cannot start.
    pub fn start(&mut self) -> Result<()> {
        if self.task.is_some() {
            return Err(SlipError::AlreadyStarted);
        }
        let (Some(source), Some(decoder)) = (self.source.as_mut(), self.decoder.take()) else {
            return Err(SlipError::AlreadyStarted);
        };

        let chunks = source.take_chunks()?;
        source.start()?;

        let frames = decoder.into_stream(chunks, self.cancel.clone());
        self.task = Some(tokio::spawn(dispatch_loop(
            frames,
            self.subscribers.clone(),
            self.dispatched.clone(),
        )));
        tracing::debug!("bus started");
        Ok(())
    }

    /// Request both loops to stop. Returns immediately.
    ///
    /// A frame that is being handed to subscribers finishes its fan-out first.
    pub fn stop(&self) {
        self.cancel.cancel();
        if let Some(source) = &self.source {
            source.stop();
        }
    }

    /// Wait until the transport reaches end of stream and every frame has been
    /// dispatched, then release everything as [`shutdown`](Bus::shutdown) does.
    pub async fn wait(mut self) -> Result<()> {
        let dispatched = match self.task.take() {
            Some(task) => task.await.map_err(SlipError::from),
            None => Ok(()),
        };
        let released = self.release().await;
        dispatched.and(released)
    }

    /// Cancel, wait for the dispatch loop, then shut the source down.
    ///
    /// Returns the first failure among a panicked dispatch loop and a fatal
    /// transport error.
    pub async fn shutdown(mut self) -> Result<()> {
        self.stop();
        let dispatched = match self.task.take() {
            Some(task) => task.await.map_err(SlipError::from),
            None => Ok(()),
        };
        let released = self.release().await;
        tracing::debug!("bus shut down");
        dispatched.and(released)
    }

    async fn release(&mut self) -> Result<()> {
        match self.source.take() {
            Some(source) => source.shutdown().await,
            None => Ok(()),
        }
    }
}

impl<T: Transport> Drop for Bus<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn dispatch_loop(
    mut frames: BoxStream<'static, Frame>,
    subscribers: SharedSubscribers,
    dispatched: Arc<AtomicU64>,
) {
    while let Some(frame) = frames.next().await {
        if !frame.is_ok() {
            tracing::debug!(
                flags = ?frame.flags(),
                len = frame.payload().len(),
                "dispatching flagged frame"
            );
        }
        lock(&subscribers).dispatch(&frame);
        dispatched.fetch_add(1, Ordering::Relaxed);
    }
    tracing::debug!("frame stream ended");
}
