use std::io;

/// Error type for the SLIP pipeline.
///
/// Malformed frames are not errors: they arrive as [`Frame`](crate::Frame) values
/// carrying [`FrameFlags`](crate::FrameFlags). The variants here end or refuse an
/// operation as a whole.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SlipError {
    /// Wrapper around [`std::io::Error`] originating from the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// `start()` was called on a source or bus that is already running.
    #[error("already started")]
    AlreadyStarted,

    /// The chunk queue of a source has already been handed to a consumer.
    #[error("chunk receiver already taken")]
    ChunksTaken,

    /// A chunk was offered to a queue whose consumer side is gone or that was closed.
    #[error("chunk queue closed")]
    QueueClosed,

    /// A blocking enqueue was abandoned because cancellation was requested.
    #[error("operation cancelled")]
    Cancelled,

    /// A background read or dispatch loop panicked or was aborted.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Convenient result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SlipError>;
