use std::collections::VecDeque;

use futures::stream::{self, BoxStream, StreamExt};
use memchr::memchr2;
use tokio_util::sync::CancellationToken;

use crate::crc::{self, CrcMode};
use crate::frame::{Frame, FrameFlags};
use crate::queue::ChunkReceiver;
use crate::{END, ESC, ESC_END, ESC_ESC};

/// Default cap on buffered bytes (payload plus trailer) per frame: 64 KiB.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// Configuration for [`SlipDecoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Trailer expected at the end of every frame.
    pub crc_mode: CrcMode,
    /// Largest frame, trailer included, the decoder buffers before reporting
    /// [`FrameFlags::RX_OVERFLOW`].
    pub max_frame_len: usize,
}

impl DecoderConfig {
    pub fn with_crc_mode(mut self, crc_mode: CrcMode) -> Self {
        self.crc_mode = crc_mode;
        self
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            crc_mode: CrcMode::None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Incremental SLIP decoder.
///
/// Bytes may arrive in chunks split anywhere, including between [`ESC`] and its
/// escape code; the partial frame and the escape flag carry over to the next call.
/// Malformed input never fails: it yields a [`Frame`] carrying error flags and
/// decoding carries on with the following bytes.
///
/// ```
/// use slipbus::{CrcMode, DecoderConfig, SlipDecoder, SlipEncoder};
///
/// let wire = SlipEncoder::new(CrcMode::Sum8).encode(b"ping");
/// let mut decoder = SlipDecoder::new(DecoderConfig::default().with_crc_mode(CrcMode::Sum8));
/// let (head, tail) = wire.split_at(3);
/// assert!(decoder.push(head).is_empty());
/// let frames = decoder.push(tail);
/// assert_eq!(frames.len(), 1);
/// assert!(frames[0].is_ok());
/// assert_eq!(frames[0].payload().as_ref(), b"ping");
/// ```
#[derive(Debug)]
pub struct SlipDecoder {
    config: DecoderConfig,
    buffer: Vec<u8>,
    escape: bool,
    // Set after an overflow; bytes are dropped until the next END.
    discarding: bool,
}

impl SlipDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            config,
            buffer: Vec::with_capacity(256),
            escape: false,
            discarding: false,
        }
    }

    /// Decoder with default limits expecting `crc_mode` trailers.
    pub fn with_crc_mode(crc_mode: CrcMode) -> Self {
        Self::new(DecoderConfig::default().with_crc_mode(crc_mode))
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Number of bytes buffered for the frame currently being received.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// `true` when the last byte seen was an unconsumed [`ESC`].
    pub fn is_escape_pending(&self) -> bool {
        self.escape
    }

    /// Forget any partially received frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.escape = false;
        self.discarding = false;
    }

    /// Feed a single byte, returning a frame if this byte completed one.
    pub fn push_byte(&mut self, byte: u8) -> Option<Frame> {
        if self.discarding {
            if byte == END {
                self.discarding = false;
                self.escape = false;
            }
            return None;
        }

        if self.escape {
            self.escape = false;
            return match byte {
                ESC_END => self.append(&[END]),
                ESC_ESC => self.append(&[ESC]),
                // The offending byte is dropped. An END here ends the discarded frame
                // as a delimiter would, so the next frame starts clean either way.
                invalid => {
                    tracing::debug!(
                        code = invalid,
                        discarded = self.buffer.len(),
                        "invalid SLIP escape sequence"
                    );
                    self.buffer.clear();
                    Some(Frame::error(FrameFlags::DECODE_ERROR))
                }
            };
        }

        match byte {
            END => self.finish_frame(),
            ESC => {
                self.escape = true;
                None
            }
            value => self.append(&[value]),
        }
    }

    /// Feed a chunk of wire bytes and collect every frame it completes.
    pub fn push(&mut self, data: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        self.decode_into(data, &mut frames);
        frames
    }

    /// Feed a chunk of wire bytes, appending completed frames to `out` in stream order.
    pub fn decode_into<E: Extend<Frame>>(&mut self, data: &[u8], out: &mut E) {
        let mut i = 0usize;
        while i < data.len() {
            if self.escape || self.discarding {
                out.extend(self.push_byte(data[i]));
                i += 1;
                continue;
            }

            match memchr2(END, ESC, &data[i..]) {
                Some(rel) => {
                    let pos = i + rel;
                    if pos > i {
                        out.extend(self.append(&data[i..pos]));
                    }
                    out.extend(self.push_byte(data[pos]));
                    i = pos + 1;
                }
                None => {
                    out.extend(self.append(&data[i..]));
                    i = data.len();
                }
            }
        }
    }

    /// Turn this decoder into the frame sequence of one session over `chunks`.
    ///
    /// The stream ends when the queue is closed and drained, or as soon as `cancel`
    /// fires. A partial frame left over at the end is discarded.
    ///
    /// Chunks are pulled one at a time, only after every frame decoded from the
    /// previous chunk has been taken, so a full queue keeps holding back the producer.
    pub fn into_stream(
        self,
        chunks: ChunkReceiver,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Frame> {
        let session = Session {
            decoder: self,
            chunks,
            cancel,
            ready: VecDeque::new(),
        };

        stream::unfold(session, |mut session| async move {
            loop {
                if session.cancel.is_cancelled() {
                    return None;
                }
                if let Some(frame) = session.ready.pop_front() {
                    return Some((frame, session));
                }

                let readable = tokio::select! {
                    biased;
                    _ = session.cancel.cancelled() => false,
                    readable = session.chunks.wait_readable() => readable,
                };
                if !readable {
                    if session.decoder.pending_len() > 0 || session.decoder.is_escape_pending() {
                        tracing::debug!(
                            discarded = session.decoder.pending_len(),
                            "chunk stream ended inside a frame"
                        );
                    }
                    return None;
                }

                // One chunk per refill, and only once `ready` is empty, so the queue
                // stays the only buffer between producer and consumer.
                if let Ok(chunk) = session.chunks.try_recv() {
                    tracing::trace!(len = chunk.len(), "decoding chunk");
                    session.decoder.decode_into(&chunk, &mut session.ready);
                }
            }
        })
        .boxed()
    }

    fn append(&mut self, bytes: &[u8]) -> Option<Frame> {
        if self.buffer.len() + bytes.len() > self.config.max_frame_len {
            tracing::debug!(
                limit = self.config.max_frame_len,
                buffered = self.buffer.len(),
                "frame exceeds receive limit, dropping until next delimiter"
            );
            self.buffer.clear();
            self.discarding = true;
            return Some(Frame::error(FrameFlags::RX_OVERFLOW | FrameFlags::DECODE_ERROR));
        }
        self.buffer.extend_from_slice(bytes);
        None
    }

    fn finish_frame(&mut self) -> Option<Frame> {
        if self.buffer.is_empty() {
            return None;
        }
        let frame = crc::verify_and_strip(&self.buffer, self.config.crc_mode);
        self.buffer.clear();
        Some(frame)
    }
}

struct Session {
    decoder: SlipDecoder,
    chunks: ChunkReceiver,
    cancel: CancellationToken,
    ready: VecDeque<Frame>,
}
