//! Blocking adapters over [`std::io::Read`] and [`std::io::Write`].

use std::io::{ErrorKind, Read, Write};

use crate::decoder::{DecoderConfig, SlipDecoder};
use crate::encoder::SlipEncoder;
use crate::error::{Result, SlipError};
use crate::frame::Frame;

const READ_CHUNK_SIZE: usize = 1024;

/// Writer wrapper that sends each payload as one SLIP frame.
///
/// See `demos/stream.rs` for a runnable demonstration.
pub struct SlipWriter<W> {
    inner: W,
    encoder: SlipEncoder,
}

impl<W> SlipWriter<W> {
    pub fn new(inner: W, encoder: SlipEncoder) -> Self {
        Self { inner, encoder }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> SlipWriter<W> {
    /// Encode `payload` and write the whole frame with a single `write_all`.
    pub fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        self.encoder.encode_into_writer(payload, &mut self.inner)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush().map_err(SlipError::from)
    }
}

/// Reader wrapper that yields decoded frames from a blocking byte stream.
///
/// Reads are buffered, so bytes past the current frame may already have been
/// pulled from the inner reader.
pub struct SlipReader<R> {
    inner: R,
    decoder: SlipDecoder,
    buf: Vec<u8>,
    start: usize,
    end: usize,
}

impl<R> SlipReader<R> {
    pub fn new(inner: R, config: DecoderConfig) -> Self {
        Self {
            inner,
            decoder: SlipDecoder::new(config),
            buf: vec![0; READ_CHUNK_SIZE],
            start: 0,
            end: 0,
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// `true` if a partial frame is buffered.
    pub fn has_remainder(&self) -> bool {
        self.decoder.pending_len() > 0 || self.decoder.is_escape_pending()
    }
}

impl<R: Read> SlipReader<R> {
    /// Read the next frame.
    ///
    /// Returns `Ok(None)` at end of stream; a partial frame left at that point is
    /// dropped. Flagged frames are returned like any other.
    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            while self.start < self.end {
                let byte = self.buf[self.start];
                self.start += 1;
                if let Some(frame) = self.decoder.push_byte(byte) {
                    return Ok(Some(frame));
                }
            }

            let read = match self.inner.read(&mut self.buf) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(SlipError::Io(err)),
            };
            if read == 0 {
                if self.has_remainder() {
                    tracing::debug!(
                        discarded = self.decoder.pending_len(),
                        "stream ended inside a frame"
                    );
                    self.decoder.reset();
                }
                return Ok(None);
            }
            self.start = 0;
            self.end = read;
        }
    }
}

impl<R: Read> Iterator for SlipReader<R> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_frame().transpose()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::crc::CrcMode;
    use crate::frame::FrameFlags;
    use crate::END;

    struct ByteByByte {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByte {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    #[test]
    fn reader_writer_roundtrip() {
        let encoder = SlipEncoder::new(CrcMode::Crc16Modbus);
        let mut writer = SlipWriter::new(Vec::new(), encoder);
        writer.write_frame(b"first").unwrap();
        writer.write_frame(&[END]).unwrap();
        writer.flush().unwrap();
        let encoded = writer.into_inner();

        let config = DecoderConfig::default().with_crc_mode(CrcMode::Crc16Modbus);
        let mut reader = SlipReader::new(Cursor::new(encoded), config);
        let first = reader.read_frame().unwrap().unwrap();
        assert!(first.is_ok());
        assert_eq!(first.payload().as_ref(), b"first");
        assert_eq!(reader.read_frame().unwrap().unwrap().payload().as_ref(), &[END]);
        assert!(reader.read_frame().unwrap().is_none());
    }

    #[test]
    fn partial_reads_decode() {
        let encoded = SlipEncoder::new(CrcMode::Sum8).encode(b"slow");
        let reader = SlipReader::new(
            ByteByByte { bytes: encoded, pos: 0 },
            DecoderConfig::default().with_crc_mode(CrcMode::Sum8),
        );
        let frames: Vec<Frame> = reader.map(|frame| frame.unwrap()).collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload().as_ref(), b"slow");
    }

    #[test]
    fn truncated_frame_ends_quietly() {
        let mut encoded = SlipEncoder::default().encode(b"cut");
        encoded.pop();
        let mut reader = SlipReader::new(Cursor::new(encoded), DecoderConfig::default());
        assert!(reader.read_frame().unwrap().is_none());
        assert!(!reader.has_remainder());
    }

    #[test]
    fn flagged_frames_are_returned() {
        let wire = [END, 0x01, 0x02, 0x03, 0x00, END];
        let config = DecoderConfig::default().with_crc_mode(CrcMode::Sum8);
        let mut reader = SlipReader::new(Cursor::new(wire), config);
        let frame = reader.read_frame().unwrap().unwrap();
        assert_eq!(frame.flags(), FrameFlags::CHECKSUM_FAILED);
    }
}
