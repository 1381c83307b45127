use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::crc::CrcMode;
use crate::decoder::{DecoderConfig, SlipDecoder};
use crate::encoder::SlipEncoder;
use crate::frame::Frame;
use crate::{Result, SlipError};

/// SLIP codec implementing [`tokio_util::codec::Decoder`] and [`Encoder`].
///
/// Decoding yields [`Frame`]s, including flagged ones; only I/O failures of the
/// underlying stream surface as errors.
#[derive(Debug)]
pub struct SlipCodec {
    encoder: SlipEncoder,
    decoder: SlipDecoder,
}

impl SlipCodec {
    /// Codec with the same trailer in both directions and default decoder limits.
    pub fn new(crc_mode: CrcMode) -> Self {
        Self::with_config(DecoderConfig::default().with_crc_mode(crc_mode))
    }

    pub fn with_config(config: DecoderConfig) -> Self {
        Self {
            encoder: SlipEncoder::new(config.crc_mode),
            decoder: SlipDecoder::new(config),
        }
    }

    /// Encode a byte slice straight into `dst`.
    pub fn encode_slice(&mut self, item: &[u8], dst: &mut BytesMut) {
        self.encoder.encode_into(item, dst);
    }
}

impl Default for SlipCodec {
    fn default() -> Self {
        Self::new(CrcMode::None)
    }
}

impl Encoder<&[u8]> for SlipCodec {
    type Error = SlipError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<()> {
        self.encode_slice(item, dst);
        Ok(())
    }
}

impl Encoder<Bytes> for SlipCodec {
    type Error = SlipError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        self.encode_slice(&item, dst);
        Ok(())
    }
}

impl Encoder<Vec<u8>> for SlipCodec {
    type Error = SlipError;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<()> {
        self.encode_slice(&item, dst);
        Ok(())
    }
}

impl Decoder for SlipCodec {
    type Item = Frame;
    type Error = SlipError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        while !src.is_empty() {
            let byte = src.get_u8();
            if let Some(frame) = self.decoder.push_byte(byte) {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if self.decoder.pending_len() > 0 || self.decoder.is_escape_pending() {
            tracing::debug!(
                discarded = self.decoder.pending_len(),
                "stream ended inside a frame"
            );
            self.decoder.reset();
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameFlags;
    use crate::{END, ESC};

    #[test]
    fn encode_vec() {
        let mut codec = SlipCodec::new(CrcMode::Sum8);
        let mut dst = BytesMut::new();
        codec.encode(b"abc".to_vec(), &mut dst).unwrap();
        assert_eq!(&dst[..], SlipEncoder::new(CrcMode::Sum8).encode(b"abc"));
    }

    #[test]
    fn encode_slice() {
        let mut codec = SlipCodec::default();
        let mut dst = BytesMut::new();
        codec.encode(&b"data"[..], &mut dst).unwrap();
        assert_eq!(&dst[..], SlipEncoder::default().encode(b"data"));
    }

    #[test]
    fn decode_multiple_frames() {
        let encoder = SlipEncoder::new(CrcMode::Crc16Ccitt);
        let mut codec = SlipCodec::new(CrcMode::Crc16Ccitt);
        let frames = [encoder.encode(b"one"), encoder.encode(&[END])].concat();
        let mut src = BytesMut::from(&frames[..]);
        let first = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(first.payload().as_ref(), b"one");
        let second = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(second.payload().as_ref(), &[END]);
        assert!(codec.decode(&mut src).unwrap().is_none());
    }

    #[test]
    fn decode_invalid_escape_is_a_frame() {
        let mut codec = SlipCodec::default();
        let mut src = BytesMut::from(&[END, ESC, 0x01, END][..]);
        let frame = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(frame.flags(), FrameFlags::DECODE_ERROR);
    }

    #[test]
    fn decode_incomplete_eof_is_dropped() {
        let mut frame = SlipEncoder::default().encode(b"broken");
        frame.pop();
        let mut codec = SlipCodec::default();
        let mut src = BytesMut::from(&frame[..]);
        assert!(codec.decode(&mut src).unwrap().is_none());
        assert!(codec.decode_eof(&mut src).unwrap().is_none());
        assert!(src.is_empty());
    }
}
