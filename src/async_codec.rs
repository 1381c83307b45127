use asynchronous_codec::{BytesMut, Decoder, Encoder};
use bytes::Buf;

use crate::crc::CrcMode;
use crate::decoder::{DecoderConfig, SlipDecoder};
use crate::encoder::SlipEncoder;
use crate::frame::Frame;
use crate::{Result, SlipError};

/// SLIP codec for [`asynchronous_codec`]'s `FramedRead`/`FramedWrite`.
#[derive(Debug)]
pub struct SlipCodec {
    encoder: SlipEncoder,
    decoder: SlipDecoder,
}

impl SlipCodec {
    pub fn new(crc_mode: CrcMode) -> Self {
        Self::with_config(DecoderConfig::default().with_crc_mode(crc_mode))
    }

    pub fn with_config(config: DecoderConfig) -> Self {
        Self {
            encoder: SlipEncoder::new(config.crc_mode),
            decoder: SlipDecoder::new(config),
        }
    }
}

impl Default for SlipCodec {
    fn default() -> Self {
        Self::new(CrcMode::None)
    }
}

impl Encoder for SlipCodec {
    type Item = Vec<u8>;
    type Error = SlipError;

    fn encode(&mut self, item: Self::Item, dst: &mut BytesMut) -> Result<()> {
        self.encoder.encode_into(&item, dst);
        Ok(())
    }
}

impl Decoder for SlipCodec {
    type Item = Frame;
    type Error = SlipError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        while src.has_remaining() {
            if let Some(frame) = self.decoder.push_byte(src.get_u8()) {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use futures::io::Cursor;
    use futures::{SinkExt, StreamExt};

    use asynchronous_codec::{FramedRead, FramedWrite};

    use super::*;

    #[test]
    fn framed_roundtrip() {
        block_on(async {
            let mut writer =
                FramedWrite::new(Cursor::new(Vec::new()), SlipCodec::new(CrcMode::Sum8));
            writer.send(b"ping".to_vec()).await.unwrap();
            writer.send(vec![0xC0, 0xDB]).await.unwrap();
            let encoded = writer.into_inner().into_inner();

            let reader = FramedRead::new(Cursor::new(encoded), SlipCodec::new(CrcMode::Sum8));
            let frames: Vec<Frame> = reader.map(|frame| frame.unwrap()).collect().await;
            assert_eq!(frames.len(), 2);
            assert_eq!(frames[0].payload().as_ref(), b"ping");
            assert_eq!(frames[1].payload().as_ref(), &[0xC0, 0xDB]);
            assert!(frames.iter().all(Frame::is_ok));
        });
    }
}
