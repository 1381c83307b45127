fn main() -> slipbus::Result<()> {
    use asynchronous_codec::{FramedRead, FramedWrite};
    use futures::{executor::block_on, io::Cursor, sink::SinkExt, stream::StreamExt};
    use slipbus::async_codec::SlipCodec;
    use slipbus::CrcMode;

    block_on(async move {
        let cursor = Cursor::new(Vec::new());
        let mut writer = FramedWrite::new(cursor, SlipCodec::new(CrcMode::Sum8));
        writer.send(b"ping".to_vec()).await?;
        writer.send(b"pong".to_vec()).await?;
        let encoded_cursor = writer.into_inner();
        let encoded = encoded_cursor.into_inner();

        println!("Encoded bytes: {encoded:?}");

        let mut reader = FramedRead::new(Cursor::new(encoded), SlipCodec::new(CrcMode::Sum8));
        while let Some(frame) = reader.next().await.transpose()? {
            println!("Decoded frame: {:?}", String::from_utf8_lossy(frame.payload()));
        }

        Ok(())
    })
}
