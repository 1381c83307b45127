#[tokio::main(flavor = "current_thread")]
async fn main() -> slipbus::Result<()> {
    use futures::{SinkExt, StreamExt};
    use slipbus::tokio_codec::SlipCodec;
    use slipbus::CrcMode;
    use tokio::io::duplex;
    use tokio_util::codec::{FramedRead, FramedWrite};

    let (client, server) = duplex(1024);
    let mut writer = FramedWrite::new(client, SlipCodec::new(CrcMode::Crc16Modbus));
    let mut reader = FramedRead::new(server, SlipCodec::new(CrcMode::Crc16Modbus));

    writer.send(b"hello".to_vec()).await?;
    writer.send(b"world".to_vec()).await?;
    drop(writer);

    while let Some(frame) = reader.next().await.transpose()? {
        println!("Received frame: {:?}", String::from_utf8_lossy(frame.payload()));
    }

    Ok(())
}
