//! Runs the full pipeline over an in-memory pipe.
//!
//! A writer task sends a few frames, one of them corrupted, in small uneven
//! pieces. The bus decodes them and prints what each subscriber sees.
//!
//! ```text
//! RUST_LOG=debug cargo run --example bus
//! ```
use std::time::Duration;

use slipbus::{
    Backpressure, Bus, ByteSource, CrcMode, SlipDecoder, SlipEncoder, SourceConfig, StreamTransport,
};
use tokio::io::AsyncWriteExt;

#[tokio::main]
async fn main() -> slipbus::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .init();

    let (mut port, device) = tokio::io::duplex(64);
    let config = SourceConfig::default()
        .with_chunk_size(16)
        .with_queue_capacity(8)
        .with_backpressure(Backpressure::Block);
    let source = ByteSource::new(StreamTransport::new(device), config);
    let mut bus = Bus::new(source, SlipDecoder::with_crc_mode(CrcMode::Crc16Ccitt));

    bus.subscribe(|frame| println!("callback: {:?}", frame));
    let mut frames = bus.subscribe_channel();
    bus.start()?;

    let writer = tokio::spawn(async move {
        let encoder = SlipEncoder::new(CrcMode::Crc16Ccitt);
        let mut wire = Vec::new();
        wire.extend(encoder.encode(b"temperature=21.5"));
        let mut corrupted = encoder.encode(b"humidity=40");
        corrupted[3] ^= 0x20;
        wire.extend(corrupted);
        wire.extend(encoder.encode(&[0x01, 0xC0, 0xDB, 0x02]));

        for piece in wire.chunks(5) {
            port.write_all(piece).await?;
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        std::io::Result::Ok(())
    });

    for _ in 0..3 {
        if let Some(frame) = frames.recv().await {
            println!("channel: ok={} payload={:?}", frame.is_ok(), frame.payload());
        }
    }
    writer.await??;

    println!("source stats: {:?}", bus.source_stats());
    bus.shutdown().await
}
