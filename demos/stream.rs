use slipbus::{CrcMode, DecoderConfig, Result, SlipEncoder, SlipReader, SlipWriter};
use std::io::Cursor;

fn main() -> Result<()> {
    let mut writer = SlipWriter::new(Vec::new(), SlipEncoder::new(CrcMode::Sum8));
    writer.write_frame(b"ping")?;
    writer.write_frame(b"pong")?;
    let encoded = writer.into_inner();

    let config = DecoderConfig::default().with_crc_mode(CrcMode::Sum8);
    let mut reader = SlipReader::new(Cursor::new(encoded), config);
    while let Some(frame) = reader.read_frame()? {
        println!("Received frame: {:?}", frame);
    }
    Ok(())
}
