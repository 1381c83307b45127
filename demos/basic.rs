use slipbus::{CrcMode, SlipDecoder, SlipEncoder};

fn main() {
    let payload = b"hello, slip";
    let encoder = SlipEncoder::new(CrcMode::Crc16Ccitt);
    let frame = encoder.encode(payload);
    println!("Encoded frame bytes: {frame:?}");

    let mut decoder = SlipDecoder::with_crc_mode(CrcMode::Crc16Ccitt);
    for decoded in decoder.push(&frame) {
        println!(
            "Decoded payload: {} ({:?})",
            String::from_utf8_lossy(decoded.payload()),
            decoded.flags()
        );
    }
}
