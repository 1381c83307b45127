//! Throughput of encoding and chunked decoding for every CRC mode.
//!
//! Frames are pseudo-random (xorshift, fixed seed) so runs are comparable. Decoding
//! feeds the concatenated wire stream in transport-sized chunks, the way a
//! `ByteSource` would hand it over.
//!
//! ```text
//! cargo run --release --example benchmark
//! SLIP_BENCH_FRAMES=20000 SLIP_BENCH_CHUNK=64 cargo run --example benchmark
//! ```
use std::time::{Duration, Instant};

use slipbus::{CrcMode, Frame, SlipDecoder, SlipEncoder};

const DEFAULT_FRAMES: usize = 200_000;
const DEFAULT_CHUNK: usize = 4096;
const PAYLOAD_LEN: usize = 96;

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .filter(|&value| value > 0)
        .unwrap_or(default)
}

struct XorShift(u64);

impl XorShift {
    fn byte(&mut self) -> u8 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        (self.0 >> 32) as u8
    }
}

/// Payloads with roughly one byte in 128 needing an escape, and a worst-case set.
fn payloads(count: usize) -> (Vec<Vec<u8>>, Vec<Vec<u8>>) {
    let mut rng = XorShift(0x5EED_0F_51_1BB5);
    let typical = (0..count)
        .map(|_| (0..PAYLOAD_LEN).map(|_| rng.byte()).collect())
        .collect();
    let hostile = (0..count)
        .map(|i| {
            (0..PAYLOAD_LEN)
                .map(|j| if (i + j) % 2 == 0 { 0xC0 } else { 0xDB })
                .collect()
        })
        .collect();
    (typical, hostile)
}

struct Timing {
    wire_bytes: usize,
    encode: Duration,
    decode: Duration,
}

fn measure(payloads: &[Vec<u8>], mode: CrcMode, chunk: usize) -> Timing {
    let encoder = SlipEncoder::new(mode);
    let mut wire = Vec::with_capacity(payloads.len() * encoder.max_encoded_len(PAYLOAD_LEN));

    let started = Instant::now();
    for payload in payloads {
        wire.extend_from_slice(&encoder.encode(payload));
    }
    let encode = started.elapsed();

    let mut decoder = SlipDecoder::with_crc_mode(mode);
    let mut frames: Vec<Frame> = Vec::with_capacity(payloads.len());
    let started = Instant::now();
    for piece in wire.chunks(chunk) {
        decoder.decode_into(piece, &mut frames);
    }
    let decode = started.elapsed();

    assert_eq!(frames.len(), payloads.len(), "{mode}: frame count");
    let intact = frames.iter().zip(payloads).all(|(frame, payload)| {
        frame.is_ok() && frame.payload().as_ref() == payload.as_slice()
    });
    assert!(intact, "{mode}: payload mismatch");

    Timing {
        wire_bytes: wire.len(),
        encode,
        decode,
    }
}

fn report(label: &str, mode: CrcMode, frames: usize, timing: &Timing) {
    let rate =
        |elapsed: Duration| timing.wire_bytes as f64 / elapsed.as_secs_f64().max(1e-9) / 1e6;
    println!(
        "{label:<8} {mode:<13} wire {:>10} B | encode {:>8.1} MB/s {:>7.1} ns/frame \
         | decode {:>8.1} MB/s {:>7.1} ns/frame",
        timing.wire_bytes,
        rate(timing.encode),
        timing.encode.as_nanos() as f64 / frames as f64,
        rate(timing.decode),
        timing.decode.as_nanos() as f64 / frames as f64,
    );
}

fn main() {
    let frames = env_usize("SLIP_BENCH_FRAMES", DEFAULT_FRAMES);
    let chunk = env_usize("SLIP_BENCH_CHUNK", DEFAULT_CHUNK);
    println!("{frames} frames of {PAYLOAD_LEN} bytes, decoded in {chunk}-byte chunks");

    let (typical, hostile) = payloads(frames);
    for mode in [
        CrcMode::None,
        CrcMode::Sum8,
        CrcMode::Crc16Ccitt,
        CrcMode::Crc16Modbus,
    ] {
        report("typical", mode, frames, &measure(&typical, mode, chunk));
        report("hostile", mode, frames, &measure(&hostile, mode, chunk));
    }
}
