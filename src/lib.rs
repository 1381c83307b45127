#![doc = include_str!("../README.md")]

pub mod bus;
pub mod crc;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod io;
pub mod queue;
pub mod source;
pub mod tokio_codec;

#[cfg(feature = "async-codec")]
pub mod async_codec;

pub use bus::{Bus, SubscriptionId};
pub use crc::{verify_and_strip, Checksum, CrcMode};
pub use decoder::{DecoderConfig, SlipDecoder, DEFAULT_MAX_FRAME_LEN};
pub use encoder::SlipEncoder;
pub use error::{Result, SlipError};
pub use frame::{Frame, FrameFlags};
pub use io::{SlipReader, SlipWriter};
pub use queue::{Backpressure, ChunkReceiver, ChunkSender};
pub use source::{ByteSource, SourceConfig, SourceStats, StreamTransport, Transport};

/// SLIP END byte (0xC0).
pub const END: u8 = 0xC0;
/// SLIP ESC byte (0xDB).
pub const ESC: u8 = 0xDB;
/// SLIP ESC END byte (0xDC).
pub const ESC_END: u8 = 0xDC;
/// SLIP ESC ESC byte (0xDD).
pub const ESC_ESC: u8 = 0xDD;
