//! Checksums appended to SLIP payloads before byte-stuffing.
//!
//! The trailer is computed over the unescaped payload and sent right after it,
//! inside the same pair of [`END`](crate::END) delimiters. 16-bit checksums are
//! transmitted low byte first.

use std::fmt;
use std::str::FromStr;

use crate::frame::{Frame, FrameFlags};

/// Initial register value shared by both 16-bit variants.
pub const CRC16_INIT: u16 = 0xFFFF;

const CCITT_POLY: u16 = 0x1021;
const MODBUS_POLY: u16 = 0xA001;

/// Integrity check appended to every frame.
///
/// The mode fixes both the algorithm and the trailer length, and must match on
/// the encoding and decoding side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CrcMode {
    /// No trailer; every decoded byte is payload.
    #[default]
    None,
    /// One byte, 8-bit wraparound sum.
    Sum8,
    /// Two bytes, CRC-16/CCITT-FALSE.
    Crc16Ccitt,
    /// Two bytes, CRC-16/MODBUS.
    Crc16Modbus,
}

impl CrcMode {
    /// Number of trailer bytes this mode adds to each frame.
    pub const fn trailer_len(self) -> usize {
        match self {
            CrcMode::None => 0,
            CrcMode::Sum8 => 1,
            CrcMode::Crc16Ccitt | CrcMode::Crc16Modbus => 2,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            CrcMode::None => "none",
            CrcMode::Sum8 => "sum8",
            CrcMode::Crc16Ccitt => "crc16-ccitt",
            CrcMode::Crc16Modbus => "crc16-modbus",
        }
    }
}

impl fmt::Display for CrcMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Returned when parsing an unknown [`CrcMode`] name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown CRC mode {0:?}")]
pub struct UnknownCrcMode(pub String);

impl FromStr for CrcMode {
    type Err = UnknownCrcMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(CrcMode::None),
            "sum8" => Ok(CrcMode::Sum8),
            "crc16-ccitt" | "ccitt" => Ok(CrcMode::Crc16Ccitt),
            "crc16-modbus" | "modbus" => Ok(CrcMode::Crc16Modbus),
            _ => Err(UnknownCrcMode(s.to_owned())),
        }
    }
}

/// 8-bit wraparound sum of all bytes.
pub fn sum8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &byte| acc.wrapping_add(byte))
}

/// CRC-16/CCITT-FALSE: polynomial 0x1021, MSB first, init 0xFFFF, no output XOR.
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    crc16_ccitt_with_init(data, CRC16_INIT)
}

/// [`crc16_ccitt`] starting from an arbitrary register value.
pub fn crc16_ccitt_with_init(data: &[u8], init: u16) -> u16 {
    data.iter().fold(init, |mut crc, &byte| {
        crc ^= u16::from(byte) << 8;
        for _ in 0..u8::BITS {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CCITT_POLY
            } else {
                crc << 1
            };
        }
        crc
    })
}

/// CRC-16/MODBUS: reflected polynomial 0xA001, LSB first, init 0xFFFF.
pub fn crc16_modbus(data: &[u8]) -> u16 {
    crc16_modbus_with_init(data, CRC16_INIT)
}

/// [`crc16_modbus`] starting from an arbitrary register value.
pub fn crc16_modbus_with_init(data: &[u8], init: u16) -> u16 {
    data.iter().fold(init, |mut crc, &byte| {
        crc ^= u16::from(byte);
        for _ in 0..u8::BITS {
            let lsb_set = crc & 0x0001 != 0;
            crc >>= 1;
            if lsb_set {
                crc ^= MODBUS_POLY;
            }
        }
        crc
    })
}

/// A computed trailer, ready to be appended to a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checksum {
    bytes: [u8; 2],
    len: usize,
    value: u16,
}

impl Checksum {
    const EMPTY: Checksum = Checksum {
        bytes: [0; 2],
        len: 0,
        value: 0,
    };

    fn sum8(value: u8) -> Self {
        Self {
            bytes: [value, 0],
            len: 1,
            value: u16::from(value),
        }
    }

    fn crc16(value: u16) -> Self {
        Self {
            bytes: value.to_le_bytes(),
            len: 2,
            value,
        }
    }

    /// Trailer length in bytes (0, 1 or 2).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Numeric checksum value; 0 for [`CrcMode::None`].
    pub fn value(&self) -> u16 {
        self.value
    }

    /// Trailer bytes in wire order.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

/// Compute the trailer for `data` under `mode`.
pub fn compute(data: &[u8], mode: CrcMode) -> Checksum {
    match mode {
        CrcMode::None => Checksum::EMPTY,
        CrcMode::Sum8 => Checksum::sum8(sum8(data)),
        CrcMode::Crc16Ccitt => Checksum::crc16(crc16_ccitt(data)),
        CrcMode::Crc16Modbus => Checksum::crc16(crc16_modbus(data)),
    }
}

/// Split the trailer off `data_with_crc`, check it and build the resulting [`Frame`].
///
/// * [`CrcMode::None`]: the whole input is payload and no flag is ever set.
/// * Input shorter than the trailer: empty payload flagged [`FrameFlags::DECODE_ERROR`].
/// * Trailer mismatch: payload kept, flagged [`FrameFlags::CHECKSUM_FAILED`].
pub fn verify_and_strip(data_with_crc: &[u8], mode: CrcMode) -> Frame {
    let trailer_len = mode.trailer_len();
    if trailer_len == 0 {
        return Frame::new(data_with_crc.to_vec(), FrameFlags::NONE);
    }
    if data_with_crc.len() < trailer_len {
        return Frame::error(FrameFlags::DECODE_ERROR);
    }

    let (payload, received) = data_with_crc.split_at(data_with_crc.len() - trailer_len);
    let expected = compute(payload, mode);
    let flags = if expected.as_bytes() == received {
        FrameFlags::NONE
    } else {
        FrameFlags::CHECKSUM_FAILED
    };
    Frame::new(payload.to_vec(), flags)
}
