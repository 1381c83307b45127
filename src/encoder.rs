use std::io::Write;

use bytes::{BufMut, BytesMut};
use memchr::memchr2_iter;

use crate::crc::{self, CrcMode};
use crate::{Result, END, ESC, ESC_END, ESC_ESC};

/// Turns payloads into delimited, byte-stuffed SLIP frames with an optional CRC trailer.
///
/// Every frame is written as `END <stuffed payload ‖ trailer> END`. The leading
/// [`END`] flushes any line noise a receiver may have buffered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlipEncoder {
    crc_mode: CrcMode,
}

impl SlipEncoder {
    pub fn new(crc_mode: CrcMode) -> Self {
        Self { crc_mode }
    }

    pub fn crc_mode(&self) -> CrcMode {
        self.crc_mode
    }

    /// Encode `payload` and return the wire bytes as a newly allocated [`Vec`].
    ///
    /// With [`CrcMode::None`] an empty payload encodes to `END END`, which a decoder
    /// treats as an empty frame and skips. Modes with a trailer always put at least
    /// one byte between the delimiters, so their empty payloads do round-trip.
    ///
    /// ```
    /// use slipbus::{CrcMode, SlipEncoder};
    ///
    /// let wire = SlipEncoder::new(CrcMode::None).encode(&[0x01, 0xC0]);
    /// assert_eq!(wire, [0xC0, 0x01, 0xDB, 0xDC, 0xC0]);
    /// ```
    pub fn encode(&self, payload: &[u8]) -> Vec<u8> {
        let checksum = crc::compute(payload, self.crc_mode);
        let mut out = Vec::with_capacity(encoded_len_bytes(payload) + 2 * checksum.len() + 1);
        out.push(END);
        stuff_into(payload, &mut out);
        stuff_into(checksum.as_bytes(), &mut out);
        out.push(END);
        out
    }

    /// Encode `payload` and append the wire bytes to `dst`.
    pub fn encode_into(&self, payload: &[u8], dst: &mut BytesMut) {
        let checksum = crc::compute(payload, self.crc_mode);
        dst.reserve(encoded_len_bytes(payload) + 2 * checksum.len() + 1);
        dst.put_u8(END);
        stuff_into(payload, dst);
        stuff_into(checksum.as_bytes(), dst);
        dst.put_u8(END);
    }

    /// Encode `payload` straight into a writer.
    pub fn encode_into_writer<W: Write>(&self, payload: &[u8], writer: &mut W) -> Result<()> {
        writer.write_all(&self.encode(payload))?;
        Ok(())
    }

    /// Exact number of wire bytes [`encode`](Self::encode) produces for `payload`.
    pub fn encoded_len(&self, payload: &[u8]) -> usize {
        let checksum = crc::compute(payload, self.crc_mode);
        // Each term counts one delimiter.
        encoded_len_bytes(payload) + encoded_len_bytes(checksum.as_bytes())
    }

    /// Upper bound on the wire size of a payload of `payload_len` bytes.
    pub fn max_encoded_len(&self, payload_len: usize) -> usize {
        2 + 2 * (payload_len + self.crc_mode.trailer_len())
    }
}

/// Byte-stuff `data` into `out` without delimiters.
fn stuff_into<B: BufMut>(data: &[u8], out: &mut B) {
    let mut start = 0usize;
    for pos in memchr2_iter(END, ESC, data) {
        if pos > start {
            out.put_slice(&data[start..pos]);
        }
        match data[pos] {
            END => out.put_slice(&[ESC, ESC_END]),
            _ => out.put_slice(&[ESC, ESC_ESC]),
        }
        start = pos + 1;
    }
    if start < data.len() {
        out.put_slice(&data[start..]);
    }
}

/// Stuffed length of `bytes` plus one delimiter.
fn encoded_len_bytes(bytes: &[u8]) -> usize {
    bytes.len() + memchr2_iter(END, ESC, bytes).count() + 1
}
