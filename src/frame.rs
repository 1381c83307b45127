use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::time::SystemTime;

use bytes::Bytes;

/// Set of conditions detected while producing a [`Frame`].
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// No error was detected.
    pub const NONE: FrameFlags = FrameFlags(0);
    /// The frame was well formed but its CRC trailer did not match the payload.
    pub const CHECKSUM_FAILED: FrameFlags = FrameFlags(1 << 0);
    /// The byte stream violated SLIP framing, or the frame was shorter than its CRC trailer.
    pub const DECODE_ERROR: FrameFlags = FrameFlags(1 << 1);
    /// The frame exceeded the receive buffer limit.
    pub const RX_OVERFLOW: FrameFlags = FrameFlags(1 << 2);
    /// Reserved for transmit-side collaborators.
    pub const TX_ERROR: FrameFlags = FrameFlags(1 << 3);

    const NAMES: [(FrameFlags, &'static str); 4] = [
        (FrameFlags::CHECKSUM_FAILED, "CHECKSUM_FAILED"),
        (FrameFlags::DECODE_ERROR, "DECODE_ERROR"),
        (FrameFlags::RX_OVERFLOW, "RX_OVERFLOW"),
        (FrameFlags::TX_ERROR, "TX_ERROR"),
    ];

    /// Raw bit representation.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns `true` when no flag is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` when every flag in `other` is also set in `self`.
    pub const fn contains(self, other: FrameFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` when `self` and `other` share at least one flag.
    pub const fn intersects(self, other: FrameFlags) -> bool {
        self.0 & other.0 != 0
    }

    /// Set every flag in `other`.
    pub fn insert(&mut self, other: FrameFlags) {
        self.0 |= other.0;
    }
}

impl BitOr for FrameFlags {
    type Output = FrameFlags;

    fn bitor(self, rhs: FrameFlags) -> FrameFlags {
        FrameFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for FrameFlags {
    fn bitor_assign(&mut self, rhs: FrameFlags) {
        self.insert(rhs);
    }
}

impl fmt::Debug for FrameFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// One decoded unit of payload plus the conditions observed while decoding it.
///
/// Frames are immutable once built. The payload is reference counted so fanning a
/// frame out to several subscribers does not copy it.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Bytes,
    timestamp: SystemTime,
    flags: FrameFlags,
}

impl Frame {
    /// Build a frame stamped with the current time.
    pub fn new(payload: impl Into<Bytes>, flags: FrameFlags) -> Self {
        Self::with_timestamp(payload, SystemTime::now(), flags)
    }

    /// Build a frame with an explicit timestamp.
    pub fn with_timestamp(
        payload: impl Into<Bytes>,
        timestamp: SystemTime,
        flags: FrameFlags,
    ) -> Self {
        Self {
            payload: payload.into(),
            timestamp,
            flags,
        }
    }

    /// An empty frame that only reports `flags`.
    pub fn error(flags: FrameFlags) -> Self {
        Self::new(Bytes::new(), flags)
    }

    /// Decoded payload with any CRC trailer removed.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consume the frame and return its payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Wall-clock time at which the frame was completed.
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn flags(&self) -> FrameFlags {
        self.flags
    }

    /// Returns `true` when the frame carries no error flag.
    pub fn is_ok(&self) -> bool {
        self.flags.is_empty()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.payload.len())
            .field("payload", &self.payload)
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_combine() {
        let mut flags = FrameFlags::NONE;
        assert!(flags.is_empty());
        flags |= FrameFlags::DECODE_ERROR;
        flags.insert(FrameFlags::RX_OVERFLOW);
        assert!(flags.contains(FrameFlags::DECODE_ERROR | FrameFlags::RX_OVERFLOW));
        assert!(!flags.contains(FrameFlags::CHECKSUM_FAILED));
        assert!(flags.intersects(FrameFlags::RX_OVERFLOW | FrameFlags::TX_ERROR));
        assert_eq!(flags.bits(), 0b0110);
    }

    #[test]
    fn flags_debug_lists_names() {
        assert_eq!(format!("{:?}", FrameFlags::NONE), "NONE");
        let flags = FrameFlags::CHECKSUM_FAILED | FrameFlags::TX_ERROR;
        assert_eq!(format!("{flags:?}"), "CHECKSUM_FAILED | TX_ERROR");
    }

    #[test]
    fn error_frame_is_empty() {
        let frame = Frame::error(FrameFlags::DECODE_ERROR);
        assert!(frame.payload().is_empty());
        assert!(!frame.is_ok());
        assert_eq!(frame.flags(), FrameFlags::DECODE_ERROR);
    }

    #[test]
    fn frame_keeps_payload() {
        let frame = Frame::new(vec![1, 2, 3], FrameFlags::NONE);
        assert!(frame.is_ok());
        assert_eq!(frame.payload().as_ref(), &[1, 2, 3]);
        assert_eq!(frame.into_payload(), Bytes::from_static(&[1, 2, 3]));
    }
}
