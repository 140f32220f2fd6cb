//! UUID задачи / Task identity
//!
//! Ядро сообщает UUID подключившейся стороны при accept.
//! The kernel reports the connecting peer's UUID on accept.

use core::fmt;

/// UUID в раскладке RFC 4122 / UUID in RFC 4122 field layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Uuid {
    pub time_low: u32,
    pub time_mid: u16,
    pub time_hi_and_version: u16,
    pub clock_seq_and_node: [u8; 8],
}

impl Uuid {
    pub const LEN: usize = 16;

    pub const NIL: Uuid = Uuid {
        time_low: 0,
        time_mid: 0,
        time_hi_and_version: 0,
        clock_seq_and_node: [0; 8],
    };

    pub const fn new(
        time_low: u32,
        time_mid: u16,
        time_hi_and_version: u16,
        clock_seq_and_node: [u8; 8],
    ) -> Self {
        Self { time_low, time_mid, time_hi_and_version, clock_seq_and_node }
    }

    /// Байты в порядке полей, little-endian.
    /// Field-order bytes, little-endian.
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0..4].copy_from_slice(&self.time_low.to_le_bytes());
        out[4..6].copy_from_slice(&self.time_mid.to_le_bytes());
        out[6..8].copy_from_slice(&self.time_hi_and_version.to_le_bytes());
        out[8..16].copy_from_slice(&self.clock_seq_and_node);
        out
    }

    pub fn from_bytes(bytes: &[u8; Self::LEN]) -> Self {
        let mut node = [0u8; 8];
        node.copy_from_slice(&bytes[8..16]);
        Self {
            time_low: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            time_mid: u16::from_le_bytes([bytes[4], bytes[5]]),
            time_hi_and_version: u16::from_le_bytes([bytes[6], bytes[7]]),
            clock_seq_and_node: node,
        }
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = &self.clock_seq_and_node;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.time_low, self.time_mid, self.time_hi_and_version,
            n[0], n[1], n[2], n[3], n[4], n[5], n[6], n[7],
        )
    }
}
