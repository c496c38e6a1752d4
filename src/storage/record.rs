//! The on-disk record format: a 16-byte little-endian header (crc, timestamp,
//! key length, value length) followed by the raw key and value bytes. A
//! record with `value_size == 0` is a tombstone (see `storage::engine::delete`).

use std::time::{SystemTime, UNIX_EPOCH};

/// crc(4) + timestamp(4) + key_size(4) + value_size(4).
pub const HEADER_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub crc: u32,
    pub timestamp: u32,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Record {
    /// Builds a live-value record, stamping the current wall-clock time and
    /// computing its checksum.
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        let crc = checksum(&key, &value);
        Self { crc, timestamp: now_millis(), key, value }
    }

    /// Builds a tombstone record (empty value) for the given key.
    pub fn tombstone(key: Vec<u8>) -> Self {
        Self::new(key, Vec::new())
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_empty()
    }

    /// Total on-disk size of this record, header included.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.key.len() + self.value.len()
    }

    /// Serializes the record to its on-disk byte layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.crc.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.value.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);
        buf
    }

    /// Recomputes the checksum and compares it against the stored one.
    pub fn verify(&self) -> bool {
        checksum(&self.key, &self.value) == self.crc
    }
}

/// Decodes the fixed 16-byte header into its four little-endian fields.
pub fn decode_header(buf: &[u8; HEADER_SIZE]) -> (u32, u32, u32, u32) {
    let crc = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    let timestamp = u32::from_le_bytes(buf[4..8].try_into().unwrap());
    let key_size = u32::from_le_bytes(buf[8..12].try_into().unwrap());
    let value_size = u32::from_le_bytes(buf[12..16].try_into().unwrap());
    (crc, timestamp, key_size, value_size)
}

pub fn checksum(key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

fn now_millis() -> u32 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u32
}
