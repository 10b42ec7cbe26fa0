//! Record slot format.
//!
//! The data region is divided into fixed-size allocation units. A slot is a
//! contiguous run of units whose first bytes hold a `SlotHeader`:
//!
//! ```text
//! +---------+------------------------------------------------+
//! | 0       | state (1 byte): empty / live / free            |
//! | 1       | flags (1 byte)                                 |
//! | 2-3     | header check (low 16 bits of CRC32, see below) |
//! | 4-7     | units (u32): slot length in units              |
//! | 8-15    | record_id (u64)                                |
//! | 16-23   | version (u64)                                  |
//! | 24-27   | len (u32): document bytes following header     |
//! | 28-31   | CRC32 of header bytes 0-27 and the document    |
//! +---------+------------------------------------------------+
//! ```
//!
//! The header check covers bytes 0-1 and 4-27 only, so a scan can trust
//! `units` and hop to the next slot even when the document bytes were torn.
//!
//! Free space starts with a free header whose `units` covers the whole free
//! run, so a scan can hop from slot to slot without an external map.

use crate::types::RecordId;

/// Allocation unit size in bytes.
pub const UNIT_SIZE: usize = 32;

/// Allocation unit size as u64 for offset calculations.
pub const UNIT_SIZE_U64: u64 = UNIT_SIZE as u64;

/// State byte of a slot header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    /// Never written (zero-filled storage).
    Empty = 0x00,
    /// Holds a document.
    Live = 0xD0,
    /// Start of a free run.
    Free = 0xF0,
}

impl TryFrom<u8> for SlotState {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Empty),
            0xD0 => Ok(Self::Live),
            0xF0 => Ok(Self::Free),
            _ => Err(value),
        }
    }
}

/// Header at the start of every slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotHeader {
    pub state: SlotState,
    pub flags: u8,
    pub header_check: u16,
    pub units: u32,
    pub record_id: u64,
    pub version: u64,
    pub len: u32,
    pub checksum: u32,
}

impl SlotHeader {
    /// Size of the slot header in bytes (exactly one unit).
    pub const SIZE: usize = 32;

    /// Header for a live slot holding `body`. Both checks are computed here.
    #[must_use]
    pub fn live(record_id: RecordId, version: u64, units: u32, body: &[u8]) -> Self {
        // Bodies are bounded by MAX_DOCUMENT_SIZE.
        #[allow(clippy::cast_possible_truncation)]
        let header = Self {
            state: SlotState::Live,
            flags: 0,
            header_check: 0,
            units,
            record_id: record_id.as_u64(),
            version,
            len: body.len() as u32,
            checksum: 0,
        };
        header.sealed(body)
    }

    /// Header marking the start of a free run of `units` units.
    ///
    /// `former_id` is the id of the record that last lived here (0 for none);
    /// recovery uses it so ids of deleted records are never handed out again.
    #[must_use]
    pub fn free(units: u32, former_id: u64) -> Self {
        let header = Self {
            state: SlotState::Free,
            flags: 0,
            header_check: 0,
            units,
            record_id: former_id,
            version: 0,
            len: 0,
            checksum: 0,
        };
        header.sealed(&[])
    }

    fn sealed(mut self, body: &[u8]) -> Self {
        self.header_check = self.compute_header_check();
        self.checksum = self.compute_checksum(body);
        self
    }

    /// Serialize the header to bytes.
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.state as u8;
        buf[1] = self.flags;
        buf[2..4].copy_from_slice(&self.header_check.to_le_bytes());
        buf[4..8].copy_from_slice(&self.units.to_le_bytes());
        buf[8..16].copy_from_slice(&self.record_id.to_le_bytes());
        buf[16..24].copy_from_slice(&self.version.to_le_bytes());
        buf[24..28].copy_from_slice(&self.len.to_le_bytes());
        buf[28..32].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Deserialize a header from bytes.
    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Result<Self, SlotError> {
        let state = SlotState::try_from(bytes[0]).map_err(SlotError::InvalidState)?;
        let u32_at = |o: usize| u32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]]);
        let u64_at = |o: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[o..o + 8]);
            u64::from_le_bytes(raw)
        };

        Ok(Self {
            state,
            flags: bytes[1],
            header_check: u16::from_le_bytes([bytes[2], bytes[3]]),
            units: u32_at(4),
            record_id: u64_at(8),
            version: u64_at(16),
            len: u32_at(24),
            checksum: u32_at(28),
        })
    }

    // The check is the low 16 bits of the CRC.
    #[allow(clippy::cast_possible_truncation)]
    fn compute_header_check(&self) -> u16 {
        let bytes = self.to_bytes();
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&bytes[0..2]);
        hasher.update(&bytes[4..28]);
        hasher.finalize() as u16
    }

    /// CRC32 of the header (excluding the checksum field) and the body.
    #[must_use]
    pub fn compute_checksum(&self, body: &[u8]) -> u32 {
        let bytes = self.to_bytes();
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&bytes[..28]);
        hasher.update(body);
        hasher.finalize()
    }

    /// Check the header fields alone (state, units, id, version, len).
    pub fn verify_header(&self) -> Result<(), SlotError> {
        let actual = self.compute_header_check();
        if actual == self.header_check {
            Ok(())
        } else {
            Err(SlotError::HeaderCheckMismatch {
                expected: self.header_check,
                actual,
            })
        }
    }

    /// Check the header and the stored checksum against `body`.
    pub fn verify(&self, body: &[u8]) -> Result<(), SlotError> {
        self.verify_header()?;
        let actual = self.compute_checksum(body);
        if actual == self.checksum {
            Ok(())
        } else {
            Err(SlotError::ChecksumMismatch {
                expected: self.checksum,
                actual,
            })
        }
    }

    /// Logical id stored in the header.
    #[must_use]
    pub const fn record_id(&self) -> RecordId {
        RecordId(self.record_id)
    }
}

/// Bytes available for a document in a slot of `units` units.
#[must_use]
pub const fn capacity(units: u32) -> usize {
    (units as usize * UNIT_SIZE).saturating_sub(SlotHeader::SIZE)
}

/// Smallest number of units whose capacity holds `doc_len` bytes.
#[must_use]
pub const fn units_for(doc_len: usize) -> u64 {
    (SlotHeader::SIZE + doc_len).div_ceil(UNIT_SIZE) as u64
}

/// Header followed by body, zero-padded to the whole slot, ready for a single
/// write. Writing every unit of the slot clears any header left inside it by
/// earlier slots, so a recovery scan that has to resync cannot pick one up.
#[must_use]
pub fn encode_slot(header: SlotHeader, body: &[u8]) -> Vec<u8> {
    let len = (header.units as usize * UNIT_SIZE).max(SlotHeader::SIZE + body.len());
    let mut buf = Vec::with_capacity(len);
    buf.extend_from_slice(&header.to_bytes());
    buf.extend_from_slice(body);
    buf.resize(len, 0);
    buf
}

/// Errors related to slot headers.
#[derive(Debug, PartialEq, Eq)]
pub enum SlotError {
    /// Unknown state byte.
    InvalidState(u8),
    /// Header fields do not match their check.
    HeaderCheckMismatch { expected: u16, actual: u16 },
    /// Checksum mismatch.
    ChecksumMismatch { expected: u32, actual: u32 },
}

impl std::fmt::Display for SlotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidState(v) => write!(f, "invalid slot state: 0x{v:02x}"),
            Self::HeaderCheckMismatch { expected, actual } => {
                write!(f, "header check mismatch: expected {expected}, got {actual}")
            }
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected}, got {actual}")
            }
        }
    }
}

impl std::error::Error for SlotError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_header_roundtrip() {
        let header = SlotHeader::live(RecordId(42), 7, 3, b"payload");

        let restored = SlotHeader::from_bytes(header.to_bytes()).expect("should parse");
        assert_eq!(restored, header);
        assert_eq!(restored.record_id(), RecordId(42));
        assert!(restored.verify(b"payload").is_ok());
    }

    #[test]
    fn test_checksum_covers_body_and_header() {
        let header = SlotHeader::live(RecordId(1), 1, 2, b"abc");
        assert!(matches!(
            header.verify(b"abd"),
            Err(SlotError::ChecksumMismatch { .. })
        ));

        let mut bumped = header;
        bumped.version = 2;
        assert!(matches!(
            bumped.verify(b"abc"),
            Err(SlotError::HeaderCheckMismatch { .. })
        ));
    }

    #[test]
    fn test_torn_body_keeps_header_valid() {
        let header = SlotHeader::live(RecordId(5), 3, 4, b"some document bytes");
        assert!(header.verify_header().is_ok());
        assert!(header.verify(b"some docu").is_err());
    }

    #[test]
    fn test_zero_bytes_parse_as_empty() {
        let header = SlotHeader::from_bytes([0u8; SlotHeader::SIZE]).expect("parse");
        assert_eq!(header.state, SlotState::Empty);
    }

    #[test]
    fn test_invalid_state() {
        let mut bytes = [0u8; SlotHeader::SIZE];
        bytes[0] = 0x42;
        assert_eq!(
            SlotHeader::from_bytes(bytes),
            Err(SlotError::InvalidState(0x42))
        );
    }

    #[test]
    fn test_capacity_and_units() {
        assert_eq!(capacity(0), 0);
        assert_eq!(capacity(1), 0);
        assert_eq!(capacity(2), 32);
        assert_eq!(units_for(0), 1);
        assert_eq!(units_for(1), 2);
        assert_eq!(units_for(32), 2);
        assert_eq!(units_for(33), 3);
        for len in 0..200 {
            let units = units_for(len);
            #[allow(clippy::cast_possible_truncation)]
            let cap = capacity(units as u32);
            assert!(cap >= len);
        }
    }

    #[test]
    fn test_encoded_slot_fills_its_units() {
        let header = SlotHeader::live(RecordId(1), 1, 3, b"short");
        let bytes = encode_slot(header, b"short");
        assert_eq!(bytes.len(), 3 * UNIT_SIZE);
        assert_eq!(&bytes[SlotHeader::SIZE..SlotHeader::SIZE + 5], b"short");
        assert!(bytes[SlotHeader::SIZE + 5..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_free_header_verifies() {
        let header = SlotHeader::free(12, 9);
        assert_eq!(header.state, SlotState::Free);
        assert!(header.verify(&[]).is_ok());
        assert_eq!(header.record_id(), RecordId(9));
    }
}
