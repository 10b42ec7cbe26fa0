//! Superblock structure and serialization.
//!
//! The superblock holds the file format metadata plus the unique index
//! catalog. The data file starts with two copies of it, `SUPERBLOCK_SIZE`
//! bytes each, and the allocation units of the data region start right after
//! them.
//!
//! Writes alternate between the copies by sequence number, so a torn write
//! only damages the copy being written. On open the valid copy with the
//! higher sequence wins.

// Sizes written here are bounded by SUPERBLOCK_SIZE.
#![allow(clippy::cast_possible_truncation)]

use crate::index::IndexSpec;
use crate::storage::allocator::AllocationPolicy;
use crate::storage::slot::UNIT_SIZE;

/// Magic number identifying a docstore data file: "DOCSTORE"
pub const MAGIC: [u8; 8] = *b"DOCSTORE";

/// Current format version.
pub const FORMAT_VERSION: u32 = 2;

/// Size of one superblock copy in bytes.
pub const SUPERBLOCK_SIZE: usize = 4096;

/// Bytes reserved for both copies at the start of the file.
pub const SUPERBLOCK_REGION: usize = SUPERBLOCK_SIZE * 2;

/// Superblock field offsets.
mod offsets {
    pub const MAGIC: usize = 0;
    pub const FORMAT_VERSION: usize = 8;
    pub const UNIT_SIZE: usize = 12;
    pub const ALLOCATION_POLICY: usize = 16;
    // 17-23: reserved
    pub const PADDING_FACTOR: usize = 24;
    pub const INDEX_COUNT: usize = 32;
    pub const CATALOG_LEN: usize = 36;
    pub const NEXT_ID: usize = 40;
    pub const SEQUENCE: usize = 48;
    // 56-59: reserved
    pub const CHECKSUM: usize = 60;
    pub const CATALOG: usize = 64;
}

/// Largest catalog that fits after the fixed fields.
const MAX_CATALOG_LEN: usize = SUPERBLOCK_SIZE - offsets::CATALOG;

/// File-level metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Superblock {
    /// Format version number.
    pub format_version: u32,
    /// Allocation unit size in bytes (always `UNIT_SIZE`).
    pub unit_size: u32,
    /// How new slots are sized.
    pub allocation: AllocationPolicy,
    /// Current padding factor (used by `AllocationPolicy::PaddingFactor`).
    pub padding_factor: f64,
    /// Lower bound for the next record id (ids are never reused).
    pub next_id: u64,
    /// Unique index definitions, in catalog order.
    pub indexes: Vec<IndexSpec>,
    /// Bumped on every successful write; picks the copy to write next.
    pub sequence: u64,
}

impl Superblock {
    /// Create a new superblock for a fresh data file.
    #[must_use]
    pub const fn new(allocation: AllocationPolicy) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            unit_size: UNIT_SIZE as u32,
            allocation,
            padding_factor: 1.0,
            next_id: 1,
            indexes: Vec::new(),
            sequence: 0,
        }
    }

    /// Byte offset of the copy that holds `sequence`.
    #[must_use]
    pub const fn copy_offset(sequence: u64) -> u64 {
        (sequence % 2) * SUPERBLOCK_SIZE as u64
    }

    /// Parse both copies from the first `SUPERBLOCK_REGION` bytes and return
    /// the valid one with the higher sequence.
    ///
    /// # Errors
    ///
    /// Returns the first copy's error when neither copy is valid.
    pub fn read_newest(region: &[u8]) -> Result<Self, SuperblockError> {
        if region.len() < SUPERBLOCK_REGION {
            return Err(SuperblockError::Truncated(region.len()));
        }
        let first = Self::from_bytes(&region[..SUPERBLOCK_SIZE]);
        let second = Self::from_bytes(&region[SUPERBLOCK_SIZE..SUPERBLOCK_REGION]);
        match (first, second) {
            (Ok(a), Ok(b)) => Ok(if b.sequence > a.sequence { b } else { a }),
            (Ok(a), Err(_)) => Ok(a),
            (Err(_), Ok(b)) => Ok(b),
            (Err(e), Err(_)) => Err(e),
        }
    }

    /// Serialize the superblock into a `SUPERBLOCK_SIZE` buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SuperblockError> {
        let catalog = encode_catalog(&self.indexes);
        if catalog.len() > MAX_CATALOG_LEN {
            return Err(SuperblockError::CatalogTooLarge(catalog.len()));
        }

        let mut buf = vec![0u8; SUPERBLOCK_SIZE];
        buf[offsets::MAGIC..offsets::MAGIC + 8].copy_from_slice(&MAGIC);
        write_u32(&mut buf, offsets::FORMAT_VERSION, self.format_version);
        write_u32(&mut buf, offsets::UNIT_SIZE, self.unit_size);
        buf[offsets::ALLOCATION_POLICY] = self.allocation.as_byte();
        buf[offsets::PADDING_FACTOR..offsets::PADDING_FACTOR + 8]
            .copy_from_slice(&self.padding_factor.to_le_bytes());
        buf[offsets::NEXT_ID..offsets::NEXT_ID + 8].copy_from_slice(&self.next_id.to_le_bytes());
        buf[offsets::SEQUENCE..offsets::SEQUENCE + 8].copy_from_slice(&self.sequence.to_le_bytes());
        write_u32(&mut buf, offsets::INDEX_COUNT, self.indexes.len() as u32);
        write_u32(&mut buf, offsets::CATALOG_LEN, catalog.len() as u32);
        buf[offsets::CATALOG..offsets::CATALOG + catalog.len()].copy_from_slice(&catalog);

        let checksum = compute_checksum(&buf);
        write_u32(&mut buf, offsets::CHECKSUM, checksum);
        Ok(buf)
    }

    /// Deserialize a superblock.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, SuperblockError> {
        if buf.len() < SUPERBLOCK_SIZE {
            return Err(SuperblockError::Truncated(buf.len()));
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&buf[offsets::MAGIC..offsets::MAGIC + 8]);
        if magic != MAGIC {
            return Err(SuperblockError::InvalidMagic(magic));
        }

        let expected = read_u32(buf, offsets::CHECKSUM);
        let actual = compute_checksum(&buf[..SUPERBLOCK_SIZE]);
        if expected != actual {
            return Err(SuperblockError::ChecksumMismatch { expected, actual });
        }

        let format_version = read_u32(buf, offsets::FORMAT_VERSION);
        if format_version != FORMAT_VERSION {
            return Err(SuperblockError::UnsupportedVersion(format_version));
        }

        let unit_size = read_u32(buf, offsets::UNIT_SIZE);
        if unit_size as usize != UNIT_SIZE {
            return Err(SuperblockError::InvalidUnitSize(unit_size));
        }

        let allocation = AllocationPolicy::try_from(buf[offsets::ALLOCATION_POLICY])
            .map_err(SuperblockError::InvalidAllocationPolicy)?;

        let mut factor_bytes = [0u8; 8];
        factor_bytes.copy_from_slice(&buf[offsets::PADDING_FACTOR..offsets::PADDING_FACTOR + 8]);
        let padding_factor = f64::from_le_bytes(factor_bytes);

        let mut next_id_bytes = [0u8; 8];
        next_id_bytes.copy_from_slice(&buf[offsets::NEXT_ID..offsets::NEXT_ID + 8]);
        let next_id = u64::from_le_bytes(next_id_bytes);

        let mut sequence_bytes = [0u8; 8];
        sequence_bytes.copy_from_slice(&buf[offsets::SEQUENCE..offsets::SEQUENCE + 8]);
        let sequence = u64::from_le_bytes(sequence_bytes);

        let index_count = read_u32(buf, offsets::INDEX_COUNT) as usize;
        let catalog_len = read_u32(buf, offsets::CATALOG_LEN) as usize;
        if catalog_len > MAX_CATALOG_LEN {
            return Err(SuperblockError::CatalogCorrupt);
        }
        let indexes = decode_catalog(
            &buf[offsets::CATALOG..offsets::CATALOG + catalog_len],
            index_count,
        )?;

        Ok(Self {
            format_version,
            unit_size,
            allocation,
            padding_factor,
            next_id,
            indexes,
            sequence,
        })
    }
}

/// CRC32 over the superblock with the checksum field zeroed.
fn compute_checksum(buf: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buf[..offsets::CHECKSUM]);
    hasher.update(&[0u8; 4]);
    hasher.update(&buf[offsets::CHECKSUM + 4..SUPERBLOCK_SIZE]);
    hasher.finalize()
}

fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u16).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn read_str(buf: &[u8], offset: &mut usize) -> Result<String, SuperblockError> {
    let len_bytes = buf
        .get(*offset..*offset + 2)
        .ok_or(SuperblockError::CatalogCorrupt)?;
    let len = u16::from_le_bytes([len_bytes[0], len_bytes[1]]) as usize;
    *offset += 2;
    let raw = buf
        .get(*offset..*offset + len)
        .ok_or(SuperblockError::CatalogCorrupt)?;
    *offset += len;
    std::str::from_utf8(raw)
        .map(str::to_owned)
        .map_err(|_| SuperblockError::CatalogCorrupt)
}

/// Catalog layout per index: name, field count (u16), field names.
fn encode_catalog(indexes: &[IndexSpec]) -> Vec<u8> {
    let mut out = Vec::new();
    for spec in indexes {
        write_str(&mut out, spec.name());
        out.extend_from_slice(&(spec.fields().len() as u16).to_le_bytes());
        for field in spec.fields() {
            write_str(&mut out, field);
        }
    }
    out
}

fn decode_catalog(buf: &[u8], count: usize) -> Result<Vec<IndexSpec>, SuperblockError> {
    let mut indexes = Vec::with_capacity(count);
    let mut offset = 0;
    for _ in 0..count {
        let name = read_str(buf, &mut offset)?;
        let field_count_bytes = buf
            .get(offset..offset + 2)
            .ok_or(SuperblockError::CatalogCorrupt)?;
        let field_count =
            u16::from_le_bytes([field_count_bytes[0], field_count_bytes[1]]) as usize;
        offset += 2;

        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            fields.push(read_str(buf, &mut offset)?);
        }
        let spec = IndexSpec::new(&name, fields).map_err(|_| SuperblockError::CatalogCorrupt)?;
        indexes.push(spec);
    }
    Ok(indexes)
}

/// Errors that can occur when reading or writing a superblock.
#[derive(Debug)]
pub enum SuperblockError {
    /// Fewer than `SUPERBLOCK_SIZE` bytes available.
    Truncated(usize),
    /// Invalid magic number.
    InvalidMagic([u8; 8]),
    /// Checksum mismatch.
    ChecksumMismatch { expected: u32, actual: u32 },
    /// Unsupported format version.
    UnsupportedVersion(u32),
    /// Unit size differs from this build's `UNIT_SIZE`.
    InvalidUnitSize(u32),
    /// Unknown allocation policy byte.
    InvalidAllocationPolicy(u8),
    /// Index catalog does not fit in the superblock.
    CatalogTooLarge(usize),
    /// Index catalog could not be decoded.
    CatalogCorrupt,
}

impl std::fmt::Display for SuperblockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated(len) => write!(f, "superblock truncated: {len} bytes"),
            Self::InvalidMagic(magic) => {
                write!(
                    f,
                    "invalid magic number: {:?}",
                    String::from_utf8_lossy(magic)
                )
            }
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected}, got {actual}")
            }
            Self::UnsupportedVersion(v) => write!(f, "unsupported format version: {v}"),
            Self::InvalidUnitSize(s) => write!(f, "invalid unit size: {s}"),
            Self::InvalidAllocationPolicy(b) => write!(f, "invalid allocation policy: 0x{b:02x}"),
            Self::CatalogTooLarge(len) => write!(
                f,
                "index catalog of {len} bytes exceeds {MAX_CATALOG_LEN} bytes"
            ),
            Self::CatalogCorrupt => write!(f, "index catalog is corrupt"),
        }
    }
}

impl std::error::Error for SuperblockError {}
