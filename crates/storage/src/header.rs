//! Database header: the fixed record at offset 0.
//!
//! # On-disk layout (88 bytes, little-endian)
//!
//! ```text
//! +--------+------+----------------------------------+
//! | offset | size | field                            |
//! +--------+------+----------------------------------+
//! | 0      | 4    | magic "o2db" (legacy: "O2DB")    |
//! | 4      | 4    | format version (= 4)             |
//! | 8      | 4    | track count                      |
//! | 12     | 4    | vector dimension                 |
//! | 16     | 4    | feature flags                    |
//! | 20     | 4    | header size (= 88)               |
//! | 24     | 8    | data length (bytes used)         |
//! | 32     | 8    | key table offset                 |
//! | 40     | 8    | track length table offset        |
//! | 48     | 8    | data region offset               |
//! | 56     | 8    | l2-norm table offset             |
//! | 64     | 8    | times table offset               |
//! | 72     | 8    | power table offset               |
//! | 80     | 8    | data region capacity             |
//! +--------+------+----------------------------------+
//! ```
//!
//! The header is the single source of truth for committed state: every table
//! scan is bounded by its counters, and it is rewritten only after the
//! corresponding data append has completed. Table offsets are stored
//! explicitly rather than recomputed from fixed formulas.

use audiodb_core::error::FormatError;

/// Magic bytes of the current format, stored as a little-endian u32
pub const MAGIC: u32 = u32::from_le_bytes(*b"o2db");
/// Magic bytes of the legacy format, recognized only to report incompatibility
pub const LEGACY_MAGIC: u32 = u32::from_le_bytes(*b"O2DB");
/// The single format version this implementation reads and writes
pub const FORMAT_VERSION: u32 = 4;
/// Size of the serialized header record in bytes
pub const HEADER_SIZE: usize = 88;

/// Owned, parsed database header.
///
/// Always deserialized from the mapped/read bytes into this struct; the
/// struct is never overlaid on the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbHeader {
    /// Format marker
    pub magic: u32,
    /// Format version
    pub version: u32,
    /// Number of tracks stored
    pub num_tracks: u32,
    /// Fixed vector dimension; 0 until the first insert establishes it
    pub dim: u32,
    /// Feature flags (L2NORM / POWER / TIMES)
    pub flags: u32,
    /// Serialized header size, validated against `HEADER_SIZE`
    pub header_size: u32,
    /// Bytes used in the data region (high-water mark)
    pub data_length: u64,
    /// Byte offset of the key table
    pub key_table_offset: u64,
    /// Byte offset of the track length table
    pub track_table_offset: u64,
    /// Byte offset of the data region
    pub data_offset: u64,
    /// Byte offset of the l2-norm table
    pub l2norm_table_offset: u64,
    /// Byte offset of the times table
    pub times_table_offset: u64,
    /// Byte offset of the power table
    pub power_table_offset: u64,
    /// Preallocated data region capacity in bytes
    pub data_capacity: u64,
}

impl DbHeader {
    /// Serialize to the on-disk byte layout
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.version.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.num_tracks.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.dim.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.flags.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.header_size.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.data_length.to_le_bytes());
        bytes[32..40].copy_from_slice(&self.key_table_offset.to_le_bytes());
        bytes[40..48].copy_from_slice(&self.track_table_offset.to_le_bytes());
        bytes[48..56].copy_from_slice(&self.data_offset.to_le_bytes());
        bytes[56..64].copy_from_slice(&self.l2norm_table_offset.to_le_bytes());
        bytes[64..72].copy_from_slice(&self.times_table_offset.to_le_bytes());
        bytes[72..80].copy_from_slice(&self.power_table_offset.to_le_bytes());
        bytes[80..88].copy_from_slice(&self.data_capacity.to_le_bytes());
        bytes
    }

    /// Parse from the on-disk byte layout. Infallible field extraction;
    /// compatibility checks live in [`DbHeader::validate`].
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        let u32_at = |off: usize| u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
        let u64_at = |off: usize| u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap());
        DbHeader {
            magic: u32_at(0),
            version: u32_at(4),
            num_tracks: u32_at(8),
            dim: u32_at(12),
            flags: u32_at(16),
            header_size: u32_at(20),
            data_length: u64_at(24),
            key_table_offset: u64_at(32),
            track_table_offset: u64_at(40),
            data_offset: u64_at(48),
            l2norm_table_offset: u64_at(56),
            times_table_offset: u64_at(64),
            power_table_offset: u64_at(72),
            data_capacity: u64_at(80),
        }
    }

    /// Reject foreign files, the legacy format, stale versions, and builds
    /// with a different header layout.
    pub fn validate(&self) -> Result<(), FormatError> {
        if self.magic == LEGACY_MAGIC {
            return Err(FormatError::LegacyMagic);
        }
        if self.magic != MAGIC {
            return Err(FormatError::BadMagic { found: self.magic });
        }
        if self.version != FORMAT_VERSION {
            return Err(FormatError::Version {
                found: self.version,
                supported: FORMAT_VERSION,
            });
        }
        if self.header_size != HEADER_SIZE as u32 {
            return Err(FormatError::HeaderSize {
                found: self.header_size,
                expected: HEADER_SIZE as u32,
            });
        }
        Ok(())
    }

    /// Whether a feature flag is set
    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    /// Set a feature flag
    pub fn set_flag(&mut self, flag: u32) {
        self.flags |= flag;
    }
}
