//! Table layout: page-alignment math and bounds-checked table descriptors.
//!
//! Five tables plus the data region live in one preallocated file. Each
//! starts at a page-aligned offset recorded in the header. A [`TableSpec`]
//! unifies the offset/length/capacity arithmetic that would otherwise be
//! repeated per table, and bounds-checks every element access against the
//! table's capacity.

use audiodb_core::{Error, Result};
use once_cell::sync::Lazy;

use crate::header::{DbHeader, FORMAT_VERSION, HEADER_SIZE, MAGIC};

/// Fixed width of one key slot in the key table
pub const KEY_SLOT_SIZE: usize = 256;
/// Width of one entry in the track length table
pub const TRACK_ENTRY_SIZE: usize = 4;
/// Annotation tables are sized for this many vectors per track at create time
pub const MEAN_VECTORS_PER_TRACK: u64 = 1000;

static PAGE_SIZE: Lazy<u64> = Lazy::new(|| {
    // SAFETY: sysconf has no memory-safety preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as u64
    }
});

/// The system page size; mappings operate only at this granularity
pub fn page_size() -> u64 {
    *PAGE_SIZE
}

/// Round up to the next page boundary
pub fn align_page_up(x: u64) -> u64 {
    let page = page_size();
    (x + page - 1) & !(page - 1)
}

/// Round down to the previous page boundary
pub fn align_page_down(x: u64) -> u64 {
    x & !(page_size() - 1)
}

/// The logical tables of a database file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableId {
    /// Fixed-width key slots, one per track
    Keys,
    /// u32 vector counts, one per track
    TrackLengths,
    /// Concatenated f64 vectors
    Data,
    /// One f64 Euclidean norm per vector
    L2Norm,
    /// One f64 timestamp per vector
    Times,
    /// One f64 power scalar per vector
    Power,
}

impl TableId {
    /// Human-readable table name, used in capacity errors
    pub fn name(self) -> &'static str {
        match self {
            TableId::Keys => "key table",
            TableId::TrackLengths => "track length table",
            TableId::Data => "data region",
            TableId::L2Norm => "l2-norm table",
            TableId::Times => "times table",
            TableId::Power => "power table",
        }
    }
}

/// Descriptor for one table: absolute byte offset, element width, and
/// capacity. Logical usage is derived from header counters, not stored here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    /// Which table this describes
    pub id: TableId,
    /// Absolute byte offset of the table within the file
    pub offset: u64,
    /// Width of one element in bytes
    pub element_size: usize,
    /// Preallocated capacity in bytes
    pub capacity: u64,
}

impl TableSpec {
    /// Derive the descriptor for a table from the header's explicit offsets.
    ///
    /// Capacities are the gaps between consecutive table offsets, except the
    /// data region whose capacity the header stores directly.
    pub fn for_table(header: &DbHeader, id: TableId) -> TableSpec {
        let (offset, element_size, capacity) = match id {
            TableId::Keys => (
                header.key_table_offset,
                KEY_SLOT_SIZE,
                header.track_table_offset - header.key_table_offset,
            ),
            TableId::TrackLengths => (
                header.track_table_offset,
                TRACK_ENTRY_SIZE,
                header.data_offset - header.track_table_offset,
            ),
            TableId::Data => (header.data_offset, 8, header.data_capacity),
            TableId::L2Norm => (
                header.l2norm_table_offset,
                8,
                header.times_table_offset - header.l2norm_table_offset,
            ),
            TableId::Times => (
                header.times_table_offset,
                8,
                header.power_table_offset - header.times_table_offset,
            ),
            TableId::Power => (
                header.power_table_offset,
                8,
                // Power is the last table; capacity mirrors the other
                // per-vector annotation tables.
                header.times_table_offset - header.l2norm_table_offset,
            ),
        };
        TableSpec {
            id,
            offset,
            element_size,
            capacity,
        }
    }

    /// Bytes currently used by this table, derived from header counters.
    ///
    /// `total_vectors` is the sum of all track lengths (only consulted for
    /// the per-vector annotation tables).
    pub fn used_bytes(&self, header: &DbHeader, total_vectors: u64) -> u64 {
        match self.id {
            TableId::Keys => header.num_tracks as u64 * KEY_SLOT_SIZE as u64,
            TableId::TrackLengths => header.num_tracks as u64 * TRACK_ENTRY_SIZE as u64,
            TableId::Data => header.data_length,
            TableId::L2Norm | TableId::Times | TableId::Power => total_vectors * 8,
        }
    }

    /// Absolute byte range of `count` elements starting at `index`,
    /// bounds-checked against capacity. Errors with `Capacity` when the
    /// range does not fit.
    pub fn element_range(&self, index: u64, count: u64) -> Result<(u64, usize)> {
        let start = index * self.element_size as u64;
        let len = count * self.element_size as u64;
        if start + len > self.capacity {
            return Err(Error::Capacity {
                table: self.id.name(),
                needed: len,
                available: self.capacity.saturating_sub(start),
            });
        }
        Ok((self.offset + start, len as usize))
    }

    /// Remaining capacity in bytes given the current usage
    pub fn remaining(&self, used: u64) -> u64 {
        self.capacity.saturating_sub(used)
    }
}

/// Compute a fresh header for `create`: every table starts at the next
/// page-aligned boundary, in the fixed order key table, track length table,
/// data region, l2-norm, times, power.
///
/// Returns the header and the total file length to preallocate.
pub fn create_layout(track_count_hint: u32, data_capacity: u64, dim: u32) -> (DbHeader, u64) {
    let max_tracks = track_count_hint as u64;
    let annotation_capacity = align_page_up(max_tracks * MEAN_VECTORS_PER_TRACK * 8);

    let key_table_offset = align_page_up(HEADER_SIZE as u64);
    let track_table_offset = key_table_offset + align_page_up(max_tracks * KEY_SLOT_SIZE as u64);
    let data_offset = track_table_offset + align_page_up(max_tracks * TRACK_ENTRY_SIZE as u64);
    let data_capacity = align_page_up(data_capacity);
    let l2norm_table_offset = data_offset + data_capacity;
    let times_table_offset = l2norm_table_offset + annotation_capacity;
    let power_table_offset = times_table_offset + annotation_capacity;
    let file_length = power_table_offset + annotation_capacity;

    let header = DbHeader {
        magic: MAGIC,
        version: FORMAT_VERSION,
        num_tracks: 0,
        dim,
        flags: 0,
        header_size: HEADER_SIZE as u32,
        data_length: 0,
        key_table_offset,
        track_table_offset,
        data_offset,
        l2norm_table_offset,
        times_table_offset,
        power_table_offset,
        data_capacity,
    };
    (header, file_length)
}
