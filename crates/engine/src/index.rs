//! In-memory indices derived from the on-disk tables.
//!
//! Both indices are rebuilt from scratch on every open and never persisted.
//! Row *i* of the key index and row *i* of the track index describe the same
//! track; every data-region lookup relies on that alignment.

use std::fs::File;

use rustc_hash::FxHashMap;

use audiodb_core::Result;
use audiodb_storage::{DbHeader, Region, TableId, TableSpec, KEY_SLOT_SIZE};

/// Ordered key sequence plus key -> row lookup.
#[derive(Debug, Default)]
pub(crate) struct KeyIndex {
    keys: Vec<String>,
    rows: FxHashMap<String, u32>,
}

impl KeyIndex {
    /// Build from the key table: map it page-aligned, walk the fixed-width
    /// slots in row order, unmap (the region drops at return).
    pub(crate) fn load(file: &File, header: &DbHeader) -> Result<KeyIndex> {
        let mut index = KeyIndex::default();
        if header.num_tracks == 0 {
            return Ok(index);
        }
        let spec = TableSpec::for_table(header, TableId::Keys);
        let (offset, len) = spec.element_range(0, header.num_tracks as u64)?;
        let region = Region::map_read(file, offset, len)?;
        let bytes = region.bytes();
        for row in 0..header.num_tracks as usize {
            let slot = &bytes[row * KEY_SLOT_SIZE..(row + 1) * KEY_SLOT_SIZE];
            let end = slot.iter().position(|&b| b == 0).unwrap_or(KEY_SLOT_SIZE);
            let key = String::from_utf8_lossy(&slot[..end]).into_owned();
            index.push(key);
        }
        Ok(index)
    }

    /// Append a key at the next row
    pub(crate) fn push(&mut self, key: String) {
        self.rows.insert(key.clone(), self.keys.len() as u32);
        self.keys.push(key);
    }

    /// Row of a key, if present
    pub(crate) fn row(&self, key: &str) -> Option<u32> {
        self.rows.get(key).copied()
    }

    /// Whether the key exists
    pub(crate) fn contains(&self, key: &str) -> bool {
        self.rows.contains_key(key)
    }

    /// Key at a row
    pub(crate) fn key_at(&self, row: u32) -> &str {
        &self.keys[row as usize]
    }

    /// Ordered key sequence
    pub(crate) fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Number of keys
    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }
}

/// Per-row vector counts and cumulative data-region positions.
#[derive(Debug, Default)]
pub(crate) struct TrackIndex {
    lengths: Vec<u32>,
    /// Byte offset of each track within the data region (prefix sum of
    /// `length * dim * 8`)
    byte_offsets: Vec<u64>,
    /// Global index of each track's first vector (prefix sum of lengths);
    /// row position in the per-vector annotation tables
    first_vectors: Vec<u64>,
    total_vectors: u64,
}

impl TrackIndex {
    /// Build from the track length table, accumulating byte offsets as the
    /// original scan does.
    pub(crate) fn load(file: &File, header: &DbHeader) -> Result<TrackIndex> {
        let mut index = TrackIndex::default();
        if header.num_tracks == 0 {
            return Ok(index);
        }
        let spec = TableSpec::for_table(header, TableId::TrackLengths);
        let (offset, len) = spec.element_range(0, header.num_tracks as u64)?;
        let region = Region::map_read(file, offset, len)?;
        let bytes = region.bytes();
        for row in 0..header.num_tracks as usize {
            let entry = u32::from_le_bytes(bytes[row * 4..row * 4 + 4].try_into().unwrap());
            index.push(entry, header.dim);
        }
        Ok(index)
    }

    /// Append a track of `length` vectors
    pub(crate) fn push(&mut self, length: u32, dim: u32) {
        self.byte_offsets
            .push(self.total_vectors * dim as u64 * 8);
        self.first_vectors.push(self.total_vectors);
        self.lengths.push(length);
        self.total_vectors += length as u64;
    }

    /// Vector count of a row
    pub(crate) fn length(&self, row: u32) -> u32 {
        self.lengths[row as usize]
    }

    /// Data-region byte offset of a row
    pub(crate) fn byte_offset(&self, row: u32) -> u64 {
        self.byte_offsets[row as usize]
    }

    /// Global index of a row's first vector
    pub(crate) fn first_vector(&self, row: u32) -> u64 {
        self.first_vectors[row as usize]
    }

    /// Total vectors across all rows
    pub(crate) fn total_vectors(&self) -> u64 {
        self.total_vectors
    }

    /// All vector counts in row order
    pub(crate) fn lengths(&self) -> &[u32] {
        &self.lengths
    }
}
