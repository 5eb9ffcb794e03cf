//! Page-granular memory-mapped regions.
//!
//! `mmap` accepts only page-aligned file offsets, so a region maps the
//! surrounding page-aligned range and exposes exactly the bytes the caller
//! asked for. Regions are operation-scoped: map, use, drop. Nothing caches a
//! mapping across operations, so a reader never holds a stale view across a
//! structural change made by another process.

use std::fs::File;
use std::io;

use memmap2::{Mmap, MmapMut, MmapOptions};
use tracing::trace;

use crate::layout::align_page_down;

#[derive(Debug)]
enum MapInner {
    Read(Mmap),
    Write(MmapMut),
}

/// One mapped byte range of the database file.
///
/// Read regions come from read-only mappings; write regions come from shared
/// writable mappings, so stores are visible to other processes mapping the
/// same file. Mapping failures are surfaced immediately and never retried:
/// they indicate storage-layer failure.
#[derive(Debug)]
pub struct Region {
    map: MapInner,
    /// Interior padding between the page-aligned map start and the
    /// requested offset
    pad: usize,
    /// Requested (logical) length
    len: usize,
}

impl Region {
    /// Map `len` bytes at `offset` read-only.
    ///
    /// `len` must be nonzero: a zero-length table is never mapped, and
    /// asking for one is a caller bug surfaced as `InvalidInput`.
    pub fn map_read(file: &File, offset: u64, len: usize) -> io::Result<Region> {
        let (aligned, pad, map_len) = Self::page_extent(offset, len)?;
        // SAFETY: the mapping is read-only and parsed into owned values
        // before use; no references outlive the Region.
        let map = unsafe { MmapOptions::new().offset(aligned).len(map_len).map(file)? };
        trace!(
            target: "adb::storage",
            offset,
            len,
            mapped = map_len,
            "mapped read region"
        );
        Ok(Region {
            map: MapInner::Read(map),
            pad,
            len,
        })
    }

    /// Map `len` bytes at `offset` as a shared writable mapping.
    pub fn map_write(file: &File, offset: u64, len: usize) -> io::Result<Region> {
        let (aligned, pad, map_len) = Self::page_extent(offset, len)?;
        // SAFETY: shared writable mapping of a file we hold the exclusive
        // advisory lock on; no aliasing references are handed out.
        let map = unsafe {
            MmapOptions::new()
                .offset(aligned)
                .len(map_len)
                .map_mut(file)?
        };
        trace!(
            target: "adb::storage",
            offset,
            len,
            mapped = map_len,
            "mapped write region"
        );
        Ok(Region {
            map: MapInner::Write(map),
            pad,
            len,
        })
    }

    fn page_extent(offset: u64, len: usize) -> io::Result<(u64, usize, usize)> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "refusing to map a zero-length region",
            ));
        }
        let aligned = align_page_down(offset);
        let pad = (offset - aligned) as usize;
        Ok((aligned, pad, pad + len))
    }

    /// The requested bytes
    pub fn bytes(&self) -> &[u8] {
        let all: &[u8] = match &self.map {
            MapInner::Read(m) => m,
            MapInner::Write(m) => m,
        };
        &all[self.pad..self.pad + self.len]
    }

    /// The requested bytes, mutable. Panics if the region was mapped
    /// read-only; write regions are only created on write handles.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        match &mut self.map {
            MapInner::Read(_) => unreachable!("bytes_mut on read-only region"),
            MapInner::Write(m) => &mut m[self.pad..self.pad + self.len],
        }
    }

    /// Flush a writable region to the backing file
    pub fn flush(&self) -> io::Result<()> {
        match &self.map {
            MapInner::Read(_) => Ok(()),
            MapInner::Write(m) => m.flush(),
        }
    }

    /// Logical length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the region is empty (never true for a mapped region)
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
