//! Storage layer for audiodb
//!
//! This crate owns everything that touches bytes on disk:
//! - DbHeader: the fixed 88-byte header, with strict open-time validation
//! - Table layout: page-aligned offsets and bounds-checked table descriptors
//! - Region: page-granular read-only and shared-writable memory mappings
//! - FileLock: blocking cross-process advisory locks with RAII release
//!
//! All multi-byte fields are little-endian. On-disk records are parsed into
//! owned structs; mapped bytes are never aliased by live struct pointers.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod header;
pub mod layout;
pub mod lock;
pub mod region;

pub use header::{DbHeader, FORMAT_VERSION, HEADER_SIZE, LEGACY_MAGIC, MAGIC};
pub use layout::{
    align_page_down, align_page_up, page_size, TableId, TableSpec, KEY_SLOT_SIZE,
    MEAN_VECTORS_PER_TRACK, TRACK_ENTRY_SIZE,
};
pub use lock::FileLock;
pub use region::Region;
