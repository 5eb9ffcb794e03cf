//! The database handle: lifecycle, insertion, annotations, status.
//!
//! A `Database` owns the file descriptor, the parsed header, the advisory
//! lock, and the derived key/track indices. It is the single lifecycle
//! authority.
//! Mutations happen only on read-write handles, which hold the exclusive
//! lock for their whole lifetime; read handles hold the shared lock.
//!
//! Update ordering on insert: table bytes first, header last. A reader
//! process bounds every scan by the header counters, so it can only ever
//! observe a fully committed prior write.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, info, warn};

use audiodb_core::{
    Error, Match, Mode, QuerySpec, Result, Status, TrackDatum, DEFAULT_SEQUENCE_LENGTH,
    FLAG_L2NORM, FLAG_POWER, FLAG_TIMES,
};
use audiodb_storage::{
    layout, DbHeader, FileLock, Region, TableId, TableSpec, HEADER_SIZE, KEY_SLOT_SIZE,
};

use crate::index::{KeyIndex, TrackIndex};
use crate::query;

/// Parameters for [`Database::create`]
#[derive(Debug, Clone, Copy)]
pub struct CreateOptions {
    /// Data region capacity in bytes (rounded up to a page)
    pub data_capacity: u64,
    /// Maximum number of tracks; sizes the key and track length tables
    pub track_count_hint: u32,
    /// Vector dimension; 0 lets the first insert establish it
    pub dim: u32,
}

impl Default for CreateOptions {
    fn default() -> Self {
        // Historical defaults: 2GB data region, 20000 track slots.
        CreateOptions {
            data_capacity: 2_000_000_000,
            track_count_hint: 20_000,
            dim: 0,
        }
    }
}

/// An open audiodb database.
#[derive(Debug)]
pub struct Database {
    path: PathBuf,
    file: File,
    mode: Mode,
    header: DbHeader,
    keys: KeyIndex,
    tracks: TrackIndex,
    /// Held for the lifetime of the handle; released on drop
    _lock: FileLock,
}

impl Database {
    /// Create a new database file and return a read-write handle.
    ///
    /// Fails if the file already exists. The file is preallocated to the
    /// full layout size; unwritten regions read as zero.
    pub fn create(path: impl AsRef<Path>, opts: CreateOptions) -> Result<Database> {
        let path = path.as_ref().to_path_buf();
        if opts.track_count_hint == 0 {
            return Err(Error::InvalidOperation(
                "track count hint must be at least 1".into(),
            ));
        }
        if opts.data_capacity == 0 {
            return Err(Error::InvalidOperation(
                "data capacity must be nonzero".into(),
            ));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        let lock = FileLock::acquire(&file, true)?;

        let (header, file_length) = layout::create_layout(
            opts.track_count_hint,
            opts.data_capacity,
            opts.dim,
        );
        file.set_len(file_length)?;
        file.write_all_at(&header.to_bytes(), 0)?;

        info!(
            target: "adb::db",
            path = %path.display(),
            data_capacity = header.data_capacity,
            track_count_hint = opts.track_count_hint,
            dim = opts.dim,
            "created database"
        );

        Ok(Database {
            path,
            file,
            mode: Mode::ReadWrite,
            header,
            keys: KeyIndex::default(),
            tracks: TrackIndex::default(),
            _lock: lock,
        })
    }

    /// Open an existing database.
    ///
    /// Validates the header, acquires the lock for the requested mode
    /// (blocking until granted), and rebuilds the key and track indices
    /// from the mapped tables.
    pub fn open(path: impl AsRef<Path>, mode: Mode) -> Result<Database> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(mode == Mode::ReadWrite)
            .open(&path)?;
        let lock = FileLock::acquire(&file, mode == Mode::ReadWrite)?;

        let mut buf = [0u8; HEADER_SIZE];
        file.read_exact_at(&mut buf, 0)?;
        let header = DbHeader::from_bytes(&buf);
        header.validate().map_err(Error::Format)?;

        let keys = KeyIndex::load(&file, &header)?;
        let tracks = TrackIndex::load(&file, &header)?;

        // A writer killed between appending bytes and rewriting the header
        // leaves the two out of step. Accepted recovery gap: report, don't
        // repair.
        let indexed_bytes = tracks.total_vectors() * header.dim as u64 * 8;
        if indexed_bytes != header.data_length {
            warn!(
                target: "adb::db",
                path = %path.display(),
                header_length = header.data_length,
                indexed_length = indexed_bytes,
                "data length disagrees with track index; a writer may have died mid-append"
            );
        }

        info!(
            target: "adb::db",
            path = %path.display(),
            ?mode,
            num_tracks = header.num_tracks,
            dim = header.dim,
            "opened database"
        );

        Ok(Database {
            path,
            file,
            mode,
            header,
            keys,
            tracks,
            _lock: lock,
        })
    }

    /// Close the handle: unmaps are implicit (regions are operation-scoped),
    /// the lock releases, the file closes. Equivalent to dropping.
    pub fn close(self) {}

    /// Delete the backing file entirely. Requires a read-write handle (and
    /// therefore the exclusive lock).
    pub fn destroy(self) -> Result<()> {
        if self.mode != Mode::ReadWrite {
            return Err(Error::InvalidMode("destroy"));
        }
        let path = self.path.clone();
        drop(self);
        std::fs::remove_file(&path)?;
        info!(target: "adb::db", path = %path.display(), "destroyed database");
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open mode of this handle
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Fixed vector dimension (0 until the first insert)
    pub fn dim(&self) -> u32 {
        self.header.dim
    }

    /// Number of stored tracks
    pub fn num_tracks(&self) -> u32 {
        self.header.num_tracks
    }

    /// Ordered track keys
    pub fn keys(&self) -> &[String] {
        self.keys.keys()
    }

    pub(crate) fn header(&self) -> &DbHeader {
        &self.header
    }

    pub(crate) fn key_at(&self, row: u32) -> &str {
        self.keys.key_at(row)
    }

    pub(crate) fn track_length(&self, row: u32) -> u32 {
        self.tracks.length(row)
    }

    /// Diagnostic status record; not on the search hot path.
    pub fn status(&self) -> Status {
        let null_count = self.tracks.lengths().iter().filter(|&&l| l == 0).count() as u32;
        let dud_count = self
            .tracks
            .lengths()
            .iter()
            .filter(|&&l| l < DEFAULT_SEQUENCE_LENGTH)
            .count() as u32;
        Status {
            num_tracks: self.header.num_tracks,
            dim: self.header.dim,
            flags: self.header.flags,
            data_length: self.header.data_length,
            data_capacity: self.header.data_capacity,
            dud_count,
            null_count,
        }
    }

    // ========================================================================
    // Insertion
    // ========================================================================

    /// Insert one track. Append-only: grows every table at the next row,
    /// updates the header last, then refreshes the in-memory indices.
    ///
    /// The first insert into an empty database establishes the dimension if
    /// the database was created without one.
    pub fn insert(&mut self, datum: &TrackDatum) -> Result<()> {
        if self.mode != Mode::ReadWrite {
            return Err(Error::InvalidMode("insert"));
        }
        if datum.key.is_empty() || datum.key.len() >= KEY_SLOT_SIZE {
            return Err(Error::InvalidOperation(format!(
                "key must be 1..{} bytes, got {}",
                KEY_SLOT_SIZE,
                datum.key.len()
            )));
        }
        // Key slots are NUL-terminated; an interior NUL would truncate the
        // key on reopen.
        if datum.key.as_bytes().contains(&0) {
            return Err(Error::InvalidOperation(format!(
                "key {:?} contains a NUL byte",
                datum.key
            )));
        }
        datum.validate()?;
        // Established at commit time so a rejected first insert leaves the
        // header untouched.
        let dim = if self.header.dim == 0 && self.header.num_tracks == 0 {
            datum.dim
        } else if datum.dim != self.header.dim {
            return Err(Error::DimensionMismatch {
                expected: self.header.dim,
                got: datum.dim,
            });
        } else {
            self.header.dim
        };
        if self.keys.contains(&datum.key) {
            return Err(Error::DuplicateKey(datum.key.clone()));
        }

        let row = self.keys.len() as u64;
        let count = datum.vector_count() as u64;
        let first_vector = self.tracks.total_vectors();
        let data_bytes = count * dim as u64 * 8;

        // All capacity checks up front, so a rejected insert leaves every
        // table and the header untouched.
        let key_spec = self.table(TableId::Keys);
        key_spec.element_range(row, 1)?;
        let length_spec = self.table(TableId::TrackLengths);
        length_spec.element_range(row, 1)?;
        let data_spec = self.table(TableId::Data);
        let data_free = data_spec.remaining(self.header.data_length);
        if data_bytes > data_free {
            return Err(Error::Capacity {
                table: TableId::Data.name(),
                needed: data_bytes,
                available: data_free,
            });
        }
        let write_norms = self.header.has_flag(FLAG_L2NORM);
        let write_power = datum.power.is_some() || self.header.has_flag(FLAG_POWER);
        let write_times = datum.times.is_some() || self.header.has_flag(FLAG_TIMES);
        if count > 0 {
            if write_norms {
                self.table(TableId::L2Norm).element_range(first_vector, count)?;
            }
            if write_power {
                self.table(TableId::Power).element_range(first_vector, count)?;
            }
            if write_times {
                self.table(TableId::Times).element_range(first_vector, count)?;
            }
        }

        // Table appends. The header still records the old counters, so a
        // concurrent-process crash here loses only uncommitted bytes.
        if count > 0 {
            self.write_f64s(TableId::Data, self.header.data_length / 8, &datum.vectors)?;
            if write_norms {
                let norms = vector_norms(&datum.vectors, dim);
                self.write_f64s(TableId::L2Norm, first_vector, &norms)?;
            }
            if write_power {
                match &datum.power {
                    Some(power) => self.write_f64s(TableId::Power, first_vector, power)?,
                    None => self.write_f64s(TableId::Power, first_vector, &vec![0.0; count as usize])?,
                }
            }
            if write_times {
                match &datum.times {
                    Some(times) => self.write_f64s(TableId::Times, first_vector, times)?,
                    None => self.write_f64s(TableId::Times, first_vector, &vec![0.0; count as usize])?,
                }
            }
        }
        self.write_key_slot(row, &datum.key)?;
        self.write_track_length(row, datum.vector_count())?;

        // Commit: header counters move only after every append completed.
        if datum.power.is_some() && !self.header.has_flag(FLAG_POWER) {
            info!(target: "adb::db", "power annotations enabled by insert");
            self.header.set_flag(FLAG_POWER);
        }
        if datum.times.is_some() && !self.header.has_flag(FLAG_TIMES) {
            info!(target: "adb::db", "times annotations enabled by insert");
            self.header.set_flag(FLAG_TIMES);
        }
        self.header.dim = dim;
        self.header.num_tracks += 1;
        self.header.data_length += data_bytes;
        self.write_header()?;

        self.keys.push(datum.key.clone());
        self.tracks.push(datum.vector_count(), dim);

        debug!(
            target: "adb::db",
            key = %datum.key,
            vectors = count,
            bytes = data_bytes,
            "inserted track"
        );
        Ok(())
    }

    /// Insert many tracks under the one already-held exclusive lock.
    ///
    /// Not transactional: on failure the committed prefix stands, the header
    /// is the authoritative record of progress, and the error reports how
    /// many tracks went in.
    pub fn batch_insert(&mut self, data: &[TrackDatum]) -> Result<usize> {
        if self.mode != Mode::ReadWrite {
            return Err(Error::InvalidMode("batchinsert"));
        }
        for (committed, datum) in data.iter().enumerate() {
            if let Err(cause) = self.insert(datum) {
                return Err(Error::BatchAborted {
                    committed,
                    cause: Box::new(cause),
                });
            }
        }
        info!(target: "adb::db", tracks = data.len(), "batch insert complete");
        Ok(data.len())
    }

    // ========================================================================
    // Annotation subsystems
    // ========================================================================

    /// Populate the l2-norm table for every existing vector and set the
    /// flag; vectors inserted afterwards are normed incrementally.
    pub fn enable_l2_norm(&mut self) -> Result<()> {
        if self.mode != Mode::ReadWrite {
            return Err(Error::InvalidMode("l2norm"));
        }
        if self.header.has_flag(FLAG_L2NORM) {
            return Err(Error::InvalidOperation(
                "l2-norm is already enabled".into(),
            ));
        }
        for row in 0..self.header.num_tracks {
            if self.tracks.length(row) == 0 {
                continue;
            }
            let vectors = self.read_track_vectors(row)?;
            let norms = vector_norms(&vectors, self.header.dim);
            self.write_f64s(TableId::L2Norm, self.tracks.first_vector(row), &norms)?;
        }
        self.header.set_flag(FLAG_L2NORM);
        self.write_header()?;
        info!(
            target: "adb::db",
            vectors = self.tracks.total_vectors(),
            "l2-norm table populated"
        );
        Ok(())
    }

    /// Activate the power table. Rows inserted before activation read as
    /// zero; the preallocated file already satisfies the zero-fill.
    pub fn enable_power(&mut self) -> Result<()> {
        self.enable_annotation(FLAG_POWER, "power")
    }

    /// Activate the times table, with the same zero-fill semantics as power.
    pub fn enable_times(&mut self) -> Result<()> {
        self.enable_annotation(FLAG_TIMES, "times")
    }

    fn enable_annotation(&mut self, flag: u32, name: &str) -> Result<()> {
        if self.mode != Mode::ReadWrite {
            return Err(Error::InvalidMode("enable annotation"));
        }
        if self.header.has_flag(flag) {
            return Err(Error::InvalidOperation(format!(
                "{name} is already enabled"
            )));
        }
        self.header.set_flag(flag);
        self.write_header()?;
        info!(target: "adb::db", annotation = name, "annotation table enabled");
        Ok(())
    }

    // ========================================================================
    // Queries and iteration
    // ========================================================================

    /// Run a point, sequence, or track similarity query.
    pub fn query(&self, spec: &QuerySpec) -> Result<Vec<Match>> {
        query::run(self, spec)
    }

    /// Fetch one stored track with its annotations.
    pub fn track(&self, key: &str) -> Result<TrackDatum> {
        let row = self
            .keys
            .row(key)
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))?;
        self.read_track(row)
    }

    /// Iterate all stored tracks in row order; this is the table iteration
    /// that external dump formatting consumes.
    pub fn tracks(&self) -> Tracks<'_> {
        Tracks { db: self, row: 0 }
    }

    pub(crate) fn read_track(&self, row: u32) -> Result<TrackDatum> {
        let count = self.tracks.length(row) as u64;
        let first = self.tracks.first_vector(row);
        let vectors = self.read_track_vectors(row)?;
        let power = if self.header.has_flag(FLAG_POWER) {
            Some(self.read_f64s(TableId::Power, first, count)?)
        } else {
            None
        };
        let times = if self.header.has_flag(FLAG_TIMES) {
            Some(self.read_f64s(TableId::Times, first, count)?)
        } else {
            None
        };
        Ok(TrackDatum {
            key: self.keys.key_at(row).to_string(),
            dim: self.header.dim,
            vectors,
            power,
            times,
        })
    }

    /// All vectors of a row as doubles, copied out of the mapped data region.
    pub(crate) fn read_track_vectors(&self, row: u32) -> Result<Vec<f64>> {
        let count = self.tracks.length(row) as u64 * self.header.dim as u64;
        self.read_f64s(TableId::Data, self.tracks.byte_offset(row) / 8, count)
    }

    /// Precomputed norms of a row's vectors.
    pub(crate) fn read_track_norms(&self, row: u32) -> Result<Vec<f64>> {
        self.read_f64s(
            TableId::L2Norm,
            self.tracks.first_vector(row),
            self.tracks.length(row) as u64,
        )
    }

    /// Power annotations of a row's vectors.
    pub(crate) fn read_track_powers(&self, row: u32) -> Result<Vec<f64>> {
        self.read_f64s(
            TableId::Power,
            self.tracks.first_vector(row),
            self.tracks.length(row) as u64,
        )
    }

    /// Timestamp annotations of a row's vectors.
    pub(crate) fn read_track_times(&self, row: u32) -> Result<Vec<f64>> {
        self.read_f64s(
            TableId::Times,
            self.tracks.first_vector(row),
            self.tracks.length(row) as u64,
        )
    }

    // ========================================================================
    // Raw table access
    // ========================================================================

    fn table(&self, id: TableId) -> TableSpec {
        TableSpec::for_table(&self.header, id)
    }

    fn read_f64s(&self, id: TableId, index: u64, count: u64) -> Result<Vec<f64>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let (offset, len) = self.table(id).element_range(index, count)?;
        let region = Region::map_read(&self.file, offset, len)?;
        let mut out = vec![0f64; count as usize];
        LittleEndian::read_f64_into(region.bytes(), &mut out);
        Ok(out)
    }

    fn write_f64s(&self, id: TableId, index: u64, values: &[f64]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let (offset, len) = self.table(id).element_range(index, values.len() as u64)?;
        let mut region = Region::map_write(&self.file, offset, len)?;
        LittleEndian::write_f64_into(values, region.bytes_mut());
        region.flush()?;
        Ok(())
    }

    fn write_key_slot(&self, row: u64, key: &str) -> Result<()> {
        let (offset, len) = self.table(TableId::Keys).element_range(row, 1)?;
        let mut region = Region::map_write(&self.file, offset, len)?;
        let slot = region.bytes_mut();
        slot.fill(0);
        slot[..key.len()].copy_from_slice(key.as_bytes());
        region.flush()?;
        Ok(())
    }

    fn write_track_length(&self, row: u64, length: u32) -> Result<()> {
        let (offset, len) = self.table(TableId::TrackLengths).element_range(row, 1)?;
        let mut region = Region::map_write(&self.file, offset, len)?;
        region.bytes_mut().copy_from_slice(&length.to_le_bytes());
        region.flush()?;
        Ok(())
    }

    fn write_header(&self) -> Result<()> {
        self.file.write_all_at(&self.header.to_bytes(), 0)?;
        Ok(())
    }
}

/// Iterator over all stored tracks in row order.
pub struct Tracks<'a> {
    db: &'a Database,
    row: u32,
}

impl Iterator for Tracks<'_> {
    type Item = Result<TrackDatum>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.row >= self.db.num_tracks() {
            return None;
        }
        let item = self.db.read_track(self.row);
        self.row += 1;
        Some(item)
    }
}

/// Euclidean norm of each vector in a concatenated buffer.
fn vector_norms(vectors: &[f64], dim: u32) -> Vec<f64> {
    vectors
        .chunks_exact(dim as usize)
        .map(|v| v.iter().map(|x| x * x).sum::<f64>().sqrt())
        .collect()
}
