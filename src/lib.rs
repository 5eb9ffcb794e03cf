//! audiodb: an embedded database for audio feature-vector sequences.
//!
//! Tracks are named sequences of fixed-dimension `f64` feature vectors,
//! optionally annotated with per-vector power and timestamps. Storage is a
//! single preallocated, memory-mapped file shared between processes under
//! advisory file locks; insertion is append-only. Queries find nearest
//! neighbors at three granularities: individual vectors (point), hopped
//! fixed-length windows (sequence), or whole tracks (track).
//!
//! ```no_run
//! use audiodb::{CreateOptions, Database, QuerySource, QuerySpec, TrackDatum};
//!
//! # fn main() -> audiodb::Result<()> {
//! let mut db = Database::create("features.adb", CreateOptions::default())?;
//! db.insert(&TrackDatum::new("intro", 2, vec![0.1, 0.2, 0.3, 0.4])?)?;
//!
//! let query = TrackDatum::new("q", 2, vec![0.1, 0.2])?;
//! let matches = db.query(&QuerySpec::point(QuerySource::Datum(query)))?;
//! for m in matches {
//!     println!("{} @ {} -> {}", m.key, m.match_pos, m.distance);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use audiodb_core::{
    Error, FormatError, KeyFilter, Match, Mode, QuerySource, QuerySpec, QueryType, Result,
    Status, TrackDatum, DEFAULT_POINT_NN, DEFAULT_SEQUENCE_HOP, DEFAULT_SEQUENCE_LENGTH,
    DEFAULT_TIMES_TOLERANCE, DEFAULT_TRACK_NN, FLAG_L2NORM, FLAG_POWER, FLAG_TIMES,
};
pub use audiodb_engine::{CreateOptions, Database, Tracks};
