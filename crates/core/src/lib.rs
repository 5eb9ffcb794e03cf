//! Core types for audiodb
//!
//! This crate defines the vocabulary shared by the storage and engine layers:
//! - Error: the error taxonomy for every operation
//! - TrackDatum: one named sequence of fixed-dimension feature vectors
//! - Status: the diagnostic record reported by `status`
//! - QuerySpec / Match: query parameters and ranked results
//! - Feature flags: L2NORM, POWER, TIMES annotation markers
//!
//! No I/O happens here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod query;
pub mod types;

pub use error::{Error, FormatError, Result};
pub use query::{KeyFilter, Match, QuerySource, QuerySpec, QueryType};
pub use types::{
    Mode, Status, TrackDatum, DEFAULT_POINT_NN, DEFAULT_SEQUENCE_HOP, DEFAULT_SEQUENCE_LENGTH,
    DEFAULT_TIMES_TOLERANCE, DEFAULT_TRACK_NN, FLAG_L2NORM, FLAG_POWER, FLAG_TIMES,
};
