//! Database engine for audiodb
//!
//! This crate orchestrates the storage layer into a usable database:
//! - Database: the handle owning file, header, lock, and derived indices
//! - Key/track index construction from the mapped tables at open time
//! - Append-only insertion of tracks under the exclusive lock
//! - Annotation subsystems: l2-norm, power, times
//! - Point/sequence/track nearest-neighbor queries with bounded ranking
//!
//! The engine is single-threaded per handle; concurrency comes only from
//! multiple processes sharing the backing file under the advisory lock.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod database;
mod index;
mod query;

pub use database::{CreateOptions, Database, Tracks};
