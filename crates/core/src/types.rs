//! Shared data types: track data, open mode, status record, feature flags.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Header flag: the L2-norm table is populated and maintained on insert
pub const FLAG_L2NORM: u32 = 0x1;
/// Header flag: the power table is active
pub const FLAG_POWER: u32 = 0x4;
/// Header flag: the times table is active
pub const FLAG_TIMES: u32 = 0x20;

/// Default number of point/sequence nearest neighbors returned
pub const DEFAULT_POINT_NN: u32 = 10;
/// Default number of track nearest neighbors returned
pub const DEFAULT_TRACK_NN: u32 = 10;
/// Default sequence window length in vectors
pub const DEFAULT_SEQUENCE_LENGTH: u32 = 16;
/// Default sequence window hop in vectors
pub const DEFAULT_SEQUENCE_HOP: u32 = 1;
/// Default relative tolerance for the timestamp admissibility filter
pub const DEFAULT_TIMES_TOLERANCE: f64 = 0.1;

/// How a database handle is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Shared lock, read-only mappings; queries and status only
    Read,
    /// Exclusive lock, shared writable mappings; all operations
    ReadWrite,
}

/// One track: a named sequence of equal-dimension feature vectors, with
/// optional per-vector power and timestamp annotations.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackDatum {
    /// Track key; unique within a database, at most 255 bytes
    pub key: String,
    /// Vector dimension
    pub dim: u32,
    /// Concatenated vectors, `count * dim` doubles in row order
    pub vectors: Vec<f64>,
    /// Optional per-vector power scalars (`count` entries)
    pub power: Option<Vec<f64>>,
    /// Optional per-vector timestamps (`count` entries)
    pub times: Option<Vec<f64>>,
}

impl TrackDatum {
    /// Create a track from concatenated vector data.
    ///
    /// Fails with `DimensionMismatch` if the data length is not a multiple
    /// of `dim`, or `dim` is zero.
    pub fn new(key: impl Into<String>, dim: u32, vectors: Vec<f64>) -> Result<Self> {
        if dim == 0 {
            return Err(Error::DimensionMismatch { expected: 1, got: 0 });
        }
        if vectors.len() % dim as usize != 0 {
            return Err(Error::DimensionMismatch {
                expected: dim,
                got: (vectors.len() % dim as usize) as u32,
            });
        }
        Ok(TrackDatum {
            key: key.into(),
            dim,
            vectors,
            power: None,
            times: None,
        })
    }

    /// Attach per-vector power annotations.
    ///
    /// Fails with `DimensionMismatch` unless there is exactly one value per vector.
    pub fn with_power(mut self, power: Vec<f64>) -> Result<Self> {
        if power.len() != self.vector_count() as usize {
            return Err(Error::DimensionMismatch {
                expected: self.vector_count(),
                got: power.len() as u32,
            });
        }
        self.power = Some(power);
        Ok(self)
    }

    /// Attach per-vector timestamps.
    ///
    /// Fails with `DimensionMismatch` unless there is exactly one value per vector.
    pub fn with_times(mut self, times: Vec<f64>) -> Result<Self> {
        if times.len() != self.vector_count() as usize {
            return Err(Error::DimensionMismatch {
                expected: self.vector_count(),
                got: times.len() as u32,
            });
        }
        self.times = Some(times);
        Ok(self)
    }

    /// Re-check the datum's internal consistency: data length a multiple of
    /// the dimension, one annotation value per vector.
    ///
    /// The constructors enforce this, but the fields are public, so the
    /// storage and query boundaries validate again before trusting the
    /// lengths.
    pub fn validate(&self) -> Result<()> {
        if self.dim == 0 {
            return Err(Error::DimensionMismatch { expected: 1, got: 0 });
        }
        if self.vectors.len() % self.dim as usize != 0 {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                got: (self.vectors.len() % self.dim as usize) as u32,
            });
        }
        for annotation in [&self.power, &self.times].into_iter().flatten() {
            if annotation.len() != self.vector_count() as usize {
                return Err(Error::DimensionMismatch {
                    expected: self.vector_count(),
                    got: annotation.len() as u32,
                });
            }
        }
        Ok(())
    }

    /// Number of vectors in the track
    pub fn vector_count(&self) -> u32 {
        (self.vectors.len() / self.dim as usize) as u32
    }

    /// One vector as a slice
    pub fn vector(&self, index: u32) -> &[f64] {
        let dim = self.dim as usize;
        let start = index as usize * dim;
        &self.vectors[start..start + dim]
    }
}

/// Diagnostic snapshot of a database, reported by `status`.
///
/// Not on the search hot path; values come from the header and the derived
/// track index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Number of tracks stored
    pub num_tracks: u32,
    /// Fixed vector dimension (0 until the first insert)
    pub dim: u32,
    /// Feature flags (FLAG_L2NORM | FLAG_POWER | FLAG_TIMES)
    pub flags: u32,
    /// Bytes used in the data region (high-water mark)
    pub data_length: u64,
    /// Preallocated data region capacity in bytes
    pub data_capacity: u64,
    /// Tracks shorter than the default sequence length
    pub dud_count: u32,
    /// Tracks with zero vectors
    pub null_count: u32,
}

impl Status {
    /// Whether a feature flag is set
    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_datum_vector_count() {
        let d = TrackDatum::new("a", 3, vec![0.0; 12]).unwrap();
        assert_eq!(d.vector_count(), 4);
        assert_eq!(d.vector(2), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_track_datum_rejects_ragged_data() {
        let result = TrackDatum::new("a", 3, vec![0.0; 10]);
        assert!(matches!(result, Err(Error::DimensionMismatch { .. })));
    }

    #[test]
    fn test_track_datum_rejects_zero_dim() {
        let result = TrackDatum::new("a", 0, vec![]);
        assert!(matches!(result, Err(Error::DimensionMismatch { .. })));
    }

    #[test]
    fn test_validate_catches_field_tampering() {
        let good = TrackDatum::new("a", 2, vec![0.0; 8]).unwrap();
        assert!(good.validate().is_ok());

        // The public fields allow constructing states the checked
        // constructors would reject.
        let mut ragged = good.clone();
        ragged.vectors.push(1.0);
        assert!(matches!(
            ragged.validate(),
            Err(Error::DimensionMismatch { .. })
        ));

        let mut short_power = good.clone();
        short_power.power = Some(vec![-10.0]);
        assert!(matches!(
            short_power.validate(),
            Err(Error::DimensionMismatch { expected: 4, got: 1 })
        ));

        let mut long_times = good;
        long_times.times = Some(vec![0.0; 9]);
        assert!(matches!(
            long_times.validate(),
            Err(Error::DimensionMismatch { expected: 4, got: 9 })
        ));
    }

    #[test]
    fn test_with_power_length_checked() {
        let d = TrackDatum::new("a", 2, vec![0.0; 8]).unwrap();
        assert!(d.clone().with_power(vec![1.0; 4]).is_ok());
        assert!(matches!(
            d.with_power(vec![1.0; 3]),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_status_flags() {
        let status = Status {
            num_tracks: 1,
            dim: 4,
            flags: FLAG_L2NORM | FLAG_POWER,
            data_length: 64,
            data_capacity: 1024,
            dud_count: 1,
            null_count: 0,
        };
        assert!(status.has_flag(FLAG_L2NORM));
        assert!(status.has_flag(FLAG_POWER));
        assert!(!status.has_flag(FLAG_TIMES));
    }
}
