//! Query specification and result types.
//!
//! A `QuerySpec` is consumed by the engine as-is; the fields mirror what the
//! external CLI/transport layers collect and are never reinterpreted here.

use serde::{Deserialize, Serialize};

use crate::types::{
    TrackDatum, DEFAULT_POINT_NN, DEFAULT_SEQUENCE_HOP, DEFAULT_SEQUENCE_LENGTH,
    DEFAULT_TIMES_TOLERANCE, DEFAULT_TRACK_NN,
};

/// Search granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryType {
    /// Nearest neighbors over individual vectors
    Point,
    /// Nearest neighbors over fixed-length, hopped windows of consecutive vectors
    Sequence,
    /// Nearest neighbors treating the entire query track as one window
    Track,
}

/// Where the query content comes from
#[derive(Debug, Clone)]
pub enum QuerySource {
    /// An in-memory track supplied by the caller
    Datum(TrackDatum),
    /// A track already stored in the database, addressed by key
    Key(String),
}

/// Restriction of the candidate set by key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum KeyFilter {
    /// All tracks are candidates
    #[default]
    None,
    /// Only the listed keys are candidates
    Include(Vec<String>),
    /// All tracks except the listed keys are candidates
    Exclude(Vec<String>),
}

impl KeyFilter {
    /// Whether a candidate key passes this filter
    pub fn admits(&self, key: &str) -> bool {
        match self {
            KeyFilter::None => true,
            KeyFilter::Include(keys) => keys.iter().any(|k| k == key),
            KeyFilter::Exclude(keys) => !keys.iter().any(|k| k == key),
        }
    }
}

/// Full specification of one query.
///
/// Built with the `point`/`sequence`/`track` constructors and refined with
/// the builder-style setters; unset fields keep the historical defaults.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    /// Search granularity
    pub query_type: QueryType,
    /// Query content source
    pub source: QuerySource,
    /// Candidate key restriction
    pub key_filter: KeyFilter,
    /// Vector offset into the query source (start of the query window)
    pub offset: u32,
    /// Result bound for point and sequence queries
    pub point_nn: u32,
    /// Result bound for track queries
    pub track_nn: u32,
    /// Window length in vectors (sequence queries)
    pub sequence_length: u32,
    /// Window step in vectors (sequence queries)
    pub sequence_hop: u32,
    /// Point queries: normalize via the precomputed L2-norm table
    pub normalized: bool,
    /// Sequence/track queries: divide window distance by the window length
    pub average: bool,
    /// Distance cutoff; 0.0 disables the radius filter
    pub radius: f64,
    /// Absolute power admissibility threshold (both window powers must reach it)
    pub absolute_power_threshold: Option<f64>,
    /// Relative power admissibility threshold (|query - candidate| bound)
    pub relative_power_threshold: Option<f64>,
    /// Relative tolerance for the window-duration filter when times data exists
    pub times_tolerance: f64,
    /// Whether the timestamp filter is applied at all
    pub use_times: bool,
}

impl QuerySpec {
    fn with_type(query_type: QueryType, source: QuerySource) -> Self {
        QuerySpec {
            query_type,
            source,
            key_filter: KeyFilter::None,
            offset: 0,
            point_nn: DEFAULT_POINT_NN,
            track_nn: DEFAULT_TRACK_NN,
            sequence_length: DEFAULT_SEQUENCE_LENGTH,
            sequence_hop: DEFAULT_SEQUENCE_HOP,
            normalized: false,
            average: false,
            radius: 0.0,
            absolute_power_threshold: None,
            relative_power_threshold: None,
            times_tolerance: DEFAULT_TIMES_TOLERANCE,
            use_times: false,
        }
    }

    /// Point query over the given source
    pub fn point(source: QuerySource) -> Self {
        Self::with_type(QueryType::Point, source)
    }

    /// Sequence query over the given source
    pub fn sequence(source: QuerySource) -> Self {
        Self::with_type(QueryType::Sequence, source)
    }

    /// Track query over the given source
    pub fn track(source: QuerySource) -> Self {
        Self::with_type(QueryType::Track, source)
    }

    /// Restrict candidates by key
    pub fn key_filter(mut self, filter: KeyFilter) -> Self {
        self.key_filter = filter;
        self
    }

    /// Set the query window start within the source
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    /// Set the point/sequence result bound
    pub fn point_nn(mut self, n: u32) -> Self {
        self.point_nn = n;
        self
    }

    /// Set the track result bound
    pub fn track_nn(mut self, n: u32) -> Self {
        self.track_nn = n;
        self
    }

    /// Set the sequence window length
    pub fn sequence_length(mut self, len: u32) -> Self {
        self.sequence_length = len;
        self
    }

    /// Set the sequence window hop
    pub fn sequence_hop(mut self, hop: u32) -> Self {
        self.sequence_hop = hop;
        self
    }

    /// Enable normalized (cosine-like) point distance
    pub fn normalized(mut self, on: bool) -> Self {
        self.normalized = on;
        self
    }

    /// Average window distances by window length
    pub fn average(mut self, on: bool) -> Self {
        self.average = on;
        self
    }

    /// Enable the radius cutoff
    pub fn radius(mut self, radius: f64) -> Self {
        self.radius = radius;
        self
    }

    /// Enable the absolute power threshold
    pub fn absolute_power_threshold(mut self, threshold: f64) -> Self {
        self.absolute_power_threshold = Some(threshold);
        self
    }

    /// Enable the relative power threshold
    pub fn relative_power_threshold(mut self, threshold: f64) -> Self {
        self.relative_power_threshold = Some(threshold);
        self
    }

    /// Enable the timestamp filter with the given relative tolerance
    pub fn times_tolerance(mut self, tolerance: f64) -> Self {
        self.times_tolerance = tolerance;
        self.use_times = true;
        self
    }

    /// The result bound in effect for this query type
    pub fn result_bound(&self) -> u32 {
        match self.query_type {
            QueryType::Point | QueryType::Sequence => self.point_nn,
            QueryType::Track => self.track_nn,
        }
    }
}

/// One ranked search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    /// Key of the matched track
    pub key: String,
    /// Distance (ascending = better)
    pub distance: f64,
    /// Vector position of the query window within the query source
    pub query_pos: u32,
    /// Vector position of the matched window within the matched track
    pub match_pos: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datum() -> QuerySource {
        QuerySource::Datum(TrackDatum::new("q", 2, vec![0.0; 4]).unwrap())
    }

    #[test]
    fn test_defaults_match_historical_values() {
        let spec = QuerySpec::sequence(datum());
        assert_eq!(spec.point_nn, 10);
        assert_eq!(spec.track_nn, 10);
        assert_eq!(spec.sequence_length, 16);
        assert_eq!(spec.sequence_hop, 1);
        assert!(!spec.normalized);
        assert_eq!(spec.radius, 0.0);
        assert!(!spec.use_times);
    }

    #[test]
    fn test_result_bound_by_type() {
        let spec = QuerySpec::point(datum()).point_nn(3).track_nn(7);
        assert_eq!(spec.result_bound(), 3);
        let spec = QuerySpec::track(datum()).point_nn(3).track_nn(7);
        assert_eq!(spec.result_bound(), 7);
    }

    #[test]
    fn test_key_filter_admits() {
        let include = KeyFilter::Include(vec!["a".into(), "b".into()]);
        assert!(include.admits("a"));
        assert!(!include.admits("c"));

        let exclude = KeyFilter::Exclude(vec!["a".into()]);
        assert!(!exclude.admits("a"));
        assert!(exclude.admits("c"));

        assert!(KeyFilter::None.admits("anything"));
    }
}
