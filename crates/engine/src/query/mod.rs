//! Point, sequence, and track nearest-neighbor queries.
//!
//! One pipeline serves all three granularities: resolve the query window,
//! scan candidate rows in key order through the admissibility filters, rank
//! the survivors in a bounded ascending-distance collection. Filters apply
//! in a fixed order: power threshold, times tolerance, radius cutoff.

mod distance;
mod ranker;

use tracing::debug;

use audiodb_core::{
    Error, Match, QuerySource, QuerySpec, QueryType, Result, TrackDatum, FLAG_L2NORM,
    FLAG_POWER, FLAG_TIMES,
};

use crate::database::Database;
use ranker::Ranker;

pub(crate) fn run(db: &Database, spec: &QuerySpec) -> Result<Vec<Match>> {
    let query = resolve_source(db, spec)?;
    let dim = db.dim() as usize;
    let qcount = query.vector_count();

    let (start, len) = match spec.query_type {
        QueryType::Point => (spec.offset, 1),
        QueryType::Sequence => (spec.offset, spec.sequence_length),
        QueryType::Track => (0, qcount),
    };
    if len == 0 {
        return Err(Error::InvalidOperation("query window is empty".into()));
    }
    if start as u64 + len as u64 > qcount as u64 {
        return Err(Error::InvalidOperation(format!(
            "query window [{start}, {}) exceeds query length {qcount}",
            start as u64 + len as u64
        )));
    }
    let hop = match spec.query_type {
        QueryType::Point => 1,
        QueryType::Sequence => {
            if spec.sequence_hop == 0 {
                return Err(Error::InvalidOperation("sequence hop must be nonzero".into()));
            }
            spec.sequence_hop
        }
        // A track query probes exactly one candidate position.
        QueryType::Track => u32::MAX,
    };

    if spec.normalized {
        if spec.query_type != QueryType::Point {
            return Err(Error::InvalidOperation(
                "normalized distance applies to point queries only".into(),
            ));
        }
        if !db.header().has_flag(FLAG_L2NORM) {
            return Err(Error::InvalidOperation(
                "normalized distance requires the l2-norm table".into(),
            ));
        }
    }
    let use_power =
        spec.absolute_power_threshold.is_some() || spec.relative_power_threshold.is_some();
    if use_power && (!db.header().has_flag(FLAG_POWER) || query.power.is_none()) {
        return Err(Error::InvalidOperation(
            "power threshold requires power data on both query and database".into(),
        ));
    }
    if spec.use_times && (!db.header().has_flag(FLAG_TIMES) || query.times.is_none()) {
        return Err(Error::InvalidOperation(
            "times tolerance requires timestamps on both query and database".into(),
        ));
    }

    let qwin = &query.vectors[start as usize * dim..(start + len) as usize * dim];
    let query_norm = distance::dot(qwin, qwin).sqrt();
    let query_power = query
        .power
        .as_ref()
        .map(|p| window_mean(p, start as usize, len as usize));
    let query_duration = query
        .times
        .as_ref()
        .map(|t| window_duration(t, start as usize, len as usize));

    let mut ranker = Ranker::new(spec.result_bound() as usize);
    let mut scanned = 0u32;
    for row in 0..db.num_tracks() {
        let key = db.key_at(row);
        if !spec.key_filter.admits(key) {
            continue;
        }
        let clen = db.track_length(row);
        if clen < len {
            continue;
        }
        scanned += 1;

        let cvecs = db.read_track_vectors(row)?;
        let cnorms = if spec.normalized {
            Some(db.read_track_norms(row)?)
        } else {
            None
        };
        let cpowers = if use_power {
            Some(db.read_track_powers(row)?)
        } else {
            None
        };
        let ctimes = if spec.use_times {
            Some(db.read_track_times(row)?)
        } else {
            None
        };

        let mut ipos = 0u32;
        while ipos as u64 + len as u64 <= clen as u64 {
            if let Some(q_power) = query_power {
                let c_power = window_mean(
                    cpowers.as_ref().unwrap(),
                    ipos as usize,
                    len as usize,
                );
                if !power_admissible(spec, q_power, c_power) {
                    ipos = ipos.saturating_add(hop);
                    continue;
                }
            }
            if let Some(q_duration) = query_duration {
                let c_duration = window_duration(
                    ctimes.as_ref().unwrap(),
                    ipos as usize,
                    len as usize,
                );
                if !times_admissible(spec.times_tolerance, q_duration, c_duration) {
                    ipos = ipos.saturating_add(hop);
                    continue;
                }
            }

            let cwin = &cvecs[ipos as usize * dim..(ipos + len) as usize * dim];
            let d = match spec.query_type {
                QueryType::Point if spec.normalized => distance::normalized_point(
                    distance::dot(qwin, cwin),
                    query_norm,
                    cnorms.as_ref().unwrap()[ipos as usize],
                ),
                QueryType::Point => distance::euclidean(qwin, cwin),
                QueryType::Sequence | QueryType::Track => {
                    distance::window(qwin, cwin, len, spec.average)
                }
            };
            if spec.radius > 0.0 && d > spec.radius {
                ipos = ipos.saturating_add(hop);
                continue;
            }
            ranker.offer(Match {
                key: key.to_string(),
                distance: d,
                query_pos: start,
                match_pos: ipos,
            });
            ipos = ipos.saturating_add(hop);
        }
    }

    let results = ranker.into_sorted();
    debug!(
        target: "adb::query",
        query_type = ?spec.query_type,
        candidates = scanned,
        results = results.len(),
        "query complete"
    );
    Ok(results)
}

fn resolve_source(db: &Database, spec: &QuerySpec) -> Result<TrackDatum> {
    match &spec.source {
        QuerySource::Datum(datum) => {
            datum.validate()?;
            // A database that has never seen an insert has no dimension to
            // disagree with; the scan over zero rows returns no matches.
            if db.dim() != 0 && datum.dim != db.dim() {
                return Err(Error::DimensionMismatch {
                    expected: db.dim(),
                    got: datum.dim,
                });
            }
            Ok(datum.clone())
        }
        QuerySource::Key(key) => db.track(key),
    }
}

fn window_mean(values: &[f64], start: usize, len: usize) -> f64 {
    values[start..start + len].iter().sum::<f64>() / len as f64
}

/// Elapsed time across a window; zero for single-vector windows.
fn window_duration(times: &[f64], start: usize, len: usize) -> f64 {
    times[start + len - 1] - times[start]
}

fn power_admissible(spec: &QuerySpec, query_power: f64, candidate_power: f64) -> bool {
    if let Some(t) = spec.absolute_power_threshold {
        if query_power < t || candidate_power < t {
            return false;
        }
    }
    if let Some(t) = spec.relative_power_threshold {
        if (query_power - candidate_power).abs() > t {
            return false;
        }
    }
    true
}

/// Relative window-duration comparison; falls back to an absolute
/// comparison when the query window has no extent.
fn times_admissible(tolerance: f64, query_duration: f64, candidate_duration: f64) -> bool {
    if query_duration > 0.0 {
        (query_duration - candidate_duration).abs() / query_duration <= tolerance
    } else {
        (query_duration - candidate_duration).abs() <= tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{CreateOptions, Database};
    use audiodb_core::KeyFilter;
    use tempfile::TempDir;

    fn opts(dim: u32) -> CreateOptions {
        CreateOptions {
            data_capacity: 1 << 16,
            track_count_hint: 16,
            dim,
        }
    }

    fn datum(key: &str, dim: u32, vectors: Vec<f64>) -> TrackDatum {
        TrackDatum::new(key, dim, vectors).unwrap()
    }

    /// Two dim-2 tracks: "near" hugs the origin, "far" sits out at x=10.
    fn two_track_db(dir: &TempDir) -> Database {
        let path = dir.path().join("q.adb");
        let mut db = Database::create(&path, opts(2)).unwrap();
        db.insert(&datum("near", 2, vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0]))
            .unwrap();
        db.insert(&datum("far", 2, vec![10.0, 0.0, 11.0, 0.0])).unwrap();
        db
    }

    #[test]
    fn test_point_query_ranks_by_euclidean_distance() {
        let dir = TempDir::new().unwrap();
        let db = two_track_db(&dir);
        let spec = QuerySpec::point(QuerySource::Datum(datum("q", 2, vec![0.1, 0.0])));
        let results = db.query(&spec).unwrap();
        assert_eq!(results.len(), 5);
        assert_eq!(results[0].key, "near");
        assert_eq!(results[0].match_pos, 0);
        assert!((results[0].distance - 0.1).abs() < 1e-12);
        assert_eq!(results.last().unwrap().key, "far");
    }

    #[test]
    fn test_point_nn_bounds_results() {
        let dir = TempDir::new().unwrap();
        let db = two_track_db(&dir);
        let spec = QuerySpec::point(QuerySource::Datum(datum("q", 2, vec![0.0, 0.0])))
            .point_nn(2);
        let results = db.query(&spec).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].distance <= results[1].distance);
    }

    #[test]
    fn test_self_query_by_key_is_exact() {
        let dir = TempDir::new().unwrap();
        let db = two_track_db(&dir);
        let spec = QuerySpec::sequence(QuerySource::Key("near".into())).sequence_length(3);
        let results = db.query(&spec).unwrap();
        // Only "near" has 3 vectors; self-match at distance 0.
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key, "near");
        assert_eq!(results[0].distance, 0.0);
        assert_eq!(results[0].match_pos, 0);
    }

    #[test]
    fn test_sequence_query_skips_short_candidates() {
        let dir = TempDir::new().unwrap();
        let db = two_track_db(&dir);
        // Window of 3 excludes "far" (2 vectors).
        let spec = QuerySpec::sequence(QuerySource::Datum(datum(
            "q",
            2,
            vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
        )))
        .sequence_length(3);
        let results = db.query(&spec).unwrap();
        assert!(results.iter().all(|m| m.key == "near"));
    }

    #[test]
    fn test_sequence_windows_slide_by_hop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hop.adb");
        let mut db = Database::create(&path, opts(1)).unwrap();
        db.insert(&datum("t", 1, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]))
            .unwrap();

        let spec = QuerySpec::sequence(QuerySource::Datum(datum("q", 1, vec![0.0, 1.0])))
            .sequence_length(2);
        let results = db.query(&spec).unwrap();
        // Positions 0..=4, best at 0.
        assert_eq!(results.len(), 5);
        assert_eq!(results[0].match_pos, 0);
        assert_eq!(results[0].distance, 0.0);

        let spec = QuerySpec::sequence(QuerySource::Datum(datum("q", 1, vec![0.0, 1.0])))
            .sequence_length(2)
            .sequence_hop(2);
        let hopped = db.query(&spec).unwrap();
        assert_eq!(hopped.len(), 3);
        assert!(hopped.iter().all(|m| m.match_pos % 2 == 0));
    }

    #[test]
    fn test_track_query_uses_full_query_window() {
        let dir = TempDir::new().unwrap();
        let db = two_track_db(&dir);
        let spec = QuerySpec::track(QuerySource::Datum(datum("q", 2, vec![10.0, 0.0, 11.0, 0.0])));
        let results = db.query(&spec).unwrap();
        // Both tracks have >= 2 vectors; one candidate window each, at 0.
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].key, "far");
        assert_eq!(results[0].distance, 0.0);
        assert!(results.iter().all(|m| m.match_pos == 0));
    }

    #[test]
    fn test_average_divides_by_window_length() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("avg.adb");
        let mut db = Database::create(&path, opts(1)).unwrap();
        db.insert(&datum("t", 1, vec![1.0, 1.0, 1.0, 1.0])).unwrap();

        let q = QuerySource::Datum(datum("q", 1, vec![0.0, 0.0, 0.0, 0.0]));
        let plain = db
            .query(&QuerySpec::track(q.clone()))
            .unwrap();
        let averaged = db
            .query(&QuerySpec::track(q).average(true))
            .unwrap();
        assert_eq!(plain[0].distance, 2.0);
        assert_eq!(averaged[0].distance, 0.5);
    }

    #[test]
    fn test_key_filter_include_exclude() {
        let dir = TempDir::new().unwrap();
        let db = two_track_db(&dir);
        let q = QuerySource::Datum(datum("q", 2, vec![0.0, 0.0]));

        let spec = QuerySpec::point(q.clone())
            .key_filter(KeyFilter::Include(vec!["far".into()]));
        assert!(db.query(&spec).unwrap().iter().all(|m| m.key == "far"));

        let spec = QuerySpec::point(q).key_filter(KeyFilter::Exclude(vec!["far".into()]));
        assert!(db.query(&spec).unwrap().iter().all(|m| m.key == "near"));
    }

    #[test]
    fn test_radius_cutoff() {
        let dir = TempDir::new().unwrap();
        let db = two_track_db(&dir);
        let spec = QuerySpec::point(QuerySource::Datum(datum("q", 2, vec![0.0, 0.0])))
            .radius(2.0);
        let results = db.query(&spec).unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|m| m.distance <= 2.0));
        assert!(results.iter().all(|m| m.key == "near"));
    }

    #[test]
    fn test_normalized_requires_norm_table() {
        let dir = TempDir::new().unwrap();
        let db = two_track_db(&dir);
        let spec = QuerySpec::point(QuerySource::Datum(datum("q", 2, vec![1.0, 0.0])))
            .normalized(true);
        let err = db.query(&spec).unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }

    #[test]
    fn test_normalized_point_ignores_magnitude() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("norm.adb");
        let mut db = Database::create(&path, opts(2)).unwrap();
        db.insert(&datum("x", 2, vec![5.0, 0.0])).unwrap();
        db.insert(&datum("y", 2, vec![0.0, 3.0])).unwrap();
        db.enable_l2_norm().unwrap();

        let spec = QuerySpec::point(QuerySource::Datum(datum("q", 2, vec![0.5, 0.0])))
            .normalized(true);
        let results = db.query(&spec).unwrap();
        assert_eq!(results[0].key, "x");
        assert_eq!(results[0].distance, 0.0);
        assert!((results[1].distance - f64::sqrt(2.0)).abs() < 1e-12);
    }

    #[test]
    fn test_zero_vector_dropped_from_normalized_ranking() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("zero.adb");
        let mut db = Database::create(&path, opts(2)).unwrap();
        db.insert(&datum("zero", 2, vec![0.0, 0.0])).unwrap();
        db.insert(&datum("unit", 2, vec![1.0, 0.0])).unwrap();
        db.enable_l2_norm().unwrap();

        let spec = QuerySpec::point(QuerySource::Datum(datum("q", 2, vec![1.0, 0.0])))
            .normalized(true);
        let results = db.query(&spec).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key, "unit");
    }

    #[test]
    fn test_power_threshold_filters_windows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("power.adb");
        let mut db = Database::create(&path, opts(1)).unwrap();
        let quiet = datum("quiet", 1, vec![0.0, 0.0])
            .with_power(vec![-60.0, -60.0])
            .unwrap();
        let loud = datum("loud", 1, vec![0.0, 0.0])
            .with_power(vec![-10.0, -10.0])
            .unwrap();
        db.insert(&quiet).unwrap();
        db.insert(&loud).unwrap();

        let q = datum("q", 1, vec![0.0]).with_power(vec![-12.0]).unwrap();
        let spec = QuerySpec::point(QuerySource::Datum(q.clone()))
            .absolute_power_threshold(-30.0);
        let results = db.query(&spec).unwrap();
        assert!(results.iter().all(|m| m.key == "loud"));

        let spec = QuerySpec::point(QuerySource::Datum(q)).relative_power_threshold(5.0);
        let results = db.query(&spec).unwrap();
        assert!(results.iter().all(|m| m.key == "loud"));
    }

    #[test]
    fn test_power_threshold_without_power_data_errors() {
        let dir = TempDir::new().unwrap();
        let db = two_track_db(&dir);
        let spec = QuerySpec::point(QuerySource::Datum(datum("q", 2, vec![0.0, 0.0])))
            .absolute_power_threshold(-30.0);
        let err = db.query(&spec).unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }

    #[test]
    fn test_times_tolerance_filters_windows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("times.adb");
        let mut db = Database::create(&path, opts(1)).unwrap();
        // Same content, very different frame rates.
        let steady = datum("steady", 1, vec![0.0, 0.0, 0.0])
            .with_times(vec![0.0, 1.0, 2.0])
            .unwrap();
        let rushed = datum("rushed", 1, vec![0.0, 0.0, 0.0])
            .with_times(vec![0.0, 0.1, 0.2])
            .unwrap();
        db.insert(&steady).unwrap();
        db.insert(&rushed).unwrap();

        let q = datum("q", 1, vec![0.0, 0.0])
            .with_times(vec![0.0, 1.0])
            .unwrap();
        let spec = QuerySpec::sequence(QuerySource::Datum(q))
            .sequence_length(2)
            .times_tolerance(0.1);
        let results = db.query(&spec).unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|m| m.key == "steady"));
    }

    #[test]
    fn test_tampered_query_power_length_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tamper.adb");
        let mut db = Database::create(&path, opts(1)).unwrap();
        db.insert(
            &datum("t", 1, vec![0.0, 0.0])
                .with_power(vec![-10.0, -10.0])
                .unwrap(),
        )
        .unwrap();

        // One power value for a two-vector window, written through the
        // public field; the window mean would index past the end.
        let mut q = datum("q", 1, vec![0.0, 0.0]);
        q.power = Some(vec![-10.0]);
        let spec = QuerySpec::sequence(QuerySource::Datum(q))
            .sequence_length(2)
            .absolute_power_threshold(-30.0);
        let err = db.query(&spec).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 2, got: 1 }));
    }

    #[test]
    fn test_query_on_empty_database_returns_no_matches() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.adb");
        let db = Database::create(&path, opts(0)).unwrap();

        // No insert has established a dimension yet.
        let spec = QuerySpec::point(QuerySource::Datum(datum("q", 3, vec![0.0; 3])));
        assert!(db.query(&spec).unwrap().is_empty());

        // By-key queries still report the missing key.
        let spec = QuerySpec::point(QuerySource::Key("missing".into()));
        assert!(matches!(db.query(&spec).unwrap_err(), Error::KeyNotFound(_)));
    }

    #[test]
    fn test_query_window_out_of_range() {
        let dir = TempDir::new().unwrap();
        let db = two_track_db(&dir);
        let spec = QuerySpec::point(QuerySource::Datum(datum("q", 2, vec![0.0, 0.0])))
            .offset(5);
        let err = db.query(&spec).unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }

    #[test]
    fn test_query_by_unknown_key() {
        let dir = TempDir::new().unwrap();
        let db = two_track_db(&dir);
        let spec = QuerySpec::point(QuerySource::Key("missing".into()));
        let err = db.query(&spec).unwrap_err();
        assert!(matches!(err, Error::KeyNotFound(_)));
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let dir = TempDir::new().unwrap();
        let db = two_track_db(&dir);
        let spec = QuerySpec::point(QuerySource::Datum(datum("q", 3, vec![0.0; 3])));
        let err = db.query(&spec).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 2, got: 3 }));
    }
}
