//! Distance kernels shared by the query pipeline.

/// Euclidean distance between two equal-length vectors.
pub(crate) fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    squared_diff(a, b).sqrt()
}

/// Dot product.
pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Normalized point distance from precomputed norms:
/// `sqrt(2 - 2 * dot / (|q| * |c|))`.
///
/// A zero norm yields a non-finite value, which the ranker drops. Rounding
/// can push the squared distance of a perfect match a hair below zero;
/// those are clamped before the sqrt.
pub(crate) fn normalized_point(dot: f64, query_norm: f64, candidate_norm: f64) -> f64 {
    let d2 = 2.0 - 2.0 * dot / (query_norm * candidate_norm);
    if d2 < 0.0 && d2 > -1e-9 {
        return 0.0;
    }
    d2.sqrt()
}

/// Distance between two aligned windows of concatenated vectors: the square
/// root of the summed elementwise squared differences, optionally divided by
/// the window length in vectors.
pub(crate) fn window(query: &[f64], candidate: &[f64], window_len: u32, average: bool) -> f64 {
    let d = squared_diff(query, candidate).sqrt();
    if average {
        d / window_len as f64
    } else {
        d
    }
}

fn squared_diff(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
