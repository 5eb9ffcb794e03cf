//! Bounded ascending-distance ranking.

use audiodb_core::Match;

/// Fixed-capacity collection of the best matches seen so far.
///
/// Kept sorted by ascending distance. Once full, a new match must be
/// strictly better than the current worst to enter; equal-distance matches
/// stay in first-seen order because insertion lands after existing ties.
pub(crate) struct Ranker {
    cap: usize,
    entries: Vec<Match>,
}

impl Ranker {
    pub(crate) fn new(cap: usize) -> Ranker {
        Ranker {
            cap,
            entries: Vec::with_capacity(cap),
        }
    }

    /// Offer a match. Non-finite distances never enter the ranking.
    pub(crate) fn offer(&mut self, m: Match) {
        if self.cap == 0 || !m.distance.is_finite() {
            return;
        }
        if self.entries.len() == self.cap {
            // Strict improvement required to evict the worst.
            let worst = self.entries[self.cap - 1].distance;
            if m.distance >= worst {
                return;
            }
            self.entries.pop();
        }
        let at = self
            .entries
            .partition_point(|e| e.distance <= m.distance);
        self.entries.insert(at, m);
    }

    pub(crate) fn into_sorted(self) -> Vec<Match> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn m(key: &str, distance: f64) -> Match {
        Match {
            key: key.into(),
            distance,
            query_pos: 0,
            match_pos: 0,
        }
    }

    #[test]
    fn test_keeps_best_n_sorted() {
        let mut r = Ranker::new(3);
        for (key, d) in [("a", 5.0), ("b", 1.0), ("c", 3.0), ("d", 2.0), ("e", 4.0)] {
            r.offer(m(key, d));
        }
        let out = r.into_sorted();
        let keys: Vec<&str> = out.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["b", "d", "c"]);
    }

    #[test]
    fn test_ties_keep_first_seen_order() {
        let mut r = Ranker::new(4);
        r.offer(m("first", 1.0));
        r.offer(m("second", 1.0));
        r.offer(m("third", 1.0));
        let keys: Vec<String> = r.into_sorted().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_full_ranker_requires_strict_improvement() {
        let mut r = Ranker::new(2);
        r.offer(m("a", 1.0));
        r.offer(m("b", 2.0));
        // Equal to the worst: rejected.
        r.offer(m("c", 2.0));
        let keys: Vec<String> = r.into_sorted().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut r = Ranker::new(2);
        r.offer(m("nan", f64::NAN));
        r.offer(m("inf", f64::INFINITY));
        r.offer(m("ok", 1.0));
        assert_eq!(r.into_sorted().len(), 1);
    }

    #[test]
    fn test_zero_capacity() {
        let mut r = Ranker::new(0);
        r.offer(m("a", 1.0));
        assert!(r.into_sorted().is_empty());
    }

    proptest! {
        #[test]
        fn prop_sorted_and_bounded(
            distances in proptest::collection::vec(0.0f64..1000.0, 0..100),
            cap in 0usize..20,
        ) {
            let mut r = Ranker::new(cap);
            for (i, &d) in distances.iter().enumerate() {
                r.offer(m(&format!("k{i}"), d));
            }
            let out = r.into_sorted();
            prop_assert!(out.len() <= cap);
            prop_assert!(out.len() <= distances.len());
            prop_assert!(out.windows(2).all(|w| w[0].distance <= w[1].distance));

            // The ranked distances are the smallest offered.
            let mut sorted = distances.clone();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
            for (got, want) in out.iter().zip(sorted.iter()) {
                prop_assert_eq!(got.distance, *want);
            }
        }
    }
}
