use std::collections::BTreeSet;

/// Tracks the best coverage observed so far and decides whether a fresh
/// execution is worth keeping.
///
/// An execution is interesting when it touches at least one unit outside the
/// accumulated set; strict subsets and exact repeats are not.
#[derive(Debug, Default, Clone)]
pub struct CoverageFeedback {
    best_coverage: BTreeSet<u32>,
    /// Total instrumented units in the target, when the executor knows it.
    capacity: Option<usize>,
}

impl CoverageFeedback {
    pub fn new(capacity: Option<usize>) -> Self {
        CoverageFeedback {
            best_coverage: BTreeSet::new(),
            capacity,
        }
    }

    pub fn is_interesting(&self, coverage: &BTreeSet<u32>) -> bool {
        !coverage.is_subset(&self.best_coverage)
    }

    /// Folds an execution's coverage into the accumulated set, returning how
    /// many units were new.
    pub fn record(&mut self, coverage: &BTreeSet<u32>) -> usize {
        let new_units = coverage.difference(&self.best_coverage).count();
        self.best_coverage.extend(coverage.iter().copied());
        new_units
    }

    pub fn covered_units(&self) -> usize {
        self.best_coverage.len()
    }

    pub fn best_coverage(&self) -> &BTreeSet<u32> {
        &self.best_coverage
    }

    /// Percentage of the instrumented map covered, or `None` when the
    /// executor never reported a capacity (a ratio against an unknown
    /// denominator would be noise).
    pub fn coverage_percent(&self) -> Option<f64> {
        match self.capacity {
            Some(capacity) if capacity > 0 => {
                Some(self.best_coverage.len() as f64 * 100.0 / capacity as f64)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(ids: &[u32]) -> BTreeSet<u32> {
        ids.iter().copied().collect()
    }

    #[test]
    fn novel_units_are_interesting_subsets_are_not() {
        let mut feedback = CoverageFeedback::new(None);
        assert!(feedback.is_interesting(&units(&[1, 2])));
        assert_eq!(feedback.record(&units(&[1, 2])), 2);

        assert!(!feedback.is_interesting(&units(&[1])));
        assert!(!feedback.is_interesting(&units(&[1, 2])));
        // One overlapping unit plus one new unit still counts.
        assert!(feedback.is_interesting(&units(&[2, 3])));
        assert_eq!(feedback.record(&units(&[2, 3])), 1);
        assert_eq!(feedback.covered_units(), 3);
    }

    #[test]
    fn empty_coverage_is_never_interesting() {
        let feedback = CoverageFeedback::new(None);
        assert!(!feedback.is_interesting(&BTreeSet::new()));
    }

    #[test]
    fn percent_requires_a_known_capacity() {
        let mut unknown = CoverageFeedback::new(None);
        unknown.record(&units(&[1]));
        assert_eq!(unknown.coverage_percent(), None);

        let mut known = CoverageFeedback::new(Some(200));
        known.record(&units(&[1, 2, 3, 4]));
        assert_eq!(known.coverage_percent(), Some(2.0));

        assert_eq!(CoverageFeedback::new(Some(0)).coverage_percent(), None);
    }
}
