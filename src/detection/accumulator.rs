//! Online accumulator for all-time power statistics

use crate::detection::baseline::Baseline;

/// Mean and standard deviation from count, sum and sum of squares.
///
/// Variance is floored at 0 before the square root to absorb round-off.
pub fn moments(count: u64, sum: f64, sum_sqr: f64) -> (f64, f64) {
    let n = count.max(1) as f64;
    let mean = sum / n;
    let variance = (sum_sqr / n - mean * mean).max(0.0);
    (mean, variance.sqrt())
}

/// Running count/sum/sum-of-squares seeded from a baseline.
///
/// Grows for the life of the stream with no decay: mean and std describe
/// all-time behavior, while the EWMA tracks recent behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RunningStats {
    count: u64,
    sum: f64,
    sum_sqr: f64,
}

impl RunningStats {
    pub fn from_baseline(baseline: &Baseline) -> Self {
        Self {
            count: baseline.n,
            sum: baseline.sum,
            sum_sqr: baseline.sum_sqr,
        }
    }

    /// Fold one value into the totals
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_sqr += value * value;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        moments(self.count, self.sum, self.sum_sqr).0
    }

    pub fn std(&self) -> f64 {
        moments(self.count, self.sum, self.sum_sqr).1
    }

    /// Snapshot of the totals in baseline form
    pub fn to_baseline(&self) -> Baseline {
        Baseline::new(self.count, self.sum, self.sum_sqr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_push_updates_totals() {
        let mut stats = RunningStats::from_baseline(&Baseline::new(0, 0.0, 0.0));
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            stats.push(v);
        }
        assert_eq!(stats.count(), 8);
        assert!((stats.mean() - 5.0).abs() < 1e-12);
        assert!((stats.std() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_seeded_from_baseline() {
        let baseline = Baseline::new(4, 40.0, 400.0);
        let mut stats = RunningStats::from_baseline(&baseline);
        assert_eq!(stats.mean(), baseline.mean());
        assert_eq!(stats.std(), 0.0);

        stats.push(20.0);
        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 12.0).abs() < 1e-12);
        assert!(stats.std() > 0.0);
        // The baseline itself is a copy and never changes
        assert_eq!(baseline.n, 4);
    }

    #[test]
    fn test_snapshot_saves_as_extended_baseline() {
        let mut stats = RunningStats::from_baseline(&Baseline::new(4, 40.0, 400.0));
        stats.push(20.0);

        let file = tempfile::NamedTempFile::new().unwrap();
        stats.to_baseline().save(file.path()).unwrap();
        let reloaded = Baseline::load(file.path()).unwrap();
        assert_eq!(reloaded, Baseline::new(5, 60.0, 800.0));
        assert_eq!(reloaded.mean(), stats.mean());
    }

    #[test]
    fn test_round_off_never_goes_negative() {
        let mut stats = RunningStats::from_baseline(&Baseline::new(0, 0.0, 0.0));
        for _ in 0..1000 {
            stats.push(0.1);
        }
        assert!(stats.std() >= 0.0);
        assert!(stats.std() < 1e-6);
    }

    proptest! {
        #[test]
        fn prop_std_is_never_negative(values in proptest::collection::vec(-1.0e4f64..1.0e4, 0..200)) {
            let mut stats = RunningStats::from_baseline(&Baseline::new(0, 0.0, 0.0));
            for v in &values {
                stats.push(*v);
            }
            prop_assert!(stats.std() >= 0.0);
            prop_assert!(stats.std().is_finite());
        }

        #[test]
        fn prop_matches_baseline_of_same_totals(values in proptest::collection::vec(0.0f64..5.0e3, 1..100)) {
            let mut stats = RunningStats::from_baseline(&Baseline::new(0, 0.0, 0.0));
            for v in &values {
                stats.push(*v);
            }
            let snapshot = stats.to_baseline();
            prop_assert_eq!(snapshot.mean(), stats.mean());
            prop_assert_eq!(snapshot.std(), stats.std());

            let direct_mean = values.iter().sum::<f64>() / values.len() as f64;
            prop_assert!((stats.mean() - direct_mean).abs() < 1e-6);
        }
    }
}
