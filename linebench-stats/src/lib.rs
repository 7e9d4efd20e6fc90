//! LineBench Stats - Trimmed Sample Reduction
//!
//! Reduces raw per-attempt durations (in counter cycles) to a mean, an rms
//! deviation and a median. The mean and rms are taken over a trimmed set so a
//! handful of interrupted attempts cannot dominate the result.

use serde::{Deserialize, Serialize};

/// Samples trimmed from each end once there are enough of them
pub const TRIM_PER_SIDE: usize = 3;

/// Trimming only applies above this many samples
pub const TRIM_THRESHOLD: usize = 6;

/// Reduced view of one sample set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrimmedSummary {
    /// Number of samples reduced (absent samples never reach the reducer)
    pub count: usize,
    /// Samples dropped from each end before computing mean and rms
    pub trimmed_per_side: usize,
    /// Arithmetic mean of the trimmed set
    pub mean: f64,
    /// Root-mean-square deviation of the trimmed set around `mean`
    pub rms: f64,
    /// Middle element of the untrimmed sorted set
    pub median: f64,
}

impl TrimmedSummary {
    /// Scale every statistic by `1 / cycles_per_ns`.
    ///
    /// Returns `None` when the frequency is unknown, zero or not finite.
    pub fn to_nanos(&self, cycles_per_ns: Option<f64>) -> Option<TrimmedSummary> {
        Some(TrimmedSummary {
            mean: cycles_to_ns(self.mean, cycles_per_ns)?,
            rms: cycles_to_ns(self.rms, cycles_per_ns)?,
            median: cycles_to_ns(self.median, cycles_per_ns)?,
            ..*self
        })
    }
}

/// How many samples to drop from each end for a set of `count` samples.
#[inline]
pub fn trim_count(count: usize) -> usize {
    if count > TRIM_THRESHOLD {
        TRIM_PER_SIDE
    } else {
        0
    }
}

/// Reduce a sample set. Input order does not matter.
///
/// Returns `None` for an empty set.
pub fn compute_trimmed_summary(samples: &[f64]) -> Option<TrimmedSummary> {
    if samples.is_empty() {
        return None;
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let count = sorted.len();
    let k = trim_count(count);
    let kept = &sorted[k..count - k];

    let mean = kept.iter().sum::<f64>() / kept.len() as f64;
    let variance = kept.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / kept.len() as f64;

    Some(TrimmedSummary {
        count,
        trimmed_per_side: k,
        mean,
        rms: variance.sqrt(),
        median: sorted[count / 2],
    })
}

/// Convert a cycle count to nanoseconds.
///
/// `cycles_per_ns` is the counter frequency in GHz.
#[inline]
pub fn cycles_to_ns(cycles: f64, cycles_per_ns: Option<f64>) -> Option<f64> {
    match cycles_per_ns {
        Some(freq) if freq.is_finite() && freq > 0.0 => Some(cycles / freq),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trimmed_summary_outliers() {
        let samples = [70.0, -1000.0, 40.0, 10.0, 1000.0, 30.0, 60.0, 20.0, 50.0];
        let summary = compute_trimmed_summary(&samples).unwrap();

        assert_eq!(summary.count, 9);
        assert_eq!(summary.trimmed_per_side, 3);
        // Sorted: [-1000, 10, 20, 30, 40, 50, 60, 70, 1000], kept = [30, 40, 50]
        assert_eq!(summary.mean, 40.0);
        assert_eq!(summary.rms, (200.0f64 / 3.0).sqrt());
        assert!((summary.rms - 8.164_965_809_277_26).abs() < 1e-12);
        assert_eq!(summary.median, 40.0);
    }

    #[test]
    fn test_no_trim_at_threshold() {
        let samples = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let summary = compute_trimmed_summary(&samples).unwrap();

        assert_eq!(summary.trimmed_per_side, 0);
        assert_eq!(summary.mean, 3.5);
        // index 6 / 2 = 3 of the sorted set
        assert_eq!(summary.median, 4.0);
    }

    #[test]
    fn test_trim_starts_above_threshold() {
        assert_eq!(trim_count(0), 0);
        assert_eq!(trim_count(6), 0);
        assert_eq!(trim_count(7), 3);
        assert_eq!(trim_count(1000), 3);

        // 7 samples keep only the middle one
        let summary = compute_trimmed_summary(&[9.0, 1.0, 8.0, 2.0, 7.0, 3.0, 5.0]).unwrap();
        assert_eq!(summary.mean, 5.0);
        assert_eq!(summary.rms, 0.0);
        assert_eq!(summary.median, 5.0);
    }

    #[test]
    fn test_empty_samples() {
        assert!(compute_trimmed_summary(&[]).is_none());
    }

    #[test]
    fn test_single_sample() {
        let summary = compute_trimmed_summary(&[42.0]).unwrap();
        assert_eq!(summary.count, 1);
        assert_eq!(summary.mean, 42.0);
        assert_eq!(summary.rms, 0.0);
        assert_eq!(summary.median, 42.0);
    }

    #[test]
    fn test_cycles_to_ns() {
        assert_eq!(cycles_to_ns(300.0, Some(3.0)), Some(100.0));
        assert_eq!(cycles_to_ns(300.0, Some(0.0)), None);
        assert_eq!(cycles_to_ns(300.0, Some(f64::NAN)), None);
        assert_eq!(cycles_to_ns(300.0, None), None);
    }

    #[test]
    fn test_to_nanos_keeps_counts() {
        let summary = compute_trimmed_summary(&[20.0, 40.0, 60.0]).unwrap();
        let nanos = summary.to_nanos(Some(2.0)).unwrap();

        assert_eq!(nanos.count, 3);
        assert_eq!(nanos.mean, 20.0);
        assert_eq!(nanos.median, 20.0);
        assert!(summary.to_nanos(None).is_none());
    }
}
