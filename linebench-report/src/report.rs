//! Report Model
//!
//! Serializable description of one measurement run.

use chrono::{DateTime, Utc};
use linebench_stats::{compute_trimmed_summary, TrimmedSummary};
use serde::{Deserialize, Serialize};

/// Complete run report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub meta: ReportMeta,
    pub run: RunInfo,
    pub metrics: LatencyMetrics,
}

impl Report {
    /// Build a report, collecting host metadata now
    pub fn new(run: RunInfo, metrics: LatencyMetrics) -> Self {
        Self {
            meta: ReportMeta::collect(),
            run,
            metrics,
        }
    }
}

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMeta {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub system: SystemInfo,
}

impl ReportMeta {
    /// Gather metadata about the current host
    pub fn collect() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
            system: SystemInfo::collect(),
        }
    }
}

/// Host description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub arch: String,
    pub cpu: String,
    pub cpu_cores: u32,
}

impl SystemInfo {
    pub fn collect() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            cpu: cpu_model().unwrap_or_else(|| "Unknown".to_string()),
            cpu_cores: std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1),
        }
    }
}

fn cpu_model() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/cpuinfo")
            .ok()
            .and_then(|content| {
                content
                    .lines()
                    .find(|l| l.starts_with("model name"))
                    .and_then(|l| l.split(':').nth(1))
                    .map(|s| s.trim().to_string())
            })
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// What was measured and where
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    /// Test mode name (e.g. "one-sided")
    pub mode: String,
    /// Core the primary worker was bound to
    pub primary_core: usize,
    /// Core the secondary worker was bound to
    pub secondary_core: usize,
    /// Configured number of attempts
    pub attempts: u32,
}

/// Mean, rms and median in one unit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub mean: f64,
    pub rms: f64,
    pub median: f64,
}

impl From<TrimmedSummary> for LatencyStats {
    fn from(s: TrimmedSummary) -> Self {
        Self {
            mean: s.mean,
            rms: s.rms,
            median: s.median,
        }
    }
}

/// Latency figures for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyMetrics {
    /// Attempts that were run
    pub attempts: usize,
    /// Attempts that produced a sample
    pub samples: usize,
    /// Attempts whose transition was never observed
    pub dropped: usize,
    /// Samples trimmed from each end before mean/rms
    pub trimmed_per_side: usize,
    /// Counter frequency used for conversion (GHz), if known
    pub cycles_per_ns: Option<f64>,
    /// Statistics in counter cycles
    pub cycles: Option<LatencyStats>,
    /// Statistics in nanoseconds, when the frequency is known
    pub nanos: Option<LatencyStats>,
}

impl LatencyMetrics {
    /// Reduce per-attempt durations; `None` entries are absent samples and are
    /// excluded before any statistic (including the trim count) is computed.
    pub fn from_durations(durations: &[Option<f64>], cycles_per_ns: Option<f64>) -> Self {
        let observed: Vec<f64> = durations.iter().flatten().copied().collect();
        let summary = compute_trimmed_summary(&observed);
        let cycles_per_ns = cycles_per_ns.filter(|f| f.is_finite() && *f > 0.0);

        Self {
            attempts: durations.len(),
            samples: observed.len(),
            dropped: durations.len() - observed.len(),
            trimmed_per_side: summary.map(|s| s.trimmed_per_side).unwrap_or(0),
            cycles_per_ns,
            cycles: summary.map(LatencyStats::from),
            nanos: summary
                .and_then(|s| s.to_nanos(cycles_per_ns))
                .map(LatencyStats::from),
        }
    }
}

/// Render the latency block printed after a run.
pub fn format_latency_block(metrics: &LatencyMetrics) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "  samples      : {} of {}",
        metrics.samples, metrics.attempts
    ));
    if metrics.dropped > 0 {
        output.push_str(&format!(" ({} dropped)", metrics.dropped));
    }
    output.push('\n');

    let Some(cycles) = &metrics.cycles else {
        output.push_str("  no samples observed\n");
        return output;
    };

    output.push_str(&format!("  cycles mean  : {:.2}\n", cycles.mean));
    output.push_str(&format!("  cycles rms   : {:.2}\n", cycles.rms));
    output.push_str(&format!("  cycles median: {:.2}\n", cycles.median));

    match (&metrics.nanos, metrics.cycles_per_ns) {
        (Some(nanos), Some(freq)) => {
            output.push_str(&format!("  ns mean      : {:.2}\n", nanos.mean));
            output.push_str(&format!("  ns rms       : {:.2}\n", nanos.rms));
            output.push_str(&format!("  ns median    : {:.2}\n", nanos.median));
            output.push_str(&format!("  frequency    : {:.3} GHz\n", freq));
        }
        _ => output.push_str("  frequency    : unknown\n"),
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_samples_excluded() {
        let mut durations: Vec<Option<f64>> = (1..=7).map(|v| Some(v as f64 * 10.0)).collect();
        durations.insert(2, None);

        let metrics = LatencyMetrics::from_durations(&durations, None);
        assert_eq!(metrics.attempts, 8);
        assert_eq!(metrics.samples, 7);
        assert_eq!(metrics.dropped, 1);
        // 7 observed samples trim 3 per side; a zero stand-in would have made it 8
        assert_eq!(metrics.trimmed_per_side, 3);
        let cycles = metrics.cycles.unwrap();
        assert_eq!(cycles.mean, 40.0);
        assert_eq!(cycles.median, 40.0);
    }

    #[test]
    fn test_dropped_sample_changes_trim_decision() {
        // 7 attempts, one lost: 6 observed samples are below the trim threshold
        let durations = [
            Some(1.0),
            Some(2.0),
            None,
            Some(3.0),
            Some(4.0),
            Some(5.0),
            Some(6.0),
        ];
        let metrics = LatencyMetrics::from_durations(&durations, None);
        assert_eq!(metrics.samples, 6);
        assert_eq!(metrics.trimmed_per_side, 0);
        assert_eq!(metrics.cycles.unwrap().mean, 3.5);
    }

    #[test]
    fn test_nanos_only_with_frequency() {
        let durations = [Some(30.0), Some(60.0), Some(90.0)];

        let unknown = LatencyMetrics::from_durations(&durations, Some(0.0));
        assert!(unknown.nanos.is_none());
        assert!(unknown.cycles_per_ns.is_none());

        let known = LatencyMetrics::from_durations(&durations, Some(3.0));
        let nanos = known.nanos.unwrap();
        assert_eq!(nanos.mean, 20.0);
        assert_eq!(nanos.median, 20.0);
    }

    #[test]
    fn test_format_latency_block() {
        let durations = [Some(30.0), Some(60.0), Some(90.0), None];

        let text = format_latency_block(&LatencyMetrics::from_durations(&durations, None));
        assert!(text.contains("samples      : 3 of 4 (1 dropped)"));
        assert!(text.contains("cycles mean  : 60.00"));
        assert!(text.contains("cycles median: 60.00"));
        assert!(text.contains("frequency    : unknown"));
        assert!(!text.contains("ns mean"));

        let text = format_latency_block(&LatencyMetrics::from_durations(&durations, Some(3.0)));
        assert!(text.contains("ns mean      : 20.00"));
        assert!(text.contains("frequency    : 3.000 GHz"));
    }

    #[test]
    fn test_format_without_samples() {
        let text = format_latency_block(&LatencyMetrics::from_durations(&[None, None], None));
        assert!(text.contains("samples      : 0 of 2 (2 dropped)"));
        assert!(text.contains("no samples observed"));
    }
}
