//! CSV Report Generation
//!
//! One header row and one data row per run. Nanosecond columns are empty when
//! the counter frequency is unknown.

use crate::Report;

/// Generate a CSV report
///
/// # CSV Columns
/// - `mode` - Test mode name
/// - `primary_core` / `secondary_core` - Cores the workers were bound to
/// - `attempts` / `samples` / `dropped` - Attempt accounting
/// - `mean_cycles` / `rms_cycles` / `median_cycles` - Cycle statistics
/// - `cycles_per_ns` - Counter frequency (GHz)
/// - `mean_ns` / `rms_ns` / `median_ns` - Nanosecond statistics
pub fn generate_csv_report(report: &Report) -> String {
    let mut csv = String::new();

    csv.push_str("mode,primary_core,secondary_core,attempts,samples,dropped,mean_cycles,rms_cycles,median_cycles,cycles_per_ns,mean_ns,rms_ns,median_ns\n");

    let metrics = &report.metrics;
    csv.push_str(&format!(
        "{},{},{},{},{},{},",
        report.run.mode,
        report.run.primary_core,
        report.run.secondary_core,
        metrics.attempts,
        metrics.samples,
        metrics.dropped,
    ));

    match &metrics.cycles {
        Some(c) => csv.push_str(&format!("{:.2},{:.2},{:.2},", c.mean, c.rms, c.median)),
        None => csv.push_str(",,,"),
    }

    match metrics.cycles_per_ns {
        Some(freq) => csv.push_str(&format!("{:.3},", freq)),
        None => csv.push(','),
    }

    match &metrics.nanos {
        Some(n) => csv.push_str(&format!("{:.2},{:.2},{:.2}\n", n.mean, n.rms, n.median)),
        None => csv.push_str(",,\n"),
    }

    csv
}
