//! Counter Frequency Probe
//!
//! Best-effort discovery of how many counter ticks make a nanosecond. Used only
//! to print nanoseconds next to cycles; the measurement never depends on it.

use crate::clock::CycleClock;
use std::time::{Duration, Instant};
use tracing::debug;

/// Estimate the cycle counter frequency in GHz (cycles per nanosecond).
pub fn estimate_cpu_frequency_ghz() -> Option<f64> {
    let estimate = counter_register_ghz()
        .or_else(model_name_ghz)
        .or_else(sysfs_base_frequency_ghz)
        .or_else(cpuinfo_mhz_ghz);
    debug!(?estimate, "counter frequency probe");
    estimate
}

/// Measure the counter against the monotonic clock over `window`.
///
/// Returns `None` if the counter did not advance.
pub fn calibrate_cycles_per_ns<C: CycleClock>(clock: &C, window: Duration) -> Option<f64> {
    let wall_start = Instant::now();
    let start = clock.now();
    std::thread::sleep(window);
    let end = clock.now();
    let elapsed_ns = wall_start.elapsed().as_nanos() as f64;

    let cycles = end.checked_sub(start)? as f64;
    if cycles == 0.0 || elapsed_ns == 0.0 {
        return None;
    }
    Some(cycles / elapsed_ns)
}

#[cfg(target_arch = "aarch64")]
fn counter_register_ghz() -> Option<f64> {
    let hz: u64;
    // SAFETY: CNTFRQ_EL0 is readable from EL0.
    unsafe {
        std::arch::asm!("mrs {}, cntfrq_el0", out(reg) hz, options(nomem, nostack, preserves_flags));
    }
    (hz > 0).then(|| hz as f64 / 1e9)
}

#[cfg(not(target_arch = "aarch64"))]
fn counter_register_ghz() -> Option<f64> {
    None
}

// The invariant TSC ticks at the nominal frequency printed in the model name.
#[cfg(target_arch = "x86_64")]
fn model_name_ghz() -> Option<f64> {
    let cpuinfo = std::fs::read_to_string("/proc/cpuinfo").ok()?;
    cpuinfo
        .lines()
        .find(|l| l.starts_with("model name"))
        .and_then(parse_model_name_ghz)
}

#[cfg(not(target_arch = "x86_64"))]
fn model_name_ghz() -> Option<f64> {
    None
}

fn sysfs_base_frequency_ghz() -> Option<f64> {
    let khz = std::fs::read_to_string("/sys/devices/system/cpu/cpu0/cpufreq/base_frequency").ok()?;
    parse_khz_ghz(&khz)
}

fn cpuinfo_mhz_ghz() -> Option<f64> {
    let cpuinfo = std::fs::read_to_string("/proc/cpuinfo").ok()?;
    parse_cpuinfo_mhz_ghz(&cpuinfo)
}

/// Parse "... @ 3.20GHz" out of a `model name` line.
pub(crate) fn parse_model_name_ghz(line: &str) -> Option<f64> {
    let (_, tail) = line.rsplit_once('@')?;
    let value = tail.trim().strip_suffix("GHz")?;
    positive(value.trim().parse().ok()?)
}

/// Parse a sysfs frequency in kHz.
pub(crate) fn parse_khz_ghz(text: &str) -> Option<f64> {
    let khz: f64 = text.trim().parse().ok()?;
    positive(khz / 1e6)
}

/// Parse the first `cpu MHz` entry of /proc/cpuinfo.
pub(crate) fn parse_cpuinfo_mhz_ghz(cpuinfo: &str) -> Option<f64> {
    let line = cpuinfo.lines().find(|l| l.starts_with("cpu MHz"))?;
    let mhz: f64 = line.split(':').nth(1)?.trim().parse().ok()?;
    positive(mhz / 1e3)
}

fn positive(ghz: f64) -> Option<f64> {
    (ghz.is_finite() && ghz > 0.0).then_some(ghz)
}
