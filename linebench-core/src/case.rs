//! Test Case Protocol
//!
//! A test case is configured once, then split into a primary and a secondary
//! [`Participant`]. Each participant borrows only its own sample buffer plus
//! the shared atomics, so the two can run on different cores without locks.
//!
//! Lifecycle: `set_config` -> `prepare` (both sides) -> start barrier ->
//! `work` (both sides) -> `report`.

use crate::line::CacheWord;
use linebench_report::{format_latency_block, LatencyMetrics};
use std::collections::TryReserveError;
use std::fmt;
use std::io;
use thiserror::Error;

/// Default number of timed attempts
pub const DEFAULT_ATTEMPTS: u32 = 1000;

/// Default no-op count the producer executes before each publish
pub const DEFAULT_NOP_DELAY: u32 = 1000;

/// Default oversampling window of the branch-free consumer
pub const DEFAULT_WINDOW: usize = 10 * 1024;

/// Default number of transfers per ping-pong attempt
pub const DEFAULT_ROUND_TRIPS: u32 = 200;

/// Run configuration, fixed before any prepare phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchConfig {
    /// Number of timed attempts
    pub attempts_count: u32,
    /// No-ops the producer executes between a request and its publish
    pub nop_delay: u32,
    /// Samples taken per attempt by the oversampling consumer
    pub window: usize,
    /// Transfers per ping-pong attempt (must be even)
    pub round_trips: u32,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            attempts_count: DEFAULT_ATTEMPTS,
            nop_delay: DEFAULT_NOP_DELAY,
            window: DEFAULT_WINDOW,
            round_trips: DEFAULT_ROUND_TRIPS,
        }
    }
}

impl BenchConfig {
    pub fn with_attempts(attempts_count: u32) -> Self {
        Self {
            attempts_count,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.attempts_count == 0 {
            return Err(ConfigError::NoAttempts);
        }
        if self.window == 0 {
            return Err(ConfigError::EmptyWindow);
        }
        if self.round_trips == 0 || self.round_trips % 2 != 0 {
            return Err(ConfigError::RoundTrips(self.round_trips));
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn attempts(&self) -> usize {
        self.attempts_count as usize
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("attempts count must be positive")]
    NoAttempts,

    #[error("sampling window must hold at least one entry")]
    EmptyWindow,

    #[error("round trips must be a positive even number, got {0}")]
    RoundTrips(u32),
}

/// Which worker a participant runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Primary,
    Secondary,
}

impl Role {
    /// Position in per-worker arrays
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Role::Primary => 0,
            Role::Secondary => 1,
        }
    }

    #[inline]
    pub fn peer(self) -> Role {
        match self {
            Role::Primary => Role::Secondary,
            Role::Secondary => Role::Primary,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker {}", self.index() + 1)
    }
}

/// Failure before the timed phase
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("unable to set thread affinity to cpu {core}: {source}")]
    Affinity {
        core: usize,
        #[source]
        source: io::Error,
    },

    #[error("unable to allocate {requested} {what} entries: {source}")]
    Allocation {
        what: &'static str,
        requested: usize,
        #[source]
        source: TryReserveError,
    },

    #[error("unable to start worker thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("panicked during setup: {0}")]
    Panicked(String),
}

/// One side of a test case
pub trait Participant: Send {
    /// Allocate and warm everything the timed phase touches.
    fn prepare(&mut self) -> Result<(), SetupError>;

    /// The timed phase. Anomalies become absent samples, never errors.
    fn work(&mut self);
}

/// A measurement protocol between two workers
pub trait TestCase {
    /// Participant run by the primary worker
    type Primary<'a>: Participant
    where
        Self: 'a;

    /// Participant run by the secondary worker
    type Secondary<'a>: Participant
    where
        Self: 'a;

    /// The shared word the runner allocates for each run
    type Line: CacheWord;

    /// Short name used in reports
    fn name(&self) -> &'static str;

    fn set_config(&mut self, config: BenchConfig);

    fn config(&self) -> &BenchConfig;

    /// Split into the two sides for one run over `line`.
    fn participants<'a>(
        &'a mut self,
        line: &'a Self::Line,
    ) -> (Self::Primary<'a>, Self::Secondary<'a>);

    /// Per-attempt durations in counter cycles; `None` marks an attempt that
    /// produced no sample.
    fn durations(&self) -> Vec<Option<f64>>;

    /// Reduce the collected durations.
    fn metrics(&self, cycles_per_ns: Option<f64>) -> LatencyMetrics {
        LatencyMetrics::from_durations(&self.durations(), cycles_per_ns)
    }

    /// Write the latency block for the last run to `sink`.
    fn report(&self, sink: &mut dyn io::Write, cycles_per_ns: Option<f64>) -> io::Result<()> {
        let metrics = self.metrics(cycles_per_ns);
        sink.write_all(format_latency_block(&metrics).as_bytes())
    }
}

/// Allocate a sample buffer of `len` entries.
///
/// Every slot is written here so page faults happen during prepare, on the
/// worker's own core, and never inside the timed loop.
pub(crate) fn allocate_samples<T: Clone + Default>(
    what: &'static str,
    len: usize,
) -> Result<Vec<T>, SetupError> {
    let mut samples = Vec::new();
    samples
        .try_reserve_exact(len)
        .map_err(|source| SetupError::Allocation {
            what,
            requested: len,
            source,
        })?;
    samples.resize(len, T::default());
    Ok(samples)
}

/// Signed distance between two counter readings.
#[inline]
pub(crate) fn elapsed_cycles(start: u64, end: u64) -> f64 {
    end.wrapping_sub(start) as i64 as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BenchConfig::default();
        assert_eq!(config.attempts_count, 1000);
        assert_eq!(config.window, 10 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert_eq!(
            BenchConfig::with_attempts(0).validate(),
            Err(ConfigError::NoAttempts)
        );

        let odd = BenchConfig {
            round_trips: 3,
            ..Default::default()
        };
        assert_eq!(odd.validate(), Err(ConfigError::RoundTrips(3)));

        let empty = BenchConfig {
            window: 0,
            ..Default::default()
        };
        assert_eq!(empty.validate(), Err(ConfigError::EmptyWindow));
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Primary.to_string(), "worker 1");
        assert_eq!(Role::Secondary.to_string(), "worker 2");
        assert_eq!(Role::Primary.peer(), Role::Secondary);
    }

    #[test]
    fn test_allocate_samples() {
        let samples: Vec<u64> = allocate_samples("start", 16).unwrap();
        assert_eq!(samples, vec![0; 16]);
    }

    #[test]
    fn test_allocation_failure_is_reported() {
        match allocate_samples::<u64>("start", usize::MAX) {
            Err(SetupError::Allocation { what, requested, .. }) => {
                assert_eq!(what, "start");
                assert_eq!(requested, usize::MAX);
            }
            other => panic!("unexpected result: {:?}", other.map(|v| v.len())),
        }
    }

    #[test]
    fn test_elapsed_cycles_signed() {
        assert_eq!(elapsed_cycles(100, 150), 50.0);
        // The consumer may read its counter just before the producer does
        assert_eq!(elapsed_cycles(150, 100), -50.0);
    }
}
