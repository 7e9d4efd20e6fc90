//! Measurement Variants
//!
//! Four protocols over the same shared line. [`TestMode`] names them for the
//! command line and reports.

mod one_sided;
mod one_sided_asm;
mod ping_pong;
mod relaxed;

pub use one_sided::{Consumer, OneSided, Producer};
pub use one_sided_asm::{FusedConsumer, FusedProducer, OneSidedAsm};
pub use ping_pong::{primary_turns, secondary_turns, try_advance, Client, PingPong, Server};
pub use relaxed::{first_arrival, OneSidedAsmRelaxedBranchPredictor, WindowConsumer};

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Which variant to run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TestMode {
    /// Plain atomics, counter read before each poll
    #[default]
    OneSided,
    /// Fused store/load and counter read
    OneSidedAsm,
    /// Fused producer, branch-free oversampling consumer
    OneSidedAsmRelaxedBranchPredictor,
    /// CAS exchange, amortized over a batch
    PingPong,
}

impl TestMode {
    pub const ALL: [TestMode; 4] = [
        TestMode::OneSided,
        TestMode::OneSidedAsm,
        TestMode::OneSidedAsmRelaxedBranchPredictor,
        TestMode::PingPong,
    ];

    /// Stable name used on the command line and in reports
    pub fn name(self) -> &'static str {
        match self {
            TestMode::OneSided => "one-sided",
            TestMode::OneSidedAsm => "one-sided-asm",
            TestMode::OneSidedAsmRelaxedBranchPredictor => "relaxed-branch-predictor",
            TestMode::PingPong => "ping-pong",
        }
    }

    /// Numeric selector accepted by `--mode`
    pub fn index(self) -> usize {
        match self {
            TestMode::OneSided => 0,
            TestMode::OneSidedAsm => 1,
            TestMode::OneSidedAsmRelaxedBranchPredictor => 2,
            TestMode::PingPong => 3,
        }
    }
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown test mode '{0}' (expected 0-3 or one of: one-sided, one-sided-asm, relaxed-branch-predictor, ping-pong)")]
pub struct ParseModeError(String);

impl FromStr for TestMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(index) = s.parse::<usize>() {
            return TestMode::ALL
                .get(index)
                .copied()
                .ok_or_else(|| ParseModeError(s.to_string()));
        }
        TestMode::ALL
            .into_iter()
            .find(|mode| mode.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseModeError(s.to_string()))
    }
}
