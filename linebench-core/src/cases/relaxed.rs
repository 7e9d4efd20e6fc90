//! One-Sided Transfer, branch-free consumer
//!
//! The producer is the fused one from [`OneSidedAsm`](super::OneSidedAsm).
//! The consumer does not test the loaded value while polling: it records a
//! fixed window of `(value, cycles)` pairs per attempt and searches the window
//! afterwards. With no data-dependent branch in the hot loop, the predictor
//! has nothing to mispredict when the sample lands.
//!
//! The wait is bounded by the window. An attempt whose sample never shows up
//! inside it keeps no end time and drops out of the statistics.

use super::one_sided_asm::FusedProducer;
use crate::case::{
    allocate_samples, elapsed_cycles, BenchConfig, Participant, SetupError, TestCase,
};
use crate::clock::{code_barrier, load_then_read_cycles};
use crate::line::{Handshake, HandshakeFlag, SharedCacheLine};

/// Fused producer and an oversampling consumer
#[derive(Default)]
pub struct OneSidedAsmRelaxedBranchPredictor {
    config: BenchConfig,
    flag: HandshakeFlag,
    start_cycles: Vec<u64>,
    end_cycles: Vec<Option<u64>>,
    window: Vec<(u64, u64)>,
}

impl OneSidedAsmRelaxedBranchPredictor {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Counter value of the first window entry that saw `expected`
#[inline]
pub fn first_arrival(window: &[(u64, u64)], expected: u64) -> Option<u64> {
    window
        .iter()
        .find(|&&(value, _)| value == expected)
        .map(|&(_, cycles)| cycles)
}

/// Secondary side: samples the line a fixed number of times per attempt
pub struct WindowConsumer<'a> {
    line: &'a SharedCacheLine,
    flag: &'a HandshakeFlag,
    end_cycles: &'a mut Vec<Option<u64>>,
    window: &'a mut Vec<(u64, u64)>,
    attempts: usize,
    window_len: usize,
}

impl Participant for WindowConsumer<'_> {
    fn prepare(&mut self) -> Result<(), SetupError> {
        *self.end_cycles = allocate_samples("end cycle", self.attempts)?;
        *self.window = allocate_samples("sample window", self.window_len)?;
        Ok(())
    }

    fn work(&mut self) {
        let mut sample = 1u64;

        for end in self.end_cycles.iter_mut() {
            self.flag.signal(Handshake::Go);

            for entry in self.window.iter_mut() {
                *entry = load_then_read_cycles(self.line);
            }
            code_barrier();

            *end = first_arrival(&self.window[..], sample);
            sample += 1;
        }

        self.flag.signal(Handshake::Stop);
    }
}

impl TestCase for OneSidedAsmRelaxedBranchPredictor {
    type Primary<'a> = FusedProducer<'a>;
    type Secondary<'a> = WindowConsumer<'a>;
    type Line = SharedCacheLine;

    fn name(&self) -> &'static str {
        "relaxed-branch-predictor"
    }

    fn set_config(&mut self, config: BenchConfig) {
        self.config = config;
    }

    fn config(&self) -> &BenchConfig {
        &self.config
    }

    fn participants<'a>(
        &'a mut self,
        line: &'a SharedCacheLine,
    ) -> (FusedProducer<'a>, WindowConsumer<'a>) {
        // A previous run leaves the flag at Stop
        self.flag.signal(Handshake::Wait);
        let attempts = self.config.attempts();
        (
            FusedProducer {
                line,
                flag: &self.flag,
                start_cycles: &mut self.start_cycles,
                attempts,
                nop_delay: self.config.nop_delay,
            },
            WindowConsumer {
                line,
                flag: &self.flag,
                end_cycles: &mut self.end_cycles,
                window: &mut self.window,
                attempts,
                window_len: self.config.window,
            },
        )
    }

    fn durations(&self) -> Vec<Option<f64>> {
        self.start_cycles
            .iter()
            .zip(&self.end_cycles)
            .map(|(&start, end)| end.map(|end| elapsed_cycles(start, end)))
            .collect()
    }
}
