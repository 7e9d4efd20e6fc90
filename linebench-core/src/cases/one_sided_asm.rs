//! One-Sided Transfer, fused counter reads
//!
//! Same request/publish protocol as [`OneSided`](super::OneSided), but the
//! producer's store and the consumer's load are each emitted in one asm block
//! together with the counter read. Nothing the compiler schedules can land
//! between the data access and its timestamp.

use crate::case::{
    allocate_samples, elapsed_cycles, BenchConfig, Participant, SetupError, TestCase,
};
use crate::clock::{code_barrier, load_then_read_cycles, nop_delay, store_then_read_cycles};
use crate::line::{Handshake, HandshakeFlag, SharedCacheLine};

/// Producer/consumer over one line with fused access-and-timestamp sequences
#[derive(Default)]
pub struct OneSidedAsm {
    config: BenchConfig,
    flag: HandshakeFlag,
    start_cycles: Vec<u64>,
    end_cycles: Vec<u64>,
}

impl OneSidedAsm {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Primary side shared by both fused variants
pub struct FusedProducer<'a> {
    pub(crate) line: &'a SharedCacheLine,
    pub(crate) flag: &'a HandshakeFlag,
    pub(crate) start_cycles: &'a mut Vec<u64>,
    pub(crate) attempts: usize,
    pub(crate) nop_delay: u32,
}

impl Participant for FusedProducer<'_> {
    fn prepare(&mut self) -> Result<(), SetupError> {
        *self.start_cycles = allocate_samples("start cycle", self.attempts)?;
        Ok(())
    }

    fn work(&mut self) {
        let mut sample = 1u64;
        let mut slots = self.start_cycles.iter_mut();

        while self.flag.wait_for_go() {
            nop_delay(self.nop_delay);

            let start = store_then_read_cycles(self.line, sample);
            code_barrier();

            if let Some(slot) = slots.next() {
                *slot = start;
            }
            sample += 1;
        }
    }
}

/// Secondary side: polls with the fused load
pub struct FusedConsumer<'a> {
    line: &'a SharedCacheLine,
    flag: &'a HandshakeFlag,
    end_cycles: &'a mut Vec<u64>,
    attempts: usize,
}

impl Participant for FusedConsumer<'_> {
    fn prepare(&mut self) -> Result<(), SetupError> {
        *self.end_cycles = allocate_samples("end cycle", self.attempts)?;
        Ok(())
    }

    fn work(&mut self) {
        let mut sample = 1u64;

        for end in self.end_cycles.iter_mut() {
            self.flag.signal(Handshake::Go);

            let mut now;
            loop {
                let (value, cycles) = load_then_read_cycles(self.line);
                now = cycles;
                if value == sample {
                    break;
                }
            }
            code_barrier();

            *end = now;
            sample += 1;
        }

        self.flag.signal(Handshake::Stop);
    }
}

impl TestCase for OneSidedAsm {
    type Primary<'a> = FusedProducer<'a>;
    type Secondary<'a> = FusedConsumer<'a>;
    type Line = SharedCacheLine;

    fn name(&self) -> &'static str {
        "one-sided-asm"
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
    ) -> (FusedProducer<'a>, FusedConsumer<'a>) {
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
            FusedConsumer {
                line,
                flag: &self.flag,
                end_cycles: &mut self.end_cycles,
                attempts,
            },
        )
    }

    fn durations(&self) -> Vec<Option<f64>> {
        self.start_cycles
            .iter()
            .zip(&self.end_cycles)
            .map(|(&start, &end)| Some(elapsed_cycles(start, end)))
            .collect()
    }
}
