//! One-Sided Transfer
//!
//! The secondary asks for a sample, then polls the line. The primary answers
//! by timestamping and storing the next counter value. Duration is the
//! consumer's last timestamp minus the producer's timestamp.

use crate::case::{
    allocate_samples, elapsed_cycles, BenchConfig, Participant, SetupError, TestCase,
};
use crate::clock::{code_barrier, nop_delay, CycleClock, Tsc};
use crate::line::{CacheWord, Handshake, HandshakeFlag, SharedCacheLine};
use std::marker::PhantomData;

/// Producer/consumer over one line, plain atomics and a plain counter read
pub struct OneSided<L = SharedCacheLine, C = Tsc> {
    config: BenchConfig,
    flag: HandshakeFlag,
    clock: C,
    // Each buffer is written by one worker only, so the timed loops never
    // share a line through them.
    start_cycles: Vec<u64>,
    end_cycles: Vec<u64>,
    _line: PhantomData<fn() -> L>,
}

impl OneSided {
    pub fn new() -> Self {
        Self::with_clock(Tsc)
    }
}

impl Default for OneSided {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: CacheWord, C: CycleClock> OneSided<L, C> {
    /// Use a custom clock and line type
    pub fn with_clock(clock: C) -> Self {
        Self {
            config: BenchConfig::default(),
            flag: HandshakeFlag::new(),
            clock,
            start_cycles: Vec::new(),
            end_cycles: Vec::new(),
            _line: PhantomData,
        }
    }
}

/// Primary side: publishes samples on request
pub struct Producer<'a, L, C> {
    line: &'a L,
    flag: &'a HandshakeFlag,
    clock: &'a C,
    start_cycles: &'a mut Vec<u64>,
    attempts: usize,
    nop_delay: u32,
}

impl<L: CacheWord, C: CycleClock> Participant for Producer<'_, L, C> {
    fn prepare(&mut self) -> Result<(), SetupError> {
        *self.start_cycles = allocate_samples("start cycle", self.attempts)?;
        Ok(())
    }

    fn work(&mut self) {
        let mut sample = 1u64;
        let mut slots = self.start_cycles.iter_mut();

        while self.flag.wait_for_go() {
            // Give the consumer time to enter its polling loop
            nop_delay(self.nop_delay);

            let start = self.clock.now();
            self.line.store(sample);
            code_barrier();

            if let Some(slot) = slots.next() {
                *slot = start;
            }
            sample += 1;
        }
    }
}

/// Secondary side: requests samples and waits for them
pub struct Consumer<'a, L, C> {
    line: &'a L,
    flag: &'a HandshakeFlag,
    clock: &'a C,
    end_cycles: &'a mut Vec<u64>,
    attempts: usize,
}

impl<L: CacheWord, C: CycleClock> Participant for Consumer<'_, L, C> {
    fn prepare(&mut self) -> Result<(), SetupError> {
        *self.end_cycles = allocate_samples("end cycle", self.attempts)?;
        Ok(())
    }

    fn work(&mut self) {
        let mut sample = 1u64;

        for end in self.end_cycles.iter_mut() {
            self.flag.signal(Handshake::Go);

            // The timestamp is taken before the load that confirms the value,
            // so every sample reads short by about one counter read.
            let mut now;
            loop {
                now = self.clock.now();
                if self.line.load() == sample {
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

impl<L: CacheWord, C: CycleClock> TestCase for OneSided<L, C> {
    type Primary<'a> = Producer<'a, L, C> where Self: 'a;
    type Secondary<'a> = Consumer<'a, L, C> where Self: 'a;
    type Line = L;

    fn name(&self) -> &'static str {
        "one-sided"
    }

    fn set_config(&mut self, config: BenchConfig) {
        self.config = config;
    }

    fn config(&self) -> &BenchConfig {
        &self.config
    }

    fn participants<'a>(&'a mut self, line: &'a L) -> (Producer<'a, L, C>, Consumer<'a, L, C>) {
        // A previous run leaves the flag at Stop
        self.flag.signal(Handshake::Wait);
        let attempts = self.config.attempts();
        (
            Producer {
                line,
                flag: &self.flag,
                clock: &self.clock,
                start_cycles: &mut self.start_cycles,
                attempts,
                nop_delay: self.config.nop_delay,
            },
            Consumer {
                line,
                flag: &self.flag,
                clock: &self.clock,
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
