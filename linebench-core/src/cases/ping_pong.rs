//! Ping-Pong Transfer
//!
//! Both workers bump the shared counter by compare-and-swap. Each side only
//! advances values it owns (even values for the primary, odd values for the
//! secondary), so a successful CAS hands the line to the peer. The primary
//! times a whole batch of transfers and the duration is amortized over it.

use crate::case::{
    allocate_samples, elapsed_cycles, BenchConfig, Participant, SetupError, TestCase,
};
use crate::clock::{code_barrier, CycleClock, Tsc};
use crate::line::{CacheWord, SharedCacheLine};
use std::iter::StepBy;
use std::marker::PhantomData;
use std::ops::Range;

/// Two-sided CAS exchange over one line
pub struct PingPong<L = SharedCacheLine, C = Tsc> {
    config: BenchConfig,
    clock: C,
    // Both timestamps of an attempt are taken by the primary
    start_cycles: Vec<u64>,
    end_cycles: Vec<u64>,
    _line: PhantomData<fn() -> L>,
}

impl PingPong {
    pub fn new() -> Self {
        Self::with_clock(Tsc)
    }
}

impl Default for PingPong {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: CacheWord, C: CycleClock> PingPong<L, C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            config: BenchConfig::default(),
            clock,
            start_cycles: Vec::new(),
            end_cycles: Vec::new(),
            _line: PhantomData,
        }
    }
}

/// Advance the line from `held` to `held + 1` if it currently holds `held`.
#[inline(always)]
pub fn try_advance<L: CacheWord>(line: &L, held: u64) -> bool {
    line.compare_exchange(held, held + 1).is_ok()
}

/// Values the primary advances during `attempt`: the even values of the
/// attempt's block of `round_trips` transfers.
pub fn primary_turns(attempt: u64, round_trips: u64) -> StepBy<Range<u64>> {
    let base = attempt * round_trips;
    (base..base + round_trips).step_by(2)
}

/// Values the secondary advances over a whole run: every odd value.
pub fn secondary_turns(attempts: u64, round_trips: u64) -> StepBy<Range<u64>> {
    (1..attempts * round_trips).step_by(2)
}

#[inline(always)]
fn advance_spin<L: CacheWord>(line: &L, held: u64) {
    while !try_advance(line, held) {
        std::hint::spin_loop();
    }
}

/// Primary side: owns the even values and times each attempt
pub struct Server<'a, L, C> {
    line: &'a L,
    clock: &'a C,
    start_cycles: &'a mut Vec<u64>,
    end_cycles: &'a mut Vec<u64>,
    attempts: usize,
    round_trips: u64,
}

impl<L: CacheWord, C: CycleClock> Participant for Server<'_, L, C> {
    fn prepare(&mut self) -> Result<(), SetupError> {
        *self.start_cycles = allocate_samples("start cycle", self.attempts)?;
        *self.end_cycles = allocate_samples("end cycle", self.attempts)?;
        Ok(())
    }

    fn work(&mut self) {
        let slots = self.start_cycles.iter_mut().zip(self.end_cycles.iter_mut());

        for (attempt, (start, end)) in slots.enumerate() {
            let attempt = attempt as u64;
            let last = (attempt + 1) * self.round_trips;

            let begin = self.clock.now();
            code_barrier();

            for held in primary_turns(attempt, self.round_trips) {
                advance_spin(self.line, held);
            }
            // The peer's final transfer closes the batch
            while self.line.load() != last {
                std::hint::spin_loop();
            }

            code_barrier();
            *end = self.clock.now();
            *start = begin;
        }
    }
}

/// Secondary side: owns the odd values, records nothing
pub struct Client<'a, L> {
    line: &'a L,
    attempts: u64,
    round_trips: u64,
}

impl<L: CacheWord> Participant for Client<'_, L> {
    fn prepare(&mut self) -> Result<(), SetupError> {
        Ok(())
    }

    fn work(&mut self) {
        for held in secondary_turns(self.attempts, self.round_trips) {
            advance_spin(self.line, held);
        }
    }
}

impl<L: CacheWord, C: CycleClock> TestCase for PingPong<L, C> {
    type Primary<'a> = Server<'a, L, C> where Self: 'a;
    type Secondary<'a> = Client<'a, L> where Self: 'a;
    type Line = L;

    fn name(&self) -> &'static str {
        "ping-pong"
    }

    fn set_config(&mut self, config: BenchConfig) {
        self.config = config;
    }

    fn config(&self) -> &BenchConfig {
        &self.config
    }

    fn participants<'a>(&'a mut self, line: &'a L) -> (Server<'a, L, C>, Client<'a, L>) {
        let round_trips = u64::from(self.config.round_trips);
        (
            Server {
                line,
                clock: &self.clock,
                start_cycles: &mut self.start_cycles,
                end_cycles: &mut self.end_cycles,
                attempts: self.config.attempts(),
                round_trips,
            },
            Client {
                line,
                attempts: u64::from(self.config.attempts_count),
                round_trips,
            },
        )
    }

    /// Cycles per single transfer, amortized over each batch.
    fn durations(&self) -> Vec<Option<f64>> {
        let round_trips = f64::from(self.config.round_trips);
        self.start_cycles
            .iter()
            .zip(&self.end_cycles)
            .map(|(&start, &end)| Some(elapsed_cycles(start, end) / round_trips))
            .collect()
    }
}
