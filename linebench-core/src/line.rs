//! Shared Cache Line and Handshake Flag
//!
//! The measured word and the pacing signal each sit alone in their own padded
//! block, so the only coherence traffic on the measured line is the traffic
//! the test creates.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicI8, AtomicU64, Ordering};

/// A word both workers can reach.
///
/// All operations are Relaxed: ordering with respect to other memory is never
/// needed, only the coherence of this one word.
pub trait CacheWord: Default + Sync {
    fn load(&self) -> u64;
    fn store(&self, value: u64);
    fn compare_exchange(&self, current: u64, new: u64) -> Result<u64, u64>;
}

/// One atomic word padded out to its own cache line (two lines on targets
/// with adjacent-line prefetch).
#[derive(Debug, Default)]
pub struct SharedCacheLine {
    word: CachePadded<AtomicU64>,
}

impl SharedCacheLine {
    pub const fn new() -> Self {
        Self {
            word: CachePadded::new(AtomicU64::new(0)),
        }
    }

    /// Raw address of the word, for the fused access sequences
    #[inline(always)]
    pub(crate) fn as_ptr(&self) -> *mut u64 {
        self.word.as_ptr()
    }
}

impl CacheWord for SharedCacheLine {
    #[inline(always)]
    fn load(&self) -> u64 {
        self.word.load(Ordering::Relaxed)
    }

    #[inline(always)]
    fn store(&self, value: u64) {
        self.word.store(value, Ordering::Relaxed);
    }

    #[inline(always)]
    fn compare_exchange(&self, current: u64, new: u64) -> Result<u64, u64> {
        self.word
            .compare_exchange(current, new, Ordering::Relaxed, Ordering::Relaxed)
    }
}

/// Pacing signal used by the one-sided variants
#[repr(i8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// Producer must not publish yet
    Wait = 0,
    /// Consumer is polling and wants the next sample
    Go = 1,
    /// Consumer is done; producer leaves its loop
    Stop = -1,
}

impl Handshake {
    #[inline(always)]
    fn from_raw(raw: i8) -> Self {
        match raw {
            1 => Handshake::Go,
            -1 => Handshake::Stop,
            _ => Handshake::Wait,
        }
    }
}

/// Tri-state flag, padded away from the measured line.
///
/// Every access is Relaxed.
#[derive(Debug, Default)]
pub struct HandshakeFlag {
    state: CachePadded<AtomicI8>,
}

impl HandshakeFlag {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn load(&self) -> Handshake {
        Handshake::from_raw(self.state.load(Ordering::Relaxed))
    }

    #[inline(always)]
    pub fn signal(&self, state: Handshake) {
        self.state.store(state as i8, Ordering::Relaxed);
    }

    /// Spin until the consumer asks for a sample and take the request.
    ///
    /// Returns `false` once the consumer has signalled [`Handshake::Stop`].
    /// The request is taken with a compare-exchange so a `Stop` written at
    /// the same moment is never overwritten with `Wait`.
    #[inline]
    pub fn wait_for_go(&self) -> bool {
        loop {
            match self.load() {
                Handshake::Go => {
                    if self
                        .state
                        .compare_exchange(
                            Handshake::Go as i8,
                            Handshake::Wait as i8,
                            Ordering::Relaxed,
                            Ordering::Relaxed,
                        )
                        .is_ok()
                    {
                        return true;
                    }
                }
                Handshake::Stop => return false,
                Handshake::Wait => {}
            }
        }
    }
}
