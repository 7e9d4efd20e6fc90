//! Cycle Counter Access
//!
//! Reads the per-core hardware counter, optionally fused with the access to the
//! measured word so no compiler-scheduled instruction lands between them.
//!
//! The counters of the two cores under test are assumed to be synchronized;
//! nothing here checks that.

use crate::line::SharedCacheLine;
use std::sync::atomic::{compiler_fence, Ordering};

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
use crate::line::CacheWord;
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
use std::arch::asm;

/// Source of timestamps for the timed loops
pub trait CycleClock: Sync {
    fn now(&self) -> u64;
}

/// The hardware cycle counter (TSC on x86_64, the virtual counter on aarch64)
#[derive(Debug, Default, Clone, Copy)]
pub struct Tsc;

impl CycleClock for Tsc {
    #[inline(always)]
    fn now(&self) -> u64 {
        read_cycles()
    }
}

/// Read the counter of the current core.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn read_cycles() -> u64 {
    // SAFETY: rdtsc has no memory effects and is available on every x86_64 CPU.
    unsafe { core::arch::x86_64::_rdtsc() }
}

/// Read the counter of the current core.
#[cfg(target_arch = "aarch64")]
#[inline(always)]
pub fn read_cycles() -> u64 {
    let value: u64;
    // SAFETY: CNTVCT_EL0 is readable from EL0 on every aarch64 OS we run on.
    unsafe {
        asm!("mrs {}, cntvct_el0", out(reg) value, options(nostack, preserves_flags));
    }
    value
}

/// Nanoseconds since first use; stands in for a hardware counter.
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[inline(always)]
pub fn read_cycles() -> u64 {
    use std::time::Instant;
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let start = START.get_or_init(Instant::now);
    start.elapsed().as_nanos() as u64
}

/// Keep the compiler from moving memory accesses across this point.
///
/// Emits no instruction; this is not a memory fence.
#[inline(always)]
pub fn code_barrier() {
    compiler_fence(Ordering::SeqCst);
}

/// Execute `count` no-op instructions.
#[inline(always)]
pub fn nop_delay(count: u32) {
    for _ in 0..count {
        nop();
    }
}

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
#[inline(always)]
fn nop() {
    // SAFETY: a nop touches no state.
    unsafe { asm!("nop", options(nomem, nostack, preserves_flags)) }
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[inline(always)]
fn nop() {
    code_barrier();
}

/// Store `value` into the line and read the counter right after it.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn store_then_read_cycles(line: &SharedCacheLine, value: u64) -> u64 {
    let lo: u32;
    let hi: u32;
    // SAFETY: the pointer comes from a live AtomicU64; an aligned 8-byte mov
    // is a single atomic store on x86_64.
    unsafe {
        asm!(
            "mov qword ptr [{ptr}], {val}",
            "rdtsc",
            ptr = in(reg) line.as_ptr(),
            val = in(reg) value,
            out("eax") lo,
            out("edx") hi,
            options(nostack, preserves_flags),
        );
    }
    ((hi as u64) << 32) | lo as u64
}

/// Load the line and read the counter right after it.
///
/// Returns `(value, cycles)`.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn load_then_read_cycles(line: &SharedCacheLine) -> (u64, u64) {
    let value: u64;
    let lo: u32;
    let hi: u32;
    // SAFETY: the pointer comes from a live AtomicU64; an aligned 8-byte mov
    // is a single atomic load on x86_64.
    unsafe {
        asm!(
            "mov {val}, qword ptr [{ptr}]",
            "rdtsc",
            ptr = in(reg) line.as_ptr(),
            val = out(reg) value,
            out("eax") lo,
            out("edx") hi,
            options(nostack, preserves_flags, readonly),
        );
    }
    (value, ((hi as u64) << 32) | lo as u64)
}

/// Store `value` into the line and read the counter right after it.
#[cfg(target_arch = "aarch64")]
#[inline(always)]
pub fn store_then_read_cycles(line: &SharedCacheLine, value: u64) -> u64 {
    let cycles: u64;
    // SAFETY: the pointer comes from a live AtomicU64; an aligned 64-bit str
    // is single-copy atomic on aarch64.
    unsafe {
        asm!(
            "str {val}, [{ptr}]",
            "mrs {cycles}, cntvct_el0",
            ptr = in(reg) line.as_ptr(),
            val = in(reg) value,
            cycles = out(reg) cycles,
            options(nostack, preserves_flags),
        );
    }
    cycles
}

/// Load the line and read the counter right after it.
///
/// Returns `(value, cycles)`.
#[cfg(target_arch = "aarch64")]
#[inline(always)]
pub fn load_then_read_cycles(line: &SharedCacheLine) -> (u64, u64) {
    let value: u64;
    let cycles: u64;
    // SAFETY: the pointer comes from a live AtomicU64; an aligned 64-bit ldr
    // is single-copy atomic on aarch64.
    unsafe {
        asm!(
            "ldr {val}, [{ptr}]",
            "mrs {cycles}, cntvct_el0",
            ptr = in(reg) line.as_ptr(),
            val = out(reg) value,
            cycles = out(reg) cycles,
            options(nostack, preserves_flags, readonly),
        );
    }
    (value, cycles)
}

/// Store `value` into the line and read the counter right after it.
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[inline(always)]
pub fn store_then_read_cycles(line: &SharedCacheLine, value: u64) -> u64 {
    line.store(value);
    code_barrier();
    read_cycles()
}

/// Load the line and read the counter right after it.
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[inline(always)]
pub fn load_then_read_cycles(line: &SharedCacheLine) -> (u64, u64) {
    let value = line.load();
    code_barrier();
    (value, read_cycles())
}
