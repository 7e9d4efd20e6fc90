//! LineBench Core
//!
//! Two-worker harness measuring how long a write on one core takes to become
//! visible on another. Provides:
//! - The shared cache line and the handshake flag that paces it
//! - Cycle counter access, fused with line accesses where the target allows
//! - Core pinning and a best-effort counter frequency probe
//! - The test case protocol, its four variants, and the runner driving them

mod affinity;
mod barrier;
mod case;
pub mod cases;
mod clock;
pub mod frequency;
mod line;
mod runner;
mod worker;

pub use affinity::{allowed_cpus, pin_to_cpu, CoreBinder, OsCoreBinder};
pub use barrier::SpinLatch;
pub use case::{
    BenchConfig, ConfigError, Participant, Role, SetupError, TestCase, DEFAULT_ATTEMPTS,
    DEFAULT_NOP_DELAY, DEFAULT_ROUND_TRIPS, DEFAULT_WINDOW,
};
pub use cases::{
    OneSided, OneSidedAsm, OneSidedAsmRelaxedBranchPredictor, ParseModeError, PingPong, TestMode,
};
pub use clock::{
    code_barrier, load_then_read_cycles, nop_delay, read_cycles, store_then_read_cycles,
    CycleClock, Tsc,
};
pub use line::{CacheWord, Handshake, HandshakeFlag, SharedCacheLine};
pub use runner::{surface_failures, RunError, TestRunner, WorkerFailure};
