//! Worker Thread Entry Point
//!
//! Runs one side of a test case: bind, prepare, rendezvous, work. Setup
//! failures are parked in the worker's own slot and never cross the thread
//! boundary as a panic or an error value.

use crate::affinity::CoreBinder;
use crate::barrier::SpinLatch;
use crate::case::{Participant, Role, SetupError};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{fence, Ordering};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Per-worker failure slot, written at most once before the rendezvous.
/// Slots are indexed by [`Role::index`].
pub(crate) type FailureSlot = OnceLock<SetupError>;

/// Run one worker to completion.
///
/// Returns `true` if the timed phase ran. The worker skips its work when it
/// or its peer failed to set up: a healthy side would otherwise spin forever
/// on data the failed side never produces.
pub(crate) fn worker_main<P: Participant>(
    role: Role,
    core: usize,
    binder: &dyn CoreBinder,
    participant: &mut P,
    latch: &SpinLatch,
    slots: &[FailureSlot; 2],
) -> bool {
    let own = &slots[role.index()];
    let peer = &slots[role.peer().index()];

    let setup = catch_unwind(AssertUnwindSafe(|| {
        binder.bind_current(core)?;
        debug!(%role, core, "bound to core");
        participant.prepare()
    }))
    .unwrap_or_else(|panic| Err(SetupError::Panicked(panic_message(panic.as_ref()))));

    match setup {
        Ok(()) => debug!(%role, "prepared"),
        Err(err) => {
            warn!(%role, error = %err, "setup failed");
            let _ = own.set(err);
        }
    }

    // The latch itself is Relaxed; these fences carry the failure slots
    // across it.
    fence(Ordering::Release);
    latch.arrive_and_wait();
    fence(Ordering::Acquire);

    if own.get().is_some() || peer.get().is_some() {
        debug!(%role, "skipping timed phase");
        return false;
    }

    participant.work();
    true
}

/// Text of a caught panic payload
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
