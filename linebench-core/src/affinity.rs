//! Core Affinity
//!
//! Binds the calling thread to one CPU. Binding is permanent for the life of
//! the thread.

use crate::case::SetupError;
use std::io;

/// Binds the calling execution context to a core
pub trait CoreBinder: Sync {
    fn bind_current(&self, core: usize) -> Result<(), SetupError>;
}

/// Binder backed by the operating system scheduler
#[derive(Debug, Default, Clone, Copy)]
pub struct OsCoreBinder;

impl CoreBinder for OsCoreBinder {
    fn bind_current(&self, core: usize) -> Result<(), SetupError> {
        pin_to_cpu(core).map_err(|source| SetupError::Affinity { core, source })
    }
}

/// Pin the current thread to `core`.
#[cfg(target_os = "linux")]
pub fn pin_to_cpu(core: usize) -> io::Result<()> {
    if core >= libc::CPU_SETSIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("cpu id {} exceeds CPU_SETSIZE", core),
        ));
    }

    // SAFETY: cpu_set_t is plain data; the set is fully initialised by
    // CPU_ZERO before use and `core` was range-checked above.
    let rc = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        libc::pthread_setaffinity_np(
            libc::pthread_self(),
            std::mem::size_of::<libc::cpu_set_t>(),
            &set,
        )
    };

    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

/// Pin the current thread to `core`.
#[cfg(not(target_os = "linux"))]
pub fn pin_to_cpu(_core: usize) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "thread affinity is only supported on Linux",
    ))
}

/// CPUs this process is allowed to run on, in ascending order.
#[cfg(target_os = "linux")]
pub fn allowed_cpus() -> io::Result<Vec<usize>> {
    // SAFETY: cpu_set_t is plain data and sched_getaffinity fills it in.
    let set = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        if libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut set) != 0 {
            return Err(io::Error::last_os_error());
        }
        set
    };

    let cpus = (0..libc::CPU_SETSIZE as usize)
        // SAFETY: the index is below CPU_SETSIZE.
        .filter(|&cpu| unsafe { libc::CPU_ISSET(cpu, &set) })
        .collect();
    Ok(cpus)
}

/// CPUs this process is allowed to run on, in ascending order.
#[cfg(not(target_os = "linux"))]
pub fn allowed_cpus() -> io::Result<Vec<usize>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "cpu enumeration is only supported on Linux",
    ))
}
