//! Best-effort scheduling hints for worker threads.

use std::io;

/// Scheduling class a worker asks for when its thread starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingClass {
    /// Round-robin real-time at the maximum priority.
    RealTime,
    /// The default time-sliced class.
    #[default]
    TimeSliced,
}

/// Apply `class` to the calling thread.
///
/// Time-sliced is what a new thread already runs with, so only the real-time
/// request touches the scheduler. Callers log the error and carry on: without
/// the needed privilege the worker simply runs time-sliced.
pub fn apply_to_current_thread(class: SchedulingClass) -> io::Result<()> {
    match class {
        SchedulingClass::TimeSliced => Ok(()),
        SchedulingClass::RealTime => set_round_robin_max(),
    }
}

#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
fn set_round_robin_max() -> io::Result<()> {
    // SAFETY: plain libc calls on the current thread with a fully initialized param.
    let priority = unsafe { libc::sched_get_priority_max(libc::SCHED_RR) };
    if priority < 0 {
        return Err(io::Error::last_os_error());
    }
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: `pthread_self` is always valid for the calling thread.
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_RR, &param) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_round_robin_max() -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "real-time scheduling is only wired up on Linux",
    ))
}
