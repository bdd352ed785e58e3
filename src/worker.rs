//! Worker lifecycle: stop flags, phases, outcomes and the resource ledger.
//!
//! Every worker walks `Init → Running → Draining → Stopped`. Resources are
//! acquired through a [`ResourceLedger`], which hands back [`Acquired`]
//! guards. Guards live as locals of the worker body, so whichever way the body
//! exits they are closed in reverse acquisition order, and a resource whose
//! open call failed (or was never reached) is never closed.

use std::cell::RefCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::realtime::SchedulingClass;
use crate::traits::Close;

/// Monotonic stop request shared between the coordinator and one worker.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    /// Create a lowered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the worker to stop. There is no way to lower the flag again.
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether a stop has been requested.
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Lifecycle phase of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerPhase {
    /// Acquiring devices and buffers.
    Init = 0,
    /// Processing loop.
    Running = 1,
    /// Releasing resources in reverse acquisition order.
    Draining = 2,
    /// Terminal.
    Stopped = 3,
}

impl WorkerPhase {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Init,
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// Result of a worker as seen by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Not finished yet, or never joined.
    Running,
    /// Stopped on request with every resource released.
    Success,
    /// Stopped because of an error.
    Failure,
}

/// Per-worker shared state: its name, stop flag and observable phase.
#[derive(Debug, Clone)]
pub struct ThreadEnvironment {
    name: &'static str,
    quit: StopFlag,
    phase: Arc<AtomicU8>,
}

impl ThreadEnvironment {
    /// Fresh environment for the worker called `name`.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            quit: StopFlag::new(),
            phase: Arc::new(AtomicU8::new(WorkerPhase::Init as u8)),
        }
    }

    /// Worker name.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// The worker's stop flag.
    pub const fn quit(&self) -> &StopFlag {
        &self.quit
    }

    /// Whether the worker has been asked to stop.
    pub fn should_quit(&self) -> bool {
        self.quit.is_raised()
    }

    /// Current phase.
    pub fn phase(&self) -> WorkerPhase {
        WorkerPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub(crate) fn enter(&self, phase: WorkerPhase) {
        let previous = WorkerPhase::from_u8(self.phase.swap(phase as u8, Ordering::AcqRel));
        if previous != phase {
            debug!(worker = self.name, from = ?previous, to = ?phase, "phase change");
        }
    }
}

/// One subsystem loop run on its own thread.
pub trait Worker: Send + 'static {
    /// Name used for the thread and in logs.
    fn name(&self) -> &'static str;

    /// Scheduling class requested for the worker thread.
    fn scheduling(&self) -> SchedulingClass {
        SchedulingClass::TimeSliced
    }

    /// Acquire resources through `ledger`, then process until `env` asks to quit.
    ///
    /// Returns the first fatal error. Resources acquired through the ledger are
    /// released when this returns.
    fn execute(&mut self, env: &ThreadEnvironment, ledger: &ResourceLedger) -> Result<()>;
}

/// Run `worker` to completion and report its outcome. Never panics on worker errors.
pub fn run_worker<W: Worker + ?Sized>(worker: &mut W, env: &ThreadEnvironment) -> WorkerOutcome {
    env.enter(WorkerPhase::Init);
    let ledger = ResourceLedger::new(env.clone());

    let result = worker.execute(env, &ledger);
    ledger.begin_drain();
    let leaked = ledger.held();
    if !leaked.is_empty() {
        warn!(worker = env.name(), resources = ?leaked, "resources still held after drain");
    }
    env.enter(WorkerPhase::Stopped);

    match result {
        Ok(()) => {
            info!(worker = env.name(), "worker exited with SUCCESS status");
            WorkerOutcome::Success
        }
        Err(err) => {
            error!(worker = env.name(), error = %err, "worker exited with FAILURE status");
            WorkerOutcome::Failure
        }
    }
}

/// Ordered record of the resources a worker currently holds.
#[derive(Debug)]
pub struct ResourceLedger {
    env: ThreadEnvironment,
    held: RefCell<Vec<&'static str>>,
    released: RefCell<Vec<&'static str>>,
}

impl ResourceLedger {
    /// Empty ledger reporting phase changes to `env`.
    pub fn new(env: ThreadEnvironment) -> Self {
        Self {
            env,
            held: RefCell::new(Vec::new()),
            released: RefCell::new(Vec::new()),
        }
    }

    /// Open a resource and record it. On failure nothing is recorded and the
    /// worker moves to `Draining`.
    pub fn acquire<T, F>(&self, label: &'static str, open: F) -> Result<Acquired<'_, T>>
    where
        T: Close,
        F: FnOnce() -> Result<T>,
    {
        match open() {
            Ok(inner) => {
                self.held.borrow_mut().push(label);
                debug!(worker = self.env.name(), resource = label, "acquired");
                Ok(Acquired {
                    ledger: self,
                    label,
                    inner,
                })
            }
            Err(err) => {
                error!(
                    worker = self.env.name(),
                    resource = label,
                    error = %err,
                    "failed to acquire"
                );
                self.begin_drain();
                Err(err)
            }
        }
    }

    /// Mark initialization as complete.
    pub fn running(&self) {
        self.env.enter(WorkerPhase::Running);
    }

    /// Enter `Draining` if not already there.
    pub fn begin_drain(&self) {
        if matches!(self.env.phase(), WorkerPhase::Init | WorkerPhase::Running) {
            self.env.enter(WorkerPhase::Draining);
        }
    }

    /// Labels currently held, in acquisition order.
    pub fn held(&self) -> Vec<&'static str> {
        self.held.borrow().clone()
    }

    /// Labels released so far, in release order.
    pub fn released(&self) -> Vec<&'static str> {
        self.released.borrow().clone()
    }

    fn release<T: Close>(&self, label: &'static str, resource: &mut T) {
        self.begin_drain();
        {
            let mut held = self.held.borrow_mut();
            match held.iter().rposition(|held| *held == label) {
                Some(pos) if pos + 1 == held.len() => {
                    held.pop();
                }
                Some(pos) => {
                    warn!(worker = self.env.name(), resource = label, "released out of order");
                    held.remove(pos);
                }
                None => {
                    warn!(worker = self.env.name(), resource = label, "released twice");
                    return;
                }
            }
        }

        match resource.close() {
            Ok(()) => debug!(worker = self.env.name(), resource = label, "released"),
            Err(err) => {
                warn!(worker = self.env.name(), resource = label, error = %err, "release failed");
            }
        }
        self.released.borrow_mut().push(label);
    }
}

/// A resource recorded in a [`ResourceLedger`]; closed when dropped.
#[derive(Debug)]
pub struct Acquired<'l, T: Close> {
    ledger: &'l ResourceLedger,
    label: &'static str,
    inner: T,
}

impl<T: Close> Acquired<'_, T> {
    /// Ledger label of the resource.
    pub const fn label(&self) -> &'static str {
        self.label
    }
}

impl<T: Close> Deref for Acquired<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: Close> DerefMut for Acquired<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T: Close> Drop for Acquired<'_, T> {
    fn drop(&mut self) {
        self.ledger.release(self.label, &mut self.inner);
    }
}
