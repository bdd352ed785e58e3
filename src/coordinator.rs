//! Starts workers on their own threads, stops them together and collects outcomes.

use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, TryLockError};
use std::thread::{self, JoinHandle};

use tracing::{error, info, warn};

use crate::error::{PipelineError, Result};
use crate::realtime::{self, SchedulingClass};
use crate::worker::{run_worker, StopFlag, ThreadEnvironment, Worker, WorkerOutcome, WorkerPhase};

/// Body of a worker thread.
pub type WorkerBody = Box<dyn FnOnce() -> WorkerOutcome + Send>;

/// Spawns worker threads.
pub trait Launcher {
    /// Start `body` on a new thread called `name` with the `scheduling` hint.
    fn launch(
        &self,
        name: &'static str,
        scheduling: SchedulingClass,
        body: WorkerBody,
    ) -> io::Result<JoinHandle<WorkerOutcome>>;
}

/// Named OS threads; the scheduling hint is applied by the thread itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadLauncher;

impl Launcher for ThreadLauncher {
    fn launch(
        &self,
        name: &'static str,
        scheduling: SchedulingClass,
        body: WorkerBody,
    ) -> io::Result<JoinHandle<WorkerOutcome>> {
        thread::Builder::new().name(name.to_owned()).spawn(move || {
            if let Err(err) = realtime::apply_to_current_thread(scheduling) {
                warn!(worker = name, ?scheduling, error = %err, "scheduling hint not applied");
            }
            body()
        })
    }
}

type Hook = Arc<dyn Fn() + Send + Sync>;

/// Callbacks run after every stop flag is raised, most recent first.
#[derive(Clone, Default)]
pub struct ShutdownHooks(Arc<Mutex<Vec<Hook>>>);

impl ShutdownHooks {
    /// Add a callback.
    pub fn register<F: Fn() + Send + Sync + 'static>(&self, hook: F) {
        match self.0.lock() {
            Ok(mut hooks) => hooks.push(Arc::new(hook)),
            Err(poisoned) => poisoned.into_inner().push(Arc::new(hook)),
        }
    }

    /// Run every callback, newest first. Skips them if a registration is in flight.
    fn run(&self) {
        let hooks: Vec<Hook> = match self.0.try_lock() {
            Ok(hooks) => hooks.iter().rev().cloned().collect(),
            Err(TryLockError::Poisoned(poisoned)) => {
                poisoned.into_inner().iter().rev().cloned().collect()
            }
            Err(TryLockError::WouldBlock) => {
                warn!("shutdown hooks busy, skipping");
                return;
            }
        };
        for hook in hooks {
            hook();
        }
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.0.lock().map_or_else(|poisoned| poisoned.into_inner().len(), |hooks| hooks.len())
    }

    /// Whether no callback is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ShutdownHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownHooks").field("len", &self.len()).finish()
    }
}

/// Raises every worker's stop flag; safe to call from a signal handler thread.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    flags: Vec<(&'static str, StopFlag)>,
    hooks: ShutdownHooks,
}

impl InterruptHandle {
    /// Raise the stop flags in registration order, then run the shutdown hooks.
    /// Never blocks.
    pub fn interrupt(&self) {
        for (name, flag) in &self.flags {
            flag.raise();
            info!(worker = name, "stop requested");
        }
        self.hooks.run();
    }
}

/// Outcome of every registered worker, in registration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    outcomes: Vec<(&'static str, WorkerOutcome)>,
    launched_all: bool,
}

impl PipelineReport {
    /// Per-worker outcomes.
    pub fn outcomes(&self) -> &[(&'static str, WorkerOutcome)] {
        &self.outcomes
    }

    /// Outcome of the worker called `name`.
    pub fn outcome(&self, name: &str) -> Option<WorkerOutcome> {
        self.outcomes
            .iter()
            .find(|(worker, _)| *worker == name)
            .map(|(_, outcome)| *outcome)
    }

    /// Every worker launched and every worker succeeded.
    pub fn is_success(&self) -> bool {
        self.launched_all
            && self
                .outcomes
                .iter()
                .all(|(_, outcome)| *outcome == WorkerOutcome::Success)
    }

    /// Process exit status.
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.is_success())
    }
}

struct Entry {
    env: ThreadEnvironment,
    scheduling: SchedulingClass,
    worker: Option<Box<dyn Worker>>,
    handle: Option<JoinHandle<WorkerOutcome>>,
}

/// Owns the workers from registration until they are joined.
pub struct Coordinator<L: Launcher = ThreadLauncher> {
    launcher: L,
    entries: Vec<Entry>,
    hooks: ShutdownHooks,
    launched_all: bool,
}

impl Default for Coordinator<ThreadLauncher> {
    fn default() -> Self {
        Self::new()
    }
}

impl Coordinator<ThreadLauncher> {
    /// Coordinator spawning plain named threads.
    pub fn new() -> Self {
        Self::with_launcher(ThreadLauncher)
    }
}

impl<L: Launcher> Coordinator<L> {
    /// Coordinator spawning through `launcher`.
    pub fn with_launcher(launcher: L) -> Self {
        Self {
            launcher,
            entries: Vec::new(),
            hooks: ShutdownHooks::default(),
            launched_all: false,
        }
    }

    /// Add a worker. Workers start, stop and are joined in registration order.
    ///
    /// Returns the worker's environment so callers can watch its phase.
    pub fn register<W: Worker>(&mut self, worker: W) -> ThreadEnvironment {
        let env = ThreadEnvironment::new(worker.name());
        self.entries.push(Entry {
            env: env.clone(),
            scheduling: worker.scheduling(),
            worker: Some(Box::new(worker)),
            handle: None,
        });
        env
    }

    /// Add a callback run on interrupt after every stop flag is raised.
    pub fn register_shutdown_hook<F: Fn() + Send + Sync + 'static>(&self, hook: F) {
        self.hooks.register(hook);
    }

    /// Handle raising the stop flags of every worker registered so far.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            flags: self.flags(),
            hooks: self.hooks.clone(),
        }
    }

    fn flags(&self) -> Vec<(&'static str, StopFlag)> {
        self.entries
            .iter()
            .map(|entry| (entry.env.name(), entry.env.quit().clone()))
            .collect()
    }

    /// Launch every registered worker.
    ///
    /// A worker that fails raises every stop flag. If a launch fails, the
    /// workers already running are asked to stop and the rest are never
    /// started; [`Coordinator::join`] must still be called.
    pub fn start(&mut self) -> Result<()> {
        let everyone: Arc<[(&'static str, StopFlag)]> = self.flags().into();

        for index in 0..self.entries.len() {
            let Some(entry) = self.entries.get_mut(index) else {
                break;
            };
            let Some(mut worker) = entry.worker.take() else {
                continue;
            };
            let env = entry.env.clone();
            let name = env.name();
            let peers = Arc::clone(&everyone);

            let body: WorkerBody = Box::new(move || {
                // A panic still has to stop the peers, or join() waits on them forever.
                let run = AssertUnwindSafe(|| run_worker(&mut *worker, &env));
                let outcome = panic::catch_unwind(run).unwrap_or_else(|_| {
                    error!(worker = name, "worker panicked");
                    env.enter(WorkerPhase::Stopped);
                    WorkerOutcome::Failure
                });
                if outcome == WorkerOutcome::Failure {
                    warn!(worker = name, "worker failed, stopping the pipeline");
                    for (_, flag) in peers.iter() {
                        flag.raise();
                    }
                }
                outcome
            });

            match self.launcher.launch(name, entry.scheduling, body) {
                Ok(handle) => {
                    info!(worker = name, scheduling = ?entry.scheduling, "worker launched");
                    entry.handle = Some(handle);
                }
                Err(source) => {
                    error!(worker = name, error = %source, "failed to launch worker");
                    for launched in self.entries.iter().take(index) {
                        launched.env.quit().raise();
                    }
                    return Err(PipelineError::Launch { worker: name, source });
                }
            }
        }

        self.launched_all = true;
        info!(workers = self.entries.len(), "all application threads started");
        Ok(())
    }

    /// Wait for every launched worker, in registration order.
    pub fn join(&mut self) -> PipelineReport {
        let mut outcomes = Vec::with_capacity(self.entries.len());
        for entry in &mut self.entries {
            let name = entry.env.name();
            let outcome = match entry.handle.take() {
                Some(handle) => match handle.join() {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        error!(worker = name, "worker panicked");
                        WorkerOutcome::Failure
                    }
                },
                None => WorkerOutcome::Running,
            };
            info!(worker = name, ?outcome, "worker joined");
            outcomes.push((name, outcome));
        }

        PipelineReport {
            outcomes,
            launched_all: self.launched_all,
        }
    }
}
