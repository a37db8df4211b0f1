//! Bounded worker pool with a degrade-to-sequential policy.
//!
//! Tasks sit in a shared queue drained by `workers` OS threads. Results go
//! back through a channel owned by the caller, so whoever holds the receiver
//! (the checksum scheduler) stays the only writer to the inventory.
//!
//! Spawning a thread can fail (resource limits, sandboxed environments). When
//! that happens the pool stops the workers it already started once their
//! current task is done, then drains the rest of the queue on the calling
//! thread. The same tasks are processed either way; only the parallelism
//! changes.

use std::collections::VecDeque;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Starts worker threads. Swappable so tests can simulate spawn failure.
pub trait Spawner: Send + Sync {
    fn spawn(&self, name: String, work: Box<dyn FnOnce() + Send + 'static>) -> io::Result<JoinHandle<()>>;
}

/// Plain `std::thread::Builder` spawner.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSpawner;

impl Spawner for ThreadSpawner {
    fn spawn(&self, name: String, work: Box<dyn FnOnce() + Send + 'static>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new().name(name).spawn(work)
    }
}

/// What to do when workers cannot be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackPolicy {
    #[default]
    DegradeToSequential,
    /// Stop and leave unprocessed tasks in the report.
    Abort,
}

/// How a run was actually executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Parallel,
    Sequential,
    /// Started parallel, finished on the calling thread after a spawn failure.
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolReport {
    pub mode: ExecutionMode,
    pub workers_started: usize,
    pub completed: usize,
    /// Tasks whose job panicked; the worker survives and moves on.
    pub panicked: usize,
    /// Tasks left in the queue (cancellation or `Abort`).
    pub not_started: usize,
    pub cancelled: bool,
    pub spawn_error: Option<String>,
}

pub struct WorkerPool {
    workers: usize,
    policy: FallbackPolicy,
    spawner: Arc<dyn Spawner>,
    name: String,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            policy: FallbackPolicy::default(),
            spawner: Arc::new(ThreadSpawner),
            name: "worker".to_string(),
        }
    }

    /// Runs every task on the calling thread.
    pub fn sequential() -> Self {
        Self::new(1)
    }

    pub fn with_policy(mut self, policy: FallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `job` over `tasks`, sending each result into `sink`.
    ///
    /// Blocks until the queue is drained, cancelled, or aborted. Call it from
    /// `spawn_blocking` when inside an async runtime. `sink` is dropped on
    /// return, which closes the channel for the receiver.
    pub fn run<T, R, F>(&self, tasks: Vec<T>, job: F, sink: UnboundedSender<R>, cancel: &CancellationToken) -> PoolReport
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::from(tasks)),
            halt: AtomicBool::new(false),
            completed: AtomicUsize::new(0),
            panicked: AtomicUsize::new(0),
        });
        let job = Arc::new(job);

        if self.workers <= 1 {
            drain(&shared, job.as_ref(), &sink, cancel, &AtomicBool::new(false));
            return shared.report(ExecutionMode::Sequential, 0, cancel, None);
        }

        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(self.workers);
        let mut spawn_error: Option<io::Error> = None;
        for i in 0..self.workers {
            let shared_w = shared.clone();
            let job_w = job.clone();
            let sink_w = sink.clone();
            let cancel_w = cancel.clone();
            let work: Box<dyn FnOnce() + Send + 'static> = Box::new(move || {
                drain(&shared_w, job_w.as_ref(), &sink_w, &cancel_w, &shared_w.halt);
            });
            match self.spawner.spawn(format!("{}-{}", self.name, i), work) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    spawn_error = Some(e);
                    break;
                }
            }
        }
        let workers_started = handles.len();

        let Some(err) = spawn_error else {
            join_all(handles, &shared);
            return shared.report(ExecutionMode::Parallel, workers_started, cancel, None);
        };

        // Let running workers finish their current task, then take over alone.
        shared.halt.store(true, Ordering::SeqCst);
        join_all(handles, &shared);
        let reason = format!("could not start {} worker(s): {}", self.workers - workers_started, err);

        match self.policy {
            FallbackPolicy::DegradeToSequential => {
                warn!(
                    "{} pool degraded to sequential execution after starting {} of {} workers: {}",
                    self.name, workers_started, self.workers, err
                );
                drain(&shared, job.as_ref(), &sink, cancel, &AtomicBool::new(false));
                shared.report(ExecutionMode::Degraded, workers_started, cancel, Some(reason))
            }
            FallbackPolicy::Abort => {
                warn!("{} pool aborted: {}", self.name, reason);
                shared.report(ExecutionMode::Parallel, workers_started, cancel, Some(reason))
            }
        }
    }
}

struct Shared<T> {
    queue: Mutex<VecDeque<T>>,
    halt: AtomicBool,
    completed: AtomicUsize,
    panicked: AtomicUsize,
}

impl<T> Shared<T> {
    fn next(&self) -> Option<T> {
        match self.queue.lock() {
            Ok(mut q) => q.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        }
    }

    fn remaining(&self) -> usize {
        match self.queue.lock() {
            Ok(q) => q.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    fn report(
        &self,
        mode: ExecutionMode,
        workers_started: usize,
        cancel: &CancellationToken,
        spawn_error: Option<String>,
    ) -> PoolReport {
        PoolReport {
            mode,
            workers_started,
            completed: self.completed.load(Ordering::SeqCst),
            panicked: self.panicked.load(Ordering::SeqCst),
            not_started: self.remaining(),
            cancelled: cancel.is_cancelled(),
            spawn_error,
        }
    }
}

fn drain<T, R, F>(shared: &Shared<T>, job: &F, sink: &UnboundedSender<R>, cancel: &CancellationToken, halt: &AtomicBool)
where
    F: Fn(T) -> R,
{
    loop {
        if cancel.is_cancelled() || halt.load(Ordering::SeqCst) {
            break;
        }
        let Some(task) = shared.next() else { break };
        match catch_unwind(AssertUnwindSafe(|| job(task))) {
            Ok(result) => {
                shared.completed.fetch_add(1, Ordering::SeqCst);
                if sink.send(result).is_err() {
                    // Receiver gone; nobody will persist further results.
                    debug!("result channel closed, stopping worker");
                    break;
                }
            }
            Err(_) => {
                shared.panicked.fetch_add(1, Ordering::SeqCst);
                warn!("worker task panicked; continuing with next task");
            }
        }
    }
}

fn join_all<T>(handles: Vec<JoinHandle<()>>, shared: &Shared<T>) {
    for handle in handles {
        if handle.join().is_err() {
            // drain() catches job panics, so this is a panic in the loop itself.
            shared.panicked.fetch_add(1, Ordering::SeqCst);
        }
    }
}
