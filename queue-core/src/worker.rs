//! A dedicated OS thread that watches one primary priority and an ordered
//! list of fallback priorities.
//!
//! The main loop's shape — block until woken, dispatch one unit of work,
//! loop, exit on a stop signal — runs on a plain `std::thread` per worker
//! rather than an async task, so priorities genuinely run in parallel
//! instead of sharing a single executor's cooperative scheduling.

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::bounded;
use crossbeam::channel::Receiver;
use crossbeam::channel::Sender;
use rand::Rng;
use thiserror::Error;

use crate::collaborators::Logger;
use crate::job::JobOutcome;
use crate::metrics::Metrics;
use crate::queue::Queue;
use crate::PriorityTag;

std::thread_local! {
    static ON_WORKER_THREAD: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// True if the current thread is inside a worker's `run_loop`, i.e.
/// somewhere on the call stack below a [`crate::job::Job::work`]
/// invocation. Lets a reentrant caller (e.g. a router dispatching a
/// follow-up job from inside a handler) detect that it is already
/// running on the very thread it would otherwise block waiting on.
pub fn is_worker_thread() -> bool {
    ON_WORKER_THREAD.with(|flag| flag.get())
}

struct WorkerThreadGuard(bool);

impl WorkerThreadGuard {
    fn enter() -> Self {
        let was_set = ON_WORKER_THREAD.with(|flag| flag.replace(true));
        WorkerThreadGuard(was_set)
    }
}

impl Drop for WorkerThreadGuard {
    fn drop(&mut self) {
        ON_WORKER_THREAD.with(|flag| flag.set(self.0));
    }
}

/// Bounded so a burst of same-priority notifications can't grow memory
/// unbounded; a full channel means the worker will find the job on its
/// own next queue check anyway, so coalescing (drop-on-full) is safe.
const NOTIFY_CHANNEL_CAPACITY: usize = 16;

/// Base interval a worker polls the queue if it never gets an explicit
/// wake — this is the `recv_timeout` backstop, not the primary wake path.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawnFailed(#[from] std::io::Error),
    #[error("worker was already started")]
    AlreadyStarted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    New,
    Running,
    Stopping,
    Stopped,
}

/// One worker's thread-lifecycle handle. Created detached; [`Pool::append`]
/// injects the shared queue and logger, after which [`Worker::start`] spawns
/// the thread.
pub struct Worker<P: PriorityTag> {
    primary: P,
    fallbacks: Vec<P>,
    queue: Option<Arc<dyn Queue<P>>>,
    logger: Option<Arc<dyn Logger>>,
    metrics: Arc<Metrics>,
    stop: Arc<AtomicBool>,
    drain: Arc<AtomicBool>,
    notify_tx: Sender<P>,
    notify_rx: Option<Receiver<P>>,
    join: Option<JoinHandle<()>>,
    state: WorkerState,
}

impl<P: PriorityTag> fmt::Debug for Worker<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("primary", &self.primary)
            .field("fallbacks", &self.fallbacks)
            .field("state", &self.state)
            .finish()
    }
}

impl<P: PriorityTag> Worker<P> {
    pub fn new(primary: P, fallbacks: Vec<P>) -> Self {
        let (notify_tx, notify_rx) = bounded(NOTIFY_CHANNEL_CAPACITY);
        Worker {
            primary,
            fallbacks,
            queue: None,
            logger: None,
            metrics: Arc::new(Metrics::new()),
            stop: Arc::new(AtomicBool::new(false)),
            drain: Arc::new(AtomicBool::new(true)),
            notify_tx,
            notify_rx: Some(notify_rx),
            join: None,
            state: WorkerState::New,
        }
    }

    pub fn primary(&self) -> P {
        self.primary
    }

    pub fn fallbacks(&self) -> &[P] {
        &self.fallbacks
    }

    /// True if a `notification(p)` should be fanned out to this worker:
    /// `p` is either the primary priority or one of the fallbacks.
    pub fn watches(&self, priority: P) -> bool {
        self.primary == priority || self.fallbacks.contains(&priority)
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Overrides the default [`Metrics`] collaborator (one per worker by
    /// default) with a shared instance, useful when the embedder wants
    /// process-wide counters rather than per-worker ones.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub(crate) fn attach(&mut self, queue: Arc<dyn Queue<P>>, logger: Arc<dyn Logger>) {
        self.queue = Some(queue);
        self.logger = Some(logger);
    }

    /// Non-blocking; a full channel coalesces (drops) this notification,
    /// which is safe because the worker's wake predicate re-checks the
    /// queue directly on every wake and on every poll timeout.
    pub(crate) fn notify(&self, priority: P) {
        let _ = self.notify_tx.try_send(priority);
    }

    /// Spawns the worker's thread. Idempotent-unsafe: calling twice
    /// returns [`WorkerError::AlreadyStarted`].
    pub fn start(&mut self) -> Result<(), WorkerError> {
        if self.join.is_some() {
            return Err(WorkerError::AlreadyStarted);
        }
        let queue = self.queue.clone().expect("Worker::attach called before start");
        let logger = self.logger.clone().expect("Worker::attach called before start");
        let metrics = self.metrics.clone();
        let primary = self.primary;
        let fallbacks = self.fallbacks.clone();
        let stop = self.stop.clone();
        let drain = self.drain.clone();
        let notify_rx = self
            .notify_rx
            .take()
            .expect("Worker::start called more than once");

        let handle = thread::Builder::new()
            .name(format!("worker-{primary:?}"))
            .spawn(move || {
                run_loop(primary, fallbacks, queue, logger, metrics, stop, drain, notify_rx)
            })?;

        self.join = Some(handle);
        self.state = WorkerState::Running;
        Ok(())
    }

    /// Signals the worker to stop. `drain = true` lets it finish every
    /// job already queued at its priorities before exiting; `drain =
    /// false` lets only the job currently executing (if any) finish.
    /// Does not block — call [`Worker::join`] to wait for thread exit.
    pub fn stop(&mut self, drain: bool) {
        self.drain.store(drain, Ordering::Release);
        self.stop.store(true, Ordering::Release);
        self.state = WorkerState::Stopping;
        self.notify(self.primary);
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.join.take() {
            let _ = handle.join();
        }
        self.state = WorkerState::Stopped;
    }
}

#[allow(clippy::too_many_arguments)]
fn run_loop<P: PriorityTag>(
    primary: P,
    fallbacks: Vec<P>,
    queue: Arc<dyn Queue<P>>,
    logger: Arc<dyn Logger>,
    metrics: Arc<Metrics>,
    stop: Arc<AtomicBool>,
    drain: Arc<AtomicBool>,
    notify_rx: Receiver<P>,
) {
    loop {
        if stop.load(Ordering::Acquire) && !drain.load(Ordering::Acquire) {
            break;
        }
        match queue.dequeue(primary, &fallbacks) {
            Some(mut job) => {
                let job_priority = job.priority();
                let priority_label = format!("{job_priority:?}");
                metrics.increment_jobs_received(&priority_label);
                let start = logger.chrono_start();
                let result = {
                    let _guard = WorkerThreadGuard::enter();
                    job.work(primary)
                };
                metrics.observe_job_duration(&priority_label, start.elapsed().as_secs_f64());
                match &result {
                    Ok(()) => metrics.increment_jobs_completed(&priority_label),
                    Err(_) => metrics.increment_jobs_failed(&priority_label),
                }
                let outcome = JobOutcome {
                    job_priority,
                    worker_priority: primary,
                    result: result.map_err(|e| e.to_string()),
                };
                outcome.log(&*logger, start);
            }
            None => {
                if stop.load(Ordering::Acquire) {
                    break;
                }
                let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..25));
                let _ = notify_rx.recv_timeout(POLL_INTERVAL + jitter);
            }
        }
    }
}
