//! The thread-safe, multi-priority job queue.
//!
//! Two implementations share one [`Queue`] trait: [`locking::LockingQueue`]
//! (a mutex + condvar guarding a per-priority FIFO map) and
//! [`lockfree::LockFreeQueue`] (per-priority `crossbeam::queue::SegQueue`
//! lanes with epoch-based retirement stats), plus [`AdaptiveQueue`], which
//! starts on the mutex variant and promotes to the lock-free one once a
//! contention counter crosses a threshold (`queue_strategy = adaptive`).

pub mod locking;
pub mod lockfree;

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use thiserror::Error;

use crate::job::Job;
use crate::PriorityTag;

pub use locking::LockingQueue;
pub use lockfree::LockFreeQueue;

/// Errors a producer or the queue itself can report. All are retry-safe
/// except `Shutdown`, which is terminal.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is push-locked")]
    PushLocked,
    #[error("priority's FIFO is at capacity")]
    QueueFull,
    #[error("queue has been shut down")]
    Shutdown,
    #[error("dequeue deadline elapsed")]
    Timeout,
}

/// The queue's one-way shutdown state machine: `Open` is the normal
/// operating state; `Draining` rejects new pushes but still serves
/// dequeues; `Closed` has released every waiter and dropped every pending
/// job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Open,
    Draining,
    Closed,
}

/// A snapshot of queue occupancy and (for the lock-free variant) memory
/// reclamation counters.
#[derive(Debug, Clone)]
pub struct QueueStats<P> {
    pub pending_per_priority: Vec<(P, usize)>,
    pub retired_nodes: usize,
    pub reclaimed_nodes: usize,
}

impl<P: PriorityTag> QueueStats<P> {
    pub fn total_pending(&self) -> usize {
        self.pending_per_priority.iter().map(|(_, n)| n).sum()
    }
}

/// Result of [`Queue::enqueue_batch`]: jobs that failed are handed back to
/// the caller rather than dropped, so every enqueue failure either
/// succeeds or is returned to whoever called it.
pub struct BatchEnqueueReport<P> {
    pub succeeded: usize,
    pub rejected: Vec<(Job<P>, QueueError)>,
}

/// The shared contract both queue implementations satisfy. Generic over
/// any [`PriorityTag`] — the queue has no opinion on what a "priority"
/// means beyond equality and hashing.
pub trait Queue<P: PriorityTag>: Send + Sync {
    fn enqueue(&self, job: Job<P>) -> Result<(), QueueError>;

    /// Atomic per job: a rejected job is handed back in the report rather
    /// than dropped.
    fn enqueue_batch(&self, jobs: Vec<Job<P>>) -> BatchEnqueueReport<P>;

    /// Non-blocking: tries `primary`, then each of `fallbacks` in order,
    /// returning the oldest job in the first non-empty FIFO.
    fn dequeue(&self, primary: P, fallbacks: &[P]) -> Option<Job<P>>;

    /// Blocks until a job is available, the deadline elapses, or the
    /// queue closes.
    fn dequeue_blocking(
        &self,
        primary: P,
        fallbacks: &[P],
        deadline: Instant,
    ) -> Result<Job<P>, QueueError>;

    fn dequeue_batch(&self, limit: usize) -> Vec<Job<P>>;

    /// Observational only: same ordering rule as [`Queue::dequeue`] but
    /// never removes anything.
    fn contains(&self, primary: P, fallbacks: &[P]) -> bool;

    fn set_push_locked(&self, locked: bool);

    fn clear(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_shutdown(&self) -> bool;

    /// Registers a non-blocking callback invoked (on the enqueueing
    /// thread) after every successful enqueue.
    fn add_notifier(&self, notifier: Box<dyn Fn(P) + Send + Sync>);

    fn stats(&self) -> QueueStats<P>;

    /// `Open -> Draining`: push_locked becomes true, pending jobs remain
    /// dequeueable.
    fn begin_drain(&self);

    /// `Draining -> Closed` (or `Open -> Closed` directly): drops every
    /// pending job and releases every blocked waiter with
    /// [`QueueError::Shutdown`].
    fn close(&self);
}

/// Selects which backing implementation a freshly constructed queue uses.
/// `Adaptive` starts on the mutex variant and promotes to lock-free once
/// contention crosses a fixed threshold; it never demotes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStrategy {
    Mutex,
    LockFree,
    Adaptive,
}

/// Construction options shared by both backing implementations.
#[derive(Debug, Clone)]
pub struct QueueOptions<P> {
    pub priorities: Vec<P>,
    pub bounded_capacity: usize,
    /// Number of observed lock-contention events (failed `try_lock`s on
    /// the mutex variant) before [`AdaptiveQueue`] promotes to lock-free.
    pub adaptive_promotion_threshold: usize,
}

impl<P> Default for QueueOptions<P> {
    fn default() -> Self {
        QueueOptions {
            priorities: Vec::new(),
            bounded_capacity: 0,
            adaptive_promotion_threshold: 64,
        }
    }
}

impl<P> QueueOptions<P> {
    /// Builds options from a loaded [`crate::config::QueueConfig`], pairing
    /// its `bounded_capacity`/`adaptive_promotion_threshold` with the
    /// caller-supplied priority set (the config file has no way to name a
    /// `P`, so callers still provide that list themselves).
    pub fn from_config(config: &crate::config::QueueConfig, priorities: Vec<P>) -> Self {
        QueueOptions {
            priorities,
            bounded_capacity: config.bounded_capacity,
            adaptive_promotion_threshold: config.adaptive_promotion_threshold,
        }
    }
}

/// Constructs the queue backing named by `strategy` from `options`,
/// boxed behind the shared [`Queue`] trait object the rest of the engine
/// consumes.
pub fn build_queue<P: PriorityTag>(
    strategy: QueueStrategy,
    options: QueueOptions<P>,
) -> Arc<dyn Queue<P>> {
    match strategy {
        QueueStrategy::Mutex => Arc::new(LockingQueue::new(options)),
        QueueStrategy::LockFree => Arc::new(LockFreeQueue::new(options)),
        QueueStrategy::Adaptive => Arc::new(AdaptiveQueue::new(options)),
    }
}

/// A queue that starts as a [`LockingQueue`] and promotes itself, exactly
/// once, to a [`LockFreeQueue`] after `adaptive_promotion_threshold`
/// contended lock attempts are observed. Promotion drains every pending
/// job from the mutex queue and re-enqueues it on the lock-free one before
/// switching the active pointer, so no job is lost or reordered across
/// priorities mid-promotion.
pub struct AdaptiveQueue<P: PriorityTag> {
    locking: LockingQueue<P>,
    lockfree: LockFreeQueue<P>,
    promoted: std::sync::atomic::AtomicBool,
    promoting: std::sync::Mutex<()>,
}

impl<P: PriorityTag> AdaptiveQueue<P> {
    pub fn new(options: QueueOptions<P>) -> Self {
        AdaptiveQueue {
            locking: LockingQueue::new(options.clone()),
            lockfree: LockFreeQueue::new(options),
            promoted: std::sync::atomic::AtomicBool::new(false),
            promoting: std::sync::Mutex::new(()),
        }
    }

    fn active(&self) -> &dyn Queue<P> {
        if self.promoted.load(std::sync::atomic::Ordering::Acquire) {
            &self.lockfree
        } else {
            &self.locking
        }
    }

    fn maybe_promote(&self) {
        if self.promoted.load(std::sync::atomic::Ordering::Acquire) {
            return;
        }
        if self.locking.contention_count() < self.locking.promotion_threshold() {
            return;
        }
        let _guard = self.promoting.lock().unwrap();
        if self.promoted.load(std::sync::atomic::Ordering::Acquire) {
            return;
        }
        for job in self.locking.dequeue_batch(usize::MAX) {
            // the lock-free queue shares the same priority set; a failed
            // enqueue here would only happen on a bounded, full lane,
            // which is not possible immediately after promotion.
            let _ = self.lockfree.enqueue(job);
        }
        self.promoted.store(true, std::sync::atomic::Ordering::Release);
    }
}

impl<P: PriorityTag> Queue<P> for AdaptiveQueue<P> {
    fn enqueue(&self, job: Job<P>) -> Result<(), QueueError> {
        self.maybe_promote();
        self.active().enqueue(job)
    }

    fn enqueue_batch(&self, jobs: Vec<Job<P>>) -> BatchEnqueueReport<P> {
        self.maybe_promote();
        self.active().enqueue_batch(jobs)
    }

    fn dequeue(&self, primary: P, fallbacks: &[P]) -> Option<Job<P>> {
        self.active().dequeue(primary, fallbacks)
    }

    fn dequeue_blocking(
        &self,
        primary: P,
        fallbacks: &[P],
        deadline: Instant,
    ) -> Result<Job<P>, QueueError> {
        self.active().dequeue_blocking(primary, fallbacks, deadline)
    }

    fn dequeue_batch(&self, limit: usize) -> Vec<Job<P>> {
        self.active().dequeue_batch(limit)
    }

    fn contains(&self, primary: P, fallbacks: &[P]) -> bool {
        self.active().contains(primary, fallbacks)
    }

    fn set_push_locked(&self, locked: bool) {
        self.locking.set_push_locked(locked);
        self.lockfree.set_push_locked(locked);
    }

    fn clear(&self) {
        self.locking.clear();
        self.lockfree.clear();
    }

    fn len(&self) -> usize {
        self.active().len()
    }

    fn is_shutdown(&self) -> bool {
        self.active().is_shutdown()
    }

    fn add_notifier(&self, notifier: Box<dyn Fn(P) + Send + Sync>) {
        // Both backings may receive enqueues before promotion settles a
        // race, so both get the notifier; the callback itself must be
        // idempotent-safe to call more than once per logical enqueue,
        // which holds for the pool's wake-fanout notifier.
        let shared: Arc<dyn Fn(P) + Send + Sync> = Arc::from(notifier);
        let for_locking = shared.clone();
        self.locking.add_notifier(Box::new(move |p| for_locking(p)));
        self.lockfree.add_notifier(Box::new(move |p| shared(p)));
    }

    fn stats(&self) -> QueueStats<P> {
        self.active().stats()
    }

    fn begin_drain(&self) {
        self.locking.begin_drain();
        self.lockfree.begin_drain();
    }

    fn close(&self) {
        self.locking.close();
        self.lockfree.close();
    }
}

/// Shared short-sleep helper so both blocking implementations back off the
/// same way while polling a condvar with a deadline.
pub(crate) fn remaining(deadline: Instant) -> Option<Duration> {
    let now = Instant::now();
    if now >= deadline {
        None
    } else {
        Some(deadline - now)
    }
}
