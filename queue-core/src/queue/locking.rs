//! The coarse-lock queue variant: one mutex plus one condvar guarding a
//! `HashMap<P, VecDeque<Job<P>>>`, one FIFO lane per priority.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Condvar;
use std::sync::Mutex;
use std::time::Instant;

use crate::job::Job;
use crate::queue::remaining;
use crate::queue::BatchEnqueueReport;
use crate::queue::Queue;
use crate::queue::QueueError;
use crate::queue::QueueOptions;
use crate::queue::QueueState;
use crate::queue::QueueStats;
use crate::PriorityTag;

struct Inner<P> {
    lanes: HashMap<P, VecDeque<Job<P>>>,
    state: QueueState,
    push_locked: bool,
}

pub struct LockingQueue<P: PriorityTag> {
    inner: Mutex<Inner<P>>,
    condvar: Condvar,
    notifiers: Mutex<Vec<Box<dyn Fn(P) + Send + Sync>>>,
    bounded_capacity: usize,
    contention: AtomicUsize,
    promotion_threshold: usize,
}

impl<P: PriorityTag> LockingQueue<P> {
    pub fn new(options: QueueOptions<P>) -> Self {
        let mut lanes = HashMap::new();
        for p in options.priorities {
            lanes.insert(p, VecDeque::new());
        }
        LockingQueue {
            inner: Mutex::new(Inner {
                lanes,
                state: QueueState::Open,
                push_locked: false,
            }),
            condvar: Condvar::new(),
            notifiers: Mutex::new(Vec::new()),
            bounded_capacity: options.bounded_capacity,
            contention: AtomicUsize::new(0),
            promotion_threshold: options.adaptive_promotion_threshold,
        }
    }

    pub(crate) fn contention_count(&self) -> usize {
        self.contention.load(Ordering::Relaxed)
    }

    pub(crate) fn promotion_threshold(&self) -> usize {
        self.promotion_threshold
    }

    fn notify(&self, priority: P) {
        self.condvar.notify_all();
        for notifier in self.notifiers.lock().unwrap().iter() {
            notifier(priority);
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, Inner<P>> {
        match self.inner.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                self.contention.fetch_add(1, Ordering::Relaxed);
                self.inner.lock().unwrap_or_else(|e| e.into_inner())
            }
        }
    }

    fn first_nonempty<'a>(
        inner: &'a mut Inner<P>,
        primary: P,
        fallbacks: &[P],
    ) -> Option<&'a mut VecDeque<Job<P>>> {
        std::iter::once(&primary)
            .chain(fallbacks.iter())
            .find_map(|p| {
                let has_job = inner.lanes.get(p).is_some_and(|q| !q.is_empty());
                has_job.then(|| inner.lanes.get_mut(p).unwrap())
            })
    }
}

impl<P: PriorityTag> Queue<P> for LockingQueue<P> {
    fn enqueue(&self, job: Job<P>) -> Result<(), QueueError> {
        let priority = job.priority();
        let mut inner = self.lock_inner();
        if inner.push_locked {
            return Err(QueueError::PushLocked);
        }
        let lane = inner.lanes.entry(priority).or_default();
        if self.bounded_capacity > 0 && lane.len() >= self.bounded_capacity {
            return Err(QueueError::QueueFull);
        }
        lane.push_back(job);
        drop(inner);
        self.notify(priority);
        Ok(())
    }

    fn enqueue_batch(&self, jobs: Vec<Job<P>>) -> BatchEnqueueReport<P> {
        let mut report = BatchEnqueueReport {
            succeeded: 0,
            rejected: Vec::new(),
        };
        let mut inner = self.lock_inner();
        let mut notify_priorities = Vec::new();
        for job in jobs {
            if inner.push_locked {
                report.rejected.push((job, QueueError::PushLocked));
                continue;
            }
            let priority = job.priority();
            let lane = inner.lanes.entry(priority).or_default();
            if self.bounded_capacity > 0 && lane.len() >= self.bounded_capacity {
                report.rejected.push((job, QueueError::QueueFull));
                continue;
            }
            lane.push_back(job);
            notify_priorities.push(priority);
            report.succeeded += 1;
        }
        drop(inner);
        for priority in notify_priorities {
            self.notify(priority);
        }
        report
    }

    fn dequeue(&self, primary: P, fallbacks: &[P]) -> Option<Job<P>> {
        let mut inner = self.lock_inner();
        Self::first_nonempty(&mut inner, primary, fallbacks).and_then(VecDeque::pop_front)
    }

    fn dequeue_blocking(
        &self,
        primary: P,
        fallbacks: &[P],
        deadline: Instant,
    ) -> Result<Job<P>, QueueError> {
        let mut inner = self.lock_inner();
        loop {
            if let Some(job) =
                Self::first_nonempty(&mut inner, primary, fallbacks).and_then(VecDeque::pop_front)
            {
                return Ok(job);
            }
            if inner.state == QueueState::Closed {
                return Err(QueueError::Shutdown);
            }
            let Some(wait_for) = remaining(deadline) else {
                return Err(QueueError::Timeout);
            };
            let (guard, _timeout) = self.condvar.wait_timeout(inner, wait_for).unwrap();
            inner = guard;
        }
    }

    fn dequeue_batch(&self, limit: usize) -> Vec<Job<P>> {
        let mut inner = self.lock_inner();
        let mut out = Vec::new();
        for lane in inner.lanes.values_mut() {
            while out.len() < limit {
                match lane.pop_front() {
                    Some(job) => out.push(job),
                    None => break,
                }
            }
            if out.len() >= limit {
                break;
            }
        }
        out
    }

    fn contains(&self, primary: P, fallbacks: &[P]) -> bool {
        let mut inner = self.lock_inner();
        Self::first_nonempty(&mut inner, primary, fallbacks).is_some()
    }

    fn set_push_locked(&self, locked: bool) {
        self.lock_inner().push_locked = locked;
    }

    fn clear(&self) {
        let mut inner = self.lock_inner();
        for lane in inner.lanes.values_mut() {
            lane.clear();
        }
    }

    fn len(&self) -> usize {
        self.lock_inner().lanes.values().map(VecDeque::len).sum()
    }

    fn is_shutdown(&self) -> bool {
        self.lock_inner().state != QueueState::Open
    }

    fn add_notifier(&self, notifier: Box<dyn Fn(P) + Send + Sync>) {
        self.notifiers.lock().unwrap().push(notifier);
    }

    fn stats(&self) -> QueueStats<P> {
        let inner = self.lock_inner();
        QueueStats {
            pending_per_priority: inner
                .lanes
                .iter()
                .map(|(p, q)| (*p, q.len()))
                .collect(),
            retired_nodes: 0,
            reclaimed_nodes: 0,
        }
    }

    fn begin_drain(&self) {
        let mut inner = self.lock_inner();
        inner.push_locked = true;
        inner.state = QueueState::Draining;
        drop(inner);
        self.condvar.notify_all();
    }

    fn close(&self) {
        let mut inner = self.lock_inner();
        inner.state = QueueState::Closed;
        inner.push_locked = true;
        for lane in inner.lanes.values_mut() {
            lane.clear();
        }
        drop(inner);
        self.condvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::priority::Priority;

    fn options() -> QueueOptions<Priority> {
        QueueOptions {
            priorities: vec![Priority::RealTime, Priority::Batch, Priority::Background],
            bounded_capacity: 0,
            adaptive_promotion_threshold: 64,
        }
    }

    #[test]
    fn fifo_within_a_single_priority() {
        let q = LockingQueue::new(options());
        for i in 0..5u8 {
            q.enqueue(Job::with_payload(Priority::Batch, vec![i], |_| Ok(())))
                .unwrap();
        }
        let mut seen = Vec::new();
        while let Some(mut job) = q.dequeue(Priority::Batch, &[]) {
            seen.push(job.payload().unwrap()[0]);
            let _ = job.work(Priority::Batch);
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn fallback_order_wins_over_age() {
        let q = LockingQueue::new(options());
        q.enqueue(Job::with_payload(Priority::Background, vec![1], |_| Ok(())))
            .unwrap();
        q.enqueue(Job::with_payload(Priority::RealTime, vec![2], |_| Ok(())))
            .unwrap();
        let job = q
            .dequeue(Priority::RealTime, &[Priority::Background])
            .unwrap();
        assert_eq!(job.payload().unwrap(), &[2]);
    }

    #[test]
    fn push_locked_rejects_enqueue() {
        let q = LockingQueue::new(options());
        q.set_push_locked(true);
        let err = q
            .enqueue(Job::with_payload(Priority::Batch, vec![1], |_| Ok(())))
            .unwrap_err();
        assert_eq!(err, QueueError::PushLocked);
    }

    #[test]
    fn close_drops_pending_and_marks_shutdown() {
        let q = LockingQueue::new(options());
        q.enqueue(Job::with_payload(Priority::Batch, vec![1], |_| Ok(())))
            .unwrap();
        q.close();
        assert_eq!(q.len(), 0);
        assert!(q.is_shutdown());
    }

    #[test]
    fn bounded_capacity_rejects_once_full() {
        let mut opts = options();
        opts.bounded_capacity = 1;
        let q = LockingQueue::new(opts);
        q.enqueue(Job::with_payload(Priority::Batch, vec![1], |_| Ok(())))
            .unwrap();
        let err = q
            .enqueue(Job::with_payload(Priority::Batch, vec![2], |_| Ok(())))
            .unwrap_err();
        assert_eq!(err, QueueError::QueueFull);
    }

    #[test]
    fn worker_only_matching_priority_ever_dequeues() {
        let q = LockingQueue::new(options());
        q.enqueue(Job::with_payload(Priority::Background, vec![1], |_| Ok(())))
            .unwrap();
        assert!(q.dequeue(Priority::RealTime, &[]).is_none());
        assert!(q.dequeue(Priority::Background, &[]).is_some());
    }
}
