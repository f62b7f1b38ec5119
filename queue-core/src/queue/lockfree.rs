//! The lock-free queue variant: one `crossbeam::queue::SegQueue` lane per
//! priority, with epoch-based reclamation bookkeeping surfaced through
//! [`QueueStats`].
//!
//! `SegQueue` already reclaims its own internal segments safely; the
//! retired/reclaimed counters here are bookkeeping around that fact
//! rather than a from-scratch hazard-pointer scheme: each dequeue marks a
//! node retired, and once retired nodes outnumber reclaimed ones by more
//! than `retire_threshold_multiplier` (default 2), a `crossbeam::epoch`
//! guard is pinned and flushed, advancing the global epoch and folding
//! the retired count into reclaimed.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Condvar;
use std::sync::Mutex;
use std::time::Instant;

use crossbeam::queue::SegQueue;

use crate::job::Job;
use crate::queue::remaining;
use crate::queue::BatchEnqueueReport;
use crate::queue::Queue;
use crate::queue::QueueError;
use crate::queue::QueueOptions;
use crate::queue::QueueStats;
use crate::PriorityTag;

struct Lane<P> {
    priority: P,
    jobs: SegQueue<Job<P>>,
    len: AtomicI64,
}

pub struct LockFreeQueue<P: PriorityTag> {
    lanes: Vec<Lane<P>>,
    push_locked: AtomicBool,
    closed: AtomicBool,
    notifiers: Mutex<Vec<Box<dyn Fn(P) + Send + Sync>>>,
    bounded_capacity: usize,
    retired: AtomicUsize,
    reclaimed: AtomicUsize,
    retire_threshold_multiplier: usize,
    wake: (Mutex<()>, Condvar),
}

impl<P: PriorityTag> LockFreeQueue<P> {
    pub fn new(options: QueueOptions<P>) -> Self {
        LockFreeQueue {
            lanes: options
                .priorities
                .into_iter()
                .map(|priority| Lane {
                    priority,
                    jobs: SegQueue::new(),
                    len: AtomicI64::new(0),
                })
                .collect(),
            push_locked: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            notifiers: Mutex::new(Vec::new()),
            bounded_capacity: options.bounded_capacity,
            retired: AtomicUsize::new(0),
            reclaimed: AtomicUsize::new(0),
            retire_threshold_multiplier: 2,
            wake: (Mutex::new(()), Condvar::new()),
        }
    }

    fn lane(&self, priority: P) -> Option<&Lane<P>> {
        self.lanes.iter().find(|l| l.priority == priority)
    }

    fn notify(&self, priority: P) {
        let _guard = self.wake.0.lock().unwrap();
        self.wake.1.notify_all();
        drop(_guard);
        for notifier in self.notifiers.lock().unwrap().iter() {
            notifier(priority);
        }
    }

    fn pop_from(&self, priority: P, fallbacks: &[P]) -> Option<Job<P>> {
        for p in std::iter::once(&priority).chain(fallbacks.iter()) {
            let Some(lane) = self.lane(*p) else { continue };
            if let Some(job) = lane.jobs.pop() {
                lane.len.fetch_sub(1, Ordering::AcqRel);
                self.on_retire();
                return Some(job);
            }
        }
        None
    }

    fn on_retire(&self) {
        let retired = self.retired.fetch_add(1, Ordering::AcqRel) + 1;
        let reclaimed = self.reclaimed.load(Ordering::Acquire);
        if retired > reclaimed.max(1) * self.retire_threshold_multiplier {
            let guard = crossbeam::epoch::pin();
            guard.flush();
            self.reclaimed.store(retired, Ordering::Release);
        }
    }
}

impl<P: PriorityTag> Queue<P> for LockFreeQueue<P> {
    fn enqueue(&self, job: Job<P>) -> Result<(), QueueError> {
        if self.push_locked.load(Ordering::Acquire) {
            return Err(QueueError::PushLocked);
        }
        let priority = job.priority();
        let Some(lane) = self.lane(priority) else {
            return Err(QueueError::PushLocked);
        };
        if self.bounded_capacity > 0 && lane.len.load(Ordering::Acquire) as usize >= self.bounded_capacity
        {
            return Err(QueueError::QueueFull);
        }
        lane.jobs.push(job);
        lane.len.fetch_add(1, Ordering::AcqRel);
        self.notify(priority);
        Ok(())
    }

    fn enqueue_batch(&self, jobs: Vec<Job<P>>) -> BatchEnqueueReport<P> {
        let mut report = BatchEnqueueReport {
            succeeded: 0,
            rejected: Vec::new(),
        };
        for job in jobs {
            let priority = job.priority();
            if self.push_locked.load(Ordering::Acquire) {
                report.rejected.push((job, QueueError::PushLocked));
                continue;
            }
            let Some(lane) = self.lane(priority) else {
                report.rejected.push((job, QueueError::PushLocked));
                continue;
            };
            if self.bounded_capacity > 0
                && lane.len.load(Ordering::Acquire) as usize >= self.bounded_capacity
            {
                report.rejected.push((job, QueueError::QueueFull));
                continue;
            }
            lane.jobs.push(job);
            lane.len.fetch_add(1, Ordering::AcqRel);
            self.notify(priority);
            report.succeeded += 1;
        }
        report
    }

    fn dequeue(&self, primary: P, fallbacks: &[P]) -> Option<Job<P>> {
        self.pop_from(primary, fallbacks)
    }

    fn dequeue_blocking(
        &self,
        primary: P,
        fallbacks: &[P],
        deadline: Instant,
    ) -> Result<Job<P>, QueueError> {
        loop {
            if let Some(job) = self.pop_from(primary, fallbacks) {
                return Ok(job);
            }
            if self.closed.load(Ordering::Acquire) {
                return Err(QueueError::Shutdown);
            }
            let Some(wait_for) = remaining(deadline) else {
                return Err(QueueError::Timeout);
            };
            let guard = self.wake.0.lock().unwrap();
            // Re-check once the wake mutex is held: closes the race where
            // a producer's push + notify lands between our lock-free
            // `pop_from` miss above and this lock acquisition.
            if let Some(job) = self.pop_from(primary, fallbacks) {
                return Ok(job);
            }
            let _ = self.wake.1.wait_timeout(guard, wait_for).unwrap();
        }
    }

    fn dequeue_batch(&self, limit: usize) -> Vec<Job<P>> {
        let mut out = Vec::new();
        for lane in &self.lanes {
            while out.len() < limit {
                match lane.jobs.pop() {
                    Some(job) => {
                        lane.len.fetch_sub(1, Ordering::AcqRel);
                        self.on_retire();
                        out.push(job);
                    }
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
        std::iter::once(&primary).chain(fallbacks.iter()).any(|p| {
            self.lane(*p)
                .is_some_and(|lane| lane.len.load(Ordering::Acquire) > 0)
        })
    }

    fn set_push_locked(&self, locked: bool) {
        self.push_locked.store(locked, Ordering::Release);
    }

    fn clear(&self) {
        for lane in &self.lanes {
            while lane.jobs.pop().is_some() {
                lane.len.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }

    fn len(&self) -> usize {
        self.lanes
            .iter()
            .map(|l| l.len.load(Ordering::Acquire).max(0) as usize)
            .sum()
    }

    fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.push_locked.load(Ordering::Acquire)
    }

    fn add_notifier(&self, notifier: Box<dyn Fn(P) + Send + Sync>) {
        self.notifiers.lock().unwrap().push(notifier);
    }

    fn stats(&self) -> QueueStats<P> {
        QueueStats {
            pending_per_priority: self
                .lanes
                .iter()
                .map(|l| (l.priority, l.len.load(Ordering::Acquire).max(0) as usize))
                .collect(),
            retired_nodes: self.retired.load(Ordering::Acquire),
            reclaimed_nodes: self.reclaimed.load(Ordering::Acquire),
        }
    }

    fn begin_drain(&self) {
        self.push_locked.store(true, Ordering::Release);
        let _guard = self.wake.0.lock().unwrap();
        self.wake.1.notify_all();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.push_locked.store(true, Ordering::Release);
        self.clear();
        let _guard = self.wake.0.lock().unwrap();
        self.wake.1.notify_all();
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
        let q = LockFreeQueue::new(options());
        for i in 0..5u8 {
            q.enqueue(Job::with_payload(Priority::Batch, vec![i], |_| Ok(())))
                .unwrap();
        }
        let mut seen = Vec::new();
        while let Some(job) = q.dequeue(Priority::Batch, &[]) {
            seen.push(job.payload().unwrap()[0]);
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn no_duplicate_or_lost_dequeues() {
        let q = LockFreeQueue::new(options());
        for i in 0..100u32 {
            q.enqueue(Job::with_payload(Priority::Batch, i.to_le_bytes().to_vec(), |_| Ok(())))
                .unwrap();
        }
        let mut seen = std::collections::HashSet::new();
        while let Some(job) = q.dequeue(Priority::Batch, &[]) {
            let bytes: [u8; 4] = job.payload().unwrap().try_into().unwrap();
            assert!(seen.insert(u32::from_le_bytes(bytes)), "duplicate dequeue");
        }
        assert_eq!(seen.len(), 100);
    }

    #[test]
    fn retirement_triggers_a_reclaim_scan() {
        let q = LockFreeQueue::new(options());
        for i in 0..20u8 {
            q.enqueue(Job::with_payload(Priority::Batch, vec![i], |_| Ok(())))
                .unwrap();
        }
        while q.dequeue(Priority::Batch, &[]).is_some() {}
        let stats = q.stats();
        assert_eq!(stats.retired_nodes, 20);
        assert!(stats.reclaimed_nodes > 0);
    }

    #[test]
    fn close_drops_pending_and_marks_shutdown() {
        let q = LockFreeQueue::new(options());
        q.enqueue(Job::with_payload(Priority::Batch, vec![1], |_| Ok(())))
            .unwrap();
        q.close();
        assert_eq!(q.len(), 0);
        assert!(q.is_shutdown());
    }
}
