//! Aggregates workers sharing one queue, propagating notifications and
//! ordered start/stop.
//!
//! A registry holds N workers per priority set, and dispatch is "wake
//! every worker whose priority set matches" rather than "look up one
//! handler for this type".

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;

use crate::collaborators::Logger;
use crate::job::Job;
use crate::queue::Queue;
use crate::queue::QueueError;
use crate::worker::Worker;
use crate::worker::WorkerError;
use crate::PriorityTag;

struct PoolInner<P: PriorityTag> {
    queue: Arc<dyn Queue<P>>,
    workers: Mutex<Vec<Worker<P>>>,
}

impl<P: PriorityTag> Drop for PoolInner<P> {
    fn drop(&mut self) {
        // Invariant: destruction implies `stop(drain=false)` if not
        // already stopped; no job survives the pool.
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        for worker in workers.iter_mut() {
            worker.stop(false);
        }
        for worker in workers.iter_mut() {
            worker.join();
        }
        self.queue.close();
    }
}

/// An explicit, weak back-reference a [`Job`] carries to the pool that
/// owns it. Re-enqueuing through a dead pool resolves to `None` and
/// silently drops the new job instead of erroring or panicking.
#[derive(Clone)]
pub struct PoolHandle<P: PriorityTag> {
    inner: Weak<PoolInner<P>>,
}

impl<P: PriorityTag> PoolHandle<P> {
    /// Pushes `job` onto the owning pool's queue. Returns `Ok(())`
    /// without enqueuing anything if the pool has already been torn down
    /// — a re-enqueue against a dead pool must not error.
    pub fn push(&self, job: Job<P>) -> Result<(), QueueError> {
        match self.inner.upgrade() {
            Some(inner) => Pool::push_via(&inner, job),
            None => Ok(()),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

/// A collection of [`Worker`]s sharing one [`Queue`].
pub struct Pool<P: PriorityTag> {
    inner: Arc<PoolInner<P>>,
}

impl<P: PriorityTag> Pool<P> {
    /// Builds a pool over `queue`, registering a notifier that fans out
    /// every successful enqueue to whichever attached workers watch that
    /// priority. The notifier holds only a [`Weak`] reference so the
    /// queue -> notifier -> pool edge never keeps the pool alive.
    pub fn new(queue: Arc<dyn Queue<P>>) -> Self {
        let inner = Arc::new(PoolInner {
            queue: queue.clone(),
            workers: Mutex::new(Vec::new()),
        });
        let weak = Arc::downgrade(&inner);
        queue.add_notifier(Box::new(move |priority| {
            if let Some(inner) = weak.upgrade() {
                Self::fan_out(&inner, priority);
            }
        }));
        Pool { inner }
    }

    /// Builds a pool whose queue backing is chosen and configured by
    /// `config`: `config.strategy` picks [`crate::queue::LockingQueue`],
    /// [`crate::queue::LockFreeQueue`], or [`crate::queue::AdaptiveQueue`],
    /// and `config.bounded_capacity`/`config.adaptive_promotion_threshold`
    /// flow straight into [`crate::queue::QueueOptions`]. `priorities` is
    /// the set of priority tags workers will be attached for; the config
    /// file has no way to name a `P` itself.
    pub fn from_config(config: &crate::config::QueueConfig, priorities: Vec<P>) -> Self {
        let options = crate::queue::QueueOptions::from_config(config, priorities);
        let queue = crate::queue::build_queue(config.strategy.into(), options);
        Pool::new(queue)
    }

    fn fan_out(inner: &Arc<PoolInner<P>>, priority: P) {
        let workers = inner.workers.lock().unwrap();
        for worker in workers.iter() {
            if worker.watches(priority) {
                worker.notify(priority);
            }
        }
    }

    fn push_via(inner: &Arc<PoolInner<P>>, mut job: Job<P>) -> Result<(), QueueError> {
        job.set_pool(PoolHandle {
            inner: Arc::downgrade(inner),
        });
        inner.queue.enqueue(job)
    }

    /// Injects the shared queue into `worker`, records it under the pool
    /// mutex, and optionally starts it immediately.
    pub fn append(&self, mut worker: Worker<P>, auto_start: bool, logger: Arc<dyn Logger>) -> Result<(), WorkerError> {
        worker.attach(self.inner.queue.clone(), logger);
        if auto_start {
            worker.start()?;
        }
        self.inner.workers.lock().unwrap().push(worker);
        Ok(())
    }

    /// Starts every attached worker that hasn't already been started, in
    /// insertion order.
    pub fn start(&self) -> Result<(), WorkerError> {
        for worker in self.inner.workers.lock().unwrap().iter_mut() {
            if worker.state() == crate::worker::WorkerState::New {
                worker.start()?;
            }
        }
        Ok(())
    }

    /// Forwards to the queue. The job is given a [`PoolHandle`] back to
    /// this pool so its work method can re-enqueue a follow-up job.
    pub fn push(&self, job: Job<P>) -> Result<(), QueueError> {
        Self::push_via(&self.inner, job)
    }

    pub fn handle(&self) -> PoolHandle<P> {
        PoolHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Fans `notification(p)` out to every worker whose priority set
    /// contains `p`. Exposed directly (in addition to the automatic
    /// enqueue-triggered fan-out) so callers can re-kick workers after an
    /// external event with no corresponding job, e.g. a config reload.
    pub fn notification(&self, priority: P) {
        Self::fan_out(&self.inner, priority);
    }

    /// Sets the queue's push lock immediately — pushes are rejected the
    /// instant `stop()` is called, regardless of `drain` — signals every
    /// worker to stop with the given drain flag, and joins them all. A
    /// trailing `close()` releases any straggling blocked waiter and
    /// drops whatever remains in the queue.
    pub fn stop(&self, drain: bool) {
        self.inner.queue.begin_drain();
        let mut workers = self.inner.workers.lock().unwrap();
        for worker in workers.iter_mut() {
            worker.stop(drain);
        }
        for worker in workers.iter_mut() {
            worker.join();
        }
        drop(workers);
        self.inner.queue.close();
    }

    pub fn worker_count(&self) -> usize {
        self.inner.workers.lock().unwrap().len()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::TracingLogger;
    use crate::job::Job;
    use crate::priority::Priority;
    use crate::queue::LockingQueue;
    use crate::queue::QueueOptions;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn pool() -> Pool<Priority> {
        let queue: Arc<dyn Queue<Priority>> = Arc::new(LockingQueue::new(QueueOptions {
            priorities: vec![Priority::RealTime, Priority::Batch, Priority::Background],
            bounded_capacity: 0,
            adaptive_promotion_threshold: 64,
        }));
        Pool::new(queue)
    }

    #[test]
    fn higher_priority_job_completes_first_despite_later_push() {
        // W1=[high], W2=[normal,{high}], W3=[low,{high,normal}].
        // Push low, normal, high in that order; high completes first.
        let pool = pool();
        let logger: Arc<dyn Logger> = Arc::new(TracingLogger);
        pool.append(
            Worker::new(Priority::RealTime, vec![]),
            true,
            logger.clone(),
        )
        .unwrap();
        pool.append(
            Worker::new(Priority::Batch, vec![Priority::RealTime]),
            true,
            logger.clone(),
        )
        .unwrap();
        pool.append(
            Worker::new(
                Priority::Background,
                vec![Priority::RealTime, Priority::Batch],
            ),
            true,
            logger,
        )
        .unwrap();

        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        pool.push(Job::callback(Priority::Background, move || {
            std::thread::sleep(Duration::from_millis(20));
            o.lock().unwrap().push("low");
            Ok(())
        }))
        .unwrap();

        let o = order.clone();
        pool.push(Job::callback(Priority::Batch, move || {
            std::thread::sleep(Duration::from_millis(20));
            o.lock().unwrap().push("normal");
            Ok(())
        }))
        .unwrap();

        let o = order.clone();
        pool.push(Job::callback(Priority::RealTime, move || {
            o.lock().unwrap().push("high");
            Ok(())
        }))
        .unwrap();

        std::thread::sleep(Duration::from_millis(400));
        pool.stop(true);

        let order = order.lock().unwrap();
        assert_eq!(order.first(), Some(&"high"));
        assert!(order.contains(&"normal"));
        assert!(order.contains(&"low"));
    }

    #[test]
    fn container_round_trips_through_a_real_job_and_queue() {
        use queue_messages::Container;
        use queue_messages::Value;

        let inner = Container::builder()
            .source(1, 0)
            .target(2, 0)
            .message_type("inner")
            .add(Value::bytes("blob", (0u8..=255).collect::<Vec<u8>>()))
            .build();
        let original = Container::builder()
            .source(10, 1)
            .target(20, 2)
            .message_type("outer")
            .add(Value::container("nested", &inner))
            .add(Value::bytes("all_bytes", (0u8..=255).collect::<Vec<u8>>()))
            .build();

        let pool = pool();
        let logger: Arc<dyn Logger> = Arc::new(TracingLogger);
        pool.append(Worker::new(Priority::Batch, vec![]), true, logger)
            .unwrap();

        let observed: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
        let o = observed.clone();
        pool.push(Job::with_payload(
            Priority::Batch,
            original.serialize(),
            move |payload| {
                *o.lock().unwrap() = Some(payload.clone());
                Ok(())
            },
        ))
        .unwrap();

        std::thread::sleep(Duration::from_millis(100));
        pool.stop(true);

        let bytes = observed.lock().unwrap().take().expect("job ran");
        let decoded = Container::deserialize(&bytes).expect("round trips");
        assert_eq!(decoded, original);
        assert_eq!(
            decoded.get("nested").unwrap().as_container().unwrap(),
            inner
        );
    }

    #[test]
    fn drain_on_stop_runs_every_queued_job_to_completion() {
        let pool = pool();
        let logger: Arc<dyn Logger> = Arc::new(TracingLogger);
        pool.append(Worker::new(Priority::Batch, vec![]), true, logger)
            .unwrap();

        let completed = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let c = completed.clone();
            pool.push(Job::callback(Priority::Batch, move || {
                std::thread::sleep(Duration::from_millis(2));
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
        }

        pool.stop(true);
        assert_eq!(completed.load(Ordering::SeqCst), 50);
        assert_eq!(pool.pending_count(), 0);
    }

    #[test]
    fn abort_on_stop_cuts_off_queued_jobs_early() {
        let pool = pool();
        let logger: Arc<dyn Logger> = Arc::new(TracingLogger);
        pool.append(Worker::new(Priority::Batch, vec![]), true, logger)
            .unwrap();

        let completed = Arc::new(AtomicUsize::new(0));
        for _ in 0..1000 {
            let c = completed.clone();
            pool.push(Job::callback(Priority::Batch, move || {
                std::thread::sleep(Duration::from_millis(10));
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
        }

        std::thread::sleep(Duration::from_millis(50));
        pool.stop(false);

        let done = completed.load(Ordering::SeqCst);
        assert!(done >= 1 && done <= 60, "completed {done} jobs");
    }

    #[test]
    fn push_after_stop_is_rejected_immediately() {
        let pool = pool();
        let logger: Arc<dyn Logger> = Arc::new(TracingLogger);
        pool.append(Worker::new(Priority::Batch, vec![]), true, logger)
            .unwrap();
        pool.stop(true);
        let err = pool
            .push(Job::callback(Priority::Batch, || Ok(())))
            .unwrap_err();
        assert_eq!(err, QueueError::PushLocked);
    }

    #[test]
    fn dead_pool_drops_reenqueue_silently() {
        let handle = {
            let pool = pool();
            let logger: Arc<dyn Logger> = Arc::new(TracingLogger);
            pool.append(Worker::new(Priority::Batch, vec![]), true, logger)
                .unwrap();
            let handle = pool.handle();
            pool.stop(false);
            handle
            // `pool` drops here.
        };
        assert!(!handle.is_alive());
        let result = handle.push(Job::callback(Priority::Batch, || Ok(())));
        assert!(result.is_ok());
    }

    #[test]
    fn from_config_builds_a_working_pool() {
        let config = crate::config::EngineConfig::load(None).queue;
        let pool = Pool::from_config(&config, vec![Priority::RealTime, Priority::Batch, Priority::Background]);
        let logger: Arc<dyn Logger> = Arc::new(TracingLogger);
        pool.append(Worker::new(Priority::Batch, vec![]), true, logger)
            .unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        pool.push(Job::callback(Priority::Batch, move || {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .unwrap();

        std::thread::sleep(Duration::from_millis(100));
        pool.stop(true);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
