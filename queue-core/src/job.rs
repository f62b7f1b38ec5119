//! A unit of work carried through the [`crate::queue`] and executed by a
//! [`crate::worker::Worker`].
//!
//! One dispatch point per job, metrics recorded around success/failure,
//! errors absorbed rather than propagated past the call site. A `Job`
//! carries its own work instead of being looked up by type — the queue is
//! generic over job content, not over a fixed set of handlers.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;

use crate::pool::PoolHandle;

/// Something a [`Job`] can run. Installed as the `override_work` carrier;
/// the closure-based constructors (`Job::callback`, `Job::with_payload`)
/// wrap a `FnMut` in an internal impl of this trait instead of exposing a
/// virtual-dispatch hierarchy to callers.
pub trait Work<P>: Send {
    fn run(&mut self, worker_priority: P, payload: &mut Vec<u8>) -> Result<(), JobError>;
}

impl<P, F> Work<P> for F
where
    F: FnMut(P, &mut Vec<u8>) -> Result<(), JobError> + Send,
{
    fn run(&mut self, worker_priority: P, payload: &mut Vec<u8>) -> Result<(), JobError> {
        self(worker_priority, payload)
    }
}

struct NoArgCallback<F>(F);

impl<P, F> Work<P> for NoArgCallback<F>
where
    F: FnMut() -> Result<(), JobError> + Send,
{
    fn run(&mut self, _worker_priority: P, _payload: &mut Vec<u8>) -> Result<(), JobError> {
        (self.0)()
    }
}

struct PayloadCallback<F>(F);

impl<P, F> Work<P> for PayloadCallback<F>
where
    F: FnMut(&mut Vec<u8>) -> Result<(), JobError> + Send,
{
    fn run(&mut self, _worker_priority: P, payload: &mut Vec<u8>) -> Result<(), JobError> {
        (self.0)(payload)
    }
}

/// A carrier-less job's two legal fates: this crate rejects construction
/// instead of silently succeeding on execution. See [`Job::data_only`].
#[derive(Error, Debug)]
pub enum JobError {
    #[error("user work panicked or returned an error")]
    UserFault(String),

    #[error("job has no installed work carrier")]
    NoCarrier,

    #[error("spilled payload could not be read or written: {0}")]
    SpillIoError(#[from] std::io::Error),
}

/// Outcome of a single [`Job::work`] invocation, logged by the worker at
/// `warn` (failure) or `debug` (success) via [`JobOutcome::log`].
#[derive(Debug)]
pub struct JobOutcome<P> {
    pub job_priority: P,
    pub worker_priority: P,
    pub result: Result<(), String>,
}

impl<P: fmt::Debug> JobOutcome<P> {
    /// Logs this outcome at `warn` (failure) or `debug` (success),
    /// carrying job and worker priority as structured fields the way
    /// every other worker-loop log line does.
    pub fn log(&self, logger: &dyn crate::collaborators::Logger, start: std::time::Instant) {
        use crate::collaborators::LogLevel;
        match &self.result {
            Ok(()) => logger.log_duration(
                LogLevel::Debug,
                &format!(
                    "job completed: job_priority={:?} worker_priority={:?}",
                    self.job_priority, self.worker_priority
                ),
                start,
            ),
            Err(e) => logger.log(
                LogLevel::Warn,
                &format!(
                    "job failed: job_priority={:?} worker_priority={:?} error={e}",
                    self.job_priority, self.worker_priority
                ),
            ),
        }
    }
}

/// A unit of work: a priority tag, an optional byte payload, exactly one
/// work carrier, and an optional on-disk spill location.
pub struct Job<P> {
    priority: P,
    payload: Option<Vec<u8>>,
    carrier: Option<Box<dyn Work<P>>>,
    spill_path: Option<PathBuf>,
    pool: Option<PoolHandle<P>>,
}

impl<P: fmt::Debug> fmt::Debug for Job<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("priority", &self.priority)
            .field("payload_len", &self.payload.as_ref().map(Vec::len))
            .field("has_carrier", &self.carrier.is_some())
            .field("spill_path", &self.spill_path)
            .finish()
    }
}

impl<P: Copy> Job<P> {
    /// A job whose work ignores both the dequeuing worker's priority and
    /// any payload.
    pub fn callback(
        priority: P,
        f: impl FnMut() -> Result<(), JobError> + Send + 'static,
    ) -> Self
    where
        P: 'static,
    {
        Job {
            priority,
            payload: None,
            carrier: Some(Box::new(NoArgCallback(f))),
            spill_path: None,
            pool: None,
        }
    }

    /// A job carrying a byte payload, dispatched to a closure that may
    /// mutate it in place (e.g. to produce a reply payload).
    pub fn with_payload(
        priority: P,
        payload: Vec<u8>,
        f: impl FnMut(&mut Vec<u8>) -> Result<(), JobError> + Send + 'static,
    ) -> Self
    where
        P: 'static,
    {
        Job {
            priority,
            payload: Some(payload),
            carrier: Some(Box::new(PayloadCallback(f))),
            spill_path: None,
            pool: None,
        }
    }

    /// A job carrying a byte payload but no work carrier at all.
    ///
    /// Rejects construction with [`JobError::NoCarrier`] rather than
    /// silently reporting success on execution — a job that does nothing
    /// and reports success hides producer bugs more often than it models
    /// an intentional no-op.
    pub fn data_only(priority: P, payload: Vec<u8>) -> Result<Self, JobError> {
        let _ = (priority, &payload);
        Err(JobError::NoCarrier)
    }

    /// A job whose work is a caller-supplied [`Work`] implementation,
    /// given both the payload and the priority of the worker that ends up
    /// running it (useful for fallback-aware handlers).
    pub fn overridden(
        priority: P,
        payload: Vec<u8>,
        work: impl Work<P> + 'static,
    ) -> Self
    where
        P: 'static,
    {
        Job {
            priority,
            payload: Some(payload),
            carrier: Some(Box::new(work)),
            spill_path: None,
            pool: None,
        }
    }

    pub fn priority(&self) -> P {
        self.priority
    }

    pub(crate) fn set_pool(&mut self, pool: PoolHandle<P>) {
        self.pool = Some(pool);
    }

    /// The weak back-reference to the owning pool, usable from inside a
    /// work method to re-enqueue a follow-up job. Resolves to `None` if
    /// the pool has already been torn down — re-enqueuing in that case
    /// drops the new job without error.
    pub fn pool(&self) -> Option<&PoolHandle<P>> {
        self.pool.as_ref()
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    pub fn is_spilled(&self) -> bool {
        self.spill_path.is_some()
    }

    /// Writes `payload` to `<scratch_dir>/<128-bit random hex>.job` and
    /// clears the in-memory copy. No-op (beyond the file write) if the
    /// job currently has no payload.
    pub fn spill_to_disk(&mut self, scratch_dir: &Path) -> Result<(), JobError> {
        let Some(payload) = self.payload.take() else {
            return Ok(());
        };
        let file_name = format!("{}.job", uuid::Uuid::new_v4().simple());
        let path = scratch_dir.join(file_name);
        std::fs::write(&path, &payload)?;
        self.spill_path = Some(path);
        Ok(())
    }

    /// Rehydrates the in-memory payload from `spill_path` if one is set.
    /// Idempotent: a job with no spill path (or one already loaded) is a
    /// no-op.
    pub fn load(&mut self) -> Result<(), JobError> {
        let Some(path) = self.spill_path.take() else {
            return Ok(());
        };
        let payload = std::fs::read(&path)?;
        let _ = std::fs::remove_file(&path);
        self.payload = Some(payload);
        Ok(())
    }

    /// Restores any spilled payload, invokes the installed carrier, and
    /// converts a user panic into [`JobError::UserFault`] rather than
    /// unwinding past this call — the worker thread must survive a
    /// faulty job.
    pub fn work(&mut self, worker_priority: P) -> Result<(), JobError> {
        self.load()?;
        let mut payload = self.payload.take().unwrap_or_default();
        let Some(mut carrier) = self.carrier.take() else {
            self.payload = Some(payload);
            return Err(JobError::NoCarrier);
        };
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            carrier.run(worker_priority, &mut payload)
        }));
        self.payload = Some(payload);
        self.carrier = Some(carrier);
        match result {
            Ok(inner) => inner,
            Err(panic) => {
                let message = panic_message(panic);
                Err(JobError::UserFault(message))
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "job panicked with a non-string payload".to_string()
    }
}
