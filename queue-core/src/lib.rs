//! Priority-aware worker pool and type-partitioned job queue.
//!
//! A multi-priority [`queue::Queue`] feeds [`worker::Worker`] threads
//! managed by a [`pool::Pool`], dispatching [`job::Job`]s whose payload is
//! typically a [`queue_messages::Container`]. Logging, the clock, and other
//! ambient concerns are injected traits in [`collaborators`], never a
//! process-wide global.

pub mod collaborators;
pub mod config;
pub mod job;
pub mod metrics;
pub mod pool;
pub mod priority;
pub mod queue;
pub mod worker;

pub use metrics::install_prometheus_exporter;

pub use job::Job;
pub use job::JobError;
pub use job::Work;
pub use pool::Pool;
pub use pool::PoolHandle;
pub use priority::Priority;
pub use queue::Queue;
pub use queue::QueueError;
pub use queue::QueueStats;
pub use worker::is_worker_thread;
pub use worker::Worker;
pub use worker::WorkerError;

/// The bound every priority tag in this crate must satisfy: cheap to copy
/// around, usable as a hash-map key, and sendable across the worker
/// threads that dequeue by it. The queue and worker are otherwise generic
/// over what "priority" means.
pub trait PriorityTag: Copy + Eq + std::hash::Hash + std::fmt::Debug + Send + Sync + 'static {}

impl<T> PriorityTag for T where T: Copy + Eq + std::hash::Hash + std::fmt::Debug + Send + Sync + 'static {}
