//! Injected collaborator interfaces. The engine never reaches a
//! process-wide singleton for logging or time — both are passed in at
//! construction instead of resolved through a global.

use std::time::Instant;

/// Severity of a [`Logger::log`] record.
#[derive(Debug, Copy, Clone, Eq, PartialEq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// The logging collaborator the core consumes. Implementations must be
/// cheap and non-blocking — they may run on a worker's hot path.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);

    fn chrono_start(&self) -> Instant {
        Instant::now()
    }

    fn log_duration(&self, level: LogLevel, message: &str, start: Instant) {
        self.log(level, &format!("{message} ({:?})", start.elapsed()));
    }
}

/// The clock collaborator; lets tests substitute a fake clock for
/// deadline-based `dequeue_blocking` calls without sleeping in real time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// A [`Clock`] backed by [`std::time::Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// The default [`Logger`], backed by the `tracing` crate. Just one
/// possible injected implementation, not a global.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Trace => tracing::trace!("{message}"),
            LogLevel::Debug => tracing::debug!("{message}"),
            LogLevel::Info => tracing::info!("{message}"),
            LogLevel::Warn => tracing::warn!("{message}"),
            LogLevel::Error => tracing::error!("{message}"),
        }
    }
}
