//! Engine configuration: recognized environment/config options for the
//! queue backing and its Prometheus exporter.
//!
//! A bundled `default.toml` is embedded via `lazy_static_include_str!`,
//! layered with an optional local file and environment overrides through
//! the `config` crate, then deserialized into a typed struct with a
//! `validate()` pass.

use config::FileFormat;
use lazy_static_include::lazy_static_include_str;
use serde_derive::Deserialize;

use crate::queue::QueueStrategy;

lazy_static_include_str! {
    DEFAULT_CONFIG => "src/config/default.toml",
}

/// Top-level engine configuration: the recognized queue options plus a
/// Prometheus listen port for the [`crate::metrics::Metrics`] collaborator.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub queue: QueueConfig,
    pub prometheus: PrometheusConfig,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct QueueConfig {
    pub strategy: QueueStrategyConfig,
    pub bounded_capacity: usize,
    pub spill_enabled: bool,
    pub worker_drain_on_stop: bool,
    pub adaptive_promotion_threshold: usize,
}

/// Serde-facing mirror of [`QueueStrategy`] (kept separate so the queue
/// module has no `serde` dependency of its own).
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueStrategyConfig {
    Mutex,
    Lockfree,
    Adaptive,
}

impl From<QueueStrategyConfig> for QueueStrategy {
    fn from(value: QueueStrategyConfig) -> Self {
        match value {
            QueueStrategyConfig::Mutex => QueueStrategy::Mutex,
            QueueStrategyConfig::Lockfree => QueueStrategy::LockFree,
            QueueStrategyConfig::Adaptive => QueueStrategy::Adaptive,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrometheusConfig {
    pub port: u16,
}

impl QueueConfig {
    pub fn validate(&self) {
        assert!(
            self.adaptive_promotion_threshold > 0,
            "adaptive_promotion_threshold must be positive"
        );
    }
}

impl EngineConfig {
    /// Loads `default.toml`, optionally layered with `local_file`, then
    /// with `QUEUE_ENGINE__`-prefixed environment overrides (e.g.
    /// `QUEUE_ENGINE__QUEUE__BOUNDED_CAPACITY=1000`).
    pub fn load(local_file: Option<String>) -> EngineConfig {
        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(&DEFAULT_CONFIG, FileFormat::Toml));

        if let Some(local_file) = local_file {
            builder = builder.add_source(config::File::with_name(&local_file));
        }

        let builder = builder
            .add_source(
                config::Environment::with_prefix("QUEUE_ENGINE")
                    .separator("__")
                    .ignore_empty(true),
            )
            .build()
            .expect("could not load engine configuration");

        builder
            .try_deserialize()
            .expect("could not deserialize engine configuration")
    }

    pub fn validate(&self) {
        self.queue.validate();
    }
}
