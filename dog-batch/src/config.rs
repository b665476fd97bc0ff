//! # Batch configuration
//!
//! [`BatchConfig`] carries the concurrency range, the metric targets, the
//! control policy and an optional progress callback. Defaults match the
//! documented values; builder methods override them.
//!
//! ## Environment overrides
//! Numeric settings can be layered from environment variables sharing a
//! prefix, with `__` separating nested keys:
//!
//! ```bash
//! export DOGBATCH__MAX_CONCURRENCY=200
//! export DOGBATCH__TARGETS__CPU_UTILIZATION=60
//! ```
//!
//! ```rust
//! use dog_batch::BatchConfig;
//!
//! let config = BatchConfig::from_vars(
//!     "DOGBATCH__",
//!     [("DOGBATCH__MAX_CONCURRENCY".to_string(), "200".to_string())],
//! )
//! .unwrap();
//! assert_eq!(config.max_concurrency, 200);
//! ```
//!
//! Custom metrics and callbacks are code-only.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::control::{AdjustmentPolicy, ConcurrencyBounds, ControlTuning};
use crate::metrics::sampler::DEFAULT_SAMPLE_INTERVAL;
use crate::metrics::{MetricTargets, MetricsSnapshot};
use crate::ConfigError;

pub const DEFAULT_MIN_CONCURRENCY: usize = 1;
pub const DEFAULT_MAX_CONCURRENCY: usize = 500;

/// Progress callback: `(processed_count, snapshot, concurrency_of_last_batch)`
pub type ProgressFn = Arc<dyn Fn(usize, &MetricsSnapshot, usize) + Send + Sync>;

/// Configuration of one adaptive run
#[derive(Clone)]
pub struct BatchConfig {
    /// Lower bound and starting point of the concurrency level (floored at 1)
    pub min_concurrency: usize,
    /// Upper bound of the concurrency level
    pub max_concurrency: usize,
    pub targets: MetricTargets,
    /// Spacing of background samples taken by the default sampler
    pub sample_interval: Duration,
    pub tuning: ControlTuning,
    pub policy: AdjustmentPolicy,
    pub on_progress: Option<ProgressFn>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            min_concurrency: DEFAULT_MIN_CONCURRENCY,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            targets: MetricTargets::default(),
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            tuning: ControlTuning::default(),
            policy: AdjustmentPolicy::default(),
            on_progress: None,
        }
    }
}

impl BatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_concurrency(mut self, min: usize) -> Self {
        self.min_concurrency = min;
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_targets(mut self, targets: MetricTargets) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    pub fn with_tuning(mut self, tuning: ControlTuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn with_policy(mut self, policy: AdjustmentPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Call `callback` once per completed batch
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, &MetricsSnapshot, usize) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    /// Check every setting and resolve the concurrency range
    pub fn validate(&self) -> Result<ConcurrencyBounds, ConfigError> {
        let bounds = ConcurrencyBounds::new(self.min_concurrency, self.max_concurrency)?;
        self.targets.validate()?;
        self.tuning.validate()?;
        self.policy.validate()?;
        Ok(bounds)
    }

    /// Defaults overridden by process environment variables under `prefix`
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_vars(prefix, std::env::vars())
    }

    /// Defaults overridden by `(key, value)` pairs under `prefix`
    pub fn from_vars<I>(prefix: &str, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = Self::default();
        config.apply_vars(prefix, vars)?;
        Ok(config)
    }

    /// Layer `(key, value)` overrides under `prefix` onto this config.
    /// Unknown keys are ignored.
    pub fn apply_vars<I>(&mut self, prefix: &str, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(stripped) = key.strip_prefix(prefix) else {
                continue;
            };
            let normalized = stripped.to_lowercase().replace("__", ".");

            match normalized.as_str() {
                "min_concurrency" => self.min_concurrency = parse(&key, &value)?,
                "max_concurrency" => self.max_concurrency = parse(&key, &value)?,
                "sample_interval_ms" => {
                    self.sample_interval = Duration::from_millis(parse(&key, &value)?)
                }
                "targets.cpu_utilization" => self.targets.cpu_utilization = parse(&key, &value)?,
                "targets.scheduler_utilization" => {
                    self.targets.scheduler_utilization = parse(&key, &value)?
                }
                "targets.scheduler_delay_ms" => {
                    self.targets.scheduler_delay_ms = parse(&key, &value)?
                }
                "adjustment_factor" => self.tuning.adjustment_factor = parse(&key, &value)?,
                _ => {}
            }
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

impl fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConfig")
            .field("min_concurrency", &self.min_concurrency)
            .field("max_concurrency", &self.max_concurrency)
            .field("targets", &self.targets)
            .field("sample_interval", &self.sample_interval)
            .field("tuning", &self.tuning)
            .field("policy", &self.policy)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}
