pub mod probe;
pub mod sampler;
pub mod source;

pub use probe::MetricsProbe;
pub use sampler::RuntimeSampler;
pub use source::{MetricsSource, ScriptedSource, SourceLifecycle};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

pub const DEFAULT_CPU_UTILIZATION_TARGET: f64 = 75.0;
pub const DEFAULT_SCHEDULER_UTILIZATION_TARGET: f64 = 75.0;
pub const DEFAULT_SCHEDULER_DELAY_MS_TARGET: f64 = 150.0;

/// Accessor returning the current value of a custom metric
pub type MetricFn = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Raw reading from a host metrics source. `None` means not sampled yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HostReading {
    pub cpu_utilization: Option<f64>,
    pub scheduler_delay_ms: Option<f64>,
    pub scheduler_utilization: Option<f64>,
}

impl HostReading {
    /// Reading with every built-in metric available
    pub fn new(cpu_utilization: f64, scheduler_delay_ms: f64, scheduler_utilization: f64) -> Self {
        Self {
            cpu_utilization: Some(cpu_utilization),
            scheduler_delay_ms: Some(scheduler_delay_ms),
            scheduler_utilization: Some(scheduler_utilization),
        }
    }
}

/// Operator-registered health indicator evaluated alongside the built-ins
#[derive(Clone)]
pub struct CustomMetric {
    pub name: String,
    pub current_value: MetricFn,
    pub target: f64,
}

impl CustomMetric {
    pub fn new<F>(name: impl Into<String>, target: f64, current_value: F) -> Self
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            current_value: Arc::new(current_value),
            target,
        }
    }
}

impl fmt::Debug for CustomMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomMetric")
            .field("name", &self.name)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// Health targets the control loop steers toward
#[derive(Debug, Clone)]
pub struct MetricTargets {
    /// Process-host CPU utilization, percent
    pub cpu_utilization: f64,
    /// Fraction of time the async scheduler is busy, percent
    pub scheduler_utilization: f64,
    /// Scheduler queuing delay, milliseconds
    pub scheduler_delay_ms: f64,
    pub custom: Vec<CustomMetric>,
}

impl Default for MetricTargets {
    fn default() -> Self {
        Self {
            cpu_utilization: DEFAULT_CPU_UTILIZATION_TARGET,
            scheduler_utilization: DEFAULT_SCHEDULER_UTILIZATION_TARGET,
            scheduler_delay_ms: DEFAULT_SCHEDULER_DELAY_MS_TARGET,
            custom: Vec::new(),
        }
    }
}

impl MetricTargets {
    pub fn with_cpu_utilization(mut self, percent: f64) -> Self {
        self.cpu_utilization = percent;
        self
    }

    pub fn with_scheduler_utilization(mut self, percent: f64) -> Self {
        self.scheduler_utilization = percent;
        self
    }

    pub fn with_scheduler_delay_ms(mut self, millis: f64) -> Self {
        self.scheduler_delay_ms = millis;
        self
    }

    /// Register a custom metric
    pub fn with_custom<F>(mut self, name: impl Into<String>, target: f64, current_value: F) -> Self
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        self.custom.push(CustomMetric::new(name, target, current_value));
        self
    }

    /// Iterate built-in targets as `(name, target)` pairs
    pub fn builtin(&self) -> [(&'static str, f64); 3] {
        [
            ("cpu_utilization", self.cpu_utilization),
            ("scheduler_utilization", self.scheduler_utilization),
            ("scheduler_delay_ms", self.scheduler_delay_ms),
        ]
    }

    /// Reject targets the normalized error cannot divide by
    pub fn validate(&self) -> Result<(), ConfigError> {
        let builtin = self.builtin().map(|(name, target)| (name.to_string(), target));
        let custom = self.custom.iter().map(|m| (m.name.clone(), m.target));

        for (metric, value) in builtin.into_iter().chain(custom) {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidTarget { metric, value });
            }
        }

        let mut seen = std::collections::HashSet::new();
        for metric in &self.custom {
            if !seen.insert(metric.name.as_str()) {
                return Err(ConfigError::DuplicateMetric(metric.name.clone()));
            }
        }

        Ok(())
    }
}

/// Point-in-time view of every metric at a batch boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub cpu_utilization: f64,
    pub scheduler_utilization: f64,
    pub scheduler_delay_ms: f64,
    pub custom: HashMap<String, f64>,
}

impl MetricsSnapshot {
    /// Built-in observations as `(name, observed)` pairs, in the order of [`MetricTargets::builtin`]
    pub fn builtin(&self) -> [(&'static str, f64); 3] {
        [
            ("cpu_utilization", self.cpu_utilization),
            ("scheduler_utilization", self.scheduler_utilization),
            ("scheduler_delay_ms", self.scheduler_delay_ms),
        ]
    }

    /// Get a custom metric observation by name
    pub fn custom(&self, name: &str) -> Option<f64> {
        self.custom.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_targets() {
        let targets = MetricTargets::default();
        assert_eq!(targets.cpu_utilization, 75.0);
        assert_eq!(targets.scheduler_utilization, 75.0);
        assert_eq!(targets.scheduler_delay_ms, 150.0);
        assert!(targets.custom.is_empty());
        assert!(targets.validate().is_ok());
    }

    #[test]
    fn test_zero_target_rejected() {
        let targets = MetricTargets::default().with_scheduler_delay_ms(0.0);
        assert_eq!(
            targets.validate(),
            Err(ConfigError::InvalidTarget {
                metric: "scheduler_delay_ms".to_string(),
                value: 0.0,
            })
        );

        let targets = MetricTargets::default().with_custom("db_pool", 0.0, || 1.0);
        assert!(matches!(
            targets.validate(),
            Err(ConfigError::InvalidTarget { ref metric, .. }) if metric == "db_pool"
        ));
    }

    #[test]
    fn test_non_finite_target_rejected() {
        let targets = MetricTargets::default().with_cpu_utilization(f64::NAN);
        assert!(matches!(targets.validate(), Err(ConfigError::InvalidTarget { .. })));
    }

    #[test]
    fn test_duplicate_custom_metric_rejected() {
        let targets = MetricTargets::default()
            .with_custom("db_pool", 0.8, || 0.1)
            .with_custom("db_pool", 0.9, || 0.2);
        assert_eq!(
            targets.validate(),
            Err(ConfigError::DuplicateMetric("db_pool".to_string()))
        );
    }
}
