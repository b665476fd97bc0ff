//! Concurrency control law.
//!
//! Two policies are available. [`AdjustmentPolicy::Proportional`] applies the
//! probe's adjustment signal: the smallest normalized error across all metrics,
//! scaled by [`ControlTuning::adjustment_factor`]. [`AdjustmentPolicy::Step`]
//! grows or shrinks by a fixed fraction of the current level depending on a
//! health verdict.

use std::fmt;
use std::sync::Arc;

use crate::metrics::{MetricTargets, MetricsSnapshot};
use crate::ConfigError;

/// Multiplier from normalized error to concurrency delta
pub const DEFAULT_ADJUSTMENT_FACTOR: f64 = 0.1;

/// Span of the normalized error between "at target" (1) and "idle" (1 + scale)
pub const DEFAULT_ERROR_SCALE: f64 = 99.0;

/// Fraction of the current level added or removed by the step policy
pub const DEFAULT_STEP_FACTOR: f64 = 0.3;

/// Health verdict for the step policy: `(snapshot, concurrency) -> healthy`
pub type HealthCheck = Arc<dyn Fn(&MetricsSnapshot, usize) -> bool + Send + Sync>;

/// Inclusive concurrency range of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyBounds {
    pub min: usize,
    pub max: usize,
}

impl ConcurrencyBounds {
    /// Validate a range. The floor is at least 1.
    pub fn new(min: usize, max: usize) -> Result<Self, ConfigError> {
        let min = min.max(1);
        if max < min {
            return Err(ConfigError::InvalidBounds { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn contains(&self, concurrency: usize) -> bool {
        (self.min..=self.max).contains(&concurrency)
    }
}

/// Constants of the proportional control law
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlTuning {
    pub adjustment_factor: f64,
    pub error_scale: f64,
}

impl Default for ControlTuning {
    fn default() -> Self {
        Self {
            adjustment_factor: DEFAULT_ADJUSTMENT_FACTOR,
            error_scale: DEFAULT_ERROR_SCALE,
        }
    }
}

impl ControlTuning {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.adjustment_factor.is_finite() || self.adjustment_factor <= 0.0 {
            return Err(ConfigError::InvalidTuning {
                name: "adjustment_factor",
                value: self.adjustment_factor,
            });
        }
        if !self.error_scale.is_finite() || self.error_scale <= 0.0 {
            return Err(ConfigError::InvalidTuning {
                name: "error_scale",
                value: self.error_scale,
            });
        }
        Ok(())
    }
}

/// How the concurrency delta is derived at each batch boundary
#[derive(Clone, Default)]
pub enum AdjustmentPolicy {
    /// Apply the probe's adjustment signal
    #[default]
    Proportional,
    /// Move by `max(1, round(concurrency * step_factor))`, up when healthy and
    /// down otherwise. Without a health check, healthy means every metric is
    /// strictly below its target.
    Step {
        step_factor: f64,
        health_check: Option<HealthCheck>,
    },
}

impl AdjustmentPolicy {
    /// Step policy with the default factor and health verdict
    pub fn step() -> Self {
        Self::Step {
            step_factor: DEFAULT_STEP_FACTOR,
            health_check: None,
        }
    }

    /// Step policy judged by a caller-supplied health check
    pub fn step_with<F>(step_factor: f64, health_check: F) -> Self
    where
        F: Fn(&MetricsSnapshot, usize) -> bool + Send + Sync + 'static,
    {
        Self::Step {
            step_factor,
            health_check: Some(Arc::new(health_check)),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Proportional => Ok(()),
            Self::Step { step_factor, .. } => {
                if !step_factor.is_finite() || *step_factor < 0.0 {
                    return Err(ConfigError::InvalidTuning {
                        name: "step_factor",
                        value: *step_factor,
                    });
                }
                Ok(())
            }
        }
    }

    /// Signed delta for the next batch. `signal` is only evaluated by the
    /// proportional policy.
    pub fn delta(
        &self,
        snapshot: &MetricsSnapshot,
        targets: &MetricTargets,
        concurrency: usize,
        signal: impl FnOnce() -> f64,
    ) -> f64 {
        match self {
            Self::Proportional => signal(),
            Self::Step {
                step_factor,
                health_check,
            } => {
                let increment = round_half_up(concurrency as f64 * step_factor).max(1.0);
                let healthy = match health_check {
                    Some(check) => check(snapshot, concurrency),
                    None => within_targets(snapshot, targets),
                };
                if healthy {
                    increment
                } else {
                    -increment
                }
            }
        }
    }
}

impl fmt::Debug for AdjustmentPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proportional => f.write_str("Proportional"),
            Self::Step {
                step_factor,
                health_check,
            } => f
                .debug_struct("Step")
                .field("step_factor", step_factor)
                .field("custom_health_check", &health_check.is_some())
                .finish(),
        }
    }
}

/// `1 + ((target - observed) / target) * scale`.
///
/// Exactly at target yields 1, an idle metric yields `1 + scale`, and
/// overshoot goes negative. `target` must be positive.
pub fn normalized_error(target: f64, observed: f64, scale: f64) -> f64 {
    1.0 + ((target - observed) / target) * scale
}

/// `clamp(round(current + delta), min, max)`, rounding halves up
pub fn next_concurrency(current: usize, delta: f64, bounds: ConcurrencyBounds) -> usize {
    let proposed = round_half_up(current as f64 + delta);
    if proposed.is_nan() {
        return current.clamp(bounds.min, bounds.max);
    }
    proposed.clamp(bounds.min as f64, bounds.max as f64) as usize
}

/// Every built-in and custom metric strictly below its target
pub fn within_targets(snapshot: &MetricsSnapshot, targets: &MetricTargets) -> bool {
    let builtin_ok = targets
        .builtin()
        .into_iter()
        .zip(snapshot.builtin())
        .all(|((_, target), (_, observed))| observed < target);

    builtin_ok
        && targets.custom.iter().all(|metric| {
            snapshot
                .custom(&metric.name)
                .map_or(true, |observed| observed < metric.target)
        })
}

fn round_half_up(value: f64) -> f64 {
    (value + 0.5).floor()
}
