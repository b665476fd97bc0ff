use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, warn};

use super::{MetricTargets, MetricsSnapshot, MetricsSource};
use crate::control::{normalized_error, ControlTuning};

/// Turns live host sampling into a snapshot and a signed concurrency delta.
///
/// The probe owns its source for one run. Starting is explicit; stopping
/// happens on [`stop`](Self::stop) or, failing that, on drop, and reaches the
/// source exactly once either way.
pub struct MetricsProbe<S: MetricsSource> {
    source: S,
    targets: MetricTargets,
    tuning: ControlTuning,
    running: bool,
}

impl<S: MetricsSource> MetricsProbe<S> {
    pub fn new(source: S, targets: MetricTargets, tuning: ControlTuning) -> Self {
        Self {
            source,
            targets,
            tuning,
            running: false,
        }
    }

    /// Acquire the sampling mechanism
    pub fn start(&mut self) {
        if !self.running {
            self.source.start();
            self.running = true;
        }
    }

    /// Release the sampling mechanism. Idempotent.
    pub fn stop(&mut self) {
        if self.running {
            self.source.stop();
            self.running = false;
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn targets(&self) -> &MetricTargets {
        &self.targets
    }

    /// Latest built-in readings, unsampled ones as 0, plus one evaluation of
    /// every custom metric
    pub fn snapshot(&self) -> MetricsSnapshot {
        let reading = self.source.read();

        let custom = self
            .targets
            .custom
            .iter()
            .map(|metric| (metric.name.clone(), (metric.current_value)()))
            .collect::<HashMap<_, _>>();

        MetricsSnapshot {
            taken_at: Utc::now(),
            cpu_utilization: reading.cpu_utilization.unwrap_or(0.0),
            scheduler_utilization: reading.scheduler_utilization.unwrap_or(0.0),
            scheduler_delay_ms: reading.scheduler_delay_ms.unwrap_or(0.0),
            custom,
        }
    }

    /// Signed delta to apply to concurrency: the smallest normalized error
    /// across all metrics, scaled by the adjustment factor
    pub fn adjustment_signal(&self, snapshot: &MetricsSnapshot) -> f64 {
        let mut observations: Vec<(&str, f64, f64)> =
            Vec::with_capacity(3 + self.targets.custom.len());

        for ((name, target), (_, observed)) in self.targets.builtin().into_iter().zip(snapshot.builtin()) {
            if !observed.is_finite() {
                warn!("Skipping metric {} with non-finite value {}", name, observed);
                continue;
            }
            observations.push((name, target, observed));
        }

        for metric in &self.targets.custom {
            let Some(observed) = snapshot.custom(&metric.name) else {
                continue;
            };
            if !observed.is_finite() {
                warn!("Skipping custom metric {} with non-finite value {}", metric.name, observed);
                continue;
            }
            observations.push((metric.name.as_str(), metric.target, observed));
        }

        let mut bottleneck: Option<(&str, f64)> = None;
        for (name, target, observed) in observations {
            let error = normalized_error(target, observed, self.tuning.error_scale);
            if bottleneck.map_or(true, |(_, lowest)| error < lowest) {
                bottleneck = Some((name, error));
            }
        }

        // Nothing usable was observed: hold concurrency
        let (name, error) = bottleneck.unwrap_or(("none", 0.0));
        let signal = error * self.tuning.adjustment_factor;

        debug!("Adjustment signal {:.3} driven by {} (error {:.3})", signal, name, error);
        signal
    }
}

impl<S: MetricsSource> Drop for MetricsProbe<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
