//! # dog-batch: Adaptive Batch Execution
//!
//! **Run thousands of async jobs without picking a worker count**
//!
//! dog-batch executes a queue of independent async work items in successive
//! batches. After each batch it samples host and scheduler health, compares
//! it to your targets and resizes the next batch:
//!
//! - **Feedback-controlled concurrency**: the most saturated metric decides how far the next batch grows or shrinks
//! - **Strict ordering**: results come back in submission order, batches never overlap
//! - **Two result shapes**: fail-fast [`all`] or collect-everything [`all_settled`]
//! - **Custom bottlenecks**: register metrics such as connection-pool saturation next to CPU and scheduler delay
//! - **Injectable telemetry**: any [`MetricsSource`] drives the loop, [`ScriptedSource`] replays synthetic readings in tests
//! - **Scoped sampling**: each call starts one sampler and always stops it, including on failure or drop
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dog_batch::prelude::*;
//!
//! # async fn fetch(id: u32) -> Result<String, std::io::Error> { Ok(id.to_string()) }
//! # async fn run() -> Result<(), BatchError<std::io::Error>> {
//! let pool_in_use = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
//! let gauge = pool_in_use.clone();
//!
//! let config = BatchConfig::new()
//!     .with_max_concurrency(200)
//!     .with_targets(
//!         MetricTargets::default()
//!             .with_cpu_utilization(60.0)
//!             .with_custom("db_pool", 40.0, move || {
//!                 gauge.load(std::sync::atomic::Ordering::Relaxed) as f64
//!             }),
//!     )
//!     .on_progress(|processed, snapshot, concurrency| {
//!         tracing::info!(processed, concurrency, cpu = snapshot.cpu_utilization, "progress");
//!     });
//!
//! let jobs = (0..5_000).map(|id| move || fetch(id));
//! let pages = dog_batch::all(jobs, config).await?;
//! assert_eq!(pages.len(), 5_000);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod control;
pub mod controller;
pub mod error;
pub mod metrics;
pub mod observability;

// Core API exports
pub use config::{BatchConfig, ProgressFn};
pub use control::{AdjustmentPolicy, ConcurrencyBounds, ControlTuning, HealthCheck};
pub use controller::{all, all_settled, BatchController};
pub use error::{BatchError, BatchResult, ConfigError};
pub use metrics::{
    CustomMetric, HostReading, MetricTargets, MetricsProbe, MetricsSnapshot, MetricsSource,
    RuntimeSampler, ScriptedSource, SourceLifecycle,
};

// Observability exports
pub use observability::{init_tracing, LogFormat, RunMetrics, RunMetricsSnapshot};

/// Prelude for adaptive batch execution
pub mod prelude {
    // Entry points
    pub use crate::{all, all_settled, BatchController};

    // Configuration
    pub use crate::{AdjustmentPolicy, BatchConfig, MetricTargets};

    // Results
    pub use crate::{BatchError, BatchResult, ConfigError};

    // Telemetry
    pub use crate::{HostReading, MetricsSnapshot, MetricsSource, RunMetrics};
}
