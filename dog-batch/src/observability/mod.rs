pub mod metrics;
pub mod tracing;

pub use metrics::{RunMetrics, RunMetricsSnapshot};
pub use self::tracing::{init_tracing, LogFormat};
