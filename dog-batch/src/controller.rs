use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    config::BatchConfig,
    control::next_concurrency,
    metrics::{MetricsProbe, MetricsSource, RuntimeSampler},
    observability::RunMetrics,
    BatchError, BatchResult, ConfigError,
};

type SourceFactory = Arc<dyn Fn(&BatchConfig) -> Box<dyn MetricsSource> + Send + Sync>;

/// Runs work items in successive batches whose size follows the metrics
/// feedback loop.
///
/// Every call owns a fresh metrics source and probe. Batches never overlap:
/// all items of a batch start together and the next batch is only taken once
/// every item has resolved. Results come back in submission order.
#[derive(Clone)]
pub struct BatchController {
    config: BatchConfig,
    source_factory: SourceFactory,
    metrics: Option<Arc<RunMetrics>>,
}

impl BatchController {
    /// Create a controller with default configuration
    pub fn new() -> Self {
        Self::with_config(BatchConfig::default())
    }

    /// Create controller sampling the runtime with the given configuration
    pub fn with_config(config: BatchConfig) -> Self {
        Self {
            config,
            source_factory: Arc::new(|config: &BatchConfig| {
                Box::new(RuntimeSampler::with_interval(config.sample_interval)) as Box<dyn MetricsSource>
            }),
            metrics: None,
        }
    }

    /// Build each run's metrics source with `factory` instead of the runtime sampler
    pub fn with_source<F, S>(mut self, factory: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: MetricsSource + 'static,
    {
        self.source_factory = Arc::new(move |_: &BatchConfig| Box::new(factory()) as Box<dyn MetricsSource>);
        self
    }

    /// Report batch and adjustment counters into `metrics`
    pub fn with_metrics(mut self, metrics: Arc<RunMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn metrics(&self) -> Option<&Arc<RunMetrics>> {
        self.metrics.as_ref()
    }

    /// Run every item and return their results in order.
    ///
    /// The first failure (in submission order) of a batch aborts the run once
    /// that batch has fully resolved; items not yet scheduled never run.
    pub async fn all<I, F, Fut, T, E>(&self, items: I) -> BatchResult<Vec<T>, E>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut results = Vec::new();
        let failure = self
            .drive(items, |outcomes| {
                for outcome in outcomes {
                    match outcome {
                        Ok(value) => results.push(value),
                        Err(err) => return Some(err),
                    }
                }
                None
            })
            .await?;

        match failure {
            Some(err) => Err(BatchError::Item(err)),
            None => Ok(results),
        }
    }

    /// Run every item and return each outcome in order. Item failures never
    /// stop the run; only an invalid configuration fails the call.
    pub async fn all_settled<I, F, Fut, T, E>(&self, items: I) -> Result<Vec<Result<T, E>>, ConfigError>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut results = Vec::new();
        self.drive(items, |outcomes| {
            results.extend(outcomes);
            None
        })
        .await?;

        Ok(results)
    }

    /// The control loop shared by both entry points. `absorb` takes each
    /// batch's outcomes and returns an error to abort the run.
    #[instrument(name = "adaptive_run", skip_all, fields(run_id = %Uuid::new_v4()))]
    async fn drive<I, F, Fut, T, E, A>(&self, items: I, mut absorb: A) -> Result<Option<E>, ConfigError>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        A: FnMut(Vec<Result<T, E>>) -> Option<E>,
    {
        let bounds = self.config.validate()?;

        let mut probe = MetricsProbe::new(
            (self.source_factory)(&self.config),
            self.config.targets.clone(),
            self.config.tuning,
        );
        probe.start();

        if let Some(metrics) = &self.metrics {
            metrics.record_run_started();
        }
        info!(
            "Starting adaptive run with concurrency bounds [{}, {}]",
            bounds.min, bounds.max
        );

        let mut items = items.into_iter();
        let mut concurrency = bounds.min;
        let mut processed = 0usize;
        let mut batches = 0usize;

        loop {
            let batch: Vec<Fut> = items.by_ref().take(concurrency).map(|item| item()).collect();
            if batch.is_empty() {
                break;
            }

            let outcomes = join_all(batch).await;
            let failed = outcomes.iter().filter(|outcome| outcome.is_err()).count();
            let size = outcomes.len();
            processed += size;
            batches += 1;

            if let Some(metrics) = &self.metrics {
                metrics.record_batch(concurrency, size - failed, failed);
            }

            if let Some(err) = absorb(outcomes) {
                warn!(
                    "Aborting adaptive run: work item failed in batch {} ({} items processed)",
                    batches, processed
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_run_aborted();
                }
                probe.stop();
                return Ok(Some(err));
            }

            let snapshot = probe.snapshot();
            if let Some(on_progress) = &self.config.on_progress {
                on_progress(processed, &snapshot, concurrency);
            }

            let delta = self.config.policy.delta(&snapshot, probe.targets(), concurrency, || {
                probe.adjustment_signal(&snapshot)
            });
            let next = next_concurrency(concurrency, delta, bounds);

            if next != concurrency {
                debug!(
                    "Adjusting concurrency from {} to {} (delta: {:.3}, cpu: {:.1}%, delay: {:.1}ms, utilization: {:.1}%)",
                    concurrency,
                    next,
                    delta,
                    snapshot.cpu_utilization,
                    snapshot.scheduler_delay_ms,
                    snapshot.scheduler_utilization
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_adjustment(concurrency, next);
                }
            }
            concurrency = next;
        }

        probe.stop();
        info!(
            "Adaptive run complete: {} items in {} batches, final concurrency {}",
            processed, batches, concurrency
        );
        Ok(None)
    }
}

impl Default for BatchController {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BatchController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchController")
            .field("config", &self.config)
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

/// Run `items` with the runtime sampler and return their results in order
pub async fn all<I, F, Fut, T, E>(items: I, config: BatchConfig) -> BatchResult<Vec<T>, E>
where
    I: IntoIterator<Item = F>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    BatchController::with_config(config).all(items).await
}

/// Run `items` with the runtime sampler and return every outcome in order
pub async fn all_settled<I, F, Fut, T, E>(
    items: I,
    config: BatchConfig,
) -> Result<Vec<Result<T, E>>, ConfigError>
where
    I: IntoIterator<Item = F>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    BatchController::with_config(config).all_settled(items).await
}
