use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use proptest::prelude::*;

use dog_batch::{
    BatchConfig, BatchController, BatchError, ConfigError, HostReading, MetricTargets,
    MetricsSnapshot, ScriptedSource, SourceLifecycle,
};

/// Test factory functions
fn idle_reading() -> HostReading {
    HostReading::new(0.0, 0.0, 0.0)
}

fn at_target_reading() -> HostReading {
    HostReading::new(75.0, 150.0, 75.0)
}

fn scripted_controller(
    config: BatchConfig,
    lifecycle: &SourceLifecycle,
    readings: Vec<HostReading>,
) -> BatchController {
    let lifecycle = lifecycle.clone();
    BatchController::with_config(config).with_source(move || {
        ScriptedSource::new(readings.clone()).with_lifecycle(lifecycle.clone())
    })
}

/// Progress log entries: `(processed, concurrency)`
type ProgressLog = Arc<Mutex<Vec<(usize, usize)>>>;

fn with_progress_log(config: BatchConfig) -> (BatchConfig, ProgressLog) {
    let log: ProgressLog = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let config = config.on_progress(move |processed: usize, _: &MetricsSnapshot, concurrency: usize| {
        sink.lock().push((processed, concurrency));
    });
    (config, log)
}

fn concurrencies(log: &ProgressLog) -> Vec<usize> {
    log.lock().iter().map(|(_, concurrency)| *concurrency).collect()
}

/// A1. Inverted Bounds Fail Before Any Work
#[tokio::test]
async fn test_inverted_bounds_fail_without_side_effects() {
    let sources_built = Arc::new(AtomicUsize::new(0));
    let items_run = Arc::new(AtomicUsize::new(0));
    let progress_calls = Arc::new(AtomicUsize::new(0));

    let calls = progress_calls.clone();
    let config = BatchConfig::new()
        .with_min_concurrency(10)
        .with_max_concurrency(5)
        .on_progress(move |_, _, _| {
            calls.fetch_add(1, Ordering::SeqCst);
        });

    let lifecycle = SourceLifecycle::new();
    let built = sources_built.clone();
    let source_lifecycle = lifecycle.clone();
    let controller = BatchController::with_config(config).with_source(move || {
        built.fetch_add(1, Ordering::SeqCst);
        ScriptedSource::new(Vec::new()).with_lifecycle(source_lifecycle.clone())
    });

    let make_items = || {
        (0..10).map(|i| {
            let items_run = items_run.clone();
            move || async move {
                items_run.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(i)
            }
        })
    };

    // Act: both entry points
    let all_result = controller.all(make_items()).await;
    let settled_result = controller.all_settled(make_items()).await;

    // Assert: configuration error, nothing started
    assert_eq!(
        all_result,
        Err(BatchError::Configuration(ConfigError::InvalidBounds { min: 10, max: 5 }))
    );
    assert_eq!(settled_result, Err(ConfigError::InvalidBounds { min: 10, max: 5 }));
    assert_eq!(sources_built.load(Ordering::SeqCst), 0);
    assert_eq!(lifecycle.starts(), 0);
    assert_eq!(items_run.load(Ordering::SeqCst), 0);
    assert_eq!(progress_calls.load(Ordering::SeqCst), 0);
}

/// A2. Zero Target Rejected Up Front
#[tokio::test]
async fn test_zero_custom_target_rejected() {
    let lifecycle = SourceLifecycle::new();
    let config = BatchConfig::new()
        .with_targets(MetricTargets::default().with_custom("db_pool", 0.0, || 0.0));
    let controller = scripted_controller(config, &lifecycle, vec![idle_reading()]);

    let items = (0..3).map(|i| move || async move { Ok::<_, ()>(i) });
    let result = controller.all(items).await;

    assert!(matches!(
        result,
        Err(BatchError::Configuration(ConfigError::InvalidTarget { ref metric, .. })) if metric == "db_pool"
    ));
    assert_eq!(lifecycle.starts(), 0);
}

/// B1. All Returns Every Value In Order
#[tokio::test]
async fn test_all_returns_identical_values_in_order() {
    let value = 0.42_f64;
    let tasks = (0..100).map(|_| move || async move { Ok::<_, String>(value) });

    // Act: default runtime sampler
    let results = dog_batch::all(tasks, BatchConfig::default()).await.unwrap();

    // Assert: 100 copies, in order
    assert_eq!(results, vec![value; 100]);
}

/// B2. All Preserves Submission Order Across Uneven Durations
#[tokio::test]
async fn test_all_preserves_order_with_uneven_durations() {
    let lifecycle = SourceLifecycle::new();
    let controller = scripted_controller(BatchConfig::default(), &lifecycle, vec![idle_reading()]);

    let tasks = (0..40u64).map(|i| {
        move || async move {
            tokio::time::sleep(Duration::from_millis((40 - i) % 7)).await;
            Ok::<_, String>(i)
        }
    });

    let results = controller.all(tasks).await.unwrap();
    assert_eq!(results, (0..40).collect::<Vec<_>>());
}

/// B3. All Settled Reports Each Outcome At Its Index
#[tokio::test]
async fn test_all_settled_marks_even_items_failed() {
    let tasks = (1..=100).map(|v: u32| {
        move || async move {
            if v % 2 == 0 {
                return Err("Even number".to_string());
            }
            Ok(v)
        }
    });

    let outcomes = dog_batch::all_settled(tasks, BatchConfig::default()).await.unwrap();

    let expected: Vec<Result<u32, String>> = (1..=100)
        .map(|v| {
            if v % 2 == 0 {
                Err("Even number".to_string())
            } else {
                Ok(v)
            }
        })
        .collect();
    assert_eq!(outcomes, expected);
}

/// B4. Empty Input Still Runs The Probe Lifecycle
#[tokio::test]
async fn test_empty_input() {
    let lifecycle = SourceLifecycle::new();
    let (config, log) = with_progress_log(BatchConfig::default());
    let controller = scripted_controller(config, &lifecycle, vec![idle_reading()]);

    let tasks: Vec<fn() -> std::future::Ready<Result<u8, ()>>> = Vec::new();
    let results = controller.all(tasks).await.unwrap();

    assert!(results.is_empty());
    assert!(log.lock().is_empty());
    assert_eq!(lifecycle.starts(), 1);
    assert_eq!(lifecycle.stops(), 1);
}

/// C1. First Failure In Submission Order Wins
#[tokio::test]
async fn test_fail_fast_reports_first_failure_in_order() {
    let lifecycle = SourceLifecycle::new();
    let controller = scripted_controller(BatchConfig::default(), &lifecycle, vec![idle_reading()]);
    let started = Arc::new(AtomicUsize::new(0));

    // Batch one is item 1, batch two is items 2..=12
    let tasks = (1..=50).map(|i| {
        let started = started.clone();
        move || async move {
            started.fetch_add(1, Ordering::SeqCst);
            match i {
                4 => {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Err(format!("item {}", i))
                }
                9 => Err(format!("item {}", i)),
                _ => Ok(i),
            }
        }
    });

    let result = controller.all(tasks).await;

    assert_eq!(result, Err(BatchError::Item("item 4".to_string())));
    assert_eq!(started.load(Ordering::SeqCst), 12);
    assert_eq!(lifecycle.stops(), 1);
}

/// C2. Failures Never Stop All Settled
#[tokio::test]
async fn test_all_settled_runs_everything_despite_failures() {
    let lifecycle = SourceLifecycle::new();
    let (config, log) = with_progress_log(BatchConfig::default());
    let controller = scripted_controller(config, &lifecycle, vec![idle_reading()]);

    let tasks = (0..30).map(|i| move || async move { Err::<(), _>(i) });
    let outcomes = controller.all_settled(tasks).await.unwrap();

    assert_eq!(outcomes, (0..30).map(Err).collect::<Vec<Result<(), i32>>>());
    assert_eq!(log.lock().last().map(|(processed, _)| *processed), Some(30));
}

/// D1. Progress Counts Strictly Increase To The Total
#[tokio::test]
async fn test_progress_counts_increase_to_total() {
    let lifecycle = SourceLifecycle::new();
    let (config, log) = with_progress_log(BatchConfig::default());
    let controller = scripted_controller(config, &lifecycle, vec![idle_reading()]);

    let tasks = (0..250).map(|i| move || async move { Ok::<_, ()>(i) });
    controller.all(tasks).await.unwrap();

    let log = log.lock().clone();
    assert!(log.windows(2).all(|pair| pair[0].0 < pair[1].0));
    assert_eq!(log.last().map(|(processed, _)| *processed), Some(250));
    // Once per batch, not once per item
    assert!(log.len() < 250);
}

/// D2. One Probe Per Call
#[tokio::test]
async fn test_one_probe_started_and_stopped_per_call() {
    let lifecycle = SourceLifecycle::new();
    let controller = scripted_controller(BatchConfig::default(), &lifecycle, vec![idle_reading()]);

    for _ in 0..2 {
        let tasks = (0..20).map(|i| move || async move { Ok::<_, ()>(i) });
        controller.all(tasks).await.unwrap();
    }

    assert_eq!(lifecycle.starts(), 2);
    assert_eq!(lifecycle.stops(), 2);
    // One snapshot per batch: 1 + 11 + 8 items per call
    assert_eq!(lifecycle.reads(), 6);
}

/// E1. Metrics Exactly At Target Hold Concurrency
#[tokio::test]
async fn test_metrics_at_target_hold_concurrency() {
    let lifecycle = SourceLifecycle::new();
    let (config, log) = with_progress_log(BatchConfig::new().with_min_concurrency(3));
    let controller = scripted_controller(config, &lifecycle, vec![at_target_reading()]);

    let tasks = (0..90).map(|i| move || async move { Ok::<_, ()>(i) });
    controller.all(tasks).await.unwrap();

    // Signal is one adjustment-factor unit (0.1), which rounds away
    let seen = concurrencies(&log);
    assert_eq!(seen.len(), 30);
    assert!(seen.iter().all(|c| *c == 3));
}

/// E2. Custom Metric Pinned At Target Plateaus Immediately
#[tokio::test]
async fn test_custom_metric_at_target_plateaus() {
    let lifecycle = SourceLifecycle::new();
    let targets = MetricTargets::default().with_custom("db_pool", 0.8, || 0.8);
    let (config, log) = with_progress_log(
        BatchConfig::new().with_min_concurrency(4).with_targets(targets),
    );
    let controller = scripted_controller(config, &lifecycle, vec![idle_reading()]);

    let tasks = (0..1000).map(|i| move || async move { Ok::<_, ()>(i) });
    let results = controller.all(tasks).await.unwrap();

    assert_eq!(results.len(), 1000);
    assert!(concurrencies(&log).iter().all(|c| *c == 4));
}

/// E3. Saturating Custom Metric Converges To A Plateau
#[tokio::test]
async fn test_custom_metric_converges_to_plateau() {
    let lifecycle = SourceLifecycle::new();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    // Pool saturation: peak simultaneous items of the last batch, target 20
    let gauge = peak.clone();
    let targets = MetricTargets::default()
        .with_custom("pool_in_use", 20.0, move || gauge.swap(0, Ordering::SeqCst) as f64);
    let (config, log) = with_progress_log(BatchConfig::new().with_targets(targets));
    let controller = scripted_controller(config, &lifecycle, vec![idle_reading()]);

    let tasks = (0..1000).map(|i| {
        let in_flight = in_flight.clone();
        let peak = peak.clone();
        move || async move {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok::<_, ()>(i)
        }
    });

    let results = controller.all(tasks).await.unwrap();
    assert_eq!(results.len(), 1000);

    let seen = concurrencies(&log);
    assert_eq!(&seen[..6], &[1, 11, 16, 18, 19, 20]);
    assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(seen[5..].iter().all(|c| *c == 20));
}

/// E4. Overloaded Host Backs Off To The Floor
#[tokio::test]
async fn test_overload_backs_off_to_floor() {
    let lifecycle = SourceLifecycle::new();
    let (config, log) = with_progress_log(
        BatchConfig::new().with_min_concurrency(2).with_max_concurrency(40),
    );
    let readings = vec![
        idle_reading(),
        idle_reading(),
        idle_reading(),
        idle_reading(),
        HostReading::new(20.0, 900.0, 20.0),
    ];
    let controller = scripted_controller(config, &lifecycle, readings);

    let tasks = (0..200).map(|i| move || async move { Ok::<_, ()>(i) });
    controller.all(tasks).await.unwrap();

    let seen = concurrencies(&log);
    assert_eq!(&seen[..5], &[2, 12, 22, 32, 40]);
    assert_eq!(*seen.last().unwrap(), 2);
    assert!(seen.iter().all(|c| (2..=40).contains(c)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// F1. Concurrency Never Leaves Its Bounds
    #[test]
    fn prop_concurrency_stays_within_bounds(
        min in 1usize..8,
        span in 0usize..40,
        readings in prop::collection::vec((0.0f64..300.0, 0.0f64..600.0, 0.0f64..300.0), 1..20),
        items in 0usize..300,
    ) {
        let max = min + span;
        let readings = readings
            .into_iter()
            .map(|(cpu, delay, utilization)| HostReading::new(cpu, delay, utilization))
            .collect();

        let lifecycle = SourceLifecycle::new();
        let (config, log) = with_progress_log(
            BatchConfig::new().with_min_concurrency(min).with_max_concurrency(max),
        );
        let controller = scripted_controller(config, &lifecycle, readings);

        let tasks = (0..items).map(|i| move || async move { Ok::<_, ()>(i) });
        let results = tokio_test::block_on(controller.all(tasks)).unwrap();

        prop_assert_eq!(results.len(), items);
        prop_assert!(concurrencies(&log).iter().all(|c| (min..=max).contains(c)));
        prop_assert_eq!(lifecycle.starts(), 1);
        prop_assert_eq!(lifecycle.stops(), 1);
    }
}
