use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::runtime::{Handle, RuntimeMetrics};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{HostReading, MetricsSource};

/// Default spacing between two samples
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

const EWMA_ALPHA: f64 = 0.3;
const PROC_STAT_PATH: &str = "/proc/stat";
const PROC_SELF_STAT_PATH: &str = "/proc/self/stat";

/// Host and scheduler sampler backed by a tokio background task.
///
/// Every tick records:
///
/// - **Scheduler delay**: how late the sampler's timer fired, in ms.
/// - **Scheduler utilization**: the share of wall time the runtime's workers
///   spent busy since the previous tick, from tokio's worker busy counters.
///   Where those counters are unavailable (targets without 64-bit atomics)
///   the timer lateness ratio `lateness / (interval + lateness)` stands in.
/// - **CPU utilization**: this process's CPU time (`/proc/self/stat`) as a
///   share of the capacity of all CPUs (`/proc/stat`). Load from other
///   processes on the host does not count. Linux only; `None` elsewhere.
///
/// All three are smoothed with an EWMA. The task is aborted on
/// [`stop`](MetricsSource::stop) and on drop, so it never outlives its owner.
pub struct RuntimeSampler {
    interval: Duration,
    state: Arc<RwLock<SamplerState>>,
    task: Option<JoinHandle<()>>,
}

#[derive(Debug, Default)]
struct SamplerState {
    reading: HostReading,
    previous_cpu: Option<CpuTimes>,
    previous_busy: Option<WorkerBusy>,
}

/// What one tick observed
#[derive(Debug, Clone, Copy)]
struct Tick {
    period: Duration,
    lateness: Duration,
    busy: Option<WorkerBusy>,
    cpu: Option<CpuTimes>,
}

impl RuntimeSampler {
    /// Create a sampler with the default interval
    pub fn new() -> Self {
        Self::with_interval(DEFAULT_SAMPLE_INTERVAL)
    }

    /// Create sampler with custom interval
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            state: Arc::new(RwLock::new(SamplerState::default())),
            task: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    async fn run(period: Duration, metrics: RuntimeMetrics, state: Arc<RwLock<SamplerState>>) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // First tick completes immediately
        ticker.tick().await;
        let mut expected = Instant::now() + period;

        loop {
            ticker.tick().await;
            let now = Instant::now();
            let lateness = now.saturating_duration_since(expected);
            expected = now + period;

            let tick = Tick {
                period,
                lateness,
                busy: WorkerBusy::read(&metrics),
                cpu: read_cpu_times(),
            };
            state.write().record(tick);
        }
    }
}

impl Default for RuntimeSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSource for RuntimeSampler {
    fn start(&mut self) {
        if self.task.is_some() {
            return;
        }

        match Handle::try_current() {
            Ok(handle) => {
                info!("Starting runtime sampler with interval: {:?}", self.interval);
                let metrics = handle.metrics();
                {
                    let mut state = self.state.write();
                    state.previous_cpu = read_cpu_times();
                    state.previous_busy = WorkerBusy::read(&metrics);
                }
                self.task = Some(handle.spawn(Self::run(self.interval, metrics, self.state.clone())));
            }
            Err(_) => {
                warn!("No tokio runtime available, runtime sampler stays idle");
            }
        }
    }

    fn read(&self) -> HostReading {
        self.state.read().reading
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Runtime sampler stopped");
        }
    }
}

impl Drop for RuntimeSampler {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl SamplerState {
    fn record(&mut self, tick: Tick) {
        let delay_ms = tick.lateness.as_secs_f64() * 1000.0;
        self.reading.scheduler_delay_ms = Some(ewma(self.reading.scheduler_delay_ms, delay_ms));

        let busy_pct = match (self.previous_busy, tick.busy) {
            (Some(previous), Some(current)) => current.utilization_since(&previous),
            _ => None,
        }
        .unwrap_or_else(|| lateness_percent(tick.period, tick.lateness));
        self.reading.scheduler_utilization = Some(ewma(self.reading.scheduler_utilization, busy_pct));
        if tick.busy.is_some() {
            self.previous_busy = tick.busy;
        }

        if let (Some(previous), Some(current)) = (self.previous_cpu, tick.cpu) {
            if let Some(pct) = current.utilization_since(&previous) {
                self.reading.cpu_utilization = Some(ewma(self.reading.cpu_utilization, pct));
            }
        }
        if tick.cpu.is_some() {
            self.previous_cpu = tick.cpu;
        }
    }
}

fn ewma(previous: Option<f64>, sample: f64) -> f64 {
    match previous {
        Some(previous) => previous + EWMA_ALPHA * (sample - previous),
        None => sample,
    }
}

/// Share of a tick the scheduler spent unable to run the sampler, percent
fn lateness_percent(period: Duration, lateness: Duration) -> f64 {
    let total = (period + lateness).as_secs_f64();
    if total <= f64::EPSILON {
        return 0.0;
    }
    (lateness.as_secs_f64() / total * 100.0).clamp(0.0, 100.0)
}

/// Busy time summed over every runtime worker at one instant
#[derive(Debug, Clone, Copy, PartialEq)]
struct WorkerBusy {
    busy: Duration,
    workers: usize,
    at: Instant,
}

impl WorkerBusy {
    #[cfg(target_has_atomic = "64")]
    fn read(metrics: &RuntimeMetrics) -> Option<Self> {
        let workers = metrics.num_workers();
        if workers == 0 {
            return None;
        }
        let busy: Duration = (0..workers)
            .map(|worker| metrics.worker_total_busy_duration(worker))
            .sum();

        Some(Self {
            busy,
            workers,
            at: Instant::now(),
        })
    }

    #[cfg(not(target_has_atomic = "64"))]
    fn read(_metrics: &RuntimeMetrics) -> Option<Self> {
        None
    }

    fn utilization_since(&self, previous: &WorkerBusy) -> Option<f64> {
        if self.workers != previous.workers {
            return None;
        }
        let wall = self.at.checked_duration_since(previous.at)?;
        let busy = self.busy.checked_sub(previous.busy)?;
        let capacity = wall.as_secs_f64() * self.workers as f64;
        if capacity <= f64::EPSILON {
            return None;
        }
        Some((busy.as_secs_f64() / capacity * 100.0).clamp(0.0, 100.0))
    }
}

/// Jiffies spent by this process against jiffies elapsed on all CPUs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
    process: u64,
    total: u64,
}

impl CpuTimes {
    fn utilization_since(&self, previous: &CpuTimes) -> Option<f64> {
        let total = self.total.checked_sub(previous.total)?;
        let process = self.process.checked_sub(previous.process)?;
        if total == 0 {
            return None;
        }
        Some((process as f64 / total as f64 * 100.0).clamp(0.0, 100.0))
    }
}

fn read_cpu_times() -> Option<CpuTimes> {
    let process = parse_process_stat(&std::fs::read_to_string(PROC_SELF_STAT_PATH).ok()?)?;
    let total = parse_proc_stat(&std::fs::read_to_string(PROC_STAT_PATH).ok()?)?;
    Some(CpuTimes { process, total })
}

/// Total jiffies from the aggregate `cpu` line of `/proc/stat`
fn parse_proc_stat(contents: &str) -> Option<u64> {
    let line = contents.lines().find(|line| line.starts_with("cpu "))?;
    let fields = line
        .split_whitespace()
        .skip(1)
        .map(|field| field.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;

    if fields.len() < 4 {
        return None;
    }

    // user nice system idle iowait irq softirq steal; guest time is already in user
    Some(fields.iter().take(8).sum())
}

/// `utime + stime` jiffies from `/proc/<pid>/stat`
fn parse_process_stat(contents: &str) -> Option<u64> {
    // The command name may hold spaces and parens, fields resume after the last ')'
    let (_, rest) = contents.rsplit_once(')')?;
    let mut fields = rest.split_whitespace().skip(11);
    let utime = fields.next()?.parse::<u64>().ok()?;
    let stime = fields.next()?.parse::<u64>().ok()?;
    Some(utime + stime)
}
