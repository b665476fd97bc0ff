use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::HostReading;

/// Pull-based host telemetry with an explicit sampling lifecycle.
///
/// A source is owned by one [`MetricsProbe`](super::MetricsProbe) for the
/// duration of one run. `start` must not block, and `stop` releases whatever
/// `start` acquired. The probe guarantees `stop` is called at most once per
/// successful `start`.
pub trait MetricsSource: Send {
    /// Begin background sampling
    fn start(&mut self);

    /// Latest readings. Metrics not sampled yet are `None`.
    fn read(&self) -> HostReading;

    /// Release the sampling mechanism
    fn stop(&mut self);
}

impl MetricsSource for Box<dyn MetricsSource> {
    fn start(&mut self) {
        (**self).start()
    }

    fn read(&self) -> HostReading {
        (**self).read()
    }

    fn stop(&mut self) {
        (**self).stop()
    }
}

/// Shared start/stop/read counters of a [`ScriptedSource`]
#[derive(Debug, Clone, Default)]
pub struct SourceLifecycle {
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
}

impl SourceLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

/// Synthetic source replaying a fixed sequence of readings.
///
/// Each `read` returns the next reading; once the script is exhausted the
/// last reading repeats. An empty script reads as "nothing sampled yet".
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    readings: Arc<Vec<HostReading>>,
    cursor: Arc<Mutex<usize>>,
    lifecycle: SourceLifecycle,
}

impl ScriptedSource {
    pub fn new(readings: Vec<HostReading>) -> Self {
        Self {
            readings: Arc::new(readings),
            cursor: Arc::new(Mutex::new(0)),
            lifecycle: SourceLifecycle::new(),
        }
    }

    /// Source that always returns the same reading
    pub fn constant(reading: HostReading) -> Self {
        Self::new(vec![reading])
    }

    /// Report lifecycle calls into a shared counter set
    pub fn with_lifecycle(mut self, lifecycle: SourceLifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn lifecycle(&self) -> &SourceLifecycle {
        &self.lifecycle
    }
}

impl MetricsSource for ScriptedSource {
    fn start(&mut self) {
        self.lifecycle.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn read(&self) -> HostReading {
        self.lifecycle.reads.fetch_add(1, Ordering::SeqCst);

        let mut cursor = self.cursor.lock();
        let Some(last) = self.readings.len().checked_sub(1) else {
            return HostReading::default();
        };
        let reading = self.readings[(*cursor).min(last)];
        *cursor += 1;
        reading
    }

    fn stop(&mut self) {
        self.lifecycle.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_source_repeats_last_reading() {
        let mut source = ScriptedSource::new(vec![
            HostReading::new(10.0, 1.0, 5.0),
            HostReading::new(90.0, 200.0, 95.0),
        ]);

        source.start();
        assert_eq!(source.read(), HostReading::new(10.0, 1.0, 5.0));
        assert_eq!(source.read(), HostReading::new(90.0, 200.0, 95.0));
        assert_eq!(source.read(), HostReading::new(90.0, 200.0, 95.0));
        source.stop();

        let lifecycle = source.lifecycle();
        assert_eq!(lifecycle.starts(), 1);
        assert_eq!(lifecycle.stops(), 1);
        assert_eq!(lifecycle.reads(), 3);
    }

    #[test]
    fn test_empty_script_reads_unsampled() {
        let source = ScriptedSource::new(Vec::new());
        assert_eq!(source.read(), HostReading::default());
    }

    #[test]
    fn test_shared_lifecycle() {
        let lifecycle = SourceLifecycle::new();
        let mut first = ScriptedSource::new(Vec::new()).with_lifecycle(lifecycle.clone());
        let mut second = ScriptedSource::new(Vec::new()).with_lifecycle(lifecycle.clone());

        first.start();
        second.start();
        first.stop();

        assert_eq!(lifecycle.starts(), 2);
        assert_eq!(lifecycle.stops(), 1);
    }
}
