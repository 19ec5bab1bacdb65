use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Snapshot of a whole throughput phase: rate so far and how far along it is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateReport {
    pub mbps: f64,
    /// Fraction of the phase duration elapsed, clamped to `[0, 1]`.
    pub progress: f64,
}

/// Turns a byte count and elapsed time into a report.
///
/// Returns `None` when no time has elapsed yet, instead of dividing by zero.
pub fn rate_report(bytes: u64, elapsed: Duration, phase: Duration) -> Option<RateReport> {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return None;
    }
    let mbps = (bytes as f64 * 8.0) / secs / 1_000_000.0;
    let progress = if phase.is_zero() {
        1.0
    } else {
        (secs / phase.as_secs_f64()).min(1.0)
    };
    Some(RateReport { mbps, progress })
}

/// Bytes moved during the active phase, shared by every lane.
///
/// Relaxed ordering is enough: readers only need a monotone lower bound.
#[derive(Debug, Default)]
pub struct ByteCounter(AtomicU64);

impl ByteCounter {
    pub fn add(&self, n: u64) -> u64 {
        self.0.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

pub type ReportFn = dyn Fn(RateReport) + Send + Sync;

const NEVER: u64 = u64::MAX;

/// Per-phase aggregator: owns the counter, the phase clock and the report sink.
///
/// Lanes count concurrently, but reading the clock and handing the report to
/// the sink happen under one lock, so reports leave in the order their
/// progress was measured.
pub struct Meter {
    counter: ByteCounter,
    started: Instant,
    phase: Duration,
    min_interval: Option<Duration>,
    last_emit_us: AtomicU64,
    emitting: Mutex<()>,
    on_report: Arc<ReportFn>,
}

impl Meter {
    pub fn new(phase: Duration, min_interval: Option<Duration>, on_report: Arc<ReportFn>) -> Self {
        Self {
            counter: ByteCounter::default(),
            started: Instant::now(),
            phase,
            min_interval,
            last_emit_us: AtomicU64::new(NEVER),
            emitting: Mutex::new(()),
            on_report,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn deadline(&self) -> Instant {
        self.started + self.phase
    }

    pub fn expired(&self) -> bool {
        self.elapsed() >= self.phase
    }

    pub fn bytes(&self) -> u64 {
        self.counter.get()
    }

    /// Counts `n` transferred bytes and reports the phase rate.
    pub fn record(&self, n: u64) {
        self.counter.add(n);
        let _emitting = self.emitting.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let elapsed = self.elapsed();
        if self.due(elapsed) {
            if let Some(report) = rate_report(self.bytes(), elapsed, self.phase) {
                (self.on_report)(report);
            }
        }
    }

    /// Final report after all lanes joined. Ignores the throttle.
    pub fn finish(&self) -> Option<RateReport> {
        let _emitting = self.emitting.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let report = rate_report(self.bytes(), self.elapsed(), self.phase)?;
        (self.on_report)(report);
        Some(report)
    }

    fn due(&self, elapsed: Duration) -> bool {
        let Some(interval) = self.min_interval else {
            return true;
        };
        let now = elapsed.as_micros() as u64;
        let last = self.last_emit_us.load(Ordering::Relaxed);
        if last != NEVER && now.saturating_sub(last) < interval.as_micros() as u64 {
            return false;
        }
        self.last_emit_us
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }
}
