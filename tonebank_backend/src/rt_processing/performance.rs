use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use quanta::{Clock, Instant as QuantaInstant};

/// Snapshot of tick metrics suitable for logging (non-RT).
#[derive(Debug, Clone)]
pub struct TickSnapshot {
    /// Total ticks that ran (filled, skipped or faulted).
    pub tick_count: u64,
    /// Frames mixed into the region.
    pub frames_rendered: u64,
    /// Ticks that found less than a period of room before the region end.
    pub skipped_fills: u64,
    /// Ticks that started more than one period after their deadline.
    pub late_ticks: u64,
    /// Minimum tick duration observed (ns).
    pub min_tick_nanos: Option<u64>,
    /// Maximum tick duration observed (ns).
    pub max_tick_nanos: Option<u64>,
    /// EMA of tick duration in nanoseconds.
    pub ema_tick_nanos: f64,
    /// Length of one period in nanoseconds; the budget for a tick.
    pub period_nanos: f64,
    pub avg_load_percent: f64,
    pub timestamp: Instant,
}

/// Real-time-safe tick monitor.
///
/// The tick path only calls the `increment_*`/`add_*` methods and `scoped_tick()`,
/// which touch atomics only. `snapshot` runs on a control thread.
pub struct TickMonitor {
    clock: Clock,
    period_frames: usize,
    sample_rate: u32,

    tick_count: AtomicU64,
    frames_rendered: AtomicU64,
    skipped_fills: AtomicU64,
    late_ticks: AtomicU64,

    min_tick_nanos: AtomicU64,
    max_tick_nanos: AtomicU64,
    /// EMA of tick duration stored as f64 bits
    ema_tick_bits: AtomicU64,

    ema_alpha: f64,
}

impl TickMonitor {
    /// `ema_alpha` must be in `(0, 1]`; out-of-range values fall back to 0.1.
    pub fn new(period_frames: usize, sample_rate: u32, ema_alpha: f64) -> Self {
        let ema_alpha = if ema_alpha > 0.0 && ema_alpha <= 1.0 {
            ema_alpha
        } else {
            0.1
        };
        Self {
            clock: Clock::new(),
            period_frames,
            sample_rate,
            tick_count: AtomicU64::new(0),
            frames_rendered: AtomicU64::new(0),
            skipped_fills: AtomicU64::new(0),
            late_ticks: AtomicU64::new(0),
            min_tick_nanos: AtomicU64::new(u64::MAX),
            max_tick_nanos: AtomicU64::new(0),
            ema_tick_bits: AtomicU64::new(0u64),
            ema_alpha,
        }
    }

    #[inline(always)]
    pub fn add_frames_rendered(&self, n: u64) {
        self.frames_rendered.fetch_add(n, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn increment_tick_count(&self) {
        self.tick_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn increment_skipped_fills(&self) {
        self.skipped_fills.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn increment_late_ticks(&self) {
        self.late_ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a tick duration in nanoseconds. Updates min, max and EMA.
    #[inline(always)]
    pub fn record_tick_nanos(&self, nanos: u64) {
        self.min_tick_nanos.fetch_min(nanos, Ordering::Relaxed);
        self.max_tick_nanos.fetch_max(nanos, Ordering::Relaxed);

        // EMA_new = alpha * x + (1 - alpha) * EMA_old
        let alpha = self.ema_alpha;
        let mut old_bits = self.ema_tick_bits.load(Ordering::Relaxed);
        loop {
            let old_f = f64::from_bits(old_bits);
            let new_f = alpha * (nanos as f64) + (1.0 - alpha) * old_f;
            match self.ema_tick_bits.compare_exchange_weak(
                old_bits,
                new_f.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(found) => old_bits = found,
            }
        }
    }

    #[inline(always)]
    pub fn record_tick_duration(&self, d: Duration) {
        self.record_tick_nanos(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX));
    }

    /// Counts the tick now and records its duration when the guard drops.
    #[inline(always)]
    pub fn scoped_tick(&self) -> TickGuard<'_> {
        self.increment_tick_count();
        TickGuard {
            monitor: self,
            start: self.clock.now(),
        }
    }

    /// Read all metrics. With `reset_peaks` the min/max/EMA start over afterwards.
    ///
    /// Not real-time safe.
    pub fn snapshot(&self, reset_peaks: bool) -> TickSnapshot {
        let min_raw = self.min_tick_nanos.load(Ordering::Relaxed);
        let max_raw = self.max_tick_nanos.load(Ordering::Relaxed);
        let ema = f64::from_bits(self.ema_tick_bits.load(Ordering::Relaxed));
        let period_nanos = if self.sample_rate > 0 {
            (self.period_frames as f64 / f64::from(self.sample_rate)) * 1_000_000_000.0
        } else {
            0.0
        };
        let avg_load_percent = if period_nanos > 0.0 {
            (ema / period_nanos) * 100.0
        } else {
            0.0
        };

        if reset_peaks {
            self.min_tick_nanos.store(u64::MAX, Ordering::Relaxed);
            self.max_tick_nanos.store(0, Ordering::Relaxed);
            self.ema_tick_bits.store(0u64, Ordering::Relaxed);
        }

        TickSnapshot {
            tick_count: self.tick_count.load(Ordering::Relaxed),
            frames_rendered: self.frames_rendered.load(Ordering::Relaxed),
            skipped_fills: self.skipped_fills.load(Ordering::Relaxed),
            late_ticks: self.late_ticks.load(Ordering::Relaxed),
            min_tick_nanos: (min_raw != u64::MAX).then_some(min_raw),
            max_tick_nanos: (max_raw != 0).then_some(max_raw),
            ema_tick_nanos: ema,
            period_nanos,
            avg_load_percent,
            timestamp: Instant::now(),
        }
    }
}

/// Records tick latency on drop. Atomics only, no locks or allocations.
pub struct TickGuard<'a> {
    monitor: &'a TickMonitor,
    start: QuantaInstant,
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        let elapsed = self.monitor.clock.now().saturating_duration_since(self.start);
        self.monitor.record_tick_duration(elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let monitor = TickMonitor::new(240, 48_000, 0.1);
        monitor.increment_tick_count();
        monitor.increment_skipped_fills();
        monitor.increment_late_ticks();
        monitor.add_frames_rendered(240);

        let snap = monitor.snapshot(false);
        assert_eq!(snap.tick_count, 1);
        assert_eq!(snap.skipped_fills, 1);
        assert_eq!(snap.late_ticks, 1);
        assert_eq!(snap.frames_rendered, 240);
        assert!((snap.period_nanos - 5_000_000.0).abs() < 1e-3);
    }

    #[test]
    fn test_min_max_and_reset() {
        let monitor = TickMonitor::new(240, 48_000, 0.5);
        assert_eq!(monitor.snapshot(false).min_tick_nanos, None);

        monitor.record_tick_nanos(300);
        monitor.record_tick_nanos(100);
        monitor.record_tick_nanos(200);

        let snap = monitor.snapshot(true);
        assert_eq!(snap.min_tick_nanos, Some(100));
        assert_eq!(snap.max_tick_nanos, Some(300));
        assert!(snap.ema_tick_nanos > 0.0);

        let snap = monitor.snapshot(false);
        assert_eq!(snap.min_tick_nanos, None);
        assert_eq!(snap.max_tick_nanos, None);
    }

    #[test]
    fn test_scoped_tick_counts_and_times() {
        let monitor = TickMonitor::new(240, 48_000, 1.0);
        {
            let _guard = monitor.scoped_tick();
        }
        let snap = monitor.snapshot(false);
        assert_eq!(snap.tick_count, 1);
        assert!(snap.min_tick_nanos.is_some());
    }

    #[test]
    fn test_bad_alpha_falls_back() {
        let monitor = TickMonitor::new(240, 48_000, 0.0);
        monitor.record_tick_nanos(1000);
        assert!(monitor.snapshot(false).ema_tick_nanos > 0.0);
    }
}
