//! Periodic buffer filler.
//!
//! Once per period the tick mixes the wave table into the circular region at
//! the write cursor, moves the cursor on by one period (wrapping to 0 at the
//! end of the buffer) and tells the host. Deadlines are derived from the
//! previous deadline, not from when the tick happened to run, so callback
//! latency never accumulates into drift.
//!
//! Lock order inside a tick is region first, then table. Control callers only
//! take the table lock and the playback side only `try_lock`s the region.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::atomic::AtomicCell;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use spin::Mutex;
use tonebank_core::mixer::{self, CHANNELS, FRAME_BYTES};
use tonebank_core::{SynthError, SynthResult, WaveTable, sine};
use tracing::{debug, error, info};

use crate::rt_processing::performance::{TickMonitor, TickSnapshot};
use crate::stream::{SAMPLE_BYTES, StreamHost, StreamRuntime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No stream armed yet.
    Idle,
    /// Cursor reset and running; the first tick is due.
    Armed,
    /// At least one tick has completed.
    Running,
    Stopped,
    /// A tick found the region inconsistent and halted the stream.
    Faulted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// One period was mixed at the cursor.
    Filled,
    /// Less than a period of room before the region end; nothing written.
    Skipped,
    /// The scheduler is not running; nothing written, cursor unchanged.
    Halted,
}

/// Next write position after one period. Always `< buffer_bytes`.
#[inline]
pub fn advance_cursor(cursor: usize, period_bytes: usize, buffer_bytes: usize) -> usize {
    let next = cursor + period_bytes;
    if next >= buffer_bytes { 0 } else { next }
}

fn check_region(cursor: usize, buffer_bytes: usize, region_bytes: usize) -> SynthResult<()> {
    if region_bytes < buffer_bytes {
        return Err(SynthError::InternalConsistency(format!(
            "region of {region_bytes} bytes is smaller than the {buffer_bytes}-byte buffer"
        )));
    }
    if cursor >= buffer_bytes {
        return Err(SynthError::InternalConsistency(format!(
            "cursor {cursor} outside buffer of {buffer_bytes} bytes"
        )));
    }
    Ok(())
}

fn validate_runtime(runtime: &StreamRuntime) -> SynthResult<()> {
    if runtime.sample_rate == 0 || runtime.period_frames == 0 || runtime.buffer_frames == 0 {
        return Err(SynthError::InvalidConfig(format!(
            "unusable stream geometry {runtime:?}"
        )));
    }
    Ok(())
}

struct Shared {
    host: Arc<dyn StreamHost>,
    table: Arc<WaveTable>,
    running: AtomicBool,
    state: AtomicCell<SchedulerState>,
    /// Byte offset of the next write.
    cursor: AtomicUsize,
    fault: Mutex<Option<SynthError>>,
    monitor: TickMonitor,
}

impl Shared {
    fn tick(&self) -> SynthResult<TickOutcome> {
        if !self.running.load(Ordering::Acquire) {
            return Ok(TickOutcome::Halted);
        }
        let _timing = self.monitor.scoped_tick();

        let runtime = self.host.runtime();
        let period_bytes = runtime.period_bytes();
        let buffer_bytes = runtime.buffer_bytes();

        // the region lock covers the whole cursor read-modify-write
        let mut samples = self.host.dma_area().lock();
        let cursor = self.cursor.load(Ordering::Acquire);

        if let Err(err) = check_region(cursor, buffer_bytes, samples.len() * SAMPLE_BYTES) {
            drop(samples);
            self.halt(&err);
            return Err(err);
        }

        // stop() may have landed while we waited for the region
        if !self.running.load(Ordering::Acquire) {
            return Ok(TickOutcome::Halted);
        }

        let outcome = if buffer_bytes - cursor >= period_bytes {
            let start = cursor / SAMPLE_BYTES;
            let period = &mut samples[start..start + runtime.period_frames * CHANNELS];
            let mut waves = self.table.lock_for_synthesis();
            mixer::mix(period, runtime.period_frames, runtime.sample_rate, &mut waves);
            drop(waves);
            self.monitor.add_frames_rendered(runtime.period_frames as u64);
            TickOutcome::Filled
        } else {
            self.monitor.increment_skipped_fills();
            TickOutcome::Skipped
        };
        self.cursor.store(
            advance_cursor(cursor, period_bytes, buffer_bytes),
            Ordering::Release,
        );
        drop(samples);

        let _ = self
            .state
            .compare_exchange(SchedulerState::Armed, SchedulerState::Running);

        self.host.period_elapsed();
        Ok(outcome)
    }

    fn halt(&self, err: &SynthError) {
        self.running.store(false, Ordering::Release);
        self.state.store(SchedulerState::Faulted);
        error!(%err, "buffer scheduler halted");
        *self.fault.lock() = Some(err.clone());
    }
}

fn run_timer(shared: &Shared, cancelled: &Receiver<()>, period: Duration) {
    let mut deadline = Instant::now();
    loop {
        match cancelled.recv_deadline(deadline) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        if Instant::now().saturating_duration_since(deadline) > period {
            shared.monitor.increment_late_ticks();
        }

        match shared.tick() {
            Ok(TickOutcome::Filled | TickOutcome::Skipped) => {}
            Ok(TickOutcome::Halted) | Err(_) => break,
        }

        deadline += period;
    }
    debug!("tick timer exited");
}

struct Timer {
    cancel: Sender<()>,
    thread: JoinHandle<()>,
}

/// Drives one stream: owns the write cursor and the tick timer.
pub struct BufferScheduler {
    shared: Arc<Shared>,
    timer: Option<Timer>,
}

impl BufferScheduler {
    pub fn new(host: Arc<dyn StreamHost>, table: Arc<WaveTable>) -> Self {
        // keep table construction off the tick path
        sine::init_tables();

        let runtime = host.runtime();
        Self {
            shared: Arc::new(Shared {
                host,
                table,
                running: AtomicBool::new(false),
                state: AtomicCell::new(SchedulerState::Idle),
                cursor: AtomicUsize::new(0),
                fault: Mutex::new(None),
                monitor: TickMonitor::new(runtime.period_frames, runtime.sample_rate, 0.1),
            }),
            timer: None,
        }
    }

    /// Reset the cursor and set the running flag without starting the timer.
    ///
    /// Useful to drive ticks by hand (offline rendering, tests).
    pub fn arm(&mut self) -> SynthResult<()> {
        if self.timer.is_some() {
            return Err(SynthError::Timer("scheduler is already started".into()));
        }
        let runtime = self.shared.host.runtime();
        validate_runtime(&runtime)?;

        self.shared.fault.lock().take();
        self.shared.cursor.store(0, Ordering::Release);
        self.shared.running.store(true, Ordering::Release);
        self.shared.state.store(SchedulerState::Armed);

        info!(
            rate = runtime.sample_rate,
            period_frames = runtime.period_frames,
            buffer_frames = runtime.buffer_frames,
            "buffer scheduler armed"
        );
        Ok(())
    }

    /// Arm and start ticking on a dedicated thread, first tick immediately.
    pub fn start(&mut self) -> SynthResult<()> {
        self.arm()?;

        let period = self.shared.host.runtime().period_duration();
        let (cancel, cancelled) = channel::bounded(1);
        let shared = Arc::clone(&self.shared);

        let spawned = thread::Builder::new()
            .name("tonebank-tick".into())
            .spawn(move || run_timer(&shared, &cancelled, period));

        match spawned {
            Ok(thread) => {
                self.timer = Some(Timer { cancel, thread });
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                self.shared.state.store(SchedulerState::Stopped);
                Err(SynthError::Timer(e.to_string()))
            }
        }
    }

    /// Run one tick on the calling thread.
    ///
    /// Meant for schedulers that were only `arm`ed; ticking by hand while the
    /// timer thread runs would advance the cursor twice per period.
    pub fn tick(&self) -> SynthResult<TickOutcome> {
        self.shared.tick()
    }

    /// Stop ticking. Once this returns no tick will write to the region again.
    ///
    /// Returns the fault that halted the stream, if one did.
    pub fn stop(&mut self) -> SynthResult<()> {
        // flag first: an in-flight tick checks it before writing
        self.shared.running.store(false, Ordering::Release);

        if let Some(Timer { cancel, thread }) = self.timer.take() {
            let _ = cancel.try_send(());
            drop(cancel);
            if thread.join().is_err() {
                error!("tick timer thread panicked");
            }
        }

        match self.shared.state.load() {
            SchedulerState::Idle | SchedulerState::Faulted => {}
            _ => {
                self.shared.state.store(SchedulerState::Stopped);
                info!(
                    ticks = self.shared.monitor.snapshot(false).tick_count,
                    "buffer scheduler stopped"
                );
            }
        }

        match self.shared.fault.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.shared.state.load()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Byte offset of the next write.
    pub fn cursor_bytes(&self) -> usize {
        self.shared.cursor.load(Ordering::Acquire)
    }

    /// Write position in frames, as the host wants to see it.
    pub fn pointer_frames(&self) -> usize {
        self.cursor_bytes() / FRAME_BYTES
    }

    pub fn fault(&self) -> Option<SynthError> {
        self.shared.fault.lock().clone()
    }

    pub fn tick_stats(&self) -> TickSnapshot {
        self.shared.monitor.snapshot(false)
    }

    #[cfg(test)]
    fn force_cursor(&self, cursor: usize) {
        self.shared.cursor.store(cursor, Ordering::Release);
    }
}

impl Drop for BufferScheduler {
    fn drop(&mut self) {
        if self.timer.is_some() {
            let _ = self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{DmaArea, MemoryHost};
    use tonebank_core::Wave;

    fn runtime(period_frames: usize, buffer_frames: usize) -> StreamRuntime {
        StreamRuntime {
            sample_rate: 48_000,
            period_frames,
            buffer_frames,
        }
    }

    fn scheduler_with(
        host: MemoryHost,
        waves: &[Wave],
    ) -> (BufferScheduler, Arc<MemoryHost>, Arc<WaveTable>) {
        let host = Arc::new(host);
        let table = Arc::new(WaveTable::with_waves(waves).unwrap());
        let scheduler = BufferScheduler::new(host.clone(), table.clone());
        (scheduler, host, table)
    }

    #[test]
    fn test_tick_before_arm_is_halted() {
        let (scheduler, host, _) = scheduler_with(MemoryHost::new(runtime(240, 960)), &[]);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.tick().unwrap(), TickOutcome::Halted);
        assert_eq!(host.periods_elapsed(), 0);
    }

    #[test]
    fn test_reference_tick() {
        let (mut scheduler, host, table) = scheduler_with(
            MemoryHost::new(runtime(240, 960)),
            &[Wave::encode(100, 0, 480)],
        );
        scheduler.arm().unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Armed);

        assert_eq!(scheduler.tick().unwrap(), TickOutcome::Filled);
        assert_eq!(scheduler.state(), SchedulerState::Running);

        assert_eq!(table.snapshot()[0].phase(), (240 * (360 * 480 / 48_000) % 360) as u16);
        assert_eq!(scheduler.cursor_bytes(), 960);
        assert_eq!(scheduler.pointer_frames(), 240);
        assert_eq!(host.periods_elapsed(), 1);

        let period = host.dma_area().read_frames(0, 240);
        assert_eq!(period.len(), 240 * CHANNELS);
        assert_eq!(period[30 * CHANNELS], i16::MAX);
        assert_eq!(period[30 * CHANNELS + 1], i16::MAX);
        assert_eq!(scheduler.tick_stats().frames_rendered, 240);
    }

    #[test]
    fn test_cursor_wraps_after_full_buffer() {
        let (mut scheduler, host, _) = scheduler_with(MemoryHost::new(runtime(240, 960)), &[]);
        scheduler.arm().unwrap();

        let mut cursors = Vec::new();
        for _ in 0..5 {
            scheduler.tick().unwrap();
            cursors.push(scheduler.cursor_bytes());
        }
        assert_eq!(cursors, vec![960, 1920, 2880, 0, 960]);
        assert_eq!(host.periods_elapsed(), 5);
    }

    #[test]
    fn test_partial_tail_is_skipped_not_written() {
        // 1000 frames is not a whole number of 240-frame periods
        let (mut scheduler, host, _) = scheduler_with(
            MemoryHost::new(runtime(240, 1000)),
            &[Wave::encode(100, 90, 0)],
        );
        host.dma_area().fill(99);
        scheduler.arm().unwrap();

        let outcomes: Vec<_> = (0..5).map(|_| scheduler.tick().unwrap()).collect();
        assert_eq!(
            outcomes,
            vec![
                TickOutcome::Filled,
                TickOutcome::Filled,
                TickOutcome::Filled,
                TickOutcome::Filled,
                TickOutcome::Skipped,
            ]
        );
        assert_eq!(scheduler.cursor_bytes(), 0);
        assert_eq!(host.periods_elapsed(), 5);
        assert_eq!(scheduler.tick_stats().skipped_fills, 1);

        let tail = host.dma_area().read_frames(960 * FRAME_BYTES, 40);
        assert!(tail.iter().all(|&s| s == 99));
        let head = host.dma_area().read_frames(0, 960);
        assert!(head.iter().all(|&s| s == i16::MAX));
    }

    #[test]
    fn test_concurrent_ticks_each_advance_the_cursor() {
        const TICKS_PER_THREAD: usize = 8;
        let waves: Vec<Wave> = (0..64).map(|f| Wave::encode(100, 0, 100 + f)).collect();

        for _ in 0..200 {
            // room for every tick without wrapping
            let (mut scheduler, host, _) =
                scheduler_with(MemoryHost::new(runtime(64, 64 * 32)), &waves);
            scheduler.arm().unwrap();

            thread::scope(|s| {
                for _ in 0..2 {
                    s.spawn(|| {
                        for _ in 0..TICKS_PER_THREAD {
                            assert_eq!(scheduler.tick().unwrap(), TickOutcome::Filled);
                        }
                    });
                }
            });

            let period_bytes = host.runtime().period_bytes();
            assert_eq!(host.periods_elapsed(), 2 * TICKS_PER_THREAD as u64);
            assert_eq!(
                scheduler.cursor_bytes() / period_bytes,
                2 * TICKS_PER_THREAD
            );
            assert_eq!(scheduler.tick_stats().frames_rendered, 64 * 16);
        }
    }

    #[test]
    fn test_halted_ticks_are_not_counted() {
        let (mut scheduler, _, _) = scheduler_with(MemoryHost::new(runtime(240, 960)), &[]);
        assert_eq!(scheduler.tick().unwrap(), TickOutcome::Halted);
        assert_eq!(scheduler.tick_stats().tick_count, 0);

        scheduler.arm().unwrap();
        scheduler.tick().unwrap();
        scheduler.stop().unwrap();
        scheduler.tick().unwrap();
        assert_eq!(scheduler.tick_stats().tick_count, 1);
    }

    #[test]
    fn test_advance_never_reaches_buffer_size() {
        for period_bytes in [4, 12, 256, 960, 1000] {
            for buffer_bytes in [960, 1000, 3844, 7680, 131_072] {
                let mut cursor = 0;
                for _ in 0..1000 {
                    cursor = advance_cursor(cursor, period_bytes, buffer_bytes);
                    assert!(cursor < buffer_bytes);
                    assert_eq!(cursor % period_bytes, 0);
                }
            }
        }
    }

    #[test]
    fn test_short_region_is_fatal() {
        let rt = runtime(240, 960);
        let area = DmaArea::with_bytes(rt.buffer_bytes() - FRAME_BYTES);
        let (mut scheduler, host, _) = scheduler_with(MemoryHost::with_area(rt, area), &[]);
        scheduler.arm().unwrap();

        let err = scheduler.tick().unwrap_err();
        assert!(matches!(err, SynthError::InternalConsistency(_)));
        assert!(err.is_fatal());
        assert_eq!(scheduler.state(), SchedulerState::Faulted);
        assert!(!scheduler.is_running());
        assert_eq!(host.periods_elapsed(), 0);

        assert_eq!(scheduler.tick().unwrap(), TickOutcome::Halted);
        assert_eq!(scheduler.stop().unwrap_err(), err);
        assert_eq!(scheduler.state(), SchedulerState::Faulted);
    }

    #[test]
    fn test_corrupt_cursor_is_fatal() {
        let (mut scheduler, host, _) = scheduler_with(MemoryHost::new(runtime(240, 960)), &[]);
        host.dma_area().fill(7);
        scheduler.arm().unwrap();
        scheduler.force_cursor(960 * FRAME_BYTES);

        assert!(matches!(
            scheduler.tick(),
            Err(SynthError::InternalConsistency(_))
        ));
        assert!(scheduler.fault().is_some());
        assert!(host.dma_area().read_frames(0, 960).iter().all(|&s| s == 7));
    }

    #[test]
    fn test_no_writes_after_stop() {
        let (mut scheduler, host, _) = scheduler_with(
            MemoryHost::new(runtime(240, 960)),
            &[Wave::encode(100, 90, 0)],
        );
        scheduler.arm().unwrap();
        scheduler.tick().unwrap();
        scheduler.stop().unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        host.dma_area().fill(0);
        let cursor = scheduler.cursor_bytes();
        assert_eq!(scheduler.tick().unwrap(), TickOutcome::Halted);
        assert_eq!(scheduler.cursor_bytes(), cursor);
        assert!(host.dma_area().read_frames(0, 960).iter().all(|&s| s == 0));
        assert_eq!(host.periods_elapsed(), 1);
    }

    #[test]
    fn test_rearm_resets_cursor_and_fault() {
        let (mut scheduler, _, _) = scheduler_with(MemoryHost::new(runtime(240, 960)), &[]);
        scheduler.arm().unwrap();
        scheduler.tick().unwrap();
        scheduler.force_cursor(usize::MAX);
        assert!(scheduler.tick().is_err());

        scheduler.arm().unwrap();
        assert_eq!(scheduler.cursor_bytes(), 0);
        assert!(scheduler.fault().is_none());
        assert_eq!(scheduler.tick().unwrap(), TickOutcome::Filled);
    }

    #[test]
    fn test_arm_rejects_unusable_geometry() {
        let (mut scheduler, _, _) = scheduler_with(MemoryHost::new(runtime(0, 960)), &[]);
        assert!(matches!(scheduler.arm(), Err(SynthError::InvalidConfig(_))));
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[test]
    fn test_timer_ticks_until_stopped() {
        let (host, periods) = MemoryHost::new(runtime(240, 960)).with_notifications();
        let (mut scheduler, host, _) = scheduler_with(host, &[Wave::encode(100, 0, 480)]);

        scheduler.start().unwrap();
        for _ in 0..3 {
            periods.recv_timeout(Duration::from_secs(2)).unwrap();
        }
        assert!(matches!(scheduler.start(), Err(SynthError::Timer(_))));

        scheduler.stop().unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(!scheduler.is_running());

        let seen = host.periods_elapsed();
        let written = host.dma_area().read_frames(0, 960);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(host.periods_elapsed(), seen);
        assert_eq!(host.dma_area().read_frames(0, 960), written);
    }
}
