//! The stream host side of the contract: who owns the circular region, what
//! its geometry is, and who hears about finished periods.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use spin::{Mutex, MutexGuard};
use tonebank_core::StreamConfig;
use tonebank_core::mixer::{CHANNELS, FRAME_BYTES};

/// Size of one `i16` sample in the region.
pub const SAMPLE_BYTES: usize = std::mem::size_of::<i16>();

/// Stream geometry, queried by the scheduler once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRuntime {
    pub sample_rate: u32,
    pub period_frames: usize,
    pub buffer_frames: usize,
}

impl StreamRuntime {
    pub fn period_bytes(&self) -> usize {
        self.period_frames * FRAME_BYTES
    }

    pub fn buffer_bytes(&self) -> usize {
        self.buffer_frames * FRAME_BYTES
    }

    /// Wall-clock length of one period, `period_frames * 1e9 / sample_rate` ns.
    pub fn period_duration(&self) -> Duration {
        let nanos = (self.period_frames as u64 * 1_000_000_000)
            .checked_div(u64::from(self.sample_rate))
            .unwrap_or(0);
        Duration::from_nanos(nanos)
    }

    pub fn bytes_to_frames(&self, bytes: usize) -> usize {
        bytes / FRAME_BYTES
    }
}

impl From<&StreamConfig> for StreamRuntime {
    fn from(config: &StreamConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            period_frames: config.period_frames,
            buffer_frames: config.buffer_frames,
        }
    }
}

/// Interleaved stereo sample region shared by the writer (scheduler) and the
/// reader (playback). Cloning shares the same memory.
///
/// Guarded by a spin lock: both sides hold it for one period at most, and the
/// reader only ever uses `try_lock`.
#[derive(Debug, Clone)]
pub struct DmaArea {
    samples: Arc<Mutex<Box<[i16]>>>,
}

impl DmaArea {
    /// Zeroed region of at least `bytes` bytes.
    pub fn with_bytes(bytes: usize) -> Self {
        let len = bytes.div_ceil(SAMPLE_BYTES);
        Self {
            samples: Arc::new(Mutex::new(vec![0i16; len].into_boxed_slice())),
        }
    }

    pub fn for_runtime(runtime: &StreamRuntime) -> Self {
        Self::with_bytes(runtime.buffer_bytes())
    }

    pub fn lock(&self) -> MutexGuard<'_, Box<[i16]>> {
        self.samples.lock()
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, Box<[i16]>>> {
        self.samples.try_lock()
    }

    /// Copy of `frames` frames starting at byte offset `offset`.
    pub fn read_frames(&self, offset: usize, frames: usize) -> Vec<i16> {
        let start = offset / SAMPLE_BYTES;
        let samples = self.samples.lock();
        let end = (start + frames * CHANNELS).min(samples.len());
        samples[start.min(end)..end].to_vec()
    }

    pub fn fill(&self, value: i16) {
        self.samples.lock().fill(value);
    }
}

/// What the scheduler needs from the audio subsystem that owns the stream.
pub trait StreamHost: Send + Sync + 'static {
    /// Current stream geometry. Assumed stable for the stream's lifetime.
    fn runtime(&self) -> StreamRuntime;

    /// The circular region; at least `runtime().buffer_bytes()` long.
    fn dma_area(&self) -> &DmaArea;

    /// One period was filled or skipped and the cursor moved on.
    fn period_elapsed(&self);
}

/// In-process host that owns its region. Good for headless rendering and tests.
pub struct MemoryHost {
    runtime: StreamRuntime,
    area: DmaArea,
    periods: AtomicU64,
    notify: Option<Sender<u64>>,
}

impl MemoryHost {
    pub fn new(runtime: StreamRuntime) -> Self {
        Self::with_area(runtime, DmaArea::for_runtime(&runtime))
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(StreamRuntime::from(config))
    }

    /// Host over an existing region, which may be sized differently from the runtime.
    pub fn with_area(runtime: StreamRuntime, area: DmaArea) -> Self {
        Self {
            runtime,
            area,
            periods: AtomicU64::new(0),
            notify: None,
        }
    }

    /// Also publish every elapsed period (its running count) on a channel.
    pub fn with_notifications(mut self) -> (Self, Receiver<u64>) {
        let (tx, rx) = channel::unbounded();
        self.notify = Some(tx);
        (self, rx)
    }

    pub fn periods_elapsed(&self) -> u64 {
        self.periods.load(Ordering::Acquire)
    }
}

impl StreamHost for MemoryHost {
    fn runtime(&self) -> StreamRuntime {
        self.runtime
    }

    fn dma_area(&self) -> &DmaArea {
        &self.area
    }

    fn period_elapsed(&self) {
        let count = self.periods.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(tx) = &self.notify {
            // nobody listening is fine
            let _ = tx.try_send(count);
        }
    }
}
