//! Offline rendering of a stream into a WAV file.

use std::path::Path;
use std::sync::Arc;

use hound::{SampleFormat, WavSpec, WavWriter};
use tonebank_backend::{BufferScheduler, MemoryHost, StreamHost, TickOutcome};
use tonebank_core::mixer::CHANNELS;
use tonebank_core::{StreamConfig, WaveTable};

pub struct RenderSummary {
    pub frames: u64,
    pub skipped_periods: usize,
}

/// Tick the scheduler `periods` times by hand and append every filled period to a WAV file.
pub fn render_to_wav(
    config: &StreamConfig,
    periods: usize,
    path: &Path,
) -> anyhow::Result<RenderSummary> {
    let table = Arc::new(WaveTable::with_waves(&config.initial_waves())?);
    let host = Arc::new(MemoryHost::from_config(config));
    let mut scheduler = BufferScheduler::new(host.clone(), table);
    scheduler.arm()?;

    let spec = WavSpec {
        channels: CHANNELS as u16,
        sample_rate: config.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    let mut summary = RenderSummary {
        frames: 0,
        skipped_periods: 0,
    };

    for _ in 0..periods {
        let cursor = scheduler.cursor_bytes();
        match scheduler.tick()? {
            TickOutcome::Filled => {
                for sample in host.dma_area().read_frames(cursor, config.period_frames) {
                    writer.write_sample(sample)?;
                }
                summary.frames += config.period_frames as u64;
            }
            TickOutcome::Skipped => summary.skipped_periods += 1,
            TickOutcome::Halted => break,
        }
    }

    writer.finalize()?;
    scheduler.stop()?;
    Ok(summary)
}
