//! Consumer side of the circular region.
//!
//! Design goals:
//! - Never block the tick: the region is only ever `try_lock`ed here.
//! - Never allocate inside the audio callback.
//! - If the region is busy, output silence rather than wait.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dasp::Sample;
use tonebank_core::mixer::CHANNELS;

use crate::stream::{DmaArea, StreamRuntime};

/// Reads the region frame by frame at its own position and converts to `f32`.
pub struct DmaReader {
    area: DmaArea,
    /// Read position in samples.
    position: usize,
    buffer_samples: usize,
    /// Frames handed to the device so far. Shared so other threads can watch it.
    frames_read: Arc<AtomicU64>,
}

impl DmaReader {
    pub fn new(area: DmaArea, runtime: &StreamRuntime) -> Self {
        Self {
            area,
            position: 0,
            buffer_samples: runtime.buffer_frames * CHANNELS,
            frames_read: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Fill interleaved `output` (`channels` per frame).
    ///
    /// The stereo pair is spread over the output channels (even channels get
    /// left, odd get right). Returns `false` if it fell back to silence.
    pub fn read_into(&mut self, output: &mut [f32], channels: usize) -> bool {
        let frames = match output.len().checked_div(channels) {
            None | Some(0) => return false,
            Some(n) => n,
        };
        if self.buffer_samples == 0 {
            output.fill(0.0);
            return false;
        }

        let Some(samples) = self.area.try_lock() else {
            output.fill(0.0);
            return false;
        };
        if samples.len() < self.buffer_samples {
            drop(samples);
            output.fill(0.0);
            return false;
        }

        for frame in output.chunks_exact_mut(channels) {
            let pair = &samples[self.position..self.position + CHANNELS];
            for (ch, out) in frame.iter_mut().enumerate() {
                *out = pair[ch % CHANNELS].to_sample::<f32>();
            }
            self.position = (self.position + CHANNELS) % self.buffer_samples;
        }

        self.frames_read.fetch_add(frames as u64, Ordering::Relaxed);
        true
    }

    /// Read position in frames.
    pub fn position_frames(&self) -> usize {
        self.position / CHANNELS
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read.load(Ordering::Relaxed)
    }

    pub fn frames_read_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.frames_read)
    }
}

#[cfg(feature = "playback")]
pub mod device {
    //! Plays a `DmaReader` on the default cpal output device.

    use std::fmt;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{BufferSize, SampleRate, StreamConfig};
    use tonebank_core::mixer::CHANNELS;
    use tracing::{error, info};

    use super::DmaReader;

    #[derive(Debug)]
    pub enum PlaybackError {
        NoOutputDevice,
        BuildFailed(String),
        PlayFailed(String),
    }

    impl fmt::Display for PlaybackError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Self::NoOutputDevice => write!(f, "No audio output device found"),
                Self::BuildFailed(msg) => write!(f, "Failed to build output stream: {}", msg),
                Self::PlayFailed(msg) => write!(f, "Failed to start output stream: {}", msg),
            }
        }
    }

    impl std::error::Error for PlaybackError {}

    /// Open the default output at `sample_rate` and start draining `reader` into it.
    ///
    /// Keep the returned stream alive for as long as audio should play.
    pub fn play_default_output(
        mut reader: DmaReader,
        sample_rate: u32,
    ) -> Result<cpal::Stream, PlaybackError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(PlaybackError::NoOutputDevice)?;
        if let Ok(name) = device.name() {
            info!("Audio device: {}", name);
        }

        let config = StreamConfig {
            channels: CHANNELS as u16,
            sample_rate: SampleRate(sample_rate),
            buffer_size: BufferSize::Default,
        };

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    reader.read_into(data, CHANNELS);
                },
                |err| error!("Audio stream error: {}", err),
                None,
            )
            .map_err(|e| PlaybackError::BuildFailed(e.to_string()))?;

        stream
            .play()
            .map_err(|e| PlaybackError::PlayFailed(e.to_string()))?;
        info!("Audio stream started at {} Hz", sample_rate);
        Ok(stream)
    }
}
