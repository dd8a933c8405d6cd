//! Stream configuration and the limits of the virtual device.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SynthError, SynthResult};
use crate::mixer::{CHANNELS, FRAME_BYTES};
use crate::wave::{FULL_TURN, MAX_AMPLITUDE, MAX_FREQUENCY, Wave};

/// What the virtual device can be opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    pub sample_rate: u32,
    pub channels: usize,
    pub buffer_bytes_max: usize,
    pub period_bytes_min: usize,
    pub period_bytes_max: usize,
    pub periods_min: usize,
    pub periods_max: usize,
}

pub const DEVICE_LIMITS: DeviceLimits = DeviceLimits {
    sample_rate: 48_000,
    channels: CHANNELS,
    buffer_bytes_max: 128 * 1024,
    period_bytes_min: 256,
    period_bytes_max: 16 * 1024,
    periods_min: 4,
    periods_max: 1024,
};

/// An oscillator listed in a config file, unpacked for readability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveSpec {
    #[serde(default = "default_amplitude")]
    pub amplitude: u32,
    #[serde(default)]
    pub phase: u32,
    pub frequency: u32,
}

fn default_amplitude() -> u32 {
    100
}

impl WaveSpec {
    /// Checked before packing, since packing masks the fields.
    pub fn is_in_range(&self) -> bool {
        self.amplitude <= MAX_AMPLITUDE
            && self.phase <= FULL_TURN
            && self.frequency <= MAX_FREQUENCY
    }
}

impl From<WaveSpec> for Wave {
    fn from(spec: WaveSpec) -> Self {
        Wave::encode(spec.amplitude, spec.phase, spec.frequency)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub sample_rate: u32,
    pub period_frames: usize,
    pub buffer_frames: usize,
    /// Oscillators installed before the stream starts.
    pub waves: Vec<WaveSpec>,
}

impl StreamConfig {
    pub fn new() -> Self {
        Self {
            sample_rate: DEVICE_LIMITS.sample_rate,
            period_frames: 240,
            buffer_frames: 240 * 8,
            waves: Vec::new(),
        }
    }

    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn with_period_frames(mut self, frames: usize) -> Self {
        self.period_frames = frames;
        self
    }

    pub fn with_buffer_frames(mut self, frames: usize) -> Self {
        self.buffer_frames = frames;
        self
    }

    pub fn with_wave(mut self, wave: WaveSpec) -> Self {
        self.waves.push(wave);
        self
    }

    pub fn low_latency() -> Self {
        Self::new().with_period_frames(64).with_buffer_frames(64 * 4)
    }

    pub fn balanced() -> Self {
        Self::new()
    }

    pub fn high_throughput() -> Self {
        Self::new().with_period_frames(4096).with_buffer_frames(4096 * 8)
    }

    pub fn period_bytes(&self) -> usize {
        self.period_frames * FRAME_BYTES
    }

    pub fn buffer_bytes(&self) -> usize {
        self.buffer_frames * FRAME_BYTES
    }

    /// Packed form of the configured oscillators.
    pub fn initial_waves(&self) -> Vec<Wave> {
        self.waves.iter().copied().map(Wave::from).collect()
    }

    /// Check against `DEVICE_LIMITS`.
    pub fn validate(&self) -> SynthResult<()> {
        let limits = &DEVICE_LIMITS;

        if self.sample_rate != limits.sample_rate {
            return Err(SynthError::InvalidConfig(format!(
                "sample rate {} not supported, only {}",
                self.sample_rate, limits.sample_rate
            )));
        }

        let period_bytes = self.period_bytes();
        if !(limits.period_bytes_min..=limits.period_bytes_max).contains(&period_bytes) {
            return Err(SynthError::InvalidConfig(format!(
                "period of {} bytes outside {}..={}",
                period_bytes, limits.period_bytes_min, limits.period_bytes_max
            )));
        }

        let buffer_bytes = self.buffer_bytes();
        if buffer_bytes > limits.buffer_bytes_max {
            return Err(SynthError::InvalidConfig(format!(
                "buffer of {} bytes exceeds {}",
                buffer_bytes, limits.buffer_bytes_max
            )));
        }

        // a trailing partial period is allowed, it is simply skipped
        let periods = self.buffer_frames / self.period_frames;
        if !(limits.periods_min..=limits.periods_max).contains(&periods) {
            return Err(SynthError::InvalidConfig(format!(
                "{} periods per buffer outside {}..={}",
                periods, limits.periods_min, limits.periods_max
            )));
        }

        if let Some(spec) = self.waves.iter().find(|s| !s.is_in_range()) {
            return Err(SynthError::InvalidConfig(format!(
                "wave {spec:?} outside amp 0..=100, phase 0..=360, freq 0..=48000"
            )));
        }

        Ok(())
    }

    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> SynthResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SynthError::InvalidConfig(format!("bad config json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> SynthResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            SynthError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}ch @ {}Hz, period: {} frames, buffer: {} frames, {} waves",
            CHANNELS,
            self.sample_rate,
            self.period_frames,
            self.buffer_frames,
            self.waves.len()
        )
    }
}
