//! Additive sine mixer.
//!
//! Produces interleaved stereo `i16` frames. Phases are whole degrees and the
//! per-sample step is `360 * frequency / sample_rate` in integer arithmetic, so
//! frequencies that do not divide the rate come out slightly flat.
//!
//! The mixer never allocates or blocks; it is the only code the scheduler runs
//! while holding the table lock.

use crate::sine::fixp_sin32;
use crate::wave::{FULL_TURN, Wave};

/// Output is always interleaved stereo.
pub const CHANNELS: usize = 2;

/// Bytes in one output frame (two `i16` samples).
pub const FRAME_BYTES: usize = CHANNELS * std::mem::size_of::<i16>();

/// Degrees an oscillator advances per output frame.
///
/// Integer division; a zero sample rate yields a frozen phase.
#[inline]
pub fn phase_step(frequency: u16, sample_rate: u32) -> u32 {
    (FULL_TURN * u32::from(frequency))
        .checked_div(sample_rate)
        .unwrap_or(0)
}

/// Render `frames` frames of the mean of all `waves` into `out`.
///
/// `out` must hold at least `frames * CHANNELS` samples; anything past that is
/// left alone. Every wave's stored phase is advanced so the next call continues
/// seamlessly. With no waves the frames are silent.
pub fn mix(out: &mut [i16], frames: usize, sample_rate: u32, waves: &mut [Wave]) {
    debug_assert!(out.len() >= frames * CHANNELS);

    let count = waves.len() as i64;

    for frame in out.chunks_exact_mut(CHANNELS).take(frames) {
        let mut mixed: i64 = 0;

        for wave in waves.iter_mut() {
            let phase = u32::from(wave.phase());
            // full-scale i32 down to i16 range
            let sample = fixp_sin32(phase as i32) >> 16;

            let next = (phase + phase_step(wave.frequency(), sample_rate)) % FULL_TURN;
            *wave = wave.set_phase(next);

            mixed += i64::from(sample);
        }

        if count > 0 {
            mixed /= count;
        }

        frame.fill(mixed as i16);
    }
}
