//! Packed oscillator descriptor.
//!
//! One oscillator fits into a single `u32`:
//!
//! ```text
//!  31            16 15        7 6      0
//! +----------------+-----------+--------+
//! |   frequency    |   phase   |  amp   |
//! +----------------+-----------+--------+
//! ```
//!
//! Inputs wider than their field are truncated by masking. Callers are expected
//! to keep amplitude in `0..=100`, phase in `0..=360` degrees and frequency in
//! `0..=48000`, but the codec itself never rejects a value.

use std::fmt;

const AMP_MASK: u32 = 0x7f;
const PHASE_MASK: u32 = 0x1ff;
const FREQ_MASK: u32 = 0xffff;

const PHASE_SHIFT: u32 = 7;
const FREQ_SHIFT: u32 = 16;

/// Highest amplitude a caller should pass.
pub const MAX_AMPLITUDE: u32 = 100;
/// Phase is measured in whole degrees.
pub const FULL_TURN: u32 = 360;
/// Highest frequency a caller should pass.
pub const MAX_FREQUENCY: u32 = 48_000;

/// A single oscillator: amplitude, phase (degrees) and frequency packed into one word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Wave(u32);

impl Wave {
    /// Pack the three fields, masking each to its bit width.
    #[inline]
    pub const fn encode(amplitude: u32, phase: u32, frequency: u32) -> Self {
        Self(
            (amplitude & AMP_MASK)
                | ((phase & PHASE_MASK) << PHASE_SHIFT)
                | ((frequency & FREQ_MASK) << FREQ_SHIFT),
        )
    }

    /// Unpack into `(amplitude, phase, frequency)`.
    #[inline]
    pub const fn decode(self) -> (u8, u16, u16) {
        (self.amplitude(), self.phase(), self.frequency())
    }

    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn amplitude(self) -> u8 {
        (self.0 & AMP_MASK) as u8
    }

    #[inline]
    pub const fn phase(self) -> u16 {
        ((self.0 >> PHASE_SHIFT) & PHASE_MASK) as u16
    }

    #[inline]
    pub const fn frequency(self) -> u16 {
        ((self.0 >> FREQ_SHIFT) & FREQ_MASK) as u16
    }

    /// Replace the amplitude, keeping phase and frequency.
    #[inline]
    pub const fn set_amplitude(self, amplitude: u32) -> Self {
        Self((self.0 & !AMP_MASK) | (amplitude & AMP_MASK))
    }

    /// Replace the phase, keeping amplitude and frequency.
    #[inline]
    pub const fn set_phase(self, phase: u32) -> Self {
        Self((self.0 & !(PHASE_MASK << PHASE_SHIFT)) | ((phase & PHASE_MASK) << PHASE_SHIFT))
    }

    /// Replace the frequency, keeping amplitude and phase.
    #[inline]
    pub const fn set_frequency(self, frequency: u32) -> Self {
        Self((self.0 & !(FREQ_MASK << FREQ_SHIFT)) | ((frequency & FREQ_MASK) << FREQ_SHIFT))
    }

    /// True when every field sits inside its documented semantic range.
    pub fn is_in_range(self) -> bool {
        u32::from(self.amplitude()) <= MAX_AMPLITUDE
            && u32::from(self.phase()) <= FULL_TURN
            && u32::from(self.frequency()) <= MAX_FREQUENCY
    }
}

impl From<u32> for Wave {
    fn from(bits: u32) -> Self {
        Self::from_bits(bits)
    }
}

impl From<Wave> for u32 {
    fn from(wave: Wave) -> Self {
        wave.bits()
    }
}

impl fmt::Display for Wave {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "amp={} phase={} freq={}",
            self.amplitude(),
            self.phase(),
            self.frequency()
        )
    }
}
