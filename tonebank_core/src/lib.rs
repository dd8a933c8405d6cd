//! Oscillator descriptors, the shared wave table and the additive mixer.

pub mod config;
pub mod control;
pub mod error;
pub mod mixer;
pub mod sine;
pub mod table;
pub mod wave;

pub use config::{StreamConfig, WaveSpec};
pub use error::{SynthError, SynthResult};
pub use table::{RemoveOutcome, SynthesisGuard, WaveTable};
pub use wave::Wave;
