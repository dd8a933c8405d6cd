//! Realtime side: the stream host contract, the periodic buffer scheduler and
//! the playback reader.

pub mod rt_processing;
pub mod stream;

pub use rt_processing::scheduler::{BufferScheduler, SchedulerState, TickOutcome};
pub use stream::{DmaArea, MemoryHost, StreamHost, StreamRuntime};
pub use tonebank_core::{SynthError, SynthResult};
