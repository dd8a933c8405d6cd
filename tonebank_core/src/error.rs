use thiserror::Error;

pub type SynthResult<T> = Result<T, SynthError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthError {
    /// Table storage could not be allocated. The previous table is still in place.
    #[error("out of memory while resizing the wave table to {requested} entries")]
    OutOfMemory { requested: usize },

    /// A control request that is neither "add" nor "remove".
    #[error("invalid control command: {0}")]
    InvalidCommand(String),

    /// Cursor or buffer sizes no longer describe a valid region. Fatal for the stream.
    #[error("internal consistency violation: {0}")]
    InternalConsistency(String),

    #[error("invalid stream configuration: {0}")]
    InvalidConfig(String),

    #[error("could not start the tick timer: {0}")]
    Timer(String),
}

impl SynthError {
    /// Whether the affected stream has to be shut down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InternalConsistency(_))
    }
}
