use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FmError {
    #[error("No valid frequency code: {0}")]
    Configuration(String),

    #[error("Hardware resource error: {0}")]
    Resource(String),

    #[error("Sample apply took {elapsed:?}, budget is {budget:?}")]
    TimingViolation { elapsed: Duration, budget: Duration },

    #[error("Waveform queue full, sample dropped")]
    QueueFull,

    #[error("Transmitter not initialized")]
    NotInitialized,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl FmError {
    /// Errors that leave the transmitter usable once the next sample arrives.
    pub fn is_transient(&self) -> bool {
        matches!(self, FmError::TimingViolation { .. } | FmError::QueueFull)
    }
}

pub type Result<T> = std::result::Result<T, FmError>;
