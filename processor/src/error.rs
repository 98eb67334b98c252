use std::error::Error;
use std::fmt::{self, Display};

/// An error returned to a simulated thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SysError {
    /// The priority is outside of the scheduler's range.
    InvalidPriority(i8),

    /// The processor has powered off.
    PoweredOff,

    /// The timer frequency is outside of 19..=1000 Hz.
    InvalidTimerFreq(u64),

    /// The host refused to start another OS thread.
    Spawn(String),
}

impl Display for SysError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SysError::InvalidPriority(priority) => write!(f, "invalid priority {priority}"),
            SysError::PoweredOff => write!(f, "the processor is powered off"),
            SysError::InvalidTimerFreq(freq) => {
                write!(f, "timer frequency {freq} Hz is outside of 19..=1000")
            }
            SysError::Spawn(reason) => write!(f, "cannot start a thread: {reason}"),
        }
    }
}

impl Error for SysError {}
