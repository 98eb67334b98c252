use crate::SysError;

const NSEC_PER_SEC: u64 = 1_000_000_000;

/// Settings of the simulated machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    timer_freq: u64,
    snapshots: bool,
}

impl ProcessorConfig {
    /// * `timer_freq` - timer interrupts per second, between 19 and 1000.
    pub fn new(timer_freq: u64) -> Result<Self, SysError> {
        if !(19..=1000).contains(&timer_freq) {
            return Err(SysError::InvalidTimerFreq(timer_freq));
        }
        Ok(ProcessorConfig {
            timer_freq,
            snapshots: false,
        })
    }

    /// Attach the state of every thread to each log entry.
    pub fn with_snapshots(mut self, snapshots: bool) -> Self {
        self.snapshots = snapshots;
        self
    }

    pub fn timer_freq(&self) -> u64 {
        self.timer_freq
    }

    pub fn snapshots(&self) -> bool {
        self.snapshots
    }

    /// Length of one tick in nanoseconds.
    pub fn tick_ns(&self) -> u64 {
        NSEC_PER_SEC / self.timer_freq
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        ProcessorConfig {
            timer_freq: 100,
            snapshots: false,
        }
    }
}
