use crate::error::ConfigError;
use crate::weight::{PriorityRange, WeightCurve, WeightTable};

/// Nanoseconds per millisecond.
pub const NSEC_PER_MSEC: u64 = 1_000_000;

/// Tunables of the weighted fair scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedConfig {
    pub priorities: PriorityRange,
    pub curve: WeightCurve,

    /// How far, in virtual nanoseconds, the running thread may get ahead of
    /// the leftmost ready thread before it is preempted.
    pub preemption_slack: u64,

    /// The period within which every runnable thread should run once.
    pub sched_latency: u64,

    /// The shortest slice handed out, which stretches the period when many
    /// threads are runnable.
    pub min_granularity: u64,

    /// Re-validate the run queue after every mutation.
    pub check_invariants: bool,
}

impl Default for SchedConfig {
    fn default() -> Self {
        SchedConfig {
            priorities: PriorityRange::default(),
            curve: WeightCurve::default(),
            preemption_slack: 10 * NSEC_PER_MSEC,
            sched_latency: 60 * NSEC_PER_MSEC,
            min_granularity: 10 * NSEC_PER_MSEC,
            check_invariants: cfg!(debug_assertions),
        }
    }
}

impl SchedConfig {
    /// Builds the weight table, rejecting configurations that could not
    /// schedule anything.
    pub fn weight_table(&self) -> Result<WeightTable, ConfigError> {
        if self.sched_latency == 0 {
            return Err(ConfigError::ZeroLatency);
        }
        WeightTable::new(self.priorities, self.curve)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.weight_table().map(|_| ())
    }

    pub fn with_slack(mut self, preemption_slack: u64) -> Self {
        self.preemption_slack = preemption_slack;
        self
    }

    pub fn with_curve(mut self, curve: WeightCurve) -> Self {
        self.curve = curve;
        self
    }

    pub fn with_invariant_checks(mut self, check_invariants: bool) -> Self {
        self.check_invariants = check_invariants;
        self
    }
}
