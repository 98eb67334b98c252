//! A weighted fair scheduler library.
//!
//! This library provides the [`Scheduler`] trait, an intrusive red-black
//! tree used as a run queue, and [`Wfq`], a scheduler that divides the
//! processor among threads in proportion to the weights of their
//! priorities.
//!

pub mod config;
pub mod error;
pub mod rbtree;
pub mod weight;

mod scheduler;

pub use crate::config::SchedConfig;
pub use crate::error::{ConfigError, TreeError};
pub use crate::scheduler::{
    DequeueReason, Overhead, Scheduler, SchedulingDecision, ThreadState, ThreadStats, Tid,
};
pub use crate::weight::{PriorityRange, WeightCurve, WeightTable, PRI_DEFAULT, PRI_MAX, PRI_MIN};
pub use schedulers::Wfq;

mod schedulers;

/// Returns a structure that implements the `Scheduler` trait with a weighted fair queueing policy
///
/// * `config` - the priority range, the weight curve and the preemption tunables;
///              [`SchedConfig::default`] uses nice priorities from -20 to 19
///              with 25% between neighbouring weights.
pub fn wfq(config: SchedConfig) -> Result<Wfq, ConfigError> {
    Wfq::new(config)
}

/// Returns a weighted fair queueing scheduler that maps priorities through `weights`
pub fn wfq_with_weights(config: SchedConfig, weights: WeightTable) -> Result<Wfq, ConfigError> {
    Wfq::with_weights(config, weights)
}
