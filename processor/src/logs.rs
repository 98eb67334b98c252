use std::fmt::{self, Display};
use std::num::NonZeroU64;

use scheduler::{Overhead, ThreadState, ThreadStats, Tid};

use crate::Sema;

/// Why a thread blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// `timer_sleep` until the given tick.
    Sleep { until: u64 },

    /// Waiting on a semaphore.
    Semaphore(Sema),
}

/// Something that happened on the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Boot,
    Spawn { tid: Tid, priority: i8 },
    Dispatch { tid: Tid, timeslice: NonZeroU64 },
    Block { tid: Tid, reason: BlockReason },
    Wake { tid: Tid },
    Yield { tid: Tid },
    Priority { tid: Tid, priority: i8 },
    Exit { tid: Tid },

    /// The timer skipped `ticks` ticks with nothing to run.
    Idle { ticks: u64 },

    Deadlock,
    Panic { tid: Tid },
    PowerOff,
}

impl Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Boot => write!(f, "BOOT"),
            Event::Spawn { tid, priority } => write!(f, "SPAWN {tid} (priority {priority})"),
            Event::Dispatch { tid, timeslice } => write!(f, "RUN {tid} for {timeslice} ns"),
            Event::Block {
                tid,
                reason: BlockReason::Sleep { until },
            } => write!(f, "SLEEP {tid} until tick {until}"),
            Event::Block {
                tid,
                reason: BlockReason::Semaphore(sema),
            } => write!(f, "WAIT {tid} on semaphore {}", sema.0),
            Event::Wake { tid } => write!(f, "WAKE {tid}"),
            Event::Yield { tid } => write!(f, "YIELD {tid}"),
            Event::Priority { tid, priority } => write!(f, "PRIORITY {tid} -> {priority}"),
            Event::Exit { tid } => write!(f, "EXIT {tid}"),
            Event::Idle { ticks } => write!(f, "IDLE for {ticks} ticks"),
            Event::Deadlock => write!(f, "DEADLOCK"),
            Event::Panic { tid } => write!(f, "PANIC in {tid}"),
            Event::PowerOff => write!(f, "POWER OFF"),
        }
    }
}

/// Information about a thread state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub tid: Tid,
    pub name: String,
    pub state: ThreadState,
    pub priority: i8,
    pub weight: u64,
    pub vruntime: u64,
    pub runtime: u64,
}

impl ThreadInfo {
    pub(crate) fn new(name: &str, stats: ThreadStats) -> ThreadInfo {
        ThreadInfo {
            tid: stats.tid,
            name: name.to_string(),
            state: stats.state,
            priority: stats.priority,
            weight: stats.weight,
            vruntime: stats.vruntime,
            runtime: stats.runtime,
        }
    }
}

impl Display for ThreadInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t\t{}\t{}\t{}\t{}\t{}",
            self.tid,
            self.state,
            self.priority,
            self.weight,
            self.vruntime,
            self.runtime,
            self.name
        )
    }
}

/// Processor log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    /// The timer tick the event happened at.
    pub tick: u64,

    pub event: Event,

    /// The threads known to the scheduler, sorted by TID. Empty unless
    /// snapshots are enabled.
    pub threads: Vec<ThreadInfo>,
}

impl Display for Log {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[{}] {}", self.tick, self.event)?;
        if !self.threads.is_empty() {
            writeln!(f, "TID\tSTATE\t\tPRI\tWEIGHT\tVRUNTIME\tRUNTIME\tNAME")?;
            for thread in &self.threads {
                writeln!(f, "{thread}")?;
            }
        }
        writeln!(f)
    }
}

/// How a simulation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The main thread returned while `abandoned` other threads were alive.
    Finished { abandoned: usize },

    /// Nothing could run and no sleeper would ever wake a thread up.
    Deadlock,

    /// A simulated thread panicked.
    Panicked(Tid),
}

/// The result of [`crate::Processor::run`].
#[derive(Debug)]
pub struct Report {
    pub logs: Vec<Log>,
    pub outcome: Outcome,

    /// Timer ticks since boot, idle ones included.
    pub ticks: u64,
    pub idle_ticks: u64,
    pub overhead: Overhead,

    /// The threads left at power-off.
    pub threads: Vec<ThreadInfo>,
}

/// Format the [`crate::Processor`]'s logs to a [`String`].
///
/// * `logs` - the logs returned by the [`crate::Processor`].
///
/// ## Example
///
/// ```rust
/// use processor::{format_logs, Processor, ProcessorConfig};
/// use scheduler::SchedConfig;
///
/// let scheduler = scheduler::wfq(SchedConfig::default()).unwrap();
/// let report = Processor::run(scheduler, ProcessorConfig::default(), |thread| {
///     thread.exec();
/// });
///
/// println!("{}", format_logs(&report.logs));
/// ```
pub fn format_logs(logs: &[Log]) -> String {
    let mut s = String::new();
    for (index, log) in logs.iter().enumerate() {
        s.push_str(&format!("===== Event: {} =====\n{}", index + 1, log));
    }
    s
}
