use std::fmt::{self, Display};
use std::num::{NonZeroU64, NonZeroUsize};

use crate::weight::PriorityRange;

/// The TID of a thread
///
/// The TID cannot be 0, TIDs start from 1.
#[derive(PartialEq, Eq, Copy, Clone, Hash, Ord, PartialOrd)]
#[repr(transparent)]
pub struct Tid(NonZeroUsize);

impl Tid {
    pub fn new(tid: usize) -> Tid {
        match NonZeroUsize::new(tid) {
            Some(tid) => Tid(tid),
            None => panic!("TID 0 is reserved"),
        }
    }

    pub fn get(&self) -> usize {
        self.0.get()
    }
}

impl PartialEq<usize> for Tid {
    fn eq(&self, other: &usize) -> bool {
        self.0.get() == *other
    }
}

impl Display for Tid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Tid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The action that the scheduler asks the processor to take.
///
/// This is returned by [`Scheduler::on_tick`], [`Scheduler::schedule`] and
/// [`Scheduler::yield_current`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SchedulingDecision {
    /// Switch to the thread `tid`; it should run for about `timeslice` nanoseconds.
    Run { tid: Tid, timeslice: NonZeroU64 },

    /// Keep running the current thread.
    Continue,

    /// No thread is runnable.
    Idle,
}

impl Display for SchedulingDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulingDecision::Run { tid, timeslice } => {
                write!(f, "Run {} for {} ns", tid, timeslice)
            }
            SchedulingDecision::Continue => write!(f, "Continue"),
            SchedulingDecision::Idle => write!(f, "Idle, no runnable threads"),
        }
    }
}

/// Why a thread leaves the run queue.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DequeueReason {
    /// The thread waits for a wake-up and keeps its virtual runtime.
    Block,

    /// The thread is gone for good.
    Exit,
}

/// The state of a thread.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ThreadState {
    /// The thread is in the run queue.
    Ready,

    /// The thread owns the processor.
    Running,

    /// The thread waits for a semaphore, a timer or its first wake-up.
    Blocked,

    /// The thread has exited.
    Terminated,
}

impl Display for ThreadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThreadState::Ready => write!(f, "READY"),
            ThreadState::Running => write!(f, "RUNNING"),
            ThreadState::Blocked => write!(f, "BLOCKED"),
            ThreadState::Terminated => write!(f, "DYING"),
        }
    }
}

/// A snapshot of the scheduling state of one thread.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ThreadStats {
    pub tid: Tid,
    pub state: ThreadState,
    pub priority: i8,
    pub weight: u64,
    /// Virtual runtime, in weighted nanoseconds.
    pub vruntime: u64,
    /// Real time spent running, in nanoseconds.
    pub runtime: u64,
    /// Scheduling clock at the last enqueue, dispatch or preemption.
    pub last_event: u64,
    /// How many times the thread was dispatched.
    pub dispatches: u64,
}

/// Wall-clock cost of the dispatch decisions.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Overhead {
    /// Cost of the most recent decision, in nanoseconds.
    pub last_ns: u64,
    pub total_ns: u64,
    pub samples: u64,
}

impl Overhead {
    pub fn record(&mut self, ns: u64) {
        self.last_ns = ns;
        self.total_ns = self.total_ns.saturating_add(ns);
        self.samples += 1;
    }

    /// Average cost of a decision, in nanoseconds.
    pub fn average_ns(&self) -> u64 {
        if self.samples == 0 {
            0
        } else {
            self.total_ns / self.samples
        }
    }
}

/// The trait that any scheduler has to implement.
///
/// Violating a precondition (enqueueing a queued thread, dequeueing a
/// thread that is not queued, using an unknown TID or a priority outside
/// of [`Scheduler::priorities`]) panics.
pub trait Scheduler: Send {
    /// Makes `tid` runnable with `priority`. Unknown TIDs are registered.
    fn enqueue(&mut self, tid: Tid, priority: i8);

    /// Takes a ready or running thread off the processor.
    fn dequeue(&mut self, tid: Tid, reason: DequeueReason);

    /// Changes the priority, and with it the weight, of a thread.
    fn change_priority(&mut self, tid: Tid, priority: i8);

    /// Called on every timer interrupt with the elapsed real time.
    fn on_tick(&mut self, elapsed: u64) -> SchedulingDecision;

    /// Dispatches a thread if none is running.
    fn schedule(&mut self) -> SchedulingDecision;

    /// Puts the running thread back in the run queue and dispatches again.
    fn yield_current(&mut self) -> SchedulingDecision;

    /// Returns the thread that would be dispatched next.
    fn pick_next(&self) -> Option<Tid>;

    /// Returns the running thread.
    fn current(&self) -> Option<Tid>;

    /// Returns the scheduling state of `tid`, if it is alive.
    fn stats(&self, tid: Tid) -> Option<ThreadStats>;

    /// Returns every live thread.
    fn list(&self) -> Vec<ThreadStats>;

    /// Returns the ready threads in dispatch order.
    fn ready_queue(&self) -> Vec<Tid>;

    /// Returns the accumulated dispatch overhead.
    fn overhead(&self) -> Overhead;

    /// Clears the dispatch overhead counters.
    fn reset_overhead(&mut self);

    /// Returns the accepted priority range.
    fn priorities(&self) -> PriorityRange;
}
