//! Weighted fair queueing.
//!
//! Every thread carries a virtual runtime, advanced on each timer tick by
//!
//! ```text
//! vruntime += elapsed * reference_weight / weight
//! ```
//!
//! so heavier threads age slower and get a larger share of the processor.
//! The run queue is an [`RbTree`] keyed by `(vruntime, sequence)`, the
//! sequence number making threads with equal virtual runtimes leave the
//! queue in the order they entered it.
//!
//! The running thread is preempted when
//!
//! ```text
//! vruntime > leftmost.vruntime + preemption_slack
//! ```
//!
//! and each dispatch reports a time slice of
//!
//! ```text
//! period * weight / total_weight
//! ```
//!
//! where `period` is `sched_latency`, stretched to `min_granularity` times
//! the number of runnable threads when many of them compete.

use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::num::NonZeroU64;
use std::time::Instant;

use log::{debug, trace};

use crate::config::SchedConfig;
use crate::error::{ConfigError, TreeError};
use crate::rbtree::{RbLink, RbTree};
use crate::weight::{PriorityRange, WeightTable};
use crate::ThreadState::{Blocked, Ready, Running, Terminated};
use crate::{
    DequeueReason, Overhead, Scheduler, SchedulingDecision, ThreadState, ThreadStats, Tid,
};

struct SchedEntity {
    link: RbLink,
    tid: Tid,
    state: Cell<ThreadState>,
    priority: Cell<i8>,
    weight: Cell<u64>,
    vruntime: Cell<u64>,
    runtime: Cell<u64>,
    seq: Cell<u64>,
    last_event: Cell<u64>,
    dispatches: Cell<u64>,
}

crate::impl_rb_node!(SchedEntity, link);

impl SchedEntity {
    fn new(tid: Tid) -> Self {
        SchedEntity {
            link: RbLink::new(),
            tid,
            state: Cell::new(Blocked),
            priority: Cell::new(0),
            weight: Cell::new(0),
            vruntime: Cell::new(0),
            runtime: Cell::new(0),
            seq: Cell::new(0),
            last_event: Cell::new(0),
            dispatches: Cell::new(0),
        }
    }

    fn stats(&self) -> ThreadStats {
        ThreadStats {
            tid: self.tid,
            state: self.state.get(),
            priority: self.priority.get(),
            weight: self.weight.get(),
            vruntime: self.vruntime.get(),
            runtime: self.runtime.get(),
            last_event: self.last_event.get(),
            dispatches: self.dispatches.get(),
        }
    }
}

fn by_vruntime(a: &SchedEntity, b: &SchedEntity) -> Ordering {
    a.vruntime
        .get()
        .cmp(&b.vruntime.get())
        .then(a.seq.get().cmp(&b.seq.get()))
}

type RunQueue = RbTree<SchedEntity, fn(&SchedEntity, &SchedEntity) -> Ordering>;

fn lookup(threads: &BTreeMap<Tid, Box<SchedEntity>>, tid: Tid) -> &SchedEntity {
    match threads.get(&tid) {
        Some(entity) => entity,
        None => panic!("unknown thread {tid}"),
    }
}

fn elapsed_ns(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

pub struct Wfq {
    config: SchedConfig,
    weights: WeightTable,
    run_queue: RunQueue,
    /// Every live thread, boxed so that run queue links never move.
    threads: BTreeMap<Tid, Box<SchedEntity>>,
    current: Option<Tid>,
    /// Never decreases. Serves as the floor for enqueued threads.
    min_vruntime: u64,
    clock: u64,
    next_seq: u64,
    /// Sum of the weights of the ready and running threads.
    total_weight: u64,
    overhead: Overhead,
}

// SAFETY: the run queue only links entities owned by `threads`, the two
// always move together, and no reference to an entity escapes `Wfq`.
unsafe impl Send for Wfq {}

impl Wfq {
    pub fn new(config: SchedConfig) -> Result<Self, ConfigError> {
        let weights = config.weight_table()?;
        Wfq::with_weights(config, weights)
    }

    /// Uses an explicit weight table; its range replaces
    /// `config.priorities`.
    pub fn with_weights(
        mut config: SchedConfig,
        weights: WeightTable,
    ) -> Result<Self, ConfigError> {
        if config.sched_latency == 0 {
            return Err(ConfigError::ZeroLatency);
        }
        config.priorities = weights.range();
        debug!(
            "wfq: {} priorities, reference weight {}, slack {} ns",
            config.priorities.count(),
            weights.reference_weight(),
            config.preemption_slack
        );
        Ok(Wfq {
            config,
            weights,
            run_queue: RbTree::new(by_vruntime),
            threads: BTreeMap::new(),
            current: None,
            min_vruntime: 0,
            clock: 0,
            next_seq: 0,
            total_weight: 0,
            overhead: Overhead::default(),
        })
    }

    pub fn config(&self) -> &SchedConfig {
        &self.config
    }

    pub fn min_vruntime(&self) -> u64 {
        self.min_vruntime
    }

    /// Sum of every elapsed time passed to [`Scheduler::on_tick`].
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// The slice `tid` would get if dispatched now.
    pub fn time_slice(&self, tid: Tid) -> Option<NonZeroU64> {
        let entity = self.threads.get(&tid)?;
        match entity.state.get() {
            Ready | Running => Some(self.slice_for(entity.weight.get())),
            Blocked | Terminated => None,
        }
    }

    /// Checks the run queue structure and returns its black-height.
    pub fn validate(&self) -> Result<usize, TreeError> {
        self.run_queue.validate()
    }

    fn weight_of(&self, priority: i8) -> u64 {
        match self.weights.weight(priority) {
            Some(weight) => weight,
            None => panic!(
                "priority {priority} outside of {}..={}",
                self.config.priorities.min, self.config.priorities.max
            ),
        }
    }

    fn push_ready(run_queue: &mut RunQueue, next_seq: &mut u64, entity: &SchedEntity) {
        entity.seq.set(*next_seq);
        *next_seq += 1;
        // SAFETY: entities are boxed in `threads` and leave the run queue
        // before their box is dropped.
        if let Err(err) = unsafe { run_queue.insert(entity) } {
            panic!("run queue rejected thread {}: {err}", entity.tid);
        }
    }

    fn slice_for(&self, weight: u64) -> NonZeroU64 {
        let runnable = self.run_queue.len() as u64 + u64::from(self.current.is_some());
        let period = self
            .config
            .min_granularity
            .saturating_mul(runnable)
            .max(self.config.sched_latency);
        let total = self.total_weight.max(weight);
        let slice = u128::from(period) * u128::from(weight) / u128::from(total);
        NonZeroU64::new(u64::try_from(slice).unwrap_or(u64::MAX)).unwrap_or(NonZeroU64::MIN)
    }

    /// Moves the running thread back into the run queue.
    fn put_prev(&mut self, tid: Tid) {
        let entity = lookup(&self.threads, tid);
        entity.state.set(Ready);
        entity.last_event.set(self.clock);
        Self::push_ready(&mut self.run_queue, &mut self.next_seq, entity);
        self.current = None;
    }

    /// Dispatches the leftmost ready thread.
    fn pick(&mut self) -> SchedulingDecision {
        let Some(tid) = self.run_queue.first().map(|entity| entity.tid) else {
            return SchedulingDecision::Idle;
        };
        let entity = lookup(&self.threads, tid);
        self.run_queue.remove(entity);
        entity.state.set(Running);
        entity.last_event.set(self.clock);
        entity.dispatches.set(entity.dispatches.get() + 1);
        self.current = Some(tid);

        let timeslice = self.slice_for(entity.weight.get());
        debug!(
            "dispatch {tid}: vruntime {}, slice {timeslice} ns, {} ready",
            entity.vruntime.get(),
            self.run_queue.len()
        );
        SchedulingDecision::Run { tid, timeslice }
    }

    fn update_min_vruntime(&mut self) {
        let current = self
            .current
            .map(|tid| lookup(&self.threads, tid).vruntime.get());
        let leftmost = self.run_queue.first().map(|entity| entity.vruntime.get());
        let floor = match (current, leftmost) {
            (Some(current), Some(leftmost)) => current.min(leftmost),
            (Some(vruntime), None) | (None, Some(vruntime)) => vruntime,
            (None, None) => return,
        };
        self.min_vruntime = self.min_vruntime.max(floor);
    }

    fn check(&self) {
        if !self.config.check_invariants {
            return;
        }
        if let Err(err) = self.run_queue.validate() {
            panic!("run queue invariant violated: {err}");
        }

        let ready = self
            .threads
            .values()
            .filter(|entity| entity.state.get() == Ready)
            .count();
        assert_eq!(ready, self.run_queue.len(), "ready threads out of the run queue");

        let runnable: u64 = self
            .threads
            .values()
            .filter(|entity| matches!(entity.state.get(), Ready | Running))
            .map(|entity| entity.weight.get())
            .sum();
        assert_eq!(runnable, self.total_weight, "runnable weight drifted");

        let running: Vec<Tid> = self
            .threads
            .values()
            .filter(|entity| entity.state.get() == Running)
            .map(|entity| entity.tid)
            .collect();
        assert_eq!(running, self.current.into_iter().collect::<Vec<_>>());
    }
}

impl Scheduler for Wfq {
    fn enqueue(&mut self, tid: Tid, priority: i8) {
        let weight = self.weight_of(priority);
        let entity = self
            .threads
            .entry(tid)
            .or_insert_with(|| Box::new(SchedEntity::new(tid)));
        let state = entity.state.get();
        if state != Blocked {
            panic!("enqueue of thread {tid}, which is {state}");
        }

        entity.priority.set(priority);
        entity.weight.set(weight);
        // Never start behind the field.
        entity
            .vruntime
            .set(entity.vruntime.get().max(self.min_vruntime));
        entity.state.set(Ready);
        entity.last_event.set(self.clock);
        self.total_weight += weight;
        trace!(
            "enqueue {tid}: priority {priority}, weight {weight}, vruntime {}",
            entity.vruntime.get()
        );
        Self::push_ready(&mut self.run_queue, &mut self.next_seq, entity);

        self.update_min_vruntime();
        self.check();
    }

    fn dequeue(&mut self, tid: Tid, reason: DequeueReason) {
        let entity = lookup(&self.threads, tid);
        match entity.state.get() {
            Ready => self.run_queue.remove(entity),
            Running => {
                debug_assert_eq!(self.current, Some(tid));
                self.current = None;
            }
            state => panic!("dequeue of thread {tid}, which is {state}"),
        }
        self.total_weight -= entity.weight.get();
        entity.last_event.set(self.clock);
        trace!("dequeue {tid}: {reason:?}");

        match reason {
            DequeueReason::Block => entity.state.set(Blocked),
            DequeueReason::Exit => {
                entity.state.set(Terminated);
                self.threads.remove(&tid);
            }
        }

        self.update_min_vruntime();
        self.check();
    }

    fn change_priority(&mut self, tid: Tid, priority: i8) {
        let weight = self.weight_of(priority);
        let entity = lookup(&self.threads, tid);
        let previous = entity.weight.get();
        match entity.state.get() {
            Ready => {
                self.run_queue.remove(entity);
                entity.priority.set(priority);
                entity.weight.set(weight);
                Self::push_ready(&mut self.run_queue, &mut self.next_seq, entity);
                self.total_weight = self.total_weight - previous + weight;
            }
            Running => {
                entity.priority.set(priority);
                entity.weight.set(weight);
                self.total_weight = self.total_weight - previous + weight;
            }
            Blocked => {
                entity.priority.set(priority);
                entity.weight.set(weight);
            }
            Terminated => panic!("priority change of terminated thread {tid}"),
        }
        trace!("reweight {tid}: priority {priority}, weight {previous} -> {weight}");

        self.update_min_vruntime();
        self.check();
    }

    fn on_tick(&mut self, elapsed: u64) -> SchedulingDecision {
        self.clock = self
            .clock
            .checked_add(elapsed)
            .expect("scheduling clock overflowed");
        let Some(tid) = self.current else {
            return self.schedule();
        };

        let started = Instant::now();
        let entity = lookup(&self.threads, tid);
        let vruntime = self
            .weights
            .scale(elapsed, entity.weight.get())
            .and_then(|delta| entity.vruntime.get().checked_add(delta));
        let Some(vruntime) = vruntime else {
            panic!("vruntime of thread {tid} overflowed");
        };
        entity.vruntime.set(vruntime);
        entity.runtime.set(entity.runtime.get().saturating_add(elapsed));
        self.update_min_vruntime();

        let Some(leftmost) = self.run_queue.first() else {
            return SchedulingDecision::Continue;
        };
        if vruntime <= leftmost.vruntime.get().saturating_add(self.config.preemption_slack) {
            return SchedulingDecision::Continue;
        }

        debug!(
            "preempt {tid}: vruntime {vruntime}, leftmost {} at {}",
            leftmost.tid,
            leftmost.vruntime.get()
        );
        self.put_prev(tid);
        let decision = self.pick();
        self.overhead.record(elapsed_ns(started));
        self.check();
        decision
    }

    fn schedule(&mut self) -> SchedulingDecision {
        if self.current.is_some() {
            return SchedulingDecision::Continue;
        }
        let started = Instant::now();
        let decision = self.pick();
        self.overhead.record(elapsed_ns(started));
        self.update_min_vruntime();
        self.check();
        decision
    }

    fn yield_current(&mut self) -> SchedulingDecision {
        let Some(tid) = self.current else {
            return self.schedule();
        };
        let started = Instant::now();
        self.put_prev(tid);
        let decision = self.pick();
        self.overhead.record(elapsed_ns(started));
        self.check();
        decision
    }

    fn pick_next(&self) -> Option<Tid> {
        self.run_queue.first().map(|entity| entity.tid)
    }

    fn current(&self) -> Option<Tid> {
        self.current
    }

    fn stats(&self, tid: Tid) -> Option<ThreadStats> {
        self.threads.get(&tid).map(|entity| entity.stats())
    }

    fn list(&self) -> Vec<ThreadStats> {
        self.threads.values().map(|entity| entity.stats()).collect()
    }

    fn ready_queue(&self) -> Vec<Tid> {
        self.run_queue.iter().map(|entity| entity.tid).collect()
    }

    fn overhead(&self) -> Overhead {
        self.overhead
    }

    fn reset_overhead(&mut self) {
        self.overhead = Overhead::default();
    }

    fn priorities(&self) -> PriorityRange {
        self.config.priorities
    }
}
