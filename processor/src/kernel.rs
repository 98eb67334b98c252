//! The state shared by every simulated thread.
//!
//! Holding the lock around [`Kernel`] is the simulated "interrupts
//! disabled" section: timer ticks, wake-ups and scheduler calls all happen
//! under it.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};
use scheduler::{DequeueReason, Scheduler, SchedulingDecision, Tid};

use crate::logs::{BlockReason, Event, Log, Outcome, Report, ThreadInfo};
use crate::sync::{Sema, Semaphore};
use crate::ProcessorConfig;

pub(crate) struct ThreadRecord {
    pub(crate) name: String,
    pub(crate) priority: i8,
}

pub(crate) struct Kernel<S: Scheduler> {
    pub(crate) scheduler: S,
    pub(crate) config: ProcessorConfig,
    pub(crate) powered: bool,
    pub(crate) ticks: u64,
    pub(crate) idle_ticks: u64,
    next_tid: usize,
    pub(crate) threads: BTreeMap<Tid, ThreadRecord>,
    /// `(wake tick, tid)`, earliest first.
    sleepers: BTreeSet<(u64, Tid)>,
    semaphores: Vec<Semaphore>,
    logs: Vec<Log>,
    outcome: Option<Outcome>,
}

impl<S: Scheduler> Kernel<S> {
    pub(crate) fn new(scheduler: S, config: ProcessorConfig) -> Self {
        Kernel {
            scheduler,
            config,
            powered: true,
            ticks: 0,
            idle_ticks: 0,
            next_tid: 1,
            threads: BTreeMap::new(),
            sleepers: BTreeSet::new(),
            semaphores: Vec::new(),
            logs: Vec::new(),
            outcome: None,
        }
    }

    pub(crate) fn log(&mut self, event: Event) {
        debug!("[{}] {}", self.ticks, event);
        let threads = if self.config.snapshots() {
            self.snapshot()
        } else {
            vec![]
        };
        self.logs.push(Log {
            tick: self.ticks,
            event,
            threads,
        });
    }

    fn snapshot(&self) -> Vec<ThreadInfo> {
        self.scheduler
            .list()
            .into_iter()
            .map(|stats| {
                let name = self
                    .threads
                    .get(&stats.tid)
                    .map_or("", |record| record.name.as_str());
                ThreadInfo::new(name, stats)
            })
            .collect()
    }

    /// Reserves the TID of the next thread.
    pub(crate) fn allocate_tid(&mut self) -> Tid {
        let tid = Tid::new(self.next_tid);
        self.next_tid += 1;
        tid
    }

    /// Registers a new thread and makes it runnable.
    pub(crate) fn create(&mut self, tid: Tid, name: &str, priority: i8) {
        self.threads.insert(
            tid,
            ThreadRecord {
                name: name.to_string(),
                priority,
            },
        );
        self.scheduler.enqueue(tid, priority);
        self.log(Event::Spawn { tid, priority });
    }

    fn priority_of(&self, tid: Tid) -> i8 {
        match self.threads.get(&tid) {
            Some(record) => record.priority,
            None => panic!("unknown thread {tid}"),
        }
    }

    /// One timer interrupt on behalf of the running thread.
    pub(crate) fn tick(&mut self) {
        self.ticks += 1;
        self.wake_sleepers();
        let decision = self.scheduler.on_tick(self.config.tick_ns());
        self.decided(decision);
    }

    fn wake_sleepers(&mut self) {
        while let Some(&(wake, tid)) = self.sleepers.first() {
            if wake > self.ticks {
                break;
            }
            self.sleepers.remove(&(wake, tid));
            self.wake(tid);
        }
    }

    pub(crate) fn wake(&mut self, tid: Tid) {
        let priority = self.priority_of(tid);
        self.scheduler.enqueue(tid, priority);
        self.log(Event::Wake { tid });
    }

    pub(crate) fn block(&mut self, tid: Tid, reason: BlockReason) {
        if let BlockReason::Sleep { until } = reason {
            self.sleepers.insert((until, tid));
        }
        self.scheduler.dequeue(tid, DequeueReason::Block);
        self.log(Event::Block { tid, reason });
        self.reschedule();
    }

    pub(crate) fn exit(&mut self, tid: Tid) {
        self.scheduler.dequeue(tid, DequeueReason::Exit);
        self.threads.remove(&tid);
        self.log(Event::Exit { tid });
        self.reschedule();
    }

    pub(crate) fn yield_current(&mut self, tid: Tid) {
        self.log(Event::Yield { tid });
        let decision = self.scheduler.yield_current();
        self.decided(decision);
    }

    pub(crate) fn set_priority(&mut self, tid: Tid, priority: i8) {
        self.scheduler.change_priority(tid, priority);
        if let Some(record) = self.threads.get_mut(&tid) {
            record.priority = priority;
        }
        self.log(Event::Priority { tid, priority });
    }

    pub(crate) fn sema_init(&mut self, value: usize) -> Sema {
        self.semaphores.push(Semaphore::new(value));
        Sema(self.semaphores.len() - 1)
    }

    pub(crate) fn semaphore(&mut self, sema: Sema) -> &mut Semaphore {
        match self.semaphores.get_mut(sema.0) {
            Some(semaphore) => semaphore,
            None => panic!("unknown semaphore {}", sema.0),
        }
    }

    fn decided(&mut self, decision: SchedulingDecision) {
        match decision {
            SchedulingDecision::Run { tid, timeslice } => {
                self.log(Event::Dispatch { tid, timeslice })
            }
            SchedulingDecision::Continue => {}
            SchedulingDecision::Idle => self.reschedule(),
        }
    }

    /// Finds a thread to run once the processor has been given up.
    ///
    /// With nothing runnable the timer skips ahead to the earliest sleeper;
    /// with no sleeper either, nothing can ever run again.
    pub(crate) fn reschedule(&mut self) {
        while self.powered && self.scheduler.current().is_none() {
            match self.scheduler.schedule() {
                SchedulingDecision::Run { tid, timeslice } => {
                    self.log(Event::Dispatch { tid, timeslice });
                }
                SchedulingDecision::Continue => break,
                SchedulingDecision::Idle => {
                    let Some(&(wake, _)) = self.sleepers.first() else {
                        warn!(
                            "deadlock at tick {}: {} threads blocked",
                            self.ticks,
                            self.threads.len()
                        );
                        self.log(Event::Deadlock);
                        self.power_off(Outcome::Deadlock);
                        break;
                    };
                    let skipped = wake.saturating_sub(self.ticks);
                    if skipped > 0 {
                        self.ticks = wake;
                        self.idle_ticks += skipped;
                        self.log(Event::Idle { ticks: skipped });
                        // Nothing is ready, so this only advances the clock.
                        self.scheduler
                            .on_tick(self.config.tick_ns().saturating_mul(skipped));
                    }
                    self.wake_sleepers();
                }
            }
        }
    }

    /// The main thread returned.
    pub(crate) fn finish(&mut self, main: Tid) {
        if !self.powered {
            return;
        }
        self.scheduler.dequeue(main, DequeueReason::Exit);
        self.threads.remove(&main);
        self.log(Event::Exit { tid: main });
        let abandoned = self.threads.len();
        self.power_off(Outcome::Finished { abandoned });
    }

    pub(crate) fn crash(&mut self, tid: Tid) {
        if !self.powered {
            return;
        }
        self.log(Event::Panic { tid });
        self.power_off(Outcome::Panicked(tid));
    }

    fn power_off(&mut self, outcome: Outcome) {
        info!(
            "power off at tick {} ({} idle): {:?}",
            self.ticks, self.idle_ticks, outcome
        );
        self.outcome = Some(outcome);
        self.log(Event::PowerOff);
        self.powered = false;
    }

    pub(crate) fn report(&mut self) -> Report {
        Report {
            logs: std::mem::take(&mut self.logs),
            outcome: self
                .outcome
                .unwrap_or(Outcome::Finished { abandoned: 0 }),
            ticks: self.ticks,
            idle_ticks: self.idle_ticks,
            overhead: self.scheduler.overhead(),
            threads: self.snapshot(),
        }
    }
}
