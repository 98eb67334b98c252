//! A processor simulation library
//!
//! This is used for running the schedulers from the [`scheduler`] crate on
//! a simulated single-core machine. Every simulated thread is backed by an
//! OS thread, but only the one the scheduler dispatched may proceed; the
//! others wait on a condition variable until the baton is passed to them.
//!
//! Time is counted in timer ticks. Every [`Thread::exec`] is one tick of
//! CPU work by the running thread, and when nothing is runnable the timer
//! jumps ahead to the earliest sleeper.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use log::info;
use scheduler::{Overhead, PriorityRange, Scheduler, ThreadStats, Tid};

mod config;
mod error;
mod kernel;
mod logs;
mod sync;

pub use crate::config::ProcessorConfig;
pub use crate::error::SysError;
pub use crate::logs::{format_logs, BlockReason, Event, Log, Outcome, Report, ThreadInfo};
pub use crate::sync::Sema;

use crate::kernel::Kernel;

/// The processor simulator.
pub struct Processor<S: Scheduler + 'static> {
    kernel: Mutex<Kernel<S>>,
    baton: Condvar,
    handles: Mutex<Vec<JoinHandle<()>>>,
    panic: Mutex<Option<Box<dyn Any + Send>>>,
}

impl<S: Scheduler + 'static> Processor<S> {
    /// Start a new processor simulation.
    ///
    /// * `scheduler` - the scheduler to use for the simulation.
    /// * `config` - the timer frequency and the logging detail.
    /// * `f` - the instructions of the main thread, TID 1, which runs on the
    ///         calling thread at the default priority.
    ///
    /// The processor powers off when `f` returns. If a simulated thread
    /// panics, the processor powers off and the panic is resumed here once
    /// every thread has stopped.
    ///
    /// ## Example
    ///
    /// ```rust
    /// use processor::{Outcome, Processor, ProcessorConfig};
    /// use scheduler::SchedConfig;
    ///
    /// let scheduler = scheduler::wfq(SchedConfig::default()).unwrap();
    /// let report = Processor::run(scheduler, ProcessorConfig::default(), |main| {
    ///     let done = main.sema_init(0);
    ///     main.spawn("worker", 0, move |thread| {
    ///         for _ in 0..10 {
    ///             thread.exec();
    ///         }
    ///         thread.sema_up(done);
    ///     })
    ///     .unwrap();
    ///     main.sleep(5);
    ///     main.sema_down(done);
    /// });
    /// assert_eq!(report.outcome, Outcome::Finished { abandoned: 0 });
    /// ```
    pub fn run<F>(scheduler: S, config: ProcessorConfig, f: F) -> Report
    where
        F: FnOnce(&Thread<S>),
    {
        let processor = Arc::new(Processor {
            kernel: Mutex::new(Kernel::new(scheduler, config)),
            baton: Condvar::new(),
            handles: Mutex::new(vec![]),
            panic: Mutex::new(None),
        });

        let tid = {
            let mut kernel = processor.lock();
            info!("boot: timer at {} Hz", config.timer_freq());
            kernel.log(Event::Boot);
            let tid = kernel.allocate_tid();
            let priority = kernel.scheduler.priorities().default;
            kernel.create(tid, "main", priority);
            kernel.reschedule();
            tid
        };

        let main = Thread {
            tid,
            processor: processor.clone(),
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            drop(processor.suspend(processor.lock(), tid));
            f(&main)
        }));
        match result {
            Ok(()) => {
                processor.lock().finish(tid);
                processor.baton.notify_all();
            }
            Err(payload) => processor.crash(tid, payload),
        }

        processor.join();
        let payload = processor
            .panic
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(payload) = payload {
            panic::resume_unwind(payload);
        }

        let report = processor.lock().report();
        report
    }

    fn lock(&self) -> MutexGuard<'_, Kernel<S>> {
        self.kernel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits until `tid` is dispatched or the processor powers off.
    fn suspend<'a>(
        &'a self,
        mut kernel: MutexGuard<'a, Kernel<S>>,
        tid: Tid,
    ) -> MutexGuard<'a, Kernel<S>> {
        while kernel.powered && kernel.scheduler.current() != Some(tid) {
            kernel = self
                .baton
                .wait(kernel)
                .unwrap_or_else(PoisonError::into_inner);
        }
        kernel
    }

    /// Passes the baton to whichever thread is current and waits for it to
    /// come back to `tid`.
    fn switch(&self, kernel: MutexGuard<'_, Kernel<S>>, tid: Tid) {
        self.baton.notify_all();
        drop(self.suspend(kernel, tid));
    }

    fn crash(&self, tid: Tid, payload: Box<dyn Any + Send>) {
        self.lock().crash(tid);
        self.baton.notify_all();
        let mut panic = self.panic.lock().unwrap_or_else(PoisonError::into_inner);
        if panic.is_none() {
            *panic = Some(payload);
        }
    }

    /// Joins every OS thread, including the ones started while joining.
    fn join(&self) {
        loop {
            let handles =
                std::mem::take(&mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner));
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                // Panics are caught inside the thread.
                let _ = handle.join();
            }
        }
    }
}

/// The interface offered by the [`Processor`] to a simulated thread.
///
/// Once the processor has powered off every operation returns right away:
/// [`Thread::exec`] returns `false` and blocking calls do not block.
pub struct Thread<S: Scheduler + 'static> {
    /// The TID of the thread.
    pub tid: Tid,
    processor: Arc<Processor<S>>,
}

impl<S: Scheduler + 'static> Thread<S> {
    /// Execute one tick of work.
    ///
    /// Returns `false` once the processor has powered off.
    pub fn exec(&self) -> bool {
        let mut kernel = self.processor.lock();
        if !kernel.powered {
            return false;
        }
        kernel.tick();
        self.processor.baton.notify_all();
        let kernel = self.processor.suspend(kernel, self.tid);
        kernel.powered
    }

    /// Create a thread that becomes ready right away; the caller keeps
    /// running.
    pub fn spawn<F>(&self, name: &str, priority: i8, f: F) -> Result<Tid, SysError>
    where
        F: FnOnce(&Thread<S>) + Send + 'static,
    {
        let mut kernel = self.processor.lock();
        if !kernel.powered {
            return Err(SysError::PoweredOff);
        }
        if !kernel.scheduler.priorities().contains(priority) {
            return Err(SysError::InvalidPriority(priority));
        }

        let tid = kernel.allocate_tid();
        let processor = self.processor.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let thread = Thread { tid, processor };
                let kernel = thread.processor.suspend(thread.processor.lock(), tid);
                if !kernel.powered {
                    return;
                }
                drop(kernel);

                match panic::catch_unwind(AssertUnwindSafe(|| f(&thread))) {
                    Ok(()) => thread.exit(),
                    Err(payload) => thread.processor.crash(tid, payload),
                }
            })
            .map_err(|err| SysError::Spawn(err.to_string()))?;
        self.processor
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);

        kernel.create(tid, name, priority);
        Ok(tid)
    }

    /// Sleep for `ticks` timer ticks.
    pub fn sleep(&self, ticks: u64) {
        if ticks == 0 {
            return;
        }
        let mut kernel = self.processor.lock();
        if !kernel.powered {
            return;
        }
        let until = kernel.ticks + ticks;
        kernel.block(self.tid, BlockReason::Sleep { until });
        self.processor.switch(kernel, self.tid);
    }

    /// Create a semaphore holding `value` units.
    pub fn sema_init(&self, value: usize) -> Sema {
        self.processor.lock().sema_init(value)
    }

    /// Take one unit, blocking until one is available.
    pub fn sema_down(&self, sema: Sema) {
        let mut kernel = self.processor.lock();
        if !kernel.powered {
            return;
        }
        if kernel.semaphore(sema).down(self.tid) {
            return;
        }
        kernel.block(self.tid, BlockReason::Semaphore(sema));
        self.processor.switch(kernel, self.tid);
    }

    /// Release one unit, waking the longest waiter.
    pub fn sema_up(&self, sema: Sema) {
        let mut kernel = self.processor.lock();
        if !kernel.powered {
            return;
        }
        if let Some(waiter) = kernel.semaphore(sema).up() {
            kernel.wake(waiter);
        }
    }

    /// Give up the processor; the thread stays ready.
    pub fn yield_now(&self) {
        let mut kernel = self.processor.lock();
        if !kernel.powered {
            return;
        }
        kernel.yield_current(self.tid);
        self.processor.switch(kernel, self.tid);
    }

    pub fn set_priority(&self, priority: i8) -> Result<(), SysError> {
        let mut kernel = self.processor.lock();
        if !kernel.powered {
            return Err(SysError::PoweredOff);
        }
        if !kernel.scheduler.priorities().contains(priority) {
            return Err(SysError::InvalidPriority(priority));
        }
        kernel.set_priority(self.tid, priority);
        Ok(())
    }

    pub fn priority(&self) -> i8 {
        let kernel = self.processor.lock();
        kernel
            .threads
            .get(&self.tid)
            .map_or(kernel.scheduler.priorities().default, |record| {
                record.priority
            })
    }

    /// The priorities the scheduler accepts.
    pub fn priorities(&self) -> PriorityRange {
        self.processor.lock().scheduler.priorities()
    }

    /// Time spent running, in nanoseconds.
    pub fn runtime(&self) -> u64 {
        self.runtime_of(self.tid).unwrap_or(0)
    }

    pub fn runtime_of(&self, tid: Tid) -> Option<u64> {
        self.stats_of(tid).map(|stats| stats.runtime)
    }

    pub fn stats_of(&self, tid: Tid) -> Option<ThreadStats> {
        self.processor.lock().scheduler.stats(tid)
    }

    /// Timer ticks since boot.
    pub fn ticks(&self) -> u64 {
        self.processor.lock().ticks
    }

    pub fn overhead(&self) -> Overhead {
        self.processor.lock().scheduler.overhead()
    }

    pub fn reset_overhead(&self) {
        self.processor.lock().scheduler.reset_overhead();
    }

    fn exit(&self) {
        let mut kernel = self.processor.lock();
        if !kernel.powered {
            return;
        }
        kernel.exit(self.tid);
        self.processor.baton.notify_all();
    }
}
