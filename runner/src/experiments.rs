//! The weight and overhead experiments.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::info;
use processor::{Outcome, Processor, ProcessorConfig, Report, SysError};
use scheduler::{Overhead, Scheduler, Tid};

/// Thread priorities per fairness level. The first thread of each level is
/// expected to get 1, 2, 3, 4 and 5 times the share of the others.
pub const PRIORITY_TABLE: [&[i8]; 5] = [
    &[-1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    &[-4, -1, -1, -1, -1, -1, -1, -1, -1],
    &[-6, -1, -1, -1, -1, -1, -1, -1],
    &[-7, -1, -1, -1, -1, -1, -1],
    &[-8, -1, -1, -1, -1, -1],
];

/// Fairness levels of the weight experiment.
pub const FAIRNESS: [usize; 5] = [10, 20, 30, 40, 50];

/// Thread counts of the overhead experiment.
pub const OVERHEAD_THREADS: [usize; 11] = [2, 5, 10, 25, 50, 75, 100, 250, 500, 750, 1000];

/// Processor time a thread received during the measuring window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Share {
    pub tid: Tid,
    pub priority: i8,
    pub weight: u64,
    pub runtime: u64,
}

/// Runs the threads of one fairness level side by side for `window` ticks.
///
/// The threads first sleep until a common wake-up tick, so they all start
/// competing at the same time. `main` keeps the most favoured priority to
/// take its measurements on time.
pub fn weight<S: Scheduler + 'static>(
    scheduler: S,
    config: ProcessorConfig,
    fairness: usize,
    window: u64,
) -> (Vec<Share>, Report) {
    let priorities = PRIORITY_TABLE[fairness / 10 - 1];
    let mut shares = vec![];

    let report = Processor::run(scheduler, config, |main| {
        main.set_priority(main.priorities().min)
            .unwrap_or_else(|err| panic!("cannot favour the main thread: {err}"));

        let done = main.sema_init(0);
        let terminate = Arc::new(AtomicBool::new(false));
        let wake = main.ticks() + config.timer_freq();

        let mut workers = vec![];
        for &priority in priorities {
            let terminate = terminate.clone();
            let tid = main
                .spawn(&format!("priority {priority}"), priority, move |thread| {
                    thread.sleep(wake.saturating_sub(thread.ticks()));
                    while !terminate.load(Ordering::Relaxed) && thread.exec() {}
                    thread.sema_up(done);
                })
                .unwrap_or_else(|err| panic!("cannot spawn a worker: {err}"));
            workers.push((tid, priority));
        }

        main.sleep(wake.saturating_sub(main.ticks()));
        let start: Vec<u64> = workers
            .iter()
            .map(|&(tid, _)| main.runtime_of(tid).unwrap_or(0))
            .collect();
        main.sleep(window);

        for (&(tid, priority), start) in workers.iter().zip(start) {
            let stats = main.stats_of(tid);
            shares.push(Share {
                tid,
                priority,
                weight: stats.map_or(0, |stats| stats.weight),
                runtime: stats.map_or(0, |stats| stats.runtime).saturating_sub(start),
            });
        }

        terminate.store(true, Ordering::Relaxed);
        for _ in &workers {
            main.sema_down(done);
        }
    });

    (shares, report)
}

/// Keeps `threads` default-priority threads busy until at least `samples`
/// dispatch decisions have been timed.
pub fn overhead<S: Scheduler + 'static>(
    scheduler: S,
    config: ProcessorConfig,
    threads: usize,
    samples: u64,
) -> (Overhead, Report) {
    let mut overhead = Overhead::default();

    let report = Processor::run(scheduler, config, |main| {
        let priority = main.priorities().default;
        let done = main.sema_init(0);
        let terminate = Arc::new(AtomicBool::new(false));

        for _ in 0..threads {
            let terminate = terminate.clone();
            main.spawn("worker", priority, move |thread| {
                while !terminate.load(Ordering::Relaxed) && thread.exec() {}
                thread.sema_up(done);
            })
            .unwrap_or_else(|err| panic!("cannot spawn a worker: {err}"));
        }

        main.reset_overhead();
        while main.overhead().samples < samples && main.exec() {}
        overhead = main.overhead();

        terminate.store(true, Ordering::Relaxed);
        for _ in 0..threads {
            main.sema_down(done);
        }
    });

    if report.outcome != (Outcome::Finished { abandoned: 0 }) {
        info!("overhead run with {threads} threads ended with {:?}", report.outcome);
    }
    (overhead, report)
}

/// A short scenario with a sleeper woken through a semaphore and a
/// lighter worker.
///
/// Fails when the scheduler does not accept the priorities of the two
/// threads.
pub fn demo<S: Scheduler + 'static>(
    scheduler: S,
    config: ProcessorConfig,
) -> Result<Report, SysError> {
    let mut failure = None;

    let report = Processor::run(scheduler, config, |main| {
        let default = main.priorities().default;
        let signal = main.sema_init(0);
        for _ in 0..4 {
            main.exec();
        }

        let spawned = main
            .spawn("sleeper", default.saturating_sub(3), move |thread| {
                thread.exec();
                thread.exec();
                thread.sema_down(signal);
                thread.exec();
            })
            .and_then(|_| {
                main.spawn("worker", default.saturating_add(3), |thread| {
                    for _ in 0..6 {
                        thread.exec();
                    }
                })
            });
        if let Err(err) = spawned {
            failure = Some(err);
            return;
        }

        main.sleep(10);
        main.sema_up(signal);
        main.exec();
        main.sleep(10);
    });

    match failure {
        Some(err) => Err(err),
        None => Ok(report),
    }
}
