use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use function_name::named;
use pretty_assertions::assert_eq;
use processor::{Outcome, Processor};
use scheduler::PRI_DEFAULT;

use crate::experiments::{self, Share};

use super::{processor, run, scheduler};

/// Checks every share against its weight, within 5%.
fn assert_proportional(shares: &[Share]) {
    let total_runtime: u64 = shares.iter().map(|share| share.runtime).sum();
    let total_weight: u64 = shares.iter().map(|share| share.weight).sum();
    for share in shares {
        let expected = share.weight as f64 / total_weight as f64;
        let measured = share.runtime as f64 / total_runtime as f64;
        assert!(
            (measured - expected).abs() / expected < 0.05,
            "thread {} at priority {}: {measured:.4} instead of {expected:.4}",
            share.tid,
            share.priority
        );
    }
}

fn fairness(folder: &str, name: &str, level: usize) -> Vec<Share> {
    let config = processor();
    let (shares, report) =
        experiments::weight(scheduler(), config, level, 20 * config.timer_freq());
    assert_eq!(report.outcome, Outcome::Finished { abandoned: 0 });
    assert_eq!(shares.len(), 11 - level / 10);
    assert_proportional(&shares);
    run(folder, name, &report);
    shares
}

#[test]
#[named]
pub fn equal_priorities() {
    let shares = fairness(module_path!().split("::").last().unwrap(), function_name!(), 10);
    assert!(shares.iter().all(|share| share.weight == shares[0].weight));
}

#[test]
#[named]
pub fn twice_the_weight() {
    let shares = fairness(module_path!().split("::").last().unwrap(), function_name!(), 20);
    let ratio = shares[0].runtime as f64 / shares[1].runtime as f64;
    assert!((1.8..2.2).contains(&ratio), "ratio {ratio}");
}

#[test]
#[named]
pub fn three_times_the_weight() {
    fairness(module_path!().split("::").last().unwrap(), function_name!(), 30);
}

#[test]
#[named]
pub fn four_times_the_weight() {
    fairness(module_path!().split("::").last().unwrap(), function_name!(), 40);
}

#[test]
#[named]
pub fn five_times_the_weight() {
    let shares = fairness(module_path!().split("::").last().unwrap(), function_name!(), 50);
    let ratio = shares[0].runtime as f64 / shares[1].runtime as f64;
    assert!((4.5..5.5).contains(&ratio), "ratio {ratio}");
}

#[test]
#[named]
pub fn two_tiers() {
    let mut totals = (0, 0);

    let report = Processor::run(scheduler(), processor(), |main| {
        main.set_priority(main.priorities().min).unwrap();
        let done = main.sema_init(0);
        let terminate = Arc::new(AtomicBool::new(false));

        let mut workers = vec![];
        for index in 0..100 {
            let priority = if index % 2 == 0 { -4 } else { PRI_DEFAULT };
            let terminate = terminate.clone();
            let tid = main
                .spawn(&format!("tier {priority}"), priority, move |thread| {
                    while !terminate.load(Ordering::Relaxed) && thread.exec() {}
                    thread.sema_up(done);
                })
                .unwrap();
            workers.push((tid, priority));
        }

        main.sleep(5_000);
        for &(tid, priority) in &workers {
            let runtime = main.runtime_of(tid).unwrap();
            if priority == PRI_DEFAULT {
                totals.1 += runtime;
            } else {
                totals.0 += runtime;
            }
        }

        terminate.store(true, Ordering::Relaxed);
        for _ in &workers {
            main.sema_down(done);
        }
    });

    // 1024 * 1.25^4 against 1024
    let expected = 2500.0 / 1024.0;
    let ratio = totals.0 as f64 / totals.1 as f64;
    assert!((ratio - expected).abs() / expected < 0.1, "ratio {ratio}");
    assert_eq!(report.outcome, Outcome::Finished { abandoned: 0 });

    run(
        module_path!().split("::").last().unwrap(),
        function_name!(),
        &report,
    );
}
