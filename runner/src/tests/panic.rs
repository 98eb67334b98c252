use std::panic;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use function_name::named;
use pretty_assertions::assert_eq;
use processor::{Outcome, Processor, SysError};
use scheduler::PRI_DEFAULT;

use super::{processor, run, scheduler};

#[test]
#[named]
pub fn main_exits_first() {
    let ticks = Arc::new(AtomicUsize::new(0));
    let counted = ticks.clone();

    let report = Processor::run(scheduler(), processor(), move |main| {
        main.spawn("spinner", PRI_DEFAULT, move |thread| {
            while thread.exec() {
                counted.fetch_add(1, Ordering::Relaxed);
            }
        })
        .unwrap();
        for _ in 0..20 {
            main.exec();
        }
    });

    assert_eq!(report.outcome, Outcome::Finished { abandoned: 1 });
    // Every counted tick is one the main thread did not get.
    assert!(ticks.load(Ordering::Relaxed) as u64 <= report.ticks - 20);
    assert_eq!(report.threads.len(), 1);

    run(
        module_path!().split("::").last().unwrap(),
        function_name!(),
        &report,
    );
}

#[test]
#[named]
pub fn blocked_threads_are_released() {
    let report = Processor::run(scheduler(), processor(), |main| {
        let never = main.sema_init(0);
        for _ in 0..3 {
            main.spawn("waiter", PRI_DEFAULT, move |thread| {
                thread.sema_down(never);
                thread.sleep(1_000);
            })
            .unwrap();
        }
        main.sleep(1);
    });

    assert_eq!(report.outcome, Outcome::Finished { abandoned: 3 });

    run(
        module_path!().split("::").last().unwrap(),
        function_name!(),
        &report,
    );
}

#[test]
#[named]
pub fn calls_after_power_off() {
    let report = Processor::run(scheduler(), processor(), |main| {
        let gate = main.sema_init(0);
        main.spawn("late", PRI_DEFAULT, move |thread| {
            thread.sema_down(gate);
            // Runs after main has returned.
            assert!(!thread.exec());
            assert_eq!(
                thread.spawn("never", PRI_DEFAULT, |_| {}).err(),
                Some(SysError::PoweredOff)
            );
            assert_eq!(thread.set_priority(0), Err(SysError::PoweredOff));
        })
        .unwrap();
        main.sleep(2);
    });

    assert_eq!(report.outcome, Outcome::Finished { abandoned: 1 });

    run(
        module_path!().split("::").last().unwrap(),
        function_name!(),
        &report,
    );
}

#[test]
#[should_panic(expected = "boom")]
pub fn thread_panic_is_resumed() {
    Processor::run(scheduler(), processor(), |main| {
        main.spawn("faulty", PRI_DEFAULT, |thread| {
            thread.exec();
            panic!("boom");
        })
        .unwrap();
        main.sleep(10);
        assert!(!main.exec());
    });
}

#[test]
pub fn main_panic_stops_the_children() {
    let result = panic::catch_unwind(|| {
        Processor::run(scheduler(), processor(), |main| {
            main.spawn("spinner", PRI_DEFAULT, |thread| while thread.exec() {})
                .unwrap();
            main.exec();
            main.exec();
            panic!("main gave up");
        })
    });

    let payload = result.unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"main gave up"));
}
