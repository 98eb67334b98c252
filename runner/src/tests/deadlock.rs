use function_name::named;
use pretty_assertions::assert_eq;
use processor::{Event, Outcome, Processor};
use scheduler::PRI_DEFAULT;

use super::{processor, run, scheduler};

#[test]
#[named]
pub fn main_waits_forever() {
    let report = Processor::run(scheduler(), processor(), |main| {
        let never = main.sema_init(0);
        main.exec();
        main.sema_down(never);
        // Powered off: nothing blocks or ticks any more.
        assert!(!main.exec());
        main.sema_down(never);
    });

    assert_eq!(report.outcome, Outcome::Deadlock);
    assert_eq!(report.ticks, 1);
    assert!(report.logs.iter().any(|log| log.event == Event::Deadlock));

    run(
        module_path!().split("::").last().unwrap(),
        function_name!(),
        &report,
    );
}

#[test]
#[named]
pub fn circular_wait() {
    let report = Processor::run(scheduler(), processor(), |main| {
        let first = main.sema_init(0);
        let second = main.sema_init(0);
        let done = main.sema_init(0);

        main.spawn("first", PRI_DEFAULT, move |thread| {
            thread.exec();
            thread.sema_down(first);
            thread.sema_up(second);
            thread.sema_up(done);
        })
        .unwrap();
        main.spawn("second", PRI_DEFAULT, move |thread| {
            thread.exec();
            thread.sema_down(second);
            thread.sema_up(first);
            thread.sema_up(done);
        })
        .unwrap();

        main.sema_down(done);
    });

    assert_eq!(report.outcome, Outcome::Deadlock);
    assert_eq!(report.threads.len(), 3);

    run(
        module_path!().split("::").last().unwrap(),
        function_name!(),
        &report,
    );
}

#[test]
#[named]
pub fn sleeper_is_not_a_deadlock() {
    let report = Processor::run(scheduler(), processor(), |main| {
        let wake = main.sema_init(0);
        main.spawn("waiter", PRI_DEFAULT, move |thread| {
            thread.sema_down(wake);
            thread.exec();
        })
        .unwrap();

        // The waiter blocks while main sleeps; the timer still has work.
        main.sleep(100);
        main.sema_up(wake);
        main.sleep(10);
    });

    assert_eq!(report.outcome, Outcome::Finished { abandoned: 0 });
    assert_eq!(report.ticks, 110);

    run(
        module_path!().split("::").last().unwrap(),
        function_name!(),
        &report,
    );
}
