use std::sync::{Arc, Mutex};

use function_name::named;
use pretty_assertions::assert_eq;
use processor::{BlockReason, Event, Outcome, Processor};
use scheduler::PRI_DEFAULT;

use super::{processor, run, scheduler};

#[test]
#[named]
pub fn ping_pong() {
    let order = Arc::new(Mutex::new(vec![]));
    let shared = order.clone();

    let report = Processor::run(scheduler(), processor(), move |main| {
        let ping = main.sema_init(0);
        let pong = main.sema_init(0);
        let done = main.sema_init(0);

        for (name, wait, signal) in [("ping", ping, pong), ("pong", pong, ping)] {
            let order = shared.clone();
            main.spawn(name, PRI_DEFAULT, move |thread| {
                for _ in 0..3 {
                    thread.sema_down(wait);
                    order.lock().unwrap().push(name);
                    thread.exec();
                    thread.sema_up(signal);
                }
                thread.sema_up(done);
            })
            .unwrap();
        }

        main.sema_up(ping);
        main.sema_down(done);
        main.sema_down(done);
    });

    assert_eq!(
        *order.lock().unwrap(),
        vec!["ping", "pong", "ping", "pong", "ping", "pong"]
    );
    assert_eq!(report.outcome, Outcome::Finished { abandoned: 0 });
    assert_eq!(report.ticks, 6);

    run(
        module_path!().split("::").last().unwrap(),
        function_name!(),
        &report,
    );
}

#[test]
#[named]
pub fn waiters_wake_in_order() {
    let order = Arc::new(Mutex::new(vec![]));
    let shared = order.clone();

    let report = Processor::run(scheduler(), processor(), move |main| {
        let gate = main.sema_init(0);
        for index in 0..4 {
            let order = shared.clone();
            main.spawn(&format!("waiter {index}"), PRI_DEFAULT, move |thread| {
                thread.sema_down(gate);
                order.lock().unwrap().push(thread.tid.get());
            })
            .unwrap();
        }

        main.sleep(1);
        for _ in 0..4 {
            main.sema_up(gate);
        }
        main.sleep(1);
    });

    assert_eq!(*order.lock().unwrap(), vec![2, 3, 4, 5]);
    let blocked = report
        .logs
        .iter()
        .filter(|log| {
            matches!(
                log.event,
                Event::Block {
                    reason: BlockReason::Semaphore(_),
                    ..
                }
            )
        })
        .count();
    assert_eq!(blocked, 4);

    run(
        module_path!().split("::").last().unwrap(),
        function_name!(),
        &report,
    );
}

#[test]
#[named]
pub fn initial_units() {
    let report = Processor::run(scheduler(), processor(), |main| {
        let units = main.sema_init(2);
        main.sema_down(units);
        main.sema_down(units);
        main.sema_up(units);
        main.sema_down(units);
        main.exec();
    });

    assert_eq!(report.outcome, Outcome::Finished { abandoned: 0 });
    assert!(!report
        .logs
        .iter()
        .any(|log| matches!(log.event, Event::Block { .. })));

    run(
        module_path!().split("::").last().unwrap(),
        function_name!(),
        &report,
    );
}
