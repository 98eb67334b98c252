use function_name::named;
use processor::{Outcome, Processor};
use scheduler::PRI_DEFAULT;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{processor, run, scheduler, tick};

#[test]
#[named]
pub fn woken_thread_does_not_monopolize() {
    let report = Processor::run(scheduler(), processor(), |main| {
        main.set_priority(main.priorities().min).unwrap();
        let done = main.sema_init(0);
        let terminate = Arc::new(AtomicBool::new(false));
        let wake = 500;

        let mut workers = vec![];
        for name in ["busy", "busy", "sleeper"] {
            let terminate = terminate.clone();
            let tid = main
                .spawn(name, PRI_DEFAULT, move |thread| {
                    if name == "sleeper" {
                        thread.sleep(wake - thread.ticks());
                    }
                    while !terminate.load(Ordering::Relaxed) && thread.exec() {}
                    thread.sema_up(done);
                })
                .unwrap();
            workers.push(tid);
        }

        main.sleep(wake);
        let start: Vec<u64> = workers
            .iter()
            .map(|&tid| main.runtime_of(tid).unwrap())
            .collect();
        assert_eq!(start[2], 0);
        assert!(start[0] + start[1] >= 495 * tick());

        main.sleep(60);
        let burst: Vec<u64> = workers
            .iter()
            .zip(&start)
            .map(|(&tid, start)| (main.runtime_of(tid).unwrap() - start) / tick())
            .collect();
        let total: u64 = burst.iter().sum();
        assert!((60..=63).contains(&total), "window of {total} ticks");
        // Without the vruntime floor the sleeper would take the whole window.
        assert!(
            (14..=26).contains(&burst[2]),
            "the sleeper ran {} of {total} ticks",
            burst[2]
        );

        terminate.store(true, Ordering::Relaxed);
        for _ in &workers {
            main.sema_down(done);
        }
    });

    assert_eq!(report.outcome, Outcome::Finished { abandoned: 0 });

    run(
        module_path!().split("::").last().unwrap(),
        function_name!(),
        &report,
    );
}
