use function_name::named;
use pretty_assertions::assert_eq;
use processor::{Outcome, SysError};
use scheduler::{PriorityRange, SchedConfig, WeightTable};

use crate::experiments::{self, OVERHEAD_THREADS, PRIORITY_TABLE};

use super::{processor, run, scheduler};

#[test]
pub fn priority_table_shape() {
    for (index, priorities) in PRIORITY_TABLE.iter().enumerate() {
        assert_eq!(priorities.len(), 10 - index);
        assert!(priorities[1..].iter().all(|&priority| priority == -1));
    }
    assert_eq!(OVERHEAD_THREADS.len(), 11);
}

#[test]
#[named]
pub fn overhead_is_sampled() {
    for threads in [2, 10, 25] {
        let (overhead, report) = experiments::overhead(scheduler(), processor(), threads, 50);
        assert_eq!(report.outcome, Outcome::Finished { abandoned: 0 });
        assert!(overhead.samples >= 50);
        assert!(overhead.total_ns >= overhead.last_ns);
        assert!(report.overhead.samples >= overhead.samples);

        run(
            module_path!().split("::").last().unwrap(),
            &format!("{}_{threads}", function_name!()),
            &report,
        );
    }
}

#[test]
#[named]
pub fn demo_runs_to_completion() {
    let report = experiments::demo(scheduler(), processor()).unwrap();
    assert_eq!(report.outcome, Outcome::Finished { abandoned: 0 });
    assert!(report.idle_ticks > 0);

    run(
        module_path!().split("::").last().unwrap(),
        function_name!(),
        &report,
    );
}

#[test]
pub fn demo_reports_rejected_priorities() {
    let range = PriorityRange::new(0, 0, 0).unwrap();
    let weights = WeightTable::from_weights(range, &[1024]).unwrap();
    let scheduler = scheduler::wfq_with_weights(SchedConfig::default(), weights).unwrap();

    let result = experiments::demo(scheduler, processor());
    assert_eq!(result.err(), Some(SysError::InvalidPriority(-3)));
}
