use std::env;
use std::fs;

use processor::{format_logs, ProcessorConfig, Report};
use scheduler::{SchedConfig, Wfq};

mod deadlock;
mod experiments;
mod panic;
mod wait_and_signal;
mod wakeup;
mod workers;

static SCHEDULER: &str = "wfq";

fn write_logs(folder: &str, name: &str, logs: &str) {
    let (timer_freq, slack_ticks) = arguments();
    fs::create_dir_all(format!("../outputs/{SCHEDULER}/{folder}")).unwrap();
    fs::write(
        format!("../outputs/{SCHEDULER}/{folder}/{name}___{timer_freq}_{slack_ticks}.log"),
        logs,
    )
    .unwrap();
}

/// Dumps the logs of a run when `WRITE_OUTPUT` is set.
fn run(folder: &str, name: &str, report: &Report) {
    if env::var("WRITE_OUTPUT").is_ok() {
        write_logs(folder, name, &format_logs(&report.logs));
    }
}

fn arguments() -> (u64, u64) {
    let timer_freq = env::var("TIMER_FREQ")
        .unwrap_or("100".to_string())
        .parse::<u64>()
        .unwrap();
    let slack_ticks = env::var("SLACK_TICKS")
        .unwrap_or("1".to_string())
        .parse::<u64>()
        .unwrap();
    (timer_freq, slack_ticks)
}

fn processor() -> ProcessorConfig {
    let (timer_freq, _) = arguments();
    ProcessorConfig::new(timer_freq)
        .unwrap()
        .with_snapshots(env::var("WRITE_OUTPUT").is_ok())
}

fn scheduler() -> Wfq {
    let (_, slack_ticks) = arguments();
    let config = SchedConfig::default()
        .with_slack(slack_ticks * processor().tick_ns())
        .with_invariant_checks(true);
    scheduler::wfq(config).unwrap()
}

/// Length of one tick in nanoseconds.
fn tick() -> u64 {
    processor().tick_ns()
}
