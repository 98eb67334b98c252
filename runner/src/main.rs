use std::error::Error;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use env_logger::Env;
use log::error;

use processor::{format_logs, ProcessorConfig};
use scheduler::{wfq, SchedConfig, Wfq, WeightCurve};

mod experiments;

#[derive(Debug, Parser)]
#[command(version, about = "Weighted fair scheduling on a simulated processor")]
struct Cli {
    #[command(flatten)]
    machine: MachineArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct MachineArgs {
    #[arg(long, global = true, default_value_t = 100, help = "Timer interrupts per second")]
    timer_freq: u64,
    #[arg(
        long,
        global = true,
        default_value_t = 1,
        help = "How many ticks a thread may run ahead of the leftmost one"
    )]
    slack_ticks: u64,
    #[arg(long, global = true, value_enum, default_value_t = Curve::Geometric)]
    curve: Curve,
    #[arg(long, global = true, help = "Validate the run queue after every change")]
    check: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Curve {
    /// 25% more weight per priority step
    Geometric,
    /// 50 more weight per priority step
    Linear,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Measure the processor share of threads with different weights")]
    Weight {
        #[arg(long, help = "Only run one fairness level (10, 20, 30, 40 or 50)")]
        fairness: Option<usize>,
        #[arg(long, default_value_t = 10, help = "Length of the measuring window")]
        seconds: u64,
        #[arg(long, default_value_t = 1)]
        iterations: usize,
    },
    #[command(about = "Measure the cost of dispatch decisions")]
    Overhead {
        #[arg(long, help = "Only run with this many threads")]
        threads: Option<usize>,
        #[arg(long, default_value_t = 200)]
        samples: u64,
    },
    #[command(about = "Run a short scenario and print its log")]
    Demo,
}

impl MachineArgs {
    fn processor(&self) -> Result<ProcessorConfig, Box<dyn Error>> {
        Ok(ProcessorConfig::new(self.timer_freq)?)
    }

    fn scheduler(&self) -> Result<Wfq, Box<dyn Error>> {
        let processor = self.processor()?;
        let curve = match self.curve {
            Curve::Geometric => WeightCurve::default(),
            Curve::Linear => WeightCurve::Linear {
                base: 1024,
                step: 50,
            },
        };
        let config = SchedConfig::default()
            .with_slack(self.slack_ticks * processor.tick_ns())
            .with_curve(curve)
            .with_invariant_checks(self.check);
        Ok(wfq(config)?)
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match &cli.command {
        Command::Weight {
            fairness,
            seconds,
            iterations,
        } => weight(&cli.machine, *fairness, *seconds, *iterations),
        Command::Overhead { threads, samples } => overhead(&cli.machine, *threads, *samples),
        Command::Demo => demo(&cli.machine),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn weight(
    machine: &MachineArgs,
    fairness: Option<usize>,
    seconds: u64,
    iterations: usize,
) -> Result<(), Box<dyn Error>> {
    let levels: Vec<usize> = match fairness {
        Some(level) if experiments::FAIRNESS.contains(&level) => vec![level],
        Some(level) => return Err(format!("unknown fairness level {level}").into()),
        None => experiments::FAIRNESS.to_vec(),
    };
    let config = machine.processor()?;

    for level in levels {
        println!("fairness {level}");
        for iteration in 0..iterations {
            let (shares, _) = experiments::weight(
                machine.scheduler()?,
                config,
                level,
                seconds * config.timer_freq(),
            );
            let total: u64 = shares.iter().map(|share| share.runtime).sum();
            print!("{iteration} ");
            for share in &shares {
                print!("{}\t", share.runtime / config.tick_ns());
            }
            println!();
            for share in &shares {
                println!(
                    "  {}\tpriority {}\tweight {}\t{:.1}%",
                    share.tid,
                    share.priority,
                    share.weight,
                    100.0 * share.runtime as f64 / total.max(1) as f64
                );
            }
        }
    }
    Ok(())
}

fn overhead(
    machine: &MachineArgs,
    threads: Option<usize>,
    samples: u64,
) -> Result<(), Box<dyn Error>> {
    let counts = match threads {
        Some(threads) => vec![threads],
        None => experiments::OVERHEAD_THREADS.to_vec(),
    };
    let config = machine.processor()?;

    println!("THREADS\tSAMPLES\tAVERAGE (ns)\tLAST (ns)");
    for threads in counts {
        let (overhead, _) = experiments::overhead(machine.scheduler()?, config, threads, samples);
        println!(
            "{threads}\t{}\t{}\t{}",
            overhead.samples,
            overhead.average_ns(),
            overhead.last_ns
        );
    }
    Ok(())
}

fn demo(machine: &MachineArgs) -> Result<(), Box<dyn Error>> {
    let config = machine.processor()?.with_snapshots(true);
    let report = experiments::demo(machine.scheduler()?, config)?;

    println!("{}", format_logs(&report.logs));
    println!(
        "{:?} after {} ticks ({} idle)",
        report.outcome, report.ticks, report.idle_ticks
    );
    Ok(())
}

// Do not delete this line
#[cfg(test)]
mod tests;
