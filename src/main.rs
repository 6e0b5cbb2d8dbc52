use std::{sync::Arc, thread, time::Duration};

use anyhow::Error;
use clap::{Parser, ValueEnum};
use log::LevelFilter;
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
};

use lockwarden::{
    EscalationPolicy, OrderedLockSet, Resource, WorkerHandle, run_supervised,
};

#[derive(Parser)]
struct Cli {
    /// Acquire the two resources in opposite orders with nested single
    /// acquisitions, bypassing the ordered discipline, to provoke the
    /// classic lock-ordering deadlock
    #[arg(long)]
    provoke_deadlock: bool,

    /// Watchdog deadline in milliseconds
    #[arg(long, default_value_t = 3000)]
    deadline_ms: u64,

    /// How long each task pretends to work inside its critical section,
    /// in milliseconds
    #[arg(long, default_value_t = 100)]
    hold_ms: u64,

    /// Reaction when tasks are still running at the deadline
    #[arg(long, value_enum, default_value = "abort")]
    policy: PolicyArg,

    /// Log at debug level instead of info
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    /// Name the stuck tasks in the log, nothing else
    LogOnly,

    /// Abort the whole process
    Abort,

    /// Request cooperative cancellation of the stuck tasks
    Cancel,
}

impl From<PolicyArg> for EscalationPolicy {
    fn from(policy: PolicyArg) -> Self {
        match policy {
            PolicyArg::LogOnly => EscalationPolicy::LogOnly,
            PolicyArg::Abort => EscalationPolicy::AbortProcess,
            PolicyArg::Cancel => EscalationPolicy::CancelWorkers,
        }
    }
}

type Task = Box<dyn FnOnce(&WorkerHandle) -> Result<(), Error> + Send>;

fn main() -> Result<(), Error> {
    let args = Cli::parse();
    init_logging(if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    })?;

    let first = Arc::new(Resource::new("first"));
    let second = Arc::new(Resource::new("second"));
    let hold = Duration::from_millis(args.hold_ms);

    let tasks: Vec<(String, Task)> = if args.provoke_deadlock {
        log::info!("running both tasks with opposite acquisition orders");
        vec![
            (
                String::from("task-1"),
                opposed_task(first.clone(), second.clone(), hold),
            ),
            (
                String::from("task-2"),
                opposed_task(second.clone(), first.clone(), hold),
            ),
        ]
    } else {
        log::info!("running both tasks through the ordered lock set");
        vec![
            (
                String::from("task-1"),
                ordered_task(first.clone(), second.clone(), hold),
            ),
            (
                String::from("task-2"),
                ordered_task(second.clone(), first.clone(), hold),
            ),
        ]
    };

    let report = run_supervised(
        tasks,
        Duration::from_millis(args.deadline_ms),
        args.policy.into(),
    )?;

    for (worker, result) in &report.workers {
        match result {
            Ok(()) => log::info!("{} finished", worker.label()),
            Err(error) => log::warn!("{} did not finish: {error}", worker.label()),
        }
    }

    if report.all_completed() {
        println!("Program completed without deadlock");
        Ok(())
    } else {
        anyhow::bail!(
            "{} of {} tasks did not complete",
            report.failures().len(),
            report.workers.len()
        )
    }
}

/// A task that takes both resources through the ordered primitive: safe in
/// combination with any other ordered task, no matter how the resources
/// are listed.
fn ordered_task(one: Arc<Resource>, other: Arc<Resource>, hold: Duration) -> Task {
    Box::new(move |worker| {
        let guard = OrderedLockSet::new().acquire_all(worker, [one, other])?;
        thread::sleep(hold);
        guard.release();
        log::debug!("{} left its critical section", worker.label());
        Ok(())
    })
}

/// A task that locks `outer` first, then separately `inner` - the original
/// broken interleaving. Two of these with mirrored arguments deadlock as
/// soon as both hold their first resource.
fn opposed_task(outer: Arc<Resource>, inner: Arc<Resource>, hold: Duration) -> Task {
    Box::new(move |worker| {
        let set = OrderedLockSet::new();
        let outer_guard = set.acquire_all(worker, [outer])?;
        // Let the other task lock its first resource.
        thread::sleep(hold);
        let inner_guard = set.acquire_all(worker, [inner])?;
        thread::sleep(hold);
        inner_guard.release();
        outer_guard.release();
        Ok(())
    })
}

fn init_logging(level: LevelFilter) -> Result<(), Error> {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%H:%M:%S%.3f)} {h({l})} {t} - {m}{n}",
        )))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(level))?;

    log4rs::init_config(config)?;

    Ok(())
}
