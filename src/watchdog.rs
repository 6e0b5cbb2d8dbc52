use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{Error, bail};
use lockwarden_core::{DeadlineGate, WorkerHandle, WorkerStatus};

/// The configured reaction when workers are still running at the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationPolicy {
    /// Emit a diagnostic naming the outstanding workers; take no corrective
    /// action. The workers remain stuck - this mode is for observability
    /// only.
    LogOnly,

    /// Terminate the entire process immediately via
    /// [`std::process::abort`], bypassing unwinding and cleanup.
    /// Appropriate only when the stuck state is unrecoverable and safety
    /// requires stopping now.
    AbortProcess,

    /// Request cooperative cancellation of every still-running worker and
    /// keep the process alive. Relies on the workers observing the request
    /// at their next suspension point, e.g. while blocked inside
    /// [`acquire_all`][lockwarden_core::OrderedLockSet::acquire_all].
    CancelWorkers,
}

/// What a watchdog observed by the time it finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogOutcome {
    /// Every monitored worker had left the running state at the deadline.
    AllCompleted,

    /// At least one worker was still running at the deadline; the
    /// escalation policy has been executed. Carries the ids of the
    /// outstanding workers.
    Escalated {
        /// Ids of the workers that were still running at the deadline
        outstanding: Vec<u32>,
    },

    /// The watchdog was cancelled before its deadline expired and
    /// performed no check.
    CancelledEarly,
}

/// Bounds the time a set of workers may run before the system concludes
/// they are stuck and escalates.
///
/// A `Watchdog` owns a deadline and an [`EscalationPolicy`].
/// [`watch`][Watchdog::watch] starts a dedicated timer thread which parks
/// until the deadline and then inspects the completion flag of every
/// monitored worker. The flags are single atomic cells written by the
/// workers themselves, so a worker completing concurrently with the check
/// is observed race-free: the watchdog neither reports a false stuck-state
/// for a worker that completed at essentially the same instant nor misses
/// a genuinely stuck worker due to a stale read.
pub struct Watchdog {
    deadline: Duration,
    policy: EscalationPolicy,
}

impl Watchdog {
    /// Creates a watchdog with the given deadline and escalation policy.
    pub fn new(deadline: Duration, policy: EscalationPolicy) -> Self {
        Self { deadline, policy }
    }

    /// Starts monitoring the given workers. Does not block the caller.
    ///
    /// The returned [`WatchdogHandle`] can stop the watchdog early or wait
    /// for its [`WatchdogOutcome`]. Exactly one timer thread is started
    /// per call; each call monitors its own set of workers.
    pub fn watch(&self, workers: Vec<Arc<WorkerHandle>>) -> WatchdogHandle {
        let gate = Arc::new(DeadlineGate::new());

        let timer_gate = gate.clone();
        let deadline = self.deadline;
        let policy = self.policy;

        let timer = thread::spawn(move || -> Result<WatchdogOutcome, Error> {
            if timer_gate.wait_until_open_or(deadline)? {
                return Ok(WatchdogOutcome::CancelledEarly);
            }

            let outstanding: Vec<Arc<WorkerHandle>> = workers
                .iter()
                .filter(|worker| worker.status() == WorkerStatus::Running)
                .cloned()
                .collect();

            if outstanding.is_empty() {
                log::debug!(
                    "all {} monitored workers finished within {:?}",
                    workers.len(),
                    deadline
                );
                return Ok(WatchdogOutcome::AllCompleted);
            }

            for worker in &outstanding {
                log::warn!(
                    "worker `{}` (id {}) still running {:?} after start, deadline was {:?}",
                    worker.label(),
                    worker.id(),
                    worker.elapsed(),
                    deadline
                );
            }

            match policy {
                EscalationPolicy::LogOnly => {}
                EscalationPolicy::AbortProcess => {
                    log::error!(
                        "{} of {} workers made no progress within {:?}, aborting process",
                        outstanding.len(),
                        workers.len(),
                        deadline
                    );
                    std::process::abort();
                }
                EscalationPolicy::CancelWorkers => {
                    for worker in &outstanding {
                        worker.request_cancel();
                    }
                    log::warn!(
                        "requested cancellation of {} stuck workers",
                        outstanding.len()
                    );
                }
            }

            Ok(WatchdogOutcome::Escalated {
                outstanding: outstanding.iter().map(|worker| worker.id()).collect(),
            })
        });

        WatchdogHandle { gate, timer }
    }
}

/// A handle to a running watchdog timer.
pub struct WatchdogHandle {
    gate: Arc<DeadlineGate>,
    timer: JoinHandle<Result<WatchdogOutcome, Error>>,
}

impl WatchdogHandle {
    /// Stops the watchdog early, e.g. because the caller already knows all
    /// workers finished.
    ///
    /// Idempotent: cancelling an already-cancelled or already-finished
    /// watchdog has no further effect.
    ///
    /// # Errors
    ///
    /// This function may fail if the internal gate of the watchdog was
    /// poisoned.
    pub fn cancel(&self) -> Result<(), Error> {
        self.gate.open()
    }

    /// Waits for the watchdog timer to finish and returns what it observed.
    ///
    /// # Errors
    ///
    /// This function may fail if the watchdog thread panicked or its
    /// internal gate was poisoned.
    pub fn join(self) -> Result<WatchdogOutcome, Error> {
        match self.timer.join() {
            Ok(outcome) => outcome,
            Err(_) => bail!("Watchdog thread panicked!"),
        }
    }
}
