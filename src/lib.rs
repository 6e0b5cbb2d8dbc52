use std::{sync::Arc, time::Duration};

use anyhow::Error;

/// Liveness supervision of running workers.
pub mod watchdog;

/// Spawn and join bookkeeping for supervised workers.
pub mod wmgmt;

pub use lockwarden_core::{
    AcquireError, AcquisitionRequest, LockSetGuard, OrderedLockSet, Resource, WorkerHandle,
    WorkerStatus,
};
pub use watchdog::{EscalationPolicy, Watchdog, WatchdogHandle, WatchdogOutcome};
pub use wmgmt::WorkerManagement;

/// The combined result of a supervised run.
pub struct SupervisionReport {
    /// One entry per worker: its handle and the result its closure produced
    pub workers: Vec<(Arc<WorkerHandle>, Result<(), Error>)>,

    /// What the watchdog observed
    pub outcome: WatchdogOutcome,
}

impl SupervisionReport {
    /// Returns whether every worker completed its unit of work.
    pub fn all_completed(&self) -> bool {
        self.workers
            .iter()
            .all(|(worker, _)| worker.status() == WorkerStatus::Completed)
    }

    /// Returns the handles of all workers that did not complete.
    pub fn failures(&self) -> Vec<&Arc<WorkerHandle>> {
        self.workers
            .iter()
            .filter(|(worker, _)| worker.status() != WorkerStatus::Completed)
            .map(|(worker, _)| worker)
            .collect()
    }
}

/// Runs a set of labelled workers to completion under watchdog supervision.
///
/// It serves as a shortcut for: spawn every task through a
/// [`WorkerManagement`], start a [`Watchdog`] with the given `deadline` and
/// `policy` over the spawned workers, join all workers and finally collect
/// the watchdog's outcome. The watchdog timer is stopped early once every
/// worker has terminated.
///
/// **Note:** under [`EscalationPolicy::LogOnly`] genuinely stuck workers
/// stay stuck - this function then blocks until they terminate by other
/// means, exactly like the underlying [`WorkerManagement::join_all`].
///
/// # Errors
///
/// This function may fail if the watchdog thread panicked or its internal
/// gate was poisoned. Failures of individual workers do not fail the run;
/// they are reported per worker in the returned [`SupervisionReport`].
///
/// # Examples
/// ```
/// # use std::{sync::Arc, time::Duration};
/// # use anyhow::Error;
/// # fn main() -> Result<(), Error> {
/// use lockwarden::{EscalationPolicy, OrderedLockSet, Resource, WorkerHandle, run_supervised};
///
/// let first = Arc::new(Resource::new("first"));
/// let second = Arc::new(Resource::new("second"));
///
/// let order = [first.clone(), second.clone()];
/// let report = run_supervised(
///     vec![(String::from("task"), move |worker: &WorkerHandle| {
///         let guard = OrderedLockSet::new().acquire_all(worker, order)?;
///         // work happens inside the critical section
///         guard.release();
///         Ok(())
///     })],
///     Duration::from_secs(3),
///     EscalationPolicy::CancelWorkers,
/// )?;
///
/// assert!(report.all_completed());
/// # Ok(())
/// # }
/// ```
pub fn run_supervised<F>(
    tasks: Vec<(String, F)>,
    deadline: Duration,
    policy: EscalationPolicy,
) -> Result<SupervisionReport, Error>
where
    F: FnOnce(&WorkerHandle) -> Result<(), Error> + Send + 'static,
{
    let mut management = WorkerManagement::new();
    for (label, work) in tasks {
        management.spawn(&label, work);
    }

    let watchdog = Watchdog::new(deadline, policy);
    let handle = watchdog.watch(management.handles());

    let workers = management.join_all();

    // Every worker has terminated; a still-pending timer has nothing left
    // to observe.
    handle.cancel()?;
    let outcome = handle.join()?;

    Ok(SupervisionReport { workers, outcome })
}
