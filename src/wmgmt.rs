use std::{
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
};

use anyhow::{Error, anyhow};
use lockwarden_core::WorkerHandle;

/// Spawn and join bookkeeping for supervised workers.
///
/// `WorkerManagement` owns the join handles of every worker it spawned and
/// hands out shared [`WorkerHandle`]s for observation, e.g. by a
/// [`Watchdog`][crate::watchdog::Watchdog]. The completion flag of each
/// worker is maintained here: it is derived from the worker closure's
/// return value, with a panicking closure recorded as a failure.
pub struct WorkerManagement {
    workers: HashMap<u32, WorkerEntry>,
}

struct WorkerEntry {
    handle: Arc<WorkerHandle>,
    join: JoinHandle<Result<(), Error>>,
}

impl WorkerManagement {
    /// Creates an empty management without any workers.
    pub fn new() -> Self {
        Self {
            workers: HashMap::new(),
        }
    }

    /// Spawns a new worker executing `work` in a dedicated thread.
    ///
    /// The worker is handed its own [`WorkerHandle`], which it passes on to
    /// [`OrderedLockSet::acquire_all`][lockwarden_core::OrderedLockSet::acquire_all]
    /// for every critical section it enters. When `work` returns, the
    /// handle's completion flag is set to
    /// [`Completed`][lockwarden_core::WorkerStatus::Completed] or
    /// [`Failed`][lockwarden_core::WorkerStatus::Failed] according to the
    /// result; a panic inside `work` is caught and recorded as a failure.
    ///
    /// Returns a shared clone of the worker's handle.
    pub fn spawn<F>(&mut self, label: &str, work: F) -> Arc<WorkerHandle>
    where
        F: FnOnce(&WorkerHandle) -> Result<(), Error> + Send + 'static,
    {
        let handle = Arc::new(WorkerHandle::new(label));
        let worker = handle.clone();

        let join = thread::spawn(move || {
            match panic::catch_unwind(AssertUnwindSafe(|| work(worker.as_ref()))) {
                Ok(Ok(())) => {
                    worker.mark_completed();
                    log::debug!("worker `{}` (id {}) completed", worker.label(), worker.id());
                    Ok(())
                }
                Ok(Err(error)) => {
                    worker.mark_failed();
                    log::warn!(
                        "worker `{}` (id {}) failed: {error}",
                        worker.label(),
                        worker.id()
                    );
                    Err(error)
                }
                Err(_) => {
                    worker.mark_failed();
                    log::warn!("worker `{}` (id {}) panicked", worker.label(), worker.id());
                    Err(anyhow!("worker `{}` panicked", worker.label()))
                }
            }
        });

        self.workers.insert(
            handle.id(),
            WorkerEntry {
                handle: handle.clone(),
                join,
            },
        );

        handle
    }

    /// Returns the number of managed workers.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Returns whether no workers have been spawned yet.
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Returns a snapshot of the handles of all managed workers.
    pub fn handles(&self) -> Vec<Arc<WorkerHandle>> {
        self.workers.values().map(|entry| entry.handle.clone()).collect()
    }

    /// Waits for every managed worker to terminate.
    ///
    /// Blocks until all worker threads have finished and returns one entry
    /// per worker: its handle and the result its closure produced. Workers
    /// whose thread died outside the guarded closure are reported as an
    /// error on their entry rather than aborting the join of the others.
    pub fn join_all(self) -> Vec<(Arc<WorkerHandle>, Result<(), Error>)> {
        let mut reports = Vec::with_capacity(self.workers.len());

        for (_, entry) in self.workers {
            let result = match entry.join.join() {
                Ok(result) => result,
                Err(_) => Err(anyhow!(
                    "worker thread `{}` terminated abnormally",
                    entry.handle.label()
                )),
            };

            reports.push((entry.handle, result));
        }

        reports
    }
}

impl Default for WorkerManagement {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use anyhow::bail;
    use lockwarden_core::WorkerStatus;

    use super::WorkerManagement;

    #[test]
    fn successful_work_is_marked_completed() {
        let mut management = WorkerManagement::new();
        let handle = management.spawn("succeeding", |_| Ok(()));

        let reports = management.join_all();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].1.is_ok());
        assert_eq!(handle.status(), WorkerStatus::Completed);
    }

    #[test]
    fn failing_work_is_marked_failed() {
        let mut management = WorkerManagement::new();
        let handle = management.spawn("failing", |_| bail!("nothing to do"));

        let reports = management.join_all();
        assert!(reports[0].1.is_err());
        assert_eq!(handle.status(), WorkerStatus::Failed);
    }

    #[test]
    fn panicking_work_is_marked_failed() {
        let mut management = WorkerManagement::new();
        let handle = management.spawn("panicking", |_| panic!("boom"));

        let reports = management.join_all();
        assert!(reports[0].1.is_err());
        assert_eq!(handle.status(), WorkerStatus::Failed);
    }

    #[test]
    fn handles_snapshot_covers_every_worker() {
        let mut management = WorkerManagement::new();
        let first = management.spawn("first", |_| Ok(()));
        let second = management.spawn("second", |_| Ok(()));

        let handles = management.handles();
        assert_eq!(handles.len(), 2);
        assert!(handles.iter().any(|handle| handle.id() == first.id()));
        assert!(handles.iter().any(|handle| handle.id() == second.id()));

        management.join_all();
    }
}
