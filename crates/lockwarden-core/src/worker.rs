use std::{
    sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering},
    time::{Duration, Instant},
};

static WORKER_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Generates a new, unique worker-id for this program run.
///
/// This function internally increments an [`AtomicU32`].
/// Therefore, with the current implementation there is no
/// way of reusing worker-ids.
pub fn next_available_worker_id() -> u32 {
    WORKER_COUNTER.fetch_add(1, Ordering::SeqCst)
}

const STATUS_RUNNING: u8 = 0;
const STATUS_COMPLETED: u8 = 1;
const STATUS_FAILED: u8 = 2;

/// The tri-state completion flag of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// The worker has been started and has not signalled completion yet.
    Running,

    /// The worker finished its unit of work successfully.
    Completed,

    /// The worker terminated without completing its unit of work.
    Failed,
}

/// Shared observation state of one concurrently-running worker.
///
/// A `WorkerHandle` carries everything the rest of the system needs to know
/// about a worker: its identity (used for reentrancy detection by
/// [`OrderedLockSet`][crate::OrderedLockSet]), its completion flag and its
/// cancellation-request flag. The handle is shared via
/// [`Arc`][std::sync::Arc]: the spawning side owns one clone, observers such
/// as a watchdog hold further clones.
///
/// Only the worker itself writes the completion flag. Observers read it and
/// may set the separate cancellation flag, which the worker observes
/// cooperatively at its next suspension point.
pub struct WorkerHandle {
    id: u32,
    label: String,
    status: AtomicU8,
    cancel_requested: AtomicBool,
    started: Instant,
}

impl WorkerHandle {
    /// Creates a handle for a worker that is considered running from now on.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: next_available_worker_id(),
            label: label.into(),
            status: AtomicU8::new(STATUS_RUNNING),
            cancel_requested: AtomicBool::new(false),
            started: Instant::now(),
        }
    }

    /// Returns the stable identifier of this worker.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Returns the diagnostic label of this worker.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the time elapsed since the worker was started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Returns the current completion flag of this worker.
    ///
    /// The flag is a single atomic cell, so a worker transitioning to
    /// [`Completed`][WorkerStatus::Completed] concurrently with this read is
    /// observed either entirely or not at all - there are no torn reads and
    /// no stale cached state.
    pub fn status(&self) -> WorkerStatus {
        match self.status.load(Ordering::SeqCst) {
            STATUS_RUNNING => WorkerStatus::Running,
            STATUS_COMPLETED => WorkerStatus::Completed,
            _ => WorkerStatus::Failed,
        }
    }

    /// Marks this worker as completed. To be called by the worker itself.
    pub fn mark_completed(&self) {
        self.status.store(STATUS_COMPLETED, Ordering::SeqCst);
    }

    /// Marks this worker as failed. To be called by the worker itself
    /// (or on its behalf by the spawning side, e.g. after a panic).
    pub fn mark_failed(&self) {
        self.status.store(STATUS_FAILED, Ordering::SeqCst);
    }

    /// Requests cooperative cancellation of this worker.
    ///
    /// The worker is not interrupted; it observes the request at its next
    /// suspension point (while blocked inside
    /// [`acquire_all`][crate::OrderedLockSet::acquire_all]) and unwinds its
    /// critical-section attempt from there.
    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    /// Returns whether cancellation has been requested for this worker.
    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }
}
