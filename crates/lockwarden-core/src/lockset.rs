use std::{marker::PhantomData, sync::Arc, time::Duration};

use crate::{error::AcquireError, resource::Resource, worker::WorkerHandle};

/// The set of resources a worker wants to hold simultaneously.
///
/// A request has set semantics: listing the same resource twice is rejected
/// by [`OrderedLockSet::acquire_all`] before anything is locked. The full
/// set has to be known up front - there is no incremental resource
/// discovery once acquisition has begun.
pub struct AcquisitionRequest {
    resources: Vec<Arc<Resource>>,
}

impl AcquisitionRequest {
    /// Creates a request for the given resources.
    pub fn new(resources: Vec<Arc<Resource>>) -> Self {
        Self { resources }
    }

    /// Returns the number of requested resources.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns whether the request is empty.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    fn into_resources(self) -> Vec<Arc<Resource>> {
        self.resources
    }
}

impl From<Vec<Arc<Resource>>> for AcquisitionRequest {
    fn from(resources: Vec<Arc<Resource>>) -> Self {
        Self::new(resources)
    }
}

impl<const N: usize> From<[Arc<Resource>; N]> for AcquisitionRequest {
    fn from(resources: [Arc<Resource>; N]) -> Self {
        Self::new(resources.into())
    }
}

impl FromIterator<Arc<Resource>> for AcquisitionRequest {
    fn from_iter<I: IntoIterator<Item = Arc<Resource>>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Deadlock-safe acquisition of multiple resources requested together.
///
/// `OrderedLockSet` imposes a total order on resources - ascending
/// [`Resource::id`] - and acquires every request strictly in that order,
/// one resource at a time, blocking on each. Because every caller uses the
/// same global order, no two workers can each hold a prefix of the other's
/// needed set while waiting on the other's next resource: circular wait is
/// impossible by construction, regardless of how the scheduler interleaves
/// the workers.
///
/// The alternative all-or-nothing strategy (try-lock everything, release
/// and back off if any attempt fails) satisfies the same contract but gives
/// up determinism; this implementation uses the ordered strategy.
///
/// While blocked on a resource, a worker re-checks its cancellation flag at
/// a bounded poll interval. That poll is the worker's only suspension
/// point: cancellation is cooperative and is never observed mid-hold.
pub struct OrderedLockSet {
    poll_interval: Duration,
}

impl OrderedLockSet {
    /// How often a blocked acquisition checks for cancellation by default.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

    /// Creates a lock set with the default cancellation poll interval.
    pub fn new() -> Self {
        Self::with_poll_interval(Self::DEFAULT_POLL_INTERVAL)
    }

    /// Creates a lock set that checks for cancellation every `poll_interval`
    /// while blocked on a contended resource.
    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// Acquires every resource in `request` on behalf of `worker`.
    ///
    /// Blocks until all requested resources are held and returns a
    /// [`LockSetGuard`] that releases them - in reverse acquisition order -
    /// when dropped. An empty request succeeds immediately with an
    /// already-satisfied guard.
    ///
    /// # Errors
    ///
    /// This function may fail in the following cases:
    /// - [`AcquireError::DuplicateResource`]: the request names the same
    ///   resource twice. Rejected before any resource is locked.
    /// - [`AcquireError::ReentrantAcquisition`]: `worker` already holds one
    ///   of the requested resources. Rejected before any resource is
    ///   locked; existing holdings are unaffected.
    /// - [`AcquireError::Cancelled`]: cancellation was requested for
    ///   `worker` while it was blocked. Everything acquired earlier in this
    ///   call has been released again before the error is returned.
    pub fn acquire_all(
        &self,
        worker: &WorkerHandle,
        request: impl Into<AcquisitionRequest>,
    ) -> Result<LockSetGuard, AcquireError> {
        let mut resources = request.into().into_resources();
        resources.sort_by_key(|resource| resource.id());

        // Both rejections happen before the first lock attempt, so a failed
        // call never mutates any state.
        for pair in resources.windows(2) {
            if pair[0].id() == pair[1].id() {
                return Err(AcquireError::DuplicateResource {
                    id: pair[0].id(),
                    label: pair[0].label().into(),
                });
            }
        }

        for resource in &resources {
            if resource.holder() == Some(worker.id()) {
                return Err(AcquireError::ReentrantAcquisition {
                    worker: worker.id(),
                    id: resource.id(),
                    label: resource.label().into(),
                });
            }
        }

        let mut guard = LockSetGuard {
            held: Vec::with_capacity(resources.len()),
            _not_send: PhantomData,
        };

        for resource in resources {
            loop {
                if worker.cancel_requested() {
                    log::debug!(
                        "worker {} cancelled while waiting for resource `{}`, rolling back {} partial holdings",
                        worker.id(),
                        resource.label(),
                        guard.len()
                    );

                    let error = AcquireError::Cancelled {
                        worker: worker.id(),
                        id: resource.id(),
                        label: resource.label().into(),
                    };

                    // Dropping the partially-filled guard releases everything
                    // acquired so far, in reverse acquisition order.
                    drop(guard);

                    return Err(error);
                }

                if resource.acquire_timed(worker.id(), self.poll_interval) {
                    break;
                }
            }

            guard.held.push(resource);
        }

        Ok(guard)
    }
}

impl Default for OrderedLockSet {
    fn default() -> Self {
        Self::new()
    }
}

/// A scope holding a set of acquired resources.
///
/// As long as the guard is live, the acquiring worker holds every resource
/// of its request. Dropping the guard - on any exit path, including early
/// failure - releases all of them in strictly reverse acquisition order.
///
/// The guard is deliberately not [`Send`]: the underlying raw mutexes must
/// be released by the thread that acquired them.
#[derive(Debug)]
pub struct LockSetGuard {
    held: Vec<Arc<Resource>>,
    _not_send: PhantomData<*const ()>,
}

impl LockSetGuard {
    /// Returns the number of resources held by this guard.
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// Returns whether this guard holds no resources.
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Returns whether this guard holds the given resource.
    pub fn holds(&self, resource: &Resource) -> bool {
        self.held.iter().any(|held| held.id() == resource.id())
    }

    /// Releases all held resources explicitly.
    ///
    /// Equivalent to dropping the guard; provided for call sites that want
    /// to make the end of the critical section visible.
    pub fn release(self) {}
}

impl Drop for LockSetGuard {
    fn drop(&mut self) {
        while let Some(resource) = self.held.pop() {
            // SAFETY: every resource in `held` was acquired through this
            // guard on the current thread (the guard is not Send) and has
            // not been released since.
            unsafe { resource.release() };
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, AtomicU32, Ordering},
            mpsc,
        },
        thread,
        time::Duration,
    };

    use rand_xoshiro::{
        Xoshiro256PlusPlus,
        rand_core::{RngCore, SeedableRng},
    };

    use crate::{
        error::AcquireError,
        resource::Resource,
        worker::WorkerHandle,
    };

    use super::{AcquisitionRequest, OrderedLockSet};

    fn resources(labels: &[&str]) -> Vec<Arc<Resource>> {
        labels.iter().map(|label| Arc::new(Resource::new(*label))).collect()
    }

    #[test]
    fn empty_request_returns_satisfied_guard() {
        let set = OrderedLockSet::new();
        let worker = WorkerHandle::new("empty");

        let guard = set
            .acquire_all(&worker, AcquisitionRequest::new(Vec::new()))
            .unwrap();
        assert!(guard.is_empty());
        assert_eq!(guard.len(), 0);
    }

    #[test]
    fn full_set_is_held_until_release() {
        let set = OrderedLockSet::new();
        let worker = WorkerHandle::new("holder");
        let rs = resources(&["a", "b", "c"]);

        let guard = set
            .acquire_all(&worker, [rs[2].clone(), rs[0].clone(), rs[1].clone()])
            .unwrap();

        // Once acquire_all returns, the worker holds the full set.
        assert_eq!(guard.len(), 3);
        for resource in &rs {
            assert!(guard.holds(resource));
            assert_eq!(resource.holder(), Some(worker.id()));
        }

        guard.release();
        for resource in &rs {
            assert!(!resource.is_held());
        }
    }

    #[test]
    fn duplicate_resource_is_rejected_before_acquisition() {
        let set = OrderedLockSet::new();
        let worker = WorkerHandle::new("duplicate");
        let rs = resources(&["a", "b"]);

        let error = set
            .acquire_all(
                &worker,
                [rs[0].clone(), rs[1].clone(), rs[0].clone()],
            )
            .unwrap_err();

        assert_eq!(
            error,
            AcquireError::DuplicateResource {
                id: rs[0].id(),
                label: "a".into(),
            }
        );

        // Fail fast means no partial state.
        assert!(!rs[0].is_held());
        assert!(!rs[1].is_held());
    }

    #[test]
    fn reentrant_acquisition_is_rejected_with_holdings_unaffected() {
        let set = OrderedLockSet::new();
        let worker = WorkerHandle::new("reentrant");
        let rs = resources(&["a", "b"]);

        let guard = set.acquire_all(&worker, [rs[0].clone()]).unwrap();

        let error = set
            .acquire_all(&worker, [rs[0].clone(), rs[1].clone()])
            .unwrap_err();

        assert_eq!(
            error,
            AcquireError::ReentrantAcquisition {
                worker: worker.id(),
                id: rs[0].id(),
                label: "a".into(),
            }
        );

        // The first guard still holds `a`; `b` was never locked.
        assert!(guard.holds(&rs[0]));
        assert_eq!(rs[0].holder(), Some(worker.id()));
        assert!(!rs[1].is_held());
    }

    #[test]
    fn cancellation_rolls_back_partial_holdings() {
        let set = OrderedLockSet::new();
        let blocker = WorkerHandle::new("blocker");
        let rs = resources(&["a", "b"]);

        // `b` is taken, so the worker below will acquire `a` and then block.
        let blocking_guard = set.acquire_all(&blocker, [rs[1].clone()]).unwrap();

        let worker = Arc::new(WorkerHandle::new("cancelled"));
        let thread_worker = worker.clone();
        let thread_rs = rs.clone();

        let waiter = thread::spawn(move || {
            let set = OrderedLockSet::with_poll_interval(Duration::from_millis(1));
            set.acquire_all(&thread_worker, [thread_rs[0].clone(), thread_rs[1].clone()])
                .map(|guard| guard.len())
        });

        thread::sleep(Duration::from_millis(50));
        worker.request_cancel();

        let error = waiter.join().unwrap().unwrap_err();
        assert_eq!(
            error,
            AcquireError::Cancelled {
                worker: worker.id(),
                id: rs[1].id(),
                label: "b".into(),
            }
        );

        // The partial holding on `a` was rolled back before the error
        // propagated; `b` is still owned by the blocking guard.
        assert!(!rs[0].is_held());
        assert_eq!(rs[1].holder(), Some(blocker.id()));

        drop(blocking_guard);
    }

    #[test]
    fn an_already_cancelled_worker_acquires_nothing() {
        let set = OrderedLockSet::new();
        let worker = WorkerHandle::new("dead-on-arrival");
        let rs = resources(&["a"]);

        worker.request_cancel();

        let error = set.acquire_all(&worker, [rs[0].clone()]).unwrap_err();
        assert!(matches!(error, AcquireError::Cancelled { .. }));
        assert!(!rs[0].is_held());
    }

    #[test]
    fn overlapping_workers_all_complete_without_deadlock() {
        const WORKERS: usize = 8;
        const ITERATIONS: usize = 20;

        let rs = resources(&["a", "b", "c", "d"]);
        let (sender, receiver) = mpsc::channel();

        for seed in 0..WORKERS as u64 {
            let rs = rs.clone();
            let sender = sender.clone();

            thread::spawn(move || {
                let set = OrderedLockSet::with_poll_interval(Duration::from_millis(1));
                let worker = WorkerHandle::new(format!("worker-{seed}"));
                let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);

                for _ in 0..ITERATIONS {
                    // Request a randomly permuted overlapping subset of size >= 2.
                    let mut indices: Vec<usize> = (0..rs.len()).collect();
                    for i in (1..indices.len()).rev() {
                        let j = (rng.next_u32() as usize) % (i + 1);
                        indices.swap(i, j);
                    }
                    let count = 2 + (rng.next_u32() as usize) % (rs.len() - 1);

                    let request: Vec<_> = indices[..count]
                        .iter()
                        .map(|index| rs[*index].clone())
                        .collect();

                    let guard = set.acquire_all(&worker, request).unwrap();
                    thread::sleep(Duration::from_micros(200));
                    drop(guard);
                }

                sender.send(worker.id()).unwrap();
            });
        }

        // Every worker has to finish within a generous bound; a circular
        // wait would park at least two of them forever.
        for _ in 0..WORKERS {
            receiver
                .recv_timeout(Duration::from_secs(30))
                .expect("a worker failed to complete in time");
        }
    }

    #[test]
    fn at_most_one_holder_per_resource() {
        const WORKERS: usize = 6;
        const ITERATIONS: usize = 30;

        let rs = resources(&["a", "b", "c"]);
        let occupancy: Arc<Vec<AtomicU32>> =
            Arc::new((0..rs.len()).map(|_| AtomicU32::new(0)).collect());
        let violated = Arc::new(AtomicBool::new(false));

        let mut joins = Vec::with_capacity(WORKERS);
        for seed in 0..WORKERS as u64 {
            let rs = rs.clone();
            let occupancy = occupancy.clone();
            let violated = violated.clone();

            joins.push(thread::spawn(move || {
                let set = OrderedLockSet::with_poll_interval(Duration::from_millis(1));
                let worker = WorkerHandle::new(format!("checker-{seed}"));
                let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);

                for _ in 0..ITERATIONS {
                    let first = (rng.next_u32() as usize) % rs.len();
                    let second = (first + 1 + (rng.next_u32() as usize) % (rs.len() - 1)) % rs.len();
                    let picked = [first, second];

                    let guard = set
                        .acquire_all(&worker, [rs[first].clone(), rs[second].clone()])
                        .unwrap();

                    for index in picked {
                        if occupancy[index].fetch_add(1, Ordering::SeqCst) != 0 {
                            violated.store(true, Ordering::SeqCst);
                        }
                    }

                    thread::sleep(Duration::from_micros(200));

                    for index in picked {
                        occupancy[index].fetch_sub(1, Ordering::SeqCst);
                    }

                    drop(guard);
                }
            }));
        }

        for join in joins {
            join.join().unwrap();
        }

        assert!(!violated.load(Ordering::SeqCst));
    }
}
