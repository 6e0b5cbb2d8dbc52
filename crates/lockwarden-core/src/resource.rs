use std::{
    fmt,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use parking_lot::{
    RawMutex,
    lock_api::{RawMutex as _, RawMutexTimed},
};

static RESOURCE_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Sentinel stored in the holder cell while a resource is free.
const NO_HOLDER: u32 = u32::MAX;

/// Generates a new, unique resource-id for this program run.
///
/// This function internally increments an [`AtomicU32`].
/// Therefore, with the current implementation there is no
/// way of reusing resource-ids.
pub fn next_available_resource_id() -> u32 {
    RESOURCE_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// An exclusively-lockable unit of mutual exclusion.
///
/// A `Resource` wraps a [`parking_lot::RawMutex`] and tracks which worker
/// currently holds it. The resource-id assigned at construction is stable
/// for the lifetime of the program and defines the global acquisition
/// order used by [`OrderedLockSet`][crate::OrderedLockSet]: resources are
/// always locked in ascending id order, no matter in which order a caller
/// listed them.
///
/// Resources are created once at startup, shared between workers via
/// [`Arc`][std::sync::Arc] and never destroyed while workers reference them.
pub struct Resource {
    id: u32,
    label: String,
    raw: RawMutex,
    holder: AtomicU32,
}

impl Resource {
    /// Creates a new, unlocked resource with a fresh id.
    ///
    /// The `label` only serves diagnostic purposes and does not have to
    /// be unique - the id is what identifies the resource.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: next_available_resource_id(),
            label: label.into(),
            raw: RawMutex::INIT,
            holder: AtomicU32::new(NO_HOLDER),
        }
    }

    /// Returns the stable identifier of this resource.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Returns the diagnostic label of this resource.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the id of the worker currently holding this resource, if any.
    ///
    /// The holder is recorded *after* the underlying mutex has been won and
    /// cleared *before* it is released again. Therefore a `Some` result
    /// implies that the underlying mutex is locked at the instant of the read.
    pub fn holder(&self) -> Option<u32> {
        match self.holder.load(Ordering::SeqCst) {
            NO_HOLDER => None,
            worker => Some(worker),
        }
    }

    /// Returns whether any worker holds this resource at the instant of the read.
    pub fn is_held(&self) -> bool {
        self.holder().is_some()
    }

    /// Attempts to lock this resource on behalf of `worker`, giving up
    /// after `timeout`.
    ///
    /// Returns `true` if the lock was won. On success the holder cell is
    /// updated to `worker` before the function returns.
    pub(crate) fn acquire_timed(&self, worker: u32, timeout: Duration) -> bool {
        if self.raw.try_lock_for(timeout) {
            self.holder.store(worker, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    /// Releases this resource.
    ///
    /// The holder cell is cleared before the underlying mutex is unlocked,
    /// so holder attribution never outlives the exclusive hold.
    ///
    /// # Safety
    ///
    /// The resource must be locked, the caller must be the thread that
    /// acquired it, and the caller must not use it as held afterwards.
    /// This mirrors the contract of [`RawMutex::unlock`][parking_lot::lock_api::RawMutex::unlock].
    pub(crate) unsafe fn release(&self) {
        self.holder.store(NO_HOLDER, Ordering::SeqCst);
        unsafe { self.raw.unlock() };
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("holder", &self.holder())
            .finish()
    }
}
