use thiserror::Error;

/// Errors emitted by [`OrderedLockSet::acquire_all`][crate::OrderedLockSet::acquire_all].
///
/// The first two variants are rejected *before* any resource is locked,
/// so a failed call never leaves partial state behind. [`Cancelled`][AcquireError::Cancelled]
/// is raised after partially-held resources have already been rolled back.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AcquireError {
    /// The same resource appeared twice in a single acquisition request.
    #[error("resource `{label}` (id {id}) was requested twice in one acquisition")]
    DuplicateResource {
        /// Identifier of the duplicated resource
        id: u32,

        /// Diagnostic label of the duplicated resource
        label: String,
    },

    /// The calling worker already holds one of the requested resources.
    ///
    /// Recursive locking is not supported: a worker must release its
    /// current holdings before it may request the same resource again.
    #[error("worker {worker} already holds resource `{label}` (id {id})")]
    ReentrantAcquisition {
        /// Identifier of the requesting worker
        worker: u32,

        /// Identifier of the already-held resource
        id: u32,

        /// Diagnostic label of the already-held resource
        label: String,
    },

    /// The worker was cancelled while blocked waiting for a resource.
    ///
    /// All resources acquired earlier in the same call have been released
    /// again, in reverse acquisition order, before this error was returned.
    #[error("worker {worker} was cancelled while waiting for resource `{label}` (id {id})")]
    Cancelled {
        /// Identifier of the cancelled worker
        worker: u32,

        /// Identifier of the resource the worker was blocked on
        id: u32,

        /// Diagnostic label of the resource the worker was blocked on
        label: String,
    },
}
