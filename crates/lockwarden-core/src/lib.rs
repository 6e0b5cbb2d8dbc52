//! Deadlock-safe multi-resource acquisition primitives.
//!
//! This crate provides the leaf building blocks of lockwarden: exclusive
//! [`Resource`]s with a stable global ordering, the [`OrderedLockSet`]
//! primitive that acquires whole resource sets without risk of circular
//! wait, and the worker observation state ([`WorkerHandle`]) shared between
//! workers and their supervisors.
//!
//! The supervision layer (worker spawning and the liveness watchdog) lives
//! in the `lockwarden` crate on top of these primitives.

/// The error taxonomy of resource acquisition
pub mod error;

/// A deadline timer that can be lifted early
pub mod gate;

/// Ordered acquisition of whole resource sets
pub mod lockset;

/// Exclusive resources with stable identifiers
pub mod resource;

/// Worker identity, completion state and cancellation
pub mod worker;

pub use error::AcquireError;
pub use gate::DeadlineGate;
pub use lockset::{AcquisitionRequest, LockSetGuard, OrderedLockSet};
pub use resource::Resource;
pub use worker::{WorkerHandle, WorkerStatus};
