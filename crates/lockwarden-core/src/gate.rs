use std::{
    sync::{Condvar, Mutex},
    time::{Duration, Instant},
};

use anyhow::{Error, bail};

/// A structure that allows waiting for a deadline that can be lifted early.
///
/// A [`DeadlineGate`] represents a [`Mutex`]-[`Condvar`] pair, where the
/// mutex wraps a flag recording whether the gate has been opened. A waiting
/// thread parks on the condition variable until either its deadline elapses
/// or another thread opens the gate, whichever happens first.
///
/// This structure is intended to back a single supervising timer thread;
/// any number of threads may open the gate.
pub struct DeadlineGate {
    opened: Mutex<bool>,
    barrier: Condvar,
}

impl DeadlineGate {
    /// Creates a closed [`DeadlineGate`].
    pub fn new() -> Self {
        Self {
            opened: Mutex::new(false),
            barrier: Condvar::new(),
        }
    }

    /// Opens the gate and wakes every thread waiting on it.
    ///
    /// Opening an already-open gate is a no-op, so the operation is
    /// idempotent.
    ///
    /// # Errors
    ///
    /// This function may fail if the internal [`Mutex`] of this
    /// [`DeadlineGate`] was poisoned.
    pub fn open(&self) -> Result<(), Error> {
        match self.opened.lock() {
            Ok(mut opened) => {
                *opened = true;
                self.barrier.notify_all();
                Ok(())
            }
            Err(_) => bail!("DeadlineGate Mutex was poisoned!"),
        }
    }

    /// Waits until the gate is opened or `deadline` has elapsed.
    ///
    /// Returns `true` if the gate was opened before the deadline and
    /// `false` if the deadline elapsed with the gate still closed. If the
    /// gate is already open when calling this function, it returns
    /// immediately.
    ///
    /// # Errors
    ///
    /// This function may fail if the internal [`Mutex`] of this
    /// [`DeadlineGate`] was poisoned.
    pub fn wait_until_open_or(&self, deadline: Duration) -> Result<bool, Error> {
        let start = Instant::now();

        let mut opened = match self.opened.lock() {
            Ok(opened) => opened,
            Err(_) => bail!("DeadlineGate Mutex was poisoned!"),
        };

        while !*opened {
            let Some(remaining) = deadline.checked_sub(start.elapsed()) else {
                return Ok(false);
            };

            opened = match self.barrier.wait_timeout(opened, remaining) {
                Ok((opened, _)) => opened,
                Err(_) => bail!("DeadlineGate Mutex was poisoned!"),
            };
        }

        Ok(true)
    }
}

impl Default for DeadlineGate {
    fn default() -> Self {
        Self::new()
    }
}
