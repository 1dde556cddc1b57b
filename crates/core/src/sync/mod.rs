//! Small synchronisation primitives shared by the thread, pool and
//! asynchronous components.

use std::{
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use crate::{Result, SignalPipeError};

/// Locks `mutex`, mapping poisoning to [`SignalPipeError::Poisoned`].
pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, what: &'static str) -> Result<MutexGuard<'a, T>> {
    mutex.lock().map_err(|_| SignalPipeError::Poisoned(what))
}

/// Locks `mutex` from a context that cannot report errors. A poisoned lock
/// is recovered since the guarded state is always left consistent between
/// statements.
pub(crate) fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Binary signal used for start synchronisation and producer/consumer
/// handoff.
///
/// A released signal stays set until a waiter consumes it (auto-reset) or
/// until [`Signal::block`] clears it (manual reset). Releasing an already set
/// signal is a no-op, so wake-ups are never counted.
#[derive(Debug)]
pub struct Signal {
    set: Mutex<bool>,
    cond: Condvar,
    auto_reset: bool,
}

impl Signal {
    /// Creates a blocked signal that resets itself when a waiter wakes up.
    pub fn auto_reset() -> Self {
        Self::with_mode(true)
    }

    /// Creates a blocked signal that stays released until blocked again.
    pub fn manual_reset() -> Self {
        Self::with_mode(false)
    }

    fn with_mode(auto_reset: bool) -> Self {
        Self {
            set: Mutex::new(false),
            cond: Condvar::new(),
            auto_reset,
        }
    }

    /// Clears the signal so that subsequent waits block.
    pub fn block(&self) {
        *lock_recover(&self.set) = false;
    }

    /// Sets the signal and wakes all waiters.
    pub fn release(&self) {
        let mut set = lock_recover(&self.set);
        *set = true;
        self.cond.notify_all();
    }

    /// Returns whether the signal is currently released.
    pub fn is_set(&self) -> bool {
        *lock_recover(&self.set)
    }

    /// Suspends the caller until the signal is released.
    pub fn wait(&self) {
        let mut set = lock_recover(&self.set);
        while !*set {
            set = self.cond.wait(set).unwrap_or_else(PoisonError::into_inner);
        }
        if self.auto_reset {
            *set = false;
        }
    }

    /// Like [`Signal::wait`] but gives up after `timeout`. Returns `true` if
    /// the signal was released in time.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut set = lock_recover(&self.set);
        while !*set {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .cond
                .wait_timeout(set, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            set = guard;
        }
        if self.auto_reset {
            *set = false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn release_wakes_waiter_on_other_thread() {
        let signal = Arc::new(Signal::auto_reset());
        let remote = Arc::clone(&signal);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.release();
        });

        assert!(signal.wait_timeout(Duration::from_secs(5)));
        handle.join().unwrap();
    }

    #[test]
    fn auto_reset_consumes_release() {
        let signal = Signal::auto_reset();
        signal.release();
        signal.release();

        assert!(signal.wait_timeout(Duration::from_millis(10)));
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn manual_reset_stays_set_until_blocked() {
        let signal = Signal::manual_reset();
        signal.release();

        assert!(signal.wait_timeout(Duration::from_millis(10)));
        assert!(signal.is_set());

        signal.block();
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
    }
}
