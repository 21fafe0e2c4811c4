//! Mutex and condvar recovery so one poisoned lock cannot wedge every waiter.

use std::sync::{Condvar, Mutex, MutexGuard, WaitTimeoutResult};
use std::time::Duration;

pub(crate) fn lock_or_recover<'a, T>(lock: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            crate::log_debug(&format!("mutex poisoned in {context}; recovering"));
            poisoned.into_inner()
        }
    }
}

pub(crate) fn wait_or_recover<'a, T>(
    condvar: &Condvar,
    guard: MutexGuard<'a, T>,
    context: &str,
) -> MutexGuard<'a, T> {
    match condvar.wait(guard) {
        Ok(guard) => guard,
        Err(poisoned) => {
            crate::log_debug(&format!("condvar wait poisoned in {context}; recovering"));
            poisoned.into_inner()
        }
    }
}

pub(crate) fn wait_timeout_or_recover<'a, T>(
    condvar: &Condvar,
    guard: MutexGuard<'a, T>,
    timeout: Duration,
    context: &str,
) -> (MutexGuard<'a, T>, WaitTimeoutResult) {
    match condvar.wait_timeout(guard, timeout) {
        Ok(pair) => pair,
        Err(poisoned) => {
            crate::log_debug(&format!("condvar wait poisoned in {context}; recovering"));
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn poison(lock: &Mutex<i32>) {
        let _ = std::panic::catch_unwind(|| {
            let _guard = lock.lock().expect("first acquisition");
            panic!("poison the lock on purpose");
        });
        assert!(lock.is_poisoned());
    }

    #[test]
    fn lock_or_recover_passes_a_healthy_lock_through() {
        let lock = Mutex::new(1);
        *lock_or_recover(&lock, "healthy") += 1;
        assert!(!lock.is_poisoned());
        assert_eq!(*lock_or_recover(&lock, "healthy"), 2);
    }

    #[test]
    fn lock_or_recover_keeps_working_after_a_panic() {
        let lock = Mutex::new(1);
        poison(&lock);
        *lock_or_recover(&lock, "poisoned") += 1;
        assert_eq!(*lock_or_recover(&lock, "poisoned"), 2);
    }

    #[test]
    fn wait_timeout_or_recover_reports_timeout() {
        let lock = Mutex::new(());
        let condvar = Condvar::new();
        let guard = lock_or_recover(&lock, "timeout-test");
        let (_guard, result) =
            wait_timeout_or_recover(&condvar, guard, Duration::from_millis(10), "timeout-test");
        assert!(result.timed_out());
    }
}
