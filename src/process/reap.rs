//! Multi-waiter reaping: one reaper at a time, everyone else observes.
//!
//! The tri-state in [`Running`] plus a single condvar implement a
//! single-reaper, many-observer protocol without a SIGCHLD handler, so the
//! library composes with whatever signal policy the host installed. A timed
//! waiter that runs out of budget hands the reaping role back and wakes one
//! peer to take over.

use super::{Process, Running, WaitState, UNKNOWN_EXIT};
use crate::lock::{wait_or_recover, wait_timeout_or_recover};
use crate::lock_or_recover;
use crate::log_debug;
use std::cmp;
use std::io;
use std::thread;
use std::time::{Duration, Instant};

/// First sleep of the timed-wait poll loop.
const POLL_INITIAL: Duration = Duration::from_millis(1);
/// Ceiling for the doubling poll sleep.
const POLL_CEILING: Duration = Duration::from_millis(64);

enum Reap {
    StillRunning,
    Exited(i32),
    /// waitpid found no child, typically because the host auto-reaps via its
    /// SIGCHLD disposition. The exit code is unknowable.
    Gone,
}

fn decode_status(status: i32) -> i32 {
    if libc::WIFEXITED(status) {
        libc::WEXITSTATUS(status)
    } else if libc::WIFSIGNALED(status) {
        -libc::WTERMSIG(status)
    } else {
        UNKNOWN_EXIT
    }
}

/// One non-blocking waitpid. Callers must hold either the state lock or the
/// AWAITED role so two reaps can never race for the same child.
fn try_reap(pid: i32) -> Reap {
    loop {
        let mut status: libc::c_int = 0;
        // SAFETY: waitpid writes the status into a stack slot.
        let reaped = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
        if reaped == 0 {
            return Reap::StillRunning;
        }
        if reaped < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            log_debug(&format!("waitpid({pid}) failed: {err}"));
            return Reap::Gone;
        }
        return Reap::Exited(decode_status(status));
    }
}

/// Blocking waitpid under the AWAITED role.
fn blocking_reap(pid: i32) -> Reap {
    loop {
        let mut status: libc::c_int = 0;
        // SAFETY: as above; without WNOHANG the call parks until the child
        // terminates.
        let reaped = unsafe { libc::waitpid(pid, &mut status, 0) };
        if reaped < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            log_debug(&format!("waitpid({pid}) failed: {err}"));
            return Reap::Gone;
        }
        return Reap::Exited(decode_status(status));
    }
}

/// Record a completed reap. The exit-code write precedes the DONE transition,
/// which precedes the caller's broadcast.
fn finish(state: &mut WaitState, outcome: Reap) {
    if let Reap::Exited(code) = outcome {
        state.exit_code = code;
    }
    state.running = Running::Done;
}

pub(super) fn wait(process: &Process) {
    let mut state = lock_or_recover(&process.state, "process::wait");
    while state.running == Running::Awaited {
        state = wait_or_recover(&process.not_awaited, state, "process::wait");
    }
    if state.running == Running::Done {
        return;
    }
    state.running = Running::Awaited;
    drop(state);

    let outcome = blocking_reap(process.pid);

    let mut state = lock_or_recover(&process.state, "process::wait");
    finish(&mut state, outcome);
    drop(state);
    process.not_awaited.notify_all();
}

pub(super) fn timed_wait(process: &Process, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;

    let mut state = lock_or_recover(&process.state, "process::timed_wait");
    while state.running == Running::Awaited {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            // Someone else is still reaping and will wake everyone when done.
            return false;
        }
        let (guard, _timed_out) =
            wait_timeout_or_recover(&process.not_awaited, state, remaining, "process::timed_wait");
        state = guard;
    }
    if state.running == Running::Done {
        return true;
    }
    state.running = Running::Awaited;
    drop(state);

    let mut nap = POLL_INITIAL;
    loop {
        match try_reap(process.pid) {
            Reap::StillRunning => {}
            outcome => {
                let mut state = lock_or_recover(&process.state, "process::timed_wait");
                finish(&mut state, outcome);
                drop(state);
                process.not_awaited.notify_all();
                return true;
            }
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            // Out of budget: hand the reaping role to one other waiter.
            let mut state = lock_or_recover(&process.state, "process::timed_wait");
            state.running = Running::Unwaited;
            drop(state);
            process.not_awaited.notify_one();
            log_debug(&format!("timed_wait({}): budget spent, baton relayed", process.pid));
            return false;
        }
        thread::sleep(cmp::min(nap, remaining));
        if nap < POLL_CEILING {
            nap *= 2;
        }
    }
}

pub(super) fn poll(process: &Process) -> bool {
    let mut state = lock_or_recover(&process.state, "process::poll");
    if state.running == Running::Unwaited {
        match try_reap(process.pid) {
            Reap::StillRunning => return false,
            outcome => {
                finish(&mut state, outcome);
                drop(state);
                process.not_awaited.notify_all();
                return true;
            }
        }
    }
    state.running == Running::Done
}
