//! Checked signal delivery to spawned children.

use std::io;

/// Send `signal` to `pid` via kill(2).
///
/// Non-positive pids are refused outright: they would address process groups
/// rather than the single child this library manages.
pub(crate) fn send(pid: i32, signal: i32) -> io::Result<()> {
    if pid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "no child process to signal",
        ));
    }
    // SAFETY: kill takes plain integer pid/signal values; errno is read
    // immediately after the call on this thread.
    unsafe {
        if libc::kill(pid, signal) == 0 {
            return Ok(());
        }
    }
    Err(io::Error::last_os_error())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_no_such_process(err: &io::Error) -> bool {
        matches!(err.raw_os_error(), Some(code) if code == libc::ESRCH)
    }

    fn find_missing_pid() -> i32 {
        // Prefer a very high pid to avoid racey "found missing, then reused" windows.
        let high_pid = i32::MAX;
        // SAFETY: probe-only signal 0 checks pid existence without delivering
        // a signal.
        let high_res = unsafe { libc::kill(high_pid, 0) };
        let high_err = io::Error::last_os_error();
        if high_res != 0 && is_no_such_process(&high_err) {
            return high_pid;
        }

        // SAFETY: getpid has no preconditions.
        let current_pid = unsafe { libc::getpid() };
        let mut candidate = current_pid.saturating_add(10_000);
        for _ in 0..1000 {
            // SAFETY: probe-only signal 0.
            let res = unsafe { libc::kill(candidate, 0) };
            let err = io::Error::last_os_error();
            if res != 0 && is_no_such_process(&err) {
                return candidate;
            }
            candidate = candidate.saturating_add(1);
        }

        panic!("unable to find an unused pid for signal helper tests")
    }

    #[test]
    fn send_refuses_non_positive_pids() {
        assert!(send(0, libc::SIGTERM).is_err());
        assert!(send(-1, libc::SIGTERM).is_err());
    }

    #[test]
    fn send_to_missing_pid_reports_esrch() {
        let missing = find_missing_pid();
        let err = send(missing, libc::SIGTERM).expect_err("missing pid should error");
        assert!(is_no_such_process(&err));
    }

    #[test]
    fn probe_signal_to_self_succeeds() {
        // SAFETY: getpid has no preconditions.
        let own_pid = unsafe { libc::getpid() };
        assert!(send(own_pid, 0).is_ok());
    }
}
