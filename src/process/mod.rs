//! Child process objects: spawning with stream wiring and multi-waiter
//! reaping.

mod reap;
mod spawn;


use crate::fdio::{self, NONE};
use crate::lock_or_recover;
use anyhow::{Context, Result};
use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Exit code sentinel: the child's status is not (or never became) known.
pub const UNKNOWN_EXIT: i32 = -127;

/// Exit code a child reports when its program could not be executed, matching
/// shell convention.
pub const COMMAND_NOT_FOUND: i32 = 127;

/// Wiring for one standard stream slot of a child process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    /// Attach the slot to an existing open descriptor without taking
    /// ownership of it.
    Fd(RawFd),
    /// Route the slot to the null device.
    Discard,
    /// Allocate a fresh pipe and expose its parent-facing end on the process.
    Pipe,
    /// Route stderr wherever stdout was routed. Only valid for the stderr
    /// slot.
    SameAsOut,
}

impl Slot {
    /// Borrow the parent's own stdin.
    pub const PASS_STDIN: Slot = Slot::Fd(libc::STDIN_FILENO);
    /// Borrow the parent's own stdout.
    pub const PASS_STDOUT: Slot = Slot::Fd(libc::STDOUT_FILENO);
    /// Borrow the parent's own stderr.
    pub const PASS_STDERR: Slot = Slot::Fd(libc::STDERR_FILENO);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Running {
    /// Child reaped; the exit code is final.
    Done,
    /// Child presumed alive, no thread inside a reaping call.
    Unwaited,
    /// Exactly one thread is inside a reaping call.
    Awaited,
}

pub(crate) struct WaitState {
    pub(crate) running: Running,
    pub(crate) exit_code: i32,
}

/// A spawned child process and the parent-facing ends of its stream wiring.
///
/// Dropping a `Process` closes the pipe ends it allocated but does not signal
/// the child; call [`wait`](Process::wait) or [`kill`](Process::kill) first or
/// the child is left to the host as an orphan. That asymmetry is deliberate:
/// a nameless `Process` used as the producer inside a pipeline expression can
/// be dropped immediately, which closes its write end and hands the consumer
/// EOF, while the consumer's child keeps its own copy of the read end.
///
/// The value is movable but neither `Clone` nor `Copy`; ownership rules keep
/// an in-flight child from being shared except by reference.
pub struct Process {
    pid: libc::pid_t,
    state: Mutex<WaitState>,
    not_awaited: Condvar,
    stdin_fd: RawFd,
    stdout_fd: RawFd,
    stderr_fd: RawFd,
}

impl Process {
    /// Spawn `args` with stdin discarded and the given output wiring.
    ///
    /// # Errors
    ///
    /// Returns an error on pipe allocation failure, fork failure, null-device
    /// open failure, or arguments containing NUL bytes.
    ///
    /// # Panics
    ///
    /// Panics if `stdout` is [`Slot::SameAsOut`] or a slot names a negative
    /// descriptor; both are programming errors.
    pub fn spawn(args: &[&str], stdout: Slot, stderr: Slot) -> Result<Self> {
        Self::spawn_with_input(Slot::Discard, args, stdout, stderr)
    }

    /// Spawn `args` with explicit wiring for all three standard streams.
    ///
    /// # Errors
    ///
    /// As [`spawn`](Process::spawn).
    pub fn spawn_with_input(
        stdin: Slot,
        args: &[&str],
        stdout: Slot,
        stderr: Slot,
    ) -> Result<Self> {
        let argv = spawn::to_cstring_argv(args)?;
        Self::spawn_raw(stdin, &argv, stdout, stderr)
    }

    /// Spawn from pre-built C strings, the form the exec call ultimately
    /// needs. `argv[0]` names the program, resolved through `PATH`.
    ///
    /// # Errors
    ///
    /// As [`spawn`](Process::spawn).
    pub fn spawn_raw(stdin: Slot, argv: &[CString], stdout: Slot, stderr: Slot) -> Result<Self> {
        spawn::spawn(stdin, argv, stdout, stderr)
    }

    /// Child process id.
    #[must_use]
    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Exit code of the child: [`UNKNOWN_EXIT`] until reaped (or forever, if
    /// the host's signal policy auto-reaps children), the low 8-bit status
    /// for a normal exit, the negated signal number for a signal death.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        lock_or_recover(&self.state, "process::exit_code").exit_code
    }

    /// Parent-facing write end of the child's stdin pipe, or [`fdio::NONE`]
    /// when no pipe was created for that slot.
    #[must_use]
    pub fn stdin_fd(&self) -> RawFd {
        self.stdin_fd
    }

    /// Parent-facing read end of the child's stdout pipe, or [`fdio::NONE`].
    #[must_use]
    pub fn stdout_fd(&self) -> RawFd {
        self.stdout_fd
    }

    /// Parent-facing read end of the child's stderr pipe, or [`fdio::NONE`].
    #[must_use]
    pub fn stderr_fd(&self) -> RawFd {
        self.stderr_fd
    }

    /// Close the write end of the child's stdin pipe so the child sees EOF.
    /// Idempotent; a no-op when no stdin pipe exists.
    pub fn close_stdin(&mut self) {
        fdio::close(self.stdin_fd);
        self.stdin_fd = NONE;
    }

    /// Close the parent's read end of the child's stdout pipe. Further child
    /// writes to a fully closed pipe raise `EPIPE`/`SIGPIPE` in the child.
    pub fn close_stdout(&mut self) {
        fdio::close(self.stdout_fd);
        self.stdout_fd = NONE;
    }

    /// Close the parent's read end of the child's stderr pipe.
    pub fn close_stderr(&mut self) {
        fdio::close(self.stderr_fd);
        self.stderr_fd = NONE;
    }

    /// Block until the child has terminated and been reaped.
    ///
    /// Any number of threads may wait concurrently; exactly one of them
    /// performs the reap and the rest observe the recorded exit code.
    pub fn wait(&self) {
        reap::wait(self);
    }

    /// Wait up to `timeout` for the child to terminate.
    ///
    /// Returns `true` once the child has been reaped (by this thread or any
    /// other), `false` if the budget ran out first. A timed-out waiter hands
    /// the reaping role back so another waiter can take over.
    #[must_use]
    pub fn timed_wait(&self, timeout: Duration) -> bool {
        reap::timed_wait(self, timeout)
    }

    /// Check without blocking whether the child has terminated, reaping it if
    /// so. Idempotent once the child is done.
    #[must_use]
    pub fn poll(&self) -> bool {
        reap::poll(self)
    }

    /// Send `signal` to the child unless it has already been reaped. Polling
    /// first protects against signalling a recycled pid.
    ///
    /// # Errors
    ///
    /// Returns an error when the kernel refuses the signal, for example for
    /// an invalid signal number.
    pub fn signal(&self, signal: i32) -> Result<()> {
        if !self.poll() {
            crate::signal::send(self.pid, signal).context("kill child")?;
        }
        Ok(())
    }

    /// Send `SIGKILL` unless the child has already been reaped.
    ///
    /// # Errors
    ///
    /// As [`signal`](Process::signal).
    pub fn kill(&self) -> Result<()> {
        self.signal(libc::SIGKILL)
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        // Release the parent-facing pipe ends. The child itself is
        // deliberately left alone; reaping or killing is the caller's call.
        fdio::close(self.stdin_fd);
        fdio::close(self.stdout_fd);
        fdio::close(self.stderr_fd);
    }
}
