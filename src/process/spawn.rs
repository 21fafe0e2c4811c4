//! Channel construction, fork, and the child-side redirection algorithm.

use super::{Process, Running, Slot, WaitState, COMMAND_NOT_FOUND, UNKNOWN_EXIT};
use crate::channel::{AheadOfChild, BehindChild, Channel, Direction};
use crate::fdio;
use crate::log_debug;
use anyhow::{ensure, Context, Result};
use std::ffi::CString;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::{Condvar, Mutex, OnceLock};

/// Convert user-facing argument strings into the form the exec call needs.
pub(super) fn to_cstring_argv(args: &[&str]) -> Result<Vec<CString>> {
    args.iter()
        .map(|arg| {
            CString::new(*arg).with_context(|| format!("argument contains NUL byte: {arg}"))
        })
        .collect()
}

/// Shared read+write null device descriptor, opened lazily once per process
/// image and never closed. Close-on-exec, so exec images do not inherit it;
/// the child's standard slots get plain duplicates instead.
fn devnull() -> Result<RawFd> {
    static DEVNULL: OnceLock<RawFd> = OnceLock::new();
    if let Some(&fd) = DEVNULL.get() {
        return Ok(fd);
    }
    // SAFETY: open with a static NUL-terminated path.
    let fd = unsafe {
        libc::open(
            b"/dev/null\0".as_ptr() as *const libc::c_char,
            libc::O_RDWR | libc::O_CLOEXEC,
        )
    };
    if fd < 0 {
        return Err(fdio::os_error("open(/dev/null)"));
    }
    match DEVNULL.set(fd) {
        Ok(()) => Ok(fd),
        Err(_) => {
            // Another thread initialized first; discard the duplicate.
            fdio::close(fd);
            match DEVNULL.get() {
                Some(&winner) => Ok(winner),
                None => Err(anyhow::anyhow!("null device initialization raced")),
            }
        }
    }
}

fn build_channel<D: Direction>(slot: Slot, slot_name: &str) -> Result<Channel<D>> {
    match slot {
        Slot::Fd(fd) => Ok(Channel::borrow(fd)),
        Slot::Discard => Ok(Channel::borrow(devnull()?)),
        Slot::Pipe => Channel::allocate(),
        Slot::SameAsOut => panic!("SameAsOut is only valid for the stderr slot, not {slot_name}"),
    }
}

pub(super) fn spawn(stdin: Slot, argv: &[CString], stdout: Slot, stderr: Slot) -> Result<Process> {
    ensure!(!argv.is_empty(), "argument vector must name a program");

    let stdin_channel = build_channel::<AheadOfChild>(stdin, "stdin")?;
    let stdout_channel = build_channel::<BehindChild>(stdout, "stdout")?;
    let stderr_channel: Channel<BehindChild> = match stderr {
        Slot::SameAsOut => Channel::borrow(stdout_channel.near()),
        other => build_channel(other, "stderr")?,
    };

    // The pointer table is prepared before forking so that only
    // async-signal-safe calls happen between fork and exec.
    let mut argv_ptrs: Vec<*const libc::c_char> = argv.iter().map(|arg| arg.as_ptr()).collect();
    argv_ptrs.push(std::ptr::null());

    // SAFETY: the child branch performs only dup2/close/execvp and exits on
    // failure without unwinding into the parent's state.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        // The channels unwind on drop, releasing any freshly allocated pipe
        // ends.
        return Err(fdio::os_error("fork"));
    }
    if pid == 0 {
        // SAFETY: forked child; never returns.
        unsafe { redirect_and_exec(stdin_channel, stdout_channel, stderr_channel, &argv_ptrs) }
    }

    log_debug(&format!("spawned pid={pid}"));
    Ok(Process {
        pid,
        state: Mutex::new(WaitState {
            running: Running::Unwaited,
            exit_code: UNKNOWN_EXIT,
        }),
        not_awaited: Condvar::new(),
        stdin_fd: stdin_channel.into_parent_fd(),
        stdout_fd: stdout_channel.into_parent_fd(),
        stderr_fd: stderr_channel.into_parent_fd(),
    })
}

/// Child branch: rewire the standard streams, release channel ends, exec.
///
/// Installing stdin first is always safe; it cannot collide with the output
/// slots. The outputs need care when the caller swapped them: if the stderr
/// wiring targets the slot stdout currently occupies, stderr must be
/// installed first, and in the perfect-swap case stdout's source must first
/// be moved off slot 2 so installing stderr does not clobber it.
///
/// # Safety
///
/// Must only be called in the forked child. Never returns: it either execs
/// the program or exits the child image.
unsafe fn redirect_and_exec(
    stdin_channel: Channel<AheadOfChild>,
    mut stdout_channel: Channel<BehindChild>,
    stderr_channel: Channel<BehindChild>,
    argv_ptrs: &[*const libc::c_char],
) -> ! {
    let fail = |context: &str| -> ! {
        let err = io::Error::last_os_error();
        let msg = format!("procpipe child setup: {context} failed: {err}\n");
        // SAFETY: write is async-signal-safe and fd 2 is open in the child.
        let _ = libc::write(
            libc::STDERR_FILENO,
            msg.as_ptr() as *const libc::c_void,
            msg.len(),
        );
        libc::_exit(1);
    };

    if stdin_channel.dup_onto(libc::STDIN_FILENO).is_err() {
        fail("dup2(stdin)");
    }
    if stderr_channel.near() == libc::STDOUT_FILENO {
        if stdout_channel.near() == libc::STDERR_FILENO && stdout_channel.duplicate_near().is_err()
        {
            fail("dup(stdout source)");
        }
        if stderr_channel.dup_onto(libc::STDERR_FILENO).is_err() {
            fail("dup2(stderr)");
        }
        if stdout_channel.dup_onto(libc::STDOUT_FILENO).is_err() {
            fail("dup2(stdout)");
        }
    } else {
        if stdout_channel.dup_onto(libc::STDOUT_FILENO).is_err() {
            fail("dup2(stdout)");
        }
        if stderr_channel.dup_onto(libc::STDERR_FILENO).is_err() {
            fail("dup2(stderr)");
        }
    }

    stdin_channel.close_in_child();
    stdout_channel.close_in_child();
    stderr_channel.close_in_child();

    // SAFETY: argv_ptrs is a null-terminated pointer table over CStrings that
    // outlive this call.
    libc::execvp(argv_ptrs[0], argv_ptrs.as_ptr());
    // Reached only when exec failed; report "command not found" like a shell,
    // skipping all host-level cleanup.
    libc::_exit(COMMAND_NOT_FOUND);
}
