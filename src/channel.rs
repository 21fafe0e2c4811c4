//! Pipe/redirection pairs that a child's standard streams attach to.
//!
//! A channel holds a `(near, far)` descriptor pair. `near` is the end the
//! child will install onto one of its standard stream slots; `far` is the end
//! facing the parent. Borrowed redirections carry only a `near` and own
//! nothing; freshly allocated pipes own both ends, and `far != NONE` is what
//! marks ownership. Both ends of an allocated pipe are close-on-exec so a
//! later fork for another process in the same pipeline cannot keep a write
//! end alive past its producer.

use crate::fdio::{self, NONE};
use anyhow::Result;
use std::marker::PhantomData;
use std::os::unix::io::RawFd;

/// Which side of the child a channel sits on.
pub(crate) trait Direction {
    /// Split a freshly allocated pipe into `(near, far)` for this direction.
    fn ends(read_end: RawFd, write_end: RawFd) -> (RawFd, RawFd);
}

/// Carries data into the child: the child reads, the parent writes.
pub(crate) struct AheadOfChild;

/// Carries data out of the child: the child writes, the parent reads.
pub(crate) struct BehindChild;

impl Direction for AheadOfChild {
    fn ends(read_end: RawFd, write_end: RawFd) -> (RawFd, RawFd) {
        (read_end, write_end)
    }
}

impl Direction for BehindChild {
    fn ends(read_end: RawFd, write_end: RawFd) -> (RawFd, RawFd) {
        (write_end, read_end)
    }
}

pub(crate) struct Channel<D: Direction> {
    near: RawFd,
    far: RawFd,
    _direction: PhantomData<D>,
}

impl<D: Direction> Channel<D> {
    /// Capture an existing descriptor for pure redirection. The channel never
    /// closes a borrowed descriptor; its real owner does.
    pub(crate) fn borrow(fd: RawFd) -> Self {
        assert!(fd >= 0, "redirection target must be an open descriptor");
        Self {
            near: fd,
            far: NONE,
            _direction: PhantomData,
        }
    }

    /// Allocate a fresh pipe with both ends close-on-exec.
    ///
    /// # Errors
    ///
    /// Returns an error when the kernel refuses the allocation, for example
    /// on descriptor exhaustion.
    pub(crate) fn allocate() -> Result<Self> {
        let mut ends = [NONE; 2];
        // SAFETY: pipe2 writes two descriptors into the array on success and
        // leaves it untouched on failure.
        if unsafe { libc::pipe2(ends.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
            return Err(fdio::os_error("pipe2"));
        }
        let (near, far) = D::ends(ends[0], ends[1]);
        Ok(Self {
            near,
            far,
            _direction: PhantomData,
        })
    }

    pub(crate) fn near(&self) -> RawFd {
        self.near
    }

    fn owns_pipe(&self) -> bool {
        self.far != NONE
    }

    /// Child branch: install `near` onto the standard slot `target`.
    /// A no-op when `near` already equals `target`.
    pub(crate) fn dup_onto(&self, target: RawFd) -> Result<()> {
        // SAFETY: duplicating descriptor numbers cannot violate memory safety.
        if unsafe { libc::dup2(self.near, target) } == -1 {
            return Err(fdio::os_error("dup2"));
        }
        Ok(())
    }

    /// Child branch, output-swap case only: move `near` off its standard slot
    /// onto a fresh descriptor so the slot can be overwritten first. The
    /// duplicate is close-on-exec, so the exec image never inherits it.
    pub(crate) fn duplicate_near(&mut self) -> Result<()> {
        assert!(
            (0..=2).contains(&self.near),
            "duplicate_near is only for standard stream descriptors"
        );
        // SAFETY: F_DUPFD_CLOEXEC allocates a fresh descriptor at or above
        // the requested floor; 3 keeps it clear of the standard slots.
        let duplicated = unsafe { libc::fcntl(self.near, libc::F_DUPFD_CLOEXEC, 3) };
        if duplicated == -1 {
            return Err(fdio::os_error("fcntl(F_DUPFD_CLOEXEC)"));
        }
        self.near = duplicated;
        Ok(())
    }

    /// Child branch: release the near end once redirection is done. Borrowed
    /// descriptors above the standard slots carry no close-on-exec guarantee
    /// and must be closed here or they leak into the exec image. Owned pipe
    /// ends are both close-on-exec and need nothing; exec releases them.
    /// Closing a descriptor another channel already closed is harmless.
    pub(crate) fn close_in_child(&self) {
        if !self.owns_pipe() && self.near > libc::STDERR_FILENO {
            fdio::close(self.near);
        }
    }

    /// Parent branch after a successful fork: close the near end and hand the
    /// far end to the process object, which owns it from here on.
    pub(crate) fn into_parent_fd(mut self) -> RawFd {
        let far = self.far;
        if self.owns_pipe() {
            fdio::close(self.near);
        }
        self.near = NONE;
        self.far = NONE;
        far
    }
}

/// Unwind path: a channel dropped before the fork handed its ends anywhere
/// still owns both of them.
impl<D: Direction> Drop for Channel<D> {
    fn drop(&mut self) {
        if self.far != NONE {
            fdio::close(self.near);
            fdio::close(self.far);
        }
    }
}
