//! Raw descriptor helpers shared by the channel plumbing and by callers
//! driving the exposed pipe ends.

use anyhow::{anyhow, Result};
use std::io::{self, ErrorKind};
use std::os::unix::io::RawFd;
use std::thread;
use std::time::Duration;

/// Sentinel for "no descriptor".
pub const NONE: RawFd = -1;

/// Wrap the current errno as an error with static context, keeping the
/// underlying `io::Error` downcastable so callers can inspect errno and kind.
pub(crate) fn os_error(context: &'static str) -> anyhow::Error {
    anyhow::Error::new(io::Error::last_os_error()).context(context)
}

/// Close a descriptor, ignoring errors. Harmless for [`NONE`] and for
/// descriptors that were already closed elsewhere.
pub fn close(fd: RawFd) {
    if fd >= 0 {
        // SAFETY: close takes a plain integer; a stale value yields EBADF,
        // which is deliberately ignored.
        unsafe {
            let _ = libc::close(fd);
        }
    }
}

/// Attempt a single write without retry loops.
fn try_write(fd: RawFd, data: &[u8]) -> io::Result<usize> {
    if data.is_empty() {
        return Ok(0);
    }
    // SAFETY: data is a live slice and the length passed matches it.
    let written = unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) };
    if written < 0 {
        return Err(io::Error::last_os_error());
    }
    if written == 0 {
        return Err(io::Error::new(ErrorKind::WriteZero, "write returned 0"));
    }
    Ok(written as usize)
}

/// Write the entire buffer to a pipe end, retrying short writes.
///
/// # Errors
///
/// Returns an error if the descriptor rejects the write, including `EPIPE`
/// once the reading side has gone away.
pub fn write_all(fd: RawFd, mut data: &[u8]) -> Result<()> {
    while !data.is_empty() {
        let written = match try_write(fd, data) {
            Ok(written) => written,
            Err(err) => {
                if err.kind() == ErrorKind::Interrupted || err.kind() == ErrorKind::WouldBlock {
                    thread::sleep(Duration::from_millis(1));
                    continue;
                }
                return Err(anyhow!("pipe write failed: {err}"));
            }
        };
        data = if written <= data.len() {
            &data[written..]
        } else {
            &[]
        };
    }
    Ok(())
}

/// Read from a pipe end until end-of-file.
///
/// # Errors
///
/// Returns an error if the descriptor reports anything other than data,
/// end-of-file, or a retryable interruption.
pub fn read_to_end(fd: RawFd) -> Result<Vec<u8>> {
    let mut collected = Vec::new();
    let mut buffer = [0u8; 4096];
    loop {
        // SAFETY: fd reads into a stack buffer of matching length.
        let n = unsafe { libc::read(fd, buffer.as_mut_ptr() as *mut libc::c_void, buffer.len()) };
        if n > 0 {
            collected.extend_from_slice(&buffer[..n as usize]);
            continue;
        }
        if n == 0 {
            return Ok(collected);
        }
        let err = io::Error::last_os_error();
        if err.kind() == ErrorKind::Interrupted {
            continue;
        }
        return Err(anyhow::Error::new(err).context("pipe read failed"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_pipe() -> (RawFd, RawFd) {
        let mut ends = [NONE; 2];
        // SAFETY: pipe writes two descriptors into the array on success.
        let rc = unsafe { libc::pipe(ends.as_mut_ptr()) };
        assert_eq!(rc, 0, "pipe allocation failed");
        (ends[0], ends[1])
    }

    #[test]
    fn write_all_then_read_to_end_round_trips() {
        let (read_end, write_end) = raw_pipe();
        write_all(write_end, b"alpha\nbeta\n").expect("write");
        close(write_end);
        let collected = read_to_end(read_end).expect("read");
        close(read_end);
        assert_eq!(collected, b"alpha\nbeta\n");
    }

    #[test]
    fn read_to_end_on_immediately_closed_writer_is_empty() {
        let (read_end, write_end) = raw_pipe();
        close(write_end);
        let collected = read_to_end(read_end).expect("read");
        close(read_end);
        assert!(collected.is_empty());
    }

    #[test]
    fn close_tolerates_the_none_sentinel() {
        close(NONE);
        let (read_end, write_end) = raw_pipe();
        close(read_end);
        close(write_end);
    }

    #[test]
    fn write_all_surfaces_broken_pipe() {
        let (read_end, write_end) = raw_pipe();
        close(read_end);
        // A write to a reader-less pipe raises SIGPIPE by default; suppress it
        // for this thread so the error surfaces as EPIPE instead.
        // SAFETY: changing the disposition of SIGPIPE to ignore is process-wide
        // but safe; tests never rely on default SIGPIPE delivery.
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        }
        assert!(write_all(write_end, b"going nowhere").is_err());
        close(write_end);
    }
}
