//! Spawn and coordinate child processes with shell-style wiring of their
//! three standard streams.
//!
//! Each stream slot of a child is described by a [`Slot`]: pass it through to
//! the parent, discard it, attach it to an existing descriptor, or create a
//! fresh pipe whose parent-facing end the [`Process`] exposes. The library
//! handles pipe allocation, close-on-exec bookkeeping, child-side `dup2`
//! wiring (including swapped outputs), and lets any number of threads wait on
//! the same child without ever racing the reap.

pub mod fdio;

mod channel;
mod lock;
mod logging;
mod process;
mod signal;

pub use logging::{init_logging, log_debug, log_file_path};
pub use process::{Process, Slot, COMMAND_NOT_FOUND, UNKNOWN_EXIT};

pub(crate) use lock::lock_or_recover;
