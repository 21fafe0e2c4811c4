//! Debug logging for spawn and reap milestones.
//!
//! Diagnostics go to a temp file: the parent's standard streams are exactly
//! what this library wires into children, so they are not safe to write to.

use std::{
    env, fs,
    io::Write,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, OnceLock,
    },
    time::{SystemTime, UNIX_EPOCH},
};

/// Spawn and reap diagnostics are short single lines; half a megabyte is
/// plenty of history before the file starts over.
const LOG_CAP_BYTES: u64 = 512 * 1024;
const LOG_ENABLED_ENV: &str = "PROCPIPE_LOG";

static LOG_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG: OnceLock<Mutex<Option<DebugLog>>> = OnceLock::new();

/// Path to the temp log file; it starts over once the size cap is hit.
pub fn log_file_path() -> PathBuf {
    env::temp_dir().join("procpipe.log")
}

struct DebugLog {
    path: PathBuf,
    file: fs::File,
    written: u64,
}

impl DebugLog {
    fn open(path: PathBuf) -> Option<Self> {
        let written = fs::metadata(&path).map(|meta| meta.len()).unwrap_or(0);
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .ok()?;
        let mut log = Self {
            path,
            file,
            written,
        };
        if log.written > LOG_CAP_BYTES {
            log.start_over();
        }
        Some(log)
    }

    fn start_over(&mut self) {
        if let Ok(file) = fs::File::create(&self.path) {
            self.file = file;
            self.written = 0;
        }
    }

    fn append(&mut self, line: &str) {
        if self.written.saturating_add(line.len() as u64) > LOG_CAP_BYTES {
            self.start_over();
        }
        if self.file.write_all(line.as_bytes()).is_ok() {
            self.written += line.len() as u64;
        }
    }
}

fn log_slot() -> &'static Mutex<Option<DebugLog>> {
    LOG.get_or_init(|| Mutex::new(None))
}

fn env_enabled() -> bool {
    static FROM_ENV: OnceLock<bool> = OnceLock::new();
    *FROM_ENV.get_or_init(|| {
        matches!(
            env::var(LOG_ENABLED_ENV),
            Ok(value)
                if value == "1"
                    || value.eq_ignore_ascii_case("true")
                    || value.eq_ignore_ascii_case("on")
        )
    })
}

/// Enable or disable debug logging. `PROCPIPE_LOG=1` enables it without code.
pub fn init_logging(enabled: bool) {
    LOG_ENABLED.store(enabled, Ordering::Relaxed);
    let mut slot = log_slot()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *slot = if enabled {
        DebugLog::open(log_file_path())
    } else {
        None
    };
}

/// Record one diagnostic line, tagged with the parent's pid so several
/// processes sharing one temp dir stay distinguishable.
pub fn log_debug(msg: &str) {
    if !LOG_ENABLED.load(Ordering::Relaxed) && !env_enabled() {
        return;
    }
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let line = format!("[{} {timestamp}] {msg}\n", std::process::id());
    let mut slot = log_slot()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if slot.is_none() {
        *slot = DebugLog::open(log_file_path());
    }
    if let Some(log) = slot.as_mut() {
        log.append(&line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(label: &str) -> PathBuf {
        env::temp_dir().join(format!("procpipe-log-{label}-{}", std::process::id()))
    }

    #[test]
    fn append_starts_over_at_the_cap() {
        let path = scratch_path("cap");
        let _ = fs::remove_file(&path);
        let mut log = DebugLog::open(path.clone()).expect("open log");
        log.written = LOG_CAP_BYTES - 4;
        log.append("spills past the cap\n");
        assert_eq!(log.written, "spills past the cap\n".len() as u64);
        let on_disk = fs::metadata(&path).map(|meta| meta.len()).unwrap_or(0);
        assert_eq!(on_disk, log.written);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn open_discards_an_overgrown_leftover() {
        let path = scratch_path("leftover");
        fs::write(&path, vec![b'x'; (LOG_CAP_BYTES + 1) as usize]).expect("seed leftover");
        let log = DebugLog::open(path.clone()).expect("open log");
        assert_eq!(log.written, 0);
        let _ = fs::remove_file(&path);
    }
}
