// Hand-rolled logging, matching the teacher's choice not to depend on the
// `log`/`tracing` crates: daemon lifecycle events are appended to a file under
// the state directory, never printed to stdout (stdout is reserved for the
// one JSON response record per CLI invocation).
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

struct Logger {
    path: PathBuf,
    file: Mutex<Option<std::fs::File>>,
}

impl Logger {
    fn open(&self) -> Option<std::fs::File> {
        OpenOptions::new().create(true).append(true).open(&self.path).ok()
    }

    fn write_line(&self, level: &str, msg: &str) {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        let mut guard = self.file.lock().unwrap();
        if guard.is_none() {
            *guard = self.open();
        }
        if let Some(f) = guard.as_mut() {
            let _ = writeln!(f, "[{:>10}.{:03}] {:<5} {}", now.as_secs(), now.subsec_millis(), level, msg);
        }
    }
}

static GLOBAL: OnceLock<Logger> = OnceLock::new();

/// Must be called once, early, with the daemon's/CLI's state directory. Safe to call more than
/// once; only the first call takes effect.
pub fn init(state_dir: &Path) {
    let _ = GLOBAL.set(Logger { path: state_dir.join("log"), file: Mutex::new(None) });
}

pub fn log_line(level: &str, msg: &str) {
    if let Some(l) = GLOBAL.get() {
        l.write_line(level, msg);
    }
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => { $crate::log::log_line("INFO", &format!($($arg)*)) };
}
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => { $crate::log::log_line("WARN", &format!($($arg)*)) };
}
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => { $crate::log::log_line("ERROR", &format!($($arg)*)) };
}
