//! C9 diagnostic log: append-only, fixed path, opened lazily, never closed,
//! failures silent (§4.8, §6).

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{Level, LevelFilter, Log, Metadata, Record};
use once_cell::sync::OnceCell;

pub const LOG_PATH: &str = "/tmp/selkies_js.log";

struct FileLogger {
    file: Mutex<Option<std::fs::File>>,
}

impl Log for FileLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let level = match record.level() {
            Level::Error => "[ERROR]",
            Level::Warn => "[WARN]",
            _ => "[INFO]",
        };
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let line = format!(
            "[{}][Selkies Joystick Interposer]{} {}\n",
            now,
            level,
            record.args()
        );

        let mut guard = match self.file.lock() {
            Ok(g) => g,
            Err(_) => return,
        };
        if guard.is_none() {
            *guard = OpenOptions::new().append(true).create(true).open(LOG_PATH).ok();
        }
        if let Some(f) = guard.as_mut() {
            let _ = f.write_all(line.as_bytes());
            let _ = f.flush();
        }
    }

    fn flush(&self) {}
}

static LOGGER: OnceCell<FileLogger> = OnceCell::new();

/// Install the file-backed logger the first time any intercepted call needs
/// to log. Resolution is lazy like the trampoline table (§9: eager
/// constructor-time setup is redundant and can race the loader).
pub fn ensure_installed() {
    if LOGGER.get().is_some() {
        return;
    }
    let logger = LOGGER.get_or_init(|| FileLogger {
        file: Mutex::new(None),
    });
    // set_logger can only succeed once per process; a racing second caller
    // gets SetLoggerError, which is fine - someone already installed it.
    let _ = log::set_logger(logger).map(|()| log::set_max_level(LevelFilter::Trace));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_is_idempotent() {
        ensure_installed();
        ensure_installed();
        log::info!("diag smoke test");
    }
}
