//! Terminal + daily log file output.
//!
//! Every stage logs through `log!` / `elog!`. The file sink is optional: if it
//! cannot be opened, messages still reach the terminal.

use chrono::{Datelike, Local, Timelike};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

static LOG_FILE: Mutex<Option<File>> = Mutex::new(None);
static QUIET: AtomicBool = AtomicBool::new(false);

const LOG_PREFIX: &str = "papersort-";
const KEEP_DAYS: i64 = 7;

/// Default log directory: `<data_dir>/papersort/logs`
pub fn default_log_dir() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("papersort").join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

/// Initialize logging - creates today's log file and cleans old logs
pub fn init_logging(log_dir: &Path) -> Option<PathBuf> {
    if fs::create_dir_all(log_dir).is_err() {
        return None;
    }

    remove_old_logs(log_dir);

    let today = Local::now();
    let log_filename = format!("{}{:04}-{:02}-{:02}.log", LOG_PREFIX, today.year(), today.month(), today.day());
    let log_path = log_dir.join(&log_filename);

    let file = OpenOptions::new().create(true).append(true).open(&log_path).ok()?;
    let mut guard = LOG_FILE.lock().ok()?;
    *guard = Some(file);
    Some(log_path)
}

/// Suppress terminal output of `log!` (the log file still receives everything)
pub fn set_quiet(quiet: bool) {
    QUIET.store(quiet, Ordering::Relaxed);
}

fn remove_old_logs(log_dir: &Path) {
    let Ok(entries) = fs::read_dir(log_dir) else { return };
    let cutoff = (Local::now() - chrono::Duration::days(KEEP_DAYS)).date_naive();

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
        // Parse date from filename: papersort-YYYY-MM-DD.log
        let Some(date_str) = name.strip_prefix(LOG_PREFIX).and_then(|s| s.strip_suffix(".log")) else { continue };
        if let Ok(date) = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
            if date < cutoff {
                let _ = fs::remove_file(&path);
            }
        }
    }
}

fn timestamp() -> String {
    let now = Local::now();
    format!("[{:02}:{:02}:{:02}]", now.hour(), now.minute(), now.second())
}

fn write_file(line: &str) {
    if let Ok(mut guard) = LOG_FILE.lock() {
        if let Some(ref mut file) = *guard {
            let _ = writeln!(file, "{}", line);
        }
    }
}

/// Log to both terminal and file
pub fn log_both(msg: &str) {
    if !QUIET.load(Ordering::Relaxed) {
        println!("{}", msg);
    }
    write_file(&format!("{} {}", timestamp(), msg));
}

/// Log error to both terminal and file
pub fn elog_both(msg: &str) {
    eprintln!("{}", msg);
    write_file(&format!("{} [ERROR] {}", timestamp(), msg));
}

/// Log to both terminal and file
#[macro_export]
macro_rules! log {
    ($($arg:tt)*) => {
        $crate::logging::log_both(&format!($($arg)*))
    };
}

/// Error logging to both terminal and file
#[macro_export]
macro_rules! elog {
    ($($arg:tt)*) => {
        $crate::logging::elog_both(&format!($($arg)*))
    };
}
