//! Centralized timestamped logging
//!
//! All logs go through `logi!`, `logw!` or `loge!` so they include:
//!   <timestamp> [TAG][thread] message
//!
//! Logs always go to stderr (plus an optional file sink) because stdout
//! is the reply channel of the command protocol: a controller driving
//! fragview over stdin must be able to read command answers without
//! filtering log noise out of them.

use std::fs::File;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

static LOG_FILE: OnceLock<Mutex<Option<File>>> = OnceLock::new();

/// Initialize logging. Call once at startup; `log_file` appends every
/// line to that path in addition to stderr.
pub fn init(log_file: Option<PathBuf>) {
    let sink = LOG_FILE.get_or_init(|| Mutex::new(None));

    if let Some(path) = log_file {
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(f) => {
                if let Ok(mut guard) = sink.lock() {
                    *guard = Some(f);
                }
            }
            Err(e) => eprintln!(
                "{} [WATCH][{}] failed to open log file {}: {e}",
                log_timestamp(),
                log_thread_name(),
                path.display()
            ),
        }
    }
}

// The `time` crate is used purely for formatting timestamps with
// millisecond precision. Local time when available, UTC otherwise.
pub(crate) fn log_timestamp() -> String {
    let now = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    let fmt = time::format_description::parse(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]",
    )
    .expect("valid time format description");
    now.format(&fmt).unwrap_or_else(|_| "<time-format-error>".to_string())
}

pub(crate) fn log_thread_name() -> String {
    std::thread::current().name().unwrap_or("main").to_string()
}

/// Write one formatted line to stderr and the optional file sink.
pub(crate) fn log_line(tag: &str, msg: &str) {
    let line = format!("{} [{}][{}] {}", log_timestamp(), tag, log_thread_name(), msg);

    eprintln!("{line}");

    if let Some(sink) = LOG_FILE.get() {
        if let Ok(mut guard) = sink.lock() {
            if let Some(f) = guard.as_mut() {
                let _ = writeln!(f, "{line}");
                let _ = f.flush();
            }
        }
    }
}

#[macro_export]
macro_rules! logi {
    ($tag:expr, $($arg:tt)*) => {{
        $crate::logging::log_line($tag, &format!($($arg)*));
    }};
}

#[macro_export]
macro_rules! logw {
    ($tag:expr, $($arg:tt)*) => {{
        $crate::logging::log_line($tag, &format!($($arg)*));
    }};
}

#[macro_export]
macro_rules! loge {
    ($tag:expr, $($arg:tt)*) => {{
        $crate::logging::log_line($tag, &format!($($arg)*));
    }};
}
