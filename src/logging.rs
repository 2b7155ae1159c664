//! Structured logging for bluelink
//!
//! A process-wide logger with chrono timestamps, an optional file sink and
//! selective debug output per area.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once, RwLock};
use std::time::{Duration, Instant};

use chrono::Local;
use log::{Level, LevelFilter, Metadata, Record};

use crate::config::LogLevel;

/// Timestamp format for log entries
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Global initialization guard
static INIT_LOGGER: Once = Once::new();

/// Debug flag categories for selective logging
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugFlags {
    pub discovery: bool,  // Scan requests, payload fan-out, idle timer
    pub connection: bool, // Connection sessions and handles
    pub all: bool,
}

impl DebugFlags {
    /// Parse a comma separated category list such as `discovery,connection`
    ///
    /// Unknown categories are returned as the error.
    pub fn parse(categories: &str) -> Result<Self, String> {
        let mut flags = Self::default();
        for category in categories.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            match category {
                "discovery" => flags.discovery = true,
                "connection" => flags.connection = true,
                "all" => flags.all = true,
                other => return Err(other.to_string()),
            }
        }
        Ok(flags)
    }
}

/// Global debug flags storage
static DEBUG_FLAGS: RwLock<DebugFlags> = RwLock::new(DebugFlags {
    discovery: false,
    connection: false,
    all: false,
});

/// Custom logger implementation for bluelink
pub struct BluelinkLogger {
    file: Option<Mutex<File>>,
    level: LevelFilter,
    console_output: bool,
}

impl log::Log for BluelinkLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        if metadata.level() > self.level {
            return false;
        }

        // Debug output is opt-in per area
        if metadata.level() == Level::Debug {
            return should_log_debug(metadata.target());
        }
        true
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        if self.console_output {
            let _ = io::stderr().write_all(format_entry(record, true).as_bytes());
        }

        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(format_entry(record, false).as_bytes());
                let _ = file.flush();
            }
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
    }
}

/// Render one log line, with ANSI colors for the console
fn format_entry(record: &Record, colored: bool) -> String {
    let level = match (record.level(), colored) {
        (Level::Error, true) => "\x1B[31mERROR\x1B[0m",
        (Level::Warn, true) => "\x1B[33mWARN \x1B[0m",
        (Level::Info, true) => "\x1B[32mINFO \x1B[0m",
        (Level::Debug, true) => "\x1B[36mDEBUG\x1B[0m",
        (Level::Trace, true) => "\x1B[90mTRACE\x1B[0m",
        (Level::Error, false) => "ERROR",
        (Level::Warn, false) => "WARN ",
        (Level::Info, false) => "INFO ",
        (Level::Debug, false) => "DEBUG",
        (Level::Trace, false) => "TRACE",
    };

    format!(
        "[{}] {} [{}] {}\n",
        Local::now().format(TIMESTAMP_FORMAT),
        level,
        record.module_path().unwrap_or("<unknown>"),
        record.args()
    )
}

fn level_filter(level: LogLevel) -> LevelFilter {
    match level {
        LogLevel::Error => LevelFilter::Error,
        LogLevel::Warn => LevelFilter::Warn,
        LogLevel::Info => LevelFilter::Info,
        LogLevel::Debug => LevelFilter::Debug,
        LogLevel::Trace => LevelFilter::Trace,
    }
}

fn open_log_file(path: &Path) -> Result<File, String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create log directory: {}", e))?;
        }
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("Failed to open log file: {}", e))
}

/// Configure logging with the specified level and optionally a log file
///
/// Only the first call in a process installs a logger; later calls are no-ops.
pub fn configure_logging(
    level: LogLevel,
    log_file: Option<PathBuf>,
    console_output: bool,
) -> Result<(), String> {
    let mut result = Ok(());

    INIT_LOGGER.call_once(|| {
        let file = match log_file.as_deref().map(open_log_file).transpose() {
            Ok(file) => file.map(Mutex::new),
            Err(e) => {
                result = Err(e);
                return;
            }
        };

        let filter = level_filter(level);
        let logger = Box::new(BluelinkLogger {
            file,
            level: filter,
            console_output,
        });

        if let Err(e) = log::set_boxed_logger(logger) {
            result = Err(format!("Failed to set logger: {}", e));
            return;
        }
        log::set_max_level(filter);

        log::info!("Logging initialized at level: {}", level);
        if let Some(path) = &log_file {
            log::info!("Log file: {}", path.display());
        }
    });

    result
}

/// Set global debug flags for selective logging
pub fn set_debug_flags(flags: DebugFlags) {
    if let Ok(mut debug_flags) = DEBUG_FLAGS.write() {
        *debug_flags = flags;
    }
}

/// Check if a debug category should log based on the module path and global flags
pub fn should_log_debug(module_path: &str) -> bool {
    if let Ok(flags) = DEBUG_FLAGS.read() {
        if flags.all {
            return true;
        }

        if module_path.contains("::discovery")
            || module_path.contains("::platform")
            || module_path.contains("::coordinator")
        {
            return flags.discovery;
        }
        if module_path.contains("::connection") || module_path.contains("::adapter") {
            return flags.connection;
        }
    }
    false
}

/// Times an operation and logs its duration when finished
pub struct PerformanceLogger {
    component: String,
    operation: String,
    start_time: Instant,
}

impl PerformanceLogger {
    pub fn new<S: Into<String>>(component: S, operation: S) -> Self {
        Self {
            component: component.into(),
            operation: operation.into(),
            start_time: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Finish timing and log result
    pub fn finish(self) -> Duration {
        let duration = self.elapsed();
        log::debug!(
            "[{}::{}] completed in {:?}",
            self.component,
            self.operation,
            duration
        );
        duration
    }

    /// Finish timing, tagging the entry with how the operation ended
    pub fn finish_with_context(self, context: &str) -> Duration {
        let duration = self.elapsed();
        log::debug!(
            "[{}::{}] {} after {:?}",
            self.component,
            self.operation,
            context,
            duration
        );
        duration
    }
}
