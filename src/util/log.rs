// src/util/log.rs

//! Logger Utility - file-based logging, the terminal belongs to ratatui
use std::fs::{File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::{LazyLock, OnceLock};
use chrono::Local;

pub static DEBUG_ENABLED: OnceLock<bool> = OnceLock::new();

/// Directory picked by `init` before the first log line is written.
static LOG_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Global logger instance. Falls back to a sink when the directory
/// cannot be created, so logging never takes the UI down.
pub static LOGGER: LazyLock<Logger> = LazyLock::new(|| {
    let dir = LOG_DIR.get().cloned().unwrap_or_else(|| PathBuf::from("./logs"));
    Logger::new(&dir).unwrap_or_else(|_| Logger::disabled())
});

/// Point the global logger at `log_dir`. Only the first call wins.
pub fn init(log_dir: &Path) {
    let _ = LOG_DIR.set(log_dir.to_path_buf());
    LazyLock::force(&LOGGER);
}

/// Log severity levels
#[derive(Debug, Clone, Copy)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    fn as_str(&self) -> &str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }

    fn filename(&self) -> &str {
        match self {
            LogLevel::Error => "error.log",
            LogLevel::Warn => "warn.log",
            LogLevel::Info => "info.log",
            LogLevel::Debug => "debug.log",
        }
    }
}

/// Logger that writes to separate files by severity
pub struct Logger {
    log_dir: Option<PathBuf>,
    error_file: Option<Mutex<File>>,
    warn_file: Option<Mutex<File>>,
    info_file: Option<Mutex<File>>,
    debug_file: Option<Mutex<File>>,
}

impl Logger {
    /// Create a new logger with the specified directory
    pub fn new(log_dir: &Path) -> std::io::Result<Self> {
        DEBUG_ENABLED.get_or_init(|| {
            std::env::var("DEBUG").unwrap_or_default() == "true"
        });

        create_dir_all(log_dir)?;

        // Start fresh each run
        let open = |level: LogLevel| -> std::io::Result<Option<Mutex<File>>> {
            Ok(Some(Mutex::new(File::create(log_dir.join(level.filename()))?)))
        };

        Ok(Self {
            log_dir: Some(log_dir.to_path_buf()),
            error_file: open(LogLevel::Error)?,
            warn_file: open(LogLevel::Warn)?,
            info_file: open(LogLevel::Info)?,
            debug_file: open(LogLevel::Debug)?,
        })
    }

    fn disabled() -> Self {
        Self {
            log_dir: None,
            error_file: None,
            warn_file: None,
            info_file: None,
            debug_file: None,
        }
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }

    /// Write a log entry to the appropriate file
    fn write_log(&self, level: LogLevel, message: &str) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let formatted = format!("[{}] [{}] {}\n", timestamp, level.as_str(), message);

        let file = match level {
            LogLevel::Error => &self.error_file,
            LogLevel::Warn => &self.warn_file,
            LogLevel::Info => &self.info_file,
            LogLevel::Debug => &self.debug_file,
        };

        if let Some(Ok(mut file)) = file.as_ref().map(|f| f.lock()) {
            let _ = file.write_all(formatted.as_bytes());
            let _ = file.flush();
        }
    }

    pub fn error(&self, message: &str) {
        self.write_log(LogLevel::Error, message);
    }

    pub fn warn(&self, message: &str) {
        self.write_log(LogLevel::Warn, message);
    }

    pub fn info(&self, message: &str) {
        self.write_log(LogLevel::Info, message);
    }

    pub fn debug(&self, message: &str) {
        self.write_log(LogLevel::Debug, message);
    }
}

/// Convenience macro for error logging with formatting
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        let message = format!($($arg)*);
        $crate::util::log::LOGGER.error(&message);
    }};
}

/// Convenience macro for warning logging with formatting
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        let message = format!($($arg)*);
        $crate::util::log::LOGGER.warn(&message);
    }};
}

/// Convenience macro for info logging with formatting
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        let message = format!($($arg)*);
        $crate::util::log::LOGGER.info(&message);
    }};
}

/// Convenience macro for debug logging with formatting
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        if *$crate::util::log::DEBUG_ENABLED.get().unwrap_or(&false) {
            let message = format!($($arg)*);
            $crate::util::log::LOGGER.debug(&message);
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_creation() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let logger = Logger::new(temp_dir.path()).expect("Failed to create logger");

        logger.error("Test error");
        logger.warn("Test warning");
        logger.info("Test info");
        logger.debug("Test debug");

        for name in ["error.log", "warn.log", "info.log", "debug.log"] {
            assert!(temp_dir.path().join(name).exists(), "{} missing", name);
        }

        let errors = std::fs::read_to_string(temp_dir.path().join("error.log")).unwrap();
        assert!(errors.contains("[ERROR] Test error"));
    }

    #[test]
    fn test_disabled_logger_is_silent() {
        let logger = Logger::disabled();
        logger.error("dropped");
        assert!(logger.log_dir().is_none());
    }
}
