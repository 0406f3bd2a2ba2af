//! Dual-mode log sink: plain terminal output when run standalone, or
//! forwarded over a channel when embedded under an external dashboard.

use crossbeam_channel::{Receiver, Sender};
use std::fmt::Display;
use std::sync::{Mutex, OnceLock};

/// Severity of a log message, ordered roughly by urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Debug => write!(f, "[DEBUG]"),
            Severity::Info => write!(f, "[INFO]"),
            Severity::Warn => write!(f, "[WARN]"),
            Severity::Error => write!(f, "[ERROR]"),
            Severity::Critical => write!(f, "[CRITICAL]"),
        }
    }
}

/// A single log record, as forwarded to an embedding dashboard.
#[derive(Debug, Clone)]
pub struct LogMessage {
    pub level: Severity,
    pub text: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl LogMessage {
    fn new(level: Severity, text: String) -> Self {
        LogMessage {
            level,
            text,
            timestamp: chrono::Utc::now(),
        }
    }
}

impl Display for LogMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.level, self.text)
    }
}

enum LoggerMode {
    Standalone,
    Embedded(Sender<LogMessage>),
}

pub struct Logger {
    mode: Mutex<LoggerMode>,
}

impl Logger {
    fn new_standalone() -> Self {
        Logger {
            mode: Mutex::new(LoggerMode::Standalone),
        }
    }

    /// Switches this logger to forward every record on `sender` instead of
    /// printing it. Used when an external dashboard wants a live feed.
    pub fn set_embedded_mode(&self, sender: Sender<LogMessage>) {
        *self.mode.lock().unwrap() = LoggerMode::Embedded(sender);
    }

    pub fn set_standalone_mode(&self) {
        *self.mode.lock().unwrap() = LoggerMode::Standalone;
    }

    fn log(&self, level: Severity, msg: String) {
        let mode = self.mode.lock().unwrap();
        match &*mode {
            LoggerMode::Standalone => {
                let line = LogMessage::new(level, msg);
                if matches!(level, Severity::Error | Severity::Critical) {
                    eprintln!("{line}");
                } else {
                    println!("{line}");
                }
            }
            LoggerMode::Embedded(sender) => {
                let line = LogMessage::new(level, msg);
                if sender.try_send(line.clone()).is_err() {
                    eprintln!("{line}");
                }
            }
        }
    }

    pub fn debug(&self, msg: String) {
        self.log(Severity::Debug, msg);
    }
    pub fn info(&self, msg: String) {
        self.log(Severity::Info, msg);
    }
    pub fn warn(&self, msg: String) {
        self.log(Severity::Warn, msg);
    }
    pub fn error(&self, msg: String) {
        self.log(Severity::Error, msg);
    }
    pub fn critical(&self, msg: String) {
        self.log(Severity::Critical, msg);
    }
}

static GLOBAL_LOGGER: OnceLock<Logger> = OnceLock::new();

pub fn init_standalone() {
    let _ = GLOBAL_LOGGER.set(Logger::new_standalone());
}

/// Initializes the global logger already wired to forward to `sender`.
pub fn init_embedded(sender: Sender<LogMessage>) {
    let logger = GLOBAL_LOGGER.get_or_init(Logger::new_standalone);
    logger.set_embedded_mode(sender);
}

/// Creates the channel pair a dashboard should hand to [`init_embedded`].
pub fn create_log_channel() -> (Sender<LogMessage>, Receiver<LogMessage>) {
    crossbeam_channel::unbounded()
}

pub fn get_logger() -> &'static Logger {
    GLOBAL_LOGGER.get_or_init(Logger::new_standalone)
}

pub fn set_embedded_mode(sender: Sender<LogMessage>) {
    get_logger().set_embedded_mode(sender);
}

pub fn set_standalone_mode() {
    get_logger().set_standalone_mode();
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logger::get_logger().debug(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logger::get_logger().info(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logger::get_logger().warn(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logger::get_logger().error(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_critical {
    ($($arg:tt)*) => {
        $crate::logger::get_logger().critical(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_mode_forwards_records() {
        let logger = Logger::new_standalone();
        let (tx, rx) = crossbeam_channel::unbounded();
        logger.set_embedded_mode(tx);
        logger.warn("device offline".to_string());
        let received = rx.try_recv().expect("message forwarded");
        assert_eq!(received.level, Severity::Warn);
        assert_eq!(received.text, "device offline");
    }

    #[test]
    fn standalone_mode_does_not_panic() {
        let logger = Logger::new_standalone();
        logger.info("hello".to_string());
        logger.critical("uh oh".to_string());
    }
}
