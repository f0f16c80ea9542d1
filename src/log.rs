// Console and journal logging for az-hibernate-agent
// SPDX-License-Identifier: GPL-3.0-or-later

use libsystemd::logging::{journal_send, Priority};

pub const IDENTIFIER: &str = "az-hibernate-agent";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
    Debug,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERRO",
            Level::Debug => "DEBUG",
        }
    }

    fn priority(self) -> Priority {
        match self {
            Level::Info => Priority::Info,
            Level::Warn => Priority::Warning,
            Level::Error => Priority::Error,
            Level::Debug => Priority::Debug,
        }
    }
}

/// Logging configuration handed to every component.
///
/// `prefix` tags each console line with the program name, which matters when
/// the agent runs as a sleep hook and its output is interleaved with systemd's.
/// `journal` mirrors every message to the systemd journal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Logger {
    pub prefix: bool,
    pub journal: bool,
}

impl Logger {
    pub fn new(prefix: bool, journal: bool) -> Self {
        Self { prefix, journal }
    }

    /// Logger that writes nothing but the console, without prefix.
    pub fn console() -> Self {
        Self::default()
    }

    pub fn format_line(&self, level: Level, msg: &str) -> String {
        if self.prefix {
            format!("{}: {}: {}", IDENTIFIER, level.tag(), msg)
        } else {
            format!("{}: {}", level.tag(), msg)
        }
    }

    pub fn emit(&self, level: Level, msg: &str) {
        if level == Level::Debug && std::env::var_os("DEBUG").is_none() {
            return;
        }

        if self.journal {
            let vars = [("SYSLOG_IDENTIFIER", IDENTIFIER)];
            let _ = journal_send(level.priority(), msg, vars.into_iter());
        }

        let line = self.format_line(level, msg);
        match level {
            Level::Info => println!("{}", line),
            _ => eprintln!("{}", line),
        }
    }
}

#[macro_export]
macro_rules! info {
    ($log:expr, $($arg:tt)*) => {
        $log.emit($crate::log::Level::Info, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! warn {
    ($log:expr, $($arg:tt)*) => {
        $log.emit($crate::log::Level::Warn, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! error {
    ($log:expr, $($arg:tt)*) => {
        $log.emit($crate::log::Level::Error, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! debug {
    ($log:expr, $($arg:tt)*) => {
        $log.emit($crate::log::Level::Debug, &format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_line_without_prefix() {
        let log = Logger::console();
        assert_eq!(log.format_line(Level::Info, "hello"), "INFO: hello");
        assert_eq!(log.format_line(Level::Error, "boom"), "ERRO: boom");
    }

    #[test]
    fn test_format_line_with_prefix() {
        let log = Logger::new(true, false);
        assert_eq!(
            log.format_line(Level::Warn, "careful"),
            "az-hibernate-agent: WARN: careful"
        );
    }
}
