use log::{Log, Metadata, Record};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::config::LoggingSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub message: String,
    pub target: Option<String>,
}

/// Bounded ring buffer of recent log entries, for wrappers that surface the
/// engine's log without tailing stderr.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    max_size: usize,
}

impl LogBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        if self.entries.len() >= self.max_size {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn get_entries(&self, limit: Option<usize>, level_filter: Option<&str>) -> Vec<LogEntry> {
        let filtered: Vec<LogEntry> = self
            .entries
            .iter()
            .filter(|e| {
                level_filter
                    .map(|f| e.level.eq_ignore_ascii_case(f))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        if let Some(limit) = limit {
            filtered.into_iter().rev().take(limit).rev().collect()
        } else {
            filtered
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

pub type SharedLogBuffer = Arc<Mutex<LogBuffer>>;

pub fn format_timestamp() -> String {
    let now = SystemTime::now();
    let datetime = chrono::DateTime::<chrono::Local>::from(now);
    datetime.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/// Logger that captures entries to a buffer and mirrors them to stderr.
pub struct CapturingLogger {
    buffer: SharedLogBuffer,
    level: log::LevelFilter,
}

impl CapturingLogger {
    pub fn new(buffer: SharedLogBuffer, level: log::LevelFilter) -> Self {
        Self { buffer, level }
    }
}

impl Log for CapturingLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let message = format!("{}", record.args());
        let timestamp = format_timestamp();
        let level = record.level().to_string();
        let target = record.target().to_string();

        eprintln!("[{}] [{}] {} - {}", timestamp, level, target, message);

        if let Ok(mut buf) = self.buffer.lock() {
            buf.push(LogEntry {
                timestamp,
                level,
                message,
                target: Some(target),
            });
        }
    }

    fn flush(&self) {}
}

fn parse_level(level: &str) -> log::LevelFilter {
    match level.to_lowercase().as_str() {
        "off" => log::LevelFilter::Off,
        "error" => log::LevelFilter::Error,
        "warn" => log::LevelFilter::Warn,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    }
}

/// Install the capturing logger per the config's `logging` section and hand
/// back the buffer. A second call leaves the already-installed logger in
/// place.
pub fn init_logger(settings: &LoggingSettings) -> SharedLogBuffer {
    let buffer: SharedLogBuffer = Arc::new(Mutex::new(LogBuffer::new(settings.buffer_size)));
    let level = parse_level(&settings.level);
    let logger = CapturingLogger::new(Arc::clone(&buffer), level);

    match log::set_boxed_logger(Box::new(logger)) {
        Ok(_) => log::set_max_level(level),
        Err(e) => {
            eprintln!("logger already installed: {}", e);
            log::set_max_level(level);
        }
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(level: &str, message: &str) -> LogEntry {
        LogEntry {
            timestamp: format_timestamp(),
            level: level.to_string(),
            message: message.to_string(),
            target: None,
        }
    }

    #[test]
    fn buffer_evicts_oldest_beyond_capacity() {
        let mut buffer = LogBuffer::new(2);
        buffer.push(entry("INFO", "first"));
        buffer.push(entry("INFO", "second"));
        buffer.push(entry("INFO", "third"));

        let entries = buffer.get_entries(None, None);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "second");
        assert_eq!(entries[1].message, "third");
    }

    #[test]
    fn level_filter_and_limit() {
        let mut buffer = LogBuffer::new(10);
        buffer.push(entry("INFO", "a"));
        buffer.push(entry("ERROR", "b"));
        buffer.push(entry("ERROR", "c"));

        let errors = buffer.get_entries(None, Some("error"));
        assert_eq!(errors.len(), 2);

        let last = buffer.get_entries(Some(1), Some("error"));
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].message, "c");
    }

    #[test]
    fn level_parsing_defaults_to_info() {
        assert_eq!(parse_level("warn"), log::LevelFilter::Warn);
        assert_eq!(parse_level("bogus"), log::LevelFilter::Info);
    }
}
