use anyhow::{Context, Result};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use time::{macros::format_description, OffsetDateTime};

const LOG_CAPACITY: usize = 400;

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// Application log: a bounded list of recent entries mirrored to a file.
#[derive(Debug)]
pub struct AppLog {
    entries: Vec<LogEntry>,
    path: Option<PathBuf>,
}

impl AppLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            entries: Vec::new(),
            path: Some(path),
        }
    }

    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            entries: Vec::new(),
            path: None,
        }
    }

    #[cfg(test)]
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Info, message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Warn, message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Error, message.into());
    }

    /// Last `lines` lines of the log file, or of this session when there is no file yet.
    pub fn tail_text(&self, lines: usize) -> Result<String> {
        if lines == 0 {
            return Ok(String::new());
        }
        let raw = self.text()?;
        let entries: Vec<&str> = raw.lines().collect();
        let start = entries.len().saturating_sub(lines);
        Ok(entries[start..].join("\n"))
    }

    fn text(&self) -> Result<String> {
        if let Some(path) = self.path.as_ref().filter(|path| path.exists()) {
            return fs::read_to_string(path).context("read log file");
        }
        Ok(self
            .entries
            .iter()
            .map(|entry| format!("[{}] {}", entry.level.label(), entry.message))
            .collect::<Vec<String>>()
            .join("\n"))
    }

    fn push(&mut self, level: LogLevel, message: String) {
        if let Some(path) = &self.path {
            let _ = append_log_file(path, level, &message);
        }

        self.entries.push(LogEntry { level, message });
        if self.entries.len() > LOG_CAPACITY {
            let overflow = self.entries.len() - LOG_CAPACITY;
            self.entries.drain(0..overflow);
        }
    }
}

fn append_log_file(path: &Path, level: LogLevel, message: &str) -> std::io::Result<()> {
    let label = level.label();
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{} [{label}] {message}", timestamp())
}

fn timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    now.format(&format).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_drops_oldest_entries() {
        let mut log = AppLog::in_memory();
        for index in 0..LOG_CAPACITY + 5 {
            log.info(format!("line {index}"));
        }
        assert_eq!(log.entries().len(), LOG_CAPACITY);
        assert_eq!(log.entries()[0].message, "line 5");
        assert_eq!(log.tail_text(1).unwrap(), format!("[INFO] line {}", LOG_CAPACITY + 4));
    }

    #[test]
    fn entries_are_appended_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let mut log = AppLog::new(path.clone());
        log.info("first");
        log.warn("second");

        let raw = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("[INFO] first"));
        let (stamp, rest) = lines[0].split_at(19);
        assert_eq!(rest, " [INFO] first");
        for (index, ch) in stamp.char_indices() {
            match index {
                4 | 7 => assert_eq!(ch, '-'),
                10 => assert_eq!(ch, ' '),
                13 | 16 => assert_eq!(ch, ':'),
                _ => assert!(ch.is_ascii_digit(), "bad timestamp {stamp}"),
            }
        }
        assert!(lines[1].ends_with("[WARN] second"));
        assert!(log.tail_text(1).unwrap().ends_with("[WARN] second"));
        assert_eq!(log.tail_text(5).unwrap().lines().count(), 2);
    }
}
