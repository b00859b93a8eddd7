use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const COMMAND_LOG_FILE: &str = "commands.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Error => "error",
        }
    }
}

pub trait CommandLog: Send + Sync {
    fn log(&self, level: LogLevel, command: &str, message: &str);

    fn info(&self, command: &str, message: &str) {
        self.log(LogLevel::Info, command, message);
    }

    fn error(&self, command: &str, message: &str) {
        self.log(LogLevel::Error, command, message);
    }
}

#[derive(Debug)]
pub struct JsonLinesCommandLog {
    path: PathBuf,
    guard: Mutex<()>,
}

impl JsonLinesCommandLog {
    pub fn new(logs_dir: impl AsRef<Path>) -> Self {
        Self {
            path: logs_dir.as_ref().join(COMMAND_LOG_FILE),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CommandLog for JsonLinesCommandLog {
    fn log(&self, level: LogLevel, command: &str, message: &str) {
        let Ok(_guard) = self.guard.lock() else {
            return;
        };
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level.as_str(),
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(file, "{}", payload);
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCommandLog;

impl CommandLog for NoopCommandLog {
    fn log(&self, _level: LogLevel, _command: &str, _message: &str) {}
}

#[derive(Debug, Default)]
pub struct MemoryCommandLog {
    entries: Mutex<Vec<(LogLevel, String, String)>>,
}

impl MemoryCommandLog {
    pub fn entries(&self) -> Vec<(LogLevel, String, String)> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl CommandLog for MemoryCommandLog {
    fn log(&self, level: LogLevel, command: &str, message: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((level, command.to_string(), message.to_string()));
        }
    }
}
