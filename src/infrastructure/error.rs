use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Failed to fetch calendar {url} after {attempts} attempt(s): {cause}")]
    Transport {
        url: String,
        attempts: usize,
        cause: String,
    },
    #[error("Import rejected: {valid} valid, {rejected} rejected record(s); {message}")]
    Validation {
        valid: usize,
        rejected: usize,
        message: String,
    },
    #[error("Sync interval must be at least 1 minute (got {minutes})")]
    IntervalTooShort { minutes: i64 },
    #[error("Parse error: {0}")]
    Parse(String),
}
