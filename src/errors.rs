use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("Unsupported database kind: {0}")]
    UnsupportedDatabaseKind(String),

    #[error("Invalid schedule {schedule_id}: {reason}")]
    InvalidSchedule { schedule_id: String, reason: String },

    #[error("Dump failed (exit code {}): {stderr}", display_code(.exit_code))]
    DumpFailed { exit_code: Option<i32>, stderr: String },

    #[error("Compression failed for {path}: {reason}")]
    CompressionFailed { path: PathBuf, reason: String },

    #[error("Backup file not found: {0}")]
    ArtifactNotFound(PathBuf),

    #[error("Empty archive (no valid files found): {0}")]
    EmptyArchive(PathBuf),

    #[error("Restore failed (exit code {}): {stderr}", display_code(.exit_code))]
    RestoreFailed { exit_code: Option<i32>, stderr: String },

    #[error("SQL import failed: {0}")]
    ImportFailed(String),

    #[error("Connection check failed for {connection}: {reason}")]
    ConnectionCheck { connection: String, reason: String },

    #[error("Failed to launch {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Directory walk error: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
