// dbvault/src/restore/db_restore.rs
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::sql_import::{ImportReport, import_sql_file};
use crate::config::{Connection, DatabaseKind};
use crate::errors::{AppError, Result};
use crate::utils::BinaryResolver;
use crate::utils::process::ToolCommand;

pub const POSTGRES_RESTORE_TOOL: &str = "psql";
pub const MONGO_RESTORE_TOOL: &str = "mongorestore";

/// What a restore strategy did, for the caller to report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Imported(ImportReport),
    ToolCompleted { tool: String },
}

pub fn postgres_restore_command(
    resolver: &BinaryResolver,
    conn: &Connection,
    database: &str,
    sql_file: &Path,
) -> ToolCommand {
    let bin = resolver.resolve(POSTGRES_RESTORE_TOOL, conn.tools_directory.as_deref());
    ToolCommand::new(POSTGRES_RESTORE_TOOL, bin)
        .arg("-h")
        .arg(&conn.host)
        .arg("-p")
        .arg(conn.port.to_string())
        .arg("-U")
        .arg(&conn.username)
        .arg("-d")
        .arg(database)
        .arg("-f")
        .arg(sql_file)
        .env("PGPASSWORD", conn.password_or_empty())
}

/// `--drop` makes mongorestore replace every collection it restores.
pub fn mongo_restore_command(
    resolver: &BinaryResolver,
    conn: &Connection,
    database: &str,
    source: &Path,
) -> ToolCommand {
    let bin = resolver.resolve(MONGO_RESTORE_TOOL, conn.tools_directory.as_deref());
    let mut cmd = ToolCommand::new(MONGO_RESTORE_TOOL, bin)
        .arg("--host")
        .arg(format!("{}:{}", conn.host, conn.port));
    if conn.has_username() {
        cmd = cmd
            .arg("-u")
            .arg(&conn.username)
            .arg("-p")
            .arg(conn.password_or_empty());
    }
    cmd.arg("--db").arg(database).arg("--drop").arg(source)
}

/// A `mongodump --out` root holds one sub-directory per database; `--db`
/// wants the database directory itself. Descend when the root holds exactly
/// one directory and no BSON files of its own.
pub async fn mongo_restore_source(path: &Path) -> Result<PathBuf> {
    if !tokio::fs::metadata(path).await?.is_dir() {
        return Ok(path.to_path_buf());
    }

    let mut dirs = Vec::new();
    let mut has_bson = false;
    let mut entries = tokio::fs::read_dir(path).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        if entry.file_type().await?.is_dir() {
            dirs.push(entry.path());
        } else if name.ends_with(".bson") || name.ends_with(".bson.gz") {
            has_bson = true;
        }
    }

    match (has_bson, dirs.len()) {
        (false, 1) => {
            let inner = dirs.remove(0);
            debug!(path = %inner.display(), "Using database directory inside dump root");
            Ok(inner)
        }
        _ => Ok(path.to_path_buf()),
    }
}

/// Runs the restore strategy for `conn.kind` against `database`.
pub async fn restore_database(
    resolver: &BinaryResolver,
    conn: &Connection,
    database: &str,
    source: &Path,
) -> Result<RestoreOutcome> {
    info!(kind = %conn.kind, database, source = %source.display(), "Restoring database");

    let command = match conn.kind {
        DatabaseKind::Mysql => {
            let report = import_sql_file(conn, database, source).await?;
            return Ok(RestoreOutcome::Imported(report));
        }
        DatabaseKind::Postgres => postgres_restore_command(resolver, conn, database, source),
        DatabaseKind::Mongo => {
            let source = mongo_restore_source(source).await?;
            mongo_restore_command(resolver, conn, database, &source)
        }
    };

    let tool = command.tool().to_string();
    let output = command.run().await?;
    if !output.success() {
        return Err(AppError::RestoreFailed {
            exit_code: output.exit_code,
            stderr: output.stderr,
        });
    }
    Ok(RestoreOutcome::ToolCompleted { tool })
}
