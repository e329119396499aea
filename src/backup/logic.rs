// dbvault/src/backup/logic.rs
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{error, info};

use super::archive::compress_artifact;
use super::db_dump::{artifact_path, dump_database};
use crate::config::{Catalog, HistoryRecord, Schedule};
use crate::errors::Result;
use crate::utils::{BinaryResolver, disk_usage};

/// Filesystem-safe, sortable rendering of `now`: `2024-05-01T10-00-00`.
pub fn backup_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H-%M-%S").to_string()
}

/// Runs single backups and records each attempt in the history log.
#[derive(Clone)]
pub struct BackupExecutor {
    catalog: Catalog,
    resolver: BinaryResolver,
}

impl BackupExecutor {
    pub fn new(catalog: Catalog, resolver: BinaryResolver) -> Self {
        Self { catalog, resolver }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Dumps the schedule's database, compresses it if requested and appends
    /// exactly one history record, success or failure. Errors are returned
    /// after the failure has been recorded.
    pub async fn run_backup(&self, schedule: &Schedule) -> Result<HistoryRecord> {
        info!(schedule = %schedule.name, id = %schedule.id, "Starting backup");

        let timestamp = backup_timestamp(Utc::now());
        let mut recorded = schedule
            .destination_directory
            .join(format!("{}_{}.sql", schedule.database, timestamp));

        match self.execute(schedule, &timestamp, &mut recorded).await {
            Ok(()) => {
                let size = artifact_size(&recorded).await;
                let record = HistoryRecord::success(schedule, recorded, size);
                self.save(&record);
                info!(schedule = %schedule.name, file = %record.backup_file.display(), "Backup completed successfully");
                Ok(record)
            }
            Err(e) => {
                error!(schedule = %schedule.name, error = %e, "Backup failed");
                self.save(&HistoryRecord::failed(schedule, recorded, e.to_string()));
                Err(e)
            }
        }
    }

    async fn execute(&self, schedule: &Schedule, timestamp: &str, recorded: &mut PathBuf) -> Result<()> {
        let conn = self.catalog.find_connection(&schedule.connection_id)?;
        let dest = &schedule.destination_directory;

        tokio::fs::create_dir_all(dest).await?;
        *recorded = artifact_path(conn.kind, dest, &schedule.database, timestamp);

        let artifact = dump_database(&self.resolver, &conn, &schedule.database, dest, timestamp).await?;
        *recorded = artifact.clone();

        if schedule.compress {
            *recorded = compress_artifact(&artifact).await?;
        }
        Ok(())
    }

    fn save(&self, record: &HistoryRecord) {
        // A lost audit entry must not turn a finished backup into a failure.
        if let Err(e) = self.catalog.append_history(record) {
            error!(record = %record.id, error = %e, "Failed to save history record");
        }
    }
}

async fn artifact_size(path: &Path) -> Option<u64> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || disk_usage(&path).ok())
        .await
        .ok()
        .flatten()
}
