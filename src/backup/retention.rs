// dbvault/src/backup/retention.rs
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info};

use super::db_dump::{LEGACY_MONGO_DUMP_PREFIX, MONGO_DUMP_PREFIX};
use crate::config::Schedule;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

/// Whether a directory entry is something a backup run could have produced.
pub fn is_backup_artifact(name: &str, is_dir: bool) -> bool {
    if is_dir {
        name.starts_with(MONGO_DUMP_PREFIX) || name.starts_with(LEGACY_MONGO_DUMP_PREFIX)
    } else {
        name.ends_with(".sql") || name.ends_with(".zip") || name.ends_with(".gz")
    }
}

/// Deletes backups under the schedule's destination that outlived its retention.
///
/// Best-effort: per-entry failures are logged and skipped, and nothing is
/// ever returned as an error.
pub async fn sweep(schedule: &Schedule) -> SweepReport {
    if schedule.retention_days <= 0 {
        return SweepReport::default();
    }
    let Some(max_age) = retention_window(schedule.retention_days) else {
        debug!(
            schedule = %schedule.name,
            retention_days = schedule.retention_days,
            "Retention window exceeds the clock range, nothing expires"
        );
        return SweepReport::default();
    };
    info!(
        schedule = %schedule.name,
        retention_days = schedule.retention_days,
        "Cleaning up old backups"
    );
    sweep_directory(&schedule.destination_directory, max_age, SystemTime::now()).await
}

/// Age after which a backup expires; `None` when nothing ever does.
pub fn retention_window(retention_days: i64) -> Option<Duration> {
    let days = u64::try_from(retention_days).ok().filter(|d| *d > 0)?;
    days.checked_mul(SECONDS_PER_DAY).map(Duration::from_secs)
}

pub async fn sweep_directory(dir: &Path, max_age: Duration, now: SystemTime) -> SweepReport {
    let mut report = SweepReport::default();
    let cutoff = match now.checked_sub(max_age) {
        Some(cutoff) => cutoff,
        None => return report,
    };

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            error!(dir = %dir.display(), error = %e, "Cleanup failed: cannot list backup directory");
            return report;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                error!(dir = %dir.display(), error = %e, "Cleanup stopped while listing directory");
                break;
            }
        };
        let path = entry.path();

        match remove_if_stale(&path, cutoff).await {
            Ok(true) => {
                info!(path = %path.display(), "Deleted old backup");
                report.deleted.push(path);
            }
            Ok(false) => {}
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to process backup entry");
                report.failed.push(path);
            }
        }
    }

    if report.deleted.is_empty() {
        debug!(dir = %dir.display(), "No old backups to delete");
    } else {
        info!(dir = %dir.display(), deleted = report.deleted.len(), "Cleanup completed");
    }
    report
}

async fn remove_if_stale(path: &Path, cutoff: SystemTime) -> std::io::Result<bool> {
    let metadata = tokio::fs::symlink_metadata(path).await?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if !is_backup_artifact(&name, metadata.is_dir()) || metadata.modified()? >= cutoff {
        return Ok(false);
    }

    if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await?;
    } else {
        tokio::fs::remove_file(path).await?;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(SECONDS_PER_DAY);

    fn age(path: &Path, days: u64) -> anyhow::Result<()> {
        let when = SystemTime::now() - DAY * days as u32;
        File::open(path)?.set_modified(when)?;
        Ok(())
    }

    fn schedule_for(dir: &Path, retention_days: i64) -> Schedule {
        serde_json::from_value(serde_json::json!({
            "id": "s1",
            "connectionId": "c1",
            "database": "shop",
            "name": "nightly",
            "frequency": "daily",
            "time": "00:00",
            "destinationDirectory": dir,
            "enabled": true,
            "retentionDays": retention_days,
            "compress": false
        }))
        .expect("valid schedule")
    }

    #[test]
    fn test_artifact_patterns() {
        assert!(is_backup_artifact("shop_2024.sql", false));
        assert!(is_backup_artifact("shop_2024.sql.gz", false));
        assert!(is_backup_artifact("mongo_2024.zip", false));
        assert!(is_backup_artifact("mongo_2024", true));
        assert!(is_backup_artifact("mongodb_2024", true));
        assert!(!is_backup_artifact("notes.txt", false));
        assert!(!is_backup_artifact("archive", true));
        assert!(!is_backup_artifact("mongo_2024", false));
    }

    #[tokio::test]
    async fn test_young_file_survives_old_file_deleted() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let young = dir.path().join("shop_young.sql");
        let old = dir.path().join("shop_old.sql");
        fs::write(&young, "--")?;
        fs::write(&old, "--")?;
        age(&young, 2)?;
        age(&old, 10)?;

        let report = sweep(&schedule_for(dir.path(), 7)).await;

        assert!(young.exists());
        assert!(!old.exists());
        assert_eq!(report.deleted, vec![old]);
        assert!(report.failed.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_zero_retention_deletes_nothing() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let ancient = dir.path().join("shop_ancient.sql");
        fs::write(&ancient, "--")?;
        age(&ancient, 400)?;

        let report = sweep(&schedule_for(dir.path(), 0)).await;

        assert!(ancient.exists());
        assert_eq!(report, SweepReport::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_unrecognized_entries_are_kept() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let notes = dir.path().join("README.txt");
        let other_dir = dir.path().join("exports");
        fs::write(&notes, "keep me")?;
        fs::create_dir(&other_dir)?;
        age(&notes, 30)?;
        age(&other_dir, 30)?;

        let report = sweep(&schedule_for(dir.path(), 1)).await;

        assert!(notes.exists());
        assert!(other_dir.exists());
        assert!(report.deleted.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_old_mongo_directory_removed_recursively() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let dump = dir.path().join("mongo_2020-01-01T00-00-00");
        fs::create_dir_all(dump.join("shop"))?;
        fs::write(dump.join("shop").join("orders.bson"), b"x")?;
        age(&dump, 9)?;

        sweep(&schedule_for(dir.path(), 3)).await;

        assert!(!dump.exists());
        Ok(())
    }

    #[test]
    fn test_retention_window_bounds() {
        assert_eq!(retention_window(0), None);
        assert_eq!(retention_window(-3), None);
        assert_eq!(retention_window(2), Some(Duration::from_secs(2 * SECONDS_PER_DAY)));
        assert_eq!(retention_window(213_503_982_334_602), None);
        assert_eq!(retention_window(i64::MAX), None);
    }

    #[tokio::test]
    async fn test_huge_retention_keeps_everything() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let old = dir.path().join("shop_2020-01-01T00-00-00.sql");
        fs::write(&old, "SELECT 1;")?;
        age(&old, 30)?;

        let report = sweep(&schedule_for(dir.path(), 213_503_982_334_602)).await;

        assert!(old.exists());
        assert_eq!(report, SweepReport::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_directory_is_not_an_error() {
        let report = sweep(&schedule_for(Path::new("/nonexistent/dbvault/backups"), 5)).await;
        assert_eq!(report, SweepReport::default());
    }
}
