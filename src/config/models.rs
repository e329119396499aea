// dbvault/src/config/models.rs
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    Mysql,
    Postgres,
    #[serde(alias = "mongodb")]
    Mongo,
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DatabaseKind::Mysql => "mysql",
            DatabaseKind::Postgres => "postgres",
            DatabaseKind::Mongo => "mongo",
        };
        f.write_str(name)
    }
}

/// A database server the backups are taken from or restored into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: String,
    pub name: String,
    #[serde(alias = "type")]
    pub kind: DatabaseKind,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Directory holding the dump/restore tools, e.g. `C:\Program Files\PostgreSQL\16\bin`.
    #[serde(default, alias = "binPath", skip_serializing_if = "Option::is_none")]
    pub tools_directory: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

impl Connection {
    pub fn password_or_empty(&self) -> &str {
        self.password.as_deref().unwrap_or("")
    }

    pub fn has_username(&self) -> bool {
        !self.username.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[serde(alias = "multiple-daily")]
    Daily,
    Weekly,
    Monthly,
}

/// A recurring backup of one database of one connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: String,
    pub connection_id: String,
    pub database: String,
    pub name: String,
    pub frequency: Frequency,
    /// `HH:MM`, used by weekly and monthly schedules.
    #[serde(default)]
    pub time: String,
    /// `HH:MM` entries, daily schedules only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub times: Option<Vec<String>>,
    /// 0-6, Sunday is 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<u8>,
    /// 1-31.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<u8>,
    #[serde(alias = "backupPath")]
    pub destination_directory: PathBuf,
    #[serde(default)]
    pub enabled: bool,
    /// 0 keeps backups forever.
    #[serde(default)]
    pub retention_days: i64,
    #[serde(default)]
    pub compress: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

impl Schedule {
    /// The time-of-day entries this schedule fires at.
    ///
    /// Daily schedules use `times`, falling back to `time` when the list is
    /// absent or empty; weekly and monthly schedules always use `time`.
    pub fn fire_times(&self) -> Vec<&str> {
        match (self.frequency, &self.times) {
            (Frequency::Daily, Some(times)) if !times.is_empty() => {
                times.iter().map(String::as_str).collect()
            }
            _ => vec![self.time.as_str()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Success,
    Failed,
}

/// Audit entry for one backup attempt. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: String,
    pub schedule_id: String,
    pub connection_id: String,
    pub backup_file: PathBuf,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub status: BackupStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

impl HistoryRecord {
    pub fn success(schedule: &Schedule, backup_file: PathBuf, size_bytes: Option<u64>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            schedule_id: schedule.id.clone(),
            connection_id: schedule.connection_id.clone(),
            backup_file,
            timestamp: Utc::now().timestamp_millis(),
            status: BackupStatus::Success,
            error: None,
            size_bytes,
        }
    }

    pub fn failed(schedule: &Schedule, backup_file: PathBuf, error: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            schedule_id: schedule.id.clone(),
            connection_id: schedule.connection_id.clone(),
            backup_file,
            timestamp: Utc::now().timestamp_millis(),
            status: BackupStatus::Failed,
            error: Some(error),
            size_bytes: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_connection_accepts_legacy_field_names() -> anyhow::Result<()> {
        let conn: Connection = serde_json::from_value(json!({
            "id": "c1",
            "name": "analytics",
            "type": "mongodb",
            "host": "localhost",
            "port": 27017,
            "username": "",
            "binPath": "/opt/mongo/bin",
            "createdAt": 1700000000000i64
        }))?;

        assert_eq!(conn.kind, DatabaseKind::Mongo);
        assert_eq!(conn.tools_directory, Some(PathBuf::from("/opt/mongo/bin")));
        assert!(!conn.has_username());
        assert_eq!(conn.password_or_empty(), "");
        Ok(())
    }

    #[test]
    fn test_connection_rejects_unknown_kind() {
        let result: Result<Connection, _> = serde_json::from_value(json!({
            "id": "c1", "name": "x", "kind": "oracle", "host": "h", "port": 1
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_daily_fire_times_default_to_time() -> anyhow::Result<()> {
        let mut schedule: Schedule = serde_json::from_value(json!({
            "id": "s1",
            "connectionId": "c1",
            "database": "shop",
            "name": "nightly",
            "frequency": "daily",
            "time": "02:15",
            "backupPath": "/var/backups",
            "enabled": true,
            "retentionDays": 7,
            "compress": false
        }))?;
        assert_eq!(schedule.fire_times(), vec!["02:15"]);
        assert_eq!(schedule.destination_directory, PathBuf::from("/var/backups"));

        schedule.times = Some(vec![]);
        assert_eq!(schedule.fire_times(), vec!["02:15"]);

        schedule.times = Some(vec!["00:00".to_string(), "12:00".to_string()]);
        assert_eq!(schedule.fire_times(), vec!["00:00", "12:00"]);

        schedule.frequency = Frequency::Weekly;
        assert_eq!(schedule.fire_times(), vec!["02:15"]);
        Ok(())
    }

    #[test]
    fn test_multiple_daily_alias() -> anyhow::Result<()> {
        let freq: Frequency = serde_json::from_value(json!("multiple-daily"))?;
        assert_eq!(freq, Frequency::Daily);
        Ok(())
    }

    #[test]
    fn test_history_record_serializes_camel_case() -> anyhow::Result<()> {
        let schedule: Schedule = serde_json::from_value(json!({
            "id": "s1", "connectionId": "c1", "database": "shop", "name": "n",
            "frequency": "weekly", "time": "01:00", "dayOfWeek": 1,
            "destinationDirectory": "/b"
        }))?;
        let record = HistoryRecord::failed(&schedule, PathBuf::from("/b/x.sql"), "boom".into());
        let value = serde_json::to_value(&record)?;

        assert_eq!(value["scheduleId"], "s1");
        assert_eq!(value["status"], "failed");
        assert_eq!(value["error"], "boom");
        assert!(value.get("sizeBytes").is_none());
        Ok(())
    }
}
