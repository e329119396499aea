// dbvault/src/config/store.rs
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::models::{Connection, HistoryRecord, Schedule};
use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    Connections,
    Schedules,
    History,
}

impl StoreKey {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreKey::Connections => "connections",
            StoreKey::Schedules => "schedules",
            StoreKey::History => "history",
        }
    }
}

/// Whole-collection key-value persistence.
///
/// Implementations serialize their own writers; callers never page or stream.
pub trait ConfigStore: Send + Sync {
    fn get(&self, key: StoreKey) -> Result<Vec<Value>>;
    fn set(&self, key: StoreKey, items: Vec<Value>) -> Result<()>;
}

/// Keeps every collection in a single JSON document on disk.
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<Map<String, Value>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&content)? {
            Value::Object(map) => Ok(map),
            _ => Err(AppError::Store(format!(
                "Store file {} does not contain a JSON object",
                self.path.display()
            ))),
        }
    }

    fn write_document(&self, document: &Map<String, Value>) -> Result<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let mut tmp = NamedTempFile::new_in(&parent)?;
        serde_json::to_writer_pretty(&mut tmp, document)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| AppError::Io(e.error))?;
        debug!(path = %self.path.display(), "Store file written");
        Ok(())
    }
}

impl ConfigStore for JsonFileStore {
    fn get(&self, key: StoreKey) -> Result<Vec<Value>> {
        let document = self.read_document()?;
        match document.get(key.as_str()) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(_) => Err(AppError::Store(format!(
                "'{}' in {} is not an array",
                key.as_str(),
                self.path.display()
            ))),
        }
    }

    fn set(&self, key: StoreKey, items: Vec<Value>) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| AppError::Store("store write lock poisoned".to_string()))?;
        let mut document = self.read_document()?;
        document.insert(key.as_str().to_string(), Value::Array(items));
        self.write_document(&document)
    }
}

/// Volatile store, used by tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<StoreKey, Vec<Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryStore {
    fn get(&self, key: StoreKey) -> Result<Vec<Value>> {
        let collections = self
            .collections
            .lock()
            .map_err(|_| AppError::Store("memory store lock poisoned".to_string()))?;
        Ok(collections.get(&key).cloned().unwrap_or_default())
    }

    fn set(&self, key: StoreKey, items: Vec<Value>) -> Result<()> {
        let mut collections = self
            .collections
            .lock()
            .map_err(|_| AppError::Store("memory store lock poisoned".to_string()))?;
        collections.insert(key, items);
        Ok(())
    }
}

/// Typed view over a [`ConfigStore`].
#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn ConfigStore>,
}

impl Catalog {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self { store }
    }

    pub fn connections(&self) -> Result<Vec<Connection>> {
        self.store
            .get(StoreKey::Connections)?
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(AppError::from))
            .collect()
    }

    /// Looks a connection up by id.
    ///
    /// An entry that exists but names a database kind this build cannot dump
    /// is reported as `UnsupportedDatabaseKind` rather than a parse error.
    pub fn find_connection(&self, id: &str) -> Result<Connection> {
        let raw = self
            .store
            .get(StoreKey::Connections)?
            .into_iter()
            .find(|v| v.get("id").and_then(Value::as_str) == Some(id))
            .ok_or_else(|| AppError::ConnectionNotFound(id.to_string()))?;

        let kind = raw
            .get("kind")
            .or_else(|| raw.get("type"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if serde_json::from_value::<super::models::DatabaseKind>(Value::String(kind.clone())).is_err() {
            return Err(AppError::UnsupportedDatabaseKind(kind));
        }
        Ok(serde_json::from_value(raw)?)
    }

    /// All schedules that parse; malformed entries are logged and left out.
    pub fn schedules(&self) -> Result<Vec<Schedule>> {
        let mut schedules = Vec::new();
        for raw in self.store.get(StoreKey::Schedules)? {
            match parse_schedule(raw) {
                Ok(schedule) => schedules.push(schedule),
                Err(e) => warn!(error = %e, "Skipping unreadable schedule"),
            }
        }
        Ok(schedules)
    }

    pub fn find_schedule(&self, id: &str) -> Result<Option<Schedule>> {
        self.store
            .get(StoreKey::Schedules)?
            .into_iter()
            .find(|v| v.get("id").and_then(Value::as_str) == Some(id))
            .map(parse_schedule)
            .transpose()
    }

    /// Inserts or replaces a schedule by id.
    pub fn save_schedule(&self, schedule: &Schedule) -> Result<()> {
        let mut items = self.store.get(StoreKey::Schedules)?;
        let value = serde_json::to_value(schedule)?;
        match items
            .iter_mut()
            .find(|v| v.get("id").and_then(Value::as_str) == Some(schedule.id.as_str()))
        {
            Some(slot) => *slot = value,
            None => items.push(value),
        }
        self.store.set(StoreKey::Schedules, items)
    }

    /// Removes a schedule by id. Returns whether it existed.
    pub fn delete_schedule(&self, id: &str) -> Result<bool> {
        let mut items = self.store.get(StoreKey::Schedules)?;
        let before = items.len();
        items.retain(|v| v.get("id").and_then(Value::as_str) != Some(id));
        if items.len() == before {
            return Ok(false);
        }
        self.store.set(StoreKey::Schedules, items)?;
        Ok(true)
    }

    pub fn history(&self) -> Result<Vec<HistoryRecord>> {
        self.store
            .get(StoreKey::History)?
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(AppError::from))
            .collect()
    }

    /// Prepends so the newest record is first.
    pub fn append_history(&self, record: &HistoryRecord) -> Result<()> {
        let mut items = self.store.get(StoreKey::History)?;
        items.insert(0, serde_json::to_value(record)?);
        self.store.set(StoreKey::History, items)
    }

    pub fn clear_history(&self) -> Result<()> {
        self.store.set(StoreKey::History, Vec::new())
    }
}

fn parse_schedule(raw: Value) -> Result<Schedule> {
    let schedule_id = raw
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or("<unknown>")
        .to_string();
    serde_json::from_value(raw).map_err(|e| AppError::InvalidSchedule {
        schedule_id,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::{BackupStatus, DatabaseKind};
    use serde_json::json;
    use tempfile::TempDir;

    fn schedule_json(id: &str) -> Value {
        json!({
            "id": id,
            "connectionId": "c1",
            "database": "shop",
            "name": "nightly",
            "frequency": "daily",
            "time": "01:30",
            "destinationDirectory": "/tmp/backups",
            "enabled": true,
            "retentionDays": 3,
            "compress": true
        })
    }

    #[test]
    fn test_json_file_store_missing_file_is_empty() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = JsonFileStore::new(dir.path().join("store.json"));
        assert!(store.get(StoreKey::History)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_json_file_store_set_keeps_other_keys() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("nested").join("store.json");
        let store = JsonFileStore::new(&path);

        store.set(StoreKey::Connections, vec![json!({"id": "c1"})])?;
        store.set(StoreKey::Schedules, vec![schedule_json("s1")])?;

        let reopened = JsonFileStore::new(&path);
        assert_eq!(reopened.get(StoreKey::Connections)?.len(), 1);
        assert_eq!(reopened.get(StoreKey::Schedules)?.len(), 1);
        assert!(reopened.get(StoreKey::History)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_json_file_store_rejects_non_array_collection() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("store.json");
        fs::write(&path, r#"{"history": {"oops": true}}"#)?;
        let store = JsonFileStore::new(&path);
        assert!(matches!(store.get(StoreKey::History), Err(AppError::Store(_))));
        Ok(())
    }

    #[test]
    fn test_find_connection_reports_unknown_kind() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        store.set(
            StoreKey::Connections,
            vec![
                json!({"id": "c1", "name": "a", "kind": "postgres", "host": "h", "port": 5432, "username": "u"}),
                json!({"id": "c2", "name": "b", "kind": "oracle", "host": "h", "port": 1521}),
            ],
        )?;
        let catalog = Catalog::new(store);

        assert_eq!(catalog.find_connection("c1")?.kind, DatabaseKind::Postgres);
        assert!(matches!(
            catalog.find_connection("c2"),
            Err(AppError::UnsupportedDatabaseKind(kind)) if kind == "oracle"
        ));
        assert!(matches!(
            catalog.find_connection("missing"),
            Err(AppError::ConnectionNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_schedules_skip_malformed_entries() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let mut bad = schedule_json("s2");
        bad["frequency"] = json!("hourly");
        store.set(StoreKey::Schedules, vec![schedule_json("s1"), bad])?;
        let catalog = Catalog::new(store);

        let schedules = catalog.schedules()?;
        assert_eq!(schedules.len(), 1);
        assert_eq!(schedules[0].id, "s1");
        assert!(matches!(
            catalog.find_schedule("s2"),
            Err(AppError::InvalidSchedule { schedule_id, .. }) if schedule_id == "s2"
        ));
        assert!(catalog.find_schedule("nope")?.is_none());
        Ok(())
    }

    #[test]
    fn test_save_schedule_replaces_by_id() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        store.set(StoreKey::Schedules, vec![schedule_json("s1")])?;
        let catalog = Catalog::new(store);

        let mut schedule = catalog.find_schedule("s1")?.expect("schedule exists");
        schedule.enabled = false;
        catalog.save_schedule(&schedule)?;

        let schedules = catalog.schedules()?;
        assert_eq!(schedules.len(), 1);
        assert!(!schedules[0].enabled);
        Ok(())
    }

    #[test]
    fn test_delete_schedule() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        store.set(StoreKey::Schedules, vec![schedule_json("s1"), schedule_json("s2")])?;
        let catalog = Catalog::new(store);

        assert!(catalog.delete_schedule("s1")?);
        assert!(!catalog.delete_schedule("s1")?);
        let ids: Vec<String> = catalog.schedules()?.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, ["s2"]);
        Ok(())
    }

    #[test]
    fn test_history_is_prepended() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let catalog = Catalog::new(store);
        let schedule: Schedule = serde_json::from_value(schedule_json("s1"))?;

        catalog.append_history(&HistoryRecord::failed(&schedule, "/a".into(), "first".into()))?;
        catalog.append_history(&HistoryRecord::success(&schedule, "/b".into(), Some(10)))?;

        let history = catalog.history()?;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, BackupStatus::Success);
        assert_eq!(history[1].error.as_deref(), Some("first"));

        catalog.clear_history()?;
        assert!(catalog.history()?.is_empty());
        Ok(())
    }
}
