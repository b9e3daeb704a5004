use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};

use crate::epoch_secs;

/// One row of the automation audit trail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationLogEntry {
    pub action: String,
    pub description: String,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    pub room: String,
}

impl AutomationLogEntry {
    pub fn new(room: &str, action: &str, description: impl Into<String>, at: SystemTime) -> Self {
        Self {
            action: action.to_string(),
            description: description.into(),
            timestamp: epoch_secs(at),
            room: room.to_string(),
        }
    }
}

/// Append-only store for automation actions.
pub trait AutomationLog: Send {
    fn append(&mut self, entry: &AutomationLogEntry) -> Result<()>;

    /// Most recent entries, newest first.
    fn recent(&mut self, limit: usize) -> Result<Vec<AutomationLogEntry>>;
}

pub struct SqliteAutomationLog {
    conn: Connection,
}

impl SqliteAutomationLog {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)
            .with_context(|| format!("open automation log at {db_path}"))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS lighting_automation_log (
              log_id INTEGER PRIMARY KEY AUTOINCREMENT,
              action TEXT NOT NULL,
              description TEXT NOT NULL,
              timestamp INTEGER NOT NULL,
              room TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_automation_timestamp ON lighting_automation_log(timestamp);
            CREATE INDEX IF NOT EXISTS idx_automation_action ON lighting_automation_log(action);
            "#,
        )?;
        Ok(())
    }
}

impl AutomationLog for SqliteAutomationLog {
    fn append(&mut self, entry: &AutomationLogEntry) -> Result<()> {
        let timestamp = i64::try_from(entry.timestamp)
            .map_err(|_| anyhow!("log timestamp exceeds i64 range"))?;
        self.conn.execute(
            r#"
            INSERT INTO lighting_automation_log(action, description, timestamp, room)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![entry.action, entry.description, timestamp, entry.room],
        )?;
        Ok(())
    }

    fn recent(&mut self, limit: usize) -> Result<Vec<AutomationLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT action, description, timestamp, room FROM lighting_automation_log ORDER BY log_id DESC LIMIT ?1",
        )?;
        let mut rows = stmt.query(params![limit as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let timestamp: i64 = row.get(2)?;
            out.push(AutomationLogEntry {
                action: row.get(0)?,
                description: row.get(1)?,
                timestamp: u64::try_from(timestamp)
                    .map_err(|_| anyhow!("corrupt automation log: negative timestamp"))?,
                room: row.get(3)?,
            });
        }
        Ok(out)
    }
}

/// In-memory log. Clones share the same entries, so a test can keep a
/// handle after giving one to the controller.
#[derive(Clone, Debug, Default)]
pub struct InMemoryAutomationLog {
    entries: Arc<Mutex<Vec<AutomationLogEntry>>>,
}

impl InMemoryAutomationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> Vec<AutomationLogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn actions(&self) -> Vec<String> {
        self.entries().into_iter().map(|e| e.action).collect()
    }
}

impl AutomationLog for InMemoryAutomationLog {
    fn append(&mut self, entry: &AutomationLogEntry) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("automation log lock poisoned"))?
            .push(entry.clone());
        Ok(())
    }

    fn recent(&mut self, limit: usize) -> Result<Vec<AutomationLogEntry>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("automation log lock poisoned"))?;
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared_memory_uri;
    use std::time::Duration;

    fn entry(action: &str, secs: u64) -> AutomationLogEntry {
        AutomationLogEntry::new(
            "kitchen",
            action,
            format!("{action} happened"),
            SystemTime::UNIX_EPOCH + Duration::from_secs(secs),
        )
    }

    #[test]
    fn sqlite_log_returns_newest_first() {
        let mut log = SqliteAutomationLog::open(&shared_memory_uri()).unwrap();
        log.append(&entry("lights_on", 10)).unwrap();
        log.append(&entry("notification_sent", 20)).unwrap();
        log.append(&entry("auto_turn_off", 30)).unwrap();

        let recent = log.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].action, "auto_turn_off");
        assert_eq!(recent[0].timestamp, 30);
        assert_eq!(recent[1].action, "notification_sent");
        assert_eq!(recent[1].room, "kitchen");
    }

    #[test]
    fn sqlite_log_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("automation.db");
        let path = path.to_str().unwrap();
        {
            let mut log = SqliteAutomationLog::open(path).unwrap();
            log.append(&entry("user_keep_on", 5)).unwrap();
        }
        let mut reopened = SqliteAutomationLog::open(path).unwrap();
        assert_eq!(reopened.recent(10).unwrap(), vec![entry("user_keep_on", 5)]);
    }

    #[test]
    fn in_memory_clones_share_entries() {
        let log = InMemoryAutomationLog::new();
        let mut writer = log.clone();
        writer.append(&entry("lights_on", 1)).unwrap();
        writer.append(&entry("user_dismiss", 2)).unwrap();
        assert_eq!(log.actions(), vec!["lights_on", "user_dismiss"]);
        assert_eq!(writer.recent(1).unwrap()[0].action, "user_dismiss");
    }
}
