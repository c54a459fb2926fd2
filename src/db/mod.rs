use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::warn;

fn db_path(app_dir: &Path) -> PathBuf {
    app_dir.join("dayloop.sqlite3")
}

fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    let user_version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if user_version < 1 {
        conn.execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS kv (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);
PRAGMA user_version = 1;
"#,
        )?;
    }
    Ok(())
}

pub fn daily_key(date: NaiveDate) -> String {
    format!("daily:{date}")
}

pub fn week_key(week_start: NaiveDate) -> String {
    format!("habit_week:{week_start}")
}

pub const APPLICATIONS_KEY: &str = "entities:applications";
pub const HABITS_KEY: &str = "settings:habits";

/// Device-local key/value persistence, used when no authenticated identity
/// exists. Best-effort: every failure degrades to "no data" and is logged,
/// never propagated.
pub struct LocalStore {
    conn: Option<Connection>,
}

impl LocalStore {
    pub fn open(app_dir: &Path) -> Self {
        let conn = fs::create_dir_all(app_dir)
            .map_err(|e| warn!("local store unavailable: {e}"))
            .ok()
            .and_then(|()| match Connection::open(db_path(app_dir)) {
                Ok(conn) => Some(conn),
                Err(e) => {
                    warn!("local store open failed: {e}");
                    None
                }
            });
        let conn = conn.and_then(|conn| match migrate(&conn) {
            Ok(()) => Some(conn),
            Err(e) => {
                warn!("local store migrate failed: {e}");
                None
            }
        });
        Self { conn }
    }

    pub fn in_memory() -> Self {
        let conn = Connection::open_in_memory()
            .map_err(|e| warn!("in-memory local store failed: {e}"))
            .ok();
        let conn = conn.and_then(|conn| migrate(&conn).ok().map(|()| conn));
        Self { conn }
    }

    /// A corrupt or missing value reads as `None`.
    pub fn read(&self, key: &str) -> Option<Value> {
        let conn = self.conn.as_ref()?;
        let raw: String = conn
            .query_row(
                r#"SELECT value FROM kv WHERE key = ?1"#,
                params![key],
                |row| row.get(0),
            )
            .optional()
            .unwrap_or_else(|e| {
                warn!("local read failed for {key}: {e}");
                None
            })?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("local value for {key} is corrupt: {e}");
                None
            }
        }
    }

    pub fn write(&self, key: &str, value: &Value) {
        let Some(conn) = self.conn.as_ref() else {
            return;
        };
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("local value for {key} failed to serialize: {e}");
                return;
            }
        };
        let result = conn.execute(
            r#"INSERT INTO kv(key, value) VALUES (?1, ?2)
               ON CONFLICT(key) DO UPDATE SET value = excluded.value"#,
            params![key, raw],
        );
        if let Err(e) = result {
            warn!("local write failed for {key}: {e}");
        }
    }
}
