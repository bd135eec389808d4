use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

/// Device-local key/value state. Never synced to the server.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("storage: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("storage: close connection")
    }

    pub fn get(&self, key: &str) -> Result<Option<Entry>> {
        let conn = self.conn.lock();
        conn.query_row(
            r#"
SELECT key, value, updated_at
FROM local_state
WHERE key = ?1
"#,
            params![key],
            |row| {
                let updated: i64 = row.get(2)?;
                Ok(Entry {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    updated_at: Utc
                        .timestamp_opt(updated, 0)
                        .single()
                        .unwrap_or_else(Utc::now),
                })
            },
        )
        .optional()
        .context("storage: query local state")
    }

    pub fn get_value(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get(key)?.map(|entry| entry.value))
    }

    pub fn put_value(&self, key: &str, value: &str) -> Result<()> {
        anyhow::ensure!(!key.is_empty(), "storage: key required");
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO local_state (key, value, updated_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(key) DO UPDATE SET
  value = excluded.value,
  updated_at = excluded.updated_at
"#,
            params![key, value, Utc::now().timestamp()],
        )
        .with_context(|| format!("storage: write {key}"))?;
        Ok(())
    }

    /// Read-modify-write of one key inside a single write transaction.
    /// `change` sees the stored value and returns the value to write, or
    /// `None` to leave the row alone. Nothing is written when it errors.
    pub fn update_value<F>(&self, key: &str, change: F) -> Result<()>
    where
        F: FnOnce(Option<&str>) -> Result<Option<String>>,
    {
        anyhow::ensure!(!key.is_empty(), "storage: key required");
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .with_context(|| format!("storage: begin update of {key}"))?;
        let current: Option<String> = tx
            .query_row(
                "SELECT value FROM local_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("storage: read {key}"))?;
        let Some(next) = change(current.as_deref())? else {
            return Ok(());
        };
        tx.execute(
            r#"
INSERT INTO local_state (key, value, updated_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(key) DO UPDATE SET
  value = excluded.value,
  updated_at = excluded.updated_at
"#,
            params![key, next, Utc::now().timestamp()],
        )
        .with_context(|| format!("storage: write {key}"))?;
        tx.commit()
            .with_context(|| format!("storage: commit {key}"))
    }

    pub fn delete_value(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM local_state WHERE key = ?1", params![key])
            .with_context(|| format!("storage: delete {key}"))?;
        Ok(())
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    for (idx, sql) in migrations().iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)
            .with_context(|| format!("storage: apply migration {version}"))?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![version, Utc::now().timestamp()],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![
        r#"
CREATE TABLE IF NOT EXISTS local_state (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  updated_at INTEGER NOT NULL
);
"#,
    ]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join("board-sync").join("state.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_database_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        let store = Store::open(Options {
            path: Some(path.clone()),
        })
        .unwrap();
        assert!(path.exists());
        store.close().unwrap();
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        let store = Store::open(Options {
            path: Some(path.clone()),
        })
        .unwrap();
        store.put_value("hiddenPosts", "[\"a\"]").unwrap();
        store.put_value("hiddenPosts", "[\"a\",\"b\"]").unwrap();
        store.close().unwrap();

        let store = Store::open(Options { path: Some(path) }).unwrap();
        assert_eq!(
            store.get_value("hiddenPosts").unwrap().as_deref(),
            Some("[\"a\",\"b\"]")
        );
        store.delete_value("hiddenPosts").unwrap();
        assert!(store.get("hiddenPosts").unwrap().is_none());
    }

    #[test]
    fn update_sees_stored_value_and_can_skip_or_abort() {
        let dir = tempdir().unwrap();
        let store = Store::open(Options {
            path: Some(dir.path().join("state.db")),
        })
        .unwrap();

        store
            .update_value("k", |current| {
                assert_eq!(current, None);
                Ok(Some("1".into()))
            })
            .unwrap();
        store
            .update_value("k", |current| Ok(current.map(|v| format!("{v}2"))))
            .unwrap();
        store.update_value("k", |_| Ok(None)).unwrap();
        assert!(store
            .update_value("k", |_| Err(anyhow!("refused")))
            .is_err());

        assert_eq!(store.get_value("k").unwrap().as_deref(), Some("12"));
    }
}
