//! SQLite storage backend for the fragment store
//!
//! One database file with three tables mirroring the store namespaces:
//! `kv` (values with optional expiry), `sets` and `triples`. Several
//! curator processes may share the file; WAL mode plus a busy timeout
//! lets their lock keys interleave safely.

use super::traits::{Batch, Command, FragmentStore, OpenStore, StoreError, StoreResult};
use crate::graph::Triple;
use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// How long a connection waits on another process's write lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS kv (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        expires_at INTEGER
    );

    CREATE TABLE IF NOT EXISTS sets (
        key TEXT NOT NULL,
        member TEXT NOT NULL,
        PRIMARY KEY (key, member)
    );

    CREATE TABLE IF NOT EXISTS triples (
        context TEXT NOT NULL,
        subject TEXT NOT NULL,
        predicate TEXT NOT NULL,
        object TEXT NOT NULL,
        PRIMARY KEY (context, subject, predicate, object)
    );

    PRAGMA journal_mode = WAL;
"#;

/// Busy or unreachable databases are reported as unavailable so callers retry.
fn classify(err: rusqlite::Error) -> StoreError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::CannotOpen) => {
            StoreError::Unavailable(err.to_string())
        }
        _ => StoreError::Database(err),
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn deadline(ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|t| now_ms() + t.as_millis() as i64)
}

/// SQLite-backed fragment store
///
/// Thread-safe via internal mutex on the connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    fn init(conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT).map_err(classify)?;
        conn.execute_batch(SCHEMA).map_err(classify)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn purge_expired(conn: &Connection, key: &str) -> StoreResult<()> {
        conn.execute(
            "DELETE FROM kv WHERE key = ?1 AND expires_at IS NOT NULL AND expires_at <= ?2",
            params![key, now_ms()],
        )
        .map_err(classify)?;
        Ok(())
    }

    fn get_live(conn: &Connection, key: &str) -> StoreResult<Option<(String, Option<i64>)>> {
        conn.query_row(
            "SELECT value, expires_at FROM kv \
             WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
            params![key, now_ms()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(classify)
    }

    fn set_value(conn: &Connection, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        conn.execute(
            r#"
            INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at
            "#,
            params![key, value, deadline(ttl)],
        )
        .map_err(classify)?;
        Ok(())
    }

    fn delete_name(conn: &Connection, key: &str) -> StoreResult<bool> {
        Self::purge_expired(conn, key)?;
        let mut removed = 0;
        removed += conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(classify)?;
        removed += conn
            .execute("DELETE FROM sets WHERE key = ?1", params![key])
            .map_err(classify)?;
        removed += conn
            .execute("DELETE FROM triples WHERE context = ?1", params![key])
            .map_err(classify)?;
        Ok(removed > 0)
    }

    fn insert_member(conn: &Connection, key: &str, member: &str) -> StoreResult<bool> {
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO sets (key, member) VALUES (?1, ?2)",
                params![key, member],
            )
            .map_err(classify)?;
        Ok(inserted > 0)
    }

    fn remove_member(conn: &Connection, key: &str, member: &str) -> StoreResult<bool> {
        let removed = conn
            .execute(
                "DELETE FROM sets WHERE key = ?1 AND member = ?2",
                params![key, member],
            )
            .map_err(classify)?;
        Ok(removed > 0)
    }

    fn insert_triple(conn: &Connection, context: &str, triple: &Triple) -> StoreResult<bool> {
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO triples (context, subject, predicate, object) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![context, triple.subject, triple.predicate, triple.object],
            )
            .map_err(classify)?;
        Ok(inserted > 0)
    }

    fn apply(conn: &Connection, command: &Command) -> StoreResult<()> {
        match command {
            Command::Set { key, value, ttl } => Self::set_value(conn, key, value, *ttl),
            Command::Delete { key } => Self::delete_name(conn, key).map(|_| ()),
            Command::SetAdd { key, member } => Self::insert_member(conn, key, member).map(|_| ()),
            Command::SetRemove { key, member } => {
                Self::remove_member(conn, key, member).map(|_| ())
            }
            Command::AddTriple { context, triple } => {
                Self::insert_triple(conn, context, triple).map(|_| ())
            }
        }
    }
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path).map_err(classify)?)
    }

    fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory().map_err(classify)?)
    }
}

impl FragmentStore for SqliteStore {
    fn execute(&self, batch: &Batch) -> StoreResult<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction().map_err(classify)?;
        for command in batch.commands() {
            Self::apply(&tx, command)?;
        }
        tx.commit().map_err(classify)
    }

    fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        let conn = self.lock_conn()?;
        Self::insert_member(&conn, key, member)
    }

    fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        let conn = self.lock_conn()?;
        Self::remove_member(&conn, key, member)
    }

    fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare("SELECT member FROM sets WHERE key = ?1 ORDER BY member")
            .map_err(classify)?;
        let rows = stmt
            .query_map(params![key], |row| row.get(0))
            .map_err(classify)?;
        rows.collect::<Result<Vec<String>, _>>().map_err(classify)
    }

    fn set_len(&self, key: &str) -> StoreResult<usize> {
        let conn = self.lock_conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sets WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .map_err(classify)?;
        Ok(count as usize)
    }

    fn is_member(&self, key: &str, member: &str) -> StoreResult<bool> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sets WHERE key = ?1 AND member = ?2)",
            params![key, member],
            |row| row.get(0),
        )
        .map_err(classify)
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.lock_conn()?;
        Ok(Self::get_live(&conn, key)?.map(|(value, _)| value))
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let conn = self.lock_conn()?;
        Self::set_value(&conn, key, value, ttl)
    }

    fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<bool> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction().map_err(classify)?;
        Self::purge_expired(&tx, key)?;
        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)",
                params![key, value, deadline(ttl)],
            )
            .map_err(classify)?;
        tx.commit().map_err(classify)?;
        Ok(inserted > 0)
    }

    fn set_if_present(&self, key: &str, value: &str) -> StoreResult<bool> {
        let conn = self.lock_conn()?;
        let updated = conn
            .execute(
                "UPDATE kv SET value = ?2 WHERE key = ?1 \
                 AND (expires_at IS NULL OR expires_at > ?3)",
                params![key, value, now_ms()],
            )
            .map_err(classify)?;
        Ok(updated > 0)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction().map_err(classify)?;
        let removed = Self::delete_name(&tx, key)?;
        tx.commit().map_err(classify)?;
        Ok(removed)
    }

    fn delete_if_equals(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let conn = self.lock_conn()?;
        let removed = conn
            .execute(
                "DELETE FROM kv WHERE key = ?1 AND value = ?2 \
                 AND (expires_at IS NULL OR expires_at > ?3)",
                params![key, expected, now_ms()],
            )
            .map_err(classify)?;
        Ok(removed > 0)
    }

    fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let conn = self.lock_conn()?;
        Ok(Self::get_live(&conn, key)?
            .and_then(|(_, expires_at)| expires_at)
            .map(|at| Duration::from_millis((at - now_ms()).max(0) as u64)))
    }

    fn add_triple(&self, context: &str, triple: &Triple) -> StoreResult<bool> {
        let conn = self.lock_conn()?;
        Self::insert_triple(&conn, context, triple)
    }

    fn remove_triple(&self, context: &str, triple: &Triple) -> StoreResult<bool> {
        let conn = self.lock_conn()?;
        let removed = conn
            .execute(
                "DELETE FROM triples WHERE context = ?1 AND subject = ?2 \
                 AND predicate = ?3 AND object = ?4",
                params![context, triple.subject, triple.predicate, triple.object],
            )
            .map_err(classify)?;
        Ok(removed > 0)
    }

    fn triples(&self, context: &str) -> StoreResult<Vec<Triple>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT subject, predicate, object FROM triples WHERE context = ?1 \
                 ORDER BY subject, predicate, object",
            )
            .map_err(classify)?;
        let rows = stmt
            .query_map(params![context], |row| {
                Ok(Triple {
                    subject: row.get(0)?,
                    predicate: row.get(1)?,
                    object: row.get(2)?,
                })
            })
            .map_err(classify)?;
        rows.collect::<Result<Vec<Triple>, _>>().map_err(classify)
    }

    fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT key FROM kv
                    WHERE substr(key, 1, ?2) = ?1 AND (expires_at IS NULL OR expires_at > ?3)
                UNION
                SELECT key FROM sets WHERE substr(key, 1, ?2) = ?1
                UNION
                SELECT context FROM triples WHERE substr(context, 1, ?2) = ?1
                ORDER BY 1
                "#,
            )
            .map_err(classify)?;
        let rows = stmt
            .query_map(
                params![prefix, prefix.chars().count() as i64, now_ms()],
                |row| row.get(0),
            )
            .map_err(classify)?;
        rows.collect::<Result<Vec<String>, _>>().map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn batch_is_applied_in_one_transaction() {
        let store = store();
        let mut batch = Batch::new();
        batch
            .set("a", "1")
            .set_add("s", "x")
            .add_triple("ctx", Triple::new("s", "p", "o"));
        store.execute(&batch).unwrap();

        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        assert_eq!(store.set_members("s").unwrap(), vec!["x"]);
        assert_eq!(store.triples("ctx").unwrap().len(), 1);
    }

    #[test]
    fn set_if_absent_respects_expiry() {
        let store = store();
        assert!(store
            .set_if_absent("held", "a", Some(Duration::from_secs(60)))
            .unwrap());
        assert!(!store.set_if_absent("held", "b", None).unwrap());

        store
            .set("lapsed", "a", Some(Duration::from_millis(1)))
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(store.set_if_absent("lapsed", "c", None).unwrap());
        assert_eq!(store.get("lapsed").unwrap().as_deref(), Some("c"));
    }

    #[test]
    fn keys_scan_all_namespaces() {
        let store = store();
        store.set("fragment:f:pulling", "1", None).unwrap();
        store.set_add("fragment:f:requests", "r").unwrap();
        store
            .add_triple("fragment:f:context:p1", &Triple::new("s", "p", "o"))
            .unwrap();
        store.set("other", "1", None).unwrap();

        let keys = store.keys("fragment:f:").unwrap();
        assert_eq!(
            keys,
            vec![
                "fragment:f:context:p1",
                "fragment:f:pulling",
                "fragment:f:requests",
            ]
        );
    }

    #[test]
    fn file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("curator.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.set_add("fragments", "f1").unwrap();
        }
        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.set_members("fragments").unwrap(), vec!["f1"]);
    }
}
