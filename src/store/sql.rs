//! SQLite table store backend
//!
//! One row per record. Column order is part of the operator contract:
//! `uid` (1), numeric status ordinal (2), type name (3), LRA id string
//! (4), opaque payload (5). The status and id columns exist so operators
//! can query failures with plain SQL; they are probed from the JSON
//! payload without changing the opaque-bytes trait contract.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};
use serde::Deserialize;

use crate::lra::LraStatus;

use super::{ObjectStore, RecordKind, StoreError, StoreResult};

/// Minimal view of a serialized LRA, for the queryable columns.
#[derive(Debug, Deserialize)]
struct RecordProbe {
    id: Option<String>,
    status: Option<LraStatus>,
}

/// SQLite-backed `ObjectStore` backend.
pub struct SqlStore {
    conn: Mutex<Connection>,
    table: String,
}

impl SqlStore {
    /// Opens (and if needed creates) the record table in the database at
    /// `path`. The `table_prefix` lets several coordinators share one
    /// database file.
    pub fn open(path: impl AsRef<Path>, table_prefix: &str) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::with_connection(conn, table_prefix)
    }

    /// Opens an in-memory database, for tests.
    pub fn open_in_memory(table_prefix: &str) -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, table_prefix)
    }

    fn with_connection(conn: Connection, table_prefix: &str) -> StoreResult<Self> {
        let table = format!("{}lra_records", sanitize_prefix(table_prefix));
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                     uid TEXT NOT NULL,
                     status INTEGER NOT NULL,
                     type TEXT NOT NULL,
                     lra_id TEXT NOT NULL,
                     payload BLOB NOT NULL,
                     PRIMARY KEY (type, uid)
                 )",
                table
            ),
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            table,
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Restricts the table prefix to identifier characters so it can be
/// spliced into statements.
fn sanitize_prefix(prefix: &str) -> String {
    prefix
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// Extracts the queryable columns from the opaque payload.
fn probe(bytes: &[u8]) -> (i64, String) {
    match serde_json::from_slice::<RecordProbe>(bytes) {
        Ok(p) => (
            p.status.map(|s| s.ordinal()).unwrap_or(-1),
            p.id.unwrap_or_default(),
        ),
        Err(_) => (-1, String::new()),
    }
}

impl ObjectStore for SqlStore {
    fn write(&self, kind: RecordKind, uid: &str, bytes: &[u8]) -> StoreResult<()> {
        let (status, lra_id) = probe(bytes);
        self.conn().execute(
            &format!(
                "INSERT OR REPLACE INTO {} (uid, status, type, lra_id, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                self.table
            ),
            params![uid, status, kind.type_name(), lra_id, bytes],
        )?;
        Ok(())
    }

    fn read(&self, kind: RecordKind, uid: &str) -> StoreResult<Option<Vec<u8>>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT payload FROM {} WHERE type = ?1 AND uid = ?2",
            self.table
        ))?;
        let mut rows = stmt.query(params![kind.type_name(), uid])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn remove(&self, kind: RecordKind, uid: &str) -> StoreResult<()> {
        self.conn().execute(
            &format!("DELETE FROM {} WHERE type = ?1 AND uid = ?2", self.table),
            params![kind.type_name(), uid],
        )?;
        Ok(())
    }

    fn list(&self, kind: RecordKind) -> StoreResult<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT uid FROM {} WHERE type = ?1",
            self.table
        ))?;
        let uids = stmt
            .query_map(params![kind.type_name()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(uids)
    }

    fn relocate(&self, from: RecordKind, to: RecordKind, uid: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            &format!("DELETE FROM {} WHERE type = ?1 AND uid = ?2", self.table),
            params![to.type_name(), uid],
        )?;
        let changed = tx.execute(
            &format!(
                "UPDATE {} SET type = ?1 WHERE type = ?2 AND uid = ?3",
                self.table
            ),
            params![to.type_name(), from.type_name(), uid],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                kind: from,
                uid: uid.to_string(),
            });
        }
        tx.commit()?;
        Ok(())
    }
}
