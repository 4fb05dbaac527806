//! Store Interface.
//!
//! A thin transactional layer over SQLite (`rusqlite`): an
//! `Arc<Mutex<Connection>>` writer with WAL pragmas enabled, and
//! prepared, batched-transaction writes. A single writer mutex
//! serialises write transactions; readers open their own connections
//! and run concurrently with the writer and each other.

use crate::registry::EntityDef;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};

const INFRA_DDL: &str = "
CREATE TABLE IF NOT EXISTS sync_state (
    source TEXT NOT NULL,
    entity TEXT NOT NULL,
    cursor_value TEXT NOT NULL DEFAULT '',
    cursor_skip INTEGER NOT NULL DEFAULT 0,
    last_sync_at INTEGER,
    PRIMARY KEY (source, entity)
);

CREATE TABLE IF NOT EXISTS entity_stats_meta (
    source TEXT NOT NULL,
    entity TEXT NOT NULL,
    total_requests INTEGER NOT NULL DEFAULT 0,
    successful_requests INTEGER NOT NULL DEFAULT 0,
    network_failures INTEGER NOT NULL DEFAULT 0,
    json_failures INTEGER NOT NULL DEFAULT 0,
    graphql_failures INTEGER NOT NULL DEFAULT 0,
    format_failures INTEGER NOT NULL DEFAULT 0,
    total_rows INTEGER NOT NULL DEFAULT 0,
    total_latency_ms INTEGER NOT NULL DEFAULT 0,
    success_rate REAL NOT NULL DEFAULT 0,
    PRIMARY KEY (source, entity)
);

CREATE TABLE IF NOT EXISTS indexer_fail_meta (
    source TEXT NOT NULL,
    entity TEXT NOT NULL,
    indexer_id TEXT NOT NULL,
    fail_requests INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (source, entity, indexer_id)
);
";

/// Owns the single writer connection and the on-disk path (readers open
/// their own handles against the same path).
pub struct Store {
    writer: Mutex<Connection>,
    path: PathBuf,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(&path).context("open store db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.execute_batch(INFRA_DDL).context("create infra tables")?;

        Ok(Self {
            writer: Mutex::new(conn),
            path,
        })
    }

    /// Opens an independent read-only connection. Safe to call
    /// concurrently with writes and with other readers.
    pub fn open_reader(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("open reader connection")?;
        conn.pragma_update(None, "query_only", "1").ok();
        Ok(conn)
    }

    /// Idempotently creates the storage table for one entity.
    pub fn init_entity(&self, def: &EntityDef) -> Result<()> {
        let conn = self.writer.lock();
        conn.execute_batch(def.ddl)
            .with_context(|| format!("creating table for entity {}", def.name))?;
        if def.columns.contains(&"timestamp") {
            conn.execute(
                &format!(
                    "CREATE INDEX IF NOT EXISTS idx_{table}_timestamp ON {table}(timestamp)",
                    table = def.table
                ),
                [],
            )
            .with_context(|| format!("creating timestamp index for {}", def.name))?;
        }
        Ok(())
    }

    pub fn get_cursor(&self, source: &str, entity: &str) -> Result<(String, i64)> {
        let conn = self.writer.lock();
        let row = conn
            .query_row(
                "SELECT cursor_value, cursor_skip FROM sync_state WHERE source = ?1 AND entity = ?2",
                rusqlite::params![source, entity],
                |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)),
            )
            .optional()
            .context("loading cursor")?;
        Ok(row.unwrap_or_else(|| (String::new(), 0)))
    }

    /// Inserts/upserts all rows and commits the new cursor in one
    /// transaction. Fails atomically: either both the
    /// rows and the cursor land, or neither does.
    pub fn atomic_insert_with_cursor(
        &self,
        def: &EntityDef,
        table: &str,
        rows: &[Vec<Value>],
        source: &str,
        entity: &str,
        cursor_value: &str,
        cursor_skip: i64,
    ) -> Result<()> {
        let mut conn = self.writer.lock();
        let tx = conn.transaction().context("begin write transaction")?;

        if !rows.is_empty() {
            let placeholders: Vec<String> =
                (1..=def.columns.len()).map(|i| format!("?{i}")).collect();
            let update_clauses: Vec<String> = def
                .columns
                .iter()
                .skip(1)
                .map(|c| format!("{c} = excluded.{c}"))
                .collect();
            let sql = format!(
                "INSERT INTO {table} ({cols}) VALUES ({ph}) ON CONFLICT(id) DO UPDATE SET {upd}",
                table = table,
                cols = def.columns.join(", "),
                ph = placeholders.join(", "),
                upd = update_clauses.join(", "),
            );
            let mut stmt = tx.prepare_cached(&sql)?;
            for row in rows {
                let params: Vec<&dyn rusqlite::ToSql> =
                    row.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
                stmt.execute(params.as_slice())
                    .with_context(|| format!("inserting row into {table}"))?;
            }
        }

        let now = chrono::Utc::now().timestamp();
        tx.execute(
            "INSERT INTO sync_state (source, entity, cursor_value, cursor_skip, last_sync_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(source, entity) DO UPDATE SET
                cursor_value = excluded.cursor_value,
                cursor_skip = excluded.cursor_skip,
                last_sync_at = excluded.last_sync_at",
            rusqlite::params![source, entity, cursor_value, cursor_skip, now],
        )
        .context("upserting cursor")?;

        tx.commit().context("commit write transaction")?;
        Ok(())
    }

    /// Streams rows of `sql` to `row_fn`, one at a time. SQLite pages
    /// the underlying B-tree internally, so this does not materialise
    /// the whole table; `row_fn` is expected to copy out only what it
    /// needs per row, avoiding a second full-table allocation.
    pub fn scan(
        &self,
        sql: &str,
        mut row_fn: impl FnMut(&rusqlite::Row) -> Result<()>,
    ) -> Result<()> {
        let conn = self.open_reader()?;
        let mut stmt = conn.prepare(sql).context("preparing scan statement")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            row_fn(row)?;
        }
        Ok(())
    }

    /// General-purpose parametrised write, used by the stats ledger for
    /// its throttled counter upserts.
    pub fn writer_execute(&self, sql: &str, params: impl rusqlite::Params) -> Result<()> {
        let conn = self.writer.lock();
        conn.execute(sql, params).context("writer_execute")?;
        Ok(())
    }

    pub fn query_single_int(&self, sql: &str) -> Result<i64> {
        let conn = self.open_reader()?;
        conn.query_row(sql, [], |r| r.get(0))
            .context("query_single_int")
    }

    /// Executes a read-only SELECT and returns the result as a JSON
    /// array of row objects, column-named.
    pub fn query_json(&self, sql: &str) -> Result<serde_json::Value> {
        self.query_json_params(sql, [])
    }

    /// Same as `query_json`, with bind parameters — used wherever a
    /// caller-supplied value (not a trusted SQL fragment) needs to reach
    /// the query, so it never gets string-interpolated into the SQL text.
    pub fn query_json_params(&self, sql: &str, params: impl rusqlite::Params) -> Result<serde_json::Value> {
        let conn = self.open_reader()?;
        let mut stmt = conn.prepare(sql).context("preparing query_json statement")?;
        let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let mut rows = stmt.query(params)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut obj = serde_json::Map::new();
            for (i, name) in column_names.iter().enumerate() {
                let value: Value = row.get(i)?;
                obj.insert(name.clone(), sql_value_to_json(value));
            }
            out.push(serde_json::Value::Object(obj));
        }
        Ok(serde_json::Value::Array(out))
    }
}

fn sql_value_to_json(v: Value) -> serde_json::Value {
    match v {
        Value::Null => serde_json::Value::Null,
        Value::Integer(i) => serde_json::Value::from(i),
        Value::Real(f) => serde_json::Value::from(f),
        Value::Text(s) => serde_json::Value::String(s),
        Value::Blob(b) => serde_json::Value::String(hex::encode(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CONDITION;

    fn open_temp() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("test.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn cursor_defaults_to_empty() {
        let (_d, store) = open_temp();
        let (value, skip) = store.get_cursor("polygon", "condition").unwrap();
        assert_eq!(value, "");
        assert_eq!(skip, 0);
    }

    #[test]
    fn atomic_insert_upserts_rows_and_cursor_together() {
        let (_d, store) = open_temp();
        store.init_entity(&CONDITION).unwrap();

        let rows = vec![vec![
            Value::Text("c1".into()),
            Value::Text("q1".into()),
            Value::Text("oracle".into()),
            Value::Integer(2),
            Value::Null,
            Value::Null,
            Value::Null,
        ]];
        store
            .atomic_insert_with_cursor(&CONDITION, "condition", &rows, "polygon", "condition", "0", 1)
            .unwrap();

        let count = store.query_single_int("SELECT COUNT(*) FROM condition").unwrap();
        assert_eq!(count, 1);
        let (value, skip) = store.get_cursor("polygon", "condition").unwrap();
        assert_eq!(value, "0");
        assert_eq!(skip, 1);

        // Upsert with a changed column and a new cursor.
        let rows2 = vec![vec![
            Value::Text("c1".into()),
            Value::Text("q1".into()),
            Value::Text("oracle".into()),
            Value::Integer(2),
            Value::Integer(1000),
            Value::Null,
            Value::Null,
        ]];
        store
            .atomic_insert_with_cursor(&CONDITION, "condition", &rows2, "polygon", "condition", "1000", 0)
            .unwrap();
        let count = store.query_single_int("SELECT COUNT(*) FROM condition").unwrap();
        assert_eq!(count, 1);
        let resolved: i64 = store
            .query_single_int("SELECT resolution_timestamp FROM condition WHERE id = 'c1'")
            .unwrap();
        assert_eq!(resolved, 1000);
    }

    #[test]
    fn scan_visits_every_row() {
        let (_d, store) = open_temp();
        store.init_entity(&CONDITION).unwrap();
        for i in 0..5 {
            let rows = vec![vec![
                Value::Text(format!("c{i}")),
                Value::Null,
                Value::Null,
                Value::Integer(2),
                Value::Null,
                Value::Null,
                Value::Null,
            ]];
            store
                .atomic_insert_with_cursor(&CONDITION, "condition", &rows, "s", "condition", &i.to_string(), 0)
                .unwrap();
        }
        let mut seen = 0;
        store
            .scan("SELECT id FROM condition", |_row| {
                seen += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, 5);
    }
}
