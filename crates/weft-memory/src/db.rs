use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use weft_core::error::{Result, WeftError};

struct PoolInner {
    path: String,
    conn: Option<Connection>,
}

/// Shared SQLite connection, opened on first use. Every node holding the
/// pool sees a `reconfigure` immediately.
pub struct DbPool {
    inner: Mutex<PoolInner>,
}

impl DbPool {
    /// A pool for `path` (or `:memory:`). Nothing is opened yet.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                path: path.into(),
                conn: None,
            }),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(":memory:")
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn path(&self) -> String {
        self.lock().path.clone()
    }

    pub fn is_open(&self) -> bool {
        self.lock().conn.is_some()
    }

    /// Point the pool at a different database. The old connection is
    /// dropped; the new one opens on next use.
    pub fn reconfigure(&self, path: impl Into<String>) {
        let mut inner = self.lock();
        inner.path = path.into();
        inner.conn = None;
        info!(path = %inner.path, "Database pool reconfigured");
    }

    fn open(path: &str) -> Result<Connection> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    WeftError::Database(format!("Failed to create db directory: {}", e))
                })?;
            }
            Connection::open(path)
        }
        .map_err(|e| WeftError::Database(e.to_string()))?;
        debug!(path, "SQLite connection opened");
        Ok(conn)
    }

    /// Run one SQL statement. Row-returning statements yield a JSON array
    /// of `{column: value}` objects, others `{"rows_affected": n}`.
    pub fn query(&self, sql: &str) -> Result<Value> {
        let mut inner = self.lock();
        if inner.conn.is_none() {
            let conn = Self::open(&inner.path)?;
            inner.conn = Some(conn);
        }
        let conn = inner
            .conn
            .as_ref()
            .ok_or_else(|| WeftError::Database("connection unavailable".into()))?;

        let db_err = |e: rusqlite::Error| WeftError::Database(e.to_string());
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        if stmt.column_count() == 0 {
            let affected = stmt.execute([]).map_err(db_err)?;
            return Ok(json!({ "rows_affected": affected }));
        }

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query([]).map_err(db_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(db_err)? {
            let mut obj = Map::new();
            for (i, name) in columns.iter().enumerate() {
                let value = row.get_ref(i).map_err(db_err)?;
                obj.insert(name.clone(), to_json(value));
            }
            out.push(Value::Object(obj));
        }
        Ok(Value::Array(out))
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
    }
}
