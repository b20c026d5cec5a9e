use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use weft_core::error::Result;
use weft_core::state::State;
use weft_core::traits::{NodeContext, NodeKind};
use weft_engine::graph::{options_map, NodeRecord};
use weft_memory::DbPool;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteOptions {
    /// Database file, or `:memory:`. Empty keeps the pool's current binding.
    pub dbname: String,
}

/// Runs the working result as SQL on the shared pool. The output is the
/// rows as JSON, or the affected-row count for statements without rows.
pub struct SqliteQueryKind {
    db: Arc<DbPool>,
}

impl SqliteQueryKind {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Build from a saved record. A `dbname` that differs from the pool's
    /// rebinds the pool, and with it every other database node.
    pub fn from_record(record: &NodeRecord, db: Arc<DbPool>) -> Result<Self> {
        let options: SqliteOptions = record.options()?;
        let kind = Self::new(db);
        kind.configure(&options.dbname);
        Ok(kind)
    }

    pub fn configure(&self, dbname: &str) {
        if !dbname.is_empty() && dbname != self.db.path() {
            info!(from = %self.db.path(), to = %dbname, "Rebinding database pool");
            self.db.reconfigure(dbname);
        }
    }
}

impl NodeKind for SqliteQueryKind {
    fn kind(&self) -> &'static str {
        "SQLiteQueryNode"
    }

    fn run<'a>(&'a self, ctx: NodeContext<'a>, state: &'a mut State) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            debug!(node = %ctx.label, db = %self.db.path(), "Running query");
            let rows = self.db.query(&state.result)?;
            Ok(Some(serde_json::to_string(&rows)?))
        })
    }

    /// Reports the binding shared by every database node.
    fn options(&self) -> serde_json::Map<String, serde_json::Value> {
        options_map(&SqliteOptions {
            dbname: self.db.path(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_test_utils::run_kind;

    #[tokio::test]
    async fn test_query_rows_as_json() {
        let db = Arc::new(DbPool::in_memory());
        let kind = SqliteQueryKind::new(db.clone());

        let mut state = State::with_result("CREATE TABLE notes (body TEXT)");
        run_kind(&kind, "SQL", &mut state).await.unwrap();
        state.result = "INSERT INTO notes VALUES ('hi')".into();
        let out = run_kind(&kind, "SQL", &mut state).await.unwrap();
        assert_eq!(out.as_deref(), Some(r#"{"rows_affected":1}"#));

        state.result = "SELECT body FROM notes".into();
        let out = run_kind(&kind, "SQL", &mut state).await.unwrap();
        assert_eq!(out.as_deref(), Some(r#"[{"body":"hi"}]"#));
    }

    #[tokio::test]
    async fn test_reconfigure_rebinds_node() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(DbPool::in_memory());
        let kind = SqliteQueryKind::new(db.clone());

        let mut state = State::with_result("CREATE TABLE t (x INTEGER)");
        run_kind(&kind, "SQL", &mut state).await.unwrap();

        db.reconfigure(dir.path().join("other.db").to_string_lossy());
        state.result = "SELECT x FROM t".into();
        assert!(run_kind(&kind, "SQL", &mut state).await.is_err());
    }

    #[tokio::test]
    async fn test_saved_dbname_rebinds_every_node() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.db").to_string_lossy().into_owned();
        let db = Arc::new(DbPool::in_memory());

        let first = SqliteQueryKind::from_record(&NodeRecord::new("SQLiteQueryNode", "First", 0.0, 0.0), db.clone())
            .unwrap();
        assert_eq!(db.path(), ":memory:");

        let record = NodeRecord::new("SQLiteQueryNode", "Second", 0.0, 0.0).with_field("dbname", file.clone());
        let second = SqliteQueryKind::from_record(&record, db.clone()).unwrap();
        assert_eq!(db.path(), file);
        assert_eq!(first.options()["dbname"], serde_json::json!(file));

        let mut state = State::with_result("CREATE TABLE t (x INTEGER)");
        run_kind(&second, "Second", &mut state).await.unwrap();
        state.result = "INSERT INTO t VALUES (7)".into();
        run_kind(&first, "First", &mut state).await.unwrap();
        assert!(std::path::Path::new(&file).exists());

        state.result = "SELECT x FROM t".into();
        let out = run_kind(&second, "Second", &mut state).await.unwrap();
        assert_eq!(out.as_deref(), Some(r#"[{"x":7}]"#));
    }
}
