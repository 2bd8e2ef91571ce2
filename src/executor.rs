//! Query execution
//!
//! [`QueryEngine`] is the opaque relational collaborator: run a SQL string,
//! get columns plus rows or a typed `QueryExecution` error. The
//! [`QueryExecutor`] adapter in front of it owns the preview row cap — it is
//! the only component allowed to mutate statement text after planning, and
//! the only mutation it performs is appending a LIMIT clause.

use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// Columns and row tuples from one statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let row_count = rows.len();
        Self {
            columns,
            rows,
            row_count,
        }
    }

    /// Synthetic one-cell table describing a failure, so synthesis always
    /// receives a well-formed result.
    pub fn error_table(message: impl Into<String>) -> Self {
        Self::new(
            vec!["Error".to_string()],
            vec![vec![Value::String(message.into())]],
        )
    }
}

#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Execute one SQL statement against the warehouse.
    async fn execute(&self, sql: &str) -> Result<(Vec<String>, Vec<Vec<Value>>)>;
}

lazy_static! {
    static ref LIMIT_CLAUSE: Regex = Regex::new(r"(?i)\blimit\b").unwrap();
}

/// Adapter normalizing engine output and enforcing the preview row cap.
pub struct QueryExecutor {
    engine: Arc<dyn QueryEngine>,
    max_preview_rows: usize,
    preview: bool,
    allowed_tables: Vec<String>,
}

impl QueryExecutor {
    pub fn new(engine: Arc<dyn QueryEngine>, max_preview_rows: usize) -> Self {
        Self {
            engine,
            max_preview_rows,
            preview: true,
            allowed_tables: Vec::new(),
        }
    }

    pub fn with_preview(mut self, preview: bool) -> Self {
        self.preview = preview;
        self
    }

    pub fn with_allowed_tables(mut self, tables: Vec<String>) -> Self {
        self.allowed_tables = tables;
        self
    }

    /// Lightweight guard: warn when the statement references none of the
    /// known warehouse tables. Advisory only.
    fn validate_tables(&self, sql: &str) {
        if self.allowed_tables.is_empty() {
            return;
        }
        let lowered = sql.to_lowercase();
        let referenced = self
            .allowed_tables
            .iter()
            .any(|t| lowered.contains(&t.to_lowercase()));
        if !referenced {
            warn!("SQL does not reference any allowlisted table");
        }
    }

    /// Append the preview cap when the statement carries no limit of its own.
    fn apply_preview_cap(&self, sql: &str) -> String {
        if self.preview && !LIMIT_CLAUSE.is_match(sql) {
            format!("{} LIMIT {}", sql.trim(), self.max_preview_rows)
        } else {
            sql.trim().to_string()
        }
    }

    pub async fn execute(&self, sql: &str) -> Result<QueryResult> {
        self.validate_tables(sql);
        let effective_sql = self.apply_preview_cap(sql);
        info!("Executing SQL (preview={}): {}", self.preview, effective_sql);

        let (columns, rows) = self.engine.execute(&effective_sql).await?;
        Ok(QueryResult::new(columns, rows))
    }
}

/// Embedded SQLite warehouse engine.
pub struct SqliteEngine {
    conn: Mutex<Connection>,
}

impl SqliteEngine {
    pub fn open(path: &std::path::Path, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| AssistantError::QueryExecution(format!("Failed to open database: {}", e)))?;
        conn.busy_timeout(busy_timeout)
            .map_err(|e| AssistantError::QueryExecution(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }
}

fn value_ref_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
    }
}

#[async_trait]
impl QueryEngine for SqliteEngine {
    async fn execute(&self, sql: &str) -> Result<(Vec<String>, Vec<Vec<Value>>)> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| AssistantError::QueryExecution("Engine connection poisoned".to_string()))?;

        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| AssistantError::QueryExecution(e.to_string()))?;

        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let column_count = columns.len();

        let mut rows_out = Vec::new();
        let mut rows = stmt
            .query([])
            .map_err(|e| AssistantError::QueryExecution(e.to_string()))?;
        while let Some(row) = rows
            .next()
            .map_err(|e| AssistantError::QueryExecution(e.to_string()))?
        {
            let mut tuple = Vec::with_capacity(column_count);
            for idx in 0..column_count {
                let value = row
                    .get_ref(idx)
                    .map_err(|e| AssistantError::QueryExecution(e.to_string()))?;
                tuple.push(value_ref_to_json(value));
            }
            rows_out.push(tuple);
        }

        Ok((columns, rows_out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_memory_engine() -> SqliteEngine {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE Products (ProductKey INTEGER, ProductName TEXT, Price REAL);\n\
             INSERT INTO Products VALUES (1, 'Road Bike', 1200.5);\n\
             INSERT INTO Products VALUES (2, 'Helmet', NULL);\n\
             INSERT INTO Products VALUES (3, 'Gloves', 15.0);",
        )
        .unwrap();
        SqliteEngine::from_connection(conn)
    }

    #[tokio::test]
    async fn test_rows_match_column_arity() {
        let executor = QueryExecutor::new(Arc::new(in_memory_engine()), 100);
        let result = executor
            .execute("SELECT ProductKey, ProductName, Price FROM Products")
            .await
            .unwrap();

        assert_eq!(result.columns.len(), 3);
        assert_eq!(result.row_count, result.rows.len());
        for row in &result.rows {
            assert_eq!(row.len(), result.columns.len());
        }
        assert_eq!(result.rows[1][2], Value::Null);
    }

    #[tokio::test]
    async fn test_preview_cap_appended_when_absent() {
        let executor = QueryExecutor::new(Arc::new(in_memory_engine()), 2);
        let result = executor.execute("SELECT * FROM Products").await.unwrap();
        assert_eq!(result.row_count, 2);
    }

    #[tokio::test]
    async fn test_existing_limit_left_alone() {
        let executor = QueryExecutor::new(Arc::new(in_memory_engine()), 1);
        let result = executor
            .execute("SELECT * FROM Products LIMIT 3")
            .await
            .unwrap();
        assert_eq!(result.row_count, 3);
    }

    #[tokio::test]
    async fn test_no_cap_outside_preview_mode() {
        let executor = QueryExecutor::new(Arc::new(in_memory_engine()), 1).with_preview(false);
        let result = executor.execute("SELECT * FROM Products").await.unwrap();
        assert_eq!(result.row_count, 3);
    }

    #[tokio::test]
    async fn test_unknown_column_is_query_execution_error() {
        let executor = QueryExecutor::new(Arc::new(in_memory_engine()), 100);
        let err = executor
            .execute("SELECT NoSuchColumn FROM Products")
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::QueryExecution(_)));
    }

    #[test]
    fn test_error_table_shape() {
        let table = QueryResult::error_table("SQL execution failed: boom");
        assert_eq!(table.columns, vec!["Error"]);
        assert_eq!(table.row_count, 1);
        assert_eq!(table.rows[0].len(), 1);
    }
}
