//! Warehouse schema description
//!
//! The planner needs a flattened, human-readable enumeration of tables and
//! columns. Providers regenerate it on every call so planning always sees the
//! live schema; callers must not cache the text across schema changes.

use crate::error::{AssistantError, Result};
use rusqlite::Connection;
use std::sync::Mutex;

pub trait SchemaProvider: Send + Sync {
    /// Describe the current schema as text for prompt embedding.
    fn describe(&self) -> Result<String>;
}

/// Fixed schema text, for tests and air-gapped demos.
pub struct StaticSchemaProvider {
    text: String,
}

impl StaticSchemaProvider {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl SchemaProvider for StaticSchemaProvider {
    fn describe(&self) -> Result<String> {
        Ok(self.text.clone())
    }
}

/// Introspects a live SQLite database via `sqlite_master` and
/// `PRAGMA table_info`.
pub struct SqliteSchemaProvider {
    conn: Mutex<Connection>,
}

impl SqliteSchemaProvider {
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| AssistantError::Schema(format!("Failed to open database: {}", e)))?;
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

impl SchemaProvider for SqliteSchemaProvider {
    fn describe(&self) -> Result<String> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| AssistantError::Schema("Schema connection poisoned".to_string()))?;

        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )
            .map_err(|e| AssistantError::Schema(e.to_string()))?;
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| AssistantError::Schema(e.to_string()))?
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| AssistantError::Schema(e.to_string()))?;

        let mut out = String::new();
        for table in &tables {
            let mut info = conn
                .prepare(&format!("PRAGMA table_info(\"{}\")", table.replace('"', "\"\"")))
                .map_err(|e| AssistantError::Schema(e.to_string()))?;
            let columns: Vec<(String, String)> = info
                .query_map([], |row| {
                    Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?))
                })
                .map_err(|e| AssistantError::Schema(e.to_string()))?
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| AssistantError::Schema(e.to_string()))?;

            out.push_str(&format!("Table: {}\n", table));
            for (name, col_type) in columns {
                if col_type.is_empty() {
                    out.push_str(&format!("  - {}\n", name));
                } else {
                    out.push_str(&format!("  - {} ({})\n", name, col_type));
                }
            }
            out.push('\n');
        }

        Ok(out.trim_end().to_string())
    }
}
