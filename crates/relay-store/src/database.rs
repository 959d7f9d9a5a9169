use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::schema;

/// Shared handle to the context database.
///
/// rusqlite connections are not `Sync`, so every statement runs under one
/// `parking_lot::Mutex`. Clones share the connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Database {
    /// Open `path`, creating the file and its parent directories if needed.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(format!("create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        initialize(&conn)?;
        info!(path = %path.display(), "context database opened");
        Ok(Self::wrap(conn, path.to_path_buf()))
    }

    /// Private in-memory database, mostly for tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        initialize(&conn)?;
        Ok(Self::wrap(conn, PathBuf::from(":memory:")))
    }

    fn wrap(conn: Connection, path: PathBuf) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        }
    }

    /// Run `f` while holding the connection lock.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Apply pragmas and DDL, then stamp or check the schema version.
fn initialize(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(schema::PRAGMAS)
        .map_err(|e| StoreError::Database(format!("pragmas: {e}")))?;
    conn.execute_batch(schema::CREATE_TABLES)
        .map_err(|e| StoreError::Database(format!("schema: {e}")))?;

    let stored: Option<u32> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    match stored {
        None => {
            let _ = conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                [schema::SCHEMA_VERSION],
            )?;
            debug!(version = schema::SCHEMA_VERSION, "schema version stamped");
        }
        Some(v) if v > schema::SCHEMA_VERSION => {
            return Err(StoreError::Database(format!(
                "context database schema v{v} is newer than supported v{}",
                schema::SCHEMA_VERSION
            )));
        }
        Some(_) => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version_rows(db: &Database) -> Vec<u32> {
        db.with_conn(|conn| {
            let rows = conn
                .prepare("SELECT version FROM schema_version")?
                .query_map([], |row| row.get(0))?
                .collect::<Result<_, _>>()?;
            Ok(rows)
        })
        .unwrap()
    }

    #[test]
    fn in_memory_is_initialized() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.path(), Path::new(":memory:"));
        assert_eq!(version_rows(&db), vec![schema::SCHEMA_VERSION]);

        let tables: Vec<String> = db
            .with_conn(|conn| {
                let names = conn
                    .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<_, _>>()?;
                Ok(names)
            })
            .unwrap();
        assert!(tables.contains(&"session_contexts".to_string()));
        assert!(tables.contains(&"schema_version".to_string()));
    }

    #[test]
    fn reopening_keeps_a_single_version_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("contexts.db");

        drop(Database::open(&path).unwrap());
        assert!(path.exists());

        let db = Database::open(&path).unwrap();
        assert_eq!(version_rows(&db), vec![schema::SCHEMA_VERSION]);
    }

    #[test]
    fn newer_schema_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contexts.db");

        let db = Database::open(&path).unwrap();
        db.with_conn(|conn| {
            let _ = conn.execute("UPDATE schema_version SET version = 99", [])?;
            Ok(())
        })
        .unwrap();
        drop(db);

        let err = Database::open(&path).err().unwrap();
        assert!(err.to_string().contains("newer than supported"), "got: {err}");
    }
}
