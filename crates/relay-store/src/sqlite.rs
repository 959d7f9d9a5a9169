use async_trait::async_trait;
use tracing::instrument;

use relay_core::{Context, SessionId};

use crate::backend::ContextBackend;
use crate::clock::is_expired;
use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const TABLE: &str = "session_contexts";

/// Durable backend: one row per session in SQLite.
pub struct SqliteBackend {
    db: Database,
}

impl SqliteBackend {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ContextBackend for SqliteBackend {
    fn kind(&self) -> &'static str {
        "sqlite"
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    async fn load(
        &self,
        session_id: &SessionId,
        now_ms: i64,
        ttl_ms: i64,
    ) -> Result<Option<Context>, StoreError> {
        self.db.with_conn(|conn| {
            let record: Option<(String, i64)> = {
                let mut stmt = conn.prepare(
                    "SELECT context, accessed_at FROM session_contexts WHERE session_id = ?1",
                )?;
                let mut rows = stmt.query([session_id.as_str()])?;
                let record = match rows.next()? {
                    Some(row) => Some((
                        row_helpers::get(row, 0, TABLE, "context")?,
                        row_helpers::get(row, 1, TABLE, "accessed_at")?,
                    )),
                    None => None,
                };
                record
            };
            let Some((raw, accessed_at)) = record else {
                return Ok(None);
            };

            if is_expired(accessed_at, now_ms, ttl_ms) {
                conn.execute(
                    "DELETE FROM session_contexts WHERE session_id = ?1 AND accessed_at = ?2",
                    rusqlite::params![session_id.as_str(), accessed_at],
                )?;
                return Ok(None);
            }

            let context = row_helpers::parse_context(&raw, TABLE, "context")?;
            conn.execute(
                "UPDATE session_contexts SET accessed_at = ?1 WHERE session_id = ?2",
                rusqlite::params![now_ms, session_id.as_str()],
            )?;
            Ok(Some(context))
        })
    }

    #[instrument(skip(self, context), fields(session_id = %session_id, keys = context.len()))]
    async fn save(
        &self,
        session_id: &SessionId,
        context: &Context,
        now_ms: i64,
    ) -> Result<(), StoreError> {
        // Serialize before touching the row so a bad document never clobbers
        // the stored one.
        let raw = serde_json::to_string(context)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO session_contexts (session_id, context, created_at, accessed_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(session_id) DO UPDATE SET
                     context = excluded.context,
                     accessed_at = excluded.accessed_at",
                rusqlite::params![session_id.as_str(), raw, now_ms],
            )?;
            Ok(())
        })
    }

    async fn remove(&self, session_id: &SessionId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM session_contexts WHERE session_id = ?1",
                [session_id.as_str()],
            )?;
            Ok(changed > 0)
        })
    }

    async fn purge_expired(&self, now_ms: i64, ttl_ms: i64) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM session_contexts WHERE accessed_at < ?1",
                [now_ms.saturating_sub(ttl_ms)],
            )?;
            Ok(removed)
        })
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM session_contexts", [], |row| row.get(0))?;
            Ok(n as usize)
        })
    }
}
