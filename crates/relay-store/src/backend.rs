use async_trait::async_trait;

use relay_core::{Context, SessionId};

use crate::error::StoreError;

/// Storage behind the session store.
///
/// Backends own the TTL bookkeeping for their records but take the current
/// time and TTL from the caller, so every backend expires records the same
/// way. Timestamps are epoch milliseconds.
#[async_trait]
pub trait ContextBackend: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Fetch a live record and stamp it as accessed at `now_ms`. Expired
    /// records are dropped and reported as missing.
    async fn load(
        &self,
        session_id: &SessionId,
        now_ms: i64,
        ttl_ms: i64,
    ) -> Result<Option<Context>, StoreError>;

    /// Replace the whole record. Must leave the prior record untouched on
    /// failure.
    async fn save(
        &self,
        session_id: &SessionId,
        context: &Context,
        now_ms: i64,
    ) -> Result<(), StoreError>;

    /// Returns whether a record existed.
    async fn remove(&self, session_id: &SessionId) -> Result<bool, StoreError>;

    /// Drop every expired record. Returns how many were removed.
    async fn purge_expired(&self, now_ms: i64, ttl_ms: i64) -> Result<usize, StoreError>;

    /// Number of stored records, expired or not.
    async fn count(&self) -> Result<usize, StoreError>;
}
