use async_trait::async_trait;
use dashmap::DashMap;

use relay_core::{Context, SessionId};

use crate::backend::ContextBackend;
use crate::clock::is_expired;
use crate::error::StoreError;

struct Entry {
    context: Context,
    accessed_ms: i64,
}

/// Process-local backend. Sessions live in a sharded map, so different
/// sessions never contend on the same lock.
#[derive(Default)]
pub struct MemoryBackend {
    entries: DashMap<SessionId, Entry>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContextBackend for MemoryBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn load(
        &self,
        session_id: &SessionId,
        now_ms: i64,
        ttl_ms: i64,
    ) -> Result<Option<Context>, StoreError> {
        // The shard guard must be released before removing from the same map.
        match self.entries.get_mut(session_id) {
            None => return Ok(None),
            Some(mut entry) => {
                if !is_expired(entry.accessed_ms, now_ms, ttl_ms) {
                    entry.accessed_ms = now_ms;
                    return Ok(Some(entry.context.clone()));
                }
            }
        }

        let _ = self
            .entries
            .remove_if(session_id, |_, e| is_expired(e.accessed_ms, now_ms, ttl_ms));
        Ok(None)
    }

    async fn save(
        &self,
        session_id: &SessionId,
        context: &Context,
        now_ms: i64,
    ) -> Result<(), StoreError> {
        let _ = self.entries.insert(
            session_id.clone(),
            Entry {
                context: context.clone(),
                accessed_ms: now_ms,
            },
        );
        Ok(())
    }

    async fn remove(&self, session_id: &SessionId) -> Result<bool, StoreError> {
        Ok(self.entries.remove(session_id).is_some())
    }

    async fn purge_expired(&self, now_ms: i64, ttl_ms: i64) -> Result<usize, StoreError> {
        let expired: Vec<SessionId> = self
            .entries
            .iter()
            .filter(|e| is_expired(e.accessed_ms, now_ms, ttl_ms))
            .map(|e| e.key().clone())
            .collect();

        let mut removed = 0;
        for id in expired {
            // Re-check: the record may have been refreshed since the scan.
            if self
                .entries
                .remove_if(&id, |_, e| is_expired(e.accessed_ms, now_ms, ttl_ms))
                .is_some()
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.entries.len())
    }
}
