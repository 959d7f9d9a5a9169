//! Session context store: sliding-TTL key/value access over a swappable
//! backend.
//!
//! Backend failures never escape this module. Reads degrade to "no
//! context" and writes to `false`, with the error logged. [`Lookup`] keeps a
//! miss distinguishable from an unavailable backend so callers can warn
//! that session continuity may be broken.
//!
//! Concurrent `put`s for the same session are last-write-wins; there is no
//! optimistic concurrency control.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use relay_core::{Context, SessionId};

use crate::backend::ContextBackend;
use crate::clock::{Clock, SystemClock};
use crate::memory::MemoryBackend;

const DEFAULT_TTL: Duration = Duration::from_secs(3600);
const DEFAULT_SWEEP_EVERY_PUTS: u64 = 10;

/// Store tuning.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Time since last access after which a session expires.
    pub ttl: Duration,
    /// Run an expiry sweep after this many successful puts. 0 disables the
    /// amortized sweep.
    pub sweep_every_puts: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            sweep_every_puts: DEFAULT_SWEEP_EVERY_PUTS,
        }
    }
}

/// Outcome of reading a session's context.
#[derive(Clone, Debug, PartialEq)]
pub enum Lookup {
    Hit(Context),
    /// Never stored, expired, or deleted.
    Miss,
    /// The backend failed; the message is safe to show to callers.
    Unavailable(String),
}

impl Lookup {
    pub fn into_context(self) -> Option<Context> {
        match self {
            Self::Hit(ctx) => Some(ctx),
            Self::Miss | Self::Unavailable(_) => None,
        }
    }
}

pub struct SessionStore {
    backend: Arc<dyn ContextBackend>,
    clock: Arc<dyn Clock>,
    config: StoreConfig,
    puts: AtomicU64,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn ContextBackend>, config: StoreConfig) -> Self {
        Self {
            backend,
            clock: Arc::new(SystemClock),
            config,
            puts: AtomicU64::new(0),
        }
    }

    /// Store backed by process memory.
    pub fn in_memory(config: StoreConfig) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), config)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    pub fn backend_kind(&self) -> &'static str {
        self.backend.kind()
    }

    fn ttl_ms(&self) -> i64 {
        self.config.ttl.as_millis() as i64
    }

    /// Read a session's context, refreshing its expiry on a hit.
    #[instrument(skip(self), fields(session_id = %session_id, backend = self.backend.kind()))]
    pub async fn load(&self, session_id: &SessionId) -> Lookup {
        match self
            .backend
            .load(session_id, self.clock.now_ms(), self.ttl_ms())
            .await
        {
            Ok(Some(ctx)) => {
                debug!(keys = ctx.len(), "context loaded");
                Lookup::Hit(ctx)
            }
            Ok(None) => {
                debug!("no stored context");
                Lookup::Miss
            }
            Err(e) => {
                error!(error = %e, "failed to load context");
                Lookup::Unavailable(format!("context store unavailable: {e}"))
            }
        }
    }

    /// Read a session's context; misses and failures are both `None`.
    pub async fn get(&self, session_id: &SessionId) -> Option<Context> {
        self.load(session_id).await.into_context()
    }

    /// Replace a session's whole context and reset its expiry.
    #[instrument(skip(self, context), fields(session_id = %session_id, keys = context.len()))]
    pub async fn put(&self, session_id: &SessionId, context: &Context) -> bool {
        if let Err(e) = self
            .backend
            .save(session_id, context, self.clock.now_ms())
            .await
        {
            error!(error = %e, "failed to store context");
            return false;
        }

        let every = self.config.sweep_every_puts;
        if every > 0 {
            let n = self.puts.fetch_add(1, Ordering::Relaxed) + 1;
            if n % every == 0 {
                let _ = self.purge_expired().await;
            }
        }
        true
    }

    /// Remove a session immediately, regardless of TTL.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn delete(&self, session_id: &SessionId) -> bool {
        match self.backend.remove(session_id).await {
            Ok(existed) => {
                debug!(existed, "context deleted");
                true
            }
            Err(e) => {
                error!(error = %e, "failed to delete context");
                false
            }
        }
    }

    /// Shallow-merge `fragment` into the stored context (read, merge, write).
    pub async fn update(&self, session_id: &SessionId, fragment: Context) -> bool {
        let mut context = match self.load(session_id).await {
            Lookup::Hit(ctx) => ctx,
            Lookup::Miss => Context::new(),
            // Writing a partial document over an unreadable one would lose data.
            Lookup::Unavailable(_) => return false,
        };
        let _ = context.merge(fragment);
        self.put(session_id, &context).await
    }

    /// Drop every expired session. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        match self
            .backend
            .purge_expired(self.clock.now_ms(), self.ttl_ms())
            .await
        {
            Ok(removed) => {
                if removed > 0 {
                    debug!(removed, "purged expired sessions");
                }
                removed
            }
            Err(e) => {
                warn!(error = %e, "expiry sweep failed");
                0
            }
        }
    }

    /// Number of stored sessions, including expired ones not yet purged.
    pub async fn session_count(&self) -> usize {
        self.backend.count().await.unwrap_or_else(|e| {
            warn!(error = %e, "failed to count sessions");
            0
        })
    }

    /// Start a background task that purges expired sessions every `interval`
    /// until `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            info!(interval_secs = interval.as_secs(), "context sweeper started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let _ = store.purge_expired().await;
                    }
                }
            }
            debug!("context sweeper stopped");
        })
    }
}
