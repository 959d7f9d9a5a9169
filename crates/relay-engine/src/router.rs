use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{debug, warn};

use relay_core::{Classifier, ClassifierError, ClassifyRequest, HistoryEntry};

use crate::registry::CapabilityRegistry;

const QUOTES: &[char] = &['"', '\'', '`'];
const TRAILING_PUNCTUATION: &[char] = &['.', ',', '!', '?', ';', ':'];

/// Routing decision for one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    /// A registered capability, by normalized name.
    Matched(String),
    /// Nothing usable came back; `reason` says why.
    Unmatched { reason: String },
}

impl Route {
    fn unmatched(reason: impl Into<String>) -> Self {
        Self::Unmatched {
            reason: reason.into(),
        }
    }
}

/// Reduce a raw classifier answer to a candidate capability name.
///
/// Strips surrounding whitespace, quotes, and backticks, drops trailing
/// punctuation, and lowercases.
pub fn normalize_label(raw: &str) -> String {
    let mut label = raw.trim();
    loop {
        let next = label
            .trim_matches(QUOTES)
            .trim_end_matches(TRAILING_PUNCTUATION)
            .trim();
        if next.len() == label.len() {
            break;
        }
        label = next;
    }
    label.to_lowercase()
}

/// Classifies requests into registered capability names.
///
/// Total: whatever the classifier does (garbage, error, panic, hang), the
/// answer is a registered name or [`Route::Unmatched`].
pub struct IntentRouter {
    classifier: Arc<dyn Classifier>,
    registry: Arc<CapabilityRegistry>,
    timeout: Duration,
}

impl IntentRouter {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        registry: Arc<CapabilityRegistry>,
        timeout: Duration,
    ) -> Self {
        Self {
            classifier,
            registry,
            timeout,
        }
    }

    pub async fn route(&self, input: &str, history: &[HistoryEntry]) -> Route {
        let request = ClassifyRequest {
            input,
            capabilities: self.registry.names(),
            history,
        };

        let result = tokio::time::timeout(
            self.timeout,
            AssertUnwindSafe(self.classifier.classify(&request)).catch_unwind(),
        )
        .await;

        let raw = match result {
            Ok(Ok(Ok(raw))) => raw,
            Ok(Ok(Err(e))) => {
                warn!(classifier = self.classifier.name(), error = %e, "classification failed");
                return Route::unmatched(e.to_string());
            }
            Ok(Err(panic)) => {
                let e = ClassifierError::Panicked(panic_message(&panic));
                warn!(classifier = self.classifier.name(), error = %e, "classifier panicked");
                return Route::unmatched(e.to_string());
            }
            Err(_) => {
                let e = ClassifierError::Timeout(self.timeout);
                warn!(
                    classifier = self.classifier.name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "classifier timed out"
                );
                return Route::unmatched(e.to_string());
            }
        };

        let label = normalize_label(&raw);
        if self.registry.contains(&label) {
            debug!(capability = %label, "routed");
            Route::Matched(label)
        } else {
            debug!(raw = %raw, "classifier answer is not a registered capability");
            Route::unmatched(format!("unrecognized capability {raw:?}"))
        }
    }
}

pub(crate) fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}
