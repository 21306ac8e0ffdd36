//! Client-side subscription registry
//!
//! Callbacks are stored per pattern. The registry tells its caller when a
//! wire frame is due: the first *external* callback on a pattern triggers
//! one `subscribe` frame, and removing the last one triggers one
//! `unsubscribe` frame, no matter how many callbacks were attached in
//! between.
//!
//! *Internal* subscriptions (channel plumbing on `<id>`, `<id>.clo`,
//! `<id>.err`, and pending `.cre` replies) never cause wire frames and are
//! excluded from resubscribe-on-reconnect.
//!
//! Removal is by opaque [`SubscriptionToken`] only; removing with a stale
//! token has no effect.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use wsbus_core::{Error, Result, TopicPattern};

/// Type of message handler callbacks: `(data, topic)` to a future
pub type MessageFn =
    Arc<dyn Fn(serde_json::Value, String) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Opaque handle identifying one registered callback
///
/// Returned by `subscribe`; the only way to remove that callback again.
#[derive(Debug, Clone)]
pub struct SubscriptionToken {
    pub(crate) id: u64,
    pub(crate) pattern: String,
}

impl SubscriptionToken {
    /// The pattern this token was registered under
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

struct CallbackEntry {
    id: u64,
    internal: bool,
    callback: MessageFn,
}

struct PatternEntry {
    parsed: TopicPattern,
    callbacks: Vec<CallbackEntry>,
}

impl PatternEntry {
    fn external_count(&self) -> usize {
        self.callbacks.iter().filter(|c| !c.internal).count()
    }
}

/// Registry of per-pattern callbacks
pub(crate) struct SubscriptionRegistry {
    patterns: Mutex<HashMap<String, PatternEntry>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self {
            patterns: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a callback under a pattern
    ///
    /// Returns the token and whether this was the first external callback
    /// for the pattern (the caller then owes one `subscribe` frame).
    pub(crate) async fn add(
        &self,
        pattern: &str,
        callback: MessageFn,
        internal: bool,
    ) -> Result<(SubscriptionToken, bool)> {
        let parsed =
            TopicPattern::parse(pattern).map_err(|e| Error::InvalidTopic(e.to_string()))?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut patterns = self.patterns.lock().await;
        let entry = patterns
            .entry(pattern.to_string())
            .or_insert_with(|| PatternEntry {
                parsed,
                callbacks: Vec::new(),
            });

        let first_external = !internal && entry.external_count() == 0;
        entry.callbacks.push(CallbackEntry {
            id,
            internal,
            callback,
        });

        Ok((
            SubscriptionToken {
                id,
                pattern: pattern.to_string(),
            },
            first_external,
        ))
    }

    /// Remove the callback a token refers to
    ///
    /// Returns `(removed, last_external)`; `last_external` is true when an
    /// external callback was removed and none remain for the pattern (the
    /// caller then owes one `unsubscribe` frame). A stale token removes
    /// nothing.
    pub(crate) async fn remove(&self, token: &SubscriptionToken) -> (bool, bool) {
        let mut patterns = self.patterns.lock().await;
        let Some(entry) = patterns.get_mut(&token.pattern) else {
            return (false, false);
        };

        let before = entry.callbacks.len();
        let mut was_external = false;
        entry.callbacks.retain(|c| {
            if c.id == token.id {
                was_external = !c.internal;
                false
            } else {
                true
            }
        });
        let removed = entry.callbacks.len() < before;

        let last_external = was_external && entry.external_count() == 0;
        if entry.callbacks.is_empty() {
            patterns.remove(&token.pattern);
        }
        (removed, last_external)
    }

    /// Remove every external callback for a pattern
    ///
    /// Returns true when external callbacks existed (one `unsubscribe`
    /// frame is then due). Internal subscriptions stay untouched.
    pub(crate) async fn remove_all(&self, pattern: &str) -> bool {
        let mut patterns = self.patterns.lock().await;
        let Some(entry) = patterns.get_mut(pattern) else {
            return false;
        };

        let had_external = entry.external_count() > 0;
        entry.callbacks.retain(|c| c.internal);
        if entry.callbacks.is_empty() {
            patterns.remove(pattern);
        }
        had_external
    }

    /// Callbacks whose pattern matches a concrete topic
    ///
    /// Arcs are cloned under the lock; handlers run after it is released.
    pub(crate) async fn matching(&self, topic: &str) -> Vec<MessageFn> {
        let patterns = self.patterns.lock().await;
        patterns
            .values()
            .filter(|entry| entry.parsed.matches(topic))
            .flat_map(|entry| entry.callbacks.iter().map(|c| Arc::clone(&c.callback)))
            .collect()
    }

    /// Patterns with at least one external callback, for resubscribe
    pub(crate) async fn external_patterns(&self) -> Vec<String> {
        let patterns = self.patterns.lock().await;
        patterns
            .iter()
            .filter(|(_, entry)| entry.external_count() > 0)
            .map(|(pattern, _)| pattern.clone())
            .collect()
    }
}
