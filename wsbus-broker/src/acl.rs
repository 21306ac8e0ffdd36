//! Read-through cache of topic ACL rules
//!
//! Authorization decisions on the hot path (`msg`, `channel_start`) must not
//! hit the rule store. The cache keeps all rules in memory keyed by rule id,
//! warms itself lazily from the [`crate::RuleStore`] on first use, and is
//! kept current by `put`/`delete` calls driven by the store's change feed.
//!
//! # Decision Algorithm
//!
//! For `check(topic, user, action)`:
//!
//! 1. Collect active rules whose action matches and whose pattern matches
//!    the concrete topic.
//! 2. Any matched rule marked public ⇒ allowed, no permissions required.
//! 3. Otherwise union the required-permission sets of all matched rules.
//! 4. Empty union (nothing matched) ⇒ denied.
//! 5. Else ask the [`crate::Authorizer`] whether the user holds any of them.
//!
//! # Concurrency
//!
//! Read-heavy: `check` takes the read side of an `RwLock`; `put`/`delete`
//! briefly exclude readers.

use crate::auth::{Authorizer, RuleStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use wsbus_core::{topic_matches, Result};

/// Action verbs an ACL rule can govern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    /// Adding a pattern to a subscription set
    Subscribe,
    /// Publishing on a topic
    Msg,
    /// Opening a channel on a topic
    ChannelStart,
}

/// One authorization record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclRule {
    /// Store-assigned rule id, the cache key
    pub id: String,
    /// Verb this rule governs
    pub action: RuleAction,
    /// Topic pattern the rule applies to
    pub pattern: String,
    /// Inactive rules never match
    pub active: bool,
    /// Public rules allow everyone, no permission needed
    pub public: bool,
    /// Permissions that satisfy this rule (any one suffices)
    pub permissions: Vec<String>,
}

/// In-memory rule cache with read-through warm-up
pub struct AclCache {
    rules: RwLock<HashMap<String, AclRule>>,
    warmed: OnceCell<()>,
    store: Arc<dyn RuleStore>,
    authorizer: Arc<dyn Authorizer>,
}

impl AclCache {
    /// Create a cache over a rule store and an authorizer
    pub fn new(store: Arc<dyn RuleStore>, authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
            warmed: OnceCell::new(),
            store,
            authorizer,
        }
    }

    /// Load rules from the store if that has not happened yet
    ///
    /// Concurrent callers coalesce on one load; a failed load is retried by
    /// the next caller.
    pub async fn ensure_warmed(&self) -> Result<()> {
        self.warmed
            .get_or_try_init(|| async {
                let loaded = self.store.load_rules().await?;
                let count = loaded.len();
                let mut rules = self.rules.write().await;
                for rule in loaded {
                    rules.insert(rule.id.clone(), rule);
                }
                tracing::debug!(count, "ACL cache warmed");
                Ok::<(), wsbus_core::Error>(())
            })
            .await?;
        Ok(())
    }

    /// Insert or replace a rule
    pub async fn put(&self, rule: AclRule) {
        self.rules.write().await.insert(rule.id.clone(), rule);
    }

    /// Remove a rule by id; unknown ids are a no-op
    pub async fn delete(&self, rule_id: &str) {
        self.rules.write().await.remove(rule_id);
    }

    /// Number of cached rules
    pub async fn len(&self) -> usize {
        self.rules.read().await.len()
    }

    /// Whether the cache holds no rules
    pub async fn is_empty(&self) -> bool {
        self.rules.read().await.is_empty()
    }

    /// Decide whether `user_id` may perform `action` on `topic`
    ///
    /// Returns `(allowed, required_permissions)` where the permission list
    /// is the union over all matched non-public rules. A topic no active
    /// rule matches yields `(false, [])`.
    pub async fn check(
        &self,
        topic: &str,
        user_id: &str,
        action: RuleAction,
    ) -> Result<(bool, Vec<String>)> {
        self.ensure_warmed().await?;

        // Union in sorted order so the answer is stable for callers and logs.
        let mut required: BTreeSet<String> = BTreeSet::new();
        {
            let rules = self.rules.read().await;
            for rule in rules.values() {
                if !rule.active || rule.action != action {
                    continue;
                }
                if !topic_matches(&rule.pattern, topic) {
                    continue;
                }
                if rule.public {
                    return Ok((true, Vec::new()));
                }
                required.extend(rule.permissions.iter().cloned());
            }
        }

        if required.is_empty() {
            return Ok((false, Vec::new()));
        }

        let required: Vec<String> = required.into_iter().collect();
        let allowed = self
            .authorizer
            .has_any_permission(user_id, &required)
            .await?;
        Ok((allowed, required))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;

    struct FixedRules(Vec<AclRule>);

    #[async_trait]
    impl RuleStore for FixedRules {
        async fn load_rules(&self) -> Result<Vec<AclRule>> {
            Ok(self.0.clone())
        }
    }

    struct GrantSet(HashSet<String>);

    #[async_trait]
    impl Authorizer for GrantSet {
        async fn has_any_permission(
            &self,
            _user_id: &str,
            permissions: &[String],
        ) -> Result<bool> {
            Ok(permissions.iter().any(|p| self.0.contains(p)))
        }
    }

    fn rule(id: &str, action: RuleAction, pattern: &str, public: bool, perms: &[&str]) -> AclRule {
        AclRule {
            id: id.to_string(),
            action,
            pattern: pattern.to_string(),
            active: true,
            public,
            permissions: perms.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn cache(rules: Vec<AclRule>, grants: &[&str]) -> AclCache {
        AclCache::new(
            Arc::new(FixedRules(rules)),
            Arc::new(GrantSet(grants.iter().map(|g| g.to_string()).collect())),
        )
    }

    #[tokio::test]
    async fn test_no_matching_rule_denies() {
        let cache = cache(vec![rule("r1", RuleAction::Msg, "a/#", false, &["p"])], &["p"]);

        let (allowed, required) = cache.check("b/x", "u1", RuleAction::Msg).await.unwrap();
        assert!(!allowed);
        assert!(required.is_empty());
    }

    #[tokio::test]
    async fn test_public_rule_short_circuits() {
        let cache = cache(
            vec![
                rule("r1", RuleAction::Msg, "news/#", true, &[]),
                rule("r2", RuleAction::Msg, "news/#", false, &["editor"]),
            ],
            &[],
        );

        let (allowed, required) = cache.check("news/daily", "u1", RuleAction::Msg).await.unwrap();
        assert!(allowed);
        assert!(required.is_empty());
    }

    #[tokio::test]
    async fn test_permission_union_consulted() {
        let cache = cache(
            vec![
                rule("r1", RuleAction::Msg, "sys/#", false, &["ops"]),
                rule("r2", RuleAction::Msg, "sys/+", false, &["admin"]),
            ],
            &["admin"],
        );

        let (allowed, required) = cache.check("sys/cpu", "u1", RuleAction::Msg).await.unwrap();
        assert!(allowed);
        assert_eq!(required, vec!["admin".to_string(), "ops".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_permission_denies() {
        let cache = cache(
            vec![rule("r1", RuleAction::Msg, "sys/#", false, &["ops"])],
            &["viewer"],
        );

        let (allowed, required) = cache.check("sys/cpu", "u1", RuleAction::Msg).await.unwrap();
        assert!(!allowed);
        assert_eq!(required, vec!["ops".to_string()]);
    }

    #[tokio::test]
    async fn test_inactive_rule_ignored() {
        let mut inactive = rule("r1", RuleAction::Msg, "a/#", true, &[]);
        inactive.active = false;
        let cache = cache(vec![inactive], &[]);

        let (allowed, _) = cache.check("a/x", "u1", RuleAction::Msg).await.unwrap();
        assert!(!allowed);
    }

    #[tokio::test]
    async fn test_action_mismatch_ignored() {
        let cache = cache(
            vec![rule("r1", RuleAction::ChannelStart, "a/#", true, &[])],
            &[],
        );

        let (allowed, _) = cache.check("a/x", "u1", RuleAction::Msg).await.unwrap();
        assert!(!allowed);
    }

    #[tokio::test]
    async fn test_put_and_delete() {
        let cache = cache(vec![], &[]);
        cache.ensure_warmed().await.unwrap();

        cache
            .put(rule("r1", RuleAction::Msg, "a/#", true, &[]))
            .await;
        let (allowed, _) = cache.check("a/x", "u1", RuleAction::Msg).await.unwrap();
        assert!(allowed);

        cache.delete("r1").await;
        let (allowed, _) = cache.check("a/x", "u1", RuleAction::Msg).await.unwrap();
        assert!(!allowed);
        assert!(cache.is_empty().await);
    }
}
