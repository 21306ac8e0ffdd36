//! Collaborator traits consumed by the broker
//!
//! The broker does not issue tokens, store users, or persist ACL rules; it
//! consumes three narrow interfaces from the surrounding system:
//!
//! - [`Authenticator`]: bearer token → user id, called once per upgrade
//! - [`Authorizer`]: does a user hold any of a set of permissions
//! - [`RuleStore`]: one-shot enumeration of ACL rules to warm the cache
//!
//! All three are object-safe async traits so implementations can call out
//! to databases, caches, or token libraries.

use crate::acl::AclRule;
use async_trait::async_trait;
use wsbus_core::Result;

/// Resolves a bearer token to a user identity
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Validate the token and return the user id it belongs to
    ///
    /// # Errors
    ///
    /// Any error rejects the upgrade; the connection is closed with a
    /// policy-violation code and detail `"invalid token"`.
    async fn authenticate(&self, token: &str) -> Result<String>;
}

/// Answers permission queries for authenticated users
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Does `user_id` hold at least one of `permissions`?
    async fn has_any_permission(&self, user_id: &str, permissions: &[String]) -> Result<bool>;
}

/// Source of ACL rules for the authorization cache
///
/// The cache loads lazily via `load_rules` on first use; later mutations
/// reach it through [`crate::AclCache::put`] / [`crate::AclCache::delete`],
/// driven by whatever change feed the embedding application has.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Enumerate all rules currently in the store
    async fn load_rules(&self) -> Result<Vec<AclRule>>;
}

/// Accept-all policy for demos and tests
///
/// Authenticates any non-empty token as a user whose id is the token itself,
/// and grants every permission query.
pub struct AllowAll;

#[async_trait]
impl Authenticator for AllowAll {
    async fn authenticate(&self, token: &str) -> Result<String> {
        if token.is_empty() {
            return Err(wsbus_core::Error::Handshake("empty token".to_string()));
        }
        Ok(token.to_string())
    }
}

#[async_trait]
impl Authorizer for AllowAll {
    async fn has_any_permission(&self, _user_id: &str, _permissions: &[String]) -> Result<bool> {
        Ok(true)
    }
}
