//! Policy evaluation with result caching
//!
//! Evaluation order follows IAM: an explicit Deny wins, then any Allow, otherwise
//! the request is implicitly denied.

use super::action::Action;
use super::policy::{Effect, PolicyDocument, Principal};
use lru::LruCache;
use std::num::NonZeroUsize;
use tracing::trace;

const DEFAULT_CACHE_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    action: Action,
    resource: String,
    caller: Option<Principal>,
}

/// Evaluates requests against one policy document at a time
///
/// The cache is tied to the last document evaluated and is cleared when a
/// different document comes in.
pub struct PolicyEngine {
    cache: LruCache<CacheKey, bool>,
    cached_for: Option<PolicyDocument>,
}

impl PolicyEngine {
    /// Create an engine with a cache of `cache_size` decisions
    pub fn new(cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        PolicyEngine {
            cache: LruCache::new(capacity),
            cached_for: None,
        }
    }

    pub fn new_default() -> Self {
        Self::new(DEFAULT_CACHE_SIZE)
    }

    /// Is `caller` allowed to perform `action` on `resource` under `policy`?
    ///
    /// `caller` is `None` when `policy` is the caller's own identity policy.
    pub fn evaluate(
        &mut self,
        policy: &PolicyDocument,
        action: &Action,
        resource: &str,
        caller: Option<&Principal>,
    ) -> bool {
        if self.cached_for.as_ref() != Some(policy) {
            self.cache.clear();
            self.cached_for = Some(policy.clone());
        }

        let key = CacheKey {
            action: action.clone(),
            resource: resource.to_string(),
            caller: caller.cloned(),
        };
        if let Some(&decision) = self.cache.get(&key) {
            return decision;
        }

        let decision = Self::decide(policy, action, resource, caller);
        trace!(%action, resource, decision, "Evaluated policy");
        self.cache.put(key, decision);
        decision
    }

    fn decide(
        policy: &PolicyDocument,
        action: &Action,
        resource: &str,
        caller: Option<&Principal>,
    ) -> bool {
        let mut allowed = false;
        for statement in policy.permission_statements() {
            if !statement.applies_to(action, resource, caller) {
                continue;
            }
            match statement.effect {
                Effect::Deny => return false,
                Effect::Allow => allowed = true,
            }
        }
        allowed
    }

    /// Number of cached decisions
    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
        self.cached_for = None;
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new_default()
    }
}
