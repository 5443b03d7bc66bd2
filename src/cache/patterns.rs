//! Cache Pattern Rules
//!
//! Declarative policies consulted at `set` time to fill in options the
//! caller left unset (TTL, priority, tags, compression).
//!
//! Resolution order is deterministic: rules are kept in insertion order and
//! the first matching rule wins. Later rules never override an earlier
//! match.

use std::time::Duration;

use parking_lot::RwLock;

use super::invalidation::{KeyMatcher, MatchType};
use crate::error::Result;

/// One declarative caching rule.
#[derive(Debug, Clone)]
pub struct CachePattern {
    matcher: KeyMatcher,
    /// Default TTL for matching keys
    pub ttl: Option<Duration>,
    /// Default priority for matching keys
    pub priority: Option<u8>,
    /// Tags automatically attached to matching keys
    pub tags: Option<Vec<String>>,
    /// Whether matching values should be compressed
    pub compression: Option<bool>,
}

impl CachePattern {
    /// Create a rule; malformed regex patterns are rejected here.
    pub fn new(pattern: impl Into<String>, match_type: MatchType) -> Result<Self> {
        Ok(Self {
            matcher: KeyMatcher::new(pattern, match_type)?,
            ttl: None,
            priority: None,
            tags: None,
            compression: None,
        })
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority.clamp(1, 10));
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn with_compression(mut self, compression: bool) -> Self {
        self.compression = Some(compression);
        self
    }

    pub fn pattern(&self) -> &str {
        self.matcher.pattern()
    }

    pub fn match_type(&self) -> MatchType {
        self.matcher.match_type()
    }

    pub fn matches(&self, key: &str) -> bool {
        self.matcher.matches(key)
    }
}

/// Ordered rule list. First matching rule in insertion order wins.
#[derive(Default)]
pub struct CachePatternSet {
    rules: RwLock<Vec<CachePattern>>,
}

impl CachePatternSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule. A rule with the same pattern and match type replaces
    /// the existing one in place, keeping its position.
    pub fn add(&self, rule: CachePattern) {
        let mut rules = self.rules.write();
        if let Some(existing) = rules
            .iter_mut()
            .find(|r| r.pattern() == rule.pattern() && r.match_type() == rule.match_type())
        {
            *existing = rule;
        } else {
            rules.push(rule);
        }
    }

    /// Remove the rule with the given pattern text; returns whether one
    /// existed.
    pub fn remove(&self, pattern: &str) -> bool {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|r| r.pattern() != pattern);
        rules.len() != before
    }

    /// All rules, in resolution order.
    pub fn list(&self) -> Vec<CachePattern> {
        self.rules.read().clone()
    }

    /// First rule matching `key`, if any.
    pub fn resolve(&self, key: &str) -> Option<CachePattern> {
        self.rules.read().iter().find(|r| r.matches(key)).cloned()
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }
}
