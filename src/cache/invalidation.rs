//! Invalidation Engine
//!
//! Group removal of entries by tag or key pattern. The tag index maps each
//! tag to the set of keys currently carrying it, with a reverse key → tags
//! map so every delete path can prune the index in the same logical
//! operation.
//!
//! Index invariant: a key appears under tag T iff some live entry for that
//! key was last set with T in its tag list. Invalidating a key that is
//! already gone is a no-op, never an error.

use std::collections::HashSet;

use dashmap::DashMap;
use regex::Regex;

use crate::error::{Error, Result};

/// How a pattern is matched against keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Prefix,
    Suffix,
    Contains,
    Regex,
}

/// A validated key matcher. Regex patterns are compiled (and rejected) at
/// construction, so matching never fails afterwards.
#[derive(Debug, Clone)]
pub struct KeyMatcher {
    pattern: String,
    match_type: MatchType,
    regex: Option<Regex>,
}

impl KeyMatcher {
    /// Build a matcher, rejecting malformed regex patterns synchronously.
    pub fn new(pattern: impl Into<String>, match_type: MatchType) -> Result<Self> {
        let pattern = pattern.into();
        let regex = match match_type {
            MatchType::Regex => Some(Regex::new(&pattern).map_err(|e| Error::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?),
            _ => None,
        };
        Ok(Self {
            pattern,
            match_type,
            regex,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn match_type(&self) -> MatchType {
        self.match_type
    }

    /// Whether `key` matches this pattern.
    pub fn matches(&self, key: &str) -> bool {
        match self.match_type {
            MatchType::Prefix => key.starts_with(&self.pattern),
            MatchType::Suffix => key.ends_with(&self.pattern),
            MatchType::Contains => key.contains(&self.pattern),
            MatchType::Regex => self
                .regex
                .as_ref()
                .map(|re| re.is_match(key))
                .unwrap_or(false),
        }
    }
}

/// Tag → keys reverse index with key → tags pruning map.
///
/// Writers publish the entry before the tag mapping, so a concurrent tag
/// invalidation never sees a mapping for a key whose entry is not yet
/// visible.
#[derive(Default)]
pub struct TagIndex {
    tag_to_keys: DashMap<String, HashSet<String>>,
    key_to_tags: DashMap<String, Vec<String>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the tag mappings for a freshly written key. Any previous
    /// mappings for the key are replaced (a re-`set` with different tags
    /// must drop the stale ones).
    pub fn insert(&self, key: &str, tags: &[String]) {
        self.remove_key(key);
        if tags.is_empty() {
            return;
        }
        for tag in tags {
            self.tag_to_keys
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        self.key_to_tags.insert(key.to_string(), tags.to_vec());
    }

    /// Prune all mappings for a key whose entry went away (deleted, evicted
    /// or expired). Emptied tag sets are dropped.
    pub fn remove_key(&self, key: &str) {
        if let Some((_, tags)) = self.key_to_tags.remove(key) {
            for tag in tags {
                if let Some(mut keys) = self.tag_to_keys.get_mut(&tag) {
                    keys.remove(key);
                    if keys.is_empty() {
                        drop(keys);
                        self.tag_to_keys.remove_if(&tag, |_, set| set.is_empty());
                    }
                }
            }
        }
    }

    /// Union of keys carrying any of the given tags.
    pub fn keys_for_tags(&self, tags: &[String]) -> HashSet<String> {
        let mut keys = HashSet::new();
        for tag in tags {
            if let Some(set) = self.tag_to_keys.get(tag) {
                keys.extend(set.iter().cloned());
            }
        }
        keys
    }

    /// Tags currently carried by a key.
    pub fn tags_for_key(&self, key: &str) -> Vec<String> {
        self.key_to_tags
            .get(key)
            .map(|tags| tags.clone())
            .unwrap_or_default()
    }

    /// All keys with at least one tag mapping.
    pub fn indexed_keys(&self) -> Vec<String> {
        self.key_to_tags
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of distinct indexed tags.
    pub fn tag_count(&self) -> usize {
        self.tag_to_keys.len()
    }

    /// Drop the whole index.
    pub fn clear(&self) {
        self.tag_to_keys.clear();
        self.key_to_tags.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_matcher_prefix_suffix_contains() {
        let prefix = KeyMatcher::new("user:", MatchType::Prefix).unwrap();
        assert!(prefix.matches("user:42"));
        assert!(!prefix.matches("org:user:42"));

        let suffix = KeyMatcher::new(":profile", MatchType::Suffix).unwrap();
        assert!(suffix.matches("user:42:profile"));
        assert!(!suffix.matches("user:42:settings"));

        let contains = KeyMatcher::new(":42:", MatchType::Contains).unwrap();
        assert!(contains.matches("user:42:profile"));
        assert!(!contains.matches("user:43:profile"));
    }

    #[test]
    fn test_matcher_regex() {
        let matcher = KeyMatcher::new(r"^user:\d+$", MatchType::Regex).unwrap();
        assert!(matcher.matches("user:42"));
        assert!(!matcher.matches("user:abc"));
    }

    #[test]
    fn test_invalid_regex_rejected_synchronously() {
        let err = KeyMatcher::new("[unclosed", MatchType::Regex).unwrap_err();
        assert_matches!(err, Error::InvalidPattern { .. });
    }

    #[test]
    fn test_tag_index_insert_and_lookup() {
        let index = TagIndex::new();
        index.insert("user:42", &tags(&["user:42", "org:7"]));
        index.insert("user:43", &tags(&["org:7"]));

        let keys = index.keys_for_tags(&tags(&["org:7"]));
        assert_eq!(keys.len(), 2);

        let keys = index.keys_for_tags(&tags(&["user:42"]));
        assert_eq!(keys.len(), 1);
        assert!(keys.contains("user:42"));
    }

    #[test]
    fn test_tag_index_remove_key_prunes_empty_tags() {
        let index = TagIndex::new();
        index.insert("k", &tags(&["t1", "t2"]));
        assert_eq!(index.tag_count(), 2);

        index.remove_key("k");
        assert!(index.keys_for_tags(&tags(&["t1"])).is_empty());
        assert_eq!(index.tag_count(), 0);
        assert!(index.tags_for_key("k").is_empty());
    }

    #[test]
    fn test_tag_index_reinsert_replaces_mappings() {
        let index = TagIndex::new();
        index.insert("k", &tags(&["old"]));
        index.insert("k", &tags(&["new"]));

        assert!(index.keys_for_tags(&tags(&["old"])).is_empty());
        assert_eq!(index.keys_for_tags(&tags(&["new"])).len(), 1);
    }

    #[test]
    fn test_tag_index_remove_missing_key_is_noop() {
        let index = TagIndex::new();
        index.remove_key("never-seen");
        assert_eq!(index.tag_count(), 0);
    }

    #[test]
    fn test_unknown_tag_yields_empty_set() {
        let index = TagIndex::new();
        assert!(index.keys_for_tags(&tags(&["ghost"])).is_empty());
    }
}
