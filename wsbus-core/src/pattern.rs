//! MQTT-style pattern matching for topics
//!
//! Topics are split into levels using `/` as a delimiter, and wildcards match
//! levels, never characters.
//!
//! # Wildcard Semantics
//!
//! - `+` - Matches exactly one level at that position
//! - `#` - Matches zero or more trailing levels (must be the last level)
//!
//! # Pattern Rules
//!
//! - Wildcards are level-level, not character-level
//! - `#` must be the last level if present
//! - The empty string is not a valid pattern
//! - An empty topic never matches anything
//!
//! # Examples
//!
//! ```rust
//! use wsbus_core::TopicPattern;
//!
//! // Exact match
//! let exact = TopicPattern::parse("orders/created").unwrap();
//! assert!(exact.matches("orders/created"));
//! assert!(!exact.matches("orders/updated"));
//!
//! // Single-level wildcard
//! let pattern = TopicPattern::parse("user/+/msg").unwrap();
//! assert!(pattern.matches("user/42/msg"));
//! assert!(!pattern.matches("user/42/extra/msg")); // too many levels
//!
//! // Multi-level wildcard
//! let multi = TopicPattern::parse("system/#").unwrap();
//! assert!(multi.matches("system"));
//! assert!(multi.matches("system/cpu"));
//! assert!(multi.matches("system/cpu/load"));
//! ```

use std::fmt;

/// Error type for pattern parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    /// Empty pattern string
    EmptyPattern,
    /// Multi-level wildcard not at the end (e.g., "a/#/b")
    MultiLevelNotLast,
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternError::EmptyPattern => write!(f, "Pattern cannot be empty"),
            PatternError::MultiLevelNotLast => {
                write!(f, "Multi-level wildcard '#' must be the last level")
            }
        }
    }
}

impl std::error::Error for PatternError {}

/// A single level in a topic pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Level {
    /// Literal string level
    Literal(String),
    /// Single-level wildcard (+)
    OneLevel,
    /// Multi-level wildcard (#), always the last level
    Rest,
}

/// Parsed MQTT-style topic pattern
///
/// Parsing happens once; `matches` is a pure walk over the parsed levels and
/// is deterministic for any `(pattern, topic)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    pattern: String,
    levels: Vec<Level>,
}

impl TopicPattern {
    /// Parse a pattern from a string
    ///
    /// # Examples
    ///
    /// ```
    /// use wsbus_core::TopicPattern;
    ///
    /// let exact = TopicPattern::parse("orders").unwrap();
    /// let single = TopicPattern::parse("orders/+/shipped").unwrap();
    /// let multi = TopicPattern::parse("orders/#").unwrap();
    /// ```
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::EmptyPattern);
        }

        let parts: Vec<&str> = pattern.split('/').collect();
        let mut levels = Vec::with_capacity(parts.len());

        for (i, part) in parts.iter().enumerate() {
            match *part {
                "+" => levels.push(Level::OneLevel),
                "#" => {
                    if i != parts.len() - 1 {
                        return Err(PatternError::MultiLevelNotLast);
                    }
                    levels.push(Level::Rest);
                }
                literal => levels.push(Level::Literal(literal.to_string())),
            }
        }

        Ok(Self {
            pattern: pattern.to_string(),
            levels,
        })
    }

    /// Check if a concrete topic matches this pattern
    ///
    /// Walks pattern and topic left-to-right: `+` consumes one level, a
    /// literal must equal the current topic level, and `#` accepts whatever
    /// remains (including nothing). Success requires both sides to be fully
    /// consumed unless the walk ended on `#`.
    ///
    /// # Examples
    ///
    /// ```
    /// use wsbus_core::TopicPattern;
    ///
    /// let pattern = TopicPattern::parse("a/+/b").unwrap();
    /// assert!(pattern.matches("a/x/b"));
    /// assert!(!pattern.matches("a/x/y/b"));
    /// ```
    pub fn matches(&self, topic: &str) -> bool {
        if topic.is_empty() {
            return false;
        }

        let parts: Vec<&str> = topic.split('/').collect();
        let mut i = 0;

        for level in &self.levels {
            match level {
                // Parser guarantees `#` is last: it swallows the remainder,
                // even an empty one.
                Level::Rest => return true,
                Level::OneLevel => {
                    if i >= parts.len() {
                        return false;
                    }
                    i += 1;
                }
                Level::Literal(literal) => {
                    if i >= parts.len() || parts[i] != literal.as_str() {
                        return false;
                    }
                    i += 1;
                }
            }
        }

        i == parts.len()
    }

    /// Check if this pattern contains wildcards
    pub fn is_wildcard(&self) -> bool {
        self.levels
            .iter()
            .any(|l| matches!(l, Level::OneLevel | Level::Rest))
    }

    /// Get the original pattern string
    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pattern)
    }
}

/// Match a concrete topic against a pattern string
///
/// Parses the pattern and walks it against the topic. Ill-formed patterns
/// (empty string, `#` not last) never match.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    TopicPattern::parse(pattern)
        .map(|p| p.matches(topic))
        .unwrap_or(false)
}

/// Check whether any pattern in the list matches the topic
///
/// An empty pattern list matches nothing.
pub fn any_match<I, S>(patterns: I, topic: &str) -> bool
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    patterns
        .into_iter()
        .any(|p| topic_matches(p.as_ref(), topic))
}

/// Check whether every pattern in the list matches the topic
///
/// An empty pattern list returns false, not vacuous truth.
pub fn all_match<I, S>(patterns: I, topic: &str) -> bool
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut saw_any = false;
    for p in patterns {
        saw_any = true;
        if !topic_matches(p.as_ref(), topic) {
            return false;
        }
    }
    saw_any
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_pattern() {
        let pattern = TopicPattern::parse("orders").unwrap();
        assert!(!pattern.is_wildcard());
        assert_eq!(pattern.as_str(), "orders");

        assert!(pattern.matches("orders"));
        assert!(!pattern.matches("orders/new"));
        assert!(!pattern.matches("order"));
    }

    #[test]
    fn test_exact_multi_level() {
        let pattern = TopicPattern::parse("orders/new/shipped").unwrap();

        assert!(pattern.matches("orders/new/shipped"));
        assert!(!pattern.matches("orders/new"));
        assert!(!pattern.matches("orders/old/shipped"));
    }

    #[test]
    fn test_one_level_wildcard() {
        let pattern = TopicPattern::parse("+").unwrap();
        assert!(pattern.is_wildcard());

        assert!(pattern.matches("a"));
        assert!(!pattern.matches("a/b"));
    }

    #[test]
    fn test_one_level_wildcard_middle() {
        let pattern = TopicPattern::parse("a/+/b").unwrap();

        assert!(pattern.matches("a/x/b"));
        assert!(!pattern.matches("a/x/y/b"));
        assert!(!pattern.matches("a/b"));
    }

    #[test]
    fn test_multiple_one_level_wildcards() {
        let pattern = TopicPattern::parse("user/+/+").unwrap();

        assert!(pattern.matches("user/42/msg"));
        assert!(!pattern.matches("user/42"));
        assert!(!pattern.matches("user/42/msg/extra"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        let pattern = TopicPattern::parse("a/#").unwrap();

        // `#` matches zero or more trailing levels
        assert!(pattern.matches("a"));
        assert!(pattern.matches("a/b"));
        assert!(pattern.matches("a/b/c"));
        assert!(!pattern.matches("b"));
        assert!(!pattern.matches(""));
    }

    #[test]
    fn test_multi_level_wildcard_root() {
        let pattern = TopicPattern::parse("#").unwrap();

        assert!(pattern.matches("a"));
        assert!(pattern.matches("a/b/c"));
        assert!(!pattern.matches(""));
    }

    #[test]
    fn test_mixed_wildcards() {
        let pattern = TopicPattern::parse("a/+/#").unwrap();

        assert!(pattern.matches("a/x"));
        assert!(pattern.matches("a/x/y/z"));
        assert!(!pattern.matches("a"));
    }

    #[test]
    fn test_empty_pattern() {
        let result = TopicPattern::parse("");
        assert!(matches!(result, Err(PatternError::EmptyPattern)));
    }

    #[test]
    fn test_multi_level_not_last() {
        let result = TopicPattern::parse("a/#/b");
        assert!(matches!(result, Err(PatternError::MultiLevelNotLast)));
    }

    #[test]
    fn test_topic_matches_ill_formed() {
        // Ill-formed patterns never match, they do not panic
        assert!(!topic_matches("a/#/b", "a/x/b"));
        assert!(!topic_matches("", "a"));
    }

    #[test]
    fn test_wildcard_non_match() {
        assert!(!topic_matches("system/#", "sys/alert"));
    }

    #[test]
    fn test_deterministic() {
        // Same inputs, same result, regardless of prior calls
        for _ in 0..3 {
            assert!(topic_matches("user/+/msg", "user/42/msg"));
            assert!(!topic_matches("user/+/msg", "user/42/mail"));
        }
    }

    #[test]
    fn test_any_match() {
        let patterns = ["a/+", "b/#"];
        assert!(any_match(patterns, "a/x"));
        assert!(any_match(patterns, "b/x/y"));
        assert!(!any_match(patterns, "c"));

        let empty: [&str; 0] = [];
        assert!(!any_match(empty, "a"));
    }

    #[test]
    fn test_all_match() {
        assert!(all_match(["a/#", "a/+"], "a/x"));
        assert!(!all_match(["a/#", "b/+"], "a/x"));

        let empty: [&str; 0] = [];
        assert!(!all_match(empty, "a"));
    }

    #[test]
    fn test_pattern_display() {
        let pattern = TopicPattern::parse("orders/+/shipped").unwrap();
        assert_eq!(format!("{}", pattern), "orders/+/shipped");
    }
}
