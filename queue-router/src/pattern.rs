//! The dotted-segment pattern grammar: exact segment match, `*` for
//! exactly one segment, `#` for one-or-more segments anchored at the
//! tail. No mid-pattern `#` and no escaping of literal dots — the
//! grammar stays this small on purpose.

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern has an empty segment (consecutive or leading/trailing dots)")]
    EmptySegment,

    #[error("`#` must be the final segment of a pattern")]
    HashNotTrailing,

    #[error("pattern is empty")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Star,
    Hash,
}

/// A compiled topic-pattern, e.g. `user.*` or `user.#`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    source: String,
    segments: Vec<Segment>,
}

impl Pattern {
    /// Parses and validates a dotted pattern string. `#` is only legal as
    /// the last segment: the multi-segment wildcard matches one or more
    /// segments at the tail.
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }
        let raw_segments: Vec<&str> = pattern.split('.').collect();
        if raw_segments.iter().any(|s| s.is_empty()) {
            return Err(PatternError::EmptySegment);
        }
        let mut segments = Vec::with_capacity(raw_segments.len());
        for (i, raw) in raw_segments.iter().enumerate() {
            let segment = match *raw {
                "*" => Segment::Star,
                "#" => {
                    if i != raw_segments.len() - 1 {
                        return Err(PatternError::HashNotTrailing);
                    }
                    Segment::Hash
                }
                literal => Segment::Literal(literal.to_string()),
            };
            segments.push(segment);
        }
        Ok(Pattern {
            source: pattern.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True if `topic`'s dotted segments satisfy this pattern.
    pub fn matches(&self, topic: &str) -> bool {
        let topic_segments: Vec<&str> = topic.split('.').collect();
        Self::matches_segments(&self.segments, &topic_segments)
    }

    fn matches_segments(pattern: &[Segment], topic: &[&str]) -> bool {
        match pattern.first() {
            None => topic.is_empty(),
            Some(Segment::Hash) => !topic.is_empty(),
            Some(Segment::Star) => {
                !topic.is_empty() && Self::matches_segments(&pattern[1..], &topic[1..])
            }
            Some(Segment::Literal(literal)) => {
                topic.first() == Some(&literal.as_str())
                    && Self::matches_segments(&pattern[1..], &topic[1..])
            }
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_exactly_one_segment() {
        let p = Pattern::parse("user.*").unwrap();
        assert!(p.matches("user.created"));
        assert!(!p.matches("user.created.v2"));
        assert!(!p.matches("user"));
    }

    #[test]
    fn hash_matches_one_or_more_trailing_segments() {
        let p = Pattern::parse("user.#").unwrap();
        assert!(p.matches("user.created"));
        assert!(p.matches("user.created.v2"));
        assert!(!p.matches("user"));
    }

    #[test]
    fn exact_match_requires_identical_segments() {
        let p = Pattern::parse("user.created").unwrap();
        assert!(p.matches("user.created"));
        assert!(!p.matches("user.created.v2"));
        assert!(!p.matches("user.deleted"));
    }

    #[test]
    fn hash_must_be_trailing() {
        assert_eq!(Pattern::parse("#.user").unwrap_err(), PatternError::HashNotTrailing);
    }

    #[test]
    fn rejects_empty_segments() {
        assert_eq!(Pattern::parse("user..created").unwrap_err(), PatternError::EmptySegment);
        assert_eq!(Pattern::parse(".user").unwrap_err(), PatternError::EmptySegment);
    }
}
