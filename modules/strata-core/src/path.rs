//! Dotted addresses into the state tree.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

static RE_STATE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_]+$").expect("state name regex is valid"));

/// Ordered list of segments addressing a value in a [`StateTree`](crate::StateTree).
///
/// The empty path addresses the root object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct StatePath(Vec<String>);

impl StatePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Parse a dotted path. Empty segments are dropped, so `""` is the root.
    pub fn parse(dotted: &str) -> Self {
        Self(
            dotted
                .split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Check that `name` is usable as a state name (one path segment).
    pub fn validate_name(name: &str) -> Result<()> {
        if RE_STATE_NAME.is_match(name) {
            Ok(())
        } else {
            Err(StoreError::InvalidStateName(name.to_string()))
        }
    }

    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.into());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Last segment, the state name for a registered node.
    pub fn name(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn starts_with(&self, prefix: &StatePath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Two paths overlap when one addresses a value inside the other.
    pub fn overlaps(&self, other: &StatePath) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }
}

impl fmt::Display for StatePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl From<&str> for StatePath {
    fn from(dotted: &str) -> Self {
        Self::parse(dotted)
    }
}

impl From<String> for StatePath {
    fn from(dotted: String) -> Self {
        Self::parse(&dotted)
    }
}

impl From<StatePath> for String {
    fn from(path: StatePath) -> Self {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_drops_empty_segments() {
        let path = StatePath::parse(".app..todos.");
        assert_eq!(path.segments(), &["app".to_string(), "todos".to_string()]);
        assert_eq!(path.to_string(), "app.todos");
        assert!(StatePath::parse("").is_root());
    }

    #[test]
    fn overlap_is_symmetric_prefix_check() {
        let parent = StatePath::parse("app");
        let child = StatePath::parse("app.todos");
        let sibling = StatePath::parse("apples");

        assert!(parent.overlaps(&child));
        assert!(child.overlaps(&parent));
        assert!(!parent.overlaps(&sibling));
    }

    #[test]
    fn names_with_dots_or_dashes_are_rejected() {
        assert!(StatePath::validate_name("todos_2").is_ok());
        assert!(StatePath::validate_name("app.todos").is_err());
        assert!(StatePath::validate_name("my-state").is_err());
        assert!(StatePath::validate_name("").is_err());
    }
}
