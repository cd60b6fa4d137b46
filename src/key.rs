//! Query keys.
//!
//! A [`QueryKey`] is an ordered, non-empty sequence of primitive parts such as
//! `["posts", 42, "likes"]`. Keys compare element-wise and support prefix
//! matching, which is what invalidation is built on.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a key cannot be parsed from a path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Query key is empty")]
    Empty,
}

/// A single element of a [`QueryKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<&str> for KeyPart {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<bool> for KeyPart {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for KeyPart {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for KeyPart {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<u32> for KeyPart {
    fn from(n: u32) -> Self {
        Self::Int(i64::from(n))
    }
}

/// Identifies one cached resource.
///
/// # Example
///
/// ```
/// use tears_query::query_key;
///
/// let likes = query_key!["posts", 42, "likes"];
/// assert!(likes.starts_with(&query_key!["posts", 42]));
/// assert!(!likes.starts_with(&query_key!["posts", 7]));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Vec<KeyPart>", into = "Vec<KeyPart>")]
pub struct QueryKey {
    parts: Vec<KeyPart>,
}

impl QueryKey {
    /// Creates a key from its parts.
    ///
    /// # Panics
    ///
    /// Panics if `parts` is empty. An empty key cannot identify a resource.
    #[must_use]
    pub fn new(parts: Vec<KeyPart>) -> Self {
        assert!(!parts.is_empty(), "query key must have at least one part");
        Self { parts }
    }

    /// Returns the parts of this key.
    #[must_use]
    pub fn parts(&self) -> &[KeyPart] {
        &self.parts
    }

    /// Returns the number of parts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Always `false`; keys are never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Returns `true` if `prefix` matches the leading parts of this key.
    ///
    /// Every key starts with itself.
    #[must_use]
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.parts.starts_with(&prefix.parts)
    }

    /// Returns a new key with `part` appended.
    #[must_use]
    pub fn child(&self, part: impl Into<KeyPart>) -> Self {
        let mut parts = self.parts.clone();
        parts.push(part.into());
        Self { parts }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{part}")?;
        }
        write!(f, "]")
    }
}

impl TryFrom<Vec<KeyPart>> for QueryKey {
    type Error = KeyError;

    fn try_from(parts: Vec<KeyPart>) -> Result<Self, Self::Error> {
        if parts.is_empty() {
            return Err(KeyError::Empty);
        }
        Ok(Self { parts })
    }
}

impl From<QueryKey> for Vec<KeyPart> {
    fn from(key: QueryKey) -> Self {
        key.parts
    }
}

/// Parses a resource path such as `/posts/42/likes`.
///
/// Segments that parse as integers become [`KeyPart::Int`], everything else
/// becomes [`KeyPart::Str`].
impl FromStr for QueryKey {
    type Err = KeyError;

    fn from_str(path: &str) -> Result<Self, Self::Err> {
        let parts: Vec<KeyPart> = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| match segment.parse::<i64>() {
                Ok(n) => KeyPart::Int(n),
                Err(_) => KeyPart::Str(segment.to_string()),
            })
            .collect();

        Self::try_from(parts)
    }
}

/// Builds a [`QueryKey`] from a list of parts.
///
/// ```
/// use tears_query::{KeyPart, query_key};
///
/// let key = query_key!["posts", 42];
/// assert_eq!(key.parts(), &[KeyPart::from("posts"), KeyPart::Int(42)]);
/// ```
#[macro_export]
macro_rules! query_key {
    ($($part:expr),+ $(,)?) => {
        $crate::QueryKey::new(vec![$($crate::KeyPart::from($part)),+])
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_is_element_wise() {
        assert_eq!(query_key!["post", 42], query_key!["post", 42]);
        assert_ne!(query_key!["post", 42], query_key!["post", "42"]);
        assert_ne!(query_key!["post", 42], query_key!["post", 42, "likes"]);
    }

    #[test]
    fn test_starts_with() {
        let likes = query_key!["posts", 42, "likes"];
        assert!(likes.starts_with(&query_key!["posts"]));
        assert!(likes.starts_with(&query_key!["posts", 42]));
        assert!(likes.starts_with(&likes));
        assert!(!likes.starts_with(&query_key!["posts", 2]));
        assert!(!query_key!["posts"].starts_with(&likes));
    }

    #[test]
    fn test_parse_path() {
        let key: QueryKey = "/posts/42/likes".parse().expect("path should parse");
        assert_eq!(key, query_key!["posts", 42, "likes"]);

        let key: QueryKey = "auth".parse().expect("path should parse");
        assert_eq!(key, query_key!["auth"]);
    }

    #[test]
    fn test_parse_empty_path() {
        assert_eq!("".parse::<QueryKey>(), Err(KeyError::Empty));
        assert_eq!("///".parse::<QueryKey>(), Err(KeyError::Empty));
    }

    #[test]
    #[should_panic(expected = "at least one part")]
    fn test_empty_key_panics() {
        let _ = QueryKey::new(vec![]);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            query_key!["posts", 42, true].to_string(),
            r#"["posts",42,true]"#
        );
    }

    #[test]
    fn test_deserialize() {
        let key: QueryKey =
            serde_json::from_str(r#"["posts",42,"likes"]"#).expect("key should deserialize");
        assert_eq!(key, query_key!["posts", 42, "likes"]);
        assert!(serde_json::from_str::<QueryKey>("[]").is_err());
    }

    #[test]
    fn test_child() {
        let post = query_key!["posts", 42];
        assert_eq!(post.child("comments"), query_key!["posts", 42, "comments"]);
        assert_eq!(post.len(), 2);
    }
}
