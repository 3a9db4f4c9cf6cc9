//! Hierarchical content keys.
//!
//! A [`ContentKey`] identifies a catalog entity as an ordered tuple of
//! non-empty, case-sensitive elements (namespace path plus leaf name).
//! Length limits are enforced at construction time so malformed keys never
//! reach the storage adapter.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Error;

/// Maximum number of elements in a key.
pub const MAX_ELEMENTS: usize = 20;

/// Maximum byte length of a single key element.
pub const MAX_ELEMENT_BYTES: usize = 500;

/// Maximum total byte length across all elements.
pub const MAX_TOTAL_BYTES: usize = 2000;

/// An ordered tuple of non-empty strings identifying a catalog entity.
///
/// Keys compare element-wise lexicographically, which is also the order the
/// key index stores them in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentKey {
    elements: Vec<String>,
}

impl ContentKey {
    /// Creates a key from its elements, enforcing the length limits.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when the key is empty, any element is
    /// empty, or a length limit is exceeded.
    pub fn try_new(elements: Vec<String>) -> Result<Self, Error> {
        if elements.is_empty() {
            return Err(Error::invalid_argument("content key must not be empty"));
        }
        if elements.len() > MAX_ELEMENTS {
            return Err(Error::invalid_argument(format!(
                "content key has {} elements, maximum is {MAX_ELEMENTS}",
                elements.len()
            )));
        }
        let mut total = 0;
        for element in &elements {
            if element.is_empty() {
                return Err(Error::invalid_argument(
                    "content key elements must not be empty",
                ));
            }
            if element.len() > MAX_ELEMENT_BYTES {
                return Err(Error::invalid_argument(format!(
                    "content key element '{element}' exceeds {MAX_ELEMENT_BYTES} bytes"
                )));
            }
            total += element.len();
        }
        if total > MAX_TOTAL_BYTES {
            return Err(Error::invalid_argument(format!(
                "content key is {total} bytes long, maximum is {MAX_TOTAL_BYTES}"
            )));
        }
        Ok(Self { elements })
    }

    /// Creates a key from string-ish elements, panicking on invalid input.
    ///
    /// Intended for literals in tests and examples.
    ///
    /// # Panics
    ///
    /// Panics when the elements violate the key limits.
    #[must_use]
    pub fn of(elements: &[&str]) -> Self {
        Self::try_new(elements.iter().map(ToString::to_string).collect())
            .expect("invalid content key literal")
    }

    /// Returns the key elements in order.
    #[must_use]
    pub fn elements(&self) -> &[String] {
        &self.elements
    }

    /// Returns the leaf element (the entity name).
    #[must_use]
    pub fn name(&self) -> &str {
        self.elements.last().map(String::as_str).unwrap_or_default()
    }

    /// Returns the number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Returns true when the key has no elements.
    ///
    /// Constructed keys are never empty; this exists for symmetry with
    /// `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Returns true when `prefix` is an element-wise prefix of this key.
    #[must_use]
    pub fn starts_with(&self, prefix: &ContentKey) -> bool {
        self.elements.len() >= prefix.elements.len()
            && self.elements[..prefix.elements.len()] == prefix.elements[..]
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.elements.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_key_and_elements() {
        assert!(ContentKey::try_new(vec![]).is_err());
        assert!(ContentKey::try_new(vec![String::new()]).is_err());
        assert!(ContentKey::try_new(vec!["a".into(), String::new()]).is_err());
    }

    #[test]
    fn enforces_length_limits() {
        let many: Vec<String> = (0..=MAX_ELEMENTS).map(|i| format!("e{i}")).collect();
        assert!(ContentKey::try_new(many).is_err());

        let long = "x".repeat(MAX_ELEMENT_BYTES + 1);
        assert!(ContentKey::try_new(vec![long]).is_err());

        let wide: Vec<String> = (0..5).map(|_| "y".repeat(450)).collect();
        assert!(ContentKey::try_new(wide).is_err());
    }

    #[test]
    fn ordering_is_element_wise() {
        let a = ContentKey::of(&["db", "a"]);
        let b = ContentKey::of(&["db", "b"]);
        let parent = ContentKey::of(&["db"]);
        assert!(a < b);
        assert!(parent < a);
    }

    #[test]
    fn keys_are_case_sensitive() {
        assert_ne!(ContentKey::of(&["DB", "t"]), ContentKey::of(&["db", "t"]));
    }

    #[test]
    fn prefix_matching() {
        let key = ContentKey::of(&["db", "schema", "t1"]);
        assert!(key.starts_with(&ContentKey::of(&["db"])));
        assert!(key.starts_with(&ContentKey::of(&["db", "schema"])));
        assert!(!key.starts_with(&ContentKey::of(&["db", "other"])));
        assert!(!ContentKey::of(&["db"]).starts_with(&key));
    }

    #[test]
    fn display_joins_with_dots() {
        assert_eq!(ContentKey::of(&["db", "t1"]).to_string(), "db.t1");
    }

    #[test]
    fn serde_is_a_plain_array() {
        let key = ContentKey::of(&["db", "t1"]);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, r#"["db","t1"]"#);
        let back: ContentKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
