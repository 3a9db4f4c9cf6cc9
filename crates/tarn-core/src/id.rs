//! Content-addressed object identifiers.
//!
//! Every stored object in Tarn is addressed by a 256-bit hash of its
//! canonical serialized bytes, mixed with a domain tag so that objects of
//! different kinds can never collide. [`ObjIdHasher`] additionally derives
//! stable IDs from ordered fields without re-reading blob bodies; the
//! catalog layer uses it to compute snapshot IDs from content fields alone.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A 256-bit content-addressed object identifier.
///
/// Equality and ordering are lexicographic on the raw bytes; the external
/// representation is 64 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjId([u8; 32]);

impl ObjId {
    /// The all-zero ID, used as the "no ancestor" head of an empty branch.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Hashes `bytes` under `domain_tag` into an ID.
    ///
    /// The tag participates in the digest, so identical payloads stored
    /// under different object kinds produce distinct IDs.
    #[must_use]
    pub fn hash(domain_tag: &str, bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain_tag.as_bytes());
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    /// Creates an ID from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes of this ID.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns true if this is the all-zero "no ancestor" ID.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjId({})", self)
    }
}

impl FromStr for ObjId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)
            .map_err(|e| Error::invalid_argument(format!("invalid object id '{s}': {e}")))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::invalid_argument(format!("object id '{s}' is not 32 bytes")))?;
        Ok(Self(bytes))
    }
}

impl Serialize for ObjId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ObjId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Derives a stable ID from a domain tag plus ordered field values.
///
/// Strings are folded length-prefixed and integers big-endian, so the result
/// depends on both field values and their order. This is how the catalog
/// derives a snapshot ID from a content blob's fields without reading the
/// blob body:
///
/// ```rust
/// use tarn_core::id::ObjIdHasher;
///
/// let id = ObjIdHasher::new("ContentSnapshot")
///     .update_str("s3://wh/db/t1/metadata/00001.metadata.json")
///     .update_i64(42)
///     .generate();
/// ```
pub struct ObjIdHasher {
    hasher: Sha256,
}

impl ObjIdHasher {
    /// Starts a derived hash under the given domain tag.
    #[must_use]
    pub fn new(domain_tag: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((domain_tag.len() as u32).to_be_bytes());
        hasher.update(domain_tag.as_bytes());
        Self { hasher }
    }

    /// Folds a string field, length-prefixed.
    #[must_use]
    pub fn update_str(mut self, value: &str) -> Self {
        self.hasher.update((value.len() as u32).to_be_bytes());
        self.hasher.update(value.as_bytes());
        self
    }

    /// Folds a 64-bit integer field, big-endian.
    #[must_use]
    pub fn update_i64(mut self, value: i64) -> Self {
        self.hasher.update(value.to_be_bytes());
        self
    }

    /// Finalizes the derived ID.
    #[must_use]
    pub fn generate(self) -> ObjId {
        ObjId(self.hasher.finalize().into())
    }
}
