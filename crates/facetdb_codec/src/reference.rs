//! Entity identifiers and stored references.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Marker string that tags a stored JSON array as an entity reference.
pub const REF_MARKER: &str = "facetdb_entity_reference";

/// Globally unique entity identifier.
///
/// Guids are random integers in `[1, 2^63)` so they always fit the signed
/// integer column types of the supported backends.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Guid(u64);

impl Guid {
    /// Largest raw value a guid may take (`2^63 - 1`).
    pub const MAX: u64 = (1 << 63) - 1;

    /// Create a guid from a raw integer.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Guid(raw)
    }

    /// The raw integer value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The guid as a signed integer, as storage columns hold it.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn as_i64(self) -> i64 {
        self.0 as i64
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Guid {
    fn from(raw: u64) -> Self {
        Guid(raw)
    }
}

/// A stored pointer to a saved entity of a registered class.
///
/// References serialize as the marker array
/// `["facetdb_entity_reference", guid, class]` wherever they appear inside
/// a stored value, so a reference costs a few bytes rather than an embedded
/// copy of the target, and cyclic entity graphs serialize without recursion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    /// Guid of the target entity.
    pub guid: Guid,
    /// Registered class name of the target.
    pub class: String,
}

impl Reference {
    /// Create a reference to the given guid and class.
    pub fn new(guid: Guid, class: impl Into<String>) -> Self {
        Reference {
            guid,
            class: class.into(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.class, self.guid)
    }
}
