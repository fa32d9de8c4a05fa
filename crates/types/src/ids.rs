use serde::{Deserialize, Serialize};
use std::fmt;

/// An entity identifier. Compared case-sensitively: `"jeff"` and `"JEFF"`
/// are different entities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(String);

impl EntityId {
    /// `None` for empty strings: an empty entity ID is a caller error, not a
    /// valid identifier, and is reported as `GeoError::Validation` by callers.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.is_empty() { None } else { Some(Self(raw)) }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A group identifier, stored canonicalised (lowercased) so that lookups and
/// equality are case-insensitive while still round-tripping the original
/// casing for display via [`GroupId::display_form`] of the first fix that
/// introduced it (callers retain that separately; this type only carries the
/// canonical form).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(String);

impl GroupId {
    pub fn canon(raw: &str) -> Option<Self> {
        if raw.is_empty() {
            None
        } else {
            Some(Self(raw.to_lowercase()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
