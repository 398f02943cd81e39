//! Identifier newtypes shared by the store and the engine.

use serde::{Deserialize, Serialize};

/// Opaque endpoint identifier (e.g. `"pfa.activities"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(String);

impl EndpointId {
    /// Create a new endpoint identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for EndpointId {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

/// Sync batch identifier. Generated as a UUID when a batch is opened.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    /// Wrap an existing batch identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for BatchId {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

/// Offset/limit window used by every listing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    /// Upper bound applied to caller-supplied limits.
    pub const MAX_LIMIT: u32 = 1_000;

    #[must_use]
    pub fn new(limit: u32, offset: u32) -> Self {
        Self {
            limit: limit.clamp(1, Self::MAX_LIMIT),
            offset,
        }
    }

    /// First page of `limit` rows.
    #[must_use]
    pub fn first(limit: u32) -> Self {
        Self::new(limit, 0)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::first(50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_id_display_and_as_str() {
        let id = EndpointId::new("pfa.activities");
        assert_eq!(id.as_str(), "pfa.activities");
        assert_eq!(id.to_string(), "pfa.activities");
    }

    #[test]
    fn batch_id_serde_transparent() {
        let id = BatchId::new("b-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"b-1\"");
    }

    #[test]
    fn page_limit_is_clamped() {
        assert_eq!(Page::new(0, 0).limit, 1);
        assert_eq!(Page::new(50_000, 10).limit, Page::MAX_LIMIT);
        assert_eq!(Page::default().limit, 50);
    }
}
